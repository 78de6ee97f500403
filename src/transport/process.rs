//! Child process plumbing shared by the local and ssh sessions.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::types::ExecutionError;

/// Spawn `cmd`, stream its stdout/stderr into the sinks as bytes arrive and
/// wait for it to exit within `limit`. On timeout the child is killed; bytes
/// already copied stay in the sinks.
pub(crate) async fn run_streaming(
    mut cmd: Command,
    label: &str,
    stdout: &mut (dyn AsyncWrite + Send + Unpin),
    stderr: &mut (dyn AsyncWrite + Send + Unpin),
    limit: Duration,
) -> Result<(), ExecutionError> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(
        command = %label,
        timeout_ms = limit.as_millis() as u64,
        "Spawning command"
    );

    let start_time = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecutionError::StartFailed {
        command: label.to_string(),
        source,
    })?;

    let mut child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| missing_pipe(label, "stdout"))?;
    let mut child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| missing_pipe(label, "stderr"))?;

    let outcome = {
        let run = async {
            tokio::join!(
                copy_stream(&mut child_stdout, stdout),
                copy_stream(&mut child_stderr, stderr),
                child.wait(),
            )
        };
        timeout(limit, run).await
    };

    let duration_ms = start_time.elapsed().as_millis() as u64;

    match outcome {
        Ok((copied_out, copied_err, status)) => {
            let status = status.map_err(|source| ExecutionError::Output {
                command: label.to_string(),
                source,
            })?;
            for copied in [copied_out, copied_err] {
                copied.map_err(|source| ExecutionError::Output {
                    command: label.to_string(),
                    source,
                })?;
            }

            debug!(
                command = %label,
                exit_code = status.code(),
                duration_ms = duration_ms,
                "Command exited"
            );

            if status.success() {
                return Ok(());
            }

            match status.code() {
                Some(code) => Err(ExecutionError::NonZeroExit {
                    command: label.to_string(),
                    code,
                }),
                None => Err(ExecutionError::Terminated {
                    command: label.to_string(),
                }),
            }
        }
        Err(_elapsed) => {
            warn!(
                command = %label,
                timeout_ms = limit.as_millis() as u64,
                duration_ms = duration_ms,
                "Command timed out, killing it"
            );
            if let Err(e) = child.kill().await {
                warn!(command = %label, error = %e, "Failed to kill timed out command");
            }

            Err(ExecutionError::Timeout {
                command: label.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}

async fn copy_stream<R>(reader: &mut R, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    tokio::io::copy(reader, writer).await
}

fn missing_pipe(label: &str, stream: &str) -> ExecutionError {
    ExecutionError::Output {
        command: label.to_string(),
        source: io::Error::new(io::ErrorKind::Other, format!("{} was not captured", stream)),
    }
}
