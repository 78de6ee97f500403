use std::time::Instant;
use tracing::{debug, error, warn};

use crate::command::Command;
use crate::transport::Connection;
use crate::types::{ExecutionError, Phase, PhaseRecord};

/// Runs one phase of a command in a fresh session and captures the outcome
#[derive(Debug, Clone, Copy)]
pub struct PhaseExecutor<'a> {
    connection: &'a Connection,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Execute `command`'s action for `phase`. Never fails: session, timeout
    /// and exit-code problems all end up in the returned record.
    pub async fn execute(&self, command: &Command, phase: Phase) -> PhaseRecord {
        let action = command.action(phase);
        let env = command.environment(phase);
        let limit = command.timeout(phase);

        debug!(
            command = %command.name(),
            phase = %phase,
            env_vars = env.len(),
            timeout_secs = limit.as_secs(),
            "Executing phase"
        );

        let start_time = Instant::now();
        let started_at = chrono::Utc::now().timestamp();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = match self.connection.new_session().await {
            Ok(mut session) => {
                session
                    .run(action, &env, &mut stdout, &mut stderr, limit)
                    .await
            }
            Err(e) => Err(ExecutionError::Session(e)),
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let mut record = PhaseRecord {
            stdout,
            stderr,
            exit_code: None,
            started_at,
            duration_ms,
            error: None,
            timed_out: false,
        };

        match result {
            Ok(()) => {
                record.exit_code = Some(0);
                debug!(
                    command = %command.name(),
                    phase = %phase,
                    duration_ms = duration_ms,
                    stdout_len = record.stdout.len(),
                    stderr_len = record.stderr.len(),
                    "Phase completed"
                );
            }
            Err(e) => {
                match &e {
                    ExecutionError::NonZeroExit { code, .. } => {
                        record.exit_code = Some(*code);
                        warn!(
                            command = %command.name(),
                            phase = %phase,
                            exit_code = code,
                            stderr = %String::from_utf8_lossy(&record.stderr),
                            "Phase failed with non-zero exit code"
                        );
                    }
                    ExecutionError::Timeout { .. } => {
                        record.timed_out = true;
                        warn!(
                            command = %command.name(),
                            phase = %phase,
                            timeout_secs = limit.as_secs(),
                            duration_ms = duration_ms,
                            "Phase timed out"
                        );
                    }
                    _ => {
                        error!(
                            command = %command.name(),
                            phase = %phase,
                            error = %e,
                            "Phase could not run"
                        );
                    }
                }
                record.error = Some(e.to_string());
            }
        }

        record
    }
}
