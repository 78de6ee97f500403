//! SSH transport over the system `ssh` client
//!
//! `connect` starts a control master (`ssh -M -N -f`) that authenticates once
//! and keeps the channel open behind a unix socket in a private temp dir.
//! Each session is a separate `ssh -S <socket>` client, so every command gets
//! a fresh remote shell without re-authenticating.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::process::run_streaming;
use super::shell::{quote, remote_script};
use super::{split_address, Credential, DialOptions, Secret, Session, Transport};
use crate::config::SshConfig;
use crate::types::{ConnectionError, ExecutionError};

/// Extra time the master gets on top of ConnectTimeout to authenticate
const MASTER_STARTUP_GRACE: Duration = Duration::from_secs(20);

const CONTROL_SOCKET: &str = "ctl";
const MASTER_LOG: &str = "master.log";
const ASKPASS_SCRIPT: &str = "askpass.sh";
const SECRET_FILE: &str = "secret";

/// Control-master backed transport
pub struct SshTransport {
    binary: String,
    destination: String,
    port: u16,
    control_path: PathBuf,
    options: Vec<String>,
    closed: AtomicBool,
    // removed on drop, taking the socket and askpass helper with it
    control_dir: TempDir,
}

impl SshTransport {
    /// Start the control master and wait until it has authenticated
    pub async fn connect(options: &DialOptions) -> Result<Self, ConnectionError> {
        let dial_error = |message: String| ConnectionError::Dial {
            address: options.address.clone(),
            message,
        };

        let (host, port) = split_address(&options.address, options.ssh.port)
            .ok_or_else(|| dial_error("invalid address, expected 'host' or 'host:port'".to_string()))?;

        if options.user.is_empty() {
            return Err(ConnectionError::Credential {
                message: "user must not be empty".to_string(),
            });
        }
        if let Credential::KeyFile(path) = &options.credential {
            if !path.exists() {
                return Err(ConnectionError::Credential {
                    message: format!("identity file not found: {}", path.display()),
                });
            }
        }

        let control_dir = tempfile::Builder::new()
            .prefix("rollshot-")
            .tempdir()
            .map_err(|e| dial_error(format!("cannot create control directory: {}", e)))?;
        let control_path = control_dir.path().join(CONTROL_SOCKET);
        let log_path = control_dir.path().join(MASTER_LOG);

        let transport = Self {
            binary: options.ssh.binary.clone(),
            destination: format!("{}@{}", options.user, host),
            port,
            control_path,
            options: connection_options(&options.ssh),
            // stays closed until the master is up, so Drop has nothing to stop
            closed: AtomicBool::new(true),
            control_dir,
        };

        let mut master = Command::new(&transport.binary);
        master
            .arg("-M")
            .arg("-S")
            .arg(&transport.control_path)
            .args(["-o", "ControlPersist=yes", "-f", "-N", "-E"])
            .arg(&log_path)
            .arg("-p")
            .arg(transport.port.to_string())
            .args(&transport.options)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut secret_file = None;
        match &options.credential {
            Credential::Agent => {
                master.args(["-o", "BatchMode=yes"]);
            }
            Credential::KeyFile(path) => {
                master
                    .arg("-i")
                    .arg(path)
                    .args(["-o", "IdentitiesOnly=yes", "-o", "BatchMode=yes"]);
            }
            Credential::Password(secret) => {
                let file = SecretFile::create(transport.control_dir.path(), secret).await?;
                let askpass = write_askpass_helper(transport.control_dir.path(), file.path()).await?;
                secret_file = Some(file);
                master
                    .args([
                        "-o",
                        "BatchMode=no",
                        "-o",
                        "NumberOfPasswordPrompts=1",
                        "-o",
                        "PreferredAuthentications=password,keyboard-interactive",
                    ])
                    .env("SSH_ASKPASS", askpass)
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env(
                        "DISPLAY",
                        std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string()),
                    );
            }
        }

        master.arg(&transport.destination);

        debug!(
            destination = %transport.destination,
            port = transport.port,
            control_path = %transport.control_path.display(),
            "Starting ssh control master"
        );

        let budget = Duration::from_secs(options.ssh.connect_timeout) + MASTER_STARTUP_GRACE;
        let outcome = tokio::time::timeout(budget, master.status()).await;
        // `-f` only returns once authentication is over
        drop(secret_file);

        let status = outcome
            .map_err(|_| dial_error(format!("no answer within {}s", budget.as_secs())))?
            .map_err(|e| dial_error(format!("cannot run '{}': {}", transport.binary, e)))?;

        if !status.success() {
            let detail = last_log_line(&log_path)
                .await
                .unwrap_or_else(|| format!("ssh exited with {}", status));
            return Err(dial_error(detail));
        }

        transport.closed.store(false, Ordering::SeqCst);
        Ok(transport)
    }

    /// Arguments shared by every client riding on the control master
    fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.control_path.to_string_lossy().to_string(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        args.extend(self.options.iter().cloned());
        args
    }

    fn exit_args(&self) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.control_path.to_string_lossy().to_string(),
            "-O".to_string(),
            "exit".to_string(),
            self.destination.clone(),
        ]
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn new_session(&self) -> Result<Box<dyn Session>, ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        let mut args = self.client_args();
        args.push("-T".to_string());
        args.push(self.destination.clone());

        Ok(Box::new(SshSession {
            binary: self.binary.clone(),
            args,
        }))
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(destination = %self.destination, "Stopping ssh control master");

        let status = Command::new(&self.binary)
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ConnectionError::Spawn {
                message: format!("cannot run '{}': {}", self.binary, e),
            })?;

        if !status.success() {
            warn!(
                destination = %self.destination,
                status = %status,
                "Control master did not acknowledge exit"
            );
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("ssh {}:{}", self.destination, self.port)
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // fire and forget, drop may run on a runtime worker
        let _ = std::process::Command::new(&self.binary)
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

/// One remote shell over the control master
pub struct SshSession {
    binary: String,
    args: Vec<String>,
}

#[async_trait]
impl Session for SshSession {
    async fn run(
        &mut self,
        command: &str,
        env: &HashMap<String, String>,
        stdout: &mut (dyn AsyncWrite + Send + Unpin),
        stderr: &mut (dyn AsyncWrite + Send + Unpin),
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        let script = remote_script(command, env)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args).arg(script);

        // label with the bare command so env values stay out of logs
        run_streaming(cmd, command, stdout, stderr, timeout).await
    }
}

/// `-o` options derived from the ssh config, shared by master and clients
fn connection_options(ssh: &SshConfig) -> Vec<String> {
    let mut options = vec![
        format!("ConnectTimeout={}", ssh.connect_timeout),
        format!("ServerAliveInterval={}", ssh.server_alive_interval),
        format!("ServerAliveCountMax={}", ssh.server_alive_count_max),
        format!("StrictHostKeyChecking={}", ssh.strict_host_key_checking),
    ];
    if let Some(known_hosts) = &ssh.known_hosts_file {
        options.push(format!("UserKnownHostsFile={}", known_hosts));
    }
    options.extend(ssh.extra_options.iter().cloned());

    options
        .into_iter()
        .flat_map(|option| ["-o".to_string(), option])
        .collect()
}

/// Owner-only password file for the askpass helper, removed on drop
struct SecretFile(PathBuf);

impl SecretFile {
    async fn create(dir: &Path, secret: &Secret) -> Result<Self, ConnectionError> {
        let path = dir.join(SECRET_FILE);
        let to_error = |e: std::io::Error| ConnectionError::Credential {
            message: format!("cannot store password for askpass: {}", e),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .await
            .map_err(to_error)?;
        let guard = Self(path);

        file.write_all(secret.expose().as_bytes())
            .await
            .map_err(to_error)?;
        file.write_all(b"\n").await.map_err(to_error)?;
        file.flush().await.map_err(to_error)?;

        Ok(guard)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Helper printing the password file to ssh
async fn write_askpass_helper(dir: &Path, secret_path: &Path) -> Result<PathBuf, ConnectionError> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(ASKPASS_SCRIPT);
    let script = format!(
        "#!/bin/sh\nexec cat {}\n",
        quote(&secret_path.to_string_lossy())
    );

    let to_error = |e: std::io::Error| ConnectionError::Credential {
        message: format!("cannot prepare askpass helper: {}", e),
    };
    tokio::fs::write(&path, script).await.map_err(to_error)?;
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(to_error)?;

    Ok(path)
}

async fn last_log_line(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}
