//! Remote execution transports
//!
//! A [`Connection`] owns one channel to one host and hands out a fresh
//! [`Session`] for every command phase, so shell state never leaks from one
//! command into the next. Two transports ship with the crate:
//! - [`SshTransport`]: an `ssh` control master; sessions are extra `ssh`
//!   clients multiplexed over its socket
//! - [`LocalTransport`]: `sh -c` on the current machine
//!
//! A failed dial does not return an error directly. The connection stores it
//! and every later operation fails with that same error.

pub mod local;
mod process;
pub mod shell;
pub mod ssh;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info};
use zeroize::Zeroize;

use crate::config::SshConfig;
use crate::types::{ConnectionError, ExecutionError};

pub use local::LocalTransport;
pub use ssh::SshTransport;

/// One independent execution context on the target
#[async_trait]
pub trait Session: Send {
    /// Run `command` with `env` applied, streaming output into the sinks.
    /// Returns once the command exits, `timeout` elapses or the transport
    /// fails.
    async fn run(
        &mut self,
        command: &str,
        env: &HashMap<String, String>,
        stdout: &mut (dyn AsyncWrite + Send + Unpin),
        stderr: &mut (dyn AsyncWrite + Send + Unpin),
        timeout: Duration,
    ) -> Result<(), ExecutionError>;
}

/// An established channel able to open sessions
#[async_trait]
pub trait Transport: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn Session>, ConnectionError>;

    /// Tear the channel down; later sessions fail
    async fn close(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Password held in memory only as long as needed and wiped on drop
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret (use with caution)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// How to authenticate against the target
#[derive(Debug)]
pub enum Credential {
    /// Whatever the ssh client finds on its own (agent, default keys)
    Agent,
    /// Private key file
    KeyFile(PathBuf),
    /// Password, fed to ssh through an askpass helper
    Password(Secret),
}

/// Everything needed to dial a target
#[derive(Debug)]
pub struct DialOptions {
    /// `host` or `host:port`
    pub address: String,
    pub user: String,
    pub credential: Credential,
    pub ssh: SshConfig,
}

/// Connection to one host, possibly carrying the error of a failed dial
pub struct Connection {
    address: String,
    state: Result<Box<dyn Transport>, ConnectionError>,
    batch_lock: Mutex<()>,
}

impl Connection {
    /// Establish the channel described by `options`. Never fails outright:
    /// on error the returned connection carries it, see [`Connection::err`].
    pub async fn dial(options: DialOptions) -> Self {
        let Some((host, _port)) = split_address(&options.address, options.ssh.port) else {
            return Self::failed(
                options.address.clone(),
                ConnectionError::Dial {
                    address: options.address.clone(),
                    message: "invalid address, expected 'host' or 'host:port'".to_string(),
                },
            );
        };

        if options.ssh.local_shortcut && is_local_host(&host) {
            info!(
                address = %options.address,
                "Target is localhost, using local execution"
            );
            return Self::from_transport(options.address, Box::new(LocalTransport::new()));
        }

        match SshTransport::connect(&options).await {
            Ok(transport) => {
                info!(
                    address = %options.address,
                    user = %options.user,
                    "Connection established"
                );
                Self::from_transport(options.address, Box::new(transport))
            }
            Err(e) => {
                error!(
                    address = %options.address,
                    user = %options.user,
                    error = %e,
                    "Connection failed"
                );
                Self::failed(options.address, e)
            }
        }
    }

    /// Connection running commands on this machine
    pub fn local() -> Self {
        Self::from_transport("localhost", Box::new(LocalTransport::new()))
    }

    pub fn from_transport(address: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            address: address.into(),
            state: Ok(transport),
            batch_lock: Mutex::new(()),
        }
    }

    /// Connection whose every operation fails with `error`
    pub fn failed(address: impl Into<String>, error: ConnectionError) -> Self {
        Self {
            address: address.into(),
            state: Err(error),
            batch_lock: Mutex::new(()),
        }
    }

    /// The stored dial error, if any
    pub fn err(&self) -> Option<&ConnectionError> {
        self.state.as_ref().err()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn describe(&self) -> String {
        match &self.state {
            Ok(transport) => transport.describe(),
            Err(_) => format!("{} (failed)", self.address),
        }
    }

    /// Open a fresh session; fails with the stored error on a failed dial
    pub async fn new_session(&self) -> Result<Box<dyn Session>, ConnectionError> {
        match &self.state {
            Ok(transport) => transport.new_session().await,
            Err(e) => Err(e.clone()),
        }
    }

    /// Claim the connection for one batch run
    pub(crate) fn try_begin_batch(&self) -> Option<MutexGuard<'_, ()>> {
        self.batch_lock.try_lock().ok()
    }

    pub async fn close(&self) -> Result<(), ConnectionError> {
        match &self.state {
            Ok(transport) => transport.close().await,
            Err(e) => Err(e.clone()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("transport", &self.describe())
            .field("error", &self.err())
            .finish()
    }
}

/// Split `host`, `host:port` or `[v6]:port`; bare IPv6 literals keep the
/// default port. Returns `None` for an empty host or unparsable port.
pub fn split_address(address: &str, default_port: u16) -> Option<(String, u16)> {
    let address = address.trim();

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        match tail {
            "" => (host, None),
            tail => (host, Some(tail.strip_prefix(':')?)),
        }
    } else if address.matches(':').count() == 1 {
        let (host, port) = address.split_once(':')?;
        (host, Some(port))
    } else {
        (address, None)
    };

    if host.is_empty() {
        return None;
    }

    let port = match port {
        Some(port) => port.parse::<u16>().ok().filter(|p| *p != 0)?,
        None => default_port,
    };

    Some((host.to_string(), port))
}

/// Hosts that resolve to this machine
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}
