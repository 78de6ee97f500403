//! Local transport: every session is a fresh `sh -c` on this machine.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::process::Command;

use super::process::run_streaming;
use super::shell::check_env_names;
use super::{Session, Transport};
use crate::types::{ConnectionError, ExecutionError};

const LOCAL_SHELL: &str = "sh";

/// Transport that runs commands on the current host
#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn new_session(&self) -> Result<Box<dyn Session>, ConnectionError> {
        Ok(Box::new(LocalSession))
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

/// One-shot local session
#[derive(Debug)]
pub struct LocalSession;

#[async_trait]
impl Session for LocalSession {
    async fn run(
        &mut self,
        command: &str,
        env: &HashMap<String, String>,
        stdout: &mut (dyn AsyncWrite + Send + Unpin),
        stderr: &mut (dyn AsyncWrite + Send + Unpin),
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        check_env_names(env)?;

        let mut cmd = Command::new(LOCAL_SHELL);
        cmd.arg("-c").arg(command).envs(env);

        run_streaming(cmd, command, stdout, stderr, timeout).await
    }
}
