//! Turning a parsed batch file into engine inputs

use std::path::PathBuf;
use std::time::Duration;

use super::types::{BatchFile, CommandConfig, DefaultsConfig, SshConfig};
use crate::command::Command;
use crate::policy::RollbackPolicy;
use crate::transport::{Credential, DialOptions, Secret};
use crate::types::Result;

impl BatchFile {
    /// Policy precedence: CLI flag, then the batch file, then the config default
    pub fn effective_policy(
        &self,
        cli: Option<RollbackPolicy>,
        defaults: &DefaultsConfig,
    ) -> RollbackPolicy {
        cli.or(self.policy).unwrap_or(defaults.rollback_policy)
    }

    /// Commands in file order, timeouts falling back to `defaults`
    pub fn to_commands(&self, defaults: &DefaultsConfig) -> Vec<Command> {
        self.commands
            .iter()
            .map(|command| command.to_command(defaults))
            .collect()
    }

    /// Dial options for the target. Reads the password from the environment
    /// when `password_env` is set.
    pub fn dial_options(&self, ssh: &SshConfig) -> Result<DialOptions> {
        let credential = match (&self.target.identity_file, &self.target.password_env) {
            (Some(path), _) => Credential::KeyFile(expand_home(path)),
            (None, Some(var)) => {
                let password =
                    std::env::var(var).map_err(|_| crate::types::Error::Validation {
                        field: "target.password_env".to_string(),
                        message: format!("Environment variable '{}' is not set", var),
                    })?;
                Credential::Password(Secret::new(password))
            }
            (None, None) => Credential::Agent,
        };

        Ok(DialOptions {
            address: self.target.address.clone(),
            user: self.target.user.clone(),
            credential,
            ssh: ssh.clone(),
        })
    }
}

impl CommandConfig {
    pub fn to_command(&self, defaults: &DefaultsConfig) -> Command {
        let timeout = Duration::from_secs(self.timeout.unwrap_or(defaults.command_timeout));

        let mut command = Command::new(
            &self.name,
            &self.action,
            &self.check,
            &self.rollback,
            &self.expected,
            self.env.clone(),
            self.check_env.clone(),
            self.rollback_env.clone(),
            timeout,
        );
        if let Some(secs) = self.check_timeout {
            command = command.with_check_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.rollback_timeout {
            command = command.with_rollback_timeout(Duration::from_secs(secs));
        }
        command
    }
}

/// Expand a leading `~/` using `HOME`
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
