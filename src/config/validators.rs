use std::collections::HashMap;

use super::types::{BatchFile, SystemConfig};
use crate::transport::shell::is_valid_env_name;
use crate::transport::split_address;
use crate::types::Result;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "pretty", "plain"];
const HOST_KEY_POLICIES: &[&str] = &["yes", "no", "accept-new", "ask", "off"];

// Validation helper functions

/// Validate positive timeout value
pub(crate) fn validate_positive_timeout(value: u64, field: &str) -> Result<()> {
    if value == 0 {
        return Err(crate::types::Error::Validation {
            field: field.to_string(),
            message: "Timeout must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Validate a value against a fixed set of names
pub(crate) fn validate_one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
    if !allowed.contains(&value) {
        return Err(crate::types::Error::Validation {
            field: field.to_string(),
            message: format!(
                "Invalid value '{}'. Must be one of: {}",
                value,
                allowed.join(", ")
            ),
        });
    }
    Ok(())
}

/// Validate `host` / `host:port` target address
pub(crate) fn validate_address(address: &str, field: &str) -> Result<()> {
    if split_address(address, 22).is_none() {
        return Err(crate::types::Error::Validation {
            field: field.to_string(),
            message: format!(
                "Invalid address '{}'. Expected 'host' or 'host:port' (e.g., '10.0.0.5:22')",
                address
            ),
        });
    }
    Ok(())
}

/// Validate environment variable names of one phase
pub(crate) fn validate_env_names(env: &HashMap<String, String>, field: &str) -> Result<()> {
    for name in env.keys() {
        if !is_valid_env_name(name) {
            return Err(crate::types::Error::Validation {
                field: field.to_string(),
                message: format!(
                    "Invalid environment variable name '{}'. Must match [A-Za-z_][A-Za-z0-9_]*",
                    name
                ),
            });
        }
    }
    Ok(())
}

/// Validate extra ssh options are `Key=Value`
pub(crate) fn validate_ssh_option(option: &str, field: &str) -> Result<()> {
    match option.split_once('=') {
        Some((key, _)) if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()) => {
            Ok(())
        }
        _ => Err(crate::types::Error::Validation {
            field: field.to_string(),
            message: format!(
                "Invalid ssh option '{}'. Expected 'Key=Value' (e.g., 'Compression=yes')",
                option
            ),
        }),
    }
}

impl SystemConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_one_of(&self.logging.level, LOG_LEVELS, "logging.level")?;
        validate_one_of(&self.logging.format, LOG_FORMATS, "logging.format")?;

        if self.ssh.binary.trim().is_empty() {
            return Err(crate::types::Error::Validation {
                field: "ssh.binary".to_string(),
                message: "ssh binary must not be empty".to_string(),
            });
        }
        if self.ssh.port == 0 {
            return Err(crate::types::Error::Validation {
                field: "ssh.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            });
        }
        validate_positive_timeout(self.ssh.connect_timeout, "ssh.connect_timeout")?;
        validate_positive_timeout(self.ssh.server_alive_interval, "ssh.server_alive_interval")?;
        if self.ssh.server_alive_count_max == 0 {
            return Err(crate::types::Error::Validation {
                field: "ssh.server_alive_count_max".to_string(),
                message: "Value must be greater than 0".to_string(),
            });
        }
        validate_one_of(
            &self.ssh.strict_host_key_checking,
            HOST_KEY_POLICIES,
            "ssh.strict_host_key_checking",
        )?;
        for (i, option) in self.ssh.extra_options.iter().enumerate() {
            validate_ssh_option(option, &format!("ssh.extra_options[{}]", i))?;
        }

        validate_positive_timeout(self.defaults.command_timeout, "defaults.command_timeout")?;

        Ok(())
    }
}

impl BatchFile {
    /// Validate the batch file on its own, without touching the network
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.target.address, "target.address")?;

        if self.target.user.trim().is_empty() {
            return Err(crate::types::Error::Validation {
                field: "target.user".to_string(),
                message: "User must not be empty".to_string(),
            });
        }

        if self.target.identity_file.is_some() && self.target.password_env.is_some() {
            return Err(crate::types::Error::Validation {
                field: "target".to_string(),
                message: "identity_file and password_env are mutually exclusive".to_string(),
            });
        }

        if let Some(ref var) = self.target.password_env {
            if !is_valid_env_name(var) {
                return Err(crate::types::Error::Validation {
                    field: "target.password_env".to_string(),
                    message: format!("Invalid environment variable name '{}'", var),
                });
            }
        }

        for (i, command) in self.commands.iter().enumerate() {
            let field = |name: &str| format!("command[{}].{}", i, name);

            if command.name.trim().is_empty() {
                return Err(crate::types::Error::Validation {
                    field: field("name"),
                    message: "Command name must not be empty".to_string(),
                });
            }
            if command.check.is_empty() && !command.expected.is_empty() {
                return Err(crate::types::Error::Validation {
                    field: field("expected"),
                    message: "expected is set but no check action is defined".to_string(),
                });
            }

            validate_env_names(&command.env, &field("env"))?;
            validate_env_names(&command.check_env, &field("check_env"))?;
            validate_env_names(&command.rollback_env, &field("rollback_env"))?;

            for (value, name) in [
                (command.timeout, "timeout"),
                (command.check_timeout, "check_timeout"),
                (command.rollback_timeout, "rollback_timeout"),
            ] {
                if let Some(value) = value {
                    validate_positive_timeout(value, &field(name))?;
                }
            }
        }

        Ok(())
    }
}
