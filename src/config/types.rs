use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::policy::RollbackPolicy;
use crate::types::{ConfigError, Result};

/// System configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// How the ssh client binary is driven
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_server_alive_interval")]
    pub server_alive_interval: u64,
    #[serde(default = "default_server_alive_count_max")]
    pub server_alive_count_max: u32,
    #[serde(default = "default_strict_host_key_checking")]
    pub strict_host_key_checking: String,
    pub known_hosts_file: Option<String>,
    #[serde(default = "default_local_shortcut")]
    pub local_shortcut: bool,
    /// Extra `-o Key=Value` options passed to every ssh invocation
    #[serde(default)]
    pub extra_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default)]
    pub rollback_policy: RollbackPolicy,
}

/// Batch file: target host plus the ordered commands to run on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    pub policy: Option<RollbackPolicy>,
    pub target: TargetConfig,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// `host` or `host:port`
    pub address: String,
    pub user: String,
    pub identity_file: Option<String>,
    /// Name of the environment variable holding the password
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub check: String,
    #[serde(default)]
    pub check_env: HashMap<String, String>,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub rollback: String,
    #[serde(default)]
    pub rollback_env: HashMap<String, String>,
    pub timeout: Option<u64>,
    pub check_timeout: Option<u64>,
    pub rollback_timeout: Option<u64>,
}

impl SystemConfig {
    /// Load system configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::FileNotFound { path: path_str })?;

        let config: SystemConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }
}

impl BatchFile {
    /// Load a batch file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::FileNotFound { path: path_str })?;

        let batch: BatchFile = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(batch)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            port: default_ssh_port(),
            connect_timeout: default_connect_timeout(),
            server_alive_interval: default_server_alive_interval(),
            server_alive_count_max: default_server_alive_count_max(),
            strict_host_key_checking: default_strict_host_key_checking(),
            known_hosts_file: None,
            local_shortcut: default_local_shortcut(),
            extra_options: Vec::new(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            rollback_policy: RollbackPolicy::default(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_server_alive_interval() -> u64 {
    15
}

fn default_server_alive_count_max() -> u32 {
    3
}

fn default_strict_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_local_shortcut() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    300
}
