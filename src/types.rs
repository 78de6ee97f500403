use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Application error: {0}")]
    Application(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Config file parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Connection errors. Cloneable because a failed dial is stored on the
/// connection and handed back to every later caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {message}")]
    Dial { address: String, message: String },

    #[error("Credential error: {message}")]
    Credential { message: String },

    #[error("Could not start session: {message}")]
    Spawn { message: String },

    #[error("Connection is closed")]
    Closed,
}

/// Execution-related errors raised by a single session run
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{command}' failed with exit code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Command '{command}' was terminated by a signal")]
    Terminated { command: String },

    #[error("Command '{command}' could not be started: {source}")]
    StartFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session unavailable: {0}")]
    Session(#[from] ConnectionError),

    #[error("Invalid environment variable name '{name}'")]
    InvalidEnvironment { name: String },

    #[error("Failed to capture output of '{command}': {source}")]
    Output {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{name}' cannot enter {phase} from status {from}")]
    InvalidTransition {
        name: String,
        phase: Phase,
        from: CommandStatus,
    },
}

/// Batch-level errors returned by the orchestrator
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch contains no commands")]
    EmptyBatch,

    #[error("Command #{index} '{name}' has no rollback action, required by the 'all' rollback policy")]
    MissingRollbackAction { index: usize, name: String },

    #[error("Command #{index} '{name}' was already executed (status {status})")]
    AlreadyExecuted {
        index: usize,
        name: String,
        status: CommandStatus,
    },

    #[error("Connection unavailable: {0}")]
    Connection(ConnectionError),

    #[error("Connection is already running another batch")]
    ConnectionBusy,

    #[error("Command #{index} '{name}' has an empty action{}", summarize_rollbacks(.rollbacks))]
    EmptyCommand {
        index: usize,
        name: String,
        rollbacks: Vec<RollbackOutcome>,
    },

    #[error("Command #{index} '{name}' ended with status {status}{}", summarize_rollbacks(.rollbacks))]
    BatchFailed {
        index: usize,
        name: String,
        status: CommandStatus,
        rollbacks: Vec<RollbackOutcome>,
    },
}

impl BatchError {
    /// Index of the command that stopped the batch, if any command ran
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            BatchError::EmptyCommand { index, .. } | BatchError::BatchFailed { index, .. } => {
                Some(*index)
            }
            BatchError::MissingRollbackAction { index, .. }
            | BatchError::AlreadyExecuted { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Rollback outcomes of the unwind pass, empty when no unwind ran
    pub fn rollbacks(&self) -> &[RollbackOutcome] {
        match self {
            BatchError::EmptyCommand { rollbacks, .. }
            | BatchError::BatchFailed { rollbacks, .. } => rollbacks,
            _ => &[],
        }
    }
}

fn summarize_rollbacks(rollbacks: &[RollbackOutcome]) -> String {
    if rollbacks.is_empty() {
        return String::new();
    }

    let failed = rollbacks
        .iter()
        .filter(|r| r.status == CommandStatus::RollbackFailed)
        .count();
    let order = rollbacks
        .iter()
        .map(|r| format!("#{}={}", r.index, r.status))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "; {} rollback(s), {} succeeded, {} failed [{}]",
        rollbacks.len(),
        rollbacks.len() - failed,
        failed,
        order
    )
}

/// Type alias for Results
pub type Result<T> = std::result::Result<T, Error>;

/// Execution status of a single command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Not executed yet
    #[default]
    Init,
    /// Primary action exited 0 within its timeout
    Success,
    /// Primary action failed, timed out or could not be dispatched
    Failed,
    /// Check output matched the expected result
    CheckSuccess,
    /// Check output did not match, or the check itself failed
    CheckFailed,
    /// Rollback action exited 0
    RollbackSuccess,
    /// Rollback action failed
    RollbackFailed,
}

impl CommandStatus {
    /// Human-readable status name
    pub fn name(&self) -> &'static str {
        match self {
            CommandStatus::Init => "init",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::CheckSuccess => "check success",
            CommandStatus::CheckFailed => "check failed",
            CommandStatus::RollbackSuccess => "rollback success",
            CommandStatus::RollbackFailed => "rollback failed",
        }
    }

    /// Whether the command counts as applied and verified
    pub fn is_passed(&self) -> bool {
        matches!(self, CommandStatus::Success | CommandStatus::CheckSuccess)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution phase of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Primary,
    Check,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Primary => "primary",
            Phase::Check => "check",
            Phase::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Captured result of one executed phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseRecord {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub started_at: i64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub timed_out: bool,
}

impl PhaseRecord {
    /// Whether the phase exited 0 without error
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// Result of rolling back one command during an unwind pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    pub index: usize,
    pub name: String,
    pub status: CommandStatus,
}
