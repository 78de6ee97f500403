//! Rollback policies and the unwind decision table

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::command::Command;

/// How much of a batch to unwind after a command fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// Never run a rollback action
    #[default]
    None,
    /// Roll back only the command that failed
    One,
    /// Walk back from the failed command until one without a rollback action
    #[serde(alias = "backtrace")]
    #[value(alias = "backtrace")]
    BackTrace,
    /// Every command must define a rollback; unwind the whole applied prefix
    All,
}

impl RollbackPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            RollbackPolicy::None => "none",
            RollbackPolicy::One => "one",
            RollbackPolicy::BackTrace => "back-trace",
            RollbackPolicy::All => "all",
        }
    }

    /// Whether every command in the batch must carry a rollback action
    pub fn requires_rollback_actions(&self) -> bool {
        matches!(self, RollbackPolicy::All)
    }

    /// Indices to roll back, in execution order, after `failed` did not pass.
    ///
    /// Every command before `failed` is assumed applied: the orchestrator
    /// stops at the first failure, so the succeeded frontier is `failed - 1`.
    pub fn unwind_plan(&self, commands: &[Command], failed: usize) -> Vec<usize> {
        if failed >= commands.len() {
            return Vec::new();
        }

        match self {
            RollbackPolicy::None => Vec::new(),
            RollbackPolicy::One => {
                if commands[failed].has_rollback() {
                    vec![failed]
                } else {
                    Vec::new()
                }
            }
            RollbackPolicy::BackTrace => (0..=failed)
                .rev()
                .take_while(|&idx| commands[idx].has_rollback())
                .collect(),
            RollbackPolicy::All => (0..=failed).rev().collect(),
        }
    }
}

impl fmt::Display for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
