//! Unwind pass run after a command in the batch did not pass
//!
//! Rollback actions run in plan order (reverse execution order). A failing
//! rollback is recorded and the walk moves on to the next index.

use tracing::{error, info, warn};

use crate::command::Command;
use crate::execution::PhaseExecutor;
use crate::types::{CommandStatus, Phase, RollbackOutcome};

/// Execute the rollback action of every command in `plan`
pub(crate) async fn execute_unwind(
    executor: &PhaseExecutor<'_>,
    commands: &mut [Command],
    plan: &[usize],
) -> Vec<RollbackOutcome> {
    if plan.is_empty() {
        info!("No rollback actions to run");
        return Vec::new();
    }

    info!(plan = ?plan, "Starting rollback");

    let mut outcomes = Vec::with_capacity(plan.len());
    for &index in plan {
        let command = &mut commands[index];

        info!(
            index = index,
            command = %command.name(),
            "Rolling back command"
        );

        let record = executor.execute(command, Phase::Rollback).await;
        let status = match command.record_rollback(record) {
            Ok(status) => status,
            Err(e) => {
                // unreachable while validate_batch only admits Init commands
                error!(
                    index = index,
                    command = %command.name(),
                    error = %e,
                    "Rollback could not be recorded"
                );
                CommandStatus::RollbackFailed
            }
        };

        if status == CommandStatus::RollbackSuccess {
            info!(index = index, command = %command.name(), "Rollback succeeded");
        } else {
            warn!(
                index = index,
                command = %command.name(),
                "Rollback failed, continuing with remaining commands"
            );
        }

        outcomes.push(RollbackOutcome {
            index,
            name: command.name().to_string(),
            status,
        });
    }

    let failed = outcomes
        .iter()
        .filter(|o| o.status != CommandStatus::RollbackSuccess)
        .count();
    info!(
        rolled_back = outcomes.len() - failed,
        failed = failed,
        "Rollback finished"
    );

    outcomes
}
