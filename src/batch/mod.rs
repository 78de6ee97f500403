//! Batch orchestration
//!
//! Drives an ordered slice of [`Command`]s through one [`Connection`]:
//! primary action, optional check, and on the first command that does not
//! pass, the unwind plan chosen by the [`RollbackPolicy`]. Commands are
//! mutated in place so the caller can inspect every phase afterwards.

mod unwind;

use tracing::{debug, error, info, warn, Instrument};

use crate::command::Command;
use crate::execution::PhaseExecutor;
use crate::logging;
use crate::policy::RollbackPolicy;
use crate::transport::Connection;
use crate::types::{BatchError, CommandStatus, Phase, PhaseRecord};

use self::unwind::execute_unwind;

/// Check the batch against the policy without touching the connection
pub fn validate_batch(commands: &[Command], policy: RollbackPolicy) -> Result<(), BatchError> {
    if commands.is_empty() {
        return Err(BatchError::EmptyBatch);
    }

    if let Some((index, command)) = commands
        .iter()
        .enumerate()
        .find(|(_, command)| command.status() != CommandStatus::Init)
    {
        return Err(BatchError::AlreadyExecuted {
            index,
            name: command.name().to_string(),
            status: command.status(),
        });
    }

    if policy.requires_rollback_actions() {
        if let Some((index, command)) = commands
            .iter()
            .enumerate()
            .find(|(_, command)| !command.has_rollback())
        {
            return Err(BatchError::MissingRollbackAction {
                index,
                name: command.name().to_string(),
            });
        }
    }

    Ok(())
}

/// Run `commands` on `connection` under `policy`
pub async fn run_batch(
    commands: &mut [Command],
    policy: RollbackPolicy,
    connection: &Connection,
) -> Result<(), BatchError> {
    BatchRunner::new(connection, policy).run(commands).await
}

/// Reusable orchestrator bound to one connection and policy
#[derive(Debug)]
pub struct BatchRunner<'a> {
    connection: &'a Connection,
    policy: RollbackPolicy,
    batch_id: String,
}

/// Why forward processing stopped
enum Stop {
    EmptyAction,
    Failed(CommandStatus),
}

impl<'a> BatchRunner<'a> {
    pub fn new(connection: &'a Connection, policy: RollbackPolicy) -> Self {
        Self {
            connection,
            policy,
            batch_id: generate_batch_id(),
        }
    }

    /// Override the generated batch id used in log spans
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    /// Run the batch. `Ok(())` only when every command passed; otherwise the
    /// error names the command that stopped the batch and what was unwound.
    pub async fn run(&self, commands: &mut [Command]) -> Result<(), BatchError> {
        validate_batch(commands, self.policy)?;

        if let Some(e) = self.connection.err() {
            error!(
                address = %self.connection.address(),
                error = %e,
                "Refusing to run batch on failed connection"
            );
            return Err(BatchError::Connection(e.clone()));
        }

        let _guard = self
            .connection
            .try_begin_batch()
            .ok_or(BatchError::ConnectionBusy)?;

        let span = logging::batch_span(&self.batch_id);
        self.run_commands(commands).instrument(span).await
    }

    async fn run_commands(&self, commands: &mut [Command]) -> Result<(), BatchError> {
        info!(
            target_host = %self.connection.describe(),
            policy = %self.policy,
            command_count = commands.len(),
            "Starting batch"
        );

        let executor = PhaseExecutor::new(self.connection);

        for index in 0..commands.len() {
            let span = logging::command_span(&self.batch_id, index, commands[index].name());
            let stop = self
                .run_command(&executor, &mut commands[index], index)
                .instrument(span)
                .await;

            let Some(stop) = stop else {
                continue;
            };

            let name = commands[index].name().to_string();
            let plan = self.policy.unwind_plan(commands, index);
            debug!(index = index, plan = ?plan, policy = %self.policy, "Computed unwind plan");

            let rollbacks = execute_unwind(&executor, commands, &plan).await;

            return Err(match stop {
                Stop::EmptyAction => BatchError::EmptyCommand {
                    index,
                    name,
                    rollbacks,
                },
                Stop::Failed(status) => BatchError::BatchFailed {
                    index,
                    name,
                    status,
                    rollbacks,
                },
            });
        }

        info!(command_count = commands.len(), "Batch completed successfully");
        Ok(())
    }

    /// Primary and check phases of one command; `None` when it passed
    async fn run_command(
        &self,
        executor: &PhaseExecutor<'_>,
        command: &mut Command,
        index: usize,
    ) -> Option<Stop> {
        if command.action(Phase::Primary).is_empty() {
            warn!(index = index, command = %command.name(), "Command has an empty action");
            let record = PhaseRecord {
                started_at: chrono::Utc::now().timestamp(),
                error: Some("empty action".to_string()),
                ..PhaseRecord::default()
            };
            record_phase(command, Phase::Primary, record);
            return Some(Stop::EmptyAction);
        }

        info!(index = index, command = %command.name(), "Running command");

        let record = executor.execute(command, Phase::Primary).await;
        let exit_code = record.exit_code;
        let duration_ms = record.duration_ms;
        let status = record_phase(command, Phase::Primary, record);

        if status != CommandStatus::Success {
            error!(
                index = index,
                command = %command.name(),
                exit_code = ?exit_code,
                duration_ms = duration_ms,
                "Command failed"
            );
            return Some(Stop::Failed(status));
        }

        if command.needs_check() {
            let record = executor.execute(command, Phase::Check).await;
            let exit_code = record.exit_code;
            let status = record_phase(command, Phase::Check, record);

            if status != CommandStatus::CheckSuccess {
                error!(
                    index = index,
                    command = %command.name(),
                    exit_code = ?exit_code,
                    expected = ?command.expected_result(),
                    actual = ?command.check_output(),
                    "Check did not match expected result"
                );
                return Some(Stop::Failed(status));
            }
        }

        if !command.check_passed() {
            return Some(Stop::Failed(command.status()));
        }

        info!(
            index = index,
            command = %command.name(),
            status = %command.status(),
            duration_ms = duration_ms,
            "Command passed"
        );
        None
    }
}

/// Record a phase result; a rejected transition leaves the status as it was
fn record_phase(command: &mut Command, phase: Phase, record: PhaseRecord) -> CommandStatus {
    let result = match phase {
        Phase::Primary => command.record_primary(record),
        Phase::Check => command.record_check(record),
        Phase::Rollback => command.record_rollback(record),
    };

    match result {
        Ok(status) => status,
        Err(e) => {
            error!(command = %command.name(), phase = %phase, error = %e, "Phase result rejected");
            command.status()
        }
    }
}

/// Generate a batch id for log correlation
pub fn generate_batch_id() -> String {
    let now = chrono::Utc::now();
    format!(
        "batch-{}-{:03}",
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_millis()
    )
}
