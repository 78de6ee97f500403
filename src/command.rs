//! Command: one unit of work in a batch
//!
//! A command carries a primary action, an optional check action with its
//! expected output, and an optional rollback action, each with its own
//! environment. Execution state (status plus captured output per phase) is
//! only ever written through the `record_*` transitions below, so a check
//! cannot be recorded before the primary succeeded and a rollback cannot be
//! recorded twice.

use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::types::{CommandStatus, ExecutionError, Phase, PhaseRecord};

pub struct Command {
    name: String,
    action: String,
    check_action: String,
    expected_result: String,
    rollback_action: String,
    environment: Mutex<HashMap<String, String>>,
    check_environment: Mutex<HashMap<String, String>>,
    rollback_environment: Mutex<HashMap<String, String>>,
    timeout: Duration,
    check_timeout: Option<Duration>,
    rollback_timeout: Option<Duration>,
    status: CommandStatus,
    primary: Option<PhaseRecord>,
    check: Option<PhaseRecord>,
    rollback: Option<PhaseRecord>,
}

impl Command {
    /// Build a fully specified command. Empty `check_action` or
    /// `rollback_action` means the phase is not defined.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        action: impl Into<String>,
        check_action: impl Into<String>,
        rollback_action: impl Into<String>,
        expected_result: impl Into<String>,
        environment: HashMap<String, String>,
        check_environment: HashMap<String, String>,
        rollback_environment: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            check_action: check_action.into(),
            expected_result: expected_result.into(),
            rollback_action: rollback_action.into(),
            environment: Mutex::new(environment),
            check_environment: Mutex::new(check_environment),
            rollback_environment: Mutex::new(rollback_environment),
            timeout,
            check_timeout: None,
            rollback_timeout: None,
            status: CommandStatus::Init,
            primary: None,
            check: None,
            rollback: None,
        }
    }

    /// Command with only a primary action
    pub fn simple(name: impl Into<String>, action: impl Into<String>, timeout: Duration) -> Self {
        Self::new(
            name,
            action,
            "",
            "",
            "",
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            timeout,
        )
    }

    pub fn with_check(mut self, check_action: impl Into<String>, expected: impl Into<String>) -> Self {
        self.check_action = check_action.into();
        self.expected_result = expected.into();
        self
    }

    pub fn with_rollback(mut self, rollback_action: impl Into<String>) -> Self {
        self.rollback_action = rollback_action.into();
        self
    }

    pub fn with_env(self, env: HashMap<String, String>) -> Self {
        self.extend_environment(Phase::Primary, env);
        self
    }

    pub fn with_check_env(self, env: HashMap<String, String>) -> Self {
        self.extend_environment(Phase::Check, env);
        self
    }

    pub fn with_rollback_env(self, env: HashMap<String, String>) -> Self {
        self.extend_environment(Phase::Rollback, env);
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = Some(timeout);
        self
    }

    /// Merge `additions` into the environment of `phase`, last writer wins.
    pub fn extend_environment<I>(&self, phase: Phase, additions: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env_lock(phase).lock().extend(additions);
    }

    /// Copy of the environment used by `phase`
    pub fn environment(&self, phase: Phase) -> HashMap<String, String> {
        self.env_lock(phase).lock().clone()
    }

    fn env_lock(&self, phase: Phase) -> &Mutex<HashMap<String, String>> {
        match phase {
            Phase::Primary => &self.environment,
            Phase::Check => &self.check_environment,
            Phase::Rollback => &self.rollback_environment,
        }
    }

    /// Command string run for `phase`
    pub fn action(&self, phase: Phase) -> &str {
        match phase {
            Phase::Primary => &self.action,
            Phase::Check => &self.check_action,
            Phase::Rollback => &self.rollback_action,
        }
    }

    /// Timeout applied to `phase`; check and rollback inherit the primary one
    pub fn timeout(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Primary => self.timeout,
            Phase::Check => self.check_timeout.unwrap_or(self.timeout),
            Phase::Rollback => self.rollback_timeout.unwrap_or(self.timeout),
        }
    }

    pub fn expected_result(&self) -> &str {
        &self.expected_result
    }

    pub fn has_check(&self) -> bool {
        !self.check_action.is_empty()
    }

    pub fn has_rollback(&self) -> bool {
        !self.rollback_action.is_empty()
    }

    /// True iff the primary succeeded and a check is defined
    pub fn needs_check(&self) -> bool {
        self.status == CommandStatus::Success && self.has_check()
    }

    /// True iff a rollback is defined and the command did not pass.
    /// How far the batch unwinds is decided by the rollback policy.
    pub fn needs_rollback(&self, check_passed: bool) -> bool {
        self.has_rollback() && !check_passed
    }

    /// Success without a check, or a passed check
    pub fn check_passed(&self) -> bool {
        match self.status {
            CommandStatus::Success => !self.has_check(),
            CommandStatus::CheckSuccess => true,
            _ => false,
        }
    }

    /// `Init -> Success | Failed`
    pub fn record_primary(&mut self, record: PhaseRecord) -> Result<CommandStatus, ExecutionError> {
        if self.status != CommandStatus::Init {
            return Err(self.invalid_transition(Phase::Primary));
        }

        self.status = if record.succeeded() {
            CommandStatus::Success
        } else {
            CommandStatus::Failed
        };
        self.primary = Some(record);
        Ok(self.status)
    }

    /// `Success -> CheckSuccess | CheckFailed`. The check passes only when it
    /// exited 0 and its stdout equals the expected result byte for byte.
    pub fn record_check(&mut self, record: PhaseRecord) -> Result<CommandStatus, ExecutionError> {
        if !self.needs_check() {
            return Err(self.invalid_transition(Phase::Check));
        }

        self.status = if record.succeeded() && record.stdout == self.expected_result.as_bytes() {
            CommandStatus::CheckSuccess
        } else {
            CommandStatus::CheckFailed
        };
        self.check = Some(record);
        Ok(self.status)
    }

    /// `{Failed, CheckFailed} -> RollbackSuccess | RollbackFailed` for the
    /// failing command, `{Success, CheckSuccess} -> ...` when an unwind
    /// reverts an earlier command.
    pub fn record_rollback(&mut self, record: PhaseRecord) -> Result<CommandStatus, ExecutionError> {
        let from_allowed = matches!(
            self.status,
            CommandStatus::Failed
                | CommandStatus::CheckFailed
                | CommandStatus::Success
                | CommandStatus::CheckSuccess
        );
        if !from_allowed || !self.has_rollback() {
            return Err(self.invalid_transition(Phase::Rollback));
        }

        self.status = if record.succeeded() {
            CommandStatus::RollbackSuccess
        } else {
            CommandStatus::RollbackFailed
        };
        self.rollback = Some(record);
        Ok(self.status)
    }

    fn invalid_transition(&self, phase: Phase) -> ExecutionError {
        ExecutionError::InvalidTransition {
            name: self.name.clone(),
            phase,
            from: self.status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn status_name(&self) -> &'static str {
        self.status.name()
    }

    pub fn primary_record(&self) -> Option<&PhaseRecord> {
        self.primary.as_ref()
    }

    pub fn check_record(&self) -> Option<&PhaseRecord> {
        self.check.as_ref()
    }

    pub fn rollback_record(&self) -> Option<&PhaseRecord> {
        self.rollback.as_ref()
    }

    pub fn record(&self, phase: Phase) -> Option<&PhaseRecord> {
        match phase {
            Phase::Primary => self.primary_record(),
            Phase::Check => self.check_record(),
            Phase::Rollback => self.rollback_record(),
        }
    }

    pub fn output(&self) -> Cow<'_, str> {
        stdout_of(self.primary.as_ref())
    }

    pub fn err_output(&self) -> Cow<'_, str> {
        stderr_of(self.primary.as_ref())
    }

    pub fn check_output(&self) -> Cow<'_, str> {
        stdout_of(self.check.as_ref())
    }

    pub fn check_err_output(&self) -> Cow<'_, str> {
        stderr_of(self.check.as_ref())
    }

    pub fn rollback_output(&self) -> Cow<'_, str> {
        stdout_of(self.rollback.as_ref())
    }

    pub fn rollback_err_output(&self) -> Cow<'_, str> {
        stderr_of(self.rollback.as_ref())
    }
}

fn stdout_of(record: Option<&PhaseRecord>) -> Cow<'_, str> {
    match record {
        Some(record) => String::from_utf8_lossy(&record.stdout),
        None => Cow::Borrowed(""),
    }
}

fn stderr_of(record: Option<&PhaseRecord>) -> Cow<'_, str> {
    match record {
        Some(record) => String::from_utf8_lossy(&record.stderr),
        None => Cow::Borrowed(""),
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("check_action", &self.check_action)
            .field("rollback_action", &self.rollback_action)
            .field("timeout", &self.timeout)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_record(stdout: &str) -> PhaseRecord {
        PhaseRecord {
            stdout: stdout.as_bytes().to_vec(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    fn failed_record(code: i32) -> PhaseRecord {
        PhaseRecord {
            exit_code: Some(code),
            error: Some(format!("exit code {}", code)),
            ..Default::default()
        }
    }

    fn full_command() -> Command {
        Command::simple("deploy", "deploy.sh", Duration::from_secs(5))
            .with_check("cat /tmp/state", "ok")
            .with_rollback("undo.sh")
    }

    #[test]
    fn test_new_command_starts_at_init() {
        let cmd = full_command();
        assert_eq!(cmd.status(), CommandStatus::Init);
        assert_eq!(cmd.status_name(), "init");
        assert_eq!(cmd.output(), "");
        assert!(cmd.primary_record().is_none());
        assert!(!cmd.needs_check());
    }

    #[test]
    fn test_primary_success_then_check_success() {
        let mut cmd = full_command();

        assert_eq!(cmd.record_primary(ok_record("done\n")).unwrap(), CommandStatus::Success);
        assert!(cmd.needs_check());
        assert!(!cmd.check_passed());

        assert_eq!(cmd.record_check(ok_record("ok")).unwrap(), CommandStatus::CheckSuccess);
        assert!(cmd.check_passed());
        assert!(!cmd.needs_rollback(cmd.check_passed()));
        assert_eq!(cmd.output(), "done\n");
        assert_eq!(cmd.check_output(), "ok");
    }

    #[test]
    fn test_check_is_exact_match() {
        let mut cmd = full_command();
        cmd.record_primary(ok_record("")).unwrap();

        // trailing newline is significant
        assert_eq!(cmd.record_check(ok_record("ok\n")).unwrap(), CommandStatus::CheckFailed);
        assert!(cmd.needs_rollback(cmd.check_passed()));
    }

    #[test]
    fn test_check_error_fails_even_when_output_matches() {
        let mut cmd = full_command();
        cmd.record_primary(ok_record("")).unwrap();

        let mut record = failed_record(1);
        record.stdout = b"ok".to_vec();
        assert_eq!(cmd.record_check(record).unwrap(), CommandStatus::CheckFailed);
    }

    #[test]
    fn test_check_before_primary_is_rejected() {
        let mut cmd = full_command();

        match cmd.record_check(ok_record("ok")) {
            Err(ExecutionError::InvalidTransition { phase, from, .. }) => {
                assert_eq!(phase, Phase::Check);
                assert_eq!(from, CommandStatus::Init);
            }
            other => panic!("Expected InvalidTransition, got: {:?}", other),
        }
        assert_eq!(cmd.status(), CommandStatus::Init);
    }

    #[test]
    fn test_primary_cannot_run_twice() {
        let mut cmd = full_command();
        cmd.record_primary(failed_record(2)).unwrap();
        assert!(cmd.record_primary(ok_record("")).is_err());
        assert_eq!(cmd.status(), CommandStatus::Failed);
    }

    #[test]
    fn test_failed_primary_rolls_back() {
        let mut cmd = full_command();
        assert_eq!(cmd.record_primary(failed_record(1)).unwrap(), CommandStatus::Failed);
        assert!(!cmd.needs_check());
        assert!(cmd.needs_rollback(cmd.check_passed()));

        assert_eq!(
            cmd.record_rollback(ok_record("reverted")).unwrap(),
            CommandStatus::RollbackSuccess
        );
        assert_eq!(cmd.rollback_output(), "reverted");

        // terminal
        assert!(cmd.record_rollback(ok_record("")).is_err());
    }

    #[test]
    fn test_rollback_failure_is_recorded() {
        let mut cmd = full_command();
        cmd.record_primary(failed_record(1)).unwrap();

        let mut record = failed_record(7);
        record.stderr = b"cannot undo".to_vec();
        assert_eq!(cmd.record_rollback(record).unwrap(), CommandStatus::RollbackFailed);
        assert_eq!(cmd.rollback_err_output(), "cannot undo");
    }

    #[test]
    fn test_no_rollback_defined_is_terminal() {
        let mut cmd = Command::simple("plain", "false", Duration::from_secs(1));
        cmd.record_primary(failed_record(1)).unwrap();

        assert!(!cmd.needs_rollback(false));
        assert!(cmd.record_rollback(ok_record("")).is_err());
        assert_eq!(cmd.status(), CommandStatus::Failed);
    }

    #[test]
    fn test_success_without_check_is_terminal() {
        let mut cmd = Command::simple("plain", "true", Duration::from_secs(1));
        cmd.record_primary(ok_record("")).unwrap();

        assert!(!cmd.needs_check());
        assert!(cmd.check_passed());
        assert!(cmd.record_check(ok_record("")).is_err());
    }

    #[test]
    fn test_extend_environment_last_writer_wins() {
        let mut initial = HashMap::new();
        initial.insert("A".to_string(), "1".to_string());
        initial.insert("B".to_string(), "2".to_string());
        let cmd = Command::simple("env", "env", Duration::from_secs(1)).with_env(initial);

        cmd.extend_environment(
            Phase::Primary,
            [("B".to_string(), "3".to_string()), ("C".to_string(), "4".to_string())],
        );
        cmd.extend_environment(Phase::Check, [("X".to_string(), "y".to_string())]);

        let env = cmd.environment(Phase::Primary);
        assert_eq!(env.len(), 3);
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "3");
        assert_eq!(env["C"], "4");
        assert_eq!(cmd.environment(Phase::Check)["X"], "y");
        assert!(cmd.environment(Phase::Rollback).is_empty());
    }

    #[test]
    fn test_extend_environment_from_threads() {
        let cmd = Command::simple("env", "env", Duration::from_secs(1));

        std::thread::scope(|scope| {
            for t in 0..4 {
                let cmd = &cmd;
                scope.spawn(move || {
                    for i in 0..50 {
                        cmd.extend_environment(
                            Phase::Primary,
                            [(format!("T{}_{}", t, i), i.to_string())],
                        );
                    }
                });
            }
        });

        assert_eq!(cmd.environment(Phase::Primary).len(), 200);
    }

    #[test]
    fn test_phase_timeouts_default_to_primary() {
        let cmd = full_command();
        assert_eq!(cmd.timeout(Phase::Check), Duration::from_secs(5));
        assert_eq!(cmd.timeout(Phase::Rollback), Duration::from_secs(5));

        let cmd = cmd
            .with_check_timeout(Duration::from_secs(1))
            .with_rollback_timeout(Duration::from_secs(60));
        assert_eq!(cmd.timeout(Phase::Primary), Duration::from_secs(5));
        assert_eq!(cmd.timeout(Phase::Check), Duration::from_secs(1));
        assert_eq!(cmd.timeout(Phase::Rollback), Duration::from_secs(60));
    }

    #[test]
    fn test_accessors_are_stable() {
        let mut cmd = full_command();
        cmd.record_primary(ok_record("same")).unwrap();

        let first = (cmd.status(), cmd.output().into_owned());
        let second = (cmd.status(), cmd.output().into_owned());
        assert_eq!(first, second);
    }
}
