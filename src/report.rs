//! Per-command report printed by the `run` subcommand

use serde::Serialize;
use std::fmt::Write as _;

use crate::command::Command;
use crate::policy::RollbackPolicy;
use crate::types::{BatchError, CommandStatus, Phase, PhaseRecord, Result, RollbackOutcome};

/// Outcome of one batch run, ready to render
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub target: String,
    pub policy: RollbackPolicy,
    pub success: bool,
    pub error: Option<String>,
    pub failed_index: Option<usize>,
    pub rollbacks: Vec<RollbackOutcome>,
    pub commands: Vec<CommandReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub index: usize,
    pub name: String,
    pub status: CommandStatus,
    pub primary: Option<PhaseReport>,
    pub check: Option<PhaseReport>,
    pub rollback: Option<PhaseReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub exit_code: Option<i32>,
    pub started_at: i64,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl From<&PhaseRecord> for PhaseReport {
    fn from(record: &PhaseRecord) -> Self {
        Self {
            exit_code: record.exit_code,
            started_at: record.started_at,
            duration_ms: record.duration_ms,
            timed_out: record.timed_out,
            stdout: String::from_utf8_lossy(&record.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&record.stderr).into_owned(),
            error: record.error.clone(),
        }
    }
}

impl BatchReport {
    pub fn new(
        batch_id: &str,
        target: &str,
        policy: RollbackPolicy,
        commands: &[Command],
        outcome: &std::result::Result<(), BatchError>,
    ) -> Self {
        let (error, failed_index, rollbacks) = match outcome {
            Ok(()) => (None, None, Vec::new()),
            Err(e) => (Some(e.to_string()), e.failed_index(), e.rollbacks().to_vec()),
        };

        let commands = commands
            .iter()
            .enumerate()
            .map(|(index, command)| CommandReport {
                index,
                name: command.name().to_string(),
                status: command.status(),
                primary: command.record(Phase::Primary).map(PhaseReport::from),
                check: command.record(Phase::Check).map(PhaseReport::from),
                rollback: command.record(Phase::Rollback).map(PhaseReport::from),
            })
            .collect();

        Self {
            batch_id: batch_id.to_string(),
            target: target.to_string(),
            policy,
            success: outcome.is_ok(),
            error,
            failed_index,
            rollbacks,
            commands,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            crate::types::Error::Application(format!("Failed to serialize report: {}", e))
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Batch {} on {} (policy: {})",
            self.batch_id, self.target, self.policy
        );

        for command in &self.commands {
            let _ = writeln!(
                out,
                "\n[{}] {}: {}",
                command.index, command.name, command.status
            );
            for (label, phase) in [
                ("action", &command.primary),
                ("check", &command.check),
                ("rollback", &command.rollback),
            ] {
                if let Some(phase) = phase {
                    write_phase(&mut out, label, phase);
                }
            }
        }

        out.push('\n');
        match &self.error {
            None => out.push_str("Result: success\n"),
            Some(error) => {
                let _ = writeln!(out, "Result: failed: {}", error);
            }
        }
        out
    }
}

fn write_phase(out: &mut String, label: &str, phase: &PhaseReport) {
    let exit = phase
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());
    let _ = write!(out, "  {}: exit {} in {}ms", label, exit, phase.duration_ms);
    if phase.timed_out {
        out.push_str(" (timed out)");
    }
    out.push('\n');

    for (stream, content) in [("stdout", &phase.stdout), ("stderr", &phase.stderr)] {
        if content.is_empty() {
            continue;
        }
        let _ = writeln!(out, "    {}:", stream);
        for line in content.lines() {
            let _ = writeln!(out, "      {}", line);
        }
    }

    // exit failures are already visible from the exit code
    if let Some(error) = &phase.error {
        if phase.exit_code.is_none() {
            let _ = writeln!(out, "    error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(stdout: &[u8], exit_code: Option<i32>) -> PhaseRecord {
        PhaseRecord {
            stdout: stdout.to_vec(),
            exit_code,
            duration_ms: 12,
            started_at: 1_700_000_000,
            ..PhaseRecord::default()
        }
    }

    fn failed_batch() -> (Vec<Command>, std::result::Result<(), BatchError>) {
        let mut first = Command::simple("install", "make install", Duration::from_secs(1))
            .with_rollback("make uninstall");
        first.record_primary(record(b"installed\n", Some(0))).unwrap();

        let mut second = Command::simple("migrate", "migrate up", Duration::from_secs(1))
            .with_check("migrate status", "ok\n");
        second.record_primary(record(b"", Some(0))).unwrap();
        second
            .record_check(PhaseRecord {
                stderr: b"pending\n".to_vec(),
                ..record(b"dirty\n", Some(0))
            })
            .unwrap();

        let outcome = Err(BatchError::BatchFailed {
            index: 1,
            name: "migrate".to_string(),
            status: CommandStatus::CheckFailed,
            rollbacks: Vec::new(),
        });
        (vec![first, second], outcome)
    }

    #[test]
    fn test_report_from_failed_batch() {
        let (commands, outcome) = failed_batch();
        let report = BatchReport::new("batch-1", "ssh deploy@h:22", RollbackPolicy::One, &commands, &outcome);

        assert!(!report.success);
        assert_eq!(report.failed_index, Some(1));
        assert_eq!(report.commands.len(), 2);
        assert_eq!(report.commands[0].status, CommandStatus::Success);
        assert!(report.commands[0].check.is_none());
        assert_eq!(
            report.commands[1].check.as_ref().map(|c| c.stdout.as_str()),
            Some("dirty\n")
        );
    }

    #[test]
    fn test_text_report() {
        let (commands, outcome) = failed_batch();
        let text = BatchReport::new("batch-1", "local", RollbackPolicy::One, &commands, &outcome).to_text();

        assert!(text.starts_with("Batch batch-1 on local (policy: one)"));
        assert!(text.contains("[0] install: success"));
        assert!(text.contains("[1] migrate: check failed"));
        assert!(text.contains("  check: exit 0 in 12ms"));
        assert!(text.contains("      pending"));
        assert!(text.contains("Result: failed: Command #1 'migrate' ended with status check failed"));
    }

    #[test]
    fn test_json_report() {
        let (commands, outcome) = failed_batch();
        let json = BatchReport::new("batch-1", "local", RollbackPolicy::BackTrace, &commands, &outcome)
            .to_json()
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["policy"], "back-trace");
        assert_eq!(value["success"], false);
        assert_eq!(value["failed_index"], 1);
        assert_eq!(value["commands"][1]["status"], "check_failed");
        assert_eq!(value["commands"][0]["primary"]["stdout"], "installed\n");
        assert!(value["commands"][0]["rollback"].is_null());
    }

    #[test]
    fn test_successful_report() {
        let mut command = Command::simple("noop", "true", Duration::from_secs(1));
        command.record_primary(record(b"", Some(0))).unwrap();

        let report = BatchReport::new("b", "local", RollbackPolicy::None, &[command], &Ok(()));
        assert!(report.success);
        assert!(report.error.is_none());
        assert!(report.to_text().ends_with("Result: success\n"));
    }
}
