//! rollshot: run an ordered batch of shell commands on one host, verify each
//! one with an optional check and unwind prior work on failure according to
//! a [`RollbackPolicy`].
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rollshot::{run_batch, Command, Connection, RollbackPolicy};
//!
//! # async fn demo() -> Result<(), rollshot::BatchError> {
//! let connection = Connection::local();
//! let mut commands = vec![
//!     Command::simple("stop", "systemctl stop app", Duration::from_secs(30))
//!         .with_rollback("systemctl start app"),
//!     Command::simple("swap", "cp /tmp/app /usr/bin/app", Duration::from_secs(30))
//!         .with_check("sha256sum -c /tmp/app.sum --status && echo ok", "ok\n")
//!         .with_rollback("cp /usr/bin/app.bak /usr/bin/app"),
//! ];
//! run_batch(&mut commands, RollbackPolicy::BackTrace, &connection).await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cli;
pub mod command;
pub mod config;
pub mod execution;
pub mod logging;
pub mod policy;
pub mod report;
pub mod transport;
pub mod types;

pub use batch::{run_batch, validate_batch, BatchRunner};
pub use command::Command;
pub use policy::RollbackPolicy;
pub use transport::{Connection, Credential, DialOptions, Secret, Session, Transport};
pub use types::{
    BatchError, CommandStatus, ConnectionError, ExecutionError, Phase, PhaseRecord,
    RollbackOutcome,
};
