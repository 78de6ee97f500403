use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

use crate::batch::{generate_batch_id, validate_batch, BatchRunner};
use crate::config::{BatchFile, SystemConfig};
use crate::policy::RollbackPolicy;
use crate::report::BatchReport;
use crate::transport::Connection;
use crate::types::Result;

#[derive(Parser)]
#[command(name = "rollshot")]
#[command(about = "Run ordered shell command batches over SSH with rollback")]
#[command(long_about = "
Runs an ordered batch of shell commands on one remote host, verifies each
one with an optional check command and, when a command fails, unwinds prior
work according to a rollback policy.
")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// System configuration file path (optional)
    #[arg(short, long, default_value = "/etc/rollshot/config.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogFormat {
    Json,
    Pretty,
    Plain,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run a batch file against its target
    Run(RunArgs),
    /// Check a batch file and the configuration without connecting
    Validate(ValidateArgs),
    /// Show detailed version and build information
    Version,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Batch file (TOML)
    pub batch_file: PathBuf,

    /// Override the rollback policy of the batch file
    #[arg(long, value_enum, ignore_case = true)]
    pub policy: Option<RollbackPolicy>,

    /// Report format printed on stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Set log format
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Batch file (TOML)
    pub batch_file: PathBuf,

    /// Check the batch against this policy instead of its own
    #[arg(long, value_enum, ignore_case = true)]
    pub policy: Option<RollbackPolicy>,
}

impl Cli {
    /// Get effective log level considering verbose/quiet flags
    pub fn effective_log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else if self.quiet {
            LogLevel::Error
        } else {
            self.log_level.clone().unwrap_or(LogLevel::Info)
        }
    }

    /// Convert LogLevel enum to string for logging module
    pub fn log_level_to_str(&self) -> &'static str {
        match self.effective_log_level() {
            LogLevel::Trace => crate::logging::level::TRACE,
            LogLevel::Debug => crate::logging::level::DEBUG,
            LogLevel::Info => crate::logging::level::INFO,
            LogLevel::Warn => crate::logging::level::WARN,
            LogLevel::Error => crate::logging::level::ERROR,
        }
    }

    /// Log level override, only when one of the level flags was given
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.log_level.is_some() || self.verbose || self.quiet {
            Some(self.log_level_to_str())
        } else {
            None
        }
    }

    /// Get log format override from CLI arguments
    pub fn log_format_override(&self) -> Option<&'static str> {
        match &self.command {
            Commands::Run(args) => args.log_format.as_ref().map(|fmt| match fmt {
                LogFormat::Json => crate::logging::format::JSON,
                LogFormat::Pretty => crate::logging::format::PRETTY,
                LogFormat::Plain => crate::logging::format::PLAIN,
            }),
            _ => None,
        }
    }
}

/// Load the system configuration if present, defaults otherwise
pub fn load_system_config(cli: &Cli) -> Result<SystemConfig> {
    if !cli.config.exists() {
        return Ok(SystemConfig::default());
    }
    let config = SystemConfig::load_from_file(&cli.config)?;
    config.validate()?;
    Ok(config)
}

/// Run a batch file and print its report. Returns whether the batch passed.
#[instrument(skip(cli, args, system_config), fields(batch_file = %args.batch_file.display()))]
pub async fn run_batch_file(cli: &Cli, args: RunArgs, system_config: SystemConfig) -> Result<bool> {
    info!(config_path = %cli.config.display(), "Loading batch file");
    let batch = BatchFile::load_from_file(&args.batch_file)?;
    batch.validate()?;

    let policy = batch.effective_policy(args.policy, &system_config.defaults);
    let mut commands = batch.to_commands(&system_config.defaults);

    // fail before dialing when the batch can never run
    validate_batch(&commands, policy)?;

    let options = batch.dial_options(&system_config.ssh)?;
    info!(
        address = %options.address,
        user = %options.user,
        policy = %policy,
        command_count = commands.len(),
        "Dialing target"
    );
    let connection = Connection::dial(options).await;

    let batch_id = generate_batch_id();
    let runner = BatchRunner::new(&connection, policy).with_batch_id(&batch_id);
    let outcome = runner.run(&mut commands).await;

    let report = BatchReport::new(&batch_id, &connection.describe(), policy, &commands, &outcome);
    match args.format {
        ReportFormat::Text => print!("{}", report.to_text()),
        ReportFormat::Json => println!("{}", report.to_json()?),
    }

    if connection.err().is_none() {
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close connection");
        }
    }

    match outcome {
        Ok(()) => {
            info!(batch_id = %batch_id, "Batch succeeded");
            Ok(true)
        }
        Err(e) => {
            error!(batch_id = %batch_id, error = %e, "Batch failed");
            Ok(false)
        }
    }
}

/// Validate configuration and a batch file without connecting
#[instrument(skip(cli, args, system_config))]
pub async fn validate_batch_file(
    cli: &Cli,
    args: ValidateArgs,
    system_config: SystemConfig,
) -> Result<()> {
    info!(config_path = %cli.config.display(), "System configuration is valid");

    let batch = match BatchFile::load_from_file(&args.batch_file) {
        Ok(batch) => batch,
        Err(e) => {
            error!(
                batch_file = %args.batch_file.display(),
                error = %e,
                "Failed to load batch file"
            );
            return Err(e);
        }
    };

    if let Err(e) = batch.validate() {
        error!(
            batch_file = %args.batch_file.display(),
            error = %e,
            "Batch file validation failed"
        );
        return Err(e);
    }

    let policy = batch.effective_policy(args.policy, &system_config.defaults);
    let commands = batch.to_commands(&system_config.defaults);
    if let Err(e) = validate_batch(&commands, policy) {
        error!(
            batch_file = %args.batch_file.display(),
            policy = %policy,
            error = %e,
            "Batch cannot run under this policy"
        );
        return Err(e.into());
    }

    for (index, command) in commands.iter().enumerate() {
        if command.action(crate::types::Phase::Primary).is_empty() {
            warn!(index = index, command = %command.name(), "Command has an empty action and will fail");
        }
    }

    info!(
        batch_file = %args.batch_file.display(),
        target = %batch.target.address,
        policy = %policy,
        command_count = commands.len(),
        "Batch file is valid"
    );
    println!(
        "{}: {} command(s) on {} (policy: {})",
        args.batch_file.display(),
        commands.len(),
        batch.target.address,
        policy
    );
    Ok(())
}

/// Show version and build information
#[instrument]
pub async fn show_version() -> Result<()> {
    println!("rollshot {}", env!("CARGO_PKG_VERSION"));
    println!("Description: {}", env!("CARGO_PKG_DESCRIPTION"));
    println!("License: {}", env!("CARGO_PKG_LICENSE"));
    println!();

    println!("Build Information:");
    println!(
        "  Build Profile: {}",
        if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        }
    );
    println!();

    println!("Runtime Information:");
    println!("  Platform: {}", std::env::consts::OS);
    println!("  Architecture: {}", std::env::consts::ARCH);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_run() {
        let cli = parse(&[
            "rollshot",
            "run",
            "deploy.toml",
            "--policy",
            "Back-Trace",
            "--format",
            "json",
            "--log-format",
            "json",
        ]);

        match &cli.command {
            Commands::Run(args) => {
                assert_eq!(args.batch_file, PathBuf::from("deploy.toml"));
                assert_eq!(args.policy, Some(RollbackPolicy::BackTrace));
                assert_eq!(args.format, ReportFormat::Json);
            }
            _ => panic!("Expected run subcommand"),
        }
        assert_eq!(cli.log_format_override(), Some("json"));
        assert_eq!(cli.config, PathBuf::from("/etc/rollshot/config.toml"));
    }

    #[test]
    fn test_log_level_flags() {
        let cli = parse(&["rollshot", "-v", "version"]);
        assert_eq!(cli.log_level_override(), Some("debug"));

        let cli = parse(&["rollshot", "--quiet", "version"]);
        assert_eq!(cli.log_level_override(), Some("error"));

        let cli = parse(&["rollshot", "--log-level", "trace", "version"]);
        assert_eq!(cli.log_level_override(), Some("trace"));

        let cli = parse(&["rollshot", "version"]);
        assert_eq!(cli.log_level_override(), None);
        assert_eq!(cli.log_format_override(), None);

        assert!(Cli::try_parse_from(["rollshot", "-v", "-q", "version"]).is_err());
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let cli = parse(&["rollshot", "--config", "/nonexistent/config.toml", "version"]);
        let config = load_system_config(&cli).unwrap();
        assert_eq!(config.ssh.port, 22);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let file = create_temp_file("[ssh]\nconnect_timeout = 0\n");
        let path = file.path().to_string_lossy().to_string();
        let cli = parse(&["rollshot", "--config", &path, "version"]);
        assert!(load_system_config(&cli).is_err());
    }

    #[tokio::test]
    async fn test_validate_batch_file() {
        let file = create_temp_file(
            r#"
[target]
address = "10.0.0.5"
user = "deploy"

[[command]]
name = "noop"
action = "true"
"#,
        );
        let path = file.path().to_string_lossy().to_string();

        let cli = parse(&["rollshot", "validate", &path]);
        let Commands::Validate(args) = cli.command.clone() else {
            panic!("Expected validate subcommand");
        };
        validate_batch_file(&cli, args, SystemConfig::default())
            .await
            .unwrap();

        let cli = parse(&["rollshot", "validate", &path, "--policy", "all"]);
        let Commands::Validate(args) = cli.command.clone() else {
            panic!("Expected validate subcommand");
        };
        let err = validate_batch_file(&cli, args, SystemConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no rollback action"));
    }

    #[tokio::test]
    async fn test_run_batch_file_on_localhost() {
        let file = create_temp_file(
            r#"
policy = "one"

[target]
address = "localhost"
user = "nobody"

[[command]]
name = "greet"
action = "echo hi"
check = "echo ok"
expected = "ok\n"

[[command]]
name = "break"
action = "exit 4"
rollback = "echo undone"
"#,
        );
        let path = file.path().to_string_lossy().to_string();
        let cli = parse(&["rollshot", "run", &path, "--format", "json"]);
        let Commands::Run(args) = cli.command.clone() else {
            panic!("Expected run subcommand");
        };

        let passed = run_batch_file(&cli, args, SystemConfig::default())
            .await
            .unwrap();
        assert!(!passed);
    }
}
