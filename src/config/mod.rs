mod batch;
pub mod types;
mod validators;

// Re-export all public types
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validators::{
        validate_address, validate_env_names, validate_one_of, validate_positive_timeout,
        validate_ssh_option,
    };
    use crate::policy::RollbackPolicy;
    use crate::transport::Credential;
    use crate::types::{CommandStatus, ConfigError, Error, Phase};
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    // Test utilities
    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn assert_validation_field(result: crate::types::Result<()>, expected_field: &str) {
        match result {
            Err(Error::Validation { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("Expected validation error on {}, got: {:?}", expected_field, other),
        }
    }

    const SIMPLE_BATCH: &str = r#"
[target]
address = "10.0.0.5"
user = "deploy"

[[command]]
name = "noop"
action = "true"
"#;

    // SystemConfig Tests
    #[test]
    fn test_system_config_complete() {
        let config_toml = r#"
[logging]
level = "debug"
format = "json"

[ssh]
binary = "/usr/local/bin/ssh"
port = 2222
connect_timeout = 5
server_alive_interval = 30
server_alive_count_max = 5
strict_host_key_checking = "yes"
known_hosts_file = "/etc/rollshot/known_hosts"
local_shortcut = false
extra_options = ["Compression=yes"]

[defaults]
command_timeout = 60
rollback_policy = "back-trace"
        "#;

        let file = create_temp_file(config_toml);
        let config = SystemConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.ssh.binary, "/usr/local/bin/ssh");
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(config.ssh.connect_timeout, 5);
        assert_eq!(config.ssh.server_alive_interval, 30);
        assert_eq!(config.ssh.server_alive_count_max, 5);
        assert_eq!(config.ssh.strict_host_key_checking, "yes");
        assert_eq!(
            config.ssh.known_hosts_file.as_deref(),
            Some("/etc/rollshot/known_hosts")
        );
        assert!(!config.ssh.local_shortcut);
        assert_eq!(config.ssh.extra_options, vec!["Compression=yes"]);
        assert_eq!(config.defaults.command_timeout, 60);
        assert_eq!(config.defaults.rollback_policy, RollbackPolicy::BackTrace);

        config.validate().unwrap();
    }

    #[test]
    fn test_system_config_defaults() {
        let file = create_temp_file("");
        let config = SystemConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.ssh.binary, "ssh");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.ssh.connect_timeout, 10);
        assert_eq!(config.ssh.server_alive_interval, 15);
        assert_eq!(config.ssh.server_alive_count_max, 3);
        assert_eq!(config.ssh.strict_host_key_checking, "accept-new");
        assert!(config.ssh.known_hosts_file.is_none());
        assert!(config.ssh.local_shortcut);
        assert_eq!(config.defaults.command_timeout, 300);
        assert_eq!(config.defaults.rollback_policy, RollbackPolicy::None);

        config.validate().unwrap();
    }

    #[test]
    fn test_system_config_missing_file() {
        let result = SystemConfig::load_from_file("/nonexistent/rollshot.toml");
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_system_config_parse_error() {
        let file = create_temp_file("[ssh]\nport = \"twenty-two\"\n");
        let result = SystemConfig::load_from_file(file.path());
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_system_config_rejects_invalid_values() {
        let mut config = SystemConfig::default();
        config.logging.level = "verbose".to_string();
        assert_validation_field(config.validate(), "logging.level");

        let mut config = SystemConfig::default();
        config.ssh.strict_host_key_checking = "maybe".to_string();
        assert_validation_field(config.validate(), "ssh.strict_host_key_checking");

        let mut config = SystemConfig::default();
        config.ssh.connect_timeout = 0;
        assert_validation_field(config.validate(), "ssh.connect_timeout");

        let mut config = SystemConfig::default();
        config.defaults.command_timeout = 0;
        assert_validation_field(config.validate(), "defaults.command_timeout");

        let mut config = SystemConfig::default();
        config.ssh.extra_options = vec!["-v".to_string()];
        assert_validation_field(config.validate(), "ssh.extra_options[0]");
    }

    // BatchFile Tests
    #[test]
    fn test_batch_file_complete() {
        let batch_toml = r#"
policy = "all"

[target]
address = "10.0.0.5:2222"
user = "deploy"
identity_file = "/etc/rollshot/id_ed25519"

[[command]]
name = "stop service"
action = "systemctl stop app"
env = { APP_ENV = "prod" }
check = "systemctl is-active app"
expected = "inactive\n"
rollback = "systemctl start app"
rollback_env = { REASON = "rollback" }
timeout = 30
check_timeout = 5

[[command]]
name = "swap binary"
action = "cp /tmp/app /usr/bin/app"
rollback = "cp /usr/bin/app.bak /usr/bin/app"
rollback_timeout = 10
        "#;

        let file = create_temp_file(batch_toml);
        let batch = BatchFile::load_from_file(file.path()).unwrap();
        batch.validate().unwrap();

        assert_eq!(batch.policy, Some(RollbackPolicy::All));
        assert_eq!(batch.target.address, "10.0.0.5:2222");
        assert_eq!(batch.commands.len(), 2);
        assert_eq!(batch.commands[0].expected, "inactive\n");
        assert_eq!(batch.commands[0].env.get("APP_ENV").map(String::as_str), Some("prod"));
        assert!(batch.commands[1].check.is_empty());

        let commands = batch.to_commands(&DefaultsConfig::default());
        assert_eq!(commands.len(), 2);

        let stop = &commands[0];
        assert_eq!(stop.name(), "stop service");
        assert_eq!(stop.status(), CommandStatus::Init);
        assert!(stop.needs_check());
        assert!(stop.has_rollback());
        assert_eq!(stop.expected_result(), "inactive\n");
        assert_eq!(stop.timeout(Phase::Primary), Duration::from_secs(30));
        assert_eq!(stop.timeout(Phase::Check), Duration::from_secs(5));
        assert_eq!(stop.timeout(Phase::Rollback), Duration::from_secs(30));
        assert_eq!(
            stop.environment(Phase::Rollback).get("REASON").map(String::as_str),
            Some("rollback")
        );

        let swap = &commands[1];
        assert!(!swap.has_check());
        assert_eq!(swap.timeout(Phase::Primary), Duration::from_secs(300));
        assert_eq!(swap.timeout(Phase::Rollback), Duration::from_secs(10));

        let options = batch.dial_options(&SshConfig::default()).unwrap();
        assert_eq!(options.user, "deploy");
        assert!(matches!(
            options.credential,
            Credential::KeyFile(ref path) if path.to_str() == Some("/etc/rollshot/id_ed25519")
        ));
    }

    #[test]
    fn test_batch_file_missing_target() {
        let file = create_temp_file("[[command]]\nname = \"a\"\naction = \"true\"\n");
        let result = BatchFile::load_from_file(file.path());
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_batch_file_without_commands_parses() {
        // emptiness is reported by the orchestrator, not the parser
        let file = create_temp_file("[target]\naddress = \"h\"\nuser = \"u\"\n");
        let batch = BatchFile::load_from_file(file.path()).unwrap();
        batch.validate().unwrap();
        assert!(batch.commands.is_empty());
    }

    #[test]
    fn test_batch_file_allows_repeated_command_names() {
        let batch_toml = r#"
[target]
address = "10.0.0.5"
user = "deploy"

[[command]]
name = "restart"
action = "systemctl restart app"

[[command]]
name = "migrate"
action = "app migrate"

[[command]]
name = "restart"
action = "systemctl restart worker"
        "#;

        let file = create_temp_file(batch_toml);
        let batch = BatchFile::load_from_file(file.path()).unwrap();
        batch.validate().unwrap();

        let commands = batch.to_commands(&DefaultsConfig::default());
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].name(), "restart");
        assert_eq!(commands[2].name(), "restart");
        assert_eq!(commands[2].action(Phase::Primary), "systemctl restart worker");
    }

    #[test]
    fn test_effective_policy_precedence() {
        let file = create_temp_file(SIMPLE_BATCH);
        let mut batch = BatchFile::load_from_file(file.path()).unwrap();
        let defaults = DefaultsConfig {
            rollback_policy: RollbackPolicy::One,
            ..DefaultsConfig::default()
        };

        assert_eq!(batch.effective_policy(None, &defaults), RollbackPolicy::One);

        batch.policy = Some(RollbackPolicy::BackTrace);
        assert_eq!(batch.effective_policy(None, &defaults), RollbackPolicy::BackTrace);
        assert_eq!(
            batch.effective_policy(Some(RollbackPolicy::All), &defaults),
            RollbackPolicy::All
        );
    }

    #[test]
    fn test_batch_file_rejects_invalid_values() {
        let file = create_temp_file(SIMPLE_BATCH);
        let base = BatchFile::load_from_file(file.path()).unwrap();
        base.validate().unwrap();

        let mut batch = base.clone();
        batch.target.address = "host:notaport".to_string();
        assert_validation_field(batch.validate(), "target.address");

        let mut batch = base.clone();
        batch.target.user = " ".to_string();
        assert_validation_field(batch.validate(), "target.user");

        let mut batch = base.clone();
        batch.target.identity_file = Some("~/.ssh/id".to_string());
        batch.target.password_env = Some("PW".to_string());
        assert_validation_field(batch.validate(), "target");

        let mut batch = base.clone();
        batch.commands[0].name = String::new();
        assert_validation_field(batch.validate(), "command[0].name");

        let mut batch = base.clone();
        batch.commands[0].expected = "ok".to_string();
        assert_validation_field(batch.validate(), "command[0].expected");

        let mut batch = base.clone();
        batch.commands[0]
            .check_env
            .insert("BAD-NAME".to_string(), "x".to_string());
        assert_validation_field(batch.validate(), "command[0].check_env");

        let mut batch = base;
        batch.commands[0].rollback_timeout = Some(0);
        assert_validation_field(batch.validate(), "command[0].rollback_timeout");
    }

    #[test]
    fn test_dial_options_password_from_env() {
        let file = create_temp_file(SIMPLE_BATCH);
        let mut batch = BatchFile::load_from_file(file.path()).unwrap();

        batch.target.password_env = Some("ROLLSHOT_TEST_PASSWORD_SET".to_string());
        std::env::set_var("ROLLSHOT_TEST_PASSWORD_SET", "hunter2");
        let options = batch.dial_options(&SshConfig::default()).unwrap();
        match options.credential {
            Credential::Password(ref secret) => assert_eq!(secret.expose(), "hunter2"),
            ref other => panic!("Expected password credential, got: {:?}", other),
        }

        batch.target.password_env = Some("ROLLSHOT_TEST_PASSWORD_UNSET".to_string());
        std::env::remove_var("ROLLSHOT_TEST_PASSWORD_UNSET");
        assert!(matches!(
            batch.dial_options(&SshConfig::default()),
            Err(Error::Validation { .. })
        ));

        batch.target.password_env = None;
        let options = batch.dial_options(&SshConfig::default()).unwrap();
        assert!(matches!(options.credential, Credential::Agent));
    }

    // Validator Tests
    #[test]
    fn test_validate_positive_timeout() {
        assert!(validate_positive_timeout(1, "t").is_ok());
        assert!(validate_positive_timeout(0, "t").is_err());
    }

    #[test]
    fn test_validate_one_of() {
        assert!(validate_one_of("info", &["info", "debug"], "level").is_ok());
        assert!(validate_one_of("INFO", &["info", "debug"], "level").is_err());
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("example.com", "a").is_ok());
        assert!(validate_address("example.com:22", "a").is_ok());
        assert!(validate_address("[::1]:22", "a").is_ok());
        assert!(validate_address("", "a").is_err());
        assert!(validate_address("host:70000", "a").is_err());
    }

    #[test]
    fn test_validate_env_names() {
        let mut env = HashMap::new();
        env.insert("APP_ENV".to_string(), "prod".to_string());
        env.insert("_private1".to_string(), "x".to_string());
        assert!(validate_env_names(&env, "env").is_ok());

        env.insert("1BAD".to_string(), "x".to_string());
        assert!(validate_env_names(&env, "env").is_err());
    }

    #[test]
    fn test_validate_ssh_option() {
        assert!(validate_ssh_option("Compression=yes", "o").is_ok());
        assert!(validate_ssh_option("ProxyJump=bastion", "o").is_ok());
        assert!(validate_ssh_option("=yes", "o").is_err());
        assert!(validate_ssh_option("Compression", "o").is_err());
        assert!(validate_ssh_option("-oFoo=bar", "o").is_err());
    }
}
