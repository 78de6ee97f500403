//! Shell quoting and environment helpers shared by the transports.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::types::ExecutionError;

lazy_static! {
    static ref ENV_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Failed to compile env name pattern");
}

/// Whether `name` can be exported by a POSIX shell
pub fn is_valid_env_name(name: &str) -> bool {
    ENV_NAME.is_match(name)
}

/// Reject the first environment name a shell would not accept
pub fn check_env_names(env: &HashMap<String, String>) -> Result<(), ExecutionError> {
    match env.keys().find(|name| !is_valid_env_name(name)) {
        Some(name) => Err(ExecutionError::InvalidEnvironment { name: name.clone() }),
        None => Ok(()),
    }
}

/// Wrap a value in single quotes, escaping embedded quotes as `'\''`
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Build the script run by the remote login shell: one `export` per
/// variable (sorted, so the script is stable) followed by the command.
pub fn remote_script(command: &str, env: &HashMap<String, String>) -> Result<String, ExecutionError> {
    check_env_names(env)?;

    let sorted: BTreeMap<_, _> = env.iter().collect();
    let mut script = String::new();
    for (name, value) in sorted {
        script.push_str("export ");
        script.push_str(name);
        script.push('=');
        script.push_str(&quote(value));
        script.push_str("; ");
    }
    script.push_str(command);

    Ok(script)
}
