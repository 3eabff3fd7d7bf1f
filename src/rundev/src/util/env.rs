//! Environment sanitization and `--env` parsing

use std::collections::HashMap;
use tracing::warn;

/// Variables preserved from the caller's environment.
const KEEP: [&str; 3] = ["HOME", "USER", "LOGNAME"];

/// PATH the console starts from; `EXTPATH` may prefix it.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Reduce the process environment to a minimal fixed set: HOME/USER/LOGNAME
/// if present, a fixed LANG, and a fixed PATH. Children inherit the result.
pub fn sanitize_environment() {
    let kept: Vec<(String, String)> = KEEP
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
        .collect();

    for (name, _) in std::env::vars() {
        std::env::remove_var(&name);
    }
    for (name, value) in kept {
        std::env::set_var(name, value);
    }
    std::env::set_var("LANG", "en_US.UTF-8");
    std::env::set_var("PATH", DEFAULT_PATH);
}

/// Parse `--env` items. `KEY=VALUE` sets a value; a bare `KEY` inherits the
/// current value (skipped with a warning when not set).
pub fn parse_env(items: &[String]) -> HashMap<String, String> {
    let mut parsed = HashMap::new();
    for item in items {
        match item.split_once('=') {
            Some((name, value)) => {
                parsed.insert(name.to_string(), value.to_string());
            }
            None => match std::env::var(item) {
                Ok(value) => {
                    parsed.insert(item.clone(), value);
                }
                Err(_) => warn!("ignoring --env {item}: not set in the current environment"),
            },
        }
    }
    parsed
}
