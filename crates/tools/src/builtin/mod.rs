//! Built-in tools.
//!
//! File I/O, shell execution, HTTP fetch, email, and the SQL family.
//! Handlers receive parameters after sandbox path rewriting; the shell
//! and dynamic tools capture the sandbox themselves for command-string
//! rewriting and environment overrides.

use crate::Registry;
use rcore::{Error, Result};

mod email;
mod exec;
mod fs;
mod http;
mod sql;

pub use exec::split_command;

/// Register every built-in tool on the registry.
///
/// The SQL family only appears when `REEF_SQLITE_PATH` is set; email
/// registration is unconditional but fails at call time without SMTP
/// configuration.
pub fn register_all(registry: &Registry) -> Result<()> {
    fs::register(registry)?;
    exec::register(registry)?;
    http::register(registry)?;
    email::register(registry)?;
    if std::env::var(sql::DB_PATH_VAR).is_ok() {
        sql::register(registry)?;
    }
    Ok(())
}

/// Pull a required string parameter out of the params object.
fn required_str<'v>(params: &'v serde_json::Value, name: &str) -> Result<&'v str> {
    params
        .get(name)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::validation(name, "required parameter missing"))
}

/// Truncate output at a byte budget, appending a marker when cut.
fn cap_output(mut text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("\n... [output truncated]");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_output_appends_marker() {
        let capped = cap_output("x".repeat(100), 10);
        assert!(capped.starts_with("xxxxxxxxxx"));
        assert!(capped.ends_with("[output truncated]"));
    }

    #[test]
    fn cap_output_leaves_short_text() {
        assert_eq!(cap_output("short".into(), 100), "short");
    }

    #[test]
    fn register_all_registers_minimum_set() {
        let registry = Registry::new();
        register_all(&registry).unwrap();
        for tool in [
            "read_file",
            "write_file",
            "append_file",
            "list_files",
            "exec",
            "fetch",
            "send_email",
        ] {
            assert!(registry.contains(tool), "missing builtin '{tool}'");
        }
    }
}
