//! Shell execution tool.

use std::process::Stdio;
use std::time::Duration;

use rcore::{Error, ParamSpec, ParamType, Result, ToolSchema};
use tokio::process::Command;

use super::{cap_output, required_str};
use crate::{Registry, Sandbox};

/// Default subprocess timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Subprocess output budget in bytes.
pub const OUTPUT_CAP: usize = 8 * 1024;

pub fn register(registry: &Registry) -> Result<()> {
    let sandbox = registry.sandbox().cloned();
    registry.register_fn(
        ToolSchema::new("exec", "Run a shell command and capture its output")
            .param(
                "command",
                ParamSpec::required(ParamType::String, "Command passed to sh -c"),
            )
            .param(
                "timeout",
                ParamSpec::optional(ParamType::Integer, "Timeout in seconds (default 60)"),
            ),
        move |_ctx, params| {
            let sandbox = sandbox.clone();
            async move {
                let command = required_str(&params, "command")?.to_string();
                let timeout = params
                    .get("timeout")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS);
                run_shell(&command, sandbox.as_ref(), Duration::from_secs(timeout)).await
            }
        },
    )
}

/// Run `sh -c <command>` under the sandbox rules.
pub(crate) async fn run_shell(
    command: &str,
    sandbox: Option<&Sandbox>,
    timeout: Duration,
) -> Result<String> {
    let command = match sandbox {
        Some(sandbox) => sandbox.rewrite_command(command),
        None => command.to_string(),
    };

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(sandbox) = sandbox {
        cmd.current_dir(sandbox.root());
        cmd.envs(sandbox.env());
    }

    tracing::debug!(command = %command, "spawning subprocess");
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| Error::tool("exec", std::io::Error::other(format!(
            "command timed out after {}s",
            timeout.as_secs()
        ))))?
        .map_err(|e| Error::tool("exec", e))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim_end());
    }
    if !output.status.success() {
        text.push_str(&format!("\n[exit status: {}]", output.status.code().unwrap_or(-1)));
    }
    Ok(cap_output(text, OUTPUT_CAP))
}

/// Split a command string into argv, honoring single and double quotes.
pub fn split_command(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    for c in input.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcore::Ctx;

    #[tokio::test]
    async fn exec_captures_stdout() {
        let registry = Registry::new();
        register(&registry).unwrap();
        let out = registry
            .execute(
                &Ctx::background(),
                "exec",
                serde_json::json!({"command": "echo hello"}),
            )
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn exec_reports_exit_status() {
        let registry = Registry::new();
        register(&registry).unwrap();
        let out = registry
            .execute(
                &Ctx::background(),
                "exec",
                serde_json::json!({"command": "exit 3"}),
            )
            .await
            .unwrap();
        assert!(out.contains("[exit status: 3]"));
    }

    #[tokio::test]
    async fn exec_times_out() {
        let out = run_shell("sleep 10", None, Duration::from_millis(50)).await;
        assert!(out.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn exec_output_capped() {
        let out = run_shell(
            "yes x | head -c 20000",
            None,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(out.len() <= OUTPUT_CAP + 64);
        assert!(out.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn exec_home_points_at_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path());
        let out = run_shell("echo $HOME", Some(&sandbox), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.trim(), dir.path().display().to_string());
    }

    #[test]
    fn split_honors_quotes() {
        assert_eq!(
            split_command(r#"curl -H 'X-Key: a b' "https://x" plain"#),
            vec!["curl", "-H", "X-Key: a b", "https://x", "plain"]
        );
        assert_eq!(split_command("  spaced   out  "), vec!["spaced", "out"]);
    }
}
