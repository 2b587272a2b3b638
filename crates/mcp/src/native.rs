//! Built-in registry of known remote tool servers.
//!
//! A process-local table of server configurations that can be
//! connected by name, each with the environment variables it needs.
//! Consulted by the router agent's connect tool and by the setup-time
//! auto-connect pass. In-process entries are served by a
//! [`ToolServer`] implementation and never spawn a subprocess.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rcore::{Error, RemoteServerConfig, RemoteTransport, Result};
use serde_json::{Value, json};

use crate::transport::ToolServer;

/// How a native server is reached.
#[derive(Clone, Copy)]
pub enum NativeKind {
    /// Spawn a subprocess speaking the protocol over stdio.
    Stdio {
        /// Program to spawn.
        command: &'static str,
        /// Program arguments.
        args: &'static [&'static str],
    },
    /// Served in-process; connected without spawning anything.
    InProcess(fn() -> Arc<dyn ToolServer>),
}

/// A known server: how to start it and what it needs.
#[derive(Clone, Copy)]
pub struct NativeServer {
    /// Server name, also the tool-name prefix.
    pub name: &'static str,
    /// What the server provides.
    pub description: &'static str,
    /// Transport kind.
    pub kind: NativeKind,
    /// Environment variables that must be present to connect.
    pub env_required: &'static [&'static str],
}

/// The process-local table of known servers.
pub const NATIVE_SERVERS: &[NativeServer] = &[
    NativeServer {
        name: "clock",
        description: "Wall-clock time without leaving the process",
        kind: NativeKind::InProcess(clock_server),
        env_required: &[],
    },
    NativeServer {
        name: "filesystem",
        description: "File reads and writes under an allowed directory",
        kind: NativeKind::Stdio {
            command: "npx",
            args: &["-y", "@modelcontextprotocol/server-filesystem", "."],
        },
        env_required: &[],
    },
    NativeServer {
        name: "fetch",
        description: "Web page fetching and markdown conversion",
        kind: NativeKind::Stdio {
            command: "uvx",
            args: &["mcp-server-fetch"],
        },
        env_required: &[],
    },
    NativeServer {
        name: "github",
        description: "GitHub issues, pull requests, and repository search",
        kind: NativeKind::Stdio {
            command: "npx",
            args: &["-y", "@modelcontextprotocol/server-github"],
        },
        env_required: &["GITHUB_PERSONAL_ACCESS_TOKEN"],
    },
    NativeServer {
        name: "brave-search",
        description: "Web search via the Brave Search API",
        kind: NativeKind::Stdio {
            command: "npx",
            args: &["-y", "@modelcontextprotocol/server-brave-search"],
        },
        env_required: &["BRAVE_API_KEY"],
    },
];

/// Look up a known server by name.
pub fn lookup(name: &str) -> Option<&'static NativeServer> {
    NATIVE_SERVERS.iter().find(|server| server.name == name)
}

impl NativeServer {
    /// Whether the server runs in-process.
    pub fn is_in_process(&self) -> bool {
        matches!(self.kind, NativeKind::InProcess(_))
    }

    /// Environment variables missing for this server, if any.
    pub fn missing_env(&self) -> Vec<&'static str> {
        self.env_required
            .iter()
            .copied()
            .filter(|var| std::env::var(var).is_err())
            .collect()
    }

    /// The in-process handler, for in-process entries.
    pub fn in_process(&self) -> Option<Arc<dyn ToolServer>> {
        match self.kind {
            NativeKind::InProcess(factory) => Some(factory()),
            NativeKind::Stdio { .. } => None,
        }
    }

    /// Build a connectable subprocess configuration, passing required
    /// env through. `None` for in-process entries or when required
    /// environment variables are absent.
    pub fn config(&self) -> Option<RemoteServerConfig> {
        let NativeKind::Stdio { command, args } = self.kind else {
            return None;
        };
        let mut env = BTreeMap::new();
        for var in self.env_required {
            env.insert((*var).to_string(), std::env::var(var).ok()?);
        }
        Some(RemoteServerConfig {
            name: self.name.to_string(),
            transport: RemoteTransport::Stdio {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                env,
            },
        })
    }
}

/// The built-in clock server.
struct Clock;

fn clock_server() -> Arc<dyn ToolServer> {
    Arc::new(Clock)
}

impl ToolServer for Clock {
    fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": crate::protocol::PROTOCOL_VERSION,
                "serverInfo": {"name": "clock", "version": env!("CARGO_PKG_VERSION")},
            })),
            "notifications/initialized" => Ok(Value::Null),
            "tools/list" => Ok(json!({
                "tools": [{
                    "name": "unix_time",
                    "description": "Current time as seconds since the Unix epoch",
                    "inputSchema": {"type": "object", "properties": {}, "required": []},
                }],
            })),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if name != "unix_time" {
                    return Err(Error::ToolNotFound(name.to_string()));
                }
                let seconds = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                Ok(json!({
                    "content": [{"type": "text", "text": seconds.to_string()}],
                }))
            }
            other => Err(Error::Upstream(format!("unsupported method '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_servers() {
        assert!(lookup("filesystem").is_some());
        assert!(lookup("clock").is_some());
        assert!(lookup("unknown-server").is_none());
    }

    #[test]
    fn config_without_env_requirements_builds() {
        let config = lookup("filesystem").unwrap().config().unwrap();
        assert_eq!(config.name, "filesystem");
        assert!(matches!(config.transport, RemoteTransport::Stdio { .. }));
    }

    #[test]
    fn in_process_entries_have_no_subprocess_config() {
        let clock = lookup("clock").unwrap();
        assert!(clock.is_in_process());
        assert!(clock.config().is_none());
        assert!(clock.in_process().is_some());
    }

    #[test]
    fn clock_serves_the_protocol() {
        let clock = clock_server();
        let listing = clock.handle("tools/list", Value::Null).unwrap();
        assert_eq!(listing["tools"][0]["name"], "unix_time");

        let result = clock
            .handle("tools/call", json!({"name": "unix_time", "arguments": {}}))
            .unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.parse::<u64>().unwrap() > 1_600_000_000);
    }
}
