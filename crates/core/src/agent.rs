//! Agent definitions.
//!
//! An [`AgentDef`] is pure configuration: what the agent is, which
//! model backs it, which tools and peers it can reach. Runtime state
//! (conversation, metrics) lives in the process, not here.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::Role;

/// How the orchestrator reacts to a process failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisionStrategy {
    /// Re-spawn a fresh process preserving the agent definition.
    #[default]
    Restart,
    /// Leave the process terminal.
    Stop,
    /// Surface the failure to the parent / caller.
    Escalate,
}

impl SupervisionStrategy {
    /// Parse from the document string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "restart" => Ok(Self::Restart),
            "stop" => Ok(Self::Stop),
            "escalate" => Ok(Self::Escalate),
            other => Err(Error::validation(
                "supervision.strategy",
                format!("unknown strategy '{other}', expected restart, stop, or escalate"),
            )),
        }
    }
}

/// Supervision configuration for an agent's processes.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisionConfig {
    /// The reaction to a failure.
    pub strategy: SupervisionStrategy,
    /// Maximum restarts allowed within `window`.
    pub max_restarts: u32,
    /// Rolling window the restart count is measured over.
    pub window: Duration,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            strategy: SupervisionStrategy::Restart,
            max_restarts: 3,
            window: Duration::from_secs(60),
        }
    }
}

/// Backoff shape for per-send retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// delay, 2*delay, 3*delay, …
    #[default]
    Linear,
    /// delay, 2*delay, 4*delay, …
    Exponential,
    /// delay every time.
    Constant,
}

impl Backoff {
    /// Parse from the document string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            "constant" => Ok(Self::Constant),
            other => Err(Error::validation(
                "retry.backoff",
                format!("unknown backoff '{other}', expected linear, exponential, or constant"),
            )),
        }
    }

    /// Delay before retry attempt `attempt` (1-based).
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Self::Linear => base * attempt,
            Self::Exponential => base * 2u32.saturating_pow(attempt.saturating_sub(1)),
            Self::Constant => base,
        }
    }
}

/// Per-send retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt.
    pub attempts: u32,
    /// Backoff shape between attempts.
    pub backoff: Backoff,
    /// Base delay fed into the backoff.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Backoff::Linear,
            delay: Duration::from_secs(1),
        }
    }
}

/// Delegation behavior when this agent forwards work to a peer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DelegationConfig {
    /// How many recent messages of the caller's history to wrap into
    /// the delegation context envelope. Zero disables the envelope.
    pub context_window: usize,
    /// Restrict envelope messages to these roles. Empty means all.
    pub include_roles: Vec<Role>,
    /// Whether to wire the team blackboard tools.
    pub blackboard: bool,
}

/// A declarative agent definition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentDef {
    /// Unique agent name.
    pub name: String,
    /// Parent agent this definition extends, if any.
    pub extends: Option<String>,
    /// Model identifier. Required after settings defaulting.
    pub model: String,
    /// Model used when the primary one fails upstream.
    pub fallback_model: Option<String>,
    /// System prompt. Required.
    pub system: String,
    /// Sampling temperature override.
    pub temperature: Option<f64>,
    /// Cost cap, e.g. `"$1.50"`.
    pub budget: Option<String>,
    /// Tool names this agent may call. Empty means all registered.
    pub tools: Vec<String>,
    /// Knowledge URIs appended to the system prompt at spawn.
    pub knowledge: Vec<String>,
    /// Peer agent names forming this agent's team.
    pub team: Vec<String>,
    /// Supervision of this agent's processes.
    pub supervision: Option<SupervisionConfig>,
    /// Per-send retry policy.
    pub retry: Option<RetryConfig>,
    /// Skill names to match against the skill registry.
    pub skills: Vec<String>,
    /// Delegation behavior.
    pub delegation: Option<DelegationConfig>,
}

impl AgentDef {
    /// Create a definition with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system prompt.
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    /// Add a tool by name.
    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }

    /// Add a team peer by name.
    pub fn peer(mut self, name: impl Into<String>) -> Self {
        self.team.push(name.into());
        self
    }

    /// The cost cap as a number, if a budget is set.
    pub fn budget_cap(&self) -> Result<Option<f64>> {
        self.budget.as_deref().map(parse_budget).transpose()
    }

    /// First line of the system prompt, used as a one-line description
    /// in team prompt blocks.
    pub fn summary(&self) -> &str {
        self.system.lines().next().unwrap_or_default().trim()
    }

    /// Fold a parent definition into this one: unset scalar fields are
    /// inherited, list fields are parent-then-child appended.
    pub fn resolve_extends(&self, parent: &AgentDef) -> AgentDef {
        let mut merged = self.clone();
        if merged.model.is_empty() {
            merged.model = parent.model.clone();
        }
        if merged.fallback_model.is_none() {
            merged.fallback_model = parent.fallback_model.clone();
        }
        if merged.system.is_empty() {
            merged.system = parent.system.clone();
        }
        if merged.temperature.is_none() {
            merged.temperature = parent.temperature;
        }
        if merged.budget.is_none() {
            merged.budget = parent.budget.clone();
        }
        if merged.supervision.is_none() {
            merged.supervision = parent.supervision.clone();
        }
        if merged.retry.is_none() {
            merged.retry = parent.retry.clone();
        }
        if merged.delegation.is_none() {
            merged.delegation = parent.delegation.clone();
        }
        merged.tools = merge_list(&parent.tools, &self.tools);
        merged.knowledge = merge_list(&parent.knowledge, &self.knowledge);
        merged.team = merge_list(&parent.team, &self.team);
        merged.skills = merge_list(&parent.skills, &self.skills);
        merged
    }
}

fn merge_list(parent: &[String], child: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = parent.to_vec();
    for item in child {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

/// Parse a currency string like `"$1.50"` or `"1.50"` into a cap.
pub fn parse_budget(s: &str) -> Result<f64> {
    let trimmed = s.trim().trim_start_matches('$');
    trimmed.parse::<f64>().map_err(|_| {
        Error::validation("budget", format!("'{s}' is not a currency amount"))
    })
}

/// Parse a duration string like `"30s"` or `"5m"`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s.trim())
        .map_err(|e| Error::validation("duration", format!("'{s}': {e}")))
}

/// Settings shared across the document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    /// Default model for agents that do not set one.
    pub model: Option<String>,
    /// Default sampling temperature.
    pub temperature: Option<f64>,
    /// Sandbox root for file-path tool parameters.
    pub workspace: Option<std::path::PathBuf>,
    /// Variables merged into dynamic-tool template scopes.
    pub variables: BTreeMap<String, String>,
    /// Remote tool servers to connect at startup.
    pub servers: Vec<RemoteServerConfig>,
}

/// Transport configuration for a remote tool server.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteTransport {
    /// Subprocess speaking JSON over stdio lines.
    Stdio {
        /// Program to spawn.
        command: String,
        /// Arguments.
        args: Vec<String>,
        /// Extra environment variables.
        env: BTreeMap<String, String>,
    },
    /// HTTP request/response endpoint.
    Http {
        /// Endpoint URL.
        url: String,
    },
    /// Server-sent events endpoint.
    Sse {
        /// Stream URL.
        url: String,
    },
}

/// A named remote tool server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteServerConfig {
    /// Server name; remote tools register as `<name>__<tool>`.
    pub name: String,
    /// How to reach the server.
    pub transport: RemoteTransport,
}
