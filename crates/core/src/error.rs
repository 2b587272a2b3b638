//! Error kinds shared across the runtime.
//!
//! One enum, one variant per failure kind. Components match on the
//! variant rather than string contents; messages are for humans.

use std::fmt;

/// Result alias used across the reef crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a name refers to, for `unknown name` diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// An agent name.
    Agent,
    /// A workflow name.
    Workflow,
    /// A tool name.
    Tool,
    /// A group name.
    Group,
    /// A remote tool server name.
    Server,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Workflow => "workflow",
            Self::Tool => "tool",
            Self::Group => "group",
            Self::Server => "server",
        };
        f.write_str(s)
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Dotted path to the offending field (e.g. `agents.dan.team`).
    pub field: String,
    /// What went wrong.
    pub message: String,
    /// Optional "did you mean" style hint.
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic without a hint.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a hint.
    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

/// Runtime error, one variant per kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The document was rejected by the parser or validator.
    #[error("validation failed: {}", format_diagnostics(.0))]
    Validation(Vec<Diagnostic>),

    /// An agent, workflow, tool, or group name did not resolve.
    #[error("unknown {kind} '{name}'{}", hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
    UnknownName {
        /// What the name was expected to refer to.
        kind: NameKind,
        /// The unresolved name.
        name: String,
        /// Optional "did you mean" suggestion.
        hint: Option<String>,
    },

    /// A `Send` was attempted on a terminal process.
    #[error("process '{0}' is not running")]
    ProcessNotRunning(String),

    /// The LLM loop hit its iteration cap without a final answer.
    #[error("max iterations exceeded ({0})")]
    MaxIterationsExceeded(u32),

    /// A tool name did not resolve in the registry or its parents.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// A tool name was registered twice without an intervening removal.
    #[error("tool '{0}' already registered")]
    AlreadyRegistered(String),

    /// A tool resolved but its execution failed.
    #[error("tool: {source}")]
    Tool {
        /// Name of the failing tool.
        name: String,
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// The context was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The LLM transport failed.
    #[error("upstream: {0}")]
    Upstream(String),

    /// The LLM provider reported rate limiting.
    #[error("rate limited")]
    RateLimited,

    /// The agent's cost cap was exceeded.
    #[error("budget exceeded: spent {spent:.4}, cap {cap:.4}")]
    BudgetExceeded {
        /// Estimated spend so far.
        spent: f64,
        /// Configured cap.
        cap: f64,
    },

    /// Credentials were missing or rejected.
    #[error("auth: {0}")]
    Auth(String),
}

fn format_diagnostics(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wrap an arbitrary failure as a tool-execution error.
    pub fn tool(name: impl Into<String>, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Tool {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Single-diagnostic validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![Diagnostic::new(field, message)])
    }

    /// Unknown-name error without a hint.
    pub fn unknown(kind: NameKind, name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind,
            name: name.into(),
            hint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display_with_hint() {
        let d = Diagnostic::new("steps[0]", "undefined agent 'resercher'").hint("did you mean 'researcher'?");
        assert_eq!(
            d.to_string(),
            "steps[0]: undefined agent 'resercher' (did you mean 'researcher'?)"
        );
    }

    #[test]
    fn tool_error_wraps_cause() {
        let err = Error::tool("exec", std::io::Error::other("spawn failed"));
        assert!(err.to_string().starts_with("tool:"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn unknown_name_display() {
        let err = Error::UnknownName {
            kind: NameKind::Agent,
            name: "dan".into(),
            hint: Some("did you mean 'dana'?".into()),
        };
        assert_eq!(err.to_string(), "unknown agent 'dan' (did you mean 'dana'?)");
    }
}
