//! Conversation messages and the tool-call envelope format.
//!
//! The envelope format is a stable cross-component contract: front-ends
//! parse conversation transcripts by these exact markers, so the byte
//! layout here must not drift.

use serde::{Deserialize, Serialize};

/// The role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system role.
    System,
    /// The user role.
    User,
    /// The assistant role.
    Assistant,
    /// The tool role.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message.
    pub role: Role,
    /// The content of the message. May contain serialized tool-call
    /// or tool-result envelopes.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new tool message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Encode a tool call as it appears inside an assistant message.
///
/// Format: `<tool_use id="<id>" name="<name>">\n<json-args>\n</tool_use>`.
pub fn encode_tool_use(id: &str, name: &str, args: &serde_json::Value) -> String {
    format!(
        "<tool_use id=\"{id}\" name=\"{name}\">\n{}\n</tool_use>",
        serde_json::to_string(args).unwrap_or_else(|_| "{}".into())
    )
}

/// Encode a tool result as it appears inside a user-role message.
///
/// Format: `<tool_result tool_use_id="<id>" name="<name>">\n<body>\n</tool_result>`.
pub fn encode_tool_result(id: &str, name: &str, body: &str) -> String {
    format!("<tool_result tool_use_id=\"{id}\" name=\"{name}\">\n{body}\n</tool_result>")
}

/// A tool result parsed back out of a transcript message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolResult {
    /// The tool-call id the result answers.
    pub tool_use_id: String,
    /// The tool name.
    pub name: String,
    /// The raw result body.
    pub body: String,
}

/// Parse all tool-result envelopes out of a message body.
///
/// Tolerates surrounding prose; malformed envelopes are skipped.
pub fn parse_tool_results(content: &str) -> Vec<ParsedToolResult> {
    let mut results = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("<tool_result ") {
        let tail = &rest[start..];
        let Some(head_end) = tail.find('>') else { break };
        let head = &tail[..head_end];
        let Some(close) = tail.find("</tool_result>") else { break };
        let body = tail[head_end + 1..close].trim_matches('\n');

        let id = attr(head, "tool_use_id");
        let name = attr(head, "name");
        if let (Some(id), Some(name)) = (id, name) {
            results.push(ParsedToolResult {
                tool_use_id: id.to_string(),
                name: name.to_string(),
                body: body.to_string(),
            });
        }
        rest = &tail[close + "</tool_result>".len()..];
    }
    results
}

fn attr<'a>(head: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!("{key}=\"");
    let start = head.find(&marker)? + marker.len();
    let end = head[start..].find('"')? + start;
    Some(&head[start..end])
}
