//! The document root: agents, workflows, tools, settings.

use std::collections::BTreeMap;

use crate::agent::{AgentDef, Settings};
use crate::schema::{ParamSpec, ToolSchema};
use crate::step::WorkflowDef;

/// Implementation body of a declarative (YAML) tool.
///
/// String fields are templates expanded with `{{.param}}` substitution
/// against the merged settings ⊕ params map at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolImpl {
    /// An HTTP request.
    Http {
        /// URL template.
        url: String,
        /// HTTP method, default GET.
        method: String,
        /// Header templates.
        headers: BTreeMap<String, String>,
        /// Query parameter templates.
        query: BTreeMap<String, String>,
        /// Body template, if any.
        body: Option<String>,
    },
    /// A shell command.
    Exec {
        /// Command template, split with quote-honoring rules.
        command: String,
    },
    /// Read a file.
    FileRead {
        /// Path template.
        path: String,
    },
    /// Write a file.
    FileWrite {
        /// Path template.
        path: String,
        /// Content template.
        content: String,
    },
}

/// A declarative tool definition from the document.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// Parameter declarations, in declaration order.
    pub params: Vec<(String, ParamSpec)>,
    /// The implementation body.
    pub implementation: ToolImpl,
}

impl ToolDefinition {
    /// The tool schema exposed to agents.
    pub fn schema(&self) -> ToolSchema {
        let mut schema = ToolSchema::new(&self.name, &self.description);
        for (name, spec) in &self.params {
            schema = schema.param(name, spec.clone());
        }
        schema
    }
}

/// A parsed document: the root of everything the runtime executes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// Document name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Agents keyed by name.
    pub agents: BTreeMap<String, AgentDef>,
    /// Workflows keyed by name.
    pub workflows: BTreeMap<String, WorkflowDef>,
    /// Declarative tools keyed by name.
    pub tools: BTreeMap<String, ToolDefinition>,
    /// Global settings.
    pub settings: Settings,
}

impl Document {
    /// Look up an agent definition with `extends` resolved.
    ///
    /// Validation rejects unknown parents and cycles; a cyclic chain
    /// reached anyway resolves to the agent's own definition.
    pub fn resolved_agent(&self, name: &str) -> Option<AgentDef> {
        let mut chain = Vec::new();
        let mut current = self.agents.get(name)?;
        while let Some(parent) = current.extends.as_deref() {
            if chain.iter().any(|seen: &&AgentDef| seen.name == parent) || parent == name {
                break;
            }
            chain.push(current);
            match self.agents.get(parent) {
                Some(next) => current = next,
                None => return None,
            }
        }
        let mut resolved = current.clone();
        for child in chain.iter().rev() {
            resolved = child.resolve_extends(&resolved);
        }
        Some(resolved)
    }

    /// Apply settings defaults to an agent definition.
    pub fn with_defaults(&self, mut agent: AgentDef) -> AgentDef {
        if agent.model.is_empty()
            && let Some(model) = &self.settings.model
        {
            agent.model = model.clone();
        }
        if agent.temperature.is_none() {
            agent.temperature = self.settings.temperature;
        }
        agent
    }
}
