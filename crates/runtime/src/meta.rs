//! Meta-agents: the builder (`mother`) and the router (`hermes`).
//!
//! Two process-wide agents whose tools mutate the runtime itself.
//! Their names are fixed, they are never spawned from user documents,
//! and their tools refuse to act on the meta-agents themselves.

use rcore::{AgentDef, Error, ParamSpec, ParamType, Result, ToolSchema};
use serde_json::Value;
use tools::Registry;

use crate::Runtime;

/// The builder agent's reserved name.
pub const MOTHER: &str = rcore::MOTHER;

/// The router agent's reserved name.
pub const HERMES: &str = "hermes";

/// Tool set owned by the builder agent.
pub const MOTHER_TOOLS: &[&str] = &[
    "create_agent",
    "update_agent",
    "delete_agent",
    "list_agents",
    "list_available_tools",
    "list_available_skills",
    "list_mcp_registry",
];

/// Tool set owned by the router agent.
pub const HERMES_TOOLS: &[&str] = &[
    "list_agents",
    "send_to_agent",
    "connect_remote_tool_server",
    "list_remote_server_status",
    "set_project",
    "list_projects",
    "list_files",
    "remember",
    "recall",
    "forget",
];

/// Names no user or meta tool may create, update, or delete.
pub const PROTECTED: &[&str] = &[MOTHER, HERMES];

/// The builder agent definition.
pub fn mother_def(model: &str) -> AgentDef {
    AgentDef::new(MOTHER)
        .model(model)
        .system(
            "You build and maintain the agent roster.\n\
             Create, update, and delete agents when asked. Inspect the available \
             tools and skills before wiring them into a new agent. Never touch \
             the built-in agents.",
        )
}

/// The router agent definition.
pub fn hermes_def(model: &str) -> AgentDef {
    AgentDef::new(HERMES)
        .model(model)
        .system(
            "You route messages and manage the runtime's connections.\n\
             Reach any agent with send_to_agent, connect remote tool servers, \
             and keep track of projects and files. Remember durable facts the \
             user shares.",
        )
}

/// Register the meta tool surface on the shared registry.
pub fn register_meta_tools(registry: &Registry, runtime: &Runtime) -> Result<()> {
    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("create_agent", "Create a new agent and spawn its process")
            .param("name", ParamSpec::required(ParamType::String, "Agent name"))
            .param(
                "system",
                ParamSpec::required(ParamType::String, "System prompt"),
            )
            .param(
                "model",
                ParamSpec::optional(ParamType::String, "Model (defaults to settings)"),
            )
            .param(
                "tools",
                ParamSpec::optional(ParamType::Array, "Tool names the agent may use"),
            )
            .param(
                "team",
                ParamSpec::optional(ParamType::String, "Comma-separated team peers"),
            ),
        move |_ctx, params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let name = require(&params, "name")?;
                guard_protected(&name)?;
                let mut def = AgentDef::new(&name).system(require(&params, "system")?);
                if let Some(model) = params["model"].as_str() {
                    def.model = model.to_string();
                }
                if let Some(tools) = params["tools"].as_array() {
                    def.tools = tools
                        .iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect();
                }
                if let Some(team) = params["team"].as_str() {
                    def.team = team
                        .split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect();
                }
                runtime.create_agent(def)?;
                Ok(format!("agent '{name}' created"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new(
            "update_agent",
            "Replace fields of an existing agent (remove and reinsert)",
        )
        .param("name", ParamSpec::required(ParamType::String, "Agent name"))
        .param(
            "system",
            ParamSpec::optional(ParamType::String, "New system prompt"),
        )
        .param("model", ParamSpec::optional(ParamType::String, "New model"))
        .param(
            "tools",
            ParamSpec::optional(ParamType::Array, "New tool list"),
        ),
        move |_ctx, params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let name = require(&params, "name")?;
                guard_protected(&name)?;
                runtime.update_agent(&name, |def| {
                    if let Some(system) = params["system"].as_str() {
                        def.system = system.to_string();
                    }
                    if let Some(model) = params["model"].as_str() {
                        def.model = model.to_string();
                    }
                    if let Some(tools) = params["tools"].as_array() {
                        def.tools = tools
                            .iter()
                            .filter_map(|t| t.as_str().map(String::from))
                            .collect();
                    }
                })?;
                Ok(format!("agent '{name}' updated"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("delete_agent", "Delete an agent and kill its process").param(
            "name",
            ParamSpec::required(ParamType::String, "Agent name"),
        ),
        move |_ctx, params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let name = require(&params, "name")?;
                guard_protected(&name)?;
                runtime.delete_agent(&name)?;
                Ok(format!("agent '{name}' deleted"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("list_agents", "List every agent and what it does"),
        move |_ctx, _params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let mut lines: Vec<String> = runtime
                    .agents()
                    .iter()
                    .map(|def| format!("{}: {}", def.name, def.summary()))
                    .collect();
                for name in PROTECTED {
                    lines.push(format!("{name}: (built-in)"));
                }
                Ok(lines.join("\n"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new(
            "list_available_tools",
            "List the tools agents can be granted",
        ),
        move |_ctx, _params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let meta: Vec<&str> = MOTHER_TOOLS
                    .iter()
                    .chain(HERMES_TOOLS)
                    .copied()
                    .collect();
                let mut lines: Vec<String> = runtime
                    .registry()
                    .schemas("")
                    .into_iter()
                    .filter(|schema| !meta.contains(&schema.name.as_str()))
                    .map(|schema| format!("{}: {}", schema.name, schema.description))
                    .collect();
                lines.sort();
                Ok(lines.join("\n"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("list_available_skills", "List the skills agents can match"),
        move |_ctx, _params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let Some(skills) = runtime.registry().skills() else {
                    return Ok("no skill registry attached".to_string());
                };
                let lines: Vec<String> = skills
                    .all()
                    .into_iter()
                    .map(|skill| skill.name)
                    .collect();
                Ok(lines.join("\n"))
            }
        },
    )?;

    registry.register_fn(
        ToolSchema::new(
            "list_mcp_registry",
            "List known remote tool servers and their readiness",
        ),
        |_ctx, _params| async move {
            let lines: Vec<String> = mcp::NATIVE_SERVERS
                .iter()
                .map(|server| {
                    let missing = server.missing_env();
                    if missing.is_empty() {
                        format!("{}: {} (ready)", server.name, server.description)
                    } else {
                        format!(
                            "{}: {} (missing {})",
                            server.name,
                            server.description,
                            missing.join(", ")
                        )
                    }
                })
                .collect();
            Ok(lines.join("\n"))
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new(
            "send_to_agent",
            "Send a message to any agent and return its reply",
        )
        .param("agent", ParamSpec::required(ParamType::String, "Agent name"))
        .param(
            "message",
            ParamSpec::required(ParamType::String, "Message to send"),
        ),
        move |ctx, params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let agent = require(&params, "agent")?;
                let message = require(&params, "message")?;
                runtime.send_to_agent(&ctx, &agent, &message).await
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new(
            "connect_remote_tool_server",
            "Connect a known remote tool server by name",
        )
        .param(
            "name",
            ParamSpec::required(ParamType::String, "Server name from the registry"),
        ),
        move |ctx, params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let name = require(&params, "name")?;
                let Some(server) = mcp::lookup(&name) else {
                    return Err(Error::unknown(rcore::NameKind::Server, name));
                };
                let missing = server.missing_env();
                if !missing.is_empty() {
                    return Err(Error::Auth(format!(
                        "server '{name}' needs {}",
                        missing.join(", ")
                    )));
                }
                let count = if let Some(handler) = server.in_process() {
                    let connected =
                        mcp::RemoteServer::connect_in_process(&ctx, &name, handler).await?;
                    runtime.registry().attach_server(connected)?
                } else {
                    let Some(config) = server.config() else {
                        return Err(Error::Auth(format!("server '{name}' is not configured")));
                    };
                    runtime.registry().connect_server(&ctx, &config).await?
                };
                Ok(format!("connected '{name}' with {count} tools"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new(
            "list_remote_server_status",
            "List connected remote servers and their tool counts",
        ),
        move |_ctx, _params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let status = runtime.registry().remote_status();
                if status.is_empty() {
                    return Ok("no remote servers connected".to_string());
                }
                Ok(status
                    .into_iter()
                    .map(|(name, count)| format!("{name}: {count} tools"))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("set_project", "Switch the active project directory").param(
            "name",
            ParamSpec::required(ParamType::String, "Project name"),
        ),
        move |_ctx, params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let name = require(&params, "name")?;
                let path = runtime.set_project(&name)?;
                Ok(format!("active project: {}", path.display()))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("list_projects", "List the project directories"),
        move |_ctx, _params| {
            let rt = rt.clone();
            async move {
                let runtime = upgrade(&rt)?;
                let projects = runtime.list_projects()?;
                if projects.is_empty() {
                    return Ok("no projects yet".to_string());
                }
                Ok(projects.join("\n"))
            }
        },
    )?;

    Ok(())
}

fn upgrade(rt: &crate::WeakRuntime) -> Result<Runtime> {
    rt.upgrade()
        .ok_or_else(|| Error::Upstream("runtime is gone".into()))
}

fn require(params: &Value, name: &str) -> Result<String> {
    params[name]
        .as_str()
        .map(String::from)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation(name, "required parameter missing"))
}

fn guard_protected(name: &str) -> Result<()> {
    if PROTECTED.contains(&name) {
        return Err(Error::validation(
            "name",
            format!("'{name}' is a built-in agent and cannot be changed"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_names_guarded() {
        assert!(guard_protected("mother").is_err());
        assert!(guard_protected("hermes").is_err());
        assert!(guard_protected("reviewer").is_ok());
    }
}
