//! Team wiring: prompt blocks, the delegate tool, and blackboard tools.
//!
//! An agent with a non-empty `team` gets a "Your Team" prompt block,
//! membership in the auto-created `team:<leader>` group, and access to
//! the shared `delegate` tool. With `delegation.blackboard` enabled,
//! the group's blackboard tools are wired in as well.

use rcore::{AgentDef, DelegationConfig, Message, ParamSpec, ParamType, Result, ToolSchema};
use serde_json::Value;
use tools::Registry;

use crate::Runtime;
use crate::group::team_group_name;
use crate::store::CALLER_KEY;

/// Render the "Your Team" prompt block for a leader.
///
/// Each member line carries the peer's name and the first line of its
/// system prompt as a one-line description.
pub fn team_prompt_block(peers: &[&AgentDef]) -> String {
    let mut block = String::from("## Your Team\n\nYou can delegate to these agents with the `delegate` tool:\n");
    for peer in peers {
        let summary = peer.summary();
        if summary.is_empty() {
            block.push_str(&format!("- {}\n", peer.name));
        } else {
            block.push_str(&format!("- {}: {summary}\n", peer.name));
        }
    }
    block
}

/// Render the blackboard prompt block.
pub fn blackboard_prompt_block(group: &str) -> String {
    format!(
        "## Shared Blackboard\n\nYour team shares the blackboard of group `{group}`. \
         Use `bb_write` to publish findings, `bb_read` to look them up, \
         and `bb_list` to see what is there.\n"
    )
}

/// Build the delegation context envelope wrapped around a forwarded
/// task.
///
/// The caller's last `context_window` history messages (optionally
/// filtered by role) are quoted so the peer sees what led up to the
/// request.
pub fn delegation_envelope(
    from: &str,
    history: &[Message],
    config: &DelegationConfig,
    task: &str,
) -> String {
    let filtered: Vec<&Message> = history
        .iter()
        .filter(|m| config.include_roles.is_empty() || config.include_roles.contains(&m.role))
        .collect();
    let skip = filtered.len().saturating_sub(config.context_window);
    let lines: Vec<String> = filtered[skip..]
        .iter()
        .map(|m| format!("[{}]: {}", m.role, m.content))
        .collect();

    format!(
        "<delegation_context>\n<from>{from}</from>\n<recent_conversation>\n{}\n</recent_conversation>\n</delegation_context>\n\n<task>\n{task}\n</task>",
        lines.join("\n")
    )
}

/// Register the shared `delegate` tool if not already present.
pub fn register_delegate_tool(registry: &Registry, runtime: &Runtime) -> Result<()> {
    if registry.contains("delegate") {
        return Ok(());
    }
    let runtime = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new(
            "delegate",
            "Forward a task to a team member and return their response",
        )
        .param(
            "agent",
            ParamSpec::required(ParamType::String, "Name of the agent to delegate to"),
        )
        .param(
            "message",
            ParamSpec::required(ParamType::String, "The task or question to forward"),
        ),
        move |ctx, params| {
            let runtime = runtime.clone();
            async move {
                let Some(runtime) = runtime.upgrade() else {
                    return Err(rcore::Error::Upstream("runtime is gone".into()));
                };
                let target = params["agent"].as_str().unwrap_or_default().to_string();
                let task = params["message"].as_str().unwrap_or_default().to_string();

                let caller = ctx.value::<String>(CALLER_KEY);
                let message = match caller.as_deref() {
                    Some(caller_name) => runtime.enrich_delegation(caller_name, &task),
                    None => task.clone(),
                };

                tracing::debug!(
                    from = caller.as_deref().map(String::as_str).unwrap_or("?"),
                    to = %target,
                    "delegating"
                );
                runtime.send_to_agent(&ctx, &target, &message).await
            }
        },
    )
}

/// Register the blackboard tool surface if not already present.
///
/// The tools resolve the caller's team group at call time, so one
/// registration serves every team.
pub fn register_blackboard_tools(registry: &Registry, runtime: &Runtime) -> Result<()> {
    if registry.contains("bb_read") {
        return Ok(());
    }

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("bb_read", "Read a value from the team blackboard").param(
            "key",
            ParamSpec::required(ParamType::String, "Key to read"),
        ),
        move |ctx, params| {
            let rt = rt.clone();
            async move {
                let group = caller_group(&rt, &ctx)?;
                let key = params["key"].as_str().unwrap_or_default();
                match group.bb_get(key) {
                    Some(value) => Ok(serde_json::to_string(&value)
                        .unwrap_or_else(|_| "null".into())),
                    None => Ok(format!("no value under '{key}'")),
                }
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("bb_write", "Write a value to the team blackboard")
            .param("key", ParamSpec::required(ParamType::String, "Key to write"))
            .param(
                "value",
                ParamSpec::required(ParamType::String, "Value to store"),
            ),
        move |ctx, params| {
            let rt = rt.clone();
            async move {
                let group = caller_group(&rt, &ctx)?;
                let key = params["key"].as_str().unwrap_or_default().to_string();
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                group.bb_set(key.clone(), value);
                Ok(format!("stored '{key}'"))
            }
        },
    )?;

    let rt = runtime.downgrade();
    registry.register_fn(
        ToolSchema::new("bb_list", "List the keys on the team blackboard"),
        move |ctx, _params| {
            let rt = rt.clone();
            async move {
                let group = caller_group(&rt, &ctx)?;
                let keys = group.bb_keys();
                if keys.is_empty() {
                    Ok("blackboard is empty".to_string())
                } else {
                    Ok(keys.join("\n"))
                }
            }
        },
    )?;

    Ok(())
}

fn caller_group(
    runtime: &crate::WeakRuntime,
    ctx: &rcore::Ctx,
) -> Result<std::sync::Arc<crate::group::Group>> {
    let Some(runtime) = runtime.upgrade() else {
        return Err(rcore::Error::Upstream("runtime is gone".into()));
    };
    let Some(caller) = ctx.value::<String>(CALLER_KEY) else {
        return Err(rcore::Error::validation(
            "blackboard",
            "no calling agent in context",
        ));
    };
    runtime
        .orchestrator()
        .group_for_member(&caller)
        .ok_or_else(|| {
            rcore::Error::unknown(rcore::NameKind::Group, team_group_name(&caller))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcore::Role;

    #[test]
    fn envelope_contains_context_and_task() {
        let history = vec![
            Message::user("I struggle with delegation"),
            Message::assistant("Classic Operator's Trap"),
        ];
        let config = DelegationConfig {
            context_window: 2,
            ..Default::default()
        };
        let envelope = delegation_envelope("dan", &history, &config, "Schedule follow-up");
        assert!(envelope.contains("<delegation_context>"));
        assert!(envelope.contains("<from>dan</from>"));
        assert!(envelope.contains("I struggle with delegation"));
        assert!(envelope.contains("<task>\nSchedule follow-up\n</task>"));
    }

    #[test]
    fn envelope_honors_window_and_roles() {
        let history = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
            Message::assistant("four"),
        ];
        let config = DelegationConfig {
            context_window: 1,
            include_roles: vec![Role::User],
            ..Default::default()
        };
        let envelope = delegation_envelope("dan", &history, &config, "t");
        assert!(envelope.contains("[user]: three"));
        assert!(!envelope.contains("one"));
        assert!(!envelope.contains("four"));
    }

    #[test]
    fn team_block_lists_peer_summaries() {
        let ann = AgentDef::new("ann").system("Keeps the calendar.\nDetails.");
        let bob = AgentDef::new("bob");
        let block = team_prompt_block(&[&ann, &bob]);
        assert!(block.contains("- ann: Keeps the calendar."));
        assert!(block.contains("- bob\n"));
    }
}
