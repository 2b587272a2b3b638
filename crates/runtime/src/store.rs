//! Collaborator seams: persistence, events, and memory.
//!
//! The runtime persists nothing on its own. External collaborators
//! implement these traits; the runtime calls them at hydration time,
//! on message append, and on lifecycle transitions. Memory tools read
//! their backing store from context values rather than globals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rcore::{AgentDef, Ctx, Message, ParamSpec, ParamType, Result, Role, ToolSchema};
use serde_json::Value;
use tools::Registry;
use ulid::Ulid;

/// Persistence store for chat history and runtime-created agents.
pub trait Store: Send + Sync {
    /// Append one chat message for an agent.
    fn insert_chat_message(&self, agent: &str, role: Role, content: &str);

    /// Load an agent's chat history, oldest first.
    fn list_chat_messages(&self, agent: &str) -> Vec<Message>;

    /// Drop an agent's chat history.
    fn delete_chat_messages(&self, agent: &str);

    /// Persist a runtime-created agent definition.
    fn upsert_composed_agent(&self, def: &AgentDef);

    /// Load all persisted agent definitions.
    fn list_composed_agents(&self) -> Vec<AgentDef>;

    /// Remove a persisted agent definition.
    fn delete_composed_agent(&self, name: &str);
}

/// A lifecycle event published to external collaborators.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    /// Event type, e.g. `process_started`, `agent_created`.
    pub kind: String,
    /// The process concerned, if any.
    pub process_id: Option<Ulid>,
    /// The agent concerned.
    pub agent: String,
    /// When the event fired.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub data: Value,
}

impl RuntimeEvent {
    /// Build an event stamped with the current time.
    pub fn new(kind: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            process_id: None,
            agent: agent.into(),
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    /// Attach the process id.
    pub fn process(mut self, id: Ulid) -> Self {
        self.process_id = Some(id);
        self
    }

    /// Attach a payload.
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Event sink implemented by external collaborators.
///
/// Called synchronously from lifecycle transitions; implementations
/// must not block.
pub trait EventSink: Send + Sync {
    /// Receive one event.
    fn publish(&self, event: &RuntimeEvent);
}

/// Long-term memory store behind the `remember`/`recall`/`forget`
/// tools.
pub trait MemoryStore: Send + Sync {
    /// Store a fact under a key.
    fn remember(&self, user: &str, agent: &str, key: &str, value: &str);

    /// Retrieve facts matching a query.
    fn recall(&self, user: &str, agent: &str, query: &str) -> Vec<String>;

    /// Drop a fact. Returns whether it existed.
    fn forget(&self, user: &str, agent: &str, key: &str) -> bool;
}

/// Context key carrying the calling agent's name through tool
/// execution.
pub const CALLER_KEY: &str = "reef.caller";

/// Context key carrying the [`MemoryBinding`].
pub const MEMORY_KEY: &str = "reef.memory";

/// Answer returned by memory tools when no binding is in scope.
pub const MEMORY_CONTEXT_NOT_SET: &str = "memory-context-not-set";

/// The per-request memory binding collaborators inject.
#[derive(Clone)]
pub struct MemoryBinding {
    /// The backing store.
    pub store: Arc<dyn MemoryStore>,
    /// The end user on whose behalf the request runs.
    pub user_id: String,
    /// The agent the memory belongs to.
    pub agent: String,
}

impl MemoryBinding {
    /// Attach this binding to a context.
    pub fn bind(self, ctx: &Ctx) -> Ctx {
        ctx.with_value(MEMORY_KEY, self)
    }
}

/// Register the memory tool surface.
///
/// The tools read the [`MemoryBinding`] from the context defensively
/// and answer `memory-context-not-set` when a collaborator has not
/// injected one.
pub fn register_memory_tools(registry: &Registry) -> Result<()> {
    registry.register_fn(
        ToolSchema::new("remember", "Store a durable fact about the user")
            .param("key", ParamSpec::required(ParamType::String, "Short fact key"))
            .param("value", ParamSpec::required(ParamType::String, "The fact")),
        |ctx, params| async move {
            let Some(binding) = ctx.value::<MemoryBinding>(MEMORY_KEY) else {
                return Ok(MEMORY_CONTEXT_NOT_SET.to_string());
            };
            let key = params["key"].as_str().unwrap_or_default();
            let value = params["value"].as_str().unwrap_or_default();
            binding
                .store
                .remember(&binding.user_id, &binding.agent, key, value);
            Ok(format!("remembered '{key}'"))
        },
    )?;

    registry.register_fn(
        ToolSchema::new("recall", "Retrieve stored facts matching a query").param(
            "query",
            ParamSpec::required(ParamType::String, "What to look for"),
        ),
        |ctx, params| async move {
            let Some(binding) = ctx.value::<MemoryBinding>(MEMORY_KEY) else {
                return Ok(MEMORY_CONTEXT_NOT_SET.to_string());
            };
            let query = params["query"].as_str().unwrap_or_default();
            let facts = binding.store.recall(&binding.user_id, &binding.agent, query);
            if facts.is_empty() {
                Ok("nothing recalled".to_string())
            } else {
                Ok(facts.join("\n"))
            }
        },
    )?;

    registry.register_fn(
        ToolSchema::new("forget", "Delete a stored fact").param(
            "key",
            ParamSpec::required(ParamType::String, "Key of the fact to delete"),
        ),
        |ctx, params| async move {
            let Some(binding) = ctx.value::<MemoryBinding>(MEMORY_KEY) else {
                return Ok(MEMORY_CONTEXT_NOT_SET.to_string());
            };
            let key = params["key"].as_str().unwrap_or_default();
            if binding.store.forget(&binding.user_id, &binding.agent, key) {
                Ok(format!("forgot '{key}'"))
            } else {
                Ok(format!("no fact stored under '{key}'"))
            }
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapMemory {
        entries: Mutex<BTreeMap<String, String>>,
    }

    impl MemoryStore for MapMemory {
        fn remember(&self, _user: &str, _agent: &str, key: &str, value: &str) {
            self.entries.lock().insert(key.into(), value.into());
        }
        fn recall(&self, _user: &str, _agent: &str, query: &str) -> Vec<String> {
            self.entries
                .lock()
                .iter()
                .filter(|(k, v)| k.contains(query) || v.contains(query))
                .map(|(k, v)| format!("{k}: {v}"))
                .collect()
        }
        fn forget(&self, _user: &str, _agent: &str, key: &str) -> bool {
            self.entries.lock().remove(key).is_some()
        }
    }

    #[tokio::test]
    async fn memory_tools_without_binding_answer_not_set() {
        let registry = Registry::new();
        register_memory_tools(&registry).unwrap();
        let out = registry
            .execute(
                &Ctx::background(),
                "remember",
                serde_json::json!({"key": "k", "value": "v"}),
            )
            .await
            .unwrap();
        assert_eq!(out, MEMORY_CONTEXT_NOT_SET);
    }

    #[tokio::test]
    async fn memory_round_trip_through_binding() {
        let registry = Registry::new();
        register_memory_tools(&registry).unwrap();
        let store = Arc::new(MapMemory::default());
        let ctx = MemoryBinding {
            store: store.clone(),
            user_id: "u1".into(),
            agent: "dan".into(),
        }
        .bind(&Ctx::background());

        registry
            .execute(
                &ctx,
                "remember",
                serde_json::json!({"key": "likes", "value": "short answers"}),
            )
            .await
            .unwrap();
        let out = registry
            .execute(&ctx, "recall", serde_json::json!({"query": "likes"}))
            .await
            .unwrap();
        assert!(out.contains("short answers"));

        let out = registry
            .execute(&ctx, "forget", serde_json::json!({"key": "likes"}))
            .await
            .unwrap();
        assert_eq!(out, "forgot 'likes'");
    }
}
