//! Tool registry: named tools, schemas, middleware, and dispatch.
//!
//! The registry is the single place where `dyn` tool handlers live.
//! It routes path parameters through the sandbox, applies middleware,
//! falls back to a parent registry for narrowed views, and bridges
//! remote tool-protocol servers.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use mcp::RemoteServer;
use parking_lot::RwLock;
use rcore::{Ctx, Error, RemoteServerConfig, Result, ToolSchema};
use serde_json::Value;

pub use sandbox::Sandbox;

pub mod builtin;
pub mod dynamic;
mod sandbox;

/// A type-erased async tool handler: `(ctx, params) -> output`.
pub type Handler = Arc<
    dyn Fn(Ctx, Value) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync,
>;

/// A registered tool: explicit schema plus handler.
#[derive(Clone)]
pub struct ToolDef {
    /// The declared schema.
    pub schema: ToolSchema,
    handler: Handler,
}

impl ToolDef {
    /// Create a tool definition from a schema and handler closure.
    pub fn new<F, Fut>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(Ctx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx, params| Box::pin(handler(ctx, params)));
        Self { schema, handler }
    }
}

/// Observation hooks applied around tool execution.
///
/// `before` hooks run in reverse registration order, `after` hooks in
/// registration order, so the last-registered middleware wraps closest
/// to the handler.
pub trait Middleware: Send + Sync {
    /// Inspect or rewrite parameters before execution.
    fn before(&self, name: &str, params: &mut Value) -> Result<()> {
        let _ = (name, params);
        Ok(())
    }

    /// Inspect or rewrite output after execution.
    fn after(&self, name: &str, output: &mut String) -> Result<()> {
        let _ = (name, output);
        Ok(())
    }
}

/// A matched skill contributing prompt content and tool access.
#[derive(Debug, Clone)]
pub struct MatchedSkill {
    /// Skill name.
    pub name: String,
    /// Prompt content injected into the system message.
    pub content: String,
    /// Tool names the skill declares.
    pub tools: Vec<String>,
}

/// External skill source consulted by [`Registry::schemas`].
pub trait SkillLookup: Send + Sync {
    /// Skills currently matched for the owning agent.
    fn matched(&self, query: &str) -> Vec<MatchedSkill>;

    /// All known skills, for listings.
    fn all(&self) -> Vec<MatchedSkill>;
}

/// The tool registry. Cheap to clone; clones share the same tool map.
#[derive(Clone, Default)]
pub struct Registry {
    tools: Arc<RwLock<BTreeMap<String, ToolDef>>>,
    middleware: Arc<RwLock<Vec<Arc<dyn Middleware>>>>,
    remotes: Arc<RwLock<BTreeMap<String, Arc<RemoteServer>>>>,
    skills: Arc<RwLock<Option<Arc<dyn SkillLookup>>>>,
    sandbox: Option<Sandbox>,
    parent: Option<Box<Registry>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with a path sandbox.
    pub fn with_sandbox(sandbox: Sandbox) -> Self {
        Self {
            sandbox: Some(sandbox),
            ..Default::default()
        }
    }

    /// Attach a skill source. Shared with clones and filtered views.
    pub fn set_skills(&self, skills: Arc<dyn SkillLookup>) {
        *self.skills.write() = Some(skills);
    }

    /// The configured sandbox, if any.
    pub fn sandbox(&self) -> Option<&Sandbox> {
        self.sandbox.as_ref()
    }

    /// The attached skill source, if any.
    pub fn skills(&self) -> Option<Arc<dyn SkillLookup>> {
        self.skills.read().clone()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&self, name: impl Into<String>, def: ToolDef) -> Result<()> {
        let name = name.into();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        tracing::debug!(tool = %name, "tool registered");
        tools.insert(name, def);
        Ok(())
    }

    /// Register a tool built from a schema and closure.
    pub fn register_fn<F, Fut>(&self, schema: ToolSchema, handler: F) -> Result<()>
    where
        F: Fn(Ctx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let name = schema.name.clone();
        self.register(name, ToolDef::new(schema, handler))
    }

    /// Remove a tool by name. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Whether a tool resolves here or in a parent.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// Append a middleware. Shared with filtered child registries.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware.write().push(middleware);
    }

    /// Look up a tool's schema here or in a parent.
    pub fn schema_of(&self, name: &str) -> Option<ToolSchema> {
        if let Some(def) = self.tools.read().get(name) {
            return Some(def.schema.clone());
        }
        self.parent.as_ref().and_then(|p| p.schema_of(name))
    }

    /// All schemas visible through this registry.
    ///
    /// Locally registered tools first; if a skill source is attached,
    /// tools declared by matched skills are resolved against the
    /// parent registry and unioned in.
    pub fn schemas(&self, query: &str) -> Vec<ToolSchema> {
        let mut out: Vec<ToolSchema> = self
            .tools
            .read()
            .values()
            .map(|def| def.schema.clone())
            .collect();
        if let Some(skills) = self.skills.read().clone() {
            let known: Vec<String> = out.iter().map(|s| s.name.clone()).collect();
            for skill in skills.matched(query) {
                for tool in &skill.tools {
                    if known.contains(tool) || out.iter().any(|s| &s.name == tool) {
                        continue;
                    }
                    let resolved = self
                        .parent
                        .as_ref()
                        .and_then(|p| p.schema_of(tool))
                        .or_else(|| self.schema_of(tool));
                    if let Some(schema) = resolved {
                        out.push(schema);
                    }
                }
            }
        }
        out
    }

    /// Execute a tool by name.
    ///
    /// Resolution order: local map, then parent fallback. Sandbox path
    /// rewriting and middleware apply at the registry that owns the
    /// handler. Failures are wrapped as tool-execution errors.
    pub async fn execute(&self, ctx: &Ctx, name: &str, mut params: Value) -> Result<String> {
        let def = {
            let tools = self.tools.read();
            tools.get(name).cloned()
        };
        let Some(def) = def else {
            if let Some(parent) = &self.parent {
                return Box::pin(parent.execute(ctx, name, params)).await;
            }
            return Err(Error::ToolNotFound(name.to_string()));
        };

        if let Some(sandbox) = &self.sandbox {
            sandbox.rewrite_params(&mut params);
        }

        let middleware: Vec<Arc<dyn Middleware>> = self.middleware.read().clone();
        for mw in middleware.iter().rev() {
            mw.before(name, &mut params)?;
        }

        tracing::debug!(tool = name, "executing tool");
        let mut output = ctx.run((def.handler)(ctx.clone(), params)).await.map_err(
            |err| match err {
                Error::Timeout | Error::Cancelled | Error::Tool { .. } => err,
                other => Error::tool(name, other),
            },
        )?;

        for mw in &middleware {
            mw.after(name, &mut output)?;
        }
        Ok(output)
    }

    /// Return a narrowed child registry exposing only `names`.
    ///
    /// The child shares middleware and sandbox with this registry and
    /// keeps a parent pointer for fallback lookup. An empty name list
    /// means no narrowing: the child is a plain view of this registry.
    pub fn filter(&self, names: &[String]) -> Registry {
        if names.is_empty() {
            return self.clone();
        }
        let subset: BTreeMap<String, ToolDef> = {
            let tools = self.tools.read();
            names
                .iter()
                .filter_map(|name| tools.get(name).map(|def| (name.clone(), def.clone())))
                .collect()
        };
        Registry {
            tools: Arc::new(RwLock::new(subset)),
            middleware: self.middleware.clone(),
            remotes: self.remotes.clone(),
            sandbox: self.sandbox.clone(),
            skills: self.skills.clone(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Connect a remote tool server and register its tools.
    ///
    /// Each remote tool is exposed as `<server>__<tool>` so names never
    /// collide across servers. Returns the number of tools registered.
    pub async fn connect_server(&self, ctx: &Ctx, config: &RemoteServerConfig) -> Result<usize> {
        if self.remotes.read().contains_key(&config.name) {
            return Err(Error::AlreadyRegistered(config.name.clone()));
        }
        let server = RemoteServer::connect(ctx, config).await?;
        self.attach_server(server)
    }

    /// Register an already-connected server's tools.
    ///
    /// Used directly for in-process native servers, which skip the
    /// wire transport entirely.
    pub fn attach_server(&self, server: RemoteServer) -> Result<usize> {
        let name = server.name().to_string();
        if self.remotes.read().contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        let server = Arc::new(server);
        let tools = server.tools();
        let count = tools.len();

        for mut schema in tools {
            let remote_name = schema.name.clone();
            let server = server.clone();
            schema.name = format!("{name}__{}", schema.name);
            let exposed = schema.name.clone();
            self.register(
                exposed,
                ToolDef::new(schema, move |ctx, params| {
                    let server = server.clone();
                    let remote_name = remote_name.clone();
                    async move { server.call_tool(&ctx, &remote_name, params).await }
                }),
            )?;
        }

        tracing::info!(server = %name, tools = count, "remote tool server connected");
        self.remotes.write().insert(name, server);
        Ok(count)
    }

    /// Disconnect a remote server, removing all `<name>__*` tools.
    pub fn disconnect_server(&self, name: &str) -> bool {
        let Some(_server) = self.remotes.write().remove(name) else {
            return false;
        };
        let prefix = format!("{name}__");
        let mut tools = self.tools.write();
        tools.retain(|tool_name, _| !tool_name.starts_with(&prefix));
        tracing::info!(server = name, "remote tool server disconnected");
        true
    }

    /// Names and tool counts of connected remote servers.
    pub fn remote_status(&self) -> Vec<(String, usize)> {
        let remotes = self.remotes.read();
        let tools = self.tools.read();
        remotes
            .keys()
            .map(|name| {
                let prefix = format!("{name}__");
                let count = tools.keys().filter(|t| t.starts_with(&prefix)).count();
                (name.clone(), count)
            })
            .collect()
    }
}
