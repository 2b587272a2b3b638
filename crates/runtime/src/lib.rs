//! The reef runtime: processes, orchestration, teams, and meta-agents.
//!
//! [`Runtime`] is the facade external callers hold. It owns the parsed
//! document, the shared tool registry, the orchestrator, and the
//! workflow executor, and exposes the two entry points everything
//! flows through: [`send_to_agent`](Runtime::send_to_agent) and
//! [`run_workflow`](Runtime::run_workflow).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rcore::{AgentDef, Ctx, Document, Error, NameKind, Result, suggest, validate};
use serde_json::Value;
use tools::{Registry, Sandbox, SkillLookup, builtin, dynamic};
use workflow::{AgentCall, Executor};

pub use {
    group::{Group, team_group_name},
    orchestrator::{Orchestrator, SpawnNode},
    process::{
        HISTORY_WINDOW, MAX_ITERATIONS, Metrics, Process, ProcessSpec, SendHandle, Status,
        StreamHandle,
    },
    provider::{
        Completion, EventStream, Provider, ProviderRequest, StreamEvent, ToolCall, Usage,
    },
    store::{
        CALLER_KEY, EventSink, MEMORY_CONTEXT_NOT_SET, MEMORY_KEY, MemoryBinding, MemoryStore,
        RuntimeEvent, Store,
    },
    stream::{Publisher, STREAM_BUFFER},
};

#[cfg(any(test, feature = "testing"))]
pub use provider::StubProvider;

mod group;
pub mod meta;
mod orchestrator;
mod process;
mod provider;
mod store;
mod stream;
pub mod team;

struct Inner {
    document: RwLock<Document>,
    registry: Registry,
    orchestrator: Orchestrator,
    provider: Arc<dyn Provider>,
    executor: RwLock<Executor>,
    store: RwLock<Option<Arc<dyn Store>>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    project: Mutex<Option<String>>,
    lazy_spawn: bool,
}

/// Options controlling runtime construction.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Spawn agent processes on first use instead of at build time.
    pub lazy_spawn: bool,
}

/// The runtime facade. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

/// A non-owning handle used by tool closures.
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<Inner>,
}

impl WeakRuntime {
    /// Upgrade back to a full runtime, if it is still alive.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Adapter giving the workflow interpreter access to agents.
struct Caller(WeakRuntime);

impl AgentCall for Caller {
    fn send<'a>(
        &'a self,
        ctx: &'a Ctx,
        agent: &'a str,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let Some(runtime) = self.0.upgrade() else {
                return Err(Error::Upstream("runtime is gone".into()));
            };
            runtime.send_to_agent(ctx, agent, message).await
        })
    }
}

impl Runtime {
    /// Build a runtime from a validated document.
    pub fn new(document: Document, provider: Arc<dyn Provider>) -> Result<Self> {
        Self::with_options(document, provider, RuntimeOptions::default())
    }

    /// Build a runtime with explicit options.
    pub fn with_options(
        document: Document,
        provider: Arc<dyn Provider>,
        options: RuntimeOptions,
    ) -> Result<Self> {
        validate(&document)?;

        let registry = match &document.settings.workspace {
            Some(root) => Registry::with_sandbox(Sandbox::new(root)),
            None => Registry::new(),
        };
        builtin::register_all(&registry)?;
        dynamic::register_all(&registry, &document.tools, &document.settings)?;
        store::register_memory_tools(&registry)?;

        let orchestrator = Orchestrator::new();
        let workflows = document.workflows.clone();
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let caller: Arc<dyn AgentCall> = Arc::new(Caller(WeakRuntime {
                inner: weak.clone(),
            }));
            Inner {
                document: RwLock::new(document),
                registry,
                orchestrator,
                provider,
                executor: RwLock::new(Executor::new(workflows, caller)),
                store: RwLock::new(None),
                sink: RwLock::new(None),
                project: Mutex::new(None),
                lazy_spawn: options.lazy_spawn,
            }
        });
        let runtime = Self { inner };

        meta::register_meta_tools(&runtime.inner.registry, &runtime)?;
        team::register_delegate_tool(&runtime.inner.registry, &runtime)?;
        team::register_blackboard_tools(&runtime.inner.registry, &runtime)?;
        runtime.wire_lifecycle_events();
        runtime.wire_teams();
        runtime.spawn_meta_agents();

        if !runtime.inner.lazy_spawn {
            let names: Vec<String> = runtime.inner.document.read().agents.keys().cloned().collect();
            for name in names {
                runtime.spawn_agent(&name)?;
            }
        }

        Ok(runtime)
    }

    /// A non-owning handle for tool closures.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The shared tool registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> Document {
        self.inner.document.read().clone()
    }

    /// All user-defined agent definitions.
    pub fn agents(&self) -> Vec<AgentDef> {
        self.inner.document.read().agents.values().cloned().collect()
    }

    /// Attach a persistence store and hydrate processes from it.
    ///
    /// Runtime-created agents persisted earlier are restored, and each
    /// process with an empty history gets its stored messages back.
    pub fn hydrate(&self, store: Arc<dyn Store>) -> Result<()> {
        for def in store.list_composed_agents() {
            let name = def.name.clone();
            if !self.inner.document.read().agents.contains_key(&name) {
                self.insert_agent(def)?;
                tracing::info!(agent = %name, "restored composed agent");
            }
        }
        let names: Vec<String> = self.inner.document.read().agents.keys().cloned().collect();
        for name in &names {
            if let Some(process) = self.inner.orchestrator.process_for_agent(name) {
                let messages = store.list_chat_messages(name);
                if !messages.is_empty() {
                    process.hydrate(messages);
                }
            }
        }
        *self.inner.store.write() = Some(store);
        Ok(())
    }

    /// Attach a lifecycle event sink.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    /// Attach a skill source to the shared registry.
    pub fn set_skills(&self, skills: Arc<dyn SkillLookup>) {
        self.inner.registry.set_skills(skills);
    }

    /// Connect remote tool servers: those the document lists, plus
    /// known native servers whose required environment is present.
    pub async fn start(&self, ctx: &Ctx) -> Result<usize> {
        let mut connected = 0;
        let servers = self.inner.document.read().settings.servers.clone();
        for config in &servers {
            match self.inner.registry.connect_server(ctx, config).await {
                Ok(count) => {
                    connected += count;
                }
                Err(err) => {
                    tracing::warn!(server = %config.name, error = %err, "server connect failed");
                }
            }
        }
        // Native servers: in-process ones always, subprocess ones only
        // when they are env-gated and the environment is present.
        for native in mcp::NATIVE_SERVERS {
            let already = self
                .inner
                .registry
                .remote_status()
                .iter()
                .any(|(name, _)| name == native.name);
            if already || !native.missing_env().is_empty() {
                continue;
            }
            if let Some(handler) = native.in_process() {
                match mcp::RemoteServer::connect_in_process(ctx, native.name, handler).await {
                    Ok(server) => match self.inner.registry.attach_server(server) {
                        Ok(count) => connected += count,
                        Err(err) => {
                            tracing::warn!(server = native.name, error = %err, "attach failed");
                        }
                    },
                    Err(err) => {
                        tracing::warn!(server = native.name, error = %err, "auto-connect failed");
                    }
                }
            } else if !native.env_required.is_empty()
                && let Some(config) = native.config()
            {
                match self.inner.registry.connect_server(ctx, &config).await {
                    Ok(count) => {
                        connected += count;
                    }
                    Err(err) => {
                        tracing::warn!(server = native.name, error = %err, "auto-connect failed");
                    }
                }
            }
        }
        Ok(connected)
    }

    /// Send one message to an agent's process, spawning it on demand.
    pub async fn send_to_agent(&self, ctx: &Ctx, agent: &str, message: &str) -> Result<String> {
        let process = match self.inner.orchestrator.process_for_agent(agent) {
            Some(process) => process,
            None => self.spawn_agent(agent)?,
        };
        process.send(ctx, message).await
    }

    /// Run a workflow by name.
    pub async fn run_workflow(
        &self,
        ctx: &Ctx,
        name: &str,
        inputs: BTreeMap<String, Value>,
    ) -> Result<Value> {
        let executor = self.inner.executor.read().clone();
        executor.run(ctx, name, inputs).await
    }

    /// The process currently backing an agent, if spawned.
    pub fn process_for(&self, agent: &str) -> Option<Arc<Process>> {
        self.inner.orchestrator.process_for_agent(agent)
    }

    /// Create an agent at runtime: document entry plus live process.
    pub fn create_agent(&self, def: AgentDef) -> Result<()> {
        let name = def.name.clone();
        self.insert_agent(def)?;
        if let Some(store) = self.inner.store.read().clone()
            && let Some(def) = self.inner.document.read().agents.get(&name)
        {
            store.upsert_composed_agent(def);
        }
        self.publish(RuntimeEvent::new("agent_created", &name));
        Ok(())
    }

    fn insert_agent(&self, mut def: AgentDef) -> Result<()> {
        if def.name.is_empty() {
            return Err(Error::validation("name", "agent name is required"));
        }
        if meta::PROTECTED.contains(&def.name.as_str()) {
            return Err(Error::validation(
                "name",
                format!("'{}' is a reserved agent name", def.name),
            ));
        }
        {
            let mut document = self.inner.document.write();
            if document.agents.contains_key(&def.name) {
                return Err(Error::validation(
                    "name",
                    format!("agent '{}' already exists", def.name),
                ));
            }
            def = document.with_defaults(def);
            if def.model.is_empty() {
                return Err(Error::validation(
                    "model",
                    "no model set and settings declare no default",
                ));
            }
            if def.system.is_empty() {
                return Err(Error::validation("system", "system prompt is required"));
            }
            for peer in &def.team {
                if !document.agents.contains_key(peer) {
                    return Err(Error::unknown(NameKind::Agent, peer.clone()));
                }
            }
            document.agents.insert(def.name.clone(), def.clone());
        }
        self.wire_team_for(&def);
        self.spawn_agent(&def.name)?;
        Ok(())
    }

    /// Replace an agent definition: remove, mutate, and reinsert.
    pub fn update_agent(&self, name: &str, mutate: impl FnOnce(&mut AgentDef)) -> Result<()> {
        if meta::PROTECTED.contains(&name) {
            return Err(Error::validation(
                "name",
                format!("'{name}' is a reserved agent name"),
            ));
        }
        let mut def = {
            let mut document = self.inner.document.write();
            let Some(def) = document.agents.remove(name) else {
                return Err(self.unknown_agent(name));
            };
            def
        };
        mutate(&mut def);
        if let Some(process) = self.inner.orchestrator.process_for_agent(name) {
            self.inner.orchestrator.kill(process.id());
        }
        {
            let mut document = self.inner.document.write();
            document.agents.insert(name.to_string(), def.clone());
        }
        self.spawn_agent(name)?;
        if let Some(store) = self.inner.store.read().clone() {
            store.upsert_composed_agent(&def);
        }
        self.publish(RuntimeEvent::new("agent_updated", name));
        Ok(())
    }

    /// Delete an agent: kill its process and drop its definition.
    pub fn delete_agent(&self, name: &str) -> Result<()> {
        if meta::PROTECTED.contains(&name) {
            return Err(Error::validation(
                "name",
                format!("'{name}' is a reserved agent name"),
            ));
        }
        let removed = self.inner.document.write().agents.remove(name);
        if removed.is_none() {
            return Err(self.unknown_agent(name));
        }
        if let Some(process) = self.inner.orchestrator.process_for_agent(name) {
            self.inner.orchestrator.kill(process.id());
        }
        if let Some(store) = self.inner.store.read().clone() {
            store.delete_composed_agent(name);
        }
        self.publish(RuntimeEvent::new("agent_deleted", name));
        Ok(())
    }

    /// Switch the active project directory, creating it if needed.
    pub fn set_project(&self, name: &str) -> Result<PathBuf> {
        let path = self.projects_root().join(name);
        std::fs::create_dir_all(&path).map_err(|e| Error::tool("set_project", e))?;
        *self.inner.project.lock() = Some(name.to_string());
        Ok(path)
    }

    /// The currently active project name.
    pub fn active_project(&self) -> Option<String> {
        self.inner.project.lock().clone()
    }

    /// Names of all project directories.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let root = self.projects_root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&root).map_err(|e| Error::tool("list_projects", e))? {
            let entry = entry.map_err(|e| Error::tool("list_projects", e))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Build the delegation message for a caller: the raw task, or the
    /// task wrapped in a context envelope when the caller's delegation
    /// config asks for one.
    pub fn enrich_delegation(&self, caller: &str, task: &str) -> String {
        let config = {
            let document = self.inner.document.read();
            document
                .resolved_agent(caller)
                .and_then(|def| def.delegation)
        };
        let Some(config) = config.filter(|c| c.context_window > 0) else {
            return task.to_string();
        };
        let Some(process) = self.inner.orchestrator.process_for_agent(caller) else {
            return task.to_string();
        };
        team::delegation_envelope(caller, &process.history(), &config, task)
    }

    /// Spawn (or respawn) the process backing an agent.
    fn spawn_agent(&self, name: &str) -> Result<Arc<Process>> {
        if let Some(existing) = self.inner.orchestrator.process_for_agent(name) {
            return Ok(existing);
        }

        if name == meta::MOTHER || name == meta::HERMES {
            return Ok(self.spawn_meta(name));
        }

        let spec = {
            let document = self.inner.document.read();
            let Some(def) = document.resolved_agent(name) else {
                return Err(self.unknown_agent(name));
            };
            self.build_spec(&document, document.with_defaults(def))
        };
        let process = self.inner.orchestrator.spawn(spec);
        if let Some(store) = self.inner.store.read().clone() {
            let messages = store.list_chat_messages(name);
            if !messages.is_empty() {
                process.hydrate(messages);
            }
        }
        Ok(process)
    }

    fn build_spec(&self, document: &Document, def: AgentDef) -> ProcessSpec {
        let mut system_extra = String::new();

        if !def.team.is_empty() {
            let peers: Vec<AgentDef> = def
                .team
                .iter()
                .filter_map(|peer| document.resolved_agent(peer))
                .collect();
            let refs: Vec<&AgentDef> = peers.iter().collect();
            system_extra.push_str(&team::team_prompt_block(&refs));
            if def.delegation.as_ref().is_some_and(|d| d.blackboard) {
                system_extra.push('\n');
                system_extra.push_str(&team::blackboard_prompt_block(&team_group_name(&def.name)));
            }
        }

        let knowledge = load_knowledge(&def.knowledge);
        if !knowledge.is_empty() {
            if !system_extra.is_empty() {
                system_extra.push('\n');
            }
            system_extra.push_str("## Knowledge\n\n");
            system_extra.push_str(&knowledge);
        }

        // Teamed agents always see the delegation surface, blackboard
        // users the blackboard surface, on top of their own tool list.
        let mut tool_names = def.tools.clone();
        if !tool_names.is_empty() {
            if !def.team.is_empty() && !tool_names.iter().any(|t| t == "delegate") {
                tool_names.push("delegate".into());
            }
            if def.delegation.as_ref().is_some_and(|d| d.blackboard) {
                for tool in ["bb_read", "bb_write", "bb_list"] {
                    if !tool_names.iter().any(|t| t == tool) {
                        tool_names.push(tool.into());
                    }
                }
            }
        }

        ProcessSpec {
            task: format!("agent '{}'", def.name),
            system_extra,
            registry: self.inner.registry.filter(&tool_names),
            provider: self.inner.provider.clone(),
            store: self.inner.store.read().clone(),
            parent: None,
            depth: 0,
            agent: def,
        }
    }

    fn spawn_meta(&self, name: &str) -> Arc<Process> {
        let model = self
            .inner
            .document
            .read()
            .settings
            .model
            .clone()
            .unwrap_or_else(|| "default".into());
        let (def, tools): (AgentDef, &[&str]) = if name == meta::MOTHER {
            (meta::mother_def(&model), meta::MOTHER_TOOLS)
        } else {
            (meta::hermes_def(&model), meta::HERMES_TOOLS)
        };
        let tool_names: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        self.inner.orchestrator.spawn(ProcessSpec {
            task: format!("meta agent '{name}'"),
            system_extra: String::new(),
            registry: self.inner.registry.filter(&tool_names),
            provider: self.inner.provider.clone(),
            store: None,
            parent: None,
            depth: 0,
            agent: def,
        })
    }

    fn spawn_meta_agents(&self) {
        self.spawn_meta(meta::MOTHER);
        self.spawn_meta(meta::HERMES);
    }

    fn wire_teams(&self) {
        let agents: Vec<AgentDef> = self.inner.document.read().agents.values().cloned().collect();
        for def in &agents {
            self.wire_team_for(def);
        }
    }

    fn wire_team_for(&self, def: &AgentDef) {
        if def.team.is_empty() {
            return;
        }
        let mut members = vec![def.name.clone()];
        members.extend(def.team.iter().cloned());
        self.inner
            .orchestrator
            .ensure_group(&team_group_name(&def.name), members);
    }

    fn wire_lifecycle_events(&self) {
        let weak = self.downgrade();
        self.inner
            .orchestrator
            .on_process_started(Arc::new(move |process| {
                if let Some(runtime) = weak.upgrade() {
                    runtime.publish(
                        RuntimeEvent::new("process_started", &process.agent().name)
                            .process(process.id()),
                    );
                }
            }));
        let weak = self.downgrade();
        self.inner
            .orchestrator
            .on_process_complete(Arc::new(move |process, result| {
                if let Some(runtime) = weak.upgrade() {
                    runtime.publish(
                        RuntimeEvent::new("process_completed", &process.agent().name)
                            .process(process.id())
                            .data(Value::String(result.to_string())),
                    );
                }
            }));
        let weak = self.downgrade();
        self.inner
            .orchestrator
            .on_process_failed(Arc::new(move |process, error| {
                if let Some(runtime) = weak.upgrade() {
                    runtime.publish(
                        RuntimeEvent::new("process_failed", &process.agent().name)
                            .process(process.id())
                            .data(Value::String(error.to_string())),
                    );
                }
            }));
    }

    fn publish(&self, event: RuntimeEvent) {
        if let Some(sink) = self.inner.sink.read().clone() {
            sink.publish(&event);
        }
    }

    fn unknown_agent(&self, name: &str) -> Error {
        let document = self.inner.document.read();
        let known: Vec<&str> = document.agents.keys().map(String::as_str).collect();
        Error::UnknownName {
            kind: NameKind::Agent,
            name: name.to_string(),
            hint: suggest(name, &known).map(|s| format!("did you mean '{s}'?")),
        }
    }

    fn projects_root(&self) -> PathBuf {
        self.inner
            .document
            .read()
            .settings
            .workspace
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("projects")
    }
}

/// Read `file://` and plain-path knowledge URIs into prompt text.
fn load_knowledge(uris: &[String]) -> String {
    let mut out = String::new();
    for uri in uris {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        match std::fs::read_to_string(path) {
            Ok(content) => {
                out.push_str(&content);
                out.push('\n');
            }
            Err(err) => {
                tracing::warn!(uri = %uri, error = %err, "skipping unreadable knowledge URI");
            }
        }
    }
    out
}
