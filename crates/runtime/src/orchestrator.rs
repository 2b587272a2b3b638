//! The orchestrator: process lifetime, groups, and lifecycle fanout.
//!
//! The orchestrator owns every process (an id-keyed arena); processes
//! hold no back-pointer, only a terminal hook that resolves callbacks
//! through a weak arena reference. Lifecycle callbacks run
//! synchronously on the transitioning thread and must not block.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rcore::SupervisionStrategy;
use ulid::Ulid;

use crate::group::Group;
use crate::process::{Process, ProcessSpec, Status, TerminalEvent};

type StartedCallback = Arc<dyn Fn(&Arc<Process>) + Send + Sync>;
type CompletedCallback = Arc<dyn Fn(&Arc<Process>, &str) + Send + Sync>;
type FailedCallback = Arc<dyn Fn(&Arc<Process>, &str) + Send + Sync>;

/// One node of the spawn tree.
#[derive(Debug, Clone)]
pub struct SpawnNode {
    /// Process id.
    pub id: Ulid,
    /// Agent name.
    pub agent: String,
    /// Current status.
    pub status: Status,
    /// Depth in the tree.
    pub depth: u32,
    /// Children spawned by this process.
    pub children: Vec<SpawnNode>,
}

pub(crate) struct Inner {
    processes: RwLock<BTreeMap<Ulid, Arc<Process>>>,
    by_agent: RwLock<BTreeMap<String, Ulid>>,
    groups: RwLock<BTreeMap<String, Arc<Group>>>,
    on_started: RwLock<Option<StartedCallback>>,
    on_completed: RwLock<Option<CompletedCallback>>,
    on_failed: RwLock<Option<FailedCallback>>,
    restarts: Mutex<BTreeMap<String, Vec<Instant>>>,
}

/// Owns processes and groups; applies supervision on failures.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Create an empty orchestrator.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                processes: RwLock::new(BTreeMap::new()),
                by_agent: RwLock::new(BTreeMap::new()),
                groups: RwLock::new(BTreeMap::new()),
                on_started: RwLock::new(None),
                on_completed: RwLock::new(None),
                on_failed: RwLock::new(None),
                restarts: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Spawn a process from its spec.
    pub fn spawn(&self, spec: ProcessSpec) -> Arc<Process> {
        let process = Process::new(spec);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        process.set_terminal_hook(Arc::new(move |proc, event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_terminal(proc.id(), event);
            }
        }));

        tracing::info!(
            process = %process.id(),
            agent = %process.agent().name,
            "process spawned"
        );
        self.inner
            .processes
            .write()
            .insert(process.id(), process.clone());
        self.inner
            .by_agent
            .write()
            .insert(process.agent().name.clone(), process.id());

        if let Some(callback) = self.inner.on_started.read().clone() {
            callback(&process);
        }
        process
    }

    /// Stop and remove a process. Returns whether it existed.
    pub fn kill(&self, id: Ulid) -> bool {
        let Some(process) = self.inner.processes.write().remove(&id) else {
            return false;
        };
        process.stop();
        let mut by_agent = self.inner.by_agent.write();
        if by_agent.get(&process.agent().name) == Some(&id) {
            by_agent.remove(&process.agent().name);
        }
        tracing::info!(process = %id, "process killed");
        true
    }

    /// Look up a process by id.
    pub fn get(&self, id: Ulid) -> Option<Arc<Process>> {
        self.inner.processes.read().get(&id).cloned()
    }

    /// The current process for an agent, if one is registered.
    pub fn process_for_agent(&self, agent: &str) -> Option<Arc<Process>> {
        let id = *self.inner.by_agent.read().get(agent)?;
        self.get(id)
    }

    /// All processes.
    pub fn list(&self) -> Vec<Arc<Process>> {
        self.inner.processes.read().values().cloned().collect()
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.inner.groups.read().get(name).cloned()
    }

    /// Get or create a group, merging members into an existing one.
    pub fn ensure_group(&self, name: &str, members: Vec<String>) -> Arc<Group> {
        let mut groups = self.inner.groups.write();
        if let Some(group) = groups.get(name) {
            for member in members {
                group.add_member(member);
            }
            return group.clone();
        }
        let group = Arc::new(Group::new(name, members));
        groups.insert(name.to_string(), group.clone());
        group
    }

    /// First group an agent belongs to, if any.
    pub fn group_for_member(&self, agent: &str) -> Option<Arc<Group>> {
        self.inner
            .groups
            .read()
            .values()
            .find(|g| g.contains(agent))
            .cloned()
    }

    /// All group names.
    pub fn group_names(&self) -> Vec<String> {
        self.inner.groups.read().keys().cloned().collect()
    }

    /// Hierarchical view of the processes via parent links.
    pub fn spawn_tree(&self) -> Vec<SpawnNode> {
        let processes = self.inner.processes.read();
        let mut children: BTreeMap<Option<Ulid>, Vec<Ulid>> = BTreeMap::new();
        for (id, process) in processes.iter() {
            let parent = process
                .parent_id()
                .filter(|p| processes.contains_key(p));
            children.entry(parent).or_default().push(*id);
        }

        fn build(
            id: Ulid,
            processes: &BTreeMap<Ulid, Arc<Process>>,
            children: &BTreeMap<Option<Ulid>, Vec<Ulid>>,
        ) -> SpawnNode {
            let process = &processes[&id];
            SpawnNode {
                id,
                agent: process.agent().name.clone(),
                status: process.status(),
                depth: process.spawn_depth(),
                children: children
                    .get(&Some(id))
                    .into_iter()
                    .flatten()
                    .map(|child| build(*child, processes, children))
                    .collect(),
            }
        }

        children
            .get(&None)
            .into_iter()
            .flatten()
            .map(|root| build(*root, &processes, &children))
            .collect()
    }

    /// Stop every process and clear the maps.
    pub async fn shutdown(&self, _ctx: &rcore::Ctx) {
        let processes: Vec<Arc<Process>> = {
            let mut map = self.inner.processes.write();
            let list = map.values().cloned().collect();
            map.clear();
            list
        };
        self.inner.by_agent.write().clear();
        for process in processes {
            process.stop();
        }
        tracing::info!("orchestrator shut down");
    }

    /// Set the process-started callback.
    pub fn on_process_started(&self, callback: StartedCallback) {
        *self.inner.on_started.write() = Some(callback);
    }

    /// Set the process-completed callback.
    pub fn on_process_complete(&self, callback: CompletedCallback) {
        *self.inner.on_completed.write() = Some(callback);
    }

    /// Set the process-failed callback.
    pub fn on_process_failed(&self, callback: FailedCallback) {
        *self.inner.on_failed.write() = Some(callback);
    }
}

impl Inner {
    fn handle_terminal(self: Arc<Self>, id: Ulid, event: &TerminalEvent) {
        let Some(process) = self.processes.read().get(&id).cloned() else {
            return;
        };
        match event {
            TerminalEvent::Completed(result) => {
                if let Some(callback) = self.on_completed.read().clone() {
                    callback(&process, result);
                }
            }
            TerminalEvent::Failed(error) => {
                self.supervise(&process);
                if let Some(callback) = self.on_failed.read().clone() {
                    callback(&process, error);
                }
            }
        }
    }

    /// Apply the agent's supervision strategy after a failure.
    fn supervise(self: &Arc<Self>, process: &Arc<Process>) {
        let agent = process.agent().clone();
        let Some(supervision) = agent.supervision.clone() else {
            return;
        };
        match supervision.strategy {
            SupervisionStrategy::Stop => {}
            SupervisionStrategy::Escalate => {
                if let Some(parent) = process.parent_id().and_then(|p| self.processes.read().get(&p).cloned()) {
                    tracing::warn!(
                        child = %process.id(),
                        parent = %parent.id(),
                        "escalating failure to parent"
                    );
                    parent.fail(&rcore::Error::Upstream(format!(
                        "child process '{}' failed",
                        agent.name
                    )));
                }
            }
            SupervisionStrategy::Restart => {
                let now = Instant::now();
                let allowed = {
                    let mut restarts = self.restarts.lock();
                    let log = restarts.entry(agent.name.clone()).or_default();
                    log.retain(|t| now.duration_since(*t) <= supervision.window);
                    if log.len() < supervision.max_restarts as usize {
                        log.push(now);
                        true
                    } else {
                        false
                    }
                };
                if !allowed {
                    tracing::error!(
                        agent = %agent.name,
                        max = supervision.max_restarts,
                        "restart budget exhausted"
                    );
                    return;
                }

                let replacement = Process::new(process.respawn_spec());
                let weak: Weak<Inner> = Arc::downgrade(self);
                replacement.set_terminal_hook(Arc::new(move |proc, event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_terminal(proc.id(), event);
                    }
                }));
                tracing::warn!(
                    agent = %agent.name,
                    old = %process.id(),
                    new = %replacement.id(),
                    "restarting failed process"
                );
                self.processes
                    .write()
                    .insert(replacement.id(), replacement.clone());
                self.by_agent
                    .write()
                    .insert(agent.name.clone(), replacement.id());
                if let Some(callback) = self.on_started.read().clone() {
                    callback(&replacement);
                }
            }
        }
    }
}
