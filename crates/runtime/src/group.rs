//! Process groups and the shared blackboard.
//!
//! A group is a named set of member agents with a concurrent key/value
//! store. The blackboard is the only sanctioned inter-agent shared
//! state; processes never read each other's conversation history.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Prefix of auto-created team groups: `team:<leader>`.
pub const TEAM_GROUP_PREFIX: &str = "team:";

/// A named set of member agents sharing a blackboard.
pub struct Group {
    name: String,
    members: Mutex<Vec<String>>,
    board: Mutex<BTreeMap<String, Value>>,
}

impl Group {
    /// Create a group with the given members.
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members: Mutex::new(members),
            board: Mutex::new(BTreeMap::new()),
        }
    }

    /// The group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member agent names.
    pub fn members(&self) -> Vec<String> {
        self.members.lock().clone()
    }

    /// Whether an agent belongs to this group.
    pub fn contains(&self, agent: &str) -> bool {
        self.members.lock().iter().any(|m| m == agent)
    }

    /// Add a member if not already present.
    pub fn add_member(&self, agent: impl Into<String>) {
        let agent = agent.into();
        let mut members = self.members.lock();
        if !members.contains(&agent) {
            members.push(agent);
        }
    }

    /// Remove a member. Returns whether it was present.
    pub fn remove_member(&self, agent: &str) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|m| m != agent);
        members.len() != before
    }

    /// Read a blackboard value.
    pub fn bb_get(&self, key: &str) -> Option<Value> {
        self.board.lock().get(key).cloned()
    }

    /// Write a blackboard value. Last write wins.
    pub fn bb_set(&self, key: impl Into<String>, value: Value) {
        self.board.lock().insert(key.into(), value);
    }

    /// All blackboard keys. Ordering is an implementation detail.
    pub fn bb_keys(&self) -> Vec<String> {
        self.board.lock().keys().cloned().collect()
    }
}

/// The auto-created group name for a team leader.
pub fn team_group_name(leader: &str) -> String {
    format!("{TEAM_GROUP_PREFIX}{leader}")
}
