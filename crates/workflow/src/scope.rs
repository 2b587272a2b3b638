//! Variable scope for one workflow invocation.
//!
//! Variables are scoped per invocation. Parallel branches receive a
//! shallow copy via [`Scope::branch`]; their `save` bindings are logged
//! and merged back into the parent after the step completes.

use serde_json::Value;
use std::collections::BTreeMap;

/// Synthetic loop state visible as `loop.*` and `item`.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Zero-based iteration index.
    pub index: usize,
    /// Total iteration count.
    pub count: usize,
    /// Current element for for-each loops; null for repeat loops.
    pub item: Value,
}

impl LoopState {
    /// Whether this is the first iteration.
    pub fn first(&self) -> bool {
        self.index == 0
    }

    /// Whether this is the last iteration.
    pub fn last(&self) -> bool {
        self.index + 1 == self.count
    }
}

/// Per-invocation variable scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    inputs: BTreeMap<String, Value>,
    vars: BTreeMap<String, Value>,
    /// Active loop state, if executing inside a loop body.
    pub loop_state: Option<LoopState>,
    saves: Vec<(String, Value)>,
}

impl Scope {
    /// Create a scope over validated workflow inputs.
    pub fn new(inputs: BTreeMap<String, Value>) -> Self {
        Self {
            inputs,
            ..Default::default()
        }
    }

    /// Resolve a bare name: variables, then inputs, then loop state.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.get(name) {
            return Some(v.clone());
        }
        if let Some(v) = self.inputs.get(name) {
            return Some(v.clone());
        }
        if let Some(state) = &self.loop_state {
            match name {
                "item" => return Some(state.item.clone()),
                "loop.index" => return Some(Value::from(state.index)),
                "loop.count" => return Some(Value::from(state.count)),
                "loop.first" => return Some(Value::Bool(state.first())),
                "loop.last" => return Some(Value::Bool(state.last())),
                _ => {}
            }
        }
        None
    }

    /// Bind a variable.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Bind a variable and log it for parallel merge-back.
    pub fn save(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.saves.push((name.clone(), value.clone()));
        self.vars.insert(name, value);
    }

    /// Shallow copy for a parallel branch, with an empty save log.
    pub fn branch(&self) -> Self {
        Self {
            inputs: self.inputs.clone(),
            vars: self.vars.clone(),
            loop_state: self.loop_state.clone(),
            saves: Vec::new(),
        }
    }

    /// Drain the save log.
    pub fn take_saves(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.saves)
    }

    /// Merge saves from a completed branch, last writer wins.
    pub fn merge_saves(&mut self, saves: Vec<(String, Value)>) {
        for (name, value) in saves {
            self.save(name, value);
        }
    }

    /// Read a variable directly (tests and output evaluation).
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_shadow_inputs() {
        let mut inputs = BTreeMap::new();
        inputs.insert("x".to_string(), Value::from("input"));
        let mut scope = Scope::new(inputs);
        assert_eq!(scope.lookup("x"), Some(Value::from("input")));
        scope.set_var("x", Value::from("var"));
        assert_eq!(scope.lookup("x"), Some(Value::from("var")));
    }

    #[test]
    fn loop_state_synthetics() {
        let mut scope = Scope::default();
        scope.loop_state = Some(LoopState {
            index: 1,
            count: 2,
            item: Value::from("b"),
        });
        assert_eq!(scope.lookup("item"), Some(Value::from("b")));
        assert_eq!(scope.lookup("loop.index"), Some(Value::from(1)));
        assert_eq!(scope.lookup("loop.first"), Some(Value::Bool(false)));
        assert_eq!(scope.lookup("loop.last"), Some(Value::Bool(true)));
    }

    #[test]
    fn branch_saves_merge_back() {
        let mut parent = Scope::default();
        let mut branch = parent.branch();
        branch.save("r1", Value::from("x"));
        branch.set_var("scratch", Value::from("local"));
        let saves = branch.take_saves();
        parent.merge_saves(saves);
        assert_eq!(parent.var("r1"), Some(&Value::from("x")));
        // Plain variable writes stay branch-local.
        assert!(parent.var("scratch").is_none());
    }
}
