//! Workflow step AST.
//!
//! A [`Step`] is a tagged sum over the step flavors; the active variant
//! is decided at parse time, never by probing map keys at execution.

use std::time::Duration;

/// A single node in a workflow step tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Send a message to an agent.
    Call(CallStep),
    /// Bind variables to interpolated values.
    Set(Vec<(String, String)>),
    /// Evaluate the expression and exit the workflow with the value.
    Return(String),
    /// Conditional branch.
    If(IfStep),
    /// Run branches concurrently.
    Parallel(Vec<Step>),
    /// Repeat the body until a condition holds.
    Repeat(RepeatStep),
    /// Iterate over a collection.
    ForEach(ForEachStep),
    /// Invoke another workflow.
    Workflow(SubWorkflowStep),
    /// Run a body, recovering from the first error.
    Try(TryStep),
}

/// An agent-call step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallStep {
    /// Target agent name.
    pub agent: String,
    /// Free-text action phrase from the step key. Stored for
    /// observability, not interpreted.
    pub action: Option<String>,
    /// Message template sent to the agent.
    pub send: String,
    /// Variable name the response is bound to.
    pub save: Option<String>,
    /// Per-step timeout.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt.
    pub retry: u32,
    /// Guard expression; a falsy guard skips the step.
    pub guard: Option<String>,
    /// On error, bind the message to `error` and continue.
    pub continue_on_error: bool,
    /// Response format hint. Stored for observability.
    pub format: Option<String>,
}

/// A conditional step.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStep {
    /// Condition expression.
    pub condition: String,
    /// Steps when the condition holds.
    pub then: Vec<Step>,
    /// Steps when it does not.
    pub otherwise: Vec<Step>,
}

/// Default iteration cap for repeat loops.
pub const DEFAULT_REPEAT_MAX: u32 = 100;

/// A repeat-until step.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatStep {
    /// Loop body, executed at least once.
    pub body: Vec<Step>,
    /// Exit condition, checked after each pass.
    pub until: String,
    /// Iteration cap.
    pub max: u32,
}

/// A for-each step.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachStep {
    /// Loop variable name.
    pub var: String,
    /// Expression yielding the collection.
    pub collection: String,
    /// Loop body.
    pub body: Vec<Step>,
}

/// A sub-workflow call step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubWorkflowStep {
    /// Target workflow name.
    pub workflow: String,
    /// Input templates keyed by input name.
    pub with: Vec<(String, String)>,
    /// Variable name the result is bound to.
    pub save: Option<String>,
}

/// A try/catch step.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStep {
    /// Protected body.
    pub body: Vec<Step>,
    /// Recovery body; sees the failure message as `error`.
    pub catch: Vec<Step>,
}

impl Step {
    /// Short tag for traces and diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Set(_) => "set",
            Self::Return(_) => "return",
            Self::If(_) => "if",
            Self::Parallel(_) => "parallel",
            Self::Repeat(_) => "repeat",
            Self::ForEach(_) => "for",
            Self::Workflow(_) => "workflow",
            Self::Try(_) => "try",
        }
    }

    /// Visit this step and all nested steps, depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Step)) {
        visit(self);
        match self {
            Self::If(s) => {
                for step in s.then.iter().chain(&s.otherwise) {
                    step.walk(visit);
                }
            }
            Self::Parallel(branches) => {
                for step in branches {
                    step.walk(visit);
                }
            }
            Self::Repeat(s) => {
                for step in &s.body {
                    step.walk(visit);
                }
            }
            Self::ForEach(s) => {
                for step in &s.body {
                    step.walk(visit);
                }
            }
            Self::Try(s) => {
                for step in s.body.iter().chain(&s.catch) {
                    step.walk(visit);
                }
            }
            Self::Call(_) | Self::Set(_) | Self::Return(_) | Self::Workflow(_) => {}
        }
    }
}

/// A declared workflow input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputDef {
    /// Input name.
    pub name: String,
    /// Wire type string.
    pub input_type: String,
    /// Human-readable description.
    pub description: String,
    /// Whether the input must be supplied. An input with a default is
    /// treated as non-required.
    pub required: bool,
    /// Default value when absent.
    pub default: Option<serde_json::Value>,
    /// Allowed values, if closed.
    pub allowed: Option<Vec<String>>,
}

/// Workflow output declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A single string template.
    Template(String),
    /// A map of string templates, interpolated value-wise.
    Map(Vec<(String, String)>),
}

/// A declarative workflow.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowDef {
    /// Workflow name.
    pub name: String,
    /// What the workflow does.
    pub description: String,
    /// Declared inputs, in declaration order.
    pub inputs: Vec<InputDef>,
    /// The step tree.
    pub steps: Vec<Step>,
    /// Output declaration; `None` falls back to the `result` variable.
    pub output: Option<Output>,
}

impl WorkflowDef {
    /// Look up an input declaration by name.
    pub fn input(&self, name: &str) -> Option<&InputDef> {
        self.inputs.iter().find(|i| i.name == name)
    }
}
