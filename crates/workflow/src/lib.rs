//! Workflow interpreter: step-tree execution over parsed documents.
//!
//! The interpreter is deliberately self-contained — it sees workflow
//! definitions and an [`AgentCall`] seam, nothing else. The expression
//! language lives in [`expr`] and stays small and total.

pub use {
    expr::{eval, eval_condition, interpolate, to_text, truthy},
    run::{AgentCall, Executor},
    scope::{LoopState, Scope},
};

pub mod expr;
mod run;
mod scope;
