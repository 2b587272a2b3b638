//! Core types for the reef agent runtime.
//!
//! Everything here is runtime-free: the document model, the parser and
//! validator, the error kinds, the cancellation context, and the tool
//! envelope format. Execution lives in the sibling crates.

pub use {
    agent::{
        AgentDef, Backoff, DelegationConfig, RemoteServerConfig, RemoteTransport, RetryConfig,
        Settings, SupervisionConfig, SupervisionStrategy, parse_budget, parse_duration,
    },
    ctx::Ctx,
    document::{Document, ToolDefinition, ToolImpl},
    error::{Diagnostic, Error, NameKind, Result},
    message::{
        Message, ParsedToolResult, Role, encode_tool_result, encode_tool_use, parse_tool_results,
    },
    parse::{RESERVED_STEP_KEYS, load, parse_document, yaml_to_json},
    schema::{InputSchema, ParamSpec, ParamType, ToolSchema},
    step::{
        CallStep, DEFAULT_REPEAT_MAX, ForEachStep, IfStep, InputDef, Output, RepeatStep, Step,
        SubWorkflowStep, TryStep, WorkflowDef,
    },
    validate::{MOTHER, suggest, validate},
};

mod agent;
mod ctx;
mod document;
mod emit;
mod error;
mod message;
mod parse;
mod schema;
mod step;
mod validate;
