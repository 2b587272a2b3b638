//! Document parsing: YAML text into the typed AST.
//!
//! Two passes. Pass 1 is a lenient `serde_yml` load into an untyped
//! value; pass 2 walks it into [`Document`] records, producing
//! field-scoped diagnostics. Unknown top-level keys are tolerated.
//!
//! Step parsing is key-driven: structural keys (`if`, `parallel`,
//! `repeat`, `for`, `workflow`, `set`, `return`, `try`) select the step
//! flavor; otherwise the first key outside the reserved set is read as
//! `<agent-name> [action-phrase]`.

use std::collections::BTreeMap;

use serde_yml::Value;

use crate::agent::{
    AgentDef, Backoff, DelegationConfig, RemoteServerConfig, RemoteTransport, RetryConfig,
    Settings, SupervisionConfig, SupervisionStrategy, parse_duration,
};
use crate::document::{Document, ToolDefinition, ToolImpl};
use crate::error::{Diagnostic, Error, Result};
use crate::message::Role;
use crate::schema::{ParamSpec, ParamType};
use crate::step::{
    CallStep, DEFAULT_REPEAT_MAX, ForEachStep, IfStep, InputDef, Output, RepeatStep, Step,
    SubWorkflowStep, TryStep, WorkflowDef,
};

/// Step option keys that can never be an agent name.
pub const RESERVED_STEP_KEYS: &[&str] = &[
    "if",
    "then",
    "else",
    "parallel",
    "repeat",
    "for",
    "workflow",
    "with",
    "set",
    "return",
    "try",
    "catch",
    "save",
    "timeout",
    "budget",
    "retry",
    "continue_on_error",
    "format",
];

/// Parse a YAML document into the typed AST. Does not cross-validate
/// names; see [`crate::validate::validate`] for that.
pub fn parse_document(source: &str) -> Result<Document> {
    let value: Value = serde_yml::from_str(source)
        .map_err(|e| Error::validation("document", format!("invalid YAML: {e}")))?;
    let Some(root) = value.as_mapping() else {
        return Err(Error::validation("document", "top level must be a mapping"));
    };

    let mut diags = Vec::new();
    let mut doc = Document {
        name: str_field(root, "name").unwrap_or_default(),
        description: str_field(root, "description").unwrap_or_default(),
        ..Default::default()
    };

    if let Some(settings) = root.get("settings") {
        match parse_settings(settings) {
            Ok(s) => doc.settings = s,
            Err(e) => push_error(&mut diags, e),
        }
    }

    if let Some(agents) = root.get("agents") {
        match agents.as_mapping() {
            Some(mapping) => {
                for (key, value) in mapping {
                    let Some(name) = key.as_str() else { continue };
                    match parse_agent(name, value) {
                        Ok(agent) => {
                            doc.agents.insert(name.to_string(), agent);
                        }
                        Err(e) => push_error(&mut diags, e),
                    }
                }
            }
            None => diags.push(Diagnostic::new("agents", "must be a mapping")),
        }
    }

    if let Some(workflows) = root.get("workflows") {
        match workflows.as_mapping() {
            Some(mapping) => {
                for (key, value) in mapping {
                    let Some(name) = key.as_str() else { continue };
                    match parse_workflow(name, value) {
                        Ok(workflow) => {
                            doc.workflows.insert(name.to_string(), workflow);
                        }
                        Err(e) => push_error(&mut diags, e),
                    }
                }
            }
            None => diags.push(Diagnostic::new("workflows", "must be a mapping")),
        }
    }

    if let Some(tools) = root.get("tools") {
        match tools.as_mapping() {
            Some(mapping) => {
                for (key, value) in mapping {
                    let Some(name) = key.as_str() else { continue };
                    match parse_tool(name, value) {
                        Ok(tool) => {
                            doc.tools.insert(name.to_string(), tool);
                        }
                        Err(e) => push_error(&mut diags, e),
                    }
                }
            }
            None => diags.push(Diagnostic::new("tools", "must be a mapping")),
        }
    }

    if diags.is_empty() {
        Ok(doc)
    } else {
        Err(Error::Validation(diags))
    }
}

/// Parse and validate in one call.
pub fn load(source: &str) -> Result<Document> {
    let doc = parse_document(source)?;
    crate::validate::validate(&doc)?;
    tracing::debug!(
        name = %doc.name,
        agents = doc.agents.len(),
        workflows = doc.workflows.len(),
        "document loaded"
    );
    Ok(doc)
}

fn push_error(diags: &mut Vec<Diagnostic>, err: Error) {
    match err {
        Error::Validation(mut more) => diags.append(&mut more),
        other => diags.push(Diagnostic::new("document", other.to_string())),
    }
}

fn parse_settings(value: &Value) -> Result<Settings> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation("settings", "must be a mapping"));
    };
    let mut settings = Settings {
        model: str_field(map, "model"),
        temperature: map.get("temperature").and_then(Value::as_f64),
        workspace: str_field(map, "workspace").map(Into::into),
        ..Default::default()
    };
    if let Some(vars) = map.get("variables").and_then(Value::as_mapping) {
        for (k, v) in vars {
            if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                settings.variables.insert(k.to_string(), v);
            }
        }
    }
    if let Some(servers) = map.get("servers").and_then(Value::as_sequence) {
        for (i, server) in servers.iter().enumerate() {
            settings
                .servers
                .push(parse_server(&format!("settings.servers[{i}]"), server)?);
        }
    }
    Ok(settings)
}

fn parse_server(field: &str, value: &Value) -> Result<RemoteServerConfig> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(field, "must be a mapping"));
    };
    let name = str_field(map, "name")
        .ok_or_else(|| Error::validation(field, "server requires a name"))?;
    let transport = match str_field(map, "transport").as_deref() {
        Some("http") => RemoteTransport::Http {
            url: str_field(map, "url")
                .ok_or_else(|| Error::validation(field, "http transport requires url"))?,
        },
        Some("sse") => RemoteTransport::Sse {
            url: str_field(map, "url")
                .ok_or_else(|| Error::validation(field, "sse transport requires url"))?,
        },
        Some("stdio") | None => {
            let command = str_field(map, "command")
                .ok_or_else(|| Error::validation(field, "stdio transport requires command"))?;
            let args = str_list(map, "args");
            let mut env = BTreeMap::new();
            if let Some(vars) = map.get("env").and_then(Value::as_mapping) {
                for (k, v) in vars {
                    if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                        env.insert(k.to_string(), v);
                    }
                }
            }
            RemoteTransport::Stdio { command, args, env }
        }
        Some(other) => {
            return Err(Error::validation(
                field,
                format!("unknown transport '{other}'"),
            ));
        }
    };
    Ok(RemoteServerConfig { name, transport })
}

fn parse_agent(name: &str, value: &Value) -> Result<AgentDef> {
    let field = format!("agents.{name}");
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(field, "must be a mapping"));
    };

    let mut agent = AgentDef {
        name: name.to_string(),
        extends: str_field(map, "extends"),
        model: str_field(map, "model").unwrap_or_default(),
        fallback_model: str_field(map, "fallback_model"),
        system: str_field(map, "system").unwrap_or_default(),
        temperature: map.get("temperature").and_then(Value::as_f64),
        budget: str_field(map, "budget"),
        tools: str_list(map, "tools"),
        knowledge: str_list(map, "knowledge"),
        team: str_list(map, "team"),
        skills: str_list(map, "skills"),
        ..Default::default()
    };

    if let Some(sup) = map.get("supervision") {
        agent.supervision = Some(parse_supervision(&field, sup)?);
    }
    if let Some(retry) = map.get("retry") {
        agent.retry = Some(parse_retry(&field, retry)?);
    }
    if let Some(delegation) = map.get("delegation") {
        agent.delegation = Some(parse_delegation(&field, delegation)?);
    }

    Ok(agent)
}

fn parse_supervision(field: &str, value: &Value) -> Result<SupervisionConfig> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(
            format!("{field}.supervision"),
            "must be a mapping",
        ));
    };
    let mut config = SupervisionConfig::default();
    if let Some(strategy) = str_field(map, "strategy") {
        config.strategy = SupervisionStrategy::parse(&strategy)?;
    }
    if let Some(max) = map.get("max_restarts").and_then(Value::as_u64) {
        config.max_restarts = max as u32;
    }
    if let Some(window) = str_field(map, "window") {
        config.window = parse_duration(&window)?;
    }
    Ok(config)
}

fn parse_retry(field: &str, value: &Value) -> Result<RetryConfig> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(
            format!("{field}.retry"),
            "must be a mapping",
        ));
    };
    let mut config = RetryConfig::default();
    if let Some(attempts) = map.get("attempts").and_then(Value::as_u64) {
        config.attempts = attempts as u32;
    }
    if let Some(backoff) = str_field(map, "backoff") {
        config.backoff = Backoff::parse(&backoff)?;
    }
    if let Some(delay) = str_field(map, "delay") {
        config.delay = parse_duration(&delay)?;
    }
    Ok(config)
}

fn parse_delegation(field: &str, value: &Value) -> Result<DelegationConfig> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(
            format!("{field}.delegation"),
            "must be a mapping",
        ));
    };
    let mut config = DelegationConfig {
        context_window: map
            .get("context_window")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        blackboard: map
            .get("blackboard")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ..Default::default()
    };
    for role in str_list(map, "include_roles") {
        let role = match role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => {
                return Err(Error::validation(
                    format!("{field}.delegation.include_roles"),
                    format!("unknown role '{other}'"),
                ));
            }
        };
        config.include_roles.push(role);
    }
    Ok(config)
}

fn parse_workflow(name: &str, value: &Value) -> Result<WorkflowDef> {
    let field = format!("workflows.{name}");
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(field, "must be a mapping"));
    };

    let mut workflow = WorkflowDef {
        name: name.to_string(),
        description: str_field(map, "description").unwrap_or_default(),
        ..Default::default()
    };

    if let Some(inputs) = map.get("inputs").and_then(Value::as_mapping) {
        for (key, value) in inputs {
            let Some(input_name) = key.as_str() else { continue };
            workflow
                .inputs
                .push(parse_input(&field, input_name, value)?);
        }
    }

    if let Some(steps) = map.get("steps") {
        let Some(seq) = steps.as_sequence() else {
            return Err(Error::validation(format!("{field}.steps"), "must be a list"));
        };
        workflow.steps = parse_steps(&format!("{field}.steps"), seq)?;
    }

    if let Some(output) = map.get("output") {
        workflow.output = Some(match output {
            Value::Mapping(map) => {
                let mut templates = Vec::new();
                for (k, v) in map {
                    if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                        templates.push((k.to_string(), v));
                    }
                }
                Output::Map(templates)
            }
            other => Output::Template(scalar_string(other).unwrap_or_default()),
        });
    }

    Ok(workflow)
}

fn parse_input(field: &str, name: &str, value: &Value) -> Result<InputDef> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(
            format!("{field}.inputs.{name}"),
            "must be a mapping",
        ));
    };
    let default = map.get("default").map(yaml_to_json);
    Ok(InputDef {
        name: name.to_string(),
        input_type: str_field(map, "type").unwrap_or_else(|| "string".into()),
        description: str_field(map, "description").unwrap_or_default(),
        // A defaulted input is never required.
        required: default.is_none()
            && map.get("required").and_then(Value::as_bool).unwrap_or(true),
        default,
        allowed: map
            .get("enum")
            .and_then(Value::as_sequence)
            .map(|seq| seq.iter().filter_map(scalar_string).collect()),
    })
}

/// Parse a step list.
pub fn parse_steps(field: &str, seq: &[Value]) -> Result<Vec<Step>> {
    seq.iter()
        .enumerate()
        .map(|(i, value)| parse_step(&format!("{field}[{i}]"), value))
        .collect()
}

/// Parse a single step. Dispatch order: conditional, parallel, repeat,
/// for-each, sub-workflow, set, return, try/catch, agent call.
pub fn parse_step(field: &str, value: &Value) -> Result<Step> {
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(field, "step must be a mapping"));
    };

    if map.get("if").is_some() && (map.get("then").is_some() || map.get("else").is_some()) {
        let condition = str_field(map, "if")
            .ok_or_else(|| Error::validation(field, "'if' condition must be a string"))?;
        return Ok(Step::If(IfStep {
            condition,
            then: nested_steps(field, map.get("then"), "then")?,
            otherwise: nested_steps(field, map.get("else"), "else")?,
        }));
    }

    if let Some(branches) = map.get("parallel") {
        let Some(seq) = branches.as_sequence() else {
            return Err(Error::validation(field, "'parallel' must be a list"));
        };
        return Ok(Step::Parallel(parse_steps(&format!("{field}.parallel"), seq)?));
    }

    if let Some(body) = map.get("repeat") {
        let Some(seq) = body.as_sequence() else {
            return Err(Error::validation(field, "'repeat' must be a list"));
        };
        let until = str_field(map, "until")
            .ok_or_else(|| Error::validation(field, "'repeat' requires an 'until' condition"))?;
        return Ok(Step::Repeat(RepeatStep {
            body: parse_steps(&format!("{field}.repeat"), seq)?,
            until,
            max: map
                .get("max")
                .and_then(Value::as_u64)
                .map(|m| m as u32)
                .unwrap_or(DEFAULT_REPEAT_MAX),
        }));
    }

    if let Some(phrase) = map.get("for") {
        let Some(phrase) = phrase.as_str() else {
            return Err(Error::validation(field, "'for' must be a '<var> in <expr>' phrase"));
        };
        let Some((var, collection)) = phrase.split_once(" in ") else {
            return Err(Error::validation(
                field,
                format!("'for' phrase '{phrase}' must be '<var> in <expr>'"),
            ));
        };
        let Some(body) = map.get("do").and_then(Value::as_sequence) else {
            return Err(Error::validation(field, "'for' requires a 'do' list"));
        };
        return Ok(Step::ForEach(ForEachStep {
            var: var.trim().to_string(),
            collection: collection.trim().to_string(),
            body: parse_steps(&format!("{field}.do"), body)?,
        }));
    }

    if let Some(workflow) = map.get("workflow") {
        let Some(workflow) = workflow.as_str() else {
            return Err(Error::validation(field, "'workflow' must be a name"));
        };
        let mut with = Vec::new();
        if let Some(inputs) = map.get("with").and_then(Value::as_mapping) {
            for (k, v) in inputs {
                if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                    with.push((k.to_string(), v));
                }
            }
        }
        return Ok(Step::Workflow(SubWorkflowStep {
            workflow: workflow.to_string(),
            with,
            save: str_field(map, "save"),
        }));
    }

    if let Some(bindings) = map.get("set") {
        let Some(bindings) = bindings.as_mapping() else {
            return Err(Error::validation(field, "'set' must be a mapping"));
        };
        let mut set = Vec::new();
        for (k, v) in bindings {
            if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                set.push((k.to_string(), v));
            }
        }
        return Ok(Step::Set(set));
    }

    if let Some(expr) = map.get("return") {
        let Some(expr) = scalar_string(expr) else {
            return Err(Error::validation(field, "'return' must be a scalar"));
        };
        return Ok(Step::Return(expr));
    }

    if map.get("try").is_some() {
        return Ok(Step::Try(TryStep {
            body: nested_steps(field, map.get("try"), "try")?,
            catch: nested_steps(field, map.get("catch"), "catch")?,
        }));
    }

    parse_call(field, map)
}

fn nested_steps(field: &str, value: Option<&Value>, key: &str) -> Result<Vec<Step>> {
    match value {
        None => Ok(Vec::new()),
        Some(value) => {
            let Some(seq) = value.as_sequence() else {
                return Err(Error::validation(field, format!("'{key}' must be a list")));
            };
            parse_steps(&format!("{field}.{key}"), seq)
        }
    }
}

fn parse_call(field: &str, map: &serde_yml::Mapping) -> Result<Step> {
    let agent_key = map
        .iter()
        .filter_map(|(k, _)| k.as_str())
        .find(|k| !RESERVED_STEP_KEYS.contains(k))
        .ok_or_else(|| {
            Error::validation(field, "step has no agent key and no structural keyword")
        })?;

    // Key grammar: `<AgentName>[ <action-phrase>][:]`.
    let trimmed = agent_key.trim_end_matches(':');
    let (agent, action) = match trimmed.split_once(' ') {
        Some((agent, action)) => (agent.to_string(), Some(action.trim().to_string())),
        None => (trimmed.to_string(), None),
    };

    let mut call = CallStep {
        agent,
        action: action.filter(|a| !a.is_empty()),
        ..Default::default()
    };

    match map.get(agent_key) {
        Some(Value::String(send)) => call.send = send.clone(),
        Some(Value::Mapping(opts)) => {
            call.send = str_field(opts, "send").ok_or_else(|| {
                Error::validation(field, format!("agent step '{}' requires 'send'", call.agent))
            })?;
            call.save = str_field(opts, "save");
            call.guard = str_field(opts, "if");
            call.format = str_field(opts, "format");
            call.retry = opts.get("retry").and_then(Value::as_u64).unwrap_or(0) as u32;
            call.continue_on_error = opts
                .get("continue_on_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if let Some(timeout) = str_field(opts, "timeout") {
                call.timeout = Some(parse_duration(&timeout)?);
            }
        }
        _ => {
            return Err(Error::validation(
                field,
                format!("agent step '{}' must map to a string or options", call.agent),
            ));
        }
    }

    Ok(Step::Call(call))
}

fn parse_tool(name: &str, value: &Value) -> Result<ToolDefinition> {
    let field = format!("tools.{name}");
    let Some(map) = value.as_mapping() else {
        return Err(Error::validation(field, "must be a mapping"));
    };

    let mut params = Vec::new();
    if let Some(list) = map.get("parameters").and_then(Value::as_sequence) {
        for (i, param) in list.iter().enumerate() {
            let Some(pmap) = param.as_mapping() else {
                return Err(Error::validation(
                    format!("{field}.parameters[{i}]"),
                    "must be a mapping",
                ));
            };
            let pname = str_field(pmap, "name").ok_or_else(|| {
                Error::validation(format!("{field}.parameters[{i}]"), "parameter requires a name")
            })?;
            params.push((
                pname,
                ParamSpec {
                    param_type: str_field(pmap, "type")
                        .map(|t| ParamType::parse(&t))
                        .unwrap_or_default(),
                    description: str_field(pmap, "description").unwrap_or_default(),
                    required: pmap
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    allowed: pmap
                        .get("enum")
                        .and_then(Value::as_sequence)
                        .map(|seq| seq.iter().filter_map(scalar_string).collect()),
                    default: pmap.get("default").map(yaml_to_json),
                },
            ));
        }
    }

    let kind = str_field(map, "type")
        .ok_or_else(|| Error::validation(&field, "tool requires a 'type'"))?;
    let implementation = match kind.as_str() {
        "http" => ToolImpl::Http {
            url: str_field(map, "url")
                .ok_or_else(|| Error::validation(&field, "http tool requires 'url'"))?,
            method: str_field(map, "method").unwrap_or_else(|| "GET".into()),
            headers: string_map(map, "headers"),
            query: string_map(map, "query"),
            body: str_field(map, "body"),
        },
        "exec" => ToolImpl::Exec {
            command: str_field(map, "command")
                .ok_or_else(|| Error::validation(&field, "exec tool requires 'command'"))?,
        },
        "file_read" => ToolImpl::FileRead {
            path: str_field(map, "path")
                .ok_or_else(|| Error::validation(&field, "file_read tool requires 'path'"))?,
        },
        "file_write" => ToolImpl::FileWrite {
            path: str_field(map, "path")
                .ok_or_else(|| Error::validation(&field, "file_write tool requires 'path'"))?,
            content: str_field(map, "content").unwrap_or_default(),
        },
        other => {
            return Err(Error::validation(
                field,
                format!("unknown tool type '{other}', expected http, exec, file_read, or file_write"),
            ));
        }
    };

    Ok(ToolDefinition {
        name: name.to_string(),
        description: str_field(map, "description").unwrap_or_default(),
        params,
        implementation,
    })
}

fn str_field(map: &serde_yml::Mapping, key: &str) -> Option<String> {
    map.get(key).and_then(scalar_string)
}

fn str_list(map: &serde_yml::Mapping, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(scalar_string).collect())
        .unwrap_or_default()
}

fn string_map(map: &serde_yml::Mapping, key: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(inner) = map.get(key).and_then(Value::as_mapping) {
        for (k, v) in inner {
            if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                out.insert(k.to_string(), v);
            }
        }
    }
    out
}

/// Render a scalar YAML value as a string; mappings and lists yield `None`.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Convert a YAML value into JSON for defaults and blackboard payloads.
pub fn yaml_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else {
                serde_json::Value::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        Value::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if let Some(k) = k.as_str() {
                    out.insert(k.to_string(), yaml_to_json(v));
                }
            }
            serde_json::Value::Object(out)
        }
        Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}
