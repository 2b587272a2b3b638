//! Canonical document emission.
//!
//! Re-serializes a [`Document`] to YAML such that parsing the emission
//! yields the same AST (a fixed point). Unset fields are omitted, so
//! the emission is also the canonical form of a document.

use serde_yml::{Mapping, Value};

use crate::agent::{AgentDef, Backoff, RemoteTransport, Settings, SupervisionStrategy};
use crate::document::{Document, ToolDefinition, ToolImpl};
use crate::error::Result;
use crate::message::Role;
use crate::step::{DEFAULT_REPEAT_MAX, InputDef, Output, Step, WorkflowDef};

impl Document {
    /// Emit the canonical YAML form.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yml::to_string(&self.to_value())
            .map_err(|e| crate::error::Error::validation("document", format!("emit failed: {e}")))
    }

    fn to_value(&self) -> Value {
        let mut root = Mapping::new();
        if !self.name.is_empty() {
            root.insert("name".into(), self.name.clone().into());
        }
        if !self.description.is_empty() {
            root.insert("description".into(), self.description.clone().into());
        }
        if self.settings != Settings::default() {
            root.insert("settings".into(), settings_value(&self.settings));
        }
        if !self.agents.is_empty() {
            let mut agents = Mapping::new();
            for (name, agent) in &self.agents {
                agents.insert(name.clone().into(), agent_value(agent));
            }
            root.insert("agents".into(), Value::Mapping(agents));
        }
        if !self.workflows.is_empty() {
            let mut workflows = Mapping::new();
            for (name, workflow) in &self.workflows {
                workflows.insert(name.clone().into(), workflow_value(workflow));
            }
            root.insert("workflows".into(), Value::Mapping(workflows));
        }
        if !self.tools.is_empty() {
            let mut tools = Mapping::new();
            for (name, tool) in &self.tools {
                tools.insert(name.clone().into(), tool_value(tool));
            }
            root.insert("tools".into(), Value::Mapping(tools));
        }
        Value::Mapping(root)
    }
}

fn settings_value(settings: &Settings) -> Value {
    let mut map = Mapping::new();
    if let Some(model) = &settings.model {
        map.insert("model".into(), model.clone().into());
    }
    if let Some(temperature) = settings.temperature {
        map.insert("temperature".into(), temperature.into());
    }
    if let Some(workspace) = &settings.workspace {
        map.insert("workspace".into(), workspace.display().to_string().into());
    }
    if !settings.variables.is_empty() {
        let mut vars = Mapping::new();
        for (k, v) in &settings.variables {
            vars.insert(k.clone().into(), v.clone().into());
        }
        map.insert("variables".into(), Value::Mapping(vars));
    }
    if !settings.servers.is_empty() {
        let servers: Vec<Value> = settings
            .servers
            .iter()
            .map(|server| {
                let mut s = Mapping::new();
                s.insert("name".into(), server.name.clone().into());
                match &server.transport {
                    RemoteTransport::Stdio { command, args, env } => {
                        s.insert("transport".into(), "stdio".into());
                        s.insert("command".into(), command.clone().into());
                        if !args.is_empty() {
                            s.insert("args".into(), str_seq(args));
                        }
                        if !env.is_empty() {
                            let mut e = Mapping::new();
                            for (k, v) in env {
                                e.insert(k.clone().into(), v.clone().into());
                            }
                            s.insert("env".into(), Value::Mapping(e));
                        }
                    }
                    RemoteTransport::Http { url } => {
                        s.insert("transport".into(), "http".into());
                        s.insert("url".into(), url.clone().into());
                    }
                    RemoteTransport::Sse { url } => {
                        s.insert("transport".into(), "sse".into());
                        s.insert("url".into(), url.clone().into());
                    }
                }
                Value::Mapping(s)
            })
            .collect();
        map.insert("servers".into(), Value::Sequence(servers));
    }
    Value::Mapping(map)
}

fn agent_value(agent: &AgentDef) -> Value {
    let mut map = Mapping::new();
    if let Some(extends) = &agent.extends {
        map.insert("extends".into(), extends.clone().into());
    }
    if !agent.model.is_empty() {
        map.insert("model".into(), agent.model.clone().into());
    }
    if let Some(fallback) = &agent.fallback_model {
        map.insert("fallback_model".into(), fallback.clone().into());
    }
    if !agent.system.is_empty() {
        map.insert("system".into(), agent.system.clone().into());
    }
    if let Some(temperature) = agent.temperature {
        map.insert("temperature".into(), temperature.into());
    }
    if let Some(budget) = &agent.budget {
        map.insert("budget".into(), budget.clone().into());
    }
    if !agent.tools.is_empty() {
        map.insert("tools".into(), str_seq(&agent.tools));
    }
    if !agent.knowledge.is_empty() {
        map.insert("knowledge".into(), str_seq(&agent.knowledge));
    }
    if !agent.team.is_empty() {
        map.insert("team".into(), str_seq(&agent.team));
    }
    if !agent.skills.is_empty() {
        map.insert("skills".into(), str_seq(&agent.skills));
    }
    if let Some(sup) = &agent.supervision {
        let mut s = Mapping::new();
        let strategy = match sup.strategy {
            SupervisionStrategy::Restart => "restart",
            SupervisionStrategy::Stop => "stop",
            SupervisionStrategy::Escalate => "escalate",
        };
        s.insert("strategy".into(), strategy.into());
        s.insert("max_restarts".into(), (sup.max_restarts as u64).into());
        s.insert("window".into(), duration_str(sup.window).into());
        map.insert("supervision".into(), Value::Mapping(s));
    }
    if let Some(retry) = &agent.retry {
        let mut r = Mapping::new();
        r.insert("attempts".into(), (retry.attempts as u64).into());
        let backoff = match retry.backoff {
            Backoff::Linear => "linear",
            Backoff::Exponential => "exponential",
            Backoff::Constant => "constant",
        };
        r.insert("backoff".into(), backoff.into());
        r.insert("delay".into(), duration_str(retry.delay).into());
        map.insert("retry".into(), Value::Mapping(r));
    }
    if let Some(delegation) = &agent.delegation {
        let mut d = Mapping::new();
        d.insert(
            "context_window".into(),
            (delegation.context_window as u64).into(),
        );
        if !delegation.include_roles.is_empty() {
            let roles: Vec<Value> = delegation
                .include_roles
                .iter()
                .map(|r| role_str(*r).into())
                .collect();
            d.insert("include_roles".into(), Value::Sequence(roles));
        }
        d.insert("blackboard".into(), delegation.blackboard.into());
        map.insert("delegation".into(), Value::Mapping(d));
    }
    Value::Mapping(map)
}

fn workflow_value(workflow: &WorkflowDef) -> Value {
    let mut map = Mapping::new();
    if !workflow.description.is_empty() {
        map.insert("description".into(), workflow.description.clone().into());
    }
    if !workflow.inputs.is_empty() {
        let mut inputs = Mapping::new();
        for input in &workflow.inputs {
            inputs.insert(input.name.clone().into(), input_value(input));
        }
        map.insert("inputs".into(), Value::Mapping(inputs));
    }
    map.insert(
        "steps".into(),
        Value::Sequence(workflow.steps.iter().map(step_value).collect()),
    );
    if let Some(output) = &workflow.output {
        let value = match output {
            Output::Template(template) => template.clone().into(),
            Output::Map(templates) => {
                let mut m = Mapping::new();
                for (k, v) in templates {
                    m.insert(k.clone().into(), v.clone().into());
                }
                Value::Mapping(m)
            }
        };
        map.insert("output".into(), value);
    }
    Value::Mapping(map)
}

fn input_value(input: &InputDef) -> Value {
    let mut map = Mapping::new();
    map.insert("type".into(), input.input_type.clone().into());
    if !input.description.is_empty() {
        map.insert("description".into(), input.description.clone().into());
    }
    if !input.required {
        map.insert("required".into(), false.into());
    }
    if let Some(default) = &input.default {
        map.insert("default".into(), json_to_yaml(default));
    }
    if let Some(allowed) = &input.allowed {
        map.insert("enum".into(), str_seq(allowed));
    }
    Value::Mapping(map)
}

/// Emit one step in the key-driven shape the parser accepts.
pub fn step_value(step: &Step) -> Value {
    let mut map = Mapping::new();
    match step {
        Step::Call(call) => {
            let key = match &call.action {
                Some(action) => format!("{} {action}", call.agent),
                None => call.agent.clone(),
            };
            let bare = call.save.is_none()
                && call.timeout.is_none()
                && call.retry == 0
                && call.guard.is_none()
                && !call.continue_on_error
                && call.format.is_none();
            if bare {
                map.insert(key.into(), call.send.clone().into());
            } else {
                let mut opts = Mapping::new();
                opts.insert("send".into(), call.send.clone().into());
                if let Some(save) = &call.save {
                    opts.insert("save".into(), save.clone().into());
                }
                if let Some(timeout) = call.timeout {
                    opts.insert("timeout".into(), duration_str(timeout).into());
                }
                if call.retry > 0 {
                    opts.insert("retry".into(), (call.retry as u64).into());
                }
                if let Some(guard) = &call.guard {
                    opts.insert("if".into(), guard.clone().into());
                }
                if call.continue_on_error {
                    opts.insert("continue_on_error".into(), true.into());
                }
                if let Some(format) = &call.format {
                    opts.insert("format".into(), format.clone().into());
                }
                map.insert(key.into(), Value::Mapping(opts));
            }
        }
        Step::Set(bindings) => {
            let mut set = Mapping::new();
            for (k, v) in bindings {
                set.insert(k.clone().into(), v.clone().into());
            }
            map.insert("set".into(), Value::Mapping(set));
        }
        Step::Return(expr) => {
            map.insert("return".into(), expr.clone().into());
        }
        Step::If(cond) => {
            map.insert("if".into(), cond.condition.clone().into());
            map.insert(
                "then".into(),
                Value::Sequence(cond.then.iter().map(step_value).collect()),
            );
            if !cond.otherwise.is_empty() {
                map.insert(
                    "else".into(),
                    Value::Sequence(cond.otherwise.iter().map(step_value).collect()),
                );
            }
        }
        Step::Parallel(branches) => {
            map.insert(
                "parallel".into(),
                Value::Sequence(branches.iter().map(step_value).collect()),
            );
        }
        Step::Repeat(repeat) => {
            map.insert(
                "repeat".into(),
                Value::Sequence(repeat.body.iter().map(step_value).collect()),
            );
            map.insert("until".into(), repeat.until.clone().into());
            if repeat.max != DEFAULT_REPEAT_MAX {
                map.insert("max".into(), (repeat.max as u64).into());
            }
        }
        Step::ForEach(foreach) => {
            map.insert(
                "for".into(),
                format!("{} in {}", foreach.var, foreach.collection).into(),
            );
            map.insert(
                "do".into(),
                Value::Sequence(foreach.body.iter().map(step_value).collect()),
            );
        }
        Step::Workflow(sub) => {
            map.insert("workflow".into(), sub.workflow.clone().into());
            if !sub.with.is_empty() {
                let mut with = Mapping::new();
                for (k, v) in &sub.with {
                    with.insert(k.clone().into(), v.clone().into());
                }
                map.insert("with".into(), Value::Mapping(with));
            }
            if let Some(save) = &sub.save {
                map.insert("save".into(), save.clone().into());
            }
        }
        Step::Try(tc) => {
            map.insert(
                "try".into(),
                Value::Sequence(tc.body.iter().map(step_value).collect()),
            );
            if !tc.catch.is_empty() {
                map.insert(
                    "catch".into(),
                    Value::Sequence(tc.catch.iter().map(step_value).collect()),
                );
            }
        }
    }
    Value::Mapping(map)
}

fn tool_value(tool: &ToolDefinition) -> Value {
    let mut map = Mapping::new();
    if !tool.description.is_empty() {
        map.insert("description".into(), tool.description.clone().into());
    }
    match &tool.implementation {
        ToolImpl::Http {
            url,
            method,
            headers,
            query,
            body,
        } => {
            map.insert("type".into(), "http".into());
            map.insert("url".into(), url.clone().into());
            if method != "GET" {
                map.insert("method".into(), method.clone().into());
            }
            if !headers.is_empty() {
                let mut h = Mapping::new();
                for (k, v) in headers {
                    h.insert(k.clone().into(), v.clone().into());
                }
                map.insert("headers".into(), Value::Mapping(h));
            }
            if !query.is_empty() {
                let mut q = Mapping::new();
                for (k, v) in query {
                    q.insert(k.clone().into(), v.clone().into());
                }
                map.insert("query".into(), Value::Mapping(q));
            }
            if let Some(body) = body {
                map.insert("body".into(), body.clone().into());
            }
        }
        ToolImpl::Exec { command } => {
            map.insert("type".into(), "exec".into());
            map.insert("command".into(), command.clone().into());
        }
        ToolImpl::FileRead { path } => {
            map.insert("type".into(), "file_read".into());
            map.insert("path".into(), path.clone().into());
        }
        ToolImpl::FileWrite { path, content } => {
            map.insert("type".into(), "file_write".into());
            map.insert("path".into(), path.clone().into());
            if !content.is_empty() {
                map.insert("content".into(), content.clone().into());
            }
        }
    }
    if !tool.params.is_empty() {
        let params: Vec<Value> = tool
            .params
            .iter()
            .map(|(name, spec)| {
                let mut p = Mapping::new();
                p.insert("name".into(), name.clone().into());
                let type_str = serde_json::to_value(spec.param_type)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_else(|| "string".into());
                p.insert("type".into(), type_str.into());
                if !spec.description.is_empty() {
                    p.insert("description".into(), spec.description.clone().into());
                }
                if spec.required {
                    p.insert("required".into(), true.into());
                }
                if let Some(allowed) = &spec.allowed {
                    p.insert("enum".into(), str_seq(allowed));
                }
                if let Some(default) = &spec.default {
                    p.insert("default".into(), json_to_yaml(default));
                }
                Value::Mapping(p)
            })
            .collect();
        map.insert("parameters".into(), Value::Sequence(params));
    }
    Value::Mapping(map)
}

fn str_seq(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| s.clone().into()).collect())
}

fn duration_str(d: std::time::Duration) -> String {
    humantime::format_duration(d).to_string()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn json_to_yaml(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => (*b).into(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else {
                n.as_f64().unwrap_or_default().into()
            }
        }
        serde_json::Value::String(s) => s.clone().into(),
        serde_json::Value::Array(arr) => Value::Sequence(arr.iter().map(json_to_yaml).collect()),
        serde_json::Value::Object(map) => {
            let mut out = Mapping::new();
            for (k, v) in map {
                out.insert(k.clone().into(), json_to_yaml(v));
            }
            Value::Mapping(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parse::parse_document;

    const DOC: &str = r#"
name: demo
description: round trip fixture
settings:
  model: m-default
agents:
  dan:
    system: "Team lead."
    team: [ann]
    delegation:
      context_window: 2
      blackboard: true
  ann:
    model: m-small
    system: "Scheduler."
    supervision:
      strategy: restart
      max_restarts: 3
      window: 1m
workflows:
  plan:
    inputs:
      topic:
        type: string
    steps:
      - dan draft the plan:
          send: "Plan {{topic}}"
          save: draft
          timeout: 30s
      - if: "approved in {{draft}}"
        then:
          - ann: "schedule it"
      - parallel:
          - dan: "a"
          - ann: "b"
      - for: item in {{queue}}
        do:
          - ann: "handle {{item}}"
      - repeat:
          - ann: "poll"
        until: "done in {{state}}"
        max: 7
      - try:
          - dan: "risky"
        catch:
          - ann: "recover: {{error}}"
      - set:
          status: ok
      - return: "{{status}}"
    output: "{{draft}}"
tools:
  lookup:
    description: fetch data
    type: http
    url: "https://example.com/{{.id}}"
    parameters:
      - name: id
        type: string
        required: true
"#;

    #[test]
    fn emission_is_a_fixed_point() {
        let doc = parse_document(DOC).unwrap();
        let emitted = doc.to_yaml().unwrap();
        let reparsed = parse_document(&emitted).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn emission_is_idempotent() {
        let doc = parse_document(DOC).unwrap();
        let once = doc.to_yaml().unwrap();
        let twice = parse_document(&once).unwrap().to_yaml().unwrap();
        assert_eq!(once, twice);
    }
}
