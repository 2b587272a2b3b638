//! The step-tree executor.
//!
//! A tree walk over parsed [`Step`]s. Each step evaluates to a value;
//! `return` short-circuits the whole invocation. Agent calls go through
//! the [`AgentCall`] seam so the interpreter stays free of process
//! machinery.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use rcore::{
    CallStep, Ctx, Error, ForEachStep, IfStep, NameKind, Output, RepeatStep, Result, Step,
    SubWorkflowStep, TryStep, WorkflowDef, suggest,
};
use serde_json::Value;

use crate::expr::{eval, eval_condition, interpolate};
use crate::scope::{LoopState, Scope};

/// The seam to the agent runtime: deliver one message to one agent.
pub trait AgentCall: Send + Sync {
    /// Send `message` to `agent` and return the final response text.
    fn send<'a>(
        &'a self,
        ctx: &'a Ctx,
        agent: &'a str,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Whether execution continues past a step or exits the workflow.
enum Flow {
    Continue(Value),
    Return(Value),
}

/// Executes workflows against a set of definitions and an agent seam.
#[derive(Clone)]
pub struct Executor {
    workflows: BTreeMap<String, WorkflowDef>,
    caller: Arc<dyn AgentCall>,
}

impl Executor {
    /// Create an executor over the given workflow definitions.
    pub fn new(workflows: BTreeMap<String, WorkflowDef>, caller: Arc<dyn AgentCall>) -> Self {
        Self { workflows, caller }
    }

    /// Replace the workflow set (used when the document is mutated).
    pub fn set_workflows(&mut self, workflows: BTreeMap<String, WorkflowDef>) {
        self.workflows = workflows;
    }

    /// Run a workflow by name with the given inputs.
    pub async fn run(
        &self,
        ctx: &Ctx,
        name: &str,
        inputs: BTreeMap<String, Value>,
    ) -> Result<Value> {
        let Some(workflow) = self.workflows.get(name) else {
            let known: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
            return Err(Error::UnknownName {
                kind: NameKind::Workflow,
                name: name.to_string(),
                hint: suggest(name, &known).map(|s| format!("did you mean '{s}'?")),
            });
        };

        let mut scope = Scope::new(validated_inputs(workflow, inputs)?);
        tracing::debug!(workflow = name, "workflow started");

        match self.exec_steps(ctx, &mut scope, &workflow.steps).await? {
            Flow::Return(value) => return Ok(value),
            Flow::Continue(_) => {}
        }

        match &workflow.output {
            Some(Output::Template(template)) => {
                Ok(Value::String(interpolate(template, &scope)?))
            }
            Some(Output::Map(templates)) => {
                let mut out = serde_json::Map::new();
                for (key, template) in templates {
                    out.insert(key.clone(), Value::String(interpolate(template, &scope)?));
                }
                Ok(Value::Object(out))
            }
            None => Ok(scope.var("result").cloned().unwrap_or(Value::Null)),
        }
    }

    /// Execute a step list in order, short-circuiting on `return`.
    ///
    /// Each step's value is also bound to the `result` variable so a
    /// workflow without an output declaration yields its last result.
    fn exec_steps<'a>(
        &'a self,
        ctx: &'a Ctx,
        scope: &'a mut Scope,
        steps: &'a [Step],
    ) -> Pin<Box<dyn Future<Output = Result<Flow>> + Send + 'a>> {
        Box::pin(async move {
            let mut last = Value::Null;
            for (index, step) in steps.iter().enumerate() {
                if let Some(err) = ctx.err() {
                    return Err(err);
                }
                tracing::trace!(index, step = step.tag(), "executing step");
                match self.exec_step(ctx, scope, step).await? {
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Continue(value) => {
                        scope.set_var("result", value.clone());
                        last = value;
                    }
                }
            }
            Ok(Flow::Continue(last))
        })
    }

    async fn exec_step(&self, ctx: &Ctx, scope: &mut Scope, step: &Step) -> Result<Flow> {
        match step {
            Step::Call(call) => self.exec_call(ctx, scope, call).await,
            Step::Set(bindings) => {
                for (name, template) in bindings {
                    let value = Value::String(interpolate(template, scope)?);
                    scope.set_var(name, value);
                }
                Ok(Flow::Continue(Value::Null))
            }
            Step::Return(expr) => {
                let value = if expr.contains("{{") {
                    Value::String(interpolate(expr, scope)?)
                } else {
                    eval(expr, scope)?
                };
                Ok(Flow::Return(value))
            }
            Step::If(cond) => self.exec_if(ctx, scope, cond).await,
            Step::Parallel(branches) => self.exec_parallel(ctx, scope, branches).await,
            Step::Repeat(repeat) => self.exec_repeat(ctx, scope, repeat).await,
            Step::ForEach(foreach) => self.exec_foreach(ctx, scope, foreach).await,
            Step::Workflow(sub) => self.exec_sub(ctx, scope, sub).await,
            Step::Try(tc) => self.exec_try(ctx, scope, tc).await,
        }
    }

    async fn exec_call(&self, ctx: &Ctx, scope: &mut Scope, call: &CallStep) -> Result<Flow> {
        if let Some(guard) = &call.guard
            && !eval_condition(guard, scope)?
        {
            tracing::debug!(agent = %call.agent, "guard skipped step");
            return Ok(Flow::Continue(Value::Null));
        }

        let message = interpolate(&call.send, scope)?;
        let call_ctx = match call.timeout {
            Some(timeout) => ctx.with_deadline(timeout),
            None => ctx.clone(),
        };

        let mut attempt = 0u32;
        let outcome = loop {
            let result = call_ctx
                .run(self.caller.send(&call_ctx, &call.agent, &message))
                .await;
            match result {
                Ok(response) => break Ok(response),
                Err(err) if attempt < call.retry && !matches!(err, Error::Cancelled) => {
                    attempt += 1;
                    tracing::warn!(
                        agent = %call.agent,
                        attempt,
                        error = %err,
                        "agent step failed, retrying"
                    );
                }
                Err(err) => break Err(err),
            }
        };

        match outcome {
            Ok(response) => {
                if let Some(action) = &call.action {
                    tracing::debug!(agent = %call.agent, action = %action, "agent step done");
                }
                let value = Value::String(response);
                if let Some(save) = &call.save {
                    scope.save(save, value.clone());
                }
                Ok(Flow::Continue(value))
            }
            Err(err) if call.continue_on_error => {
                scope.set_var("error", Value::String(err.to_string()));
                Ok(Flow::Continue(Value::Null))
            }
            Err(err) => Err(err),
        }
    }

    async fn exec_if(&self, ctx: &Ctx, scope: &mut Scope, cond: &IfStep) -> Result<Flow> {
        if eval_condition(&cond.condition, scope)? {
            self.exec_steps(ctx, scope, &cond.then).await
        } else {
            self.exec_steps(ctx, scope, &cond.otherwise).await
        }
    }

    async fn exec_parallel(&self, ctx: &Ctx, scope: &mut Scope, branches: &[Step]) -> Result<Flow> {
        let futures: Vec<_> = branches
            .iter()
            .map(|step| {
                let mut branch = scope.branch();
                async move {
                    let flow = self
                        .exec_steps(ctx, &mut branch, std::slice::from_ref(step))
                        .await;
                    (flow, branch.take_saves())
                }
            })
            .collect();

        // All branches run to completion; the first error (in branch
        // declaration order) wins afterwards.
        let outcomes = futures_util::future::join_all(futures).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        let mut returned = None;
        for (flow, saves) in outcomes {
            match flow {
                Ok(Flow::Continue(value)) => {
                    results.push(value);
                    scope.merge_saves(saves);
                }
                Ok(Flow::Return(value)) => {
                    if returned.is_none() {
                        returned = Some(value);
                    }
                    scope.merge_saves(saves);
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if let Some(value) = returned {
            return Ok(Flow::Return(value));
        }
        Ok(Flow::Continue(Value::Array(results)))
    }

    async fn exec_repeat(&self, ctx: &Ctx, scope: &mut Scope, repeat: &RepeatStep) -> Result<Flow> {
        let saved_state = scope.loop_state.take();
        for index in 0..repeat.max {
            scope.loop_state = Some(LoopState {
                index: index as usize,
                count: repeat.max as usize,
                item: Value::Null,
            });
            match self.exec_steps(ctx, scope, &repeat.body).await? {
                Flow::Return(value) => {
                    scope.loop_state = saved_state;
                    return Ok(Flow::Return(value));
                }
                Flow::Continue(_) => {}
            }
            if eval_condition(&repeat.until, scope)? {
                break;
            }
        }
        scope.loop_state = saved_state;
        Ok(Flow::Continue(Value::Null))
    }

    async fn exec_foreach(
        &self,
        ctx: &Ctx,
        scope: &mut Scope,
        foreach: &ForEachStep,
    ) -> Result<Flow> {
        let collection = if foreach.collection.contains("{{") {
            let inner = foreach
                .collection
                .trim()
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            eval(inner, scope)?
        } else {
            eval(&foreach.collection, scope)?
        };
        let Value::Array(items) = collection else {
            return Err(Error::validation(
                "for",
                format!("'{}' did not evaluate to an array", foreach.collection),
            ));
        };

        let saved_state = scope.loop_state.take();
        let count = items.len();
        for (index, item) in items.into_iter().enumerate() {
            scope.loop_state = Some(LoopState {
                index,
                count,
                item: item.clone(),
            });
            scope.set_var(&foreach.var, item);
            match self.exec_steps(ctx, scope, &foreach.body).await? {
                Flow::Return(value) => {
                    scope.loop_state = saved_state;
                    return Ok(Flow::Return(value));
                }
                Flow::Continue(_) => {}
            }
        }
        scope.loop_state = saved_state;
        Ok(Flow::Continue(Value::Null))
    }

    async fn exec_sub(&self, ctx: &Ctx, scope: &mut Scope, sub: &SubWorkflowStep) -> Result<Flow> {
        let mut inputs = BTreeMap::new();
        for (name, template) in &sub.with {
            inputs.insert(name.clone(), Value::String(interpolate(template, scope)?));
        }
        let value = Box::pin(self.run(ctx, &sub.workflow, inputs)).await?;
        if let Some(save) = &sub.save {
            scope.save(save, value.clone());
        }
        Ok(Flow::Continue(value))
    }

    async fn exec_try(&self, ctx: &Ctx, scope: &mut Scope, tc: &TryStep) -> Result<Flow> {
        match self.exec_steps(ctx, scope, &tc.body).await {
            Ok(flow) => Ok(flow),
            Err(err) => {
                tracing::debug!(error = %err, "try body failed, entering catch");
                scope.set_var("error", Value::String(err.to_string()));
                // An error inside catch is unrecoverable.
                self.exec_steps(ctx, scope, &tc.catch).await
            }
        }
    }
}

fn validated_inputs(
    workflow: &WorkflowDef,
    mut given: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    let mut inputs = BTreeMap::new();
    for input in &workflow.inputs {
        match given.remove(&input.name) {
            Some(value) => {
                if let Some(allowed) = &input.allowed
                    && let Value::String(s) = &value
                    && !allowed.contains(s)
                {
                    return Err(Error::validation(
                        format!("inputs.{}", input.name),
                        format!("'{s}' is not one of {allowed:?}"),
                    ));
                }
                inputs.insert(input.name.clone(), value);
            }
            None => match &input.default {
                Some(default) => {
                    inputs.insert(input.name.clone(), default.clone());
                }
                None if input.required => {
                    return Err(Error::validation(
                        format!("inputs.{}", input.name),
                        "required input missing",
                    ));
                }
                None => {}
            },
        }
    }
    // Undeclared extras pass through untouched.
    inputs.extend(given);
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcore::InputDef;
    use std::sync::Mutex;

    /// Echoes the message back, recording every call.
    struct EchoCall {
        calls: Mutex<Vec<(String, String)>>,
        delay: Option<std::time::Duration>,
    }

    impl EchoCall {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                delay: None,
            })
        }
    }

    impl AgentCall for EchoCall {
        fn send<'a>(
            &'a self,
            _ctx: &'a Ctx,
            agent: &'a str,
            message: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.calls
                    .lock()
                    .unwrap()
                    .push((agent.to_string(), message.to_string()));
                if message.contains("BOOM") {
                    return Err(Error::Upstream("model exploded".into()));
                }
                Ok(message.to_string())
            })
        }
    }

    fn executor(workflow: WorkflowDef, caller: Arc<dyn AgentCall>) -> Executor {
        let mut workflows = BTreeMap::new();
        workflows.insert(workflow.name.clone(), workflow);
        Executor::new(workflows, caller)
    }

    fn call(agent: &str, send: &str, save: Option<&str>) -> Step {
        Step::Call(CallStep {
            agent: agent.into(),
            send: send.into(),
            save: save.map(Into::into),
            ..Default::default()
        })
    }

    fn greet_workflow() -> WorkflowDef {
        WorkflowDef {
            name: "greet".into(),
            inputs: vec![InputDef {
                name: "name".into(),
                input_type: "string".into(),
                required: true,
                ..Default::default()
            }],
            steps: vec![call("assistant", "Hello, {{name}}!", Some("greeting"))],
            output: Some(Output::Template("{{greeting}}".into())),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn greet_returns_interpolated_output() {
        let exec = executor(greet_workflow(), EchoCall::new());
        let mut inputs = BTreeMap::new();
        inputs.insert("name".to_string(), Value::from("World"));
        let result = exec.run(&Ctx::background(), "greet", inputs).await.unwrap();
        assert_eq!(result, Value::from("Hello, World!"));
    }

    #[tokio::test]
    async fn missing_required_input_fails() {
        let exec = executor(greet_workflow(), EchoCall::new());
        let err = exec
            .run(&Ctx::background(), "greet", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("required input missing"));
    }

    #[tokio::test]
    async fn default_fills_missing_input() {
        let mut workflow = greet_workflow();
        workflow.inputs[0].required = false;
        workflow.inputs[0].default = Some(Value::from("there"));
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "greet", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("Hello, there!"));
    }

    #[tokio::test]
    async fn unknown_workflow_errors() {
        let exec = executor(greet_workflow(), EchoCall::new());
        let err = exec
            .run(&Ctx::background(), "absent", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownName { .. }));
    }

    #[tokio::test]
    async fn parallel_saves_merge_in_declaration_order() {
        let workflow = WorkflowDef {
            name: "par".into(),
            steps: vec![Step::Parallel(vec![
                call("a", "x", Some("r1")),
                call("b", "y", Some("r2")),
            ])],
            output: Some(Output::Map(vec![
                ("first".into(), "{{r1}}".into()),
                ("second".into(), "{{r2}}".into()),
            ])),
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "par", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"first": "x", "second": "y"}));
    }

    #[tokio::test]
    async fn parallel_result_is_branch_array() {
        let workflow = WorkflowDef {
            name: "par".into(),
            steps: vec![Step::Parallel(vec![
                call("a", "x", None),
                call("b", "y", None),
            ])],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "par", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(["x", "y"]));
    }

    #[tokio::test]
    async fn parallel_first_error_wins_after_all_finish() {
        let caller = EchoCall::new();
        let workflow = WorkflowDef {
            name: "par".into(),
            steps: vec![Step::Parallel(vec![
                call("a", "BOOM", None),
                call("b", "fine", Some("ok")),
            ])],
            ..Default::default()
        };
        let exec = executor(workflow, caller.clone());
        let err = exec
            .run(&Ctx::background(), "par", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
        // Both branches ran.
        assert_eq!(caller.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repeat_stops_when_until_holds() {
        let workflow = WorkflowDef {
            name: "rep".into(),
            steps: vec![
                Step::Repeat(RepeatStep {
                    body: vec![call("w", "tick {{loop.index}}", Some("last"))],
                    until: "2 in {{last}}".into(),
                    max: 100,
                }),
                Step::Return("{{last}}".into()),
            ],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "rep", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("tick 2"));
    }

    #[tokio::test]
    async fn repeat_halts_at_max() {
        let caller = EchoCall::new();
        let workflow = WorkflowDef {
            name: "rep".into(),
            steps: vec![Step::Repeat(RepeatStep {
                body: vec![call("w", "tick", None)],
                until: "never in {{result}}".into(),
                max: 4,
            })],
            ..Default::default()
        };
        let exec = executor(workflow, caller.clone());
        exec.run(&Ctx::background(), "rep", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(caller.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn foreach_iterates_with_loop_state() {
        let caller = EchoCall::new();
        let workflow = WorkflowDef {
            name: "each".into(),
            inputs: vec![InputDef {
                name: "queue".into(),
                required: true,
                ..Default::default()
            }],
            steps: vec![Step::ForEach(ForEachStep {
                var: "item".into(),
                collection: "{{queue}}".into(),
                body: vec![call("w", "{{loop.index}}/{{loop.count}}: {{item}}", None)],
            })],
            ..Default::default()
        };
        let exec = executor(workflow, caller.clone());
        let mut inputs = BTreeMap::new();
        inputs.insert("queue".to_string(), serde_json::json!(["a", "b"]));
        exec.run(&Ctx::background(), "each", inputs).await.unwrap();
        let calls = caller.calls.lock().unwrap();
        assert_eq!(calls[0].1, "0/2: a");
        assert_eq!(calls[1].1, "1/2: b");
    }

    #[tokio::test]
    async fn foreach_rejects_non_array() {
        let workflow = WorkflowDef {
            name: "each".into(),
            steps: vec![Step::ForEach(ForEachStep {
                var: "item".into(),
                collection: "{{missing}}".into(),
                body: vec![],
            })],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let err = exec
            .run(&Ctx::background(), "each", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[tokio::test]
    async fn conditional_takes_else_branch() {
        let workflow = WorkflowDef {
            name: "cond".into(),
            steps: vec![Step::If(IfStep {
                condition: "yes in {{answer}}".into(),
                then: vec![Step::Return("then".into())],
                otherwise: vec![Step::Return("else".into())],
            })],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let mut inputs = BTreeMap::new();
        inputs.insert("answer".to_string(), Value::from("no"));
        let result = exec.run(&Ctx::background(), "cond", inputs).await.unwrap();
        assert_eq!(result, Value::from("else"));
    }

    #[tokio::test]
    async fn guard_skips_call() {
        let caller = EchoCall::new();
        let workflow = WorkflowDef {
            name: "guarded".into(),
            steps: vec![Step::Call(CallStep {
                agent: "a".into(),
                send: "run".into(),
                guard: Some("{{missing}}".into()),
                ..Default::default()
            })],
            ..Default::default()
        };
        let exec = executor(workflow, caller.clone());
        exec.run(&Ctx::background(), "guarded", BTreeMap::new())
            .await
            .unwrap();
        assert!(caller.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn try_catch_binds_error() {
        let workflow = WorkflowDef {
            name: "tc".into(),
            steps: vec![Step::Try(TryStep {
                body: vec![call("a", "BOOM", None)],
                catch: vec![Step::Return("caught: {{error}}".into())],
            })],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "tc", BTreeMap::new())
            .await
            .unwrap();
        let text = result.as_str().unwrap();
        assert!(text.starts_with("caught: "));
        assert!(text.contains("model exploded"));
    }

    #[tokio::test]
    async fn continue_on_error_binds_error_and_proceeds() {
        let workflow = WorkflowDef {
            name: "soft".into(),
            steps: vec![
                Step::Call(CallStep {
                    agent: "a".into(),
                    send: "BOOM".into(),
                    continue_on_error: true,
                    ..Default::default()
                }),
                Step::Return("after: {{error}}".into()),
            ],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "soft", BTreeMap::new())
            .await
            .unwrap();
        assert!(result.as_str().unwrap().contains("model exploded"));
    }

    #[tokio::test]
    async fn sub_workflow_passes_inputs_and_saves() {
        let inner = greet_workflow();
        let outer = WorkflowDef {
            name: "outer".into(),
            steps: vec![
                Step::Workflow(SubWorkflowStep {
                    workflow: "greet".into(),
                    with: vec![("name".into(), "sub".into())],
                    save: Some("greeting".into()),
                }),
                Step::Return("got {{greeting}}".into()),
            ],
            ..Default::default()
        };
        let mut workflows = BTreeMap::new();
        workflows.insert("greet".to_string(), inner);
        workflows.insert("outer".to_string(), outer);
        let exec = Executor::new(workflows, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "outer", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("got Hello, sub!"));
    }

    #[tokio::test]
    async fn step_timeout_yields_timeout_error() {
        let caller = Arc::new(EchoCall {
            calls: Mutex::new(Vec::new()),
            delay: Some(std::time::Duration::from_secs(5)),
        });
        let workflow = WorkflowDef {
            name: "slow".into(),
            steps: vec![Step::Call(CallStep {
                agent: "a".into(),
                send: "hi".into(),
                timeout: Some(std::time::Duration::from_millis(10)),
                ..Default::default()
            })],
            ..Default::default()
        };
        let exec = executor(workflow, caller);
        let err = exec
            .run(&Ctx::background(), "slow", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn retry_retries_failed_sends() {
        struct FailOnce {
            failed: Mutex<bool>,
        }
        impl AgentCall for FailOnce {
            fn send<'a>(
                &'a self,
                _ctx: &'a Ctx,
                _agent: &'a str,
                message: &'a str,
            ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
                Box::pin(async move {
                    let mut failed = self.failed.lock().unwrap();
                    if !*failed {
                        *failed = true;
                        return Err(Error::Upstream("flaky".into()));
                    }
                    Ok(message.to_string())
                })
            }
        }
        let workflow = WorkflowDef {
            name: "flaky".into(),
            steps: vec![Step::Call(CallStep {
                agent: "a".into(),
                send: "ok".into(),
                retry: 1,
                ..Default::default()
            })],
            ..Default::default()
        };
        let exec = executor(
            workflow,
            Arc::new(FailOnce {
                failed: Mutex::new(false),
            }),
        );
        let result = exec
            .run(&Ctx::background(), "flaky", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("ok"));
    }

    #[tokio::test]
    async fn no_output_returns_result_variable() {
        let workflow = WorkflowDef {
            name: "bare".into(),
            steps: vec![call("a", "final answer", None)],
            ..Default::default()
        };
        let exec = executor(workflow, EchoCall::new());
        let result = exec
            .run(&Ctx::background(), "bare", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("final answer"));
    }
}
