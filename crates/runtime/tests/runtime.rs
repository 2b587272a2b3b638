//! End-to-end tests over the runtime facade with the stub provider.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use rcore::{Ctx, Error, Message, load};
use reef_runtime::{
    CALLER_KEY, Completion, MAX_ITERATIONS, Provider, ProviderRequest, Runtime, Status,
    StreamEvent, StubProvider, Usage, team_group_name,
};
use serde_json::{Value, json};

fn runtime(yaml: &str, provider: StubProvider) -> Runtime {
    let document = load(yaml).unwrap();
    Runtime::new(document, Arc::new(provider)).unwrap()
}

fn inputs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// --- Scenario 1: simple greet ---

const GREET_DOC: &str = r#"
name: greet-demo
agents:
  assistant:
    model: m-test
    system: "You are a helpful assistant."
workflows:
  greet:
    inputs:
      name:
        type: string
        required: true
    steps:
      - assistant:
          send: "Hello, {{name}}!"
          save: greeting
    output: "{{greeting}}"
"#;

#[tokio::test]
async fn simple_greet() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let result = rt
        .run_workflow(&Ctx::background(), "greet", inputs(&[("name", json!("World"))]))
        .await
        .unwrap();
    assert_eq!(result, json!("Hello, World!"));
}

#[tokio::test]
async fn greet_missing_input_fails() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let err = rt
        .run_workflow(&Ctx::background(), "greet", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("required input missing"));
}

// --- Scenario 2: delegation context envelope ---

const TEAM_DOC: &str = r#"
name: team-demo
settings:
  model: m-test
agents:
  dan:
    system: "Team lead."
    team: [ann]
    delegation:
      context_window: 2
      blackboard: true
  ann:
    system: "Keeps the calendar."
"#;

#[tokio::test]
async fn delegate_wraps_caller_context() {
    let rt = runtime(TEAM_DOC, StubProvider::echo());
    rt.process_for("dan").unwrap().preload(vec![
        Message::user("I struggle with delegation"),
        Message::assistant("Classic Operator's Trap"),
    ]);

    let ctx = Ctx::background().with_value(CALLER_KEY, "dan".to_string());
    let observed = rt
        .registry()
        .execute(
            &ctx,
            "delegate",
            json!({"agent": "ann", "message": "Schedule follow-up"}),
        )
        .await
        .unwrap();

    // The echo provider returns ann's received message verbatim.
    assert!(observed.contains("<delegation_context>"));
    assert!(observed.contains("<from>dan</from>"));
    assert!(observed.contains("I struggle with delegation"));
    assert!(observed.contains("<task>\nSchedule follow-up\n</task>"));

    // ann's own history saw the same envelope.
    let ann_history = rt.process_for("ann").unwrap().history();
    assert!(ann_history[0].content.contains("<delegation_context>"));
}

#[tokio::test]
async fn delegate_without_window_sends_raw_task() {
    const DOC: &str = r#"
name: raw
settings:
  model: m-test
agents:
  lead:
    system: "Lead."
    team: [worker]
  worker:
    system: "Works."
"#;
    let rt = runtime(DOC, StubProvider::echo());
    let ctx = Ctx::background().with_value(CALLER_KEY, "lead".to_string());
    let observed = rt
        .registry()
        .execute(&ctx, "delegate", json!({"agent": "worker", "message": "just this"}))
        .await
        .unwrap();
    assert_eq!(observed, "just this");
}

// --- Scenario 3: blackboard share ---

#[tokio::test]
async fn blackboard_share() {
    let rt = runtime(TEAM_DOC, StubProvider::echo());

    let group = rt
        .orchestrator()
        .group(&team_group_name("dan"))
        .expect("team group auto-created");
    assert!(group.contains("dan"));
    assert!(group.contains("ann"));

    group.bb_set("plan", json!("ship v2"));
    assert_eq!(group.bb_get("plan"), Some(json!("ship v2")));

    // Through the tools: dan writes, ann reads the JSON-quoted value.
    let dan_ctx = Ctx::background().with_value(CALLER_KEY, "dan".to_string());
    rt.registry()
        .execute(&dan_ctx, "bb_write", json!({"key": "plan", "value": "ship v2"}))
        .await
        .unwrap();

    let ann_ctx = Ctx::background().with_value(CALLER_KEY, "ann".to_string());
    let read = rt
        .registry()
        .execute(&ann_ctx, "bb_read", json!({"key": "plan"}))
        .await
        .unwrap();
    assert_eq!(read, "\"ship v2\"");

    let keys = rt
        .registry()
        .execute(&ann_ctx, "bb_list", json!({}))
        .await
        .unwrap();
    assert!(keys.contains("plan"));
}

// --- Scenario 4: parallel + save ---

#[tokio::test]
async fn parallel_saves_merge_and_result_is_array() {
    const DOC: &str = r#"
name: par
settings:
  model: m-test
agents:
  a:
    system: "Agent a."
  b:
    system: "Agent b."
workflows:
  fan:
    steps:
      - parallel:
          - a:
              send: "x"
              save: r1
          - b:
              send: "y"
              save: r2
"#;
    let rt = runtime(DOC, StubProvider::echo());
    let result = rt
        .run_workflow(&Ctx::background(), "fan", BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(result, json!(["x", "y"]));
}

// --- Scenario 5: sandbox escape ---

#[tokio::test]
async fn sandbox_escape_confined_to_root() {
    let dir = tempfile::tempdir().unwrap();
    let doc = format!(
        r#"
name: sandboxed
settings:
  model: m-test
  workspace: {}
agents:
  worker:
    system: "Writes files."
"#,
        dir.path().display()
    );
    let rt = runtime(&doc, StubProvider::echo());
    let ctx = Ctx::background();

    rt.registry()
        .execute(
            &ctx,
            "write_file",
            json!({"path": "../etc/passwd", "content": "X"}),
        )
        .await
        .unwrap();
    let read = rt
        .registry()
        .execute(&ctx, "read_file", json!({"path": "passwd"}))
        .await
        .unwrap();
    assert_eq!(read, "X");
    assert!(dir.path().join("passwd").exists());
}

// --- Scenario 6: meta-agent create/delete/protection ---

#[tokio::test]
async fn meta_agent_lifecycle_and_protection() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let ctx = Ctx::background();

    rt.registry()
        .execute(
            &ctx,
            "create_agent",
            json!({"name": "reviewer", "system": "You review.", "model": "m-test"}),
        )
        .await
        .unwrap();
    assert!(rt.process_for("reviewer").is_some());

    let listing = rt
        .registry()
        .execute(&ctx, "list_agents", json!({}))
        .await
        .unwrap();
    assert!(listing.contains("reviewer"));

    let err = rt
        .registry()
        .execute(
            &ctx,
            "create_agent",
            json!({"name": "mother", "system": "nope", "model": "m"}),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("built-in"));

    rt.registry()
        .execute(&ctx, "delete_agent", json!({"name": "reviewer"}))
        .await
        .unwrap();
    assert!(rt.document().agents.get("reviewer").is_none());

    let err = rt
        .registry()
        .execute(&ctx, "delete_agent", json!({"name": "mother"}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("built-in"));
}

#[tokio::test]
async fn created_agent_is_reachable() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    rt.create_agent(
        rcore::AgentDef::new("echoer")
            .model("m-test")
            .system("Echoes."),
    )
    .unwrap();
    let reply = rt
        .send_to_agent(&Ctx::background(), "echoer", "ping")
        .await
        .unwrap();
    assert_eq!(reply, "ping");
}

// --- Process invariants ---

#[tokio::test]
async fn terminal_process_refuses_sends() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let process = rt.process_for("assistant").unwrap();
    process.complete("done");
    assert_eq!(process.status(), Status::Completed);

    let err = rt
        .send_to_agent(&Ctx::background(), "assistant", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProcessNotRunning(_)));
}

#[tokio::test]
async fn complete_and_fail_are_idempotent() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let process = rt.process_for("assistant").unwrap();
    process.complete("first");
    process.fail(&Error::Upstream("late".into()));
    process.complete("second");
    assert_eq!(process.status(), Status::Completed);
}

#[tokio::test]
async fn unknown_agent_suggests_names() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let err = rt
        .send_to_agent(&Ctx::background(), "assistent", "hi")
        .await
        .unwrap_err();
    let Error::UnknownName { hint, .. } = err else {
        panic!("expected unknown name, got {err}");
    };
    assert_eq!(hint.as_deref(), Some("did you mean 'assistant'?"));
}

// --- LLM loop boundaries ---

#[tokio::test]
async fn llm_loop_halts_at_iteration_cap() {
    let rt = runtime(
        GREET_DOC,
        StubProvider::tool_loop("probe", json!({"text": "again"})),
    );
    rt.registry()
        .register_fn(
            rcore::ToolSchema::new("probe", "test probe"),
            |_ctx, _params| async move { Ok("ok".to_string()) },
        )
        .unwrap();

    let err = rt
        .send_to_agent(&Ctx::background(), "assistant", "go")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxIterationsExceeded(MAX_ITERATIONS)));
    // The loop failure is process-level.
    assert_eq!(rt.process_for("assistant").unwrap().status(), Status::Failed);
}

#[tokio::test]
async fn tool_errors_are_recovered_into_envelopes() {
    let rt = runtime(
        GREET_DOC,
        StubProvider::script(vec![
            StubProvider::tool_call("c1", "no_such_tool", json!({})),
            StubProvider::text("recovered"),
        ]),
    );
    let reply = rt
        .send_to_agent(&Ctx::background(), "assistant", "go")
        .await
        .unwrap();
    assert_eq!(reply, "recovered");

    let history = rt.process_for("assistant").unwrap().history();
    let results = rcore::parse_tool_results(&history[2].content);
    assert_eq!(results.len(), 1);
    assert!(results[0].body.starts_with("Error:"));
    assert_eq!(results[0].tool_use_id, "c1");
}

#[tokio::test]
async fn tool_calls_recorded_as_envelopes() {
    let rt = runtime(
        GREET_DOC,
        StubProvider::script(vec![
            StubProvider::tool_call("c9", "probe", json!({"n": 1})),
            StubProvider::text("done"),
        ]),
    );
    rt.registry()
        .register_fn(
            rcore::ToolSchema::new("probe", "test probe"),
            |_ctx, _params| async move { Ok("probe says hi".to_string()) },
        )
        .unwrap();

    rt.send_to_agent(&Ctx::background(), "assistant", "go")
        .await
        .unwrap();
    let history = rt.process_for("assistant").unwrap().history();
    // user, assistant(tool_use), user(tool_result), assistant.
    assert_eq!(history.len(), 4);
    assert!(history[1].content.contains("<tool_use id=\"c9\" name=\"probe\">"));
    let results = rcore::parse_tool_results(&history[2].content);
    assert_eq!(results[0].body, "probe says hi");

    let metrics = rt.process_for("assistant").unwrap().metrics();
    assert_eq!(metrics.tool_calls, 1);
    assert_eq!(metrics.iterations, 2);
}

#[tokio::test]
async fn budget_cap_fails_the_send() {
    const DOC: &str = r#"
name: capped
agents:
  assistant:
    model: m-test
    system: "Helpful."
    budget: "$0.05"
"#;
    let document = load(DOC).unwrap();
    let provider = StubProvider::echo().with_usage(Usage {
        input_tokens: 10,
        output_tokens: 10,
        cost: 0.10,
    });
    let rt = Runtime::new(document, Arc::new(provider)).unwrap();
    let err = rt
        .send_to_agent(&Ctx::background(), "assistant", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded { .. }));
}

// --- Streaming ---

#[tokio::test]
async fn stream_delivers_content_and_survives_subscribers() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let process = rt.process_for("assistant").unwrap();
    let handle = process.send_stream("streamed hello");

    // First subscriber reads everything.
    let mut rx = handle.subscribe();
    let mut content = String::new();
    while let Some(event) = rx.recv().await {
        if let StreamEvent::Content(delta) = event {
            content.push_str(&delta);
        }
    }
    assert_eq!(content, "streamed hello");

    // A late subscriber still sees the replayed history.
    let mut late = handle.subscribe();
    let mut replayed = String::new();
    while let Some(event) = late.recv().await {
        if let StreamEvent::Content(delta) = event {
            replayed.push_str(&delta);
        }
    }
    assert_eq!(replayed, "streamed hello");
}

#[tokio::test]
async fn send_async_can_be_awaited() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let process = rt.process_for("assistant").unwrap();
    let handle = process.send_async("async hello");
    assert_eq!(handle.wait().await.unwrap(), "async hello");
}

// --- Supervision ---

struct FailingProvider;

impl Provider for FailingProvider {
    fn complete<'a>(
        &'a self,
        _ctx: &'a Ctx,
        _request: ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = rcore::Result<Completion>> + Send + 'a>> {
        Box::pin(async move { Err(Error::Upstream("model down".into())) })
    }
}

#[tokio::test]
async fn restart_supervision_respawns_fresh_process() {
    const DOC: &str = r#"
name: supervised
agents:
  flaky:
    model: m-test
    system: "Flaky."
    supervision:
      strategy: restart
      max_restarts: 2
      window: 1m
"#;
    let document = load(DOC).unwrap();
    let rt = Runtime::new(document, Arc::new(FailingProvider)).unwrap();
    let original = rt.process_for("flaky").unwrap();

    let err = rt
        .send_to_agent(&Ctx::background(), "flaky", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(original.status(), Status::Failed);

    let replacement = rt.process_for("flaky").unwrap();
    assert_ne!(replacement.id(), original.id());
    assert_eq!(replacement.status(), Status::Pending);
}

// --- Workflows through the facade ---

#[tokio::test]
async fn sub_workflow_and_conditional_end_to_end() {
    const DOC: &str = r#"
name: flow
settings:
  model: m-test
agents:
  worker:
    system: "Works."
workflows:
  classify:
    inputs:
      text:
        type: string
        required: true
    steps:
      - worker:
          send: "{{text}}"
          save: verdict
    output: "{{verdict}}"
  main:
    inputs:
      text:
        type: string
        required: true
    steps:
      - workflow: classify
        with:
          text: "{{text}}"
        save: verdict
      - if: "urgent in {{verdict}}"
        then:
          - return: "escalated"
        else:
          - return: "routine"
"#;
    let rt = runtime(DOC, StubProvider::echo());
    let escalated = rt
        .run_workflow(
            &Ctx::background(),
            "main",
            inputs(&[("text", json!("this is urgent"))]),
        )
        .await
        .unwrap();
    assert_eq!(escalated, json!("escalated"));

    let routine = rt
        .run_workflow(
            &Ctx::background(),
            "main",
            inputs(&[("text", json!("nothing much"))]),
        )
        .await
        .unwrap();
    assert_eq!(routine, json!("routine"));
}

// --- Remote tool servers ---

#[tokio::test]
async fn start_connects_in_process_native_servers() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let ctx = Ctx::background();
    let connected = rt.start(&ctx).await.unwrap();
    assert!(connected >= 1);

    // The clock server's tool is namespaced by server name.
    let out = rt
        .registry()
        .execute(&ctx, "clock__unix_time", json!({}))
        .await
        .unwrap();
    assert!(out.parse::<u64>().is_ok());

    let status = rt.registry().remote_status();
    assert!(status.iter().any(|(name, count)| name == "clock" && *count == 1));

    // Disconnect removes the namespaced tools.
    assert!(rt.registry().disconnect_server("clock"));
    assert!(!rt.registry().contains("clock__unix_time"));
}

#[tokio::test]
async fn connect_tool_reaches_native_registry() {
    let rt = runtime(GREET_DOC, StubProvider::echo());
    let ctx = Ctx::background();
    let out = rt
        .registry()
        .execute(&ctx, "connect_remote_tool_server", json!({"name": "clock"}))
        .await
        .unwrap();
    assert!(out.contains("connected 'clock'"));

    let listing = rt
        .registry()
        .execute(&ctx, "list_mcp_registry", json!({}))
        .await
        .unwrap();
    assert!(listing.contains("clock"));
}

#[tokio::test]
async fn spawn_tree_tracks_processes() {
    let rt = runtime(TEAM_DOC, StubProvider::echo());
    let tree = rt.orchestrator().spawn_tree();
    let agents: Vec<&str> = tree.iter().map(|node| node.agent.as_str()).collect();
    assert!(agents.contains(&"dan"));
    assert!(agents.contains(&"ann"));
    assert!(agents.contains(&"mother"));
    assert!(agents.contains(&"hermes"));
}
