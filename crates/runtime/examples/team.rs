//! Team delegation: a lead agent forwarding work with caller context.
//!
//! ```sh
//! cargo run -p reef-runtime --example team --features testing
//! ```

use std::sync::Arc;

use rcore::{Ctx, Message, load};
use reef_runtime::{CALLER_KEY, Runtime, StubProvider, team_group_name};

const DOC: &str = r#"
name: team-demo
settings:
  model: stub
agents:
  dan:
    system: "Team lead. Delegates scheduling to ann."
    team: [ann]
    delegation:
      context_window: 2
      blackboard: true
  ann:
    system: "Keeps the calendar."
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("reef_runtime=debug")
        .init();

    let document = load(DOC)?;
    let runtime = Runtime::new(document, Arc::new(StubProvider::echo()))?;

    // Give the lead some history worth forwarding.
    runtime.process_for("dan").unwrap().preload(vec![
        Message::user("I struggle with delegation"),
        Message::assistant("Classic Operator's Trap"),
    ]);

    let ctx = Ctx::background().with_value(CALLER_KEY, "dan".to_string());
    let response = runtime
        .registry()
        .execute(
            &ctx,
            "delegate",
            serde_json::json!({"agent": "ann", "message": "Schedule a follow-up"}),
        )
        .await?;
    println!("ann received:\n{response}\n");

    let group = runtime
        .orchestrator()
        .group(&team_group_name("dan"))
        .expect("team group exists");
    group.bb_set("plan", serde_json::json!("ship v2"));
    println!("blackboard keys: {:?}", group.bb_keys());

    Ok(())
}
