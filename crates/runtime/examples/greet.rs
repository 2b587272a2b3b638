//! Minimal workflow run: one agent, one greet workflow.
//!
//! ```sh
//! cargo run -p reef-runtime --example greet --features testing
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use rcore::{Ctx, load};
use reef_runtime::{Runtime, StubProvider};

const DOC: &str = r#"
name: greet-demo
agents:
  assistant:
    model: stub
    system: "You are a helpful assistant."
workflows:
  greet:
    description: Greets someone by name.
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("reef_runtime=debug")
        .init();

    let document = load(DOC)?;
    let runtime = Runtime::new(document, Arc::new(StubProvider::echo()))?;

    let mut inputs = BTreeMap::new();
    inputs.insert("name".to_string(), serde_json::json!("World"));
    let result = runtime
        .run_workflow(&Ctx::background(), "greet", inputs)
        .await?;

    println!("workflow result: {result}");
    Ok(())
}
