//! Client flow against an in-process tool server.

use std::sync::Arc;

use rcore::Ctx;
use reef_mcp::{RemoteServer, ToolServer, lookup};
use serde_json::{Value, json};

/// A tiny scripted server for exercising the client flow.
struct Scripted;

impl ToolServer for Scripted {
    fn handle(&self, method: &str, params: Value) -> rcore::Result<Value> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "scripted", "version": "0.0.1"},
            })),
            "notifications/initialized" => Ok(Value::Null),
            "tools/list" => Ok(json!({
                "tools": [
                    {
                        "name": "shout",
                        "description": "Uppercases the input",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"text": {"type": "string"}},
                            "required": ["text"],
                        },
                    },
                    {
                        "name": "always_fails",
                        "description": "Reports a tool-side error",
                        "inputSchema": {"type": "object", "properties": {}, "required": []},
                    },
                ],
            })),
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default();
                match name {
                    "shout" => {
                        let text = params["arguments"]["text"].as_str().unwrap_or_default();
                        Ok(json!({
                            "content": [{"type": "text", "text": text.to_uppercase()}],
                        }))
                    }
                    _ => Ok(json!({
                        "isError": true,
                        "content": [{"type": "text", "text": "broken on purpose"}],
                    })),
                }
            }
            "resources/read" => Ok(json!({
                "contents": [{"uri": params["uri"], "text": "resource body"}],
            })),
            other => Err(rcore::Error::Upstream(format!("no such method '{other}'"))),
        }
    }
}

#[tokio::test]
async fn handshake_lists_tools() {
    let ctx = Ctx::background();
    let server = RemoteServer::connect_in_process(&ctx, "scripted", Arc::new(Scripted))
        .await
        .unwrap();
    assert_eq!(server.name(), "scripted");
    assert_eq!(server.server_info()["name"], "scripted");
    let tools = server.tools();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].name, "shout");
    assert_eq!(tools[0].input_schema.required(), vec!["text"]);
}

#[tokio::test]
async fn call_tool_extracts_text() {
    let ctx = Ctx::background();
    let server = RemoteServer::connect_in_process(&ctx, "scripted", Arc::new(Scripted))
        .await
        .unwrap();
    let out = server
        .call_tool(&ctx, "shout", json!({"text": "quiet"}))
        .await
        .unwrap();
    assert_eq!(out, "QUIET");
}

#[tokio::test]
async fn tool_side_errors_surface() {
    let ctx = Ctx::background();
    let server = RemoteServer::connect_in_process(&ctx, "scripted", Arc::new(Scripted))
        .await
        .unwrap();
    let err = server
        .call_tool(&ctx, "always_fails", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("tool:"));
}

#[tokio::test]
async fn resource_read_joins_contents() {
    let ctx = Ctx::background();
    let server = RemoteServer::connect_in_process(&ctx, "scripted", Arc::new(Scripted))
        .await
        .unwrap();
    let body = server
        .read_resource(&ctx, "mem://note/1")
        .await
        .unwrap();
    assert_eq!(body, "resource body");
}

#[tokio::test]
async fn native_clock_connects_without_subprocess() {
    let ctx = Ctx::background();
    let clock = lookup("clock").unwrap();
    let server =
        RemoteServer::connect_in_process(&ctx, clock.name, clock.in_process().unwrap())
            .await
            .unwrap();
    let out = server.call_tool(&ctx, "unix_time", json!({})).await.unwrap();
    assert!(out.parse::<u64>().is_ok());
}
