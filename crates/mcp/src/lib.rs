//! Remote tool-protocol client.
//!
//! Connects to external tool servers over stdio, HTTP, or SSE,
//! performs the initialization handshake, lists tools, and dispatches
//! invocations. Tool names are namespaced by the caller (the registry)
//! as `<server>__<tool>` so names never collide across servers.

use rcore::{Ctx, Error, RemoteServerConfig, Result, ToolSchema};
use serde_json::Value;

pub use native::{NATIVE_SERVERS, NativeKind, NativeServer, lookup};
pub use transport::{ToolServer, Transport};

mod native;
pub mod protocol;
mod transport;

/// A connected remote tool server.
pub struct RemoteServer {
    name: String,
    transport: Transport,
    tools: Vec<ToolSchema>,
    server_info: Value,
}

impl RemoteServer {
    /// Connect, handshake, and list the server's tools.
    pub async fn connect(ctx: &Ctx, config: &RemoteServerConfig) -> Result<Self> {
        let transport = Transport::connect(ctx, &config.transport).await?;
        Self::initialize(ctx, &config.name, transport).await
    }

    /// Run the same handshake against an in-process server.
    ///
    /// Built-in native servers take this path; no subprocess is
    /// spawned.
    pub async fn connect_in_process(
        ctx: &Ctx,
        name: &str,
        server: std::sync::Arc<dyn ToolServer>,
    ) -> Result<Self> {
        Self::initialize(ctx, name, Transport::InProcess(server)).await
    }

    async fn initialize(ctx: &Ctx, name: &str, transport: Transport) -> Result<Self> {
        let init = transport
            .request(ctx, "initialize", protocol::initialize_params())
            .await?;
        let server_info = init.get("serverInfo").cloned().unwrap_or(Value::Null);
        transport
            .notify(ctx, "notifications/initialized", Value::Null)
            .await?;

        let listing = transport
            .request(ctx, "tools/list", serde_json::json!({}))
            .await?;
        let tools: Vec<ToolSchema> = listing
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| tools.iter().filter_map(ToolSchema::from_wire).collect())
            .unwrap_or_default();

        tracing::info!(server = name, tools = tools.len(), "remote server initialized");

        Ok(Self {
            name: name.to_string(),
            transport,
            tools,
            server_info,
        })
    }

    /// The server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-reported identity from the handshake.
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    /// Tools the server listed at connect time.
    pub fn tools(&self) -> Vec<ToolSchema> {
        self.tools.clone()
    }

    /// Invoke a tool with JSON arguments.
    pub async fn call_tool(&self, ctx: &Ctx, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .transport
            .request(
                ctx,
                "tools/call",
                serde_json::json!({"name": name, "arguments": arguments}),
            )
            .await?;

        let text = protocol::extract_text(&result);
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(Error::tool(
                format!("{}__{name}", self.name),
                std::io::Error::other(text),
            ));
        }
        Ok(text)
    }

    /// Read a resource by URI, if the server exposes any.
    pub async fn read_resource(&self, ctx: &Ctx, uri: &str) -> Result<String> {
        let result = self
            .transport
            .request(ctx, "resources/read", serde_json::json!({"uri": uri}))
            .await?;
        let text = result
            .get("contents")
            .and_then(Value::as_array)
            .map(|contents| {
                contents
                    .iter()
                    .filter_map(|c| c.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }
}
