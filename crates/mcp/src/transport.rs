//! Transports to remote tool servers.
//!
//! Three ways to reach a server: a subprocess speaking JSON over stdio
//! lines, a plain HTTP request/response endpoint, and a server-sent
//! events stream with a POST side-channel. All three expose the same
//! `request`/`notify` surface.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rcore::{Ctx, Error, RemoteTransport, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use crate::protocol::{Request, Response};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// An in-process tool server: the protocol surface without a wire.
///
/// Built-in native servers implement this and get connected by the
/// same handshake/list/call flow as external ones, minus the
/// subprocess.
pub trait ToolServer: Send + Sync {
    /// Handle one protocol method.
    fn handle(&self, method: &str, params: Value) -> Result<Value>;
}

/// A connected transport.
pub enum Transport {
    /// Subprocess with JSON-over-line framing.
    Stdio(StdioTransport),
    /// HTTP request/response.
    Http(HttpTransport),
    /// Server-sent events with a POST side-channel.
    Sse(SseTransport),
    /// In-process server; no subprocess, no wire.
    InProcess(Arc<dyn ToolServer>),
}

impl Transport {
    /// Open a transport described by the document configuration.
    pub async fn connect(ctx: &Ctx, config: &RemoteTransport) -> Result<Self> {
        match config {
            RemoteTransport::Stdio { command, args, env } => {
                Ok(Self::Stdio(StdioTransport::spawn(command, args, env)?))
            }
            RemoteTransport::Http { url } => Ok(Self::Http(HttpTransport::new(url))),
            RemoteTransport::Sse { url } => Ok(Self::Sse(SseTransport::connect(ctx, url).await?)),
        }
    }

    /// Send a request and await its response.
    pub async fn request(&self, ctx: &Ctx, method: &str, params: Value) -> Result<Value> {
        let response = match self {
            Self::Stdio(t) => t.request(ctx, method, params).await?,
            Self::Http(t) => t.request(ctx, method, params).await?,
            Self::Sse(t) => t.request(ctx, method, params).await?,
            Self::InProcess(server) => return server.handle(method, params),
        };
        if let Some(error) = response.error {
            return Err(Error::Upstream(format!(
                "{method} failed: {} (code {})",
                error.message, error.code
            )));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, ctx: &Ctx, method: &str, params: Value) -> Result<()> {
        match self {
            Self::Stdio(t) => t.notify(method, params).await,
            Self::Http(t) => t.notify(ctx, method, params).await,
            Self::Sse(t) => t.notify(ctx, method, params).await,
            Self::InProcess(server) => {
                let _ = server.handle(method, params);
                Ok(())
            }
        }
    }
}

/// Subprocess transport: one JSON message per line.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
}

impl StdioTransport {
    fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Upstream(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Upstream("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Upstream("child stdout unavailable".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(response) = serde_json::from_str::<Response>(&line) else {
                    tracing::trace!(line = %line, "skipping non-response line");
                    continue;
                };
                if let Some(id) = response.id
                    && let Some(tx) = reader_pending.lock().remove(&id)
                {
                    let _ = tx.send(response);
                }
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
        })
    }

    async fn write(&self, request: &Request<'_>) -> Result<()> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| Error::Upstream(format!("encode failed: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Upstream(format!("write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Upstream(format!("flush failed: {e}")))
    }

    async fn request(&self, ctx: &Ctx, method: &str, params: Value) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        self.write(&Request::new(id, method, params)).await?;

        let result = ctx
            .run(async {
                rx.await
                    .map_err(|_| Error::Upstream("server closed before responding".into()))
            })
            .await;
        if result.is_err() {
            self.pending.lock().remove(&id);
        }
        result
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write(&Request::notification(method, params)).await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let mut child = self.child.lock();
        let _ = child.start_kill();
    }
}

/// Plain HTTP request/response transport.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn post(&self, ctx: &Ctx, request: &Request<'_>) -> Result<Option<Response>> {
        let send = async {
            let response = self
                .client
                .post(&self.url)
                .json(request)
                .send()
                .await
                .map_err(|e| Error::Upstream(format!("http transport: {e}")))?;
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(Error::RateLimited);
            }
            if !response.status().is_success() {
                return Err(Error::Upstream(format!(
                    "http transport: status {}",
                    response.status()
                )));
            }
            let body = response
                .text()
                .await
                .map_err(|e| Error::Upstream(format!("http transport: {e}")))?;
            if body.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| Error::Upstream(format!("invalid response: {e}")))
        };
        ctx.run(send).await
    }

    async fn request(&self, ctx: &Ctx, method: &str, params: Value) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.post(ctx, &Request::new(id, method, params))
            .await?
            .ok_or_else(|| Error::Upstream("empty response body".into()))
    }

    async fn notify(&self, ctx: &Ctx, method: &str, params: Value) -> Result<()> {
        self.post(ctx, &Request::notification(method, params))
            .await
            .map(|_| ())
    }
}

/// SSE transport: responses arrive on the event stream, requests go
/// out as POSTs to the endpoint the server announces.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    pending: Pending,
    next_id: AtomicU64,
}

impl SseTransport {
    async fn connect(ctx: &Ctx, url: &str) -> Result<Self> {
        let client = reqwest::Client::new();
        let response = ctx
            .run(async {
                client
                    .get(url)
                    .header("Accept", "text/event-stream")
                    .send()
                    .await
                    .map_err(|e| Error::Upstream(format!("sse connect: {e}")))
            })
            .await?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "sse connect: status {}",
                response.status()
            )));
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader_pending = pending.clone();
        let base = url.to_string();
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut endpoint_tx = Some(endpoint_tx);
            let mut buffer = String::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(boundary) = buffer.find("\n\n") {
                    let event = buffer[..boundary].to_string();
                    buffer.drain(..boundary + 2);
                    handle_sse_event(&event, &base, &mut endpoint_tx, &reader_pending);
                }
            }
        });

        // The server has a short grace period to announce its POST
        // endpoint; otherwise requests go back to the stream URL.
        let post_url = tokio::time::timeout(std::time::Duration::from_secs(2), endpoint_rx)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_else(|| url.to_string());

        Ok(Self {
            client,
            post_url,
            pending,
            next_id: AtomicU64::new(1),
        })
    }

    async fn post(&self, ctx: &Ctx, request: &Request<'_>) -> Result<()> {
        ctx.run(async {
            let response = self
                .client
                .post(&self.post_url)
                .json(request)
                .send()
                .await
                .map_err(|e| Error::Upstream(format!("sse post: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::Upstream(format!(
                    "sse post: status {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
    }

    async fn request(&self, ctx: &Ctx, method: &str, params: Value) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        self.post(ctx, &Request::new(id, method, params)).await?;

        let result = ctx
            .run(async {
                rx.await
                    .map_err(|_| Error::Upstream("stream closed before responding".into()))
            })
            .await;
        if result.is_err() {
            self.pending.lock().remove(&id);
        }
        result
    }

    async fn notify(&self, ctx: &Ctx, method: &str, params: Value) -> Result<()> {
        self.post(ctx, &Request::notification(method, params)).await
    }
}

fn handle_sse_event(
    raw: &str,
    base_url: &str,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
    pending: &Pending,
) {
    let mut event_name = "message";
    let mut data = String::new();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
    }

    match event_name {
        "endpoint" => {
            if let Some(tx) = endpoint_tx.take() {
                let endpoint = if data.starts_with("http") {
                    data
                } else {
                    join_url(base_url, &data)
                };
                let _ = tx.send(endpoint);
            }
        }
        _ => {
            let Ok(response) = serde_json::from_str::<Response>(&data) else {
                return;
            };
            if let Some(id) = response.id
                && let Some(tx) = pending.lock().remove(&id)
            {
                let _ = tx.send(response);
            }
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    match base.find("://").and_then(|scheme| {
        base[scheme + 3..]
            .find('/')
            .map(|host_end| &base[..scheme + 3 + host_end])
    }) {
        Some(origin) if path.starts_with('/') => format!("{origin}{path}"),
        _ => format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_event_routes_response_by_id() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert(3, tx);

        handle_sse_event(
            "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"ok\":true}}",
            "http://localhost/sse",
            &mut None,
            &pending,
        );
        let response = rx.try_recv().unwrap();
        assert_eq!(response.id, Some(3));
        assert!(response.result.is_some());
    }

    #[test]
    fn sse_endpoint_event_resolves_relative_path() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        let mut slot = Some(tx);
        handle_sse_event(
            "event: endpoint\ndata: /messages?session=abc",
            "http://localhost:9000/sse",
            &mut slot,
            &pending,
        );
        assert_eq!(rx.try_recv().unwrap(), "http://localhost:9000/messages?session=abc");
    }

    #[test]
    fn join_url_handles_absolute_and_relative() {
        assert_eq!(
            join_url("http://host:1/sse", "/msg"),
            "http://host:1/msg"
        );
        assert_eq!(join_url("http://host:1/sse", "msg"), "http://host:1/sse/msg");
    }
}
