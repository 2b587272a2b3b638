//! The LLM provider seam.
//!
//! The runtime never speaks a vendor wire format; it hands a
//! [`ProviderRequest`] to whatever implements [`Provider`] and gets
//! back content, tool calls, and usage. The scripted [`StubProvider`]
//! (feature `testing`) drives tests and examples without a network.

use std::pin::Pin;

use futures_core::Stream;
use rcore::{Ctx, Message, Result, ToolSchema};
use serde_json::Value;

/// One completion request.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    /// Model identifier from the agent definition.
    pub model: String,
    /// Sampling temperature, if set.
    pub temperature: Option<f64>,
    /// Full message list, system message first.
    pub messages: Vec<Message>,
    /// Tool schemas available this turn.
    pub tools: Vec<ToolSchema>,
}

/// Token usage and estimated cost of one round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Estimated cost in account currency.
    pub cost: f64,
}

impl Usage {
    /// Accumulate another round-trip's usage.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned call id; results are keyed by it.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON arguments.
    pub arguments: Value,
}

/// A full (non-streaming) completion.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Assistant text content.
    pub content: String,
    /// Tool calls, empty when the model is done.
    pub tool_calls: Vec<ToolCall>,
    /// Usage for this round-trip.
    pub usage: Usage,
}

/// One event of a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Content(String),
    /// The model opened a tool call.
    ToolCallStart {
        /// Position of the call in this turn.
        index: usize,
        /// Provider-assigned call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A fragment of a tool call's JSON arguments.
    ToolCallDelta {
        /// Which open call the fragment belongs to.
        index: usize,
        /// Argument text fragment.
        fragment: String,
    },
    /// The turn finished.
    Finished {
        /// Usage for the round-trip.
        usage: Usage,
    },
}

/// A boxed event stream.
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'a>>;

/// An LLM provider.
pub trait Provider: Send + Sync {
    /// Run one completion.
    fn complete<'a>(
        &'a self,
        ctx: &'a Ctx,
        request: ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion>> + Send + 'a>>;

    /// Run one streaming completion.
    ///
    /// The default adapter replays a [`complete`](Provider::complete)
    /// result as a short event sequence, so providers without native
    /// streaming still work with `send_stream`.
    fn stream<'a>(&'a self, ctx: &'a Ctx, request: ProviderRequest) -> EventStream<'a> {
        Box::pin(async_stream::try_stream! {
            let completion = self.complete(ctx, request).await?;
            if !completion.content.is_empty() {
                yield StreamEvent::Content(completion.content.clone());
            }
            for (index, call) in completion.tool_calls.iter().enumerate() {
                yield StreamEvent::ToolCallStart {
                    index,
                    id: call.id.clone(),
                    name: call.name.clone(),
                };
                yield StreamEvent::ToolCallDelta {
                    index,
                    fragment: call.arguments.to_string(),
                };
            }
            yield StreamEvent::Finished { usage: completion.usage };
        })
    }
}

#[cfg(any(test, feature = "testing"))]
pub use stub::StubProvider;

#[cfg(any(test, feature = "testing"))]
mod stub {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    enum Mode {
        /// Return the most recent user message verbatim.
        Echo,
        /// Replay scripted completions, echoing once exhausted.
        Script(Mutex<VecDeque<Completion>>),
        /// Request the same tool call forever.
        ToolLoop { name: String, arguments: Value },
    }

    /// A deterministic provider for tests and examples.
    pub struct StubProvider {
        mode: Mode,
        usage_per_call: Usage,
    }

    impl StubProvider {
        /// Echo the last user message back as the completion.
        pub fn echo() -> Self {
            Self {
                mode: Mode::Echo,
                usage_per_call: Usage::default(),
            }
        }

        /// Replay completions in order, echoing after they run out.
        pub fn script(completions: impl IntoIterator<Item = Completion>) -> Self {
            Self {
                mode: Mode::Script(Mutex::new(completions.into_iter().collect())),
                usage_per_call: Usage::default(),
            }
        }

        /// Never stop calling the given tool. Drives iteration-cap tests.
        pub fn tool_loop(name: impl Into<String>, arguments: Value) -> Self {
            Self {
                mode: Mode::ToolLoop {
                    name: name.into(),
                    arguments,
                },
                usage_per_call: Usage::default(),
            }
        }

        /// Attach fixed per-call usage (drives budget tests).
        pub fn with_usage(mut self, usage: Usage) -> Self {
            self.usage_per_call = usage;
            self
        }

        /// A completion that calls one tool.
        pub fn tool_call(id: &str, name: &str, arguments: Value) -> Completion {
            Completion {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments,
                }],
                usage: Usage::default(),
            }
        }

        /// A plain text completion.
        pub fn text(content: &str) -> Completion {
            Completion {
                content: content.into(),
                ..Default::default()
            }
        }

        fn next(&self, request: &ProviderRequest) -> Completion {
            let mut completion = match &self.mode {
                Mode::Echo => Completion {
                    content: last_user_content(request),
                    ..Default::default()
                },
                Mode::Script(queue) => queue.lock().pop_front().unwrap_or_else(|| Completion {
                    content: last_user_content(request),
                    ..Default::default()
                }),
                Mode::ToolLoop { name, arguments } => Completion {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: format!("call_{}", request.messages.len()),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    }],
                    usage: Usage::default(),
                },
            };
            completion.usage.add(&self.usage_per_call);
            completion
        }
    }

    fn last_user_content(request: &ProviderRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == rcore::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    impl Provider for StubProvider {
        fn complete<'a>(
            &'a self,
            _ctx: &'a Ctx,
            request: ProviderRequest,
        ) -> Pin<Box<dyn Future<Output = Result<Completion>> + Send + 'a>> {
            Box::pin(async move { Ok(self.next(&request)) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn echo_returns_last_user_message() {
        let provider = StubProvider::echo();
        let request = ProviderRequest {
            messages: vec![
                Message::system("sys"),
                Message::user("first"),
                Message::assistant("mid"),
                Message::user("second"),
            ],
            ..Default::default()
        };
        let completion = provider.complete(&Ctx::background(), request).await.unwrap();
        assert_eq!(completion.content, "second");
    }

    #[tokio::test]
    async fn script_replays_then_echoes() {
        let provider = StubProvider::script(vec![StubProvider::text("scripted")]);
        let request = ProviderRequest {
            messages: vec![Message::user("hello")],
            ..Default::default()
        };
        let first = provider
            .complete(&Ctx::background(), request.clone())
            .await
            .unwrap();
        assert_eq!(first.content, "scripted");
        let second = provider.complete(&Ctx::background(), request).await.unwrap();
        assert_eq!(second.content, "hello");
    }

    #[tokio::test]
    async fn default_stream_adapter_replays_completion() {
        let provider = StubProvider::script(vec![StubProvider::tool_call(
            "c1",
            "echo",
            serde_json::json!({"text": "x"}),
        )]);
        let ctx = Ctx::background();
        let request = ProviderRequest {
            messages: vec![Message::user("go")],
            ..Default::default()
        };
        let events: Vec<_> = provider
            .stream(&ctx, request)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|e| e.unwrap())
            .collect();
        assert!(matches!(events[0], StreamEvent::ToolCallStart { .. }));
        assert!(matches!(events.last(), Some(StreamEvent::Finished { .. })));
    }
}
