//! Cooperative cancellation context.
//!
//! A [`Ctx`] carries a deadline, a cancel signal, and request-scoped
//! values. Every blocking operation in the runtime takes a `Ctx` and
//! returns promptly once it is cancelled or its deadline passes.
//! Cloning is cheap; clones observe the same cancel signal.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Request context: deadline + cancel signal + injected values.
#[derive(Clone)]
pub struct Ctx {
    shared: Arc<Shared>,
    deadline: Option<Instant>,
    values: Arc<BTreeMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("cancelled", &self.shared.cancelled.load(Ordering::Relaxed))
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Ctx {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            deadline: None,
            values: Arc::new(BTreeMap::new()),
        }
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut ctx = Self::background();
        ctx.deadline = Some(Instant::now() + timeout);
        ctx
    }

    /// Derive a child context with a (possibly tighter) deadline.
    ///
    /// The child shares the parent's cancel signal; cancelling the
    /// parent cancels the child, never the other way around.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Self {
            shared: self.shared.clone(),
            deadline,
            values: self.values.clone(),
        }
    }

    /// Attach a request-scoped value under a well-known key.
    pub fn with_value<T: Any + Send + Sync>(&self, key: &'static str, value: T) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key, Arc::new(value));
        Self {
            shared: self.shared.clone(),
            deadline: self.deadline,
            values: Arc::new(values),
        }
    }

    /// Read a request-scoped value previously attached with [`with_value`](Self::with_value).
    pub fn value<T: Any + Send + Sync>(&self, key: &'static str) -> Option<Arc<T>> {
        self.values.get(key).and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Whether the cancel signal has fired (deadline not considered).
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the deadline, if any, has passed.
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Error corresponding to the current done-state, if done.
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            Some(Error::Cancelled)
        } else if self.deadline_passed() {
            Some(Error::Timeout)
        } else {
            None
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        loop {
            if self.is_cancelled() || self.deadline_passed() {
                return;
            }
            let notified = self.shared.notify.notified();
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => return,
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Run a future, aborting with [`Error::Cancelled`] or
    /// [`Error::Timeout`] if the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            result = fut => result,
            _ = self.done() => Err(self.err().unwrap_or(Error::Cancelled)),
        }
    }
}
