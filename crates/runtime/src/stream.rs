//! Stream publisher: decouples a running send from its consumers.
//!
//! The server-side stream outlives any single subscriber. Events land
//! in a bounded history buffer; subscribers get a replay of the
//! history and then live events. Slow subscribers are skipped rather
//! than back-pressuring the producer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Bounded event buffer size; overflow drops oldest history and skips
/// slow subscribers.
pub const STREAM_BUFFER: usize = 256;

struct Inner<T> {
    history: VecDeque<T>,
    subscribers: Vec<mpsc::Sender<T>>,
    finished: bool,
}

/// A broadcast publisher with history replay.
pub struct Publisher<T: Clone> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Clone> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Create an empty publisher.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: VecDeque::new(),
                subscribers: Vec::new(),
                finished: false,
            })),
        }
    }

    /// Publish one event to history and all live subscribers.
    ///
    /// Best-effort delivery: a subscriber whose buffer is full misses
    /// the event, a closed subscriber is dropped.
    pub fn publish(&self, event: T) {
        let mut inner = self.inner.lock();
        if inner.finished {
            return;
        }
        if inner.history.len() == STREAM_BUFFER {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());
        inner.subscribers.retain(|sub| {
            match sub.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Attach a subscriber: replays buffered history, then live events.
    ///
    /// After [`finish`](Self::finish), the receiver yields the history
    /// and then closes.
    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut inner = self.inner.lock();
        for event in &inner.history {
            // History fits the channel by construction.
            let _ = tx.try_send(event.clone());
        }
        if !inner.finished {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// Close all subscriber channels. Idempotent; only the first call
    /// does anything.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        if inner.finished {
            return;
        }
        inner.finished = true;
        inner.subscribers.clear();
    }

    /// Whether the stream has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscriber_replays_history() {
        let publisher = Publisher::new();
        publisher.publish(1u32);
        publisher.publish(2);

        let mut rx = publisher.subscribe();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));

        publisher.publish(3);
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn finish_closes_subscribers_once() {
        let publisher = Publisher::new();
        publisher.publish(1u32);
        let mut rx = publisher.subscribe();
        publisher.finish();
        publisher.finish();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn subscriber_after_finish_gets_history_then_closes() {
        let publisher = Publisher::new();
        publisher.publish(7u32);
        publisher.finish();

        let mut rx = publisher.subscribe();
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn history_bounded_with_drop_on_overflow() {
        let publisher = Publisher::new();
        for i in 0..(STREAM_BUFFER + 10) {
            publisher.publish(i);
        }
        let mut rx = publisher.subscribe();
        // Oldest events were dropped.
        assert_eq!(rx.recv().await, Some(10));
    }

    #[tokio::test]
    async fn publish_after_finish_is_noop() {
        let publisher = Publisher::new();
        publisher.finish();
        publisher.publish(1u32);
        let mut rx = publisher.subscribe();
        assert_eq!(rx.recv().await, None);
    }
}
