//! Count-or-timeout buffering.
//!
//! A full buffer is returned straight to the pusher. A partial buffer is
//! flushed when no push arrives for `timeout_ms`: a background task sends it
//! as a [`BufferFlush`] on the channel handed out by
//! [`Combinators::buffer_flushes`]. Every push re-arms that task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::key::{CombinatorKey, CombinatorKind};
use super::state::BufferState;
use super::{cancellable_sleep, Combinators, Inner};

/// A partial buffer flushed on timeout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferFlush {
    pub stream: String,
    pub items: Vec<Value>,
}

impl Combinators {
    /// Collect pushes into batches of `size`. Returns the batch once full.
    pub fn buffer(&self, stream: &str, size: usize, timeout_ms: u64, value: Value) -> Option<Vec<Value>> {
        let size = size.max(1);
        let key = CombinatorKey::new(
            CombinatorKind::Buffer,
            stream,
            &[Value::from(size), Value::from(timeout_ms)],
        );

        self.inner
            .states
            .with::<BufferState, _>(key, stream, self.now(), |state| {
                state.items.push(value);
                state.disarm();
                if state.items.len() >= size {
                    return Some(std::mem::take(&mut state.items));
                }
                state.generation += 1;
                state.timer = self.arm_flush(key, stream, timeout_ms, state.generation);
                None
            })
    }

    /// Spawn the timeout task. Without a tokio runtime there is no timer and
    /// the buffer only flushes by count.
    fn arm_flush(&self, key: CombinatorKey, stream: &str, timeout_ms: u64, generation: u64) -> Option<AbortHandle> {
        let handle = Handle::try_current().ok()?;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        let stream = stream.to_string();

        let task = handle.spawn(async move {
            if !cancellable_sleep(Duration::from_millis(timeout_ms), shutdown).await {
                return;
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let items = inner.states.existing::<BufferState, _>(&key, |state| {
                if state.generation != generation {
                    return Vec::new();
                }
                state.timer = None;
                std::mem::take(&mut state.items)
            });

            if let Some(items) = items.filter(|items| !items.is_empty()) {
                tracing::debug!(stream = %stream, items = items.len(), "buffer flushed on timeout");
                if inner.flush_tx.send(BufferFlush { stream, items }).is_err() {
                    tracing::trace!("buffer flush receiver dropped");
                }
            }
        });
        Some(task.abort_handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::tests::manual;
    use serde_json::json;

    #[test]
    fn full_buffer_is_returned_without_a_runtime() {
        let (c, _) = manual();
        assert_eq!(c.buffer("s", 3, 100, json!(1)), None);
        assert_eq!(c.buffer("s", 3, 100, json!(2)), None);
        assert_eq!(c.buffer("s", 3, 100, json!(3)), Some(vec![json!(1), json!(2), json!(3)]));
        assert_eq!(c.buffer("s", 3, 100, json!(4)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_buffer_flushes_on_timeout() {
        let (c, _) = manual();
        let mut flushes = c.buffer_flushes().unwrap();
        assert!(c.buffer_flushes().is_none());

        c.buffer("s", 10, 100, json!("a"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        c.buffer("s", 10, 100, json!("b"));

        // re-armed by the second push, so nothing yet
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(flushes.try_recv().is_err());

        let flush = flushes.recv().await.unwrap();
        assert_eq!(flush.stream, "s");
        assert_eq!(flush.items, vec![json!("a"), json!("b")]);

        // the flushed items are gone from the buffer
        assert_eq!(c.buffer("s", 10, 100, json!("c")), None);
        let flush = flushes.recv().await.unwrap();
        assert_eq!(flush.items, vec![json!("c")]);
    }

    #[tokio::test(start_paused = true)]
    async fn count_flush_disarms_the_timer() {
        let (c, _) = manual();
        let mut flushes = c.buffer_flushes().unwrap();

        c.buffer("s", 2, 100, json!(1));
        assert!(c.buffer("s", 2, 100, json!(2)).is_some());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(flushes.try_recv().is_err());
    }
}
