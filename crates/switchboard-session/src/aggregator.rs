// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time/size-bounded batcher for streaming model output tokens.
//!
//! Token events arrive at model streaming rates; persisting and broadcasting
//! each individually is wasteful and produces UI jitter. The aggregator
//! buffers per `message_id` and flushes on four triggers: a deadline timer,
//! a size bound, a key change, or an explicit flush. Concatenation preserves
//! exact arrival order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// One flushed batch: the joined text of every buffered token for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    pub message_id: String,
    pub text: String,
}

struct AggInner {
    message_id: Option<String>,
    buf: Vec<String>,
    /// Bumped on every drain; invalidates in-flight deadline timers.
    epoch: u64,
    destroyed: bool,
}

/// Per-session token aggregator keyed by `message_id`.
pub struct TokenAggregator {
    inner: Arc<Mutex<AggInner>>,
    out: mpsc::Sender<TokenBatch>,
    flush_interval: Duration,
    max_tokens: usize,
}

impl TokenAggregator {
    /// Create an aggregator that emits batches on `out`.
    pub fn new(
        out: mpsc::Sender<TokenBatch>,
        flush_interval: Duration,
        max_tokens: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AggInner {
                message_id: None,
                buf: Vec::new(),
                epoch: 0,
                destroyed: false,
            })),
            out,
            flush_interval,
            max_tokens: max_tokens.max(1),
        }
    }

    /// Buffer one token for `message_id`, flushing as the triggers demand.
    ///
    /// After [`destroy`](Self::destroy), pushes are no-ops.
    pub async fn push(&self, message_id: &str, text: &str) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return;
        }

        // Key change: drain the previous message's buffer first.
        if inner.message_id.as_deref() != Some(message_id) {
            Self::drain(&mut inner, &self.out).await;
            inner.message_id = Some(message_id.to_string());
        }

        inner.buf.push(text.to_string());

        if inner.buf.len() >= self.max_tokens {
            Self::drain(&mut inner, &self.out).await;
            return;
        }

        // First token of a fresh batch arms the deadline timer.
        if inner.buf.len() == 1 {
            let epoch = inner.epoch;
            let inner_ref = Arc::clone(&self.inner);
            let out = self.out.clone();
            let delay = self.flush_interval;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut inner = inner_ref.lock().await;
                // A drain since arming means this timer is stale.
                if inner.epoch == epoch && !inner.destroyed {
                    Self::drain(&mut inner, &out).await;
                }
            });
        }
    }

    /// Drain the buffer immediately. An empty flush is a no-op.
    pub async fn flush(&self) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return;
        }
        Self::drain(&mut inner, &self.out).await;
    }

    /// Flush and detach: subsequent pushes become no-ops.
    pub async fn destroy(&self) {
        let mut inner = self.inner.lock().await;
        Self::drain(&mut inner, &self.out).await;
        inner.destroyed = true;
    }

    // Sends while holding the lock so batches leave in arrival order.
    async fn drain(inner: &mut AggInner, out: &mpsc::Sender<TokenBatch>) {
        inner.epoch += 1;
        if inner.buf.is_empty() {
            return;
        }
        let message_id = match &inner.message_id {
            Some(id) => id.clone(),
            None => return,
        };
        let text = inner.buf.join("");
        inner.buf.clear();
        if out.send(TokenBatch { message_id, text }).await.is_err() {
            debug!("token batch receiver dropped; discarding flush");
        }
    }
}
