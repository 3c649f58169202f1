//! Subscriber pipeline: bounded outbound queue plus a single-consumer
//! delivery contract for one client on one topic.
//!
//! The pipeline owns only its queue. How the queue is drained onto a
//! transport is the session's business (see `server::session`): a forwarder
//! task calls `recv` and moves envelopes onto the session's write queue.
//! Publishers interact with the producer side only (`try_enqueue`,
//! `drain_oldest`) and never block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::protocol::Envelope;

const DEFAULT_QUEUE_CAPACITY: usize = 100;

// Lifecycle: Active -> Closing -> Closed. Closing is entered by `close`
// (or an overflow disconnect); Closed once the consumer has observed
// queue closure and exited.
const STATE_ACTIVE: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Outcome of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Accepted,
    Rejected,
}

struct QueueInner {
    buf: VecDeque<Envelope>,
    closed: bool,
}

pub struct SubscriberPipeline {
    client_id: String,
    cap: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
    state: AtomicU8,
    done: CancellationToken,
}

impl SubscriberPipeline {
    pub fn new(client_id: impl Into<String>, queue_capacity: usize) -> Self {
        let cap = if queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            queue_capacity
        };
        Self {
            client_id: client_id.into(),
            cap,
            inner: Mutex::new(QueueInner {
                buf: VecDeque::with_capacity(cap),
                closed: false,
            }),
            notify: Notify::new(),
            state: AtomicU8::new(STATE_ACTIVE),
            done: CancellationToken::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn queue_capacity(&self) -> usize {
        self.cap
    }

    /// Non-blocking enqueue. Accepted iff the pipeline is Active and the
    /// queue has a free slot.
    pub fn try_enqueue(&self, envelope: Envelope) -> EnqueueResult {
        if !self.is_active() {
            return EnqueueResult::Rejected;
        }
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.buf.len() >= self.cap {
                return EnqueueResult::Rejected;
            }
            inner.buf.push_back(envelope);
        }
        self.notify.notify_one();
        EnqueueResult::Accepted
    }

    /// Non-blocking removal of the oldest queued envelope. Used by the
    /// DROP_OLDEST policy; returns `None` when the queue is empty or closed.
    pub fn drain_oldest(&self) -> Option<Envelope> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.buf.pop_front()
    }

    /// Await the next envelope. Single consumer only. Envelopes still queued
    /// at close time are drained before `None` is returned, so best-effort
    /// notifications enqueued just before closure are not lost.
    pub async fn recv(&self) -> Option<Envelope> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(env) = inner.buf.pop_front() {
                    return Some(env);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Idempotent, non-blocking. Moves Active -> Closing and closes the
    /// queue for new sends; the consumer observes closure, drains what is
    /// left, and acknowledges via `mark_closed`.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_ACTIVE, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.notify.notify_one();
    }

    /// Consumer-side acknowledgement that the pipeline has fully stopped.
    pub fn mark_closed(&self) {
        self.close();
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.done.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_ACTIVE
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CLOSED
    }

    /// Resolves once the consumer has acknowledged closure. Callers that
    /// need a bounded wait wrap this in a timeout.
    pub async fn closed(&self) {
        self.done.cancelled().await
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().buf.len()
    }
}
