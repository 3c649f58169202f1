//! Topic: binds a name to a history log and a set of subscriber pipelines,
//! and fans published messages out to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::broker::history::History;
use crate::broker::subscriber::{EnqueueResult, SubscriberPipeline};
use crate::protocol::{Envelope, Message, ERR_BUFFER_OVERFLOW};

// ========================================
// PUBLISH POLICY
// ========================================

/// What to do when a subscriber's outbound queue is full at fan-out time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// Drop one oldest queued envelope, then retry the enqueue once.
    #[default]
    DropOldest,
    /// Emit a BUFFER_OVERFLOW error (best effort) and detach the subscriber.
    Disconnect,
}

impl PublishPolicy {
    /// Unrecognized values behave as DROP_OLDEST.
    pub fn parse(s: &str) -> Self {
        match s {
            "DISCONNECT" => PublishPolicy::Disconnect,
            _ => PublishPolicy::DropOldest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishPolicy::DropOldest => "DROP_OLDEST",
            PublishPolicy::Disconnect => "DISCONNECT",
        }
    }
}

// ========================================
// TOPIC
// ========================================

pub struct Topic {
    pub name: String,
    history: History,
    subs: RwLock<HashMap<String, Arc<SubscriberPipeline>>>,
    messages: AtomicU64,
    dropped: AtomicU64,
}

impl Topic {
    pub fn new(name: impl Into<String>, history_capacity: usize) -> Self {
        Self {
            name: name.into(),
            history: History::new(history_capacity),
            subs: RwLock::new(HashMap::new()),
            messages: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a pipeline under its client id. An existing pipeline for the
    /// same client is closed synchronously before being replaced.
    pub fn attach(&self, sub: Arc<SubscriberPipeline>) {
        let mut subs = self.subs.write();
        if let Some(existing) = subs.insert(sub.client_id().to_string(), sub) {
            existing.close();
        }
    }

    /// Close and remove the pipeline for `client_id`. Returns whether one
    /// existed.
    pub fn detach(&self, client_id: &str) -> bool {
        let removed = self.subs.write().remove(client_id);
        match removed {
            Some(sub) => {
                sub.close();
                true
            }
            None => false,
        }
    }

    /// Append to history and enqueue onto every active subscriber, applying
    /// `policy` on overflow. Never blocks; all queue operations are
    /// non-blocking. Returns `(delivered, dropped)` subscriber counts.
    pub fn publish(&self, msg: Message, policy: PublishPolicy) -> (usize, usize) {
        self.history.append(msg.clone());
        self.messages.fetch_add(1, Ordering::Relaxed);

        // Copy the active pipelines under a short read lock; enqueueing
        // happens lock-free so a slow subscriber cannot stall attach/detach.
        let subscribers: Vec<Arc<SubscriberPipeline>> = {
            let subs = self.subs.read();
            subs.values().filter(|s| s.is_active()).cloned().collect()
        };

        let envelope = Envelope::message(&self.name, msg);

        let mut delivered = 0;
        let mut dropped = 0;
        for sub in &subscribers {
            if self.deliver(sub, &envelope, policy) {
                delivered += 1;
            } else {
                dropped += 1;
            }
        }

        (delivered, dropped)
    }

    fn deliver(&self, sub: &Arc<SubscriberPipeline>, envelope: &Envelope, policy: PublishPolicy) -> bool {
        match sub.try_enqueue(envelope.clone()) {
            EnqueueResult::Accepted => true,
            EnqueueResult::Rejected => match policy {
                PublishPolicy::DropOldest => self.drop_oldest_and_retry(sub, envelope),
                PublishPolicy::Disconnect => self.disconnect_overflowed(sub),
            },
        }
    }

    /// DROP_OLDEST: one non-blocking drain of the oldest queued envelope,
    /// then one retry. The dropped counter advances by one either way.
    fn drop_oldest_and_retry(&self, sub: &Arc<SubscriberPipeline>, envelope: &Envelope) -> bool {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if sub.drain_oldest().is_none() {
            // Queue emptied (or closed) in the interim; nothing to displace.
            return false;
        }
        sub.try_enqueue(envelope.clone()) == EnqueueResult::Accepted
    }

    /// DISCONNECT: best-effort overflow notice, then close and detach.
    fn disconnect_overflowed(&self, sub: &Arc<SubscriberPipeline>) -> bool {
        let notice = Envelope::error(
            None,
            ERR_BUFFER_OVERFLOW,
            "subscriber queue overflow, disconnecting",
        );
        let _ = sub.try_enqueue(notice);

        debug!(
            "disconnecting overflowed subscriber {} from '{}'",
            sub.client_id(),
            self.name
        );
        sub.close();
        self.detach(sub.client_id());
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Snapshot of all attached pipelines, active or not.
    pub fn subscribers(&self) -> Vec<Arc<SubscriberPipeline>> {
        self.subs.read().values().cloned().collect()
    }

    pub fn get_subscriber(&self, client_id: &str) -> Option<Arc<SubscriberPipeline>> {
        self.subs.read().get(client_id).cloned()
    }

    pub fn list_subscriber_ids(&self) -> Vec<String> {
        self.subs
            .read()
            .iter()
            .filter(|(_, s)| s.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().values().filter(|s| s.is_active()).count()
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_n(&self, n: i64) -> Vec<Message> {
        self.history.last_n(n)
    }

    pub fn history_capacity(&self) -> usize {
        self.history.capacity()
    }

    /// Close every pipeline and empty the subscriber map. Idempotent.
    pub fn close(&self) {
        let drained: Vec<Arc<SubscriberPipeline>> = {
            let mut subs = self.subs.write();
            subs.drain().map(|(_, sub)| sub).collect()
        };
        for sub in drained {
            sub.close();
        }
    }
}
