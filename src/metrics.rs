//! Counter facade. Safe under concurrent calls; never invoked while a
//! broker lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
struct TopicCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    subscribers: AtomicU64,
}

#[derive(Default)]
pub struct Metrics {
    total_topics: AtomicU64,
    total_published: AtomicU64,
    total_dropped: AtomicU64,
    topics: DashMap<String, TopicCounters>,
}

// ========================================
// SNAPSHOT SHAPES
// ========================================

#[derive(Debug, Clone, Serialize)]
pub struct GlobalCounters {
    pub topics: u64,
    pub subscribers: u64,
    pub messages: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicCountersSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribers: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalCounters,
    pub topics: HashMap<String, TopicCountersSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_published(&self, topic: &str) {
        self.total_published.fetch_add(1, Ordering::Relaxed);
        self.topics
            .entry(topic.to_string())
            .or_default()
            .published
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivered(&self, topic: &str, n: u64) {
        if n == 0 {
            return;
        }
        self.topics
            .entry(topic.to_string())
            .or_default()
            .delivered
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self, topic: &str, n: u64) {
        if n == 0 {
            return;
        }
        self.total_dropped.fetch_add(n, Ordering::Relaxed);
        self.topics
            .entry(topic.to_string())
            .or_default()
            .dropped
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_topics(&self) {
        self.total_topics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_topics(&self) {
        let _ = self
            .total_topics
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Gauge: current subscriber count for a topic.
    pub fn set_subscribers(&self, topic: &str, count: usize) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .store(count as u64, Ordering::Relaxed);
    }

    pub fn remove_topic(&self, topic: &str) {
        self.topics.remove(topic);
    }

    /// Consistent-enough copy of every counter; individual values may lag
    /// in-flight updates but are never torn.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut topics = HashMap::with_capacity(self.topics.len());
        let mut subscriber_total = 0;
        for entry in self.topics.iter() {
            let counters = entry.value();
            let subscribers = counters.subscribers.load(Ordering::Relaxed);
            subscriber_total += subscribers;
            topics.insert(
                entry.key().clone(),
                TopicCountersSnapshot {
                    published: counters.published.load(Ordering::Relaxed),
                    delivered: counters.delivered.load(Ordering::Relaxed),
                    dropped: counters.dropped.load(Ordering::Relaxed),
                    subscribers,
                },
            );
        }

        MetricsSnapshot {
            global: GlobalCounters {
                topics: self.total_topics.load(Ordering::Relaxed),
                subscribers: subscriber_total,
                messages: self.total_published.load(Ordering::Relaxed),
                dropped: self.total_dropped.load(Ordering::Relaxed),
            },
            topics,
        }
    }
}
