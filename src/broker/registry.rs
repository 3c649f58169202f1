//! Registry: process-wide topic table with create/delete lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::broker::topic::{PublishPolicy, Topic};
use crate::config::BrokerConfig;
use crate::metrics::Metrics;
use crate::protocol::{Envelope, Message};

// ========================================
// ERRORS
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    InvalidName,
    AlreadyExists,
    NotFound,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidName => write!(f, "invalid topic name"),
            RegistryError::AlreadyExists => write!(f, "topic already exists"),
            RegistryError::NotFound => write!(f, "topic not found"),
        }
    }
}

impl std::error::Error for RegistryError {}

// ========================================
// TOPIC INFO
// ========================================

/// Listing/statistics view of one topic.
#[derive(Debug, Clone, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub subscribers: usize,
    pub messages: u64,
    pub dropped: u64,
    pub capacity: usize,
}

impl TopicInfo {
    fn of(topic: &Topic) -> Self {
        Self {
            name: topic.name.clone(),
            subscribers: topic.subscriber_count(),
            messages: topic.message_count(),
            dropped: topic.dropped_count(),
            capacity: topic.history_capacity(),
        }
    }
}

// ========================================
// REGISTRY
// ========================================

/// Owns every topic. Guarded by a single readers/writer lock; the metrics
/// facade is only ever called after the lock is released.
pub struct Registry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    cfg: BrokerConfig,
    metrics: Arc<Metrics>,
}

impl Registry {
    pub fn new(cfg: BrokerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            cfg,
            metrics,
        }
    }

    pub fn create(&self, name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName);
        }

        {
            let mut topics = self.topics.write();
            if topics.contains_key(name) {
                return Err(RegistryError::AlreadyExists);
            }
            topics.insert(
                name.to_string(),
                Arc::new(Topic::new(name, self.cfg.history_capacity)),
            );
        }

        self.metrics.inc_topics();
        info!("created topic '{}'", name);
        Ok(())
    }

    /// Notify every attached subscriber (best effort, non-blocking), then
    /// close the topic and remove it.
    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName);
        }

        let topic = {
            let mut topics = self.topics.write();
            topics.remove(name).ok_or(RegistryError::NotFound)?
        };

        let subscribers = topic.subscribers();
        for sub in &subscribers {
            let _ = sub.try_enqueue(Envelope::topic_deleted(name));
        }
        topic.close();

        self.metrics.dec_topics();
        self.metrics.remove_topic(name);
        info!("deleted topic '{}' ({} subscribers closed)", name, subscribers.len());
        Ok(())
    }

    /// Read-only lookup; an empty name is never present.
    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        if name.is_empty() {
            return None;
        }
        self.topics.read().get(name).cloned()
    }

    /// Lookup, creating on miss. Internal convenience call sites only.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Topic>, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName);
        }
        if let Some(topic) = self.get(name) {
            return Ok(topic);
        }
        match self.create(name) {
            Ok(()) | Err(RegistryError::AlreadyExists) => {
                self.get(name).ok_or(RegistryError::NotFound)
            }
            Err(err) => Err(err),
        }
    }

    /// All topics, ordered by name.
    pub fn list(&self) -> Vec<TopicInfo> {
        let mut infos: Vec<TopicInfo> = {
            let topics = self.topics.read();
            topics.values().map(|t| TopicInfo::of(t)).collect()
        };
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn stats(&self) -> HashMap<String, TopicInfo> {
        let topics = self.topics.read();
        topics
            .iter()
            .map(|(name, t)| (name.clone(), TopicInfo::of(t)))
            .collect()
    }

    /// Publish through the registry using the configured default policy.
    pub fn publish(&self, name: &str, msg: Message) -> Result<(usize, usize), RegistryError> {
        let topic = self.get(name).ok_or(RegistryError::NotFound)?;
        let (delivered, dropped) = topic.publish(msg, self.cfg.publish_policy);

        self.metrics.inc_published(name);
        self.metrics.inc_delivered(name, delivered as u64);
        self.metrics.inc_dropped(name, dropped as u64);

        Ok((delivered, dropped))
    }

    pub fn default_policy(&self) -> PublishPolicy {
        self.cfg.publish_policy
    }

    pub fn queue_capacity(&self) -> usize {
        self.cfg.queue_capacity
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    pub fn total_subscriber_count(&self) -> usize {
        let topics = self.topics.read();
        topics.values().map(|t| t.subscriber_count()).sum()
    }

    /// Close every topic and clear the map. Idempotent.
    pub fn close(&self) {
        let drained: Vec<Arc<Topic>> = {
            let mut topics = self.topics.write();
            topics.drain().map(|(_, t)| t).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!("closing registry ({} topics)", drained.len());
        for topic in drained {
            topic.close();
        }
    }
}
