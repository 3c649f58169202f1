pub mod broker;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod server;

use std::sync::Arc;
use std::time::Instant;

use crate::broker::registry::Registry;
use crate::config::Config;
use crate::metrics::Metrics;

// ========================================
// ENGINE
// ========================================

/// Aggregate handle passed explicitly to sessions and HTTP handlers.
/// Cheap to clone (Arcs plus small config).
#[derive(Clone)]
pub struct FanoutEngine {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
    pub start_time: Instant,
}

impl FanoutEngine {
    pub fn new(config: Config) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            registry: Arc::new(Registry::new(config.broker.clone(), metrics.clone())),
            metrics,
            config,
            start_time: Instant::now(),
        }
    }
}
