//! Process-wide routing state: the model registry and the in-flight tracker.
//!
//! One `Balancer` is created at startup and shared by `Arc` between the
//! request handlers and the refresh task.

use crate::error::ProxyError;
use crate::registry::{ModelRegistry, ModelSource};
use crate::tracker::InFlightTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Balancer {
    registry: ModelRegistry,
    tracker: InFlightTracker,
    processed: AtomicU64,
    started_at: Instant,
}

/// Result of one registry refresh followed by tracker pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub loaded: usize,
    pub pruned: Vec<String>,
    pub succeeded: bool,
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer {
    pub fn new() -> Self {
        Self {
            registry: ModelRegistry::new(),
            tracker: InFlightTracker::new(),
            processed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    /// Choose a model for a new request and count it as in flight.
    pub fn assign(&self) -> Result<String, ProxyError> {
        let models = self.registry.current_models();
        let model = self.tracker.acquire_least_loaded(&models)?;
        debug!("In-progress models: [{}]", self.tracker.entries().join(", "));
        crate::metrics::set_model_in_flight(&model, self.tracker.count_for(&model));
        Ok(model)
    }

    /// Release one in-flight entry for `model`.
    pub fn release(&self, model: &str) -> bool {
        let released = self.tracker.release(model);
        if released {
            debug!("Released model: {}", model);
            debug!("In-progress models: [{}]", self.tracker.entries().join(", "));
            crate::metrics::set_model_in_flight(model, self.tracker.count_for(model));
        }
        released
    }

    /// Refresh the registry, then drop in-flight entries for models that
    /// are no longer loaded.
    pub async fn refresh(&self, source: &dyn ModelSource) -> RefreshSummary {
        let result = self.registry.refresh(source).await;
        let succeeded = result.is_ok();
        crate::metrics::record_refresh(succeeded, self.registry.len());

        let pruned = self.tracker.prune_unlisted(&self.registry.id_set());
        for model in &pruned {
            warn!("Cleaned up unavailable model: {}", model);
            crate::metrics::set_model_in_flight(model, 0);
        }
        if !pruned.is_empty() {
            info!("Cleaned up {} unavailable models", pruned.len());
        }

        RefreshSummary {
            loaded: self.registry.len(),
            pruned,
            succeeded,
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_requests(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
