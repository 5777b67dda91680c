//! Snapshot of the models the backend currently reports as loaded.
//!
//! The registry is replaced wholesale on every refresh. Readers clone the
//! `Arc` of the current snapshot and never observe a partially built list.

use crate::error::ProxyError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Load state reported by the backend for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ModelState {
    Loaded,
    NotLoaded,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A model entry from the backend's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub state: ModelState,
}

impl Model {
    pub fn loaded(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: ModelState::Loaded,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ModelState::Loaded
    }
}

/// Wire format of `GET /api/v0/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<Model>,
}

/// Anything that can report the backend's model list.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn list_models(&self) -> Result<Vec<Model>, ProxyError>;
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    snapshot: RwLock<Arc<Vec<Model>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the source and swap in the loaded models.
    ///
    /// On failure the registry becomes empty instead of staying stale; the
    /// error is returned for logging only.
    pub async fn refresh(&self, source: &dyn ModelSource) -> Result<usize, ProxyError> {
        match source.list_models().await {
            Ok(models) => {
                let loaded: Vec<Model> = models.into_iter().filter(Model::is_loaded).collect();
                let count = loaded.len();
                let previous = self.replace(loaded);

                if previous != count {
                    info!("Loaded models: [{}]", self.model_ids().join(", "));
                    info!("Total loaded models: {}", count);
                }
                Ok(count)
            }
            Err(e) => {
                error!("Failed to load models from backend: {}", e);
                if e.is_connection_refused() {
                    error!("Backend is not running or not accessible");
                }
                self.replace(Vec::new());
                Err(e)
            }
        }
    }

    /// Replace the snapshot, returning the previous model count.
    pub fn replace(&self, models: Vec<Model>) -> usize {
        let mut guard = self.snapshot.write();
        let previous = guard.len();
        *guard = Arc::new(models);
        previous
    }

    pub fn current_models(&self) -> Arc<Vec<Model>> {
        Arc::clone(&self.snapshot.read())
    }

    /// Identifiers in registry order.
    pub fn model_ids(&self) -> Vec<String> {
        self.current_models().iter().map(|m| m.id.clone()).collect()
    }

    pub fn id_set(&self) -> HashSet<String> {
        self.current_models().iter().map(|m| m.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }
}
