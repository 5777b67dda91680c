//! Multiset of model identifiers, one entry per request in flight.

use crate::error::ProxyError;
use crate::registry::Model;
use crate::routing;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct InFlightTracker {
    entries: Mutex<Vec<String>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, model_id: &str) {
        self.entries.lock().push(model_id.to_string());
    }

    /// Pick the least-loaded model and record one entry for it.
    ///
    /// Selection and acquisition share one lock so concurrent callers always
    /// see each other's entries.
    pub fn acquire_least_loaded(&self, models: &[Model]) -> Result<String, ProxyError> {
        let mut entries = self.entries.lock();
        let counts = count_entries(&entries);
        let selected = routing::select_least_loaded(models, &counts)?;
        let id = selected.id.clone();
        entries.push(id.clone());
        Ok(id)
    }

    /// Remove the first entry for `model_id`. Missing entries are a no-op.
    pub fn release(&self, model_id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|id| id == model_id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// In-flight count per model; models with no entries are absent.
    pub fn counts_by_model(&self) -> HashMap<String, usize> {
        count_entries(&self.entries.lock())
    }

    pub fn count_for(&self, model_id: &str) -> usize {
        self.entries.lock().iter().filter(|id| *id == model_id).count()
    }

    /// Ordered copy of the multiset.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn total(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop every entry whose model is not in `valid_ids`, returning the
    /// removed identifiers.
    pub fn prune_unlisted(&self, valid_ids: &HashSet<String>) -> Vec<String> {
        let mut entries = self.entries.lock();
        let mut removed = Vec::new();
        entries.retain(|id| {
            if valid_ids.contains(id) {
                true
            } else {
                removed.push(id.clone());
                false
            }
        });
        removed
    }
}

fn count_entries(entries: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for id in entries {
        *counts.entry(id.clone()).or_insert(0) += 1;
    }
    counts
}
