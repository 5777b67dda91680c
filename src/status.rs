//! Read-only introspection endpoints.

use crate::routing;
use crate::server::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub available_models: Vec<String>,
    pub in_progress_models: Vec<String>,
    pub total_requests: u64,
    /// Seconds since the process started.
    pub uptime: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub available_models: Vec<String>,
    pub in_progress_models: Vec<String>,
    pub free_models: Vec<String>,
    pub model_load: BTreeMap<String, usize>,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let balancer = &state.balancer;

    Json(HealthReport {
        status: "healthy".to_string(),
        available_models: balancer.registry().model_ids(),
        in_progress_models: balancer.tracker().entries(),
        total_requests: balancer.processed_requests(),
        uptime: balancer.uptime().as_secs_f64(),
    })
}

pub async fn models_handler(State(state): State<AppState>) -> Json<LoadReport> {
    let balancer = &state.balancer;
    let models = balancer.registry().current_models();
    let counts = balancer.tracker().counts_by_model();

    Json(LoadReport {
        available_models: models.iter().map(|m| m.id.clone()).collect(),
        in_progress_models: balancer.tracker().entries(),
        free_models: routing::free_models(&models, &counts),
        model_load: counts.into_iter().collect(),
    })
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(handle) = &state.metrics_handle {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not available".to_string(),
        )
    }
}
