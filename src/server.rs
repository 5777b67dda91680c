use crate::backends::BackendClient;
use crate::balancer::Balancer;
use crate::config::Config;
use crate::error::ProxyError;
use crate::logging::{RoutingLogEntry, RoutingLogger};
use crate::{proxy, status};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub balancer: Arc<Balancer>,
    pub backend: BackendClient,
    pub max_payload_bytes: usize,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
    pub routing_log: Option<Arc<RoutingLogger>>,
}

impl AppState {
    pub fn new(
        config: Config,
        balancer: Arc<Balancer>,
        backend: BackendClient,
    ) -> Result<Self, ProxyError> {
        let max_payload_bytes = config.max_payload_bytes()?;
        let routing_log = config
            .log_file
            .as_ref()
            .map(|path| Arc::new(RoutingLogger::new(path.clone())));

        Ok(Self {
            config: Arc::new(config),
            balancer,
            backend,
            max_payload_bytes,
            metrics_handle: None,
            routing_log,
        })
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics_handle = handle.map(Arc::new);
        self
    }

    pub fn log_routing(&self, entry: &RoutingLogEntry) {
        if let Some(logger) = &self.routing_log {
            logger.record(entry);
        }
    }
}

/// Introspection routes are matched first; every other method and path
/// goes to the proxy.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(status::health_handler))
        .route("/models", get(status::models_handler))
        .route("/metrics", get(status::metrics_handler))
        .fallback(proxy::proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
