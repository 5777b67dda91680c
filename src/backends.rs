use crate::config::Config;
use crate::error::ProxyError;
use crate::registry::{Model, ModelList, ModelSource};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;

/// Path of the backend's model listing endpoint.
pub const MODELS_PATH: &str = "/api/v0/models";

/// Hop-by-hop headers that must not be forwarded in either direction.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    listing_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        // Idle limit only: a generation may stream for as long as it keeps
        // sending data
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .read_timeout(config.request_timeout())
            .build()
            .map_err(|e| ProxyError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.backend_base().to_string(),
            listing_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward a request to the backend, keeping its method, path and query.
    ///
    /// Returns as soon as the backend responds with headers; the body is
    /// left to be streamed by the caller.
    pub async fn forward(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .client
            .request(method.clone(), &url)
            .headers(outbound_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(ProxyError::from_transport)?;

        Ok(response)
    }
}

#[async_trait]
impl ModelSource for BackendClient {
    async fn list_models(&self) -> Result<Vec<Model>, ProxyError> {
        let url = format!("{}{}", self.base_url, MODELS_PATH);

        let response = self
            .client
            .get(&url)
            .timeout(self.listing_timeout)
            .send()
            .await
            .map_err(ProxyError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProxyError::BackendError(format!(
                "Model listing returned {}: {}",
                status, error_text
            )));
        }

        let list: ModelList = response.json().await.map_err(ProxyError::from_transport)?;
        Ok(list.data)
    }
}

/// Headers sent to the backend: the caller's headers minus `host`,
/// `content-length` and hop-by-hop headers, with streaming-friendly
/// `Accept` and `Cache-Control`.
pub fn outbound_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming.iter() {
        if name == header::HOST
            || name == header::CONTENT_LENGTH
            || HOP_BY_HOP_HEADERS.contains(&name.as_str())
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}
