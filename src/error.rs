use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error as StdError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No models available")]
    NoModelsAvailable,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request entity too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    #[error("Backend timed out or reset the connection: {0}")]
    BackendTimeout(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ProxyError {
    /// Classify a transport failure from the backend connection.
    ///
    /// Timeouts and connection resets are reported as gateway timeouts so a
    /// caller can tell transient backend trouble apart from routing failures.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout()
            || has_io_kind(&err, std::io::ErrorKind::TimedOut)
            || has_io_kind(&err, std::io::ErrorKind::ConnectionReset)
        {
            ProxyError::BackendTimeout(message)
        } else if err.is_connect() {
            ProxyError::BackendUnreachable(message)
        } else {
            ProxyError::BackendError(message)
        }
    }

    /// Machine-readable error kind used in the response body and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoModelsAvailable => "no_models_available",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::PayloadTooLarge { .. } => "payload_too_large",
            ProxyError::BackendTimeout(_) => "gateway_timeout",
            ProxyError::BackendUnreachable(_) => "backend_unreachable",
            ProxyError::BackendError(_) => "bad_gateway",
            ProxyError::ConfigError(_) => "config_error",
            ProxyError::SerializationError(_) => "serialization_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoModelsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BackendError(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the backend refused the connection outright (not running).
    pub fn is_connection_refused(&self) -> bool {
        match self {
            ProxyError::BackendUnreachable(message) => {
                message.to_ascii_lowercase().contains("refused")
            }
            _ => false,
        }
    }
}

fn has_io_kind(err: &(dyn StdError + 'static), kind: std::io::ErrorKind) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == kind {
                return true;
            }
        }
        source = e.source();
    }
    false
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match &self {
            ProxyError::NoModelsAvailable => "No models are currently loaded on the backend",
            ProxyError::InvalidRequest(_) => "Invalid request",
            ProxyError::PayloadTooLarge { .. } => "Request entity too large",
            ProxyError::BackendTimeout(_) => "Gateway timeout - request too large or took too long",
            ProxyError::BackendUnreachable(_) => "Backend is not reachable",
            ProxyError::BackendError(_) => "Proxy error",
            ProxyError::ConfigError(_) => "Configuration error",
            ProxyError::SerializationError(_) => "Serialization error",
        };

        crate::metrics::record_error(self.kind());

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "code": status.as_u16(),
                "message": error_message,
                "details": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: ProxyError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_no_models_is_service_unavailable() {
        let (status, body) = body_json(ProxyError::NoModelsAvailable).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["type"], "no_models_available");
        assert_eq!(body["error"]["code"], 503);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_routing_failure() {
        let (status, body) = body_json(ProxyError::BackendTimeout("reset".to_string())).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["type"], "gateway_timeout");
        assert!(body["error"]["details"].as_str().unwrap().contains("reset"));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let (status, body) = body_json(ProxyError::PayloadTooLarge { limit: 10 }).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"]["type"], "payload_too_large");
    }

    #[test]
    fn test_connection_refused_detection() {
        let err = ProxyError::BackendUnreachable("tcp connect error: Connection refused (os error 111)".to_string());
        assert!(err.is_connection_refused());
        assert!(!ProxyError::BackendUnreachable("dns error".to_string()).is_connection_refused());
        assert!(!ProxyError::NoModelsAvailable.is_connection_refused());
    }

    #[test]
    fn test_io_kind_walks_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(has_io_kind(&io, std::io::ErrorKind::ConnectionReset));
        assert!(!has_io_kind(&io, std::io::ErrorKind::TimedOut));
    }
}
