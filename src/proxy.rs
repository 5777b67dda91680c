//! Fallback handler: rewrite the model field and forward to the backend.

use crate::backends::HOP_BY_HOP_HEADERS;
use crate::error::ProxyError;
use crate::lifecycle::{GuardedBody, RequestLease, Termination};
use crate::logging::RoutingLogEntry;
use crate::metrics;
use crate::rewrite::{rewrite_body, PassThroughReason, RequestBody, RewriteOutcome};
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ProxyError> {
    let start_time = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();

    let mut lease = RequestLease::arm(Arc::clone(&state.balancer), parts.uri.to_string())
        .with_request_logging(state.config.enable_request_logging);

    let body = match read_body(body, state.max_payload_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Rejected request body for {} {}: {}", method, path, e);
            lease.terminate();
            let mut entry = RoutingLogEntry::new(&request_id, &method, &path, "rejected");
            entry.status_code = Some(e.status_code().as_u16());
            entry.error = Some(e.to_string());
            state.log_routing(&entry);
            return Err(e);
        }
    };

    let outcome = rewrite_body(RequestBody::Raw(&body[..]), &state.balancer, lease.context_mut());
    metrics::record_routing_decision(outcome.assigned_model(), outcome.outcome_label());

    let mut entry = RoutingLogEntry::new(&request_id, &method, &path, outcome.outcome_label());
    entry.assigned_model = outcome.assigned_model().map(str::to_string);
    if let RewriteOutcome::Rewritten { requested, .. } = &outcome {
        entry.requested_model = Some(requested.clone());
    }

    // A named model with nothing loaded is a routing failure, not a pass-through
    if let RewriteOutcome::PassThrough {
        reason: PassThroughReason::NoModelsLoaded,
        ..
    } = outcome
    {
        warn!("No models available, rejecting {} {}", method, path);
        lease.terminate();
        let err = ProxyError::NoModelsAvailable;
        entry.outcome = "rejected".to_string();
        entry.status_code = Some(err.status_code().as_u16());
        state.log_routing(&entry);
        return Err(err);
    }

    if state.config.enable_request_logging {
        info!("Request URL: {}", parts.uri);
    }

    let upstream = match state
        .backend
        .forward(&parts.method, &parts.uri, &parts.headers, outcome.into_body())
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("Proxy error: {}", e);
            lease.release(Termination::Errored);
            entry.status_code = Some(e.status_code().as_u16());
            entry.error = Some(e.to_string());
            entry.latency_ms = Some(start_time.elapsed().as_secs_f64() * 1000.0);
            state.log_routing(&entry);
            return Err(e);
        }
    };

    let status = upstream.status();
    metrics::record_request(status.as_u16(), start_time.elapsed());
    entry.status_code = Some(status.as_u16());
    entry.latency_ms = Some(start_time.elapsed().as_secs_f64() * 1000.0);
    state.log_routing(&entry);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    copy_response_headers(upstream.headers(), response.headers_mut());
    add_streaming_headers(response.headers_mut(), &request_id);

    let stream = upstream.bytes_stream();
    *response.body_mut() = Body::new(GuardedBody::new(Body::from_stream(stream), lease));
    Ok(response)
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if is_length_limit(&e) {
            ProxyError::PayloadTooLarge { limit }
        } else {
            ProxyError::InvalidRequest(format!("Failed to read request body: {}", e))
        }
    })
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn copy_response_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn add_streaming_headers(headers: &mut HeaderMap, request_id: &str) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Cache-Control"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let bytes = read_body(Body::from("{\"model\":\"x\"}"), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"{\"model\":\"x\"}");
    }

    #[tokio::test]
    async fn test_read_body_over_limit() {
        let err = read_body(Body::from(vec![b'a'; 64]), 16).await.unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { limit: 16 }));
    }

    #[test]
    fn test_response_headers() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(header::CONNECTION, HeaderValue::from_static("close"));

        let mut headers = HeaderMap::new();
        copy_response_headers(&upstream, &mut headers);
        add_streaming_headers(&mut headers, "req-1");

        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "keep-alive");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "req-1");
    }
}
