//! Exactly-once release of a request's in-flight entry.
//!
//! A [`RequestLease`] is armed before the body is rewritten and carries the
//! request's [`RequestContext`]. Whichever termination signal arrives first
//! (end of the response stream, a stream error, the connection dropping the
//! body, or an explicit terminate) performs the release; later signals are
//! no-ops.

use crate::balancer::Balancer;
use axum::body::Body;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error};

/// Per-request routing state: the model assigned by the rewriter, if any.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestContext {
    assigned: Option<String>,
}

impl RequestContext {
    pub fn assign(&mut self, model: String) {
        self.assigned = Some(model);
    }

    pub fn assigned_model(&self) -> Option<&str> {
        self.assigned.as_deref()
    }

    pub fn take(&mut self) -> Option<String> {
        self.assigned.take()
    }
}

/// What ended the request's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Response body streamed to completion.
    Finished,
    /// Body dropped before completion (client went away).
    Closed,
    /// Transport error while streaming the response.
    Errored,
    /// Explicit fallback call from the handler.
    Terminated,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Finished => "finished",
            Termination::Closed => "closed",
            Termination::Errored => "errored",
            Termination::Terminated => "terminated",
        }
    }
}

pub struct RequestLease {
    balancer: Arc<Balancer>,
    context: RequestContext,
    terminated_by: Option<Termination>,
    path: String,
    request_logging: bool,
}

impl RequestLease {
    pub fn arm(balancer: Arc<Balancer>, path: impl Into<String>) -> Self {
        Self {
            balancer,
            context: RequestContext::default(),
            terminated_by: None,
            path: path.into(),
            request_logging: false,
        }
    }

    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }

    pub fn terminated_by(&self) -> Option<Termination> {
        self.terminated_by
    }

    /// Run the cleanup action. Returns `false` if it already ran.
    pub fn release(&mut self, cause: Termination) -> bool {
        if self.terminated_by.is_some() {
            return false;
        }
        self.terminated_by = Some(cause);

        match cause {
            Termination::Errored => error!("Stream error for request: {}", self.path),
            Termination::Closed if self.request_logging => {
                debug!("Client connection closed for request: {}", self.path)
            }
            Termination::Finished if self.request_logging => {
                debug!("Stream finished for request: {}", self.path)
            }
            _ => {}
        }

        if let Some(model) = self.context.take() {
            self.balancer.release(&model);
        }
        self.balancer.record_processed();
        crate::metrics::record_lease_release(cause.as_str());
        true
    }

    pub fn terminate(&mut self) -> bool {
        self.release(Termination::Terminated)
    }
}

impl Drop for RequestLease {
    fn drop(&mut self) {
        self.release(Termination::Closed);
    }
}

/// Response body that holds the request's lease until the stream ends.
pub struct GuardedBody {
    inner: Body,
    lease: RequestLease,
}

impl GuardedBody {
    pub fn new(inner: Body, lease: RequestLease) -> Self {
        Self { inner, lease }
    }
}

impl http_body::Body for GuardedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => {
                this.lease.release(Termination::Finished);
            }
            Poll::Ready(Some(Err(e))) => {
                debug!("Response stream error: {}", e);
                this.lease.release(Termination::Errored);
            }
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
