//! Substitute the caller's `model` field with the balancer's choice.
//!
//! Rewriting never fails: any precondition that does not hold degrades to a
//! pass-through of the original body, so a malformed or model-less payload
//! is still forwarded.

use crate::balancer::Balancer;
use crate::lifecycle::RequestContext;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error, info};

/// Body handed to the rewriter.
#[derive(Debug, Clone)]
pub enum RequestBody<'a> {
    /// Already-parsed JSON value.
    Parsed(Value),
    /// Raw bytes, expected to be JSON text.
    Raw(&'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughReason {
    EmptyBody,
    NotJson,
    NoModelField,
    NoModelsLoaded,
    SerializeFailed,
}

impl PassThroughReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassThroughReason::EmptyBody => "empty_body",
            PassThroughReason::NotJson => "not_json",
            PassThroughReason::NoModelField => "no_model_field",
            PassThroughReason::NoModelsLoaded => "no_models_loaded",
            PassThroughReason::SerializeFailed => "serialize_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOutcome {
    Rewritten {
        body: Bytes,
        requested: String,
        assigned: String,
    },
    PassThrough {
        body: Bytes,
        reason: PassThroughReason,
    },
}

impl RewriteOutcome {
    pub fn body(&self) -> &Bytes {
        match self {
            RewriteOutcome::Rewritten { body, .. } => body,
            RewriteOutcome::PassThrough { body, .. } => body,
        }
    }

    pub fn into_body(self) -> Bytes {
        match self {
            RewriteOutcome::Rewritten { body, .. } => body,
            RewriteOutcome::PassThrough { body, .. } => body,
        }
    }

    pub fn assigned_model(&self) -> Option<&str> {
        match self {
            RewriteOutcome::Rewritten { assigned, .. } => Some(assigned.as_str()),
            RewriteOutcome::PassThrough { .. } => None,
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            RewriteOutcome::Rewritten { .. } => "rewritten",
            RewriteOutcome::PassThrough { reason, .. } => reason.as_str(),
        }
    }
}

/// Rewrite `body` to target the least-loaded model.
///
/// On success one in-flight entry is acquired and recorded on `context`;
/// every pass-through leaves both the tracker and the context untouched.
pub fn rewrite_body(
    body: RequestBody<'_>,
    balancer: &Balancer,
    context: &mut RequestContext,
) -> RewriteOutcome {
    let (mut value, original) = match body {
        RequestBody::Parsed(value) => (value, None),
        RequestBody::Raw(raw) => {
            if raw.is_empty() {
                return pass_through(Bytes::new(), PassThroughReason::EmptyBody);
            }
            match serde_json::from_slice::<Value>(raw) {
                Ok(value) => (value, Some(Bytes::copy_from_slice(raw))),
                Err(e) => {
                    error!("Error processing request body: {}", e);
                    debug!("Body content: {}", String::from_utf8_lossy(raw));
                    return pass_through(Bytes::copy_from_slice(raw), PassThroughReason::NotJson);
                }
            }
        }
    };

    let requested = match value.get("model") {
        Some(model) if is_replaceable(model) => display_model(model),
        _ => return unchanged(&value, original, PassThroughReason::NoModelField),
    };

    if balancer.registry().is_empty() {
        return unchanged(&value, original, PassThroughReason::NoModelsLoaded);
    }

    let assigned = match balancer.assign() {
        Ok(model) => model,
        // Registry emptied by a concurrent refresh
        Err(_) => return unchanged(&value, original, PassThroughReason::NoModelsLoaded),
    };

    value["model"] = Value::String(assigned.clone());

    match serde_json::to_vec(&value) {
        Ok(serialized) => {
            context.assign(assigned.clone());
            info!("Selected model: {} (replaced from {})", assigned, requested);
            RewriteOutcome::Rewritten {
                body: Bytes::from(serialized),
                requested,
                assigned,
            }
        }
        Err(e) => {
            error!("Failed to serialize rewritten body: {}", e);
            balancer.release(&assigned);
            value["model"] = Value::String(requested);
            unchanged(&value, original, PassThroughReason::SerializeFailed)
        }
    }
}

/// A model field is replaceable when it holds anything but null, `false`,
/// zero or the empty string.
fn is_replaceable(model: &Value) -> bool {
    match model {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn display_model(model: &Value) -> String {
    match model {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pass_through(body: Bytes, reason: PassThroughReason) -> RewriteOutcome {
    RewriteOutcome::PassThrough { body, reason }
}

/// Pass-through body: the original bytes when we had them, otherwise the
/// canonical serialization of the parsed value.
fn unchanged(value: &Value, original: Option<Bytes>, reason: PassThroughReason) -> RewriteOutcome {
    if let Some(raw) = original {
        return pass_through(raw, reason);
    }
    match serde_json::to_vec(value) {
        Ok(serialized) => pass_through(Bytes::from(serialized), reason),
        Err(e) => {
            error!("Failed to serialize request body: {}", e);
            pass_through(Bytes::new(), PassThroughReason::SerializeFailed)
        }
    }
}
