use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level so individual
/// modules can be turned up without touching the config.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(level)));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Map configured level names onto tracing directives; unknown names fall
/// back to `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

/// One line of the routing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingLogEntry {
    pub timestamp: String,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub outcome: String, // "rewritten", a pass-through reason, or "rejected"

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

impl RoutingLogEntry {
    pub fn new(request_id: &str, method: &str, path: &str, outcome: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            request_id: request_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            outcome: outcome.to_string(),
            requested_model: None,
            assigned_model: None,
            status_code: None,
            error: None,
            latency_ms: None,
        }
    }
}

/// Append-only JSON Lines log of routing decisions.
pub struct RoutingLogger {
    file_path: PathBuf,
}

impl RoutingLogger {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn log(&self, entry: &RoutingLogEntry) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = serde_json::to_string(entry)?;
        writeln!(file, "{}", json_line)?;
        Ok(())
    }

    /// Log, reporting failures through tracing instead of the caller.
    pub fn record(&self, entry: &RoutingLogEntry) {
        if let Err(e) = self.log(entry) {
            tracing::warn!("Failed to write routing log {}: {}", self.file_path.display(), e);
        }
    }
}
