use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration, read once at startup.
///
/// Values come from (lowest to highest precedence) the built-in defaults, an
/// optional TOML file, the environment and finally command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub port: u16,
    pub refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_payload_size: String,
    pub log_level: String,
    pub enable_request_logging: bool,
    pub log_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:1234".to_string(),
            port: 4321,
            refresh_interval_ms: 30_000,
            request_timeout_ms: 300_000,
            max_payload_size: "50mb".to_string(),
            log_level: "info".to_string(),
            enable_request_logging: false,
            log_file: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_process_env(&mut self) -> Vec<String> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from an environment lookup.
    ///
    /// Numeric values that fail to parse keep the previous value; a warning
    /// is returned for each so the caller can log them once tracing is up.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(url) = lookup("LM_STUDIO_URL").filter(|v| !v.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("LOAD_BALANCER_PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) if port > 0 => self.port = port,
                _ => warnings.push(format!(
                    "Ignoring invalid LOAD_BALANCER_PORT '{}', using {}",
                    raw, self.port
                )),
            }
        }
        if let Some(raw) = lookup("MODEL_REFRESH_INTERVAL") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.refresh_interval_ms = ms,
                _ => warnings.push(format!(
                    "Ignoring invalid MODEL_REFRESH_INTERVAL '{}', using {}ms",
                    raw, self.refresh_interval_ms
                )),
            }
        }
        if let Some(raw) = lookup("REQUEST_TIMEOUT") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.request_timeout_ms = ms,
                _ => warnings.push(format!(
                    "Ignoring invalid REQUEST_TIMEOUT '{}', using {}ms",
                    raw, self.request_timeout_ms
                )),
            }
        }
        if let Some(size) = lookup("MAX_PAYLOAD_SIZE").filter(|v| !v.trim().is_empty()) {
            self.max_payload_size = size.trim().to_string();
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_ascii_lowercase();
        }
        // Only the literal "true" enables request logging
        if let Some(flag) = lookup("ENABLE_REQUEST_LOGGING") {
            self.enable_request_logging = flag.trim() == "true";
        }
        if let Some(path) = lookup("ROUTING_LOG_FILE").filter(|v| !v.trim().is_empty()) {
            self.log_file = Some(path.trim().to_string());
        }

        warnings
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.refresh_interval_ms == 0 {
            return Err(ProxyError::ConfigError(
                "refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ProxyError::ConfigError(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !self.backend_url.starts_with("http://") && !self.backend_url.starts_with("https://") {
            return Err(ProxyError::ConfigError(format!(
                "backend_url must be an http(s) URL, got '{}'",
                self.backend_url
            )));
        }
        self.max_payload_bytes()?;
        Ok(())
    }

    /// Backend base URL without a trailing slash.
    pub fn backend_base(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn max_payload_bytes(&self) -> Result<usize, ProxyError> {
        parse_size(&self.max_payload_size)
    }
}

/// Parse a human-readable byte size such as `50mb`, `512kb`, `1gb` or `1024`.
///
/// Units are 1024-based and case-insensitive; a bare number is bytes.
pub fn parse_size(raw: &str) -> Result<usize, ProxyError> {
    let value = raw.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let invalid = || ProxyError::ConfigError(format!("Invalid size '{}'", raw));

    let amount: usize = digits.parse().map_err(|_| invalid())?;
    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1024,
        "mb" | "m" => 1024 * 1024,
        "gb" | "g" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    amount.checked_mul(multiplier).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend_url, "http://localhost:1234");
        assert_eq!(config.port, 4321);
        assert_eq!(config.refresh_interval_ms, 30_000);
        assert_eq!(config.request_timeout_ms, 300_000);
        assert_eq!(config.max_payload_bytes().unwrap(), 50 * 1024 * 1024);
        assert_eq!(config.log_level, "info");
        assert!(!config.enable_request_logging);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let warnings = config.apply_env_overrides(env(&[
            ("LM_STUDIO_URL", "http://gpu-box:1234/"),
            ("LOAD_BALANCER_PORT", "8080"),
            ("MODEL_REFRESH_INTERVAL", "5000"),
            ("REQUEST_TIMEOUT", "1000"),
            ("MAX_PAYLOAD_SIZE", "1mb"),
            ("LOG_LEVEL", "DEBUG"),
            ("ENABLE_REQUEST_LOGGING", "true"),
        ]));

        assert!(warnings.is_empty());
        assert_eq!(config.backend_base(), "http://gpu-box:1234");
        assert_eq!(config.port, 8080);
        assert_eq!(config.refresh_interval(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_payload_bytes().unwrap(), 1024 * 1024);
        assert_eq!(config.log_level, "debug");
        assert!(config.enable_request_logging);
    }

    #[test]
    fn test_invalid_numbers_keep_previous_value() {
        let mut config = Config::default();
        let warnings = config.apply_env_overrides(env(&[
            ("LOAD_BALANCER_PORT", "not-a-port"),
            ("MODEL_REFRESH_INTERVAL", "0"),
        ]));

        assert_eq!(warnings.len(), 2);
        assert_eq!(config.port, 4321);
        assert_eq!(config.refresh_interval_ms, 30_000);
    }

    #[test]
    fn test_request_logging_requires_literal_true() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("ENABLE_REQUEST_LOGGING", "1")]));
        assert!(!config.enable_request_logging);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("10b").unwrap(), 10);
        assert_eq!(parse_size("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("50MB").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_size(" 1gb ").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("10tb").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.refresh_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend_url = "localhost:1234".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_payload_size = "huge".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend_url = \"http://10.0.0.5:1234\"").unwrap();
        writeln!(file, "refresh_interval_ms = 1000").unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backend_url, "http://10.0.0.5:1234");
        assert_eq!(config.refresh_interval_ms, 1000);
        assert_eq!(config.port, 4321);
        assert_eq!(config.max_payload_size, "50mb");
    }
}
