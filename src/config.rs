//! Client configuration.
//!
//! Configuration is via environment variables or explicit values; nothing is
//! read from a process-wide default credential:
//! - `POLYRED_URL` - Base URL (default: `https://polyreduce.com/api/v1/propolyred`)
//! - `POLYRED_USER` / `POLYRED_PASSWORD` - Credential pair (required)
//! - `POLYRED_TIMEOUT_SECS` - Timeout for ordinary requests (default: 30)
//! - `POLYRED_RUN_TIMEOUT_SECS` - Timeout for `run` (default: none, wait indefinitely)

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default endpoint of the hosted service.
pub const DEFAULT_URL: &str = "https://polyreduce.com/api/v1/propolyred";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Credential pair attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the transport needs to reach the service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub credential: Credential,
    /// Applies to every request except `run`.
    pub request_timeout: Duration,
    /// `None` lets a run block until the service answers.
    pub run_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Create with explicit configuration.
    pub fn new(endpoint: impl Into<String>, credential: Credential) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            run_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, CLI overrides).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup("POLYRED_URL").unwrap_or_else(|| DEFAULT_URL.to_string());
        let username = lookup("POLYRED_USER")
            .ok_or_else(|| Error::Validation("POLYRED_USER is not set".to_string()))?;
        let password = lookup("POLYRED_PASSWORD")
            .ok_or_else(|| Error::Validation("POLYRED_PASSWORD is not set".to_string()))?;

        let mut config = Self::new(endpoint, Credential::new(username, password));
        if let Some(secs) = lookup("POLYRED_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_secs("POLYRED_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = lookup("POLYRED_RUN_TIMEOUT_SECS") {
            config.run_timeout = Some(Duration::from_secs(parse_secs(
                "POLYRED_RUN_TIMEOUT_SECS",
                &secs,
            )?));
        }
        Ok(config)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("{} must be a whole number of seconds", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn uses_default_url_when_unset() {
        let config =
            ClientConfig::from_lookup(lookup(&[("POLYRED_USER", "way"), ("POLYRED_PASSWORD", "pw")]))
                .unwrap();
        assert_eq!(config.endpoint, DEFAULT_URL);
        assert_eq!(config.credential.username, "way");
        assert_eq!(config.credential.password(), "pw");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.run_timeout.is_none());
    }

    #[test]
    fn requires_a_credential() {
        let err = ClientConfig::from_lookup(lookup(&[("POLYRED_USER", "way")])).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn trims_trailing_slash_from_endpoint() {
        let config = ClientConfig::new("http://localhost:8080/", Credential::new("a", "b"));
        assert_eq!(config.endpoint, "http://localhost:8080");
    }

    #[test]
    fn parses_timeouts() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("POLYRED_USER", "way"),
            ("POLYRED_PASSWORD", "pw"),
            ("POLYRED_TIMEOUT_SECS", "5"),
            ("POLYRED_RUN_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn rejects_garbage_timeout() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("POLYRED_USER", "way"),
            ("POLYRED_PASSWORD", "pw"),
            ("POLYRED_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", Credential::new("way", "secret-pass"));
        assert!(!rendered.contains("secret-pass"));
    }
}
