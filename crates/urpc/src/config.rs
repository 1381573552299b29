// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! urpc configuration.
//!
//! Defaults work out of the box; a YAML file and a few environment
//! variables can override them.
//!
//! # Example YAML
//!
//! ```yaml
//! dispatcher:
//!   attempt_timeout_ms: 500
//!   backoff: exponential
//!   max_backoff_ms: 4000
//!   jitter: true
//! processor:
//!   workers: 4
//! ```
//!
//! # Environment Variables
//!
//! - `URPC_ATTEMPT_TIMEOUT_MS` - per-attempt response timeout
//! - `URPC_MAX_ATTEMPTS` - cap on sends for idempotent calls (`0` or empty = unbounded)
//! - `URPC_WORKERS` - processor worker threads

use crate::error::{RpcError, RpcResult};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default per-attempt response timeout (ms).
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 500;

/// Default cap for exponential backoff (ms).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 8_000;

/// Default listener / housekeeping poll interval (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default server listen address.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:9701";

/// How the wait between idempotent retransmissions evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Every attempt waits `attempt_timeout_ms`.
    #[default]
    Fixed,
    /// Each attempt doubles the wait, up to `max_backoff_ms`.
    Exponential,
}

/// Client-side call dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Wait for a matching response per attempt (ms).
    pub attempt_timeout_ms: u64,
    /// Retransmission backoff.
    pub backoff: Backoff,
    /// Upper bound of the exponential wait (ms).
    pub max_backoff_ms: u64,
    /// Randomize each wait by up to +25%.
    pub jitter: bool,
    /// Cap on sends for idempotent calls; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Reply listener wake-up interval (ms), bounds shutdown latency.
    pub poll_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            backoff: Backoff::Fixed,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            jitter: false,
            max_attempts: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl DispatcherConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wait before attempt number `attempt` (0-based) gives up.
    pub fn wait_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.attempt_timeout_ms;
        let ms = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                base.saturating_mul(factor).min(self.max_backoff_ms.max(base))
            }
        };
        let ms = if self.jitter {
            ms + fastrand::u64(0..=ms / 4)
        } else {
            ms
        };
        Duration::from_millis(ms)
    }

    /// Validate configuration. Returns Ok(()) if valid.
    pub fn validate(&self) -> RpcResult<()> {
        if self.attempt_timeout_ms == 0 {
            return Err(RpcError::Config("attempt_timeout_ms must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RpcError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.backoff == Backoff::Exponential && self.max_backoff_ms < self.attempt_timeout_ms {
            return Err(RpcError::Config(
                "max_backoff_ms must be >= attempt_timeout_ms".into(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(RpcError::Config("max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

/// Server-side request processing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Threads invoking the service; 1 processes inline on the receive loop.
    pub workers: usize,
    /// Receive loop wake-up interval (ms), bounds shutdown latency.
    pub poll_interval_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration. Returns Ok(()) if valid.
    pub fn validate(&self) -> RpcResult<()> {
        if self.workers == 0 {
            return Err(RpcError::Config("workers must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RpcError::Config("poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    pub dispatcher: DispatcherConfig,
    pub processor: ProcessorConfig,
}

impl RpcConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RpcResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RpcError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse_yaml(&content)
    }

    /// Parse YAML content.
    pub fn parse_yaml(content: &str) -> RpcResult<Self> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| RpcError::Config(format!("failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `URPC_*` environment overrides.
    pub fn apply_env(&mut self) -> RpcResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> RpcResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("URPC_ATTEMPT_TIMEOUT_MS") {
            self.dispatcher.attempt_timeout_ms = parse_env("URPC_ATTEMPT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("URPC_MAX_ATTEMPTS") {
            self.dispatcher.max_attempts = match v.trim() {
                "" | "0" => None,
                s => Some(parse_env("URPC_MAX_ATTEMPTS", s)?),
            };
        }
        if let Some(v) = lookup("URPC_WORKERS") {
            self.processor.workers = parse_env("URPC_WORKERS", &v)?;
        }
        self.validate()
    }

    /// Validate both sections.
    pub fn validate(&self) -> RpcResult<()> {
        self.dispatcher.validate()?;
        self.processor.validate()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> RpcResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RpcError::Config(format!("{}: invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = RpcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.attempt_timeout(), Duration::from_millis(500));
        assert_eq!(config.processor.workers, 1);
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = "dispatcher:\n  attempt_timeout_ms: 100\n  backoff: exponential\nprocessor:\n  workers: 4\n";
        let config = RpcConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.dispatcher.attempt_timeout_ms, 100);
        assert_eq!(config.dispatcher.backoff, Backoff::Exponential);
        assert_eq!(config.dispatcher.max_backoff_ms, DEFAULT_MAX_BACKOFF_MS);
        assert_eq!(config.processor.workers, 4);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RpcConfig::parse_yaml("dispatcher:\n  retries: 3\n").unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RpcConfig::parse_yaml("processor:\n  workers: 0\n").is_err());
        assert!(RpcConfig::parse_yaml("dispatcher:\n  attempt_timeout_ms: 0\n").is_err());
        assert!(RpcConfig::parse_yaml("dispatcher:\n  max_attempts: 0\n").is_err());
        assert!(RpcConfig::parse_yaml(
            "dispatcher:\n  backoff: exponential\n  attempt_timeout_ms: 500\n  max_backoff_ms: 100\n"
        )
        .is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dispatcher:\n  attempt_timeout_ms: 250").unwrap();
        let config = RpcConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.dispatcher.attempt_timeout_ms, 250);

        let missing = RpcConfig::load_from_file("/nonexistent/urpc.yaml");
        assert!(matches!(missing, Err(RpcError::Config(_))));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("URPC_ATTEMPT_TIMEOUT_MS", "75"),
            ("URPC_MAX_ATTEMPTS", "3"),
            ("URPC_WORKERS", "2"),
        ]
        .into_iter()
        .collect();
        let mut config = RpcConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.dispatcher.attempt_timeout_ms, 75);
        assert_eq!(config.dispatcher.max_attempts, Some(3));
        assert_eq!(config.processor.workers, 2);

        let err = config
            .apply_overrides(|k| (k == "URPC_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("URPC_WORKERS"));
    }

    #[test]
    fn exponential_wait_is_capped() {
        let config = DispatcherConfig {
            attempt_timeout_ms: 100,
            backoff: Backoff::Exponential,
            max_backoff_ms: 350,
            ..DispatcherConfig::default()
        };
        assert_eq!(config.wait_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.wait_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.wait_for_attempt(2), Duration::from_millis(350));
        assert_eq!(config.wait_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let config = DispatcherConfig {
            attempt_timeout_ms: 100,
            jitter: true,
            ..DispatcherConfig::default()
        };
        for attempt in 0..20 {
            let wait = config.wait_for_attempt(attempt);
            assert!(wait >= Duration::from_millis(100) && wait <= Duration::from_millis(125));
        }
    }
}
