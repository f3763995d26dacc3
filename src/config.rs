//! Engine configuration.
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! environment overrides. A config that fails to load falls back to
//! defaults with a warning rather than refusing to start - the engine
//! serving cached data beats the engine not serving at all.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::permission::MaintainerTier;

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "WEFT_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub maintainer_tier: MaintainerTier,
    pub poll: PollConfig,
    pub limits: Limits,
    /// Extra reserved owner names, on top of the built-in forge hosts.
    pub reserved_owners: Vec<String>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Upper bound on one poll request. On expiry the store is untouched
    /// and the error is retryable.
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { timeout_ms: 7_000 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Bodies above this are omitted from degraded snapshots when the
    /// persistence backend reports quota exhaustion.
    pub persist_body_max_bytes: usize,
    /// Largest event batch one ingest call accepts from the intake worker.
    pub max_batch_events: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            persist_body_max_bytes: 16 * 1024,
            max_batch_events: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 0 = errors, 1 = info, 2+ = debug. The `LOG` env filter overrides.
    pub verbosity: u8,
    pub stdout_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            stdout_format: LogFormat::Compact,
        }
    }
}

impl Config {
    /// Parse from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load from a file if present, falling back to defaults on any
    /// failure, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(path) if path.exists() => match std::fs::read_to_string(path) {
                Ok(contents) => match Self::from_toml_str(&contents) {
                    Ok(config) => config,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "config parse failed, using defaults");
                        Self::default()
                    }
                },
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "config read failed, using defaults");
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        apply_env_overrides(&mut config);
        config
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = env_u64("POLL_TIMEOUT_MS") {
        config.poll.timeout_ms = v;
    }
    if let Some(v) = env_u64("PERSIST_BODY_MAX_BYTES") {
        config.limits.persist_body_max_bytes = v as usize;
    }
    if let Some(v) = env_u64("VERBOSITY") {
        config.logging.verbosity = v.min(u8::MAX as u64) as u8;
    }
    if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}RESERVED_OWNERS")) {
        config.reserved_owners = raw
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .and_then(|v| v.parse().ok())
}
