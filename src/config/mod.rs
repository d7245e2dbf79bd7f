//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `roap` binary)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoapError};
use crate::protocol::MAX_RETRIES;

/// Tie-breaker this implementation advertises unless configured otherwise.
pub const DEFAULT_TIE_BREAKER: u32 = 0xFFFF_FFFE;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Negotiation engine configuration
    #[serde(default)]
    pub negotiation: NegotiationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RoapError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RoapError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ROAP_TIE_BREAKER") {
            if let Some(val) = parse_u32(&val) {
                config.negotiation.tie_breaker = val;
            }
        }
        if let Ok(val) = std::env::var("ROAP_MAX_RETRIES") {
            if let Ok(val) = val.parse() {
                config.negotiation.max_retries = val;
            }
        }
        if let Ok(val) = std::env::var("ROAP_INITIAL_SEQUENCE") {
            if let Ok(val) = val.parse() {
                config.negotiation.initial_sequence = val;
            }
        }

        config
    }

    /// Default config file location (`<config dir>/roap/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("roap").join("config.toml"))
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.negotiation.validate()
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RoapError::Config(e.to_string()))
    }
}

/// Negotiation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Glare tie-breaker sent with local offers
    pub tie_breaker: u32,

    /// Extra offer attempts after retryable peer errors
    pub max_retries: u32,

    /// Starting sequence number for new sessions
    pub initial_sequence: u64,

    /// Lower bound of the DOUBLECONFLICT backoff hint (ms)
    pub retry_after_min_ms: u64,

    /// Upper bound of the DOUBLECONFLICT backoff hint (ms)
    pub retry_after_max_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            tie_breaker: DEFAULT_TIE_BREAKER,
            max_retries: MAX_RETRIES,
            initial_sequence: 0,
            retry_after_min_ms: 100,
            retry_after_max_ms: 1000,
        }
    }
}

impl NegotiationConfig {
    /// Use a different tie-breaker
    pub fn with_tie_breaker(mut self, tie_breaker: u32) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    /// Start sessions at the given sequence number
    pub fn with_initial_sequence(mut self, seq: u64) -> Self {
        self.initial_sequence = seq;
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.retry_after_min_ms > self.retry_after_max_ms {
            return Err(RoapError::Config(format!(
                "retry_after_min_ms ({}) exceeds retry_after_max_ms ({})",
                self.retry_after_min_ms, self.retry_after_max_ms
            )));
        }
        Ok(())
    }
}

/// Accept decimal or `0x`-prefixed hex.
fn parse_u32(val: &str) -> Option<u32> {
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}
