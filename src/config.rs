//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::book::bins::{DEFAULT_MAX_BINS, DEFAULT_MAX_DIVERGENCE};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Book ===
    /// Market to subscribe to. Events for any other market are dropped.
    #[serde(default = "default_market")]
    pub market: String,

    /// Maximum bins kept per side.
    #[serde(default = "default_max_bins")]
    pub max_bins_per_side: usize,

    /// Price divergence cap for relevance weighting (e.g., 0.10).
    #[serde(default = "default_max_divergence")]
    pub max_relevance_divergence: Decimal,

    /// Admit rate-0 (market) orders into the replica.
    #[serde(default)]
    pub track_market_orders: bool,

    // === Ownership Re-checks ===
    /// First ownership re-check delay after a bin mutation.
    #[serde(default = "default_recheck_short_ms")]
    pub ownership_recheck_short_ms: u64,

    /// Fallback ownership re-check delay.
    #[serde(default = "default_recheck_long_ms")]
    pub ownership_recheck_long_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for the book API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_market() -> String {
    "dcr_btc".to_string()
}

fn default_max_bins() -> usize {
    DEFAULT_MAX_BINS
}

fn default_max_divergence() -> Decimal {
    DEFAULT_MAX_DIVERGENCE
}

fn default_recheck_short_ms() -> u64 {
    10
}

fn default_recheck_long_ms() -> u64 {
    1000
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: default_market(),
            max_bins_per_side: default_max_bins(),
            max_relevance_divergence: default_max_divergence(),
            track_market_orders: false,
            ownership_recheck_short_ms: default_recheck_short_ms(),
            ownership_recheck_long_ms: default_recheck_long_ms(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.market.trim().is_empty() {
            return Err("MARKET must not be empty".to_string());
        }

        if self.max_bins_per_side == 0 {
            return Err("MAX_BINS_PER_SIDE must be at least 1".to_string());
        }

        if self.max_relevance_divergence <= Decimal::ZERO
            || self.max_relevance_divergence > Decimal::ONE
        {
            return Err("MAX_RELEVANCE_DIVERGENCE must be in (0, 1]".to_string());
        }

        if self.ownership_recheck_long_ms < self.ownership_recheck_short_ms {
            return Err(
                "OWNERSHIP_RECHECK_LONG_MS must not be shorter than OWNERSHIP_RECHECK_SHORT_MS"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// Short ownership re-check delay.
    pub fn recheck_short(&self) -> Duration {
        Duration::from_millis(self.ownership_recheck_short_ms)
    }

    /// Long ownership re-check delay.
    pub fn recheck_long(&self) -> Duration {
        Duration::from_millis(self.ownership_recheck_long_ms)
    }
}
