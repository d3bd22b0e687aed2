//! Configuration management for the inventory ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with LEDGER_ prefix

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Ledger behaviour
    pub ledger: LedgerConfig,

    /// Snapshot storage used by the maintenance binary
    pub storage: StorageConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// How order item edits affect stock
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderEditPolicy {
    /// Adjust stock by the per-product net difference between old and new items
    #[default]
    Diff,
    /// Leave stock untouched; drift is repaired by reconciliation
    StockNeutral,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Restore stock when an order is cancelled (and deduct again on reactivation)
    pub cancellation_restores_stock: bool,

    pub order_edit_policy: OrderEditPolicy,

    /// Optimistic retries before a write reports `ConcurrentModification`
    pub max_adjust_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// JSON snapshot holding products and orders
    pub snapshot_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when RUST_LOG is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = Self::defaults(&environment)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER_ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// In-code defaults, the lowest configuration layer
    fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("ledger.cancellation_restores_stock", true)?
            .set_default("ledger.order_edit_policy", "diff")?
            .set_default("ledger.max_adjust_retries", 5)?
            .set_default("storage.snapshot_path", "data/ledger.json")?
            .set_default(
                "logging.filter",
                "ledger_maint=info,inventory_ledger_backend=info",
            )?
            .set_default("logging.json", false)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cancellation_restores_stock: true,
            order_edit_policy: OrderEditPolicy::Diff,
            max_adjust_retries: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ledger_maint=info,inventory_ledger_backend=info".to_string(),
            json: false,
        }
    }
}
