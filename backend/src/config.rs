//! Configuration management for the Fuel Inventory Ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with FIM__ prefix

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::LedgerPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Ledger workflow policy
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key used to verify bearer tokens
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Largest tolerated gap between measured and declared intake liters
    pub reconciliation_threshold_liters: Decimal,

    /// Whether external dispatches need photo evidence to complete
    pub external_evidence_required: bool,

    /// How long a stored idempotent response can be replayed
    pub idempotency_ttl_hours: i64,
}

impl LedgerConfig {
    pub fn policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            reconciliation_threshold_liters: self.reconciliation_threshold_liters,
            external_evidence_required: self.external_evidence_required,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("FIM_ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let defaults = LedgerPolicy::default();

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default(
                "ledger.reconciliation_threshold_liters",
                defaults.reconciliation_threshold_liters.to_string(),
            )?
            .set_default(
                "ledger.external_evidence_required",
                defaults.external_evidence_required,
            )?
            .set_default("ledger.idempotency_ttl_hours", 24)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (FIM__ prefix)
            .add_source(
                Environment::with_prefix("FIM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
