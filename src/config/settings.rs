//! Ledger settings loaded from `ledger.toml`.
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration backed by a local `SQLite` file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Default location of the settings file
pub const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

/// Default database used when neither the file nor `DATABASE_URL` names one
pub const DEFAULT_DATABASE_URL: &str = "sqlite://credit_ledger.sqlite?mode=rwc";

/// Top-level structure of `ledger.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Storage backend settings
    pub database: DatabaseConfig,
    /// Reservation policy
    pub reservations: ReservationConfig,
}

/// Storage backend settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `DATABASE_URL` takes precedence
    pub url: String,
    /// Upper bound on pooled connections (forced to 1 for in-memory databases)
    pub max_connections: u32,
    /// Whether sqlx logs every statement
    pub sqlx_logging: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 8,
            sqlx_logging: false,
        }
    }
}

/// Reservation policy
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Refuse a reservation the targeted pool cannot cover
    pub require_sufficient_credits: bool,
}

/// Loads ledger settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LedgerConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {path_ref:?}: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config file {path_ref:?}: {e}"),
    })
}

/// Loads settings from `path`, falling back to defaults when the file does not exist.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<LedgerConfig> {
    let path_ref = path.as_ref();
    if path_ref.exists() {
        load_config(path_ref)
    } else {
        info!("No config file at {:?}, using defaults", path_ref);
        Ok(LedgerConfig::default())
    }
}
