/// Database connection and schema bootstrap
pub mod database;

/// Ledger settings loaded from ledger.toml
pub mod settings;

pub use settings::{DatabaseConfig, LedgerConfig, ReservationConfig};
