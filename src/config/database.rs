//! Database configuration module for the credit ledger.
//!
//! This module handles the `SQLite` connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so unique keys, composite keys and the
//! cascading foreign keys always match the Rust models.

use super::settings::DatabaseConfig;
use crate::entities::{Account, AccountSubscription, Reservation, Subscription};
use crate::errors::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, QuerySelect,
    Schema, TransactionTrait,
};
use tracing::{debug, info, instrument, warn};

/// Gets the database URL from the `DATABASE_URL` environment variable, falling back
/// to the configured URL.
#[must_use]
pub fn get_database_url(config: &DatabaseConfig) -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| config.url.clone())
}

/// Opens a connection pool for the configured database.
///
/// In-memory `SQLite` databases exist per connection, so their pool is capped at one
/// connection to keep every caller on the same database.
#[instrument(skip(config))]
pub async fn create_connection(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let url = get_database_url(config);
    let max_connections = if url.contains(":memory:") {
        1
    } else {
        config.max_connections.max(1)
    };

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .sqlx_logging(config.sqlx_logging);

    debug!(max_connections, "Connecting to ledger database");
    Database::connect(options).await.map_err(Into::into)
}

/// Creates all ledger tables that do not exist yet.
///
/// Parents are created before children so foreign keys resolve.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut statements = vec![
        schema.create_table_from_entity(Account),
        schema.create_table_from_entity(Subscription),
        schema.create_table_from_entity(AccountSubscription),
        schema.create_table_from_entity(Reservation),
    ];

    for statement in &mut statements {
        statement.if_not_exists();
        db.execute(builder.build(&*statement)).await?;
    }

    Ok(())
}

/// Returns whether the `accounts` table can be queried.
pub async fn schema_exists<C>(db: &C) -> bool
where
    C: ConnectionTrait,
{
    Account::find().limit(1).all(db).await.is_ok()
}

/// Creates the schema unless the `accounts` table is already queryable.
///
/// Returns `true` when tables were created. Running it again is a no-op.
#[instrument(skip(db))]
pub async fn initialize_schema_if_needed<C>(db: &C) -> Result<bool>
where
    C: ConnectionTrait + TransactionTrait,
{
    if schema_exists(db).await {
        debug!("Ledger schema already present");
        return Ok(false);
    }

    warn!("Ledger schema missing, creating tables");
    let txn = db.begin().await?;
    create_tables(&txn).await?;
    txn.commit().await?;
    info!("Ledger schema created");

    Ok(true)
}
