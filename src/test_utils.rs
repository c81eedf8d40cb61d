//! Shared test utilities for the credit ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    config::database,
    core::{accounts, subscriptions},
    entities,
    errors::{Error, Result},
    models::{NewAccount, NewAccountSubscription, NewSubscription},
};
use chrono::{TimeDelta, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;

/// Opens an empty in-memory `SQLite` database.
///
/// The pool holds a single connection so every query sees the same database.
pub async fn memory_connection() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    Database::connect(options).await.map_err(Into::into)
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = memory_connection().await?;
    database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database with all tables initialized and a pool of
/// `max_connections`, so concurrent callers really run on separate connections.
///
/// The returned directory owns the database file; keep it alive for the whole test.
pub async fn setup_file_db(max_connections: u32) -> Result<(TempDir, DatabaseConnection)> {
    let dir = TempDir::new().map_err(|e| Error::Config {
        message: format!("Failed to create temp dir: {e}"),
    })?;
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("ledger.sqlite").display()
    );

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    database::create_tables(&db).await?;
    Ok((dir, db))
}

/// Builds account creation data.
#[must_use]
pub fn new_account(user_id: &str, token: &str, credits: i64) -> NewAccount {
    NewAccount {
        user_id: user_id.to_string(),
        token: token.to_string(),
        credits,
    }
}

/// Creates a test account whose token is `token-{user_id}`.
pub async fn create_test_account(
    db: &DatabaseConnection,
    user_id: &str,
    credits: i64,
) -> Result<entities::account::Model> {
    accounts::create_account(db, new_account(user_id, &format!("token-{user_id}"), credits)).await
}

/// Builds plan creation data.
///
/// # Defaults
/// * `description`: None
/// * `price`: 1000
/// * `duration`: 30 days
#[must_use]
pub fn new_subscription(name: &str, credits: i64) -> NewSubscription {
    NewSubscription {
        name: name.to_string(),
        description: None,
        price: 1000,
        duration: 30,
        credits,
    }
}

/// Creates a test plan with a 30 day period granting `credits` per period.
pub async fn create_test_subscription(
    db: &DatabaseConnection,
    name: &str,
    credits: i64,
) -> Result<entities::subscription::Model> {
    subscriptions::create_subscription(db, new_subscription(name, credits)).await
}

/// Enrolls an account in a plan with `credits` in the pool, renewing in 30 days.
pub async fn create_test_enrollment(
    db: &DatabaseConnection,
    user_id: &str,
    subscription_id: i32,
    credits: i64,
) -> Result<entities::account_subscription::Model> {
    subscriptions::create_account_subscription(
        db,
        NewAccountSubscription {
            user_id: user_id.to_string(),
            subscription_id,
            credits,
            next_renewal: Utc::now() + TimeDelta::days(30),
        },
    )
    .await
}

/// Sets up a complete test environment with one account, `user123`.
/// Returns (db, account) for common test scenarios.
pub async fn setup_with_account(
    credits: i64,
) -> Result<(DatabaseConnection, entities::account::Model)> {
    let db = setup_test_db().await?;
    let account = create_test_account(&db, "user123", credits).await?;
    Ok((db, account))
}

/// Sets up an account enrolled in a "Basic" plan with an allotment of 100.
/// Returns (db, account, plan); the enrollment pool starts at `pool_credits`.
pub async fn setup_with_enrollment(
    account_credits: i64,
    pool_credits: i64,
) -> Result<(
    DatabaseConnection,
    entities::account::Model,
    entities::subscription::Model,
)> {
    let (db, account) = setup_with_account(account_credits).await?;
    let plan = create_test_subscription(&db, "Basic", 100).await?;
    create_test_enrollment(&db, &account.user_id, plan.id, pool_credits).await?;
    Ok((db, account, plan))
}
