//! Unified error types for the credit ledger.
//!
//! Every ledger operation returns [`Result`]. Variants are grouped into four
//! [`ErrorKind`]s so the API layer can map them onto response classes without
//! matching on individual variants.

use crate::entities::CreditsType;
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Coarse classification of ledger failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced account, subscription, enrollment or reservation does not exist
    NotFound,
    /// A uniqueness rule or the current ledger state forbids the write
    Conflict,
    /// The request was rejected before any write
    InvalidArgument,
    /// The storage backend or its configuration failed
    StorageFailure,
}

/// Errors raised by the ledger store, the engines and the facade.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Account not found: {user_id}")]
    AccountNotFound { user_id: String },

    #[error("No account matches the supplied token")]
    AccountTokenNotFound,

    #[error("Reservation not found: {id}")]
    ReservationNotFound { id: i64 },

    #[error("Subscription not found: {id}")]
    SubscriptionNotFound { id: i32 },

    #[error("Account {user_id} is not enrolled in subscription {subscription_id}")]
    AccountSubscriptionNotFound {
        user_id: String,
        subscription_id: i32,
    },

    #[error("Account {user_id} has no subscriptions")]
    NoAccountSubscriptions { user_id: String },

    #[error("Account already exists: {user_id}")]
    DuplicateAccount { user_id: String },

    #[error("Token is already assigned to another account")]
    DuplicateToken,

    #[error("Subscription name already exists: {name}")]
    DuplicateSubscriptionName { name: String },

    #[error("Account {user_id} is already enrolled in subscription {subscription_id}")]
    DuplicateAccountSubscription {
        user_id: String,
        subscription_id: i32,
    },

    #[error("Insufficient credits: available {available}, required {required}")]
    InsufficientCredits { available: i64, required: i64 },

    #[error("Invalid credit amount: {amount}")]
    InvalidAmount { amount: i64 },

    #[error("Unknown credits type: {value}")]
    InvalidCreditsType { value: String },

    #[error("Credits type '{credits_type}' has no backing pool")]
    UnsupportedCreditsType { credits_type: CreditsType },

    #[error("Invalid subscription: {message}")]
    InvalidSubscription { message: String },

    #[error("Invalid reservation target: {message}")]
    InvalidReservationTarget { message: String },

    #[error("Renewal period must be a positive number of days, got {days}")]
    InvalidRenewalPeriod { days: i64 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl Error {
    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound { .. }
            | Self::AccountTokenNotFound
            | Self::ReservationNotFound { .. }
            | Self::SubscriptionNotFound { .. }
            | Self::AccountSubscriptionNotFound { .. }
            | Self::NoAccountSubscriptions { .. } => ErrorKind::NotFound,
            Self::DuplicateAccount { .. }
            | Self::DuplicateToken
            | Self::DuplicateSubscriptionName { .. }
            | Self::DuplicateAccountSubscription { .. }
            | Self::InsufficientCredits { .. } => ErrorKind::Conflict,
            Self::InvalidAmount { .. }
            | Self::InvalidCreditsType { .. }
            | Self::UnsupportedCreditsType { .. }
            | Self::InvalidSubscription { .. }
            | Self::InvalidReservationTarget { .. }
            | Self::InvalidRenewalPeriod { .. } => ErrorKind::InvalidArgument,
            Self::Config { .. } | Self::Database(_) => ErrorKind::StorageFailure,
        }
    }
}

/// Replaces a unique-constraint violation reported by the driver with `conflict`,
/// leaving every other database error untouched.
pub(crate) fn map_unique_violation(err: DbErr, conflict: impl FnOnce() -> Error) -> Error {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => conflict(),
        _ => Error::Database(err),
    }
}

/// Replaces a foreign-key violation reported by the driver with `missing`.
pub(crate) fn map_foreign_key_violation(err: DbErr, missing: impl FnOnce() -> Error) -> Error {
    match err.sql_err() {
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => missing(),
        _ => Error::Database(err),
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
