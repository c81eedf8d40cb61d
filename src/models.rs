//! Input records accepted by the ledger.
//!
//! Create records carry every column a caller may choose. Update records list only the
//! mutable fields of an entity; `None` leaves the stored value untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data for provisioning a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Stable identifier of the owner
    pub user_id: String,
    /// API credential, unique across accounts
    pub token: String,
    /// Opening personal balance
    #[serde(default)]
    pub credits: i64,
}

/// Mutable fields of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// Replacement API credential
    pub token: Option<String>,
    /// Replacement personal balance
    pub credits: Option<i64>,
}

/// Data for adding a plan to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Unique plan name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Price in the smallest billing unit
    pub price: i64,
    /// Billing period in days
    pub duration: i32,
    /// Credits granted per period
    pub credits: i64,
}

/// Mutable fields of a catalog plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// Replacement plan name
    pub name: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    /// Replacement price
    pub price: Option<i64>,
    /// Replacement billing period in days
    pub duration: Option<i32>,
    /// Replacement per-period allotment
    pub credits: Option<i64>,
}

/// Data for enrolling an account in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccountSubscription {
    /// Account to enroll
    pub user_id: String,
    /// Plan to enroll in
    pub subscription_id: i32,
    /// Opening pool balance
    pub credits: i64,
    /// First renewal time
    pub next_renewal: DateTime<Utc>,
}

/// Mutable fields of an enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSubscriptionUpdate {
    /// Replacement pool balance
    pub credits: Option<i64>,
    /// Replacement renewal time
    pub next_renewal: Option<DateTime<Utc>>,
}

/// Per-pool view of an account's spendable credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsSummary {
    /// Personal balance minus every held reservation
    pub personal: i64,
    /// Sum of all enrollment pools
    pub subscription: i64,
    /// Enterprise pool; always zero until organisations exist
    pub enterprise: i64,
    /// Sum of the three pools
    pub total: i64,
}

impl CreditsSummary {
    /// Builds a summary, deriving `total` from the pools.
    #[must_use]
    pub const fn new(personal: i64, subscription: i64, enterprise: i64) -> Self {
        Self {
            personal,
            subscription,
            enterprise,
            total: personal + subscription + enterprise,
        }
    }
}
