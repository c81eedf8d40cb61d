//! Reservation entity - Credits provisionally held against a pending operation.
//!
//! A reservation row exists only while it is held. Committing converts it into a
//! balance deduction and removes the row; cancelling removes it with no balance effect.

use crate::errors::Error;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Which credit pool a reservation draws from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum CreditsType {
    /// The account's own `credits` balance
    #[sea_orm(string_value = "personal")]
    Personal,
    /// The `credits` pool of one subscription enrollment
    #[sea_orm(string_value = "subscription")]
    Subscription,
    /// Organisation-level credits; declared but without a backing pool
    #[sea_orm(string_value = "enterprise")]
    Enterprise,
}

impl CreditsType {
    /// Wire name of the credits type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Subscription => "subscription",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for CreditsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditsType {
    type Err = Error;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "personal" => Ok(Self::Personal),
            "subscription" => Ok(Self::Subscription),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(Error::InvalidCreditsType {
                value: other.to_string(),
            }),
        }
    }
}

/// Reservation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservations")]
pub struct Model {
    /// Unique identifier for the reservation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning account
    pub user_id: String,
    /// Amount held, always positive
    pub credits: i64,
    /// Pool the held credits will be deducted from on commit
    pub credits_type: CreditsType,
    /// Enrollment pool for `subscription` reservations, `None` otherwise
    pub subscription_id: Option<i32>,
    /// When the hold was placed
    pub created_at: DateTimeUtc,
    /// When the row last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Reservation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each reservation belongs to one account and is removed with it
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::UserId",
        to = "super::account::Column::UserId",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
