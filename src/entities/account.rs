//! Account entity - One billable identity and its personal credit balance.
//!
//! Each account is keyed by a stable `user_id` and looked up by its API `token`.
//! Reservations and subscription enrollments belong to an account and are removed
//! with it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Stable identifier of the account owner
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    /// API credential used for lookups, unique across accounts
    #[sea_orm(unique)]
    #[serde(skip_serializing)]
    pub token: String,
    /// Authoritative personal balance; only a committed reservation can push it below zero
    pub credits: i64,
    /// When the account was provisioned
    pub created_at: DateTimeUtc,
    /// When the account row last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One account holds many reservations
    #[sea_orm(has_many = "super::reservation::Entity")]
    Reservations,
    /// One account has many subscription enrollments
    #[sea_orm(has_many = "super::account_subscription::Entity")]
    AccountSubscriptions,
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl Related<super::account_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountSubscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
