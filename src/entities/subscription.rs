//! Subscription entity - A purchasable plan in the catalog.
//!
//! Plans are not tied to any account. `credits` is the allotment an enrollment's
//! pool is reset to on every renewal, and `duration` is the billing period in days.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subscription database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    /// Unique identifier for the plan
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Display name, unique across the catalog
    #[sea_orm(unique)]
    pub name: String,
    /// Optional free-form description
    pub description: Option<String>,
    /// Price in the smallest billing unit
    pub price: i64,
    /// Length of one billing period in days
    pub duration: i32,
    /// Credits granted to an enrollment each period
    pub credits: i64,
    /// When the plan was created
    pub created_at: DateTimeUtc,
    /// When the plan was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Subscription and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One plan has many enrollments
    #[sea_orm(has_many = "super::account_subscription::Entity")]
    AccountSubscriptions,
}

impl Related<super::account_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountSubscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
