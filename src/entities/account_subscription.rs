//! Account subscription entity - One account's enrollment in one plan.
//!
//! The composite key (`user_id`, `subscription_id`) identifies an enrollment.
//! `credits` is the remaining pool that subscription reservations draw from.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Enrollment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "account_subscriptions")]
pub struct Model {
    /// Enrolled account
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    /// Plan the account is enrolled in
    #[sea_orm(primary_key, auto_increment = false)]
    pub subscription_id: i32,
    /// Remaining credits in this enrollment's pool
    pub credits: i64,
    /// When the pool is next reset
    pub next_renewal: DateTimeUtc,
    /// When the enrollment was created
    pub created_at: DateTimeUtc,
    /// When the enrollment last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between an enrollment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each enrollment belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::UserId",
        to = "super::account::Column::UserId",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Account,
    /// Each enrollment belongs to one plan
    #[sea_orm(
        belongs_to = "super::subscription::Entity",
        from = "Column::SubscriptionId",
        to = "super::subscription::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Subscription,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
