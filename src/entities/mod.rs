//! Entity module - Contains all SeaORM entity definitions for the ledger.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod account_subscription;
pub mod reservation;
pub mod subscription;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use account_subscription::{
    Column as AccountSubscriptionColumn, Entity as AccountSubscription,
    Model as AccountSubscriptionModel,
};
pub use reservation::{
    Column as ReservationColumn, CreditsType, Entity as Reservation, Model as ReservationModel,
};
pub use subscription::{
    Column as SubscriptionColumn, Entity as Subscription, Model as SubscriptionModel,
};
