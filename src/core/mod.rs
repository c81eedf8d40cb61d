//! Core ledger logic - Framework-agnostic account, reservation and subscription operations.
//!
//! Every operation is a free async function generic over the SeaORM connection, so it runs
//! against a pooled connection or inside a transaction opened by the caller.

pub mod accounts;
pub mod renewals;
pub mod reservations;
pub mod subscriptions;
