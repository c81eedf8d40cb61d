//! Ledger facade - The single entry point an API layer holds.
//!
//! [`Ledger`] owns the connection pool and the reservation policy and forwards to the
//! engine functions in [`crate::core`]. Each call runs in its own transaction. To make
//! several calls atomic, open one with [`Ledger::begin`] and pass it to the `core`
//! functions directly; nothing is durable until it commits.

use crate::{
    config::{LedgerConfig, ReservationConfig, database},
    core::{accounts, renewals, reservations, subscriptions},
    entities::{CreditsType, account, account_subscription, reservation, subscription},
    errors::{Error, Result},
    models::{
        AccountSubscriptionUpdate, AccountUpdate, CreditsSummary, NewAccount,
        NewAccountSubscription, NewSubscription, SubscriptionUpdate,
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tracing::{debug, info};

pub use crate::core::renewals::{EnrollmentRenewal, RenewalSummary};

/// Handle to the credit ledger, built once at startup and shared by reference.
#[derive(Debug)]
pub struct Ledger {
    db: DatabaseConnection,
    reservations: ReservationConfig,
}

impl Ledger {
    /// Wraps an existing connection.
    #[must_use]
    pub fn new(db: DatabaseConnection, config: &LedgerConfig) -> Self {
        Self {
            db,
            reservations: config.reservations,
        }
    }

    /// Opens the configured database and wraps it.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let db = database::create_connection(&config.database).await?;
        info!(
            strict_reservations = config.reservations.require_sufficient_credits,
            "Ledger connected"
        );
        Ok(Self::new(db, config))
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Opens a transaction owned by the caller. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        self.db.begin().await.map_err(Into::into)
    }

    /// Creates the tables unless they already exist. Returns whether anything was created.
    pub async fn initialize_schema_if_needed(&self) -> Result<bool> {
        database::initialize_schema_if_needed(&self.db).await
    }

    /// Checks that the database answers.
    pub async fn health_check(&self) -> Result<()> {
        self.db.ping().await?;
        debug!("Ledger database reachable");
        Ok(())
    }

    // Accounts

    /// Provisions a new account.
    pub async fn create_account(&self, data: NewAccount) -> Result<account::Model> {
        accounts::create_account(&self.db, data).await
    }

    /// Finds the account that owns `token`.
    pub async fn get_account_by_token(&self, token: &str) -> Result<Option<account::Model>> {
        accounts::get_account_by_token(&self.db, token).await
    }

    /// Finds an account by `user_id`.
    pub async fn get_account_by_user_id(&self, user_id: &str) -> Result<Option<account::Model>> {
        accounts::get_account_by_user_id(&self.db, user_id).await
    }

    /// Raw personal balance behind `token`, ignoring held reservations.
    pub async fn get_credits_by_token(&self, token: &str) -> Result<Option<i64>> {
        accounts::get_credits_by_token(&self.db, token).await
    }

    /// Applies a partial update to an account.
    pub async fn update_account(
        &self,
        user_id: &str,
        changes: AccountUpdate,
    ) -> Result<account::Model> {
        accounts::update_account(&self.db, user_id, changes).await
    }

    /// Deletes an account with its reservations and enrollments. Missing accounts are ignored.
    pub async fn delete_account(&self, user_id: &str) -> Result<()> {
        accounts::delete_account(&self.db, user_id).await
    }

    // Reservations

    /// Places a hold on an account. When `require_sufficient_credits` is configured the
    /// targeted pool must cover the hold.
    pub async fn reserve_credits(
        &self,
        user_id: &str,
        credits: i64,
        credits_type: CreditsType,
        subscription_id: Option<i32>,
    ) -> Result<reservation::Model> {
        if self.reservations.require_sufficient_credits {
            reservations::reserve_credits_checked(
                &self.db,
                user_id,
                credits,
                credits_type,
                subscription_id,
            )
            .await
        } else {
            reservations::reserve_credits(&self.db, user_id, credits, credits_type, subscription_id)
                .await
        }
    }

    /// Deducts a held reservation from its pool and removes it.
    ///
    /// # Errors
    /// Returns [`Error::ReservationNotFound`] if the reservation was already settled.
    pub async fn commit_reservation(&self, reservation_id: i64) -> Result<reservation::Model> {
        reservations::commit_reservation(&self.db, reservation_id).await
    }

    /// Same as [`Ledger::commit_reservation`].
    pub async fn deduct_credits_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<reservation::Model> {
        reservations::deduct_credits_by_reservation(&self.db, reservation_id).await
    }

    /// Releases a held reservation without touching any balance.
    ///
    /// # Errors
    /// Returns [`Error::ReservationNotFound`] if the reservation was already settled.
    pub async fn cancel_reservation(&self, reservation_id: i64) -> Result<reservation::Model> {
        reservations::cancel_reservation(&self.db, reservation_id).await
    }

    /// Retrieves a held reservation.
    pub async fn get_reservation_by_id(
        &self,
        reservation_id: i64,
    ) -> Result<Option<reservation::Model>> {
        reservations::get_reservation_by_id(&self.db, reservation_id).await
    }

    /// Lists the reservations held for an account, oldest first.
    pub async fn list_reservations_for_account(
        &self,
        user_id: &str,
    ) -> Result<Vec<reservation::Model>> {
        reservations::list_reservations_for_account(&self.db, user_id).await
    }

    /// Personal balance minus every held reservation, read in one transaction.
    pub async fn calculate_available_credits(&self, token: &str) -> Result<i64> {
        reservations::calculate_available_credits(&self.db, token).await
    }

    // Subscriptions

    /// Adds a plan to the catalog.
    pub async fn create_subscription(&self, data: NewSubscription) -> Result<subscription::Model> {
        subscriptions::create_subscription(&self.db, data).await
    }

    /// Retrieves a plan by ID.
    pub async fn get_subscription_by_id(
        &self,
        subscription_id: i32,
    ) -> Result<Option<subscription::Model>> {
        subscriptions::get_subscription_by_id(&self.db, subscription_id).await
    }

    /// Lists the catalog ordered by name.
    pub async fn list_subscriptions(&self) -> Result<Vec<subscription::Model>> {
        subscriptions::list_subscriptions(&self.db).await
    }

    /// Applies a partial update to a plan.
    pub async fn update_subscription(
        &self,
        subscription_id: i32,
        changes: SubscriptionUpdate,
    ) -> Result<subscription::Model> {
        subscriptions::update_subscription(&self.db, subscription_id, changes).await
    }

    /// Deletes a plan and every enrollment in it.
    pub async fn delete_subscription(&self, subscription_id: i32) -> Result<()> {
        subscriptions::delete_subscription(&self.db, subscription_id).await
    }

    /// Enrolls an account in a plan.
    pub async fn create_account_subscription(
        &self,
        data: NewAccountSubscription,
    ) -> Result<account_subscription::Model> {
        subscriptions::create_account_subscription(&self.db, data).await
    }

    /// Retrieves one enrollment.
    pub async fn get_account_subscription_by_id(
        &self,
        user_id: &str,
        subscription_id: i32,
    ) -> Result<Option<account_subscription::Model>> {
        subscriptions::get_account_subscription_by_id(&self.db, user_id, subscription_id).await
    }

    /// Lists the enrollments of an account.
    pub async fn get_account_subscriptions_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Vec<account_subscription::Model>> {
        subscriptions::get_account_subscriptions_by_user_id(&self.db, user_id).await
    }

    /// Applies a partial update to an enrollment.
    pub async fn update_account_subscription(
        &self,
        user_id: &str,
        subscription_id: i32,
        changes: AccountSubscriptionUpdate,
    ) -> Result<account_subscription::Model> {
        subscriptions::update_account_subscription(&self.db, user_id, subscription_id, changes)
            .await
    }

    /// Removes one enrollment.
    pub async fn delete_account_subscription(
        &self,
        user_id: &str,
        subscription_id: i32,
    ) -> Result<()> {
        subscriptions::delete_account_subscription(&self.db, user_id, subscription_id).await
    }

    /// Per-period allotment of a plan.
    pub async fn calculate_subscription_credits(&self, subscription_id: i32) -> Result<i64> {
        subscriptions::calculate_subscription_credits(&self.db, subscription_id).await
    }

    /// Sum of the enrollment pools of an account.
    pub async fn calculate_all_account_subscription_credits(&self, user_id: &str) -> Result<i64> {
        subscriptions::calculate_all_account_subscription_credits(&self.db, user_id).await
    }

    /// Sum of the enrollment pools of the account owning `token`.
    pub async fn calculate_all_account_subscription_credits_by_token(
        &self,
        token: &str,
    ) -> Result<i64> {
        subscriptions::calculate_all_account_subscription_credits_by_token(&self.db, token).await
    }

    // Renewals

    /// Resets every enrollment of a plan to its allotment and pushes `next_renewal`
    /// forward by `renewal_period_days`.
    pub async fn renew_subscription(
        &self,
        subscription_id: i32,
        renewal_period_days: i64,
    ) -> Result<subscription::Model> {
        renewals::renew_subscription(&self.db, subscription_id, renewal_period_days).await
    }

    /// Renews a single enrollment.
    pub async fn renew_account_subscription(
        &self,
        user_id: &str,
        subscription_id: i32,
        renewal_period_days: i64,
    ) -> Result<account_subscription::Model> {
        renewals::renew_account_subscription(
            &self.db,
            user_id,
            subscription_id,
            renewal_period_days,
        )
        .await
    }

    /// Renews every enrollment due at or before `now`, all or nothing.
    pub async fn process_due_renewals(&self, now: DateTime<Utc>) -> Result<RenewalSummary> {
        renewals::process_due_renewals(&self.db, now).await
    }

    // Summaries

    /// Spendable credits per pool for the account owning `token`, read in one transaction.
    ///
    /// An account without enrollments reports a subscription pool of zero. There is no
    /// enterprise pool, so that figure is always zero.
    ///
    /// # Errors
    /// Returns [`Error::AccountTokenNotFound`] if no account has this token.
    pub async fn account_credits(&self, token: &str) -> Result<CreditsSummary> {
        let txn = self.db.begin().await?;

        let account = accounts::require_account_by_token(&txn, token).await?;
        let personal = reservations::available_credits_for_account(&txn, &account.user_id).await?;
        let subscription =
            match subscriptions::calculate_all_account_subscription_credits(&txn, &account.user_id)
                .await
            {
                Ok(total) => total,
                Err(Error::NoAccountSubscriptions { .. }) => 0,
                Err(e) => return Err(e),
            };

        txn.commit().await?;
        Ok(CreditsSummary::new(personal, subscription, 0))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    async fn memory_ledger(strict: bool) -> Result<Ledger> {
        let config = LedgerConfig {
            reservations: ReservationConfig {
                require_sufficient_credits: strict,
            },
            ..LedgerConfig::default()
        };
        let ledger = Ledger::new(memory_connection().await?, &config);
        assert!(ledger.initialize_schema_if_needed().await?);
        Ok(ledger)
    }

    #[tokio::test]
    async fn test_initialize_schema_and_health_check() -> Result<()> {
        let ledger = memory_ledger(false).await?;

        assert!(!ledger.initialize_schema_if_needed().await?);
        ledger.health_check().await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_reservation_lifecycle_through_facade() -> Result<()> {
        let ledger = memory_ledger(false).await?;
        ledger
            .create_account(new_account("A1", "tok-a1", 100))
            .await?;

        let first = ledger
            .reserve_credits("A1", 40, CreditsType::Personal, None)
            .await?;
        let second = ledger
            .reserve_credits("A1", 20, CreditsType::Personal, None)
            .await?;
        assert_eq!(ledger.calculate_available_credits("tok-a1").await?, 40);
        assert_eq!(ledger.list_reservations_for_account("A1").await?.len(), 2);

        ledger.commit_reservation(first.id).await?;
        ledger.cancel_reservation(second.id).await?;

        assert_eq!(ledger.get_credits_by_token("tok-a1").await?, Some(60));
        assert_eq!(ledger.calculate_available_credits("tok-a1").await?, 60);
        assert!(ledger.get_reservation_by_id(first.id).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_follows_configured_policy() -> Result<()> {
        let lenient = memory_ledger(false).await?;
        lenient.create_account(new_account("u1", "t1", 10)).await?;
        lenient
            .reserve_credits("u1", 50, CreditsType::Personal, None)
            .await?;

        let strict = memory_ledger(true).await?;
        strict.create_account(new_account("u1", "t1", 10)).await?;
        let result = strict
            .reserve_credits("u1", 50, CreditsType::Personal, None)
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Conflict);
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                available: 10,
                required: 50
            }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_account_credits_summary() -> Result<()> {
        let ledger = memory_ledger(false).await?;
        ledger.create_account(new_account("u1", "t1", 100)).await?;

        let summary = ledger.account_credits("t1").await?;
        assert_eq!(summary, CreditsSummary::new(100, 0, 0));

        let plan = ledger
            .create_subscription(new_subscription("Basic", 50))
            .await?;
        ledger
            .create_account_subscription(NewAccountSubscription {
                user_id: "u1".to_string(),
                subscription_id: plan.id,
                credits: 50,
                next_renewal: Utc::now(),
            })
            .await?;
        ledger
            .reserve_credits("u1", 30, CreditsType::Personal, None)
            .await?;

        let summary = ledger.account_credits("t1").await?;
        assert_eq!(summary.personal, 70);
        assert_eq!(summary.subscription, 50);
        assert_eq!(summary.enterprise, 0);
        assert_eq!(summary.total, 120);

        let result = ledger.account_credits("unknown").await;
        assert!(matches!(result.unwrap_err(), Error::AccountTokenNotFound));

        Ok(())
    }

    #[tokio::test]
    async fn test_caller_transaction_composes_operations() -> Result<()> {
        let ledger = memory_ledger(false).await?;
        ledger.create_account(new_account("u1", "t1", 100)).await?;
        let reservation = ledger
            .reserve_credits("u1", 25, CreditsType::Personal, None)
            .await?;

        let txn = ledger.begin().await?;
        reservations::commit_reservation(&txn, reservation.id).await?;
        accounts::update_account(
            &txn,
            "u1",
            AccountUpdate {
                token: Some("t2".to_string()),
                credits: None,
            },
        )
        .await?;
        drop(txn);

        // Both writes were rolled back together
        assert_eq!(ledger.get_credits_by_token("t1").await?, Some(100));
        assert!(ledger.get_reservation_by_id(reservation.id).await?.is_some());

        let txn = ledger.begin().await?;
        reservations::commit_reservation(&txn, reservation.id).await?;
        accounts::update_account(
            &txn,
            "u1",
            AccountUpdate {
                token: Some("t2".to_string()),
                credits: None,
            },
        )
        .await?;
        txn.commit().await?;

        assert_eq!(ledger.get_credits_by_token("t2").await?, Some(75));

        Ok(())
    }

    #[tokio::test]
    async fn test_renewal_through_facade() -> Result<()> {
        let ledger = memory_ledger(false).await?;
        ledger.create_account(new_account("u1", "t1", 0)).await?;
        let plan = ledger
            .create_subscription(new_subscription("Basic", 100))
            .await?;
        let start = Utc::now();
        ledger
            .create_account_subscription(NewAccountSubscription {
                user_id: "u1".to_string(),
                subscription_id: plan.id,
                credits: 30,
                next_renewal: start,
            })
            .await?;

        let summary = ledger.process_due_renewals(start).await?;
        assert_eq!(summary.renewed_count(), 1);
        assert_eq!(
            ledger
                .calculate_all_account_subscription_credits_by_token("t1")
                .await?,
            100
        );

        Ok(())
    }
}
