//! Subscription business logic - Plan catalog, enrollments and subscription pool sums.
//!
//! Plans live in the catalog independently of accounts. An enrollment ties one account to
//! one plan and carries the pool that subscription reservations are deducted from.
//! Deleting a plan or an account removes its enrollments through the foreign keys.

use crate::{
    entities::{AccountSubscription, Subscription, account_subscription, subscription},
    errors::{Error, Result, map_foreign_key_violation, map_unique_violation},
    models::{
        AccountSubscriptionUpdate, NewAccountSubscription, NewSubscription, SubscriptionUpdate,
    },
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument};

/// Adds a plan to the catalog.
///
/// # Errors
/// Returns an error if:
/// - The name is empty, the price or allotment is negative, or the duration is not positive
/// - Another plan already uses the name
/// - The database insert fails
#[instrument(skip(db, data), fields(name = %data.name))]
pub async fn create_subscription<C>(db: &C, data: NewSubscription) -> Result<subscription::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let name = data.name.trim().to_string();
    validate_plan(&name, data.price, data.duration, data.credits)?;

    let txn = db.begin().await?;
    if find_by_name(&txn, &name).await?.is_some() {
        return Err(Error::DuplicateSubscriptionName { name });
    }

    let now = Utc::now();
    let conflict_name = name.clone();
    let created = subscription::ActiveModel {
        name: Set(name),
        description: Set(data.description),
        price: Set(data.price),
        duration: Set(data.duration),
        credits: Set(data.credits),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(|e| {
        map_unique_violation(e, || Error::DuplicateSubscriptionName {
            name: conflict_name,
        })
    })?;

    txn.commit().await?;
    info!(subscription_id = created.id, "Subscription created");
    Ok(created)
}

/// Retrieves a plan by its ID.
pub async fn get_subscription_by_id<C>(
    db: &C,
    subscription_id: i32,
) -> Result<Option<subscription::Model>>
where
    C: ConnectionTrait,
{
    Subscription::find_by_id(subscription_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists the whole catalog ordered by name.
pub async fn list_subscriptions<C>(db: &C) -> Result<Vec<subscription::Model>>
where
    C: ConnectionTrait,
{
    Subscription::find()
        .order_by_asc(subscription::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Applies the fields present in `changes` to a plan.
///
/// # Errors
/// Returns an error if:
/// - The plan does not exist
/// - A changed field fails the same checks as [`create_subscription`]
/// - The new name belongs to a different plan
/// - The database update fails
#[instrument(skip(db, changes))]
pub async fn update_subscription<C>(
    db: &C,
    subscription_id: i32,
    changes: SubscriptionUpdate,
) -> Result<subscription::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let existing = Subscription::find_by_id(subscription_id)
        .one(&txn)
        .await?
        .ok_or(Error::SubscriptionNotFound {
            id: subscription_id,
        })?;

    let name = changes
        .name
        .map_or_else(|| existing.name.clone(), |n| n.trim().to_string());
    validate_plan(
        &name,
        changes.price.unwrap_or(existing.price),
        changes.duration.unwrap_or(existing.duration),
        changes.credits.unwrap_or(existing.credits),
    )?;

    if name != existing.name {
        if let Some(other) = find_by_name(&txn, &name).await? {
            if other.id != existing.id {
                return Err(Error::DuplicateSubscriptionName { name });
            }
        }
    }

    let mut active: subscription::ActiveModel = existing.into();
    active.name = Set(name.clone());
    if let Some(description) = changes.description {
        active.description = Set(description);
    }
    if let Some(price) = changes.price {
        active.price = Set(price);
    }
    if let Some(duration) = changes.duration {
        active.duration = Set(duration);
    }
    if let Some(credits) = changes.credits {
        active.credits = Set(credits);
    }
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&txn)
        .await
        .map_err(|e| map_unique_violation(e, || Error::DuplicateSubscriptionName { name }))?;

    txn.commit().await?;
    info!("Subscription updated");
    Ok(updated)
}

/// Removes a plan from the catalog together with every enrollment in it.
///
/// # Errors
/// Returns [`Error::SubscriptionNotFound`] if the plan does not exist.
#[instrument(skip(db))]
pub async fn delete_subscription<C>(db: &C, subscription_id: i32) -> Result<()>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let result = Subscription::delete_by_id(subscription_id)
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::SubscriptionNotFound {
            id: subscription_id,
        });
    }
    txn.commit().await?;

    info!("Subscription deleted");
    Ok(())
}

/// Enrolls an account in a plan with an opening pool.
///
/// # Errors
/// Returns an error if:
/// - The opening pool is negative
/// - The account or the plan does not exist
/// - The account is already enrolled in the plan
/// - The database insert fails
#[instrument(skip(db, data), fields(user_id = %data.user_id, subscription_id = data.subscription_id))]
pub async fn create_account_subscription<C>(
    db: &C,
    data: NewAccountSubscription,
) -> Result<account_subscription::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    if data.credits < 0 {
        return Err(Error::InvalidAmount {
            amount: data.credits,
        });
    }

    let txn = db.begin().await?;

    if crate::core::accounts::get_account_by_user_id(&txn, &data.user_id)
        .await?
        .is_none()
    {
        return Err(Error::AccountNotFound {
            user_id: data.user_id,
        });
    }
    if get_subscription_by_id(&txn, data.subscription_id)
        .await?
        .is_none()
    {
        return Err(Error::SubscriptionNotFound {
            id: data.subscription_id,
        });
    }
    if get_account_subscription_by_id(&txn, &data.user_id, data.subscription_id)
        .await?
        .is_some()
    {
        return Err(Error::DuplicateAccountSubscription {
            user_id: data.user_id,
            subscription_id: data.subscription_id,
        });
    }

    let now = Utc::now();
    let (user_id, subscription_id) = (data.user_id.clone(), data.subscription_id);
    let created = account_subscription::ActiveModel {
        user_id: Set(data.user_id),
        subscription_id: Set(data.subscription_id),
        credits: Set(data.credits),
        next_renewal: Set(data.next_renewal),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await
    .map_err(|e| match e.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
            Error::DuplicateAccountSubscription {
                user_id,
                subscription_id,
            }
        }
        _ => map_foreign_key_violation(e, || Error::SubscriptionNotFound {
            id: subscription_id,
        }),
    })?;

    txn.commit().await?;
    info!(credits = created.credits, "Account enrolled");
    Ok(created)
}

/// Retrieves one enrollment by its composite key.
pub async fn get_account_subscription_by_id<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
) -> Result<Option<account_subscription::Model>>
where
    C: ConnectionTrait,
{
    AccountSubscription::find_by_id((user_id.to_string(), subscription_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists every enrollment of an account ordered by plan.
pub async fn get_account_subscriptions_by_user_id<C>(
    db: &C,
    user_id: &str,
) -> Result<Vec<account_subscription::Model>>
where
    C: ConnectionTrait,
{
    AccountSubscription::find()
        .filter(account_subscription::Column::UserId.eq(user_id))
        .order_by_asc(account_subscription::Column::SubscriptionId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Applies the fields present in `changes` to an enrollment.
///
/// # Errors
/// Returns [`Error::AccountSubscriptionNotFound`] if the account is not enrolled in the plan.
#[instrument(skip(db, changes))]
pub async fn update_account_subscription<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
    changes: AccountSubscriptionUpdate,
) -> Result<account_subscription::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let existing = require_enrollment(&txn, user_id, subscription_id).await?;

    let mut active: account_subscription::ActiveModel = existing.into();
    if let Some(credits) = changes.credits {
        active.credits = Set(credits);
    }
    if let Some(next_renewal) = changes.next_renewal {
        active.next_renewal = Set(next_renewal);
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(&txn).await?;
    txn.commit().await?;

    info!(credits = updated.credits, "Enrollment updated");
    Ok(updated)
}

/// Removes one enrollment.
///
/// # Errors
/// Returns [`Error::AccountSubscriptionNotFound`] if the account is not enrolled in the plan.
#[instrument(skip(db))]
pub async fn delete_account_subscription<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
) -> Result<()>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let result = AccountSubscription::delete_by_id((user_id.to_string(), subscription_id))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::AccountSubscriptionNotFound {
            user_id: user_id.to_string(),
            subscription_id,
        });
    }
    txn.commit().await?;

    info!("Enrollment deleted");
    Ok(())
}

/// Returns the per-period allotment of a plan.
///
/// # Errors
/// Returns [`Error::SubscriptionNotFound`] if the plan does not exist.
pub async fn calculate_subscription_credits<C>(db: &C, subscription_id: i32) -> Result<i64>
where
    C: ConnectionTrait,
{
    get_subscription_by_id(db, subscription_id)
        .await?
        .map(|plan| plan.credits)
        .ok_or(Error::SubscriptionNotFound {
            id: subscription_id,
        })
}

/// Sums the remaining pools of every enrollment of an account.
///
/// # Errors
/// Returns [`Error::NoAccountSubscriptions`] if the account has no enrollment at all.
pub async fn calculate_all_account_subscription_credits<C>(db: &C, user_id: &str) -> Result<i64>
where
    C: ConnectionTrait,
{
    let enrollments = get_account_subscriptions_by_user_id(db, user_id).await?;
    if enrollments.is_empty() {
        return Err(Error::NoAccountSubscriptions {
            user_id: user_id.to_string(),
        });
    }

    let total = enrollments.iter().map(|e| e.credits).sum();
    debug!(user_id, enrollments = enrollments.len(), total, "Summed subscription pools");
    Ok(total)
}

/// Same as [`calculate_all_account_subscription_credits`], resolving the account by token.
/// The lookup and the sum run in one transaction.
///
/// # Errors
/// Returns [`Error::AccountTokenNotFound`] for an unknown token, then the errors of
/// [`calculate_all_account_subscription_credits`].
pub async fn calculate_all_account_subscription_credits_by_token<C>(
    db: &C,
    token: &str,
) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let account = crate::core::accounts::require_account_by_token(&txn, token).await?;
    let total = calculate_all_account_subscription_credits(&txn, &account.user_id).await?;
    txn.commit().await?;
    Ok(total)
}

pub(crate) async fn require_enrollment<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
) -> Result<account_subscription::Model>
where
    C: ConnectionTrait,
{
    get_account_subscription_by_id(db, user_id, subscription_id)
        .await?
        .ok_or_else(|| Error::AccountSubscriptionNotFound {
            user_id: user_id.to_string(),
            subscription_id,
        })
}

fn validate_plan(name: &str, price: i64, duration: i32, credits: i64) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidSubscription {
            message: "Subscription name cannot be empty".to_string(),
        });
    }
    if price < 0 {
        return Err(Error::InvalidAmount { amount: price });
    }
    if duration <= 0 {
        return Err(Error::InvalidRenewalPeriod {
            days: i64::from(duration),
        });
    }
    if credits < 0 {
        return Err(Error::InvalidAmount { amount: credits });
    }
    Ok(())
}

async fn find_by_name<C>(db: &C, name: &str) -> Result<Option<subscription::Model>>
where
    C: ConnectionTrait,
{
    Subscription::find()
        .filter(subscription::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{accounts, reservations};
    use crate::entities::CreditsType;
    use crate::test_utils::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_create_subscription_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = create_subscription(&db, new_subscription("   ", 100)).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidSubscription { .. }
        ));

        let mut plan = new_subscription("Basic", 100);
        plan.price = -1;
        let result = create_subscription(&db, plan).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidAmount { amount: -1 }
        ));

        let mut plan = new_subscription("Basic", 100);
        plan.duration = 0;
        let result = create_subscription(&db, plan).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidRenewalPeriod { days: 0 }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_and_list_subscriptions() -> Result<()> {
        let db = setup_test_db().await?;

        let premium = create_test_subscription(&db, "Premium", 500).await?;
        let basic = create_test_subscription(&db, "  Basic ", 100).await?;
        assert_eq!(basic.name, "Basic");

        let fetched = get_subscription_by_id(&db, premium.id).await?.unwrap();
        assert_eq!(fetched, premium);

        let names: Vec<_> = list_subscriptions(&db)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Basic", "Premium"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_create_subscription_duplicate_name() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_subscription(&db, "Premium", 500).await?;

        let result = create_subscription(&db, new_subscription("Premium", 10)).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::DuplicateSubscriptionName { name } if name == "Premium"
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_update_subscription() -> Result<()> {
        let db = setup_test_db().await?;
        let plan = create_test_subscription(&db, "Premium", 500).await?;

        let updated = update_subscription(
            &db,
            plan.id,
            SubscriptionUpdate {
                description: Some(Some("Top tier".to_string())),
                credits: Some(750),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(updated.name, "Premium");
        assert_eq!(updated.description.as_deref(), Some("Top tier"));
        assert_eq!(updated.credits, 750);
        assert_eq!(updated.price, plan.price);

        let cleared = update_subscription(
            &db,
            plan.id,
            SubscriptionUpdate {
                description: Some(None),
                ..Default::default()
            },
        )
        .await?;
        assert!(cleared.description.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_update_subscription_errors() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_subscription(&db, "Basic", 100).await?;
        let premium = create_test_subscription(&db, "Premium", 500).await?;

        let result = update_subscription(&db, 999, SubscriptionUpdate::default()).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::SubscriptionNotFound { id: 999 }
        ));

        let result = update_subscription(
            &db,
            premium.id,
            SubscriptionUpdate {
                name: Some("Basic".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::DuplicateSubscriptionName { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_subscription_cascades_enrollments() -> Result<()> {
        let (db, account, plan) = setup_with_enrollment(100, 50).await?;

        delete_subscription(&db, plan.id).await?;

        assert!(get_subscription_by_id(&db, plan.id).await?.is_none());
        assert!(
            get_account_subscriptions_by_user_id(&db, &account.user_id)
                .await?
                .is_empty()
        );

        let result = delete_subscription(&db, plan.id).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::SubscriptionNotFound { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_account_subscription_errors() -> Result<()> {
        let (db, account, plan) = setup_with_enrollment(100, 50).await?;
        let next_renewal = Utc::now() + Duration::days(30);

        let result = create_account_subscription(
            &db,
            NewAccountSubscription {
                user_id: account.user_id.clone(),
                subscription_id: plan.id,
                credits: 10,
                next_renewal,
            },
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::DuplicateAccountSubscription { .. }
        ));

        let result = create_account_subscription(
            &db,
            NewAccountSubscription {
                user_id: "ghost".to_string(),
                subscription_id: plan.id,
                credits: 10,
                next_renewal,
            },
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::AccountNotFound { .. }
        ));

        let result = create_account_subscription(
            &db,
            NewAccountSubscription {
                user_id: account.user_id.clone(),
                subscription_id: 999,
                credits: 10,
                next_renewal,
            },
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::SubscriptionNotFound { id: 999 }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_delete_account_subscription() -> Result<()> {
        let (db, account, plan) = setup_with_enrollment(100, 50).await?;
        let next_renewal = Utc::now() + Duration::days(7);

        let updated = update_account_subscription(
            &db,
            &account.user_id,
            plan.id,
            AccountSubscriptionUpdate {
                credits: Some(5),
                next_renewal: Some(next_renewal),
            },
        )
        .await?;
        assert_eq!(updated.credits, 5);
        assert_eq!(updated.next_renewal, next_renewal);

        delete_account_subscription(&db, &account.user_id, plan.id).await?;
        assert!(
            get_account_subscription_by_id(&db, &account.user_id, plan.id)
                .await?
                .is_none()
        );

        let result = delete_account_subscription(&db, &account.user_id, plan.id).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::AccountSubscriptionNotFound { .. }
        ));

        let result = update_account_subscription(
            &db,
            &account.user_id,
            plan.id,
            AccountSubscriptionUpdate::default(),
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::AccountSubscriptionNotFound { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_credit_sums() -> Result<()> {
        let (db, account, basic) = setup_with_enrollment(100, 40).await?;
        let premium = create_test_subscription(&db, "Premium", 500).await?;
        create_test_enrollment(&db, &account.user_id, premium.id, 60).await?;

        assert_eq!(calculate_subscription_credits(&db, basic.id).await?, 100);
        assert_eq!(calculate_subscription_credits(&db, premium.id).await?, 500);
        assert_eq!(
            calculate_all_account_subscription_credits(&db, &account.user_id).await?,
            100
        );
        assert_eq!(
            calculate_all_account_subscription_credits_by_token(&db, &account.token).await?,
            100
        );

        let result = calculate_subscription_credits(&db, 999).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::SubscriptionNotFound { id: 999 }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_sum_by_token_while_committing() -> Result<()> {
        let (_dir, db) = setup_file_db(8).await?;
        let account = create_test_account(&db, "user123", 0).await?;
        let plan = create_test_subscription(&db, "Basic", 100).await?;
        create_test_enrollment(&db, &account.user_id, plan.id, 10_000).await?;

        let writer = async {
            for _ in 0..50 {
                let reservation = reservations::reserve_credits(
                    &db,
                    &account.user_id,
                    5,
                    CreditsType::Subscription,
                    Some(plan.id),
                )
                .await?;
                reservations::commit_reservation(&db, reservation.id).await?;
            }
            Ok::<_, Error>(())
        };
        let reader = async {
            let mut samples = Vec::new();
            for _ in 0..80 {
                samples.push(
                    calculate_all_account_subscription_credits_by_token(&db, &account.token)
                        .await?,
                );
                tokio::task::yield_now().await;
            }
            Ok::<_, Error>(samples)
        };

        let (written, read) = tokio::join!(writer, reader);
        written?;
        let samples = read?;

        for pair in samples.windows(2) {
            assert!(pair[1] <= pair[0], "pool rose: {} -> {}", pair[0], pair[1]);
        }
        assert_eq!(
            calculate_all_account_subscription_credits_by_token(&db, &account.token).await?,
            10_000 - 50 * 5
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_sum_by_token_inside_caller_transaction() -> Result<()> {
        let (db, account, plan) = setup_with_enrollment(100, 40).await?;

        let txn = db.begin().await?;
        update_account_subscription(
            &txn,
            &account.user_id,
            plan.id,
            AccountSubscriptionUpdate {
                credits: Some(75),
                next_renewal: None,
            },
        )
        .await?;
        assert_eq!(
            calculate_all_account_subscription_credits_by_token(&txn, &account.token).await?,
            75
        );
        drop(txn);

        assert_eq!(
            calculate_all_account_subscription_credits_by_token(&db, &account.token).await?,
            40
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_sum_without_enrollments() -> Result<()> {
        let (db, account) = setup_with_account(100).await?;

        let result = calculate_all_account_subscription_credits(&db, &account.user_id).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::NoAccountSubscriptions { .. }
        ));

        let result = calculate_all_account_subscription_credits_by_token(&db, "unknown").await;
        assert!(matches!(result.unwrap_err(), Error::AccountTokenNotFound));

        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_account_removes_enrollments() -> Result<()> {
        let (db, account, plan) = setup_with_enrollment(100, 50).await?;

        accounts::delete_account(&db, &account.user_id).await?;

        assert!(
            get_account_subscription_by_id(&db, &account.user_id, plan.id)
                .await?
                .is_none()
        );
        assert!(get_subscription_by_id(&db, plan.id).await?.is_some());

        Ok(())
    }
}
