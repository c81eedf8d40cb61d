//! Reservation engine - Holds credits before a metered operation and settles them after.
//!
//! A reservation is HELD from the moment it is inserted until exactly one of two things
//! happens: [`commit_reservation`] removes it and deducts its credits from the pool named by
//! its `credits_type`, or [`cancel_reservation`] removes it with no balance effect.
//! Balances are only mutated at commit time, so the spendable amount of an account is
//! always derived as `credits - sum(held reservations)` rather than stored.
//!
//! Termination claims the reservation row with a delete whose affected-row count must be
//! one, and deductions are single `credits = credits - n` statements. Two callers racing
//! to settle the same reservation therefore produce one deduction and one `NotFound`.

use crate::{
    entities::{
        Account, AccountSubscription, CreditsType, Reservation, account, account_subscription,
        reservation,
    },
    errors::{Error, Result, map_foreign_key_violation},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Places a hold of `credits` on an account without checking that the pool can cover it.
///
/// `subscription_id` must name the enrollment pool for `subscription` reservations and
/// must be `None` for `personal` ones.
///
/// # Arguments
/// * `db` - Database connection or an open transaction
/// * `user_id` - Account the hold is placed on
/// * `credits` - Amount to hold, strictly positive
/// * `credits_type` - Pool the amount will be deducted from on commit
/// * `subscription_id` - Enrollment pool for subscription holds
///
/// # Errors
/// Returns an error if:
/// - `credits` is zero or negative
/// - `credits_type` is `enterprise`, or the subscription target does not match the type
/// - The account or the targeted enrollment does not exist
/// - The database insert fails
#[instrument(skip(db))]
pub async fn reserve_credits<C>(
    db: &C,
    user_id: &str,
    credits: i64,
    credits_type: CreditsType,
    subscription_id: Option<i32>,
) -> Result<reservation::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    validate_request(credits, credits_type, subscription_id)?;

    let txn = db.begin().await?;
    ensure_target_exists(&txn, user_id, subscription_id).await?;
    let reservation =
        insert_reservation(&txn, user_id, credits, credits_type, subscription_id).await?;
    txn.commit().await?;

    info!(reservation_id = reservation.id, "Credits reserved");
    Ok(reservation)
}

/// Places a hold only if the targeted pool still covers it after existing holds.
///
/// For `personal` holds the covering amount is the account's available credits. For
/// `subscription` holds it is the enrollment's pool minus the holds already placed on it.
///
/// # Errors
/// Same as [`reserve_credits`], plus [`Error::InsufficientCredits`] when the pool is short.
#[instrument(skip(db))]
pub async fn reserve_credits_checked<C>(
    db: &C,
    user_id: &str,
    credits: i64,
    credits_type: CreditsType,
    subscription_id: Option<i32>,
) -> Result<reservation::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    validate_request(credits, credits_type, subscription_id)?;

    let txn = db.begin().await?;
    ensure_target_exists(&txn, user_id, subscription_id).await?;

    let available = match subscription_id {
        Some(subscription_id) => {
            available_subscription_credits(&txn, user_id, subscription_id).await?
        }
        None => available_credits_for_account(&txn, user_id).await?,
    };
    if available < credits {
        warn!(available, required = credits, "Reservation refused");
        return Err(Error::InsufficientCredits {
            available,
            required: credits,
        });
    }

    let reservation =
        insert_reservation(&txn, user_id, credits, credits_type, subscription_id).await?;
    txn.commit().await?;

    info!(reservation_id = reservation.id, "Credits reserved");
    Ok(reservation)
}

/// Converts a held reservation into a permanent deduction and removes it.
///
/// The reservation row, the owning account and the targeted pool are read and written in
/// one transaction. Returns the reservation as it was before removal.
///
/// # Errors
/// Returns an error if:
/// - The reservation does not exist (never created, or already committed or cancelled)
/// - Its account or its enrollment has disappeared
/// - Its `credits_type` has no backing pool
/// - The database update fails
#[instrument(skip(db))]
pub async fn commit_reservation<C>(db: &C, reservation_id: i64) -> Result<reservation::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let reservation = find_reservation(&txn, reservation_id).await?;
    let account = Account::find_by_id(reservation.user_id.clone())
        .one(&txn)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            user_id: reservation.user_id.clone(),
        })?;

    claim_reservation(&txn, reservation_id).await?;

    match reservation.credits_type {
        CreditsType::Personal => {
            debit_account(&txn, &account.user_id, reservation.credits).await?;
        }
        CreditsType::Subscription => {
            let subscription_id =
                reservation
                    .subscription_id
                    .ok_or_else(|| Error::InvalidReservationTarget {
                        message: "subscription reservation has no subscription_id".to_string(),
                    })?;
            debit_account_subscription(
                &txn,
                &account.user_id,
                subscription_id,
                reservation.credits,
            )
            .await?;
        }
        CreditsType::Enterprise => {
            return Err(Error::UnsupportedCreditsType {
                credits_type: CreditsType::Enterprise,
            });
        }
    }

    txn.commit().await?;
    info!(
        user_id = %reservation.user_id,
        credits = reservation.credits,
        credits_type = %reservation.credits_type,
        "Reservation committed"
    );
    Ok(reservation)
}

/// Deducts the credits held by a reservation. Same operation as [`commit_reservation`].
pub async fn deduct_credits_by_reservation<C>(
    db: &C,
    reservation_id: i64,
) -> Result<reservation::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    commit_reservation(db, reservation_id).await
}

/// Releases a held reservation without touching any balance.
///
/// # Errors
/// Returns [`Error::ReservationNotFound`] if the reservation was never created or has
/// already been committed or cancelled.
#[instrument(skip(db))]
pub async fn cancel_reservation<C>(db: &C, reservation_id: i64) -> Result<reservation::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let reservation = find_reservation(&txn, reservation_id).await?;
    claim_reservation(&txn, reservation_id).await?;
    txn.commit().await?;

    info!(credits = reservation.credits, "Reservation cancelled");
    Ok(reservation)
}

/// Retrieves a held reservation by ID, or `None` if it is not held.
pub async fn get_reservation_by_id<C>(
    db: &C,
    reservation_id: i64,
) -> Result<Option<reservation::Model>>
where
    C: ConnectionTrait,
{
    Reservation::find_by_id(reservation_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists every reservation currently held for an account, oldest first.
pub async fn list_reservations_for_account<C>(
    db: &C,
    user_id: &str,
) -> Result<Vec<reservation::Model>>
where
    C: ConnectionTrait,
{
    Reservation::find()
        .filter(reservation::Column::UserId.eq(user_id))
        .order_by_asc(reservation::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sum of every held reservation on an account, whatever its type.
pub async fn held_credits<C>(db: &C, user_id: &str) -> Result<i64>
where
    C: ConnectionTrait,
{
    let reservations = list_reservations_for_account(db, user_id).await?;
    Ok(reservations.iter().map(|r| r.credits).sum())
}

/// Spendable personal credits of the account owning `token`:
/// `account.credits - sum(held reservations)`.
///
/// The balance and the held reservations are read in one transaction, so a commit landing
/// between the two reads cannot be counted twice.
///
/// # Errors
/// Returns [`Error::AccountTokenNotFound`] if no account has this token.
pub async fn calculate_available_credits<C>(db: &C, token: &str) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let account = crate::core::accounts::require_account_by_token(&txn, token).await?;
    let held = held_credits(&txn, &account.user_id).await?;
    txn.commit().await?;

    debug!(credits = account.credits, held, "Computed available credits");
    Ok(account.credits - held)
}

/// Same as [`calculate_available_credits`], keyed by `user_id`.
pub async fn available_credits_for_account<C>(db: &C, user_id: &str) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let account = Account::find_by_id(user_id.to_string())
        .one(&txn)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            user_id: user_id.to_string(),
        })?;
    let held = held_credits(&txn, user_id).await?;
    txn.commit().await?;

    Ok(account.credits - held)
}

/// Enrollment pool minus the subscription holds placed on that enrollment.
pub async fn available_subscription_credits<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let enrollment = AccountSubscription::find_by_id((user_id.to_string(), subscription_id))
        .one(&txn)
        .await?
        .ok_or_else(|| Error::AccountSubscriptionNotFound {
            user_id: user_id.to_string(),
            subscription_id,
        })?;

    let held: i64 = Reservation::find()
        .filter(reservation::Column::UserId.eq(user_id))
        .filter(reservation::Column::CreditsType.eq(CreditsType::Subscription))
        .filter(reservation::Column::SubscriptionId.eq(subscription_id))
        .all(&txn)
        .await?
        .iter()
        .map(|r| r.credits)
        .sum();
    txn.commit().await?;

    Ok(enrollment.credits - held)
}

fn validate_request(
    credits: i64,
    credits_type: CreditsType,
    subscription_id: Option<i32>,
) -> Result<()> {
    if credits <= 0 {
        return Err(Error::InvalidAmount { amount: credits });
    }

    match (credits_type, subscription_id) {
        (CreditsType::Enterprise, _) => Err(Error::UnsupportedCreditsType { credits_type }),
        (CreditsType::Personal, Some(_)) => Err(Error::InvalidReservationTarget {
            message: "personal reservations cannot name a subscription".to_string(),
        }),
        (CreditsType::Subscription, None) => Err(Error::InvalidReservationTarget {
            message: "subscription reservations must name a subscription".to_string(),
        }),
        _ => Ok(()),
    }
}

async fn ensure_target_exists<C>(db: &C, user_id: &str, subscription_id: Option<i32>) -> Result<()>
where
    C: ConnectionTrait,
{
    if Account::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .is_none()
    {
        return Err(Error::AccountNotFound {
            user_id: user_id.to_string(),
        });
    }

    if let Some(subscription_id) = subscription_id {
        AccountSubscription::find_by_id((user_id.to_string(), subscription_id))
            .one(db)
            .await?
            .ok_or_else(|| Error::AccountSubscriptionNotFound {
                user_id: user_id.to_string(),
                subscription_id,
            })?;
    }

    Ok(())
}

async fn insert_reservation<C>(
    db: &C,
    user_id: &str,
    credits: i64,
    credits_type: CreditsType,
    subscription_id: Option<i32>,
) -> Result<reservation::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    reservation::ActiveModel {
        user_id: Set(user_id.to_string()),
        credits: Set(credits),
        credits_type: Set(credits_type),
        subscription_id: Set(subscription_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        map_foreign_key_violation(e, || Error::AccountNotFound {
            user_id: user_id.to_string(),
        })
    })
}

async fn find_reservation<C>(db: &C, reservation_id: i64) -> Result<reservation::Model>
where
    C: ConnectionTrait,
{
    Reservation::find_by_id(reservation_id)
        .one(db)
        .await?
        .ok_or(Error::ReservationNotFound { id: reservation_id })
}

// Removing the row is what terminates a reservation; whoever deletes it owns the outcome.
async fn claim_reservation<C>(db: &C, reservation_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Reservation::delete_by_id(reservation_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(Error::ReservationNotFound { id: reservation_id });
    }
    Ok(())
}

async fn debit_account<C>(db: &C, user_id: &str, credits: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Account::update_many()
        .col_expr(
            account::Column::Credits,
            Expr::col(account::Column::Credits).sub(credits),
        )
        .col_expr(account::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(account::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::AccountNotFound {
            user_id: user_id.to_string(),
        });
    }
    Ok(())
}

async fn debit_account_subscription<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
    credits: i64,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = AccountSubscription::update_many()
        .col_expr(
            account_subscription::Column::Credits,
            Expr::col(account_subscription::Column::Credits).sub(credits),
        )
        .col_expr(
            account_subscription::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(account_subscription::Column::UserId.eq(user_id))
        .filter(account_subscription::Column::SubscriptionId.eq(subscription_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::AccountSubscriptionNotFound {
            user_id: user_id.to_string(),
            subscription_id,
        });
    }
    Ok(())
}
