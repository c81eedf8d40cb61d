//! Account store - Durable CRUD for billable accounts.
//!
//! Every function takes any SeaORM connection, so it can run on its own or inside a
//! transaction the caller already opened. Writes open their own scope on top of the
//! caller's (a savepoint when nested), so a failure never leaves half a write behind.

use crate::{
    entities::{Account, account},
    errors::{Error, Result, map_unique_violation},
    models::{AccountUpdate, NewAccount},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Provisions a new account.
///
/// # Errors
/// Returns an error if:
/// - The opening balance is negative
/// - Another account already uses the `user_id` or the `token`
/// - The database insert fails
#[instrument(skip(db, data), fields(user_id = %data.user_id))]
pub async fn create_account<C>(db: &C, data: NewAccount) -> Result<account::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    if data.credits < 0 {
        return Err(Error::InvalidAmount {
            amount: data.credits,
        });
    }

    let txn = db.begin().await?;

    if Account::find_by_id(data.user_id.clone()).one(&txn).await?.is_some() {
        return Err(Error::DuplicateAccount {
            user_id: data.user_id,
        });
    }
    if find_by_token(&txn, &data.token).await?.is_some() {
        return Err(Error::DuplicateToken);
    }

    let now = Utc::now();
    let user_id = data.user_id.clone();
    let created = account::ActiveModel {
        user_id: Set(data.user_id),
        token: Set(data.token),
        credits: Set(data.credits),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await
    .map_err(|e| map_unique_violation(e, || Error::DuplicateAccount { user_id }))?;

    txn.commit().await?;
    info!(credits = created.credits, "Account created");
    Ok(created)
}

/// Finds the account that owns `token`. An unknown token is `Ok(None)`, not an error.
pub async fn get_account_by_token<C>(db: &C, token: &str) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    find_by_token(db, token).await.map_err(Into::into)
}

/// Finds an account by its primary key.
pub async fn get_account_by_user_id<C>(db: &C, user_id: &str) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find_by_id(user_id.to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

/// Returns the raw personal balance behind `token`, ignoring held reservations.
pub async fn get_credits_by_token<C>(db: &C, token: &str) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    Ok(find_by_token(db, token).await?.map(|account| account.credits))
}

/// Applies the fields present in `changes` to an existing account.
///
/// # Errors
/// Returns an error if:
/// - No account has this `user_id`
/// - The new token already belongs to a different account
/// - The database update fails
#[instrument(skip(db, changes))]
pub async fn update_account<C>(
    db: &C,
    user_id: &str,
    changes: AccountUpdate,
) -> Result<account::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let existing = Account::find_by_id(user_id.to_string())
        .one(&txn)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            user_id: user_id.to_string(),
        })?;

    if let Some(token) = &changes.token {
        if let Some(owner) = find_by_token(&txn, token).await? {
            if owner.user_id != existing.user_id {
                return Err(Error::DuplicateToken);
            }
        }
    }

    let mut active: account::ActiveModel = existing.into();
    if let Some(token) = changes.token {
        active.token = Set(token);
    }
    if let Some(credits) = changes.credits {
        active.credits = Set(credits);
    }
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&txn)
        .await
        .map_err(|e| map_unique_violation(e, || Error::DuplicateToken))?;

    txn.commit().await?;
    info!(credits = updated.credits, "Account updated");
    Ok(updated)
}

/// Removes an account together with its reservations and enrollments.
///
/// Deleting an account that does not exist is a no-op.
#[instrument(skip(db))]
pub async fn delete_account<C>(db: &C, user_id: &str) -> Result<()>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let result = Account::delete_by_id(user_id.to_string())
        .exec(&txn)
        .await?;
    txn.commit().await?;

    if result.rows_affected > 0 {
        info!("Account deleted");
    }
    Ok(())
}

/// Resolves a token to its account or fails with [`Error::AccountTokenNotFound`].
pub(crate) async fn require_account_by_token<C>(db: &C, token: &str) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    find_by_token(db, token)
        .await?
        .ok_or(Error::AccountTokenNotFound)
}

async fn find_by_token<C>(db: &C, token: &str) -> std::result::Result<Option<account::Model>, DbErr>
where
    C: ConnectionTrait,
{
    Account::find()
        .filter(account::Column::Token.eq(token))
        .one(db)
        .await
}
