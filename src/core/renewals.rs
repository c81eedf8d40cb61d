//! Renewal business logic
//!
//! Resets enrollment pools to their plan's allotment and moves `next_renewal` forward.
//! Renewals only happen when called; [`process_due_renewals`] is meant to be driven by an
//! external scheduler passing the current time.

use crate::{
    entities::{AccountSubscription, Subscription, account_subscription, subscription},
    errors::{Error, Result},
};
use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::collections::HashMap;
use tracing::{info, instrument};

/// Outcome of renewing a single enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRenewal {
    /// Enrolled account
    pub user_id: String,
    /// Plan the enrollment belongs to
    pub subscription_id: i32,
    /// Pool balance before the reset
    pub old_credits: i64,
    /// Pool balance after the reset, the plan allotment
    pub new_credits: i64,
    /// Renewal time after advancing
    pub next_renewal: DateTime<Utc>,
}

/// Represents the result of one [`process_due_renewals`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalSummary {
    /// Every enrollment that was renewed
    pub renewed: Vec<EnrollmentRenewal>,
    /// The reference time enrollments were compared against
    pub processed_at: DateTime<Utc>,
}

impl RenewalSummary {
    /// Number of enrollments renewed.
    #[must_use]
    pub fn renewed_count(&self) -> usize {
        self.renewed.len()
    }
}

/// Renews every enrollment of a plan: each pool is reset to the plan's allotment and its
/// `next_renewal` is pushed forward by `renewal_period_days`.
///
/// All enrollments are updated in one transaction.
///
/// # Errors
/// Returns an error if:
/// - `renewal_period_days` is zero or negative
/// - The plan does not exist
/// - The database update fails
#[instrument(skip(db))]
pub async fn renew_subscription<C>(
    db: &C,
    subscription_id: i32,
    renewal_period_days: i64,
) -> Result<subscription::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let period = renewal_period(renewal_period_days)?;

    let txn = db.begin().await?;
    let plan = Subscription::find_by_id(subscription_id)
        .one(&txn)
        .await?
        .ok_or(Error::SubscriptionNotFound {
            id: subscription_id,
        })?;

    let enrollments = AccountSubscription::find()
        .filter(account_subscription::Column::SubscriptionId.eq(subscription_id))
        .all(&txn)
        .await?;

    let count = enrollments.len();
    for enrollment in enrollments {
        let next_renewal = advance(enrollment.next_renewal, period, renewal_period_days)?;
        reset_enrollment(&txn, enrollment, plan.credits, next_renewal).await?;
    }

    txn.commit().await?;
    info!(enrollments = count, allotment = plan.credits, "Subscription renewed");
    Ok(plan)
}

/// Renews a single enrollment against its plan's allotment.
///
/// # Errors
/// Returns an error if:
/// - `renewal_period_days` is zero or negative
/// - The account is not enrolled in the plan
/// - The database update fails
#[instrument(skip(db))]
pub async fn renew_account_subscription<C>(
    db: &C,
    user_id: &str,
    subscription_id: i32,
    renewal_period_days: i64,
) -> Result<account_subscription::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let period = renewal_period(renewal_period_days)?;

    let txn = db.begin().await?;
    let enrollment =
        crate::core::subscriptions::require_enrollment(&txn, user_id, subscription_id).await?;
    let plan = Subscription::find_by_id(subscription_id)
        .one(&txn)
        .await?
        .ok_or(Error::SubscriptionNotFound {
            id: subscription_id,
        })?;

    let next_renewal = advance(enrollment.next_renewal, period, renewal_period_days)?;
    let renewed = reset_enrollment(&txn, enrollment, plan.credits, next_renewal).await?;

    txn.commit().await?;
    info!(credits = renewed.credits, "Enrollment renewed");
    Ok(renewed)
}

/// Renews every enrollment whose `next_renewal` is at or before `now`.
///
/// Each due enrollment is reset to its plan's allotment once, and its `next_renewal` is
/// advanced by whole multiples of the plan's `duration` until it lies after `now`, so an
/// enrollment that missed several periods is not renewed several times. Either every due
/// enrollment is renewed or none is.
///
/// # Errors
/// Returns an error if a plan has a non-positive duration or the database update fails.
#[instrument(skip(db))]
pub async fn process_due_renewals<C>(db: &C, now: DateTime<Utc>) -> Result<RenewalSummary>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let plans: HashMap<i32, subscription::Model> = Subscription::find()
        .all(&txn)
        .await?
        .into_iter()
        .map(|plan| (plan.id, plan))
        .collect();

    let due = AccountSubscription::find()
        .filter(account_subscription::Column::NextRenewal.lte(now))
        .order_by_asc(account_subscription::Column::NextRenewal)
        .all(&txn)
        .await?;

    let mut renewed = Vec::with_capacity(due.len());
    for enrollment in due {
        let plan = plans
            .get(&enrollment.subscription_id)
            .ok_or(Error::SubscriptionNotFound {
                id: enrollment.subscription_id,
            })?;
        let days = i64::from(plan.duration);
        let period = renewal_period(days)?;

        let next_renewal = advance_past(enrollment.next_renewal, now, period, days)?;
        let old_credits = enrollment.credits;
        let updated = reset_enrollment(&txn, enrollment, plan.credits, next_renewal).await?;

        renewed.push(EnrollmentRenewal {
            user_id: updated.user_id,
            subscription_id: updated.subscription_id,
            old_credits,
            new_credits: updated.credits,
            next_renewal: updated.next_renewal,
        });
    }

    txn.commit().await?;

    let summary = RenewalSummary {
        renewed,
        processed_at: now,
    };
    info!(renewed = summary.renewed_count(), "Due renewals processed");
    Ok(summary)
}

fn renewal_period(days: i64) -> Result<TimeDelta> {
    if days <= 0 {
        return Err(Error::InvalidRenewalPeriod { days });
    }
    TimeDelta::try_days(days).ok_or(Error::InvalidRenewalPeriod { days })
}

fn advance(from: DateTime<Utc>, period: TimeDelta, days: i64) -> Result<DateTime<Utc>> {
    from.checked_add_signed(period)
        .ok_or(Error::InvalidRenewalPeriod { days })
}

// Smallest `from + k * period` (k >= 1) strictly after `now`.
fn advance_past(
    from: DateTime<Utc>,
    now: DateTime<Utc>,
    period: TimeDelta,
    days: i64,
) -> Result<DateTime<Utc>> {
    let elapsed = (now - from).num_seconds().max(0);
    let missed = elapsed / period.num_seconds();
    let periods = i32::try_from(missed + 1).map_err(|_| Error::InvalidRenewalPeriod { days })?;

    period
        .checked_mul(periods)
        .and_then(|delta| from.checked_add_signed(delta))
        .ok_or(Error::InvalidRenewalPeriod { days })
}

async fn reset_enrollment<C>(
    db: &C,
    enrollment: account_subscription::Model,
    allotment: i64,
    next_renewal: DateTime<Utc>,
) -> Result<account_subscription::Model>
where
    C: ConnectionTrait,
{
    let mut active: account_subscription::ActiveModel = enrollment.into();
    active.credits = Set(allotment);
    active.next_renewal = Set(next_renewal);
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(Into::into)
}
