//! Usage metering service
//!
//! Counts user-originated chat messages per (subscription, day). Counting is
//! best-effort from the caller's point of view: owners without an active
//! subscription are silently skipped.

use async_trait::async_trait;
use chatdesk_shared::UsageRecord;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Records one billable message for the owner of an agent
#[async_trait]
pub trait MessageMeter: Send + Sync {
    async fn record_user_message(&self, owner_id: Uuid) -> BillingResult<()>;
}

/// Usage metering service
#[derive(Clone)]
pub struct UsageMeter {
    pool: PgPool,
}

impl UsageMeter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active subscription for an owner, if any
    pub async fn active_subscription_for_owner(&self, owner_id: Uuid) -> BillingResult<Option<Uuid>> {
        let subscription_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM subscriptions WHERE user_id = $1 AND status = 'ACTIVE'",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription_id)
    }

    /// Increment the day's counter, creating the record on first use.
    ///
    /// Concurrent increments for the same (subscription, day) are serialized
    /// by the upsert, so none are lost. Returns the new count.
    pub async fn record_message(&self, subscription_id: Uuid, date: Date) -> BillingResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_records (subscription_id, date, messages_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (subscription_id, date) DO UPDATE SET
              messages_count = usage_records.messages_count + 1
            RETURNING messages_count
            "#,
        )
        .bind(subscription_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Usage record for one day, zero-filled when nothing was counted yet
    pub async fn usage_for_day(&self, subscription_id: Uuid, date: Date) -> BillingResult<UsageRecord> {
        let record = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT subscription_id, date, messages_count
            FROM usage_records
            WHERE subscription_id = $1 AND date = $2
            "#,
        )
        .bind(subscription_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.unwrap_or(UsageRecord {
            subscription_id,
            date,
            messages_count: 0,
        }))
    }

    /// Today's usage for an owner's active subscription
    pub async fn usage_today_for_owner(&self, owner_id: Uuid) -> BillingResult<UsageRecord> {
        let subscription_id = self
            .active_subscription_for_owner(owner_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(owner_id.to_string()))?;

        self.usage_for_day(subscription_id, today()).await
    }
}

#[async_trait]
impl MessageMeter for UsageMeter {
    async fn record_user_message(&self, owner_id: Uuid) -> BillingResult<()> {
        let Some(subscription_id) = self.active_subscription_for_owner(owner_id).await? else {
            tracing::debug!(owner_id = %owner_id, "No active subscription, message not metered");
            return Ok(());
        };

        let count = self.record_message(subscription_id, today()).await?;

        tracing::debug!(
            subscription_id = %subscription_id,
            messages_today = count,
            "Recorded chat message usage"
        );
        Ok(())
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}
