use chrono::DateTime;
use chrono::Utc;
use sqlx::types::Json;
use uuid::Uuid;

use crate::domain::SubscriptionFilters;
use crate::store::Store;

/// 30 minutes; `delivery_timeout_ms` doubling never exceeds this.
pub const MAX_DELIVERY_TIMEOUT_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub service_name: String,
    pub webhook_url: String,
    pub secret: Option<String>,
    pub filters: Json<SubscriptionFilters>,
    pub status: String,
    pub max_retries: i32,
    pub delivery_timeout_ms: i64,
    pub total_deliveries: i64,
    pub total_failures: i64,
    pub retry_count: i32,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const ALL_COLUMNS: &str = "id, service_name, webhook_url, secret, filters, status, max_retries, \
                           delivery_timeout_ms, total_deliveries, total_failures, retry_count, \
                           last_delivery_at, last_error, last_error_at, created_at";

impl Store {
    pub async fn list_active_subscriptions(&self) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {ALL_COLUMNS} FROM webhook_subscriptions WHERE status = 'active'"
        ))
        .fetch_all(self.pool())
        .await
    }

    /// Suspended subscriptions whose last error is at least an hour old;
    /// candidates for the auto-resume probe.
    pub async fn list_suspended_ready_for_probe(
        &self,
    ) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            r#"
            SELECT {ALL_COLUMNS} FROM webhook_subscriptions
            WHERE status = 'suspended'
              AND (last_error_at IS NULL OR now() - last_error_at > interval '1 hour')
            "#
        ))
        .fetch_all(self.pool())
        .await
    }

    /// Upsert by id; the admin interface owns creation, the pipeline only
    /// needs this for wiring and tests.
    pub async fn save_subscription(
        &self,
        row: &SubscriptionRow,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions
                (id, service_name, webhook_url, secret, filters, status, max_retries,
                 delivery_timeout_ms, total_deliveries, total_failures, retry_count,
                 last_delivery_at, last_error, last_error_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                service_name = EXCLUDED.service_name,
                webhook_url = EXCLUDED.webhook_url,
                secret = EXCLUDED.secret,
                filters = EXCLUDED.filters,
                status = EXCLUDED.status,
                max_retries = EXCLUDED.max_retries,
                delivery_timeout_ms = EXCLUDED.delivery_timeout_ms
            "#,
        )
        .bind(row.id)
        .bind(&row.service_name)
        .bind(&row.webhook_url)
        .bind(&row.secret)
        .bind(&row.filters)
        .bind(&row.status)
        .bind(row.max_retries)
        .bind(row.delivery_timeout_ms)
        .bind(row.total_deliveries)
        .bind(row.total_failures)
        .bind(row.retry_count)
        .bind(row.last_delivery_at)
        .bind(&row.last_error)
        .bind(row.last_error_at)
        .bind(row.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// A 2xx wipes the failure state; counters are database-side increments
    /// so concurrent fan-out attempts stay monotonic.
    pub async fn record_delivery_success(
        &self,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET total_deliveries = total_deliveries + 1,
                last_delivery_at = now(),
                retry_count = 0,
                last_error = NULL,
                last_error_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// `raise_max_retries` is the SSL-error escalation: certificate problems
    /// push `max_retries` to at least 10.
    pub async fn record_delivery_failure(
        &self,
        id: Uuid,
        error: &str,
        raise_max_retries: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET total_failures = total_failures + 1,
                retry_count = retry_count + 1,
                last_error = $2,
                last_error_at = now(),
                max_retries = CASE WHEN $3 THEN GREATEST(max_retries, 10) ELSE max_retries END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(raise_max_retries)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Double the adaptive timeout, capped at 30 minutes; returns the widened
    /// value.
    pub async fn widen_delivery_timeout(
        &self,
        id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let (timeout,): (i64,) = sqlx::query_as(
            r#"
            UPDATE webhook_subscriptions
            SET delivery_timeout_ms = LEAST(delivery_timeout_ms * 2, $2)
            WHERE id = $1
            RETURNING delivery_timeout_ms
            "#,
        )
        .bind(id)
        .bind(MAX_DELIVERY_TIMEOUT_MS)
        .fetch_one(self.pool())
        .await?;
        Ok(timeout)
    }

    /// Auto-resume: a successful synthetic probe flips the subscription back
    /// to active and clears the retry state.
    pub async fn resume_subscription(
        &self,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET status = 'active',
                retry_count = 0,
                last_error = NULL,
                last_error_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<SubscriptionRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {ALL_COLUMNS} FROM webhook_subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }
}
