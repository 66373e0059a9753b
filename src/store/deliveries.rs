use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::DeliveryStatus;
use crate::store::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub inbound_email_id: Uuid,
    pub subscription_id: Uuid,
    pub status: String,
    pub http_status: Option<i32>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub ticket_id: Option<String>,
    pub comment_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A `sent` delivery joined with its subscription, for the undelivered admin
/// view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UndeliveredRow {
    pub id: Uuid,
    pub inbound_email_id: Uuid,
    pub subscription_id: Uuid,
    pub service_name: String,
    pub http_status: Option<i32>,
    pub created_at: DateTime<Utc>,
}

const ALL_COLUMNS: &str = "id, inbound_email_id, subscription_id, status, http_status, \
                           delivered_at, ticket_id, comment_id, error, created_at";

impl Store {
    /// Bookkeeping row for a first hop that returned 2xx. Rows are never
    /// created for failed attempts.
    pub async fn insert_delivery(
        &self,
        inbound_email_id: Uuid,
        subscription_id: Uuid,
        http_status: i32,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (id, inbound_email_id, subscription_id, status, http_status, created_at)
            VALUES ($1, $2, $3, 'sent', $4, now())
            "#,
        )
        .bind(id)
        .bind(inbound_email_id)
        .bind(subscription_id)
        .bind(http_status)
        .execute(self.pool())
        .await?;
        Ok(id)
    }

    pub async fn find_latest_delivery(
        &self,
        inbound_email_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<DeliveryRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            r#"
            SELECT {ALL_COLUMNS} FROM webhook_deliveries
            WHERE inbound_email_id = $1 AND subscription_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(inbound_email_id)
        .bind(subscription_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Confirmation callback: `sent -> delivered` or `sent -> failed`.
    /// `delivered_at` is stamped on the former.
    pub async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        ticket_id: Option<&str>,
        comment_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = $2,
                delivered_at = CASE WHEN $2 = 'delivered' THEN now() ELSE delivered_at END,
                ticket_id = COALESCE($3, ticket_id),
                comment_id = COALESCE($4, comment_id),
                error = COALESCE($5, error)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(ticket_id)
        .bind(comment_id)
        .bind(error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Confirmation by inbound id alone (polling subscribers): every `sent`
    /// row for the message flips to `delivered`. Returns the number of rows
    /// touched; zero is a legitimate no-op.
    pub async fn confirm_all_sent_for_inbound(
        &self,
        inbound_email_id: Uuid,
        ticket_id: Option<&str>,
        comment_id: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivered',
                delivered_at = now(),
                ticket_id = COALESCE($2, ticket_id),
                comment_id = COALESCE($3, comment_id)
            WHERE inbound_email_id = $1 AND status = 'sent'
            "#,
        )
        .bind(inbound_email_id)
        .bind(ticket_id)
        .bind(comment_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Helpdesk-role deliveries still waiting for their end-to-end
    /// confirmation.
    pub async fn list_undelivered(
        &self,
        limit: i64,
    ) -> Result<Vec<UndeliveredRow>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT wd.id, wd.inbound_email_id, wd.subscription_id, ws.service_name,
                   wd.http_status, wd.created_at
            FROM webhook_deliveries wd
            JOIN webhook_subscriptions ws ON ws.id = wd.subscription_id
            WHERE wd.status = 'sent' AND ws.service_name ILIKE '%helpdesk%'
            ORDER BY wd.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 500))
        .fetch_all(self.pool())
        .await
    }
}
