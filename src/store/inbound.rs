use chrono::DateTime;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::domain::Attachment;
use crate::domain::InboundNotification;
use crate::domain::InboundStatus;
use crate::store::is_unique_violation;
use crate::store::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboundEmailRow {
    pub id: Uuid,
    pub message_id: String,
    pub object_key: Option<String>,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Json<Vec<Attachment>>,
    pub raw_data: Json<InboundNotification>,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Reduced projection for `listOnly` queries: identity and subject columns,
/// no bodies, no attachments.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboundEmailSummary {
    pub id: Uuid,
    pub message_id: String,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub status: String,
    pub received_at: DateTime<Utc>,
}

pub struct NewInboundEmail {
    pub message_id: String,
    pub object_key: Option<String>,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub raw_data: InboundNotification,
    pub status: InboundStatus,
    pub error: Option<String>,
}

/// Insert result. The unique constraint on `message_id` is the authority on
/// novelty; a duplicate is a normal outcome, not an error.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Uuid),
    DuplicateMessageId,
}

#[derive(Debug, Default)]
pub struct InboundListQuery {
    pub to_filter: Option<String>,
    pub exclude_to: Vec<String>,
    pub status: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

const ALL_COLUMNS: &str = "id, message_id, object_key, from_address, to_address, subject, \
                           body_text, body_html, attachments, raw_data, status, received_at, \
                           processed_at, error";

impl Store {
    #[tracing::instrument(skip_all, fields(message_id = %email.message_id))]
    pub async fn insert_inbound_email(
        &self,
        email: &NewInboundEmail,
    ) -> Result<InsertOutcome, sqlx::Error> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO inbound_emails
                (id, message_id, object_key, from_address, to_address, subject,
                 body_text, body_html, attachments, raw_data, status, error, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
            "#,
        )
        .bind(id)
        .bind(&email.message_id)
        .bind(&email.object_key)
        .bind(&email.from_address)
        .bind(&email.to_address)
        .bind(&email.subject)
        .bind(&email.body_text)
        .bind(&email.body_html)
        .bind(Json(&email.attachments))
        .bind(Json(&email.raw_data))
        .bind(email.status.as_str())
        .bind(&email.error)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(id)),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::DuplicateMessageId),
            Err(e) => Err(e),
        }
    }

    pub async fn find_inbound_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<InboundEmailRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {ALL_COLUMNS} FROM inbound_emails WHERE message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_inbound_by_object_key(
        &self,
        object_key: &str,
    ) -> Result<Option<InboundEmailRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {ALL_COLUMNS} FROM inbound_emails WHERE object_key = $1"
        ))
        .bind(object_key)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_inbound(
        &self,
        id: Uuid,
    ) -> Result<Option<InboundEmailRow>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {ALL_COLUMNS} FROM inbound_emails WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// `processed` stamps `processed_at`; `failed` stamps `error`. The row is
    /// never deleted here.
    pub async fn update_inbound_status(
        &self,
        id: Uuid,
        status: InboundStatus,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE inbound_emails
            SET status = $2,
                processed_at = CASE WHEN $2 = 'processed' THEN now() ELSE processed_at END,
                error = COALESCE($3, error)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh the parsed projection of an existing row (reparse and the
    /// object-created refresh path). `raw_data` and identity columns stay.
    pub async fn update_inbound_parsed(
        &self,
        id: Uuid,
        subject: &str,
        body_text: &str,
        body_html: Option<&str>,
        attachments: &[Attachment],
        object_key: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE inbound_emails
            SET subject = $2,
                body_text = $3,
                body_html = $4,
                attachments = $5,
                object_key = COALESCE(object_key, $6)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(subject)
        .bind(body_text)
        .bind(body_html)
        .bind(Json(attachments))
        .bind(object_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_inbound(
        &self,
        query: &InboundListQuery,
    ) -> Result<Vec<InboundEmailRow>, sqlx::Error> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {ALL_COLUMNS} FROM inbound_emails WHERE 1=1"));
        push_filters(&mut builder, query);
        builder.build_query_as().fetch_all(&self.pool).await
    }

    pub async fn list_inbound_summaries(
        &self,
        query: &InboundListQuery,
    ) -> Result<Vec<InboundEmailSummary>, sqlx::Error> {
        let mut builder = QueryBuilder::new(
            "SELECT id, message_id, from_address, to_address, subject, status, received_at \
             FROM inbound_emails WHERE 1=1",
        );
        push_filters(&mut builder, query);
        builder.build_query_as().fetch_all(&self.pool).await
    }

    /// Processed emails that have no `delivered` row yet for the given
    /// subscription; drives redelivery and the undelivered admin view.
    pub async fn list_not_confirmed_for_subscription(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT ie.id
            FROM inbound_emails ie
            WHERE ie.status = 'processed'
              AND NOT EXISTS (
                SELECT 1 FROM webhook_deliveries wd
                WHERE wd.inbound_email_id = ie.id
                  AND wd.subscription_id = $1
                  AND wd.status = 'delivered'
              )
            ORDER BY ie.received_at DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Object keys already represented in `inbound_emails`; the catch-up diff
    /// subtracts these from the store listing.
    pub async fn processed_object_keys(
        &self,
    ) -> Result<std::collections::HashSet<String>, sqlx::Error> {
        let keys: Vec<(String,)> =
            sqlx::query_as("SELECT object_key FROM inbound_emails WHERE object_key IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(keys.into_iter().map(|(k,)| k).collect())
    }
}

fn push_filters(
    builder: &mut QueryBuilder<'_, sqlx::Postgres>,
    query: &InboundListQuery,
) {
    if let Some(to) = &query.to_filter {
        builder.push(" AND to_address = ").push_bind(to.clone());
    }
    for excluded in &query.exclude_to {
        builder.push(" AND to_address <> ").push_bind(excluded.clone());
    }
    if let Some(status) = &query.status {
        builder.push(" AND status = ").push_bind(status.clone());
    }
    builder
        .push(" ORDER BY received_at DESC LIMIT ")
        .push_bind(query.limit.clamp(1, 500))
        .push(" OFFSET ")
        .push_bind(query.offset.max(0));
}
