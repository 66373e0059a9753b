//! Ingestion coordinator: accepts raw MIME by push notification or object
//! reference, dedups by normalized message id and object key, parses,
//! persists, and hands off to fan-out. For every ingress race the unique
//! constraint in the store is the final authority.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

use crate::domain::normalize_message_id;
use crate::domain::strip_display_name;
use crate::domain::InboundNotification;
use crate::domain::InboundStatus;
use crate::domain::MailInfo;
use crate::domain::ObjectRecord;
use crate::domain::ReceiptAction;
use crate::domain::ReceiptInfo;
use crate::fanout::FanoutEngine;
use crate::mime;
use crate::mime::ParsedEmail;
use crate::object_store::ObjectStoreClient;
use crate::object_store::ObjectStoreError;
use crate::store::InsertOutcome;
use crate::store::NewInboundEmail;
use crate::store::Store;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum IngestError {
    #[error("malformed notification: {0}")]
    Malformed(String),
    #[error("inbound email {0} does not exist")]
    NotFound(Uuid),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error("persistence failure")]
    Persistence(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for IngestError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Every non-error way an ingress event can resolve. `Duplicate` is a normal
/// outcome: the upstream retries and the ingress paths race by design.
#[derive(Debug)]
pub enum IngestOutcome {
    Ingested { id: Uuid, attachments: usize },
    /// Already ingested; nothing was parsed, nothing was fanned out
    Duplicate { id: Uuid },
    /// Existing row re-parsed in place; no fan-out
    Refreshed { id: Uuid, attachments: usize },
    /// The message could not be parsed; the row is persisted as `failed`
    ParseFailed { id: Uuid, error: String },
}

impl IngestOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Ingested { id, .. }
            | Self::Duplicate { id }
            | Self::Refreshed { id, .. }
            | Self::ParseFailed { id, .. } => *id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Ingested { attachments, .. } => {
                format!("email ingested ({attachments} attachments)")
            }
            Self::Duplicate { .. } => "duplicate; already ingested".to_string(),
            Self::Refreshed { attachments, .. } => {
                format!("existing email refreshed ({attachments} attachments)")
            }
            Self::ParseFailed { error, .. } => format!("parse failed: {error}"),
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    store: Store,
    object_store: ObjectStoreClient,
    fanout: FanoutEngine,
}

impl Ingestor {
    pub fn new(
        store: Store,
        object_store: ObjectStoreClient,
        fanout: FanoutEngine,
    ) -> Self {
        Self {
            store,
            object_store,
            fanout,
        }
    }

    /// Push-notification ingress. Content may be inline (base64) or fetched
    /// by `(bucket, key)`; a missing key is reconstructed as
    /// `{prefix}{messageId}`.
    #[tracing::instrument(skip_all, fields(message_id = tracing::field::Empty))]
    pub async fn accept_push_notification(
        &self,
        notification: InboundNotification,
    ) -> Result<IngestOutcome, IngestError> {
        let message_id = notification
            .message_id()
            .map(normalize_message_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestError::Malformed("notification carries no messageId".into()))?;
        tracing::Span::current().record("message_id", tracing::field::display(&message_id));

        // dedup across parallel ingress paths: no parse, no fan-out, no
        // second webhook for a known message
        if let Some(existing) = self.store.find_inbound_by_message_id(&message_id).await? {
            tracing::info!("duplicate push notification ignored");
            return Ok(IngestOutcome::Duplicate { id: existing.id });
        }

        let (raw, object_key) = match &notification.content {
            Some(inline) => {
                let bytes = mime::transfer::decode_base64(inline.as_bytes())
                    .unwrap_or_else(|| inline.clone().into_bytes());
                (bytes, notification.object_key().map(str::to_string))
            }
            None => {
                let bucket = notification
                    .bucket_name()
                    .unwrap_or_else(|| self.object_store.default_bucket())
                    .to_string();
                let key = notification
                    .object_key()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.object_store.key_for_message_id(&message_id));
                let raw = self.object_store.fetch_object(&bucket, &key).await?;
                (raw, Some(key))
            }
        };
        self.ingest_new(message_id, object_key, notification, raw).await
    }

    /// Object-created ingress. A record matching an existing row (by object
    /// key, or by the message id read from the object itself) only refreshes
    /// the parsed projection; everything else is a fresh ingest with fan-out.
    #[tracing::instrument(skip_all, fields(records = records.len()))]
    pub async fn accept_object_created(
        &self,
        records: &[ObjectRecord],
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.ingest_object(record).await?);
        }
        Ok(outcomes)
    }

    #[tracing::instrument(skip_all, fields(bucket = %record.bucket, key = %record.key))]
    async fn ingest_object(
        &self,
        record: &ObjectRecord,
    ) -> Result<IngestOutcome, IngestError> {
        if let Some(existing) = self.store.find_inbound_by_object_key(&record.key).await? {
            return self.refresh_existing(existing.id, &existing.raw_data.0, record).await;
        }

        let raw = self.object_store.fetch_object(&record.bucket, &record.key).await?;
        let parsed = match mime::parse_message(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                // nothing to derive a message id from; key the failed row by
                // the object key itself
                let raw_data = object_notification(None, record, &raw);
                let email = NewInboundEmail {
                    message_id: record.key.clone(),
                    object_key: Some(record.key.clone()),
                    from_address: String::new(),
                    to_address: String::new(),
                    subject: String::new(),
                    body_text: String::new(),
                    body_html: None,
                    attachments: vec![],
                    raw_data,
                    status: InboundStatus::Failed,
                    error: Some(e.to_string()),
                };
                return match self.store.insert_inbound_email(&email).await? {
                    InsertOutcome::Inserted(id) => Ok(IngestOutcome::ParseFailed {
                        id,
                        error: e.to_string(),
                    }),
                    InsertOutcome::DuplicateMessageId => {
                        self.duplicate_by_message_id(&record.key).await
                    }
                };
            }
        };

        let message_id = parsed
            .message_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| record.key.clone());

        if let Some(existing) = self.store.find_inbound_by_message_id(&message_id).await? {
            // second ingress path for a known message: refresh, no fan-out
            let subject = preferred_subject(&parsed, &existing.raw_data.0);
            self.store
                .update_inbound_parsed(
                    existing.id,
                    &subject,
                    &parsed.body_text,
                    parsed.body_html.as_deref(),
                    &parsed.attachments,
                    Some(&record.key),
                )
                .await?;
            return Ok(IngestOutcome::Refreshed {
                id: existing.id,
                attachments: parsed.attachments.len(),
            });
        }

        let raw_data = object_notification(Some(&message_id), record, &raw);
        self.persist_and_fan_out(message_id, Some(record.key.clone()), raw_data, parsed)
            .await
    }

    /// Re-run the parser against the stored raw MIME and repair the parsed
    /// projection. Fan-out is deliberately not re-invoked.
    #[tracing::instrument(skip(self))]
    pub async fn reprocess_inbound(
        &self,
        id: Uuid,
    ) -> Result<IngestOutcome, IngestError> {
        let row = self
            .store
            .get_inbound(id)
            .await?
            .ok_or(IngestError::NotFound(id))?;
        let content = row
            .raw_data
            .0
            .content
            .as_deref()
            .ok_or_else(|| IngestError::Malformed("row has no stored raw content".into()))?;
        let raw = mime::transfer::decode_base64(content.as_bytes())
            .ok_or_else(|| IngestError::Malformed("stored raw content is not base64".into()))?;
        match mime::parse_message(&raw) {
            Ok(parsed) => {
                let subject = preferred_subject(&parsed, &row.raw_data.0);
                self.store
                    .update_inbound_parsed(
                        id,
                        &subject,
                        &parsed.body_text,
                        parsed.body_html.as_deref(),
                        &parsed.attachments,
                        None,
                    )
                    .await?;
                Ok(IngestOutcome::Refreshed {
                    id,
                    attachments: parsed.attachments.len(),
                })
            }
            Err(e) => {
                tracing::warn!(error.message = %e, "reparse failed; row left untouched");
                Ok(IngestOutcome::ParseFailed {
                    id,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Fresh message: persist as `pending`, fan out, then flip to
    /// `processed` regardless of per-subscription outcomes.
    async fn ingest_new(
        &self,
        message_id: String,
        object_key: Option<String>,
        notification: InboundNotification,
        raw: Vec<u8>,
    ) -> Result<IngestOutcome, IngestError> {
        let mut raw_data = notification;
        // byte preservation: the stored content always base64-decodes back to
        // the exact ingress bytes
        raw_data.content = Some(BASE64.encode(&raw));

        let parsed = match mime::parse_message(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                let email = NewInboundEmail {
                    message_id: message_id.clone(),
                    object_key,
                    from_address: raw_data.source().map(strip_display_name).unwrap_or_default(),
                    to_address: raw_data
                        .first_destination()
                        .map(strip_display_name)
                        .unwrap_or_default(),
                    subject: raw_data.upstream_subject().unwrap_or_default().to_string(),
                    body_text: String::new(),
                    body_html: None,
                    attachments: vec![],
                    raw_data,
                    status: InboundStatus::Failed,
                    error: Some(e.to_string()),
                };
                return match self.store.insert_inbound_email(&email).await? {
                    InsertOutcome::Inserted(id) => Ok(IngestOutcome::ParseFailed {
                        id,
                        error: e.to_string(),
                    }),
                    InsertOutcome::DuplicateMessageId => {
                        self.duplicate_by_message_id(&message_id).await
                    }
                };
            }
        };
        self.persist_and_fan_out(message_id, object_key, raw_data, parsed).await
    }

    async fn persist_and_fan_out(
        &self,
        message_id: String,
        object_key: Option<String>,
        raw_data: InboundNotification,
        parsed: ParsedEmail,
    ) -> Result<IngestOutcome, IngestError> {
        if parsed.body_text.is_empty() && !parsed.attachments.is_empty() {
            tracing::info!("empty body with attachments; subscribers fall back to raw content");
        }
        let subject = preferred_subject(&parsed, &raw_data);
        let from_address = parsed
            .from
            .clone()
            .or_else(|| raw_data.source().map(strip_display_name))
            .unwrap_or_default();
        let to_address = parsed
            .to
            .as_deref()
            .map(strip_display_name)
            .or_else(|| raw_data.first_destination().map(strip_display_name))
            .unwrap_or_default();

        let email = NewInboundEmail {
            message_id: message_id.clone(),
            object_key,
            from_address,
            to_address,
            subject,
            body_text: parsed.body_text.clone(),
            body_html: parsed.body_html.clone(),
            attachments: parsed.attachments.clone(),
            raw_data,
            status: InboundStatus::Pending,
            error: None,
        };
        let id = match self.store.insert_inbound_email(&email).await? {
            InsertOutcome::Inserted(id) => id,
            // lost the race against the other ingress path
            InsertOutcome::DuplicateMessageId => {
                return self.duplicate_by_message_id(&message_id).await;
            }
        };

        let row = self
            .store
            .get_inbound(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("inbound email {id} vanished after insert"))?;
        if let Err(e) = self
            .fanout
            .deliver_to_subscriptions(&row, Some(parsed.raw_headers.clone()))
            .await
        {
            // fan-out bookkeeping failures must not wedge the inbound row
            tracing::error!(error.cause_chain = ?e, "fan-out aborted");
        }
        self.store
            .update_inbound_status(id, InboundStatus::Processed, None)
            .await?;
        Ok(IngestOutcome::Ingested {
            id,
            attachments: parsed.attachments.len(),
        })
    }

    async fn refresh_existing(
        &self,
        id: Uuid,
        raw_data: &InboundNotification,
        record: &ObjectRecord,
    ) -> Result<IngestOutcome, IngestError> {
        let raw = self.object_store.fetch_object(&record.bucket, &record.key).await?;
        match mime::parse_message(&raw) {
            Ok(parsed) => {
                let subject = preferred_subject(&parsed, raw_data);
                self.store
                    .update_inbound_parsed(
                        id,
                        &subject,
                        &parsed.body_text,
                        parsed.body_html.as_deref(),
                        &parsed.attachments,
                        Some(&record.key),
                    )
                    .await?;
                Ok(IngestOutcome::Refreshed {
                    id,
                    attachments: parsed.attachments.len(),
                })
            }
            Err(e) => {
                tracing::warn!(error.message = %e, "refresh parse failed; row left untouched");
                Ok(IngestOutcome::Duplicate { id })
            }
        }
    }

    async fn duplicate_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let existing = self
            .store
            .find_inbound_by_message_id(message_id)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("unique violation for {message_id} but no row found")
            })?;
        Ok(IngestOutcome::Duplicate { id: existing.id })
    }
}

/// The upstream's pre-decoded subject wins over the locally parsed one when
/// they disagree; charset mismatches on the object-store path are otherwise
/// unrecoverable.
fn preferred_subject(
    parsed: &ParsedEmail,
    raw_data: &InboundNotification,
) -> String {
    match raw_data.upstream_subject() {
        Some(upstream) if upstream != parsed.subject => upstream.to_string(),
        _ => parsed.subject.clone(),
    }
}

/// Synthetic notification envelope for messages discovered through the object
/// store rather than a push.
fn object_notification(
    message_id: Option<&str>,
    record: &ObjectRecord,
    raw: &[u8],
) -> InboundNotification {
    InboundNotification {
        notification_type: Some("ObjectCreated".to_string()),
        mail: message_id.map(|id| MailInfo {
            message_id: Some(id.to_string()),
            ..Default::default()
        }),
        receipt: Some(ReceiptInfo {
            action: Some(ReceiptAction {
                action_type: Some("S3".to_string()),
                bucket_name: Some(record.bucket.clone()),
                object_key: Some(record.key.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        content: Some(BASE64.encode(raw)),
        ..Default::default()
    }
}
