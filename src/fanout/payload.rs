use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::strip_display_name;
use crate::domain::Attachment;
use crate::domain::RawHeader;
use crate::store::InboundEmailRow;

/// Base64 raw MIME above ~3 MiB is dropped from the payload to keep the
/// overall POST under ~4 MiB. Attachments are always included.
pub const RAW_CONTENT_MAX_BYTES: usize = 3 * 1024 * 1024;

/// The canonical `data` object POSTed to every matching subscriber; assembled
/// once per inbound email, `subscriptionId` stamped per attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub received_at: DateTime<Utc>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_headers: Option<Vec<RawHeader>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content_base64: Option<String>,
}

impl WebhookPayload {
    /// Addresses are stripped here, *after* the row's stored (already bare)
    /// form has driven filter evaluation.
    pub fn assemble(
        email: &InboundEmailRow,
        raw_headers: Option<Vec<RawHeader>>,
    ) -> Self {
        let raw_content_base64 = email
            .raw_data
            .0
            .content
            .clone()
            .filter(|content| content.len() <= RAW_CONTENT_MAX_BYTES);
        Self {
            id: email.id,
            from: strip_display_name(&email.from_address),
            to: strip_display_name(&email.to_address),
            subject: email.subject.clone(),
            body_text: email.body_text.clone(),
            body_html: email.body_html.clone(),
            attachments: email.attachments.0.clone(),
            received_at: email.received_at,
            message_id: email.message_id.clone(),
            raw_headers,
            raw_content_base64,
        }
    }

    /// The full POST body: `{event, timestamp, data: {..., subscriptionId}}`.
    pub fn envelope(
        &self,
        subscription_id: Uuid,
    ) -> Value {
        let mut data = serde_json::to_value(self).expect("payload serialization is infallible");
        data["subscriptionId"] = json!(subscription_id);
        json!({
            "event": "email.received",
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        })
    }
}
