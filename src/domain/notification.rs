use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// The upstream push notification, SES-flavoured. This is also exactly what is
// persisted in `inbound_emails.raw_data`: unknown keys are carried through the
// `extra` flatten so the stored envelope stays byte-for-byte reconstructible
// even when the upstream grows new fields.

/// Canonical upstream notification for one received message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail: Option<MailInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptInfo>,
    /// Base64 of the full raw MIME message, when delivered inline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_headers: Option<MailHeaders>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pre-decoded headers supplied by the upstream. `subject` takes precedence
/// over the locally parsed one when they disagree (charset mismatches on the
/// object-store path).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ReceiptAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAction {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundNotification {
    pub fn message_id(&self) -> Option<&str> {
        self.mail.as_ref()?.message_id.as_deref()
    }

    pub fn upstream_subject(&self) -> Option<&str> {
        self.mail.as_ref()?.common_headers.as_ref()?.subject.as_deref()
    }

    pub fn first_destination(&self) -> Option<&str> {
        self.mail.as_ref()?.destination.as_ref()?.first().map(String::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.mail.as_ref()?.source.as_deref()
    }

    pub fn bucket_name(&self) -> Option<&str> {
        self.receipt.as_ref()?.action.as_ref()?.bucket_name.as_deref()
    }

    pub fn object_key(&self) -> Option<&str> {
        self.receipt.as_ref()?.action.as_ref()?.object_key.as_deref()
    }
}

/// One `(bucket, key)` pair from an object-created event or a manual replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub bucket: String,
    pub key: String,
}
