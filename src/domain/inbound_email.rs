use serde::Deserialize;
use serde::Serialize;

/// Lifecycle of an inbound row. Created as `Pending`; flipped to `Processed`
/// once fan-out has been attempted (regardless of per-subscription outcome);
/// `Failed` only when parsing itself could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundStatus {
    Pending,
    Processed,
    Failed,
}

impl InboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Invalid inbound status: {other:?}")),
        }
    }
}

/// One decoded MIME attachment, as stored and as forwarded to subscribers.
///
/// `content` is always base64 text. When `raw_base64` is set, it is the
/// on-wire base64 (whitespace removed, otherwise untouched) and must reach
/// subscribers verbatim; when unset, the part arrived through a byte-preserving
/// encoding and `content` is our own encoding of those bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Byte count of the decoded content, not of the base64 text
    pub size: usize,
    pub content: String,
    #[serde(default)]
    pub raw_base64: bool,
}

/// An unfolded header as it appeared in the message, except that `Subject`
/// carries the decoded value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawHeader {
    pub name: String,
    pub value: String,
}
