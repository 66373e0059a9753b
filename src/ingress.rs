//! Typed classification of everything the push channel can POST at us. The
//! envelope is parsed exactly once, here at the boundary; the rest of the
//! pipeline only ever sees the typed variants.

use serde_json::Value;

use crate::domain::InboundNotification;
use crate::domain::ObjectRecord;

#[derive(Debug)]
pub enum PushEnvelope {
    /// Upstream asks us to confirm the push subscription via `SubscribeURL`
    SubscriptionConfirmation { subscribe_url: String },
    /// A notification for one received message (wrapped or raw-delivery)
    Notification(Box<InboundNotification>),
    /// `Records`-style object-created event
    ObjectCreated(Vec<ObjectRecord>),
    /// Operator-issued `{bucket, key}` replay
    ManualReplay(ObjectRecord),
}

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized envelope shape")]
    Unrecognized,
    #[error("envelope field {0} has the wrong shape")]
    Field(&'static str),
}

/// `raw_delivery` reflects the `x-amz-sns-rawdelivery: true` header: the body
/// is then the inner notification itself, not a wrapper.
pub fn classify(
    body: &[u8],
    raw_delivery: bool,
) -> Result<PushEnvelope, EnvelopeError> {
    let value: Value = serde_json::from_slice(body)?;
    if raw_delivery {
        return classify_inner(value);
    }

    match value.get("Type").and_then(Value::as_str) {
        Some("SubscriptionConfirmation") => {
            let subscribe_url = value
                .get("SubscribeURL")
                .and_then(Value::as_str)
                .ok_or(EnvelopeError::Field("SubscribeURL"))?
                .to_string();
            Ok(PushEnvelope::SubscriptionConfirmation { subscribe_url })
        }
        Some("Notification") => {
            let message = value
                .get("Message")
                .and_then(Value::as_str)
                .ok_or(EnvelopeError::Field("Message"))?;
            classify_inner(serde_json::from_str(message)?)
        }
        _ => classify_inner(value),
    }
}

fn classify_inner(value: Value) -> Result<PushEnvelope, EnvelopeError> {
    if let Some(records) = value.get("Records") {
        return Ok(PushEnvelope::ObjectCreated(parse_s3_records(records)?));
    }
    if let (Some(bucket), Some(key)) = (
        value.get("bucket").and_then(Value::as_str),
        value.get("key").and_then(Value::as_str),
    ) {
        return Ok(PushEnvelope::ManualReplay(ObjectRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }));
    }
    if value.get("mail").is_some() || value.get("receipt").is_some() || value.get("content").is_some()
    {
        let notification: InboundNotification = serde_json::from_value(value)?;
        return Ok(PushEnvelope::Notification(Box::new(notification)));
    }
    Err(EnvelopeError::Unrecognized)
}

/// Object keys arrive URL-encoded with `+` for spaces; decode before they
/// reach the store lookups.
fn parse_s3_records(records: &Value) -> Result<Vec<ObjectRecord>, EnvelopeError> {
    let records = records.as_array().ok_or(EnvelopeError::Field("Records"))?;
    records
        .iter()
        .map(|record| {
            let bucket = record
                .pointer("/s3/bucket/name")
                .and_then(Value::as_str)
                .ok_or(EnvelopeError::Field("Records.s3.bucket.name"))?;
            let key = record
                .pointer("/s3/object/key")
                .and_then(Value::as_str)
                .ok_or(EnvelopeError::Field("Records.s3.object.key"))?;
            let key = urlencoding::decode(&key.replace('+', " "))
                .map_err(|_| EnvelopeError::Field("Records.s3.object.key"))?
                .into_owned();
            Ok(ObjectRecord {
                bucket: bucket.to_string(),
                key,
            })
        })
        .collect()
}
