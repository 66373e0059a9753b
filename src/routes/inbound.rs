use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::Attachment;
use crate::ingest::IngestError;
use crate::ingest::IngestOutcome;
use crate::ingest::Ingestor;
use crate::ingress;
use crate::ingress::PushEnvelope;
use crate::object_store::ObjectStoreClient;
use crate::store::InboundEmailRow;
use crate::store::InboundEmailSummary;
use crate::store::InboundListQuery;
use crate::store::Store;
use crate::store::UndeliveredRow;
use crate::utils::error_400;
use crate::utils::error_500;

/// `POST /email/inbound` — legacy ingress; a deliberate no-op in S3-only
/// mode. Returns 200 so the upstream does not retry.
pub async fn legacy_inbound() -> HttpResponse {
    tracing::info!("legacy inbound route hit; ignored in s3-only mode");
    HttpResponse::Ok().json(json!({ "status": "ignored" }))
}

/// `POST /email/inbound/s3` — the real ingress: subscription confirmations,
/// wrapped/raw push notifications, object-created events, manual replays.
#[tracing::instrument(skip_all)]
pub async fn inbound_s3(
    request: HttpRequest,
    body: web::Bytes,
    ingestor: web::Data<Ingestor>,
    http_client: web::Data<reqwest::Client>,
) -> Result<HttpResponse, actix_web::Error> {
    let raw_delivery = request
        .headers()
        .get("x-amz-sns-rawdelivery")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));

    let envelope = ingress::classify(&body, raw_delivery).map_err(error_400)?;
    match envelope {
        PushEnvelope::SubscriptionConfirmation { subscribe_url } => {
            if !subscribe_url.starts_with("https://") {
                return Err(error_400("SubscribeURL must be https"));
            }
            http_client
                .get(&subscribe_url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(error_500)?;
            tracing::info!("push subscription confirmed");
            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "message": "subscription confirmed",
            })))
        }
        PushEnvelope::Notification(notification) => {
            let outcome = ingestor
                .accept_push_notification(*notification)
                .await
                .map_err(ingest_error_response)?;
            Ok(outcome_response(&outcome))
        }
        PushEnvelope::ObjectCreated(records) => {
            let outcomes = ingestor
                .accept_object_created(&records)
                .await
                .map_err(ingest_error_response)?;
            Ok(outcomes_response(&outcomes))
        }
        PushEnvelope::ManualReplay(record) => {
            let outcomes = ingestor
                .accept_object_created(std::slice::from_ref(&record))
                .await
                .map_err(ingest_error_response)?;
            Ok(outcomes_response(&outcomes))
        }
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
    #[serde(rename = "toFilter")]
    to_filter: Option<String>,
    /// Comma-separated addresses to exclude
    #[serde(rename = "excludeTo")]
    exclude_to: Option<String>,
    status: Option<String>,
    /// `1`/`true`: identity and subject columns only, no bodies
    #[serde(rename = "listOnly")]
    list_only: Option<String>,
}

/// `GET /email/inbound` — the poll API.
pub async fn list_inbound(
    params: web::Query<ListParams>,
    store: web::Data<Store>,
) -> Result<HttpResponse, actix_web::Error> {
    let query = InboundListQuery {
        to_filter: params.to_filter.clone().filter(|s| !s.is_empty()),
        exclude_to: params
            .exclude_to
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        status: params.status.clone().filter(|s| !s.is_empty()),
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };
    let list_only = params
        .list_only
        .as_deref()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let data = match list_only {
        true => {
            let rows = store.list_inbound_summaries(&query).await.map_err(error_500)?;
            rows.iter().map(ApiInboundSummary::from_row).map(|r| json!(r)).collect::<Vec<_>>()
        }
        false => {
            let rows = store.list_inbound(&query).await.map_err(error_500)?;
            rows.iter().map(ApiInboundEmail::from_row).map(|r| json!(r)).collect::<Vec<_>>()
        }
    };
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
    })))
}

/// `GET /email/inbound/{id}` — one email with bodies and attachments.
pub async fn get_inbound(
    id: web::Path<Uuid>,
    store: web::Data<Store>,
) -> Result<HttpResponse, actix_web::Error> {
    match store.get_inbound(*id).await.map_err(error_500)? {
        Some(row) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": ApiInboundEmail::from_row(&row),
        }))),
        None => Ok(not_found(&format!("inbound email {id} does not exist"))),
    }
}

#[derive(Deserialize)]
pub struct UndeliveredParams {
    limit: Option<i64>,
}

/// `GET /email/inbound/undelivered` — `sent` rows still waiting for their
/// confirmation callback.
pub async fn undelivered(
    params: web::Query<UndeliveredParams>,
    store: web::Data<Store>,
) -> Result<HttpResponse, actix_web::Error> {
    let rows = store
        .list_undelivered(params.limit.unwrap_or(50))
        .await
        .map_err(error_500)?;
    let data: Vec<_> = rows.iter().map(ApiUndelivered::from_row).collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
    })))
}

#[derive(Deserialize)]
pub struct UnprocessedParams {
    #[serde(rename = "maxKeys")]
    max_keys: Option<i32>,
}

/// `GET /email/inbound/s3-unprocessed` — object-store keys with no ingested
/// row; the on-demand version of the catch-up diff.
pub async fn s3_unprocessed(
    params: web::Query<UnprocessedParams>,
    store: web::Data<Store>,
    object_store: web::Data<ObjectStoreClient>,
) -> Result<HttpResponse, actix_web::Error> {
    let max_keys = params.max_keys.unwrap_or(10).clamp(1, 100);
    let keys = object_store.list_keys(max_keys, 0).await.map_err(error_500)?;
    let processed = store.processed_object_keys().await.map_err(error_500)?;
    let unprocessed: Vec<_> = keys.iter().filter(|k| !processed.contains(*k)).collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "listed": keys.len(),
            "unprocessed": unprocessed,
            "count": unprocessed.len(),
        },
    })))
}

/// `POST /email/inbound/{id}/reparse` — re-run the parser on the stored raw
/// content. Never fans out.
pub async fn reparse_inbound(
    id: web::Path<Uuid>,
    ingestor: web::Data<Ingestor>,
) -> Result<HttpResponse, actix_web::Error> {
    let outcome = ingestor
        .reprocess_inbound(*id)
        .await
        .map_err(ingest_error_response)?;
    Ok(outcome_response(&outcome))
}

fn outcome_response(outcome: &IngestOutcome) -> HttpResponse {
    let attachments = match outcome {
        IngestOutcome::Ingested { attachments, .. }
        | IngestOutcome::Refreshed { attachments, .. } => Some(*attachments),
        _ => None,
    };
    HttpResponse::Ok().json(json!({
        "success": !matches!(outcome, IngestOutcome::ParseFailed { .. }),
        "message": outcome.describe(),
        "id": outcome.id(),
        "attachments": attachments,
    }))
}

fn outcomes_response(outcomes: &[IngestOutcome]) -> HttpResponse {
    match outcomes {
        [single] => outcome_response(single),
        many => HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("{} records processed", many.len()),
            "results": many.iter().map(|o| json!({
                "id": o.id(),
                "message": o.describe(),
            })).collect::<Vec<_>>(),
        })),
    }
}

fn not_found(message: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "success": false, "message": message }))
}

/// Ingress contract: 400 for shapes we cannot accept, 404 for unknown rows,
/// 500 (so the upstream retries) for store/object failures.
fn ingest_error_response(e: IngestError) -> actix_web::Error {
    match &e {
        IngestError::Malformed(_) => error_400(e),
        IngestError::NotFound(_) => actix_web::error::ErrorNotFound(e),
        _ => error_500(e),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiInboundEmail {
    id: Uuid,
    message_id: String,
    object_key: Option<String>,
    from: String,
    to: String,
    subject: String,
    body_text: String,
    body_html: Option<String>,
    attachments: Vec<Attachment>,
    status: String,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl ApiInboundEmail {
    fn from_row(row: &InboundEmailRow) -> Self {
        Self {
            id: row.id,
            message_id: row.message_id.clone(),
            object_key: row.object_key.clone(),
            from: row.from_address.clone(),
            to: row.to_address.clone(),
            subject: row.subject.clone(),
            body_text: row.body_text.clone(),
            body_html: row.body_html.clone(),
            attachments: row.attachments.0.clone(),
            status: row.status.clone(),
            received_at: row.received_at,
            processed_at: row.processed_at,
            error: row.error.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiInboundSummary {
    id: Uuid,
    message_id: String,
    from: String,
    to: String,
    subject: String,
    status: String,
    received_at: DateTime<Utc>,
}

impl ApiInboundSummary {
    fn from_row(row: &InboundEmailSummary) -> Self {
        Self {
            id: row.id,
            message_id: row.message_id.clone(),
            from: row.from_address.clone(),
            to: row.to_address.clone(),
            subject: row.subject.clone(),
            status: row.status.clone(),
            received_at: row.received_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiUndelivered {
    id: Uuid,
    inbound_email_id: Uuid,
    subscription_id: Uuid,
    service_name: String,
    http_status: Option<i32>,
    created_at: DateTime<Utc>,
}

impl ApiUndelivered {
    fn from_row(row: &UndeliveredRow) -> Self {
        Self {
            id: row.id,
            inbound_email_id: row.inbound_email_id,
            subscription_id: row.subscription_id,
            service_name: row.service_name.clone(),
            http_status: row.http_status,
            created_at: row.created_at,
        }
    }
}
