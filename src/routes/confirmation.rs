use actix_web::web;
use actix_web::HttpResponse;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::DeliveryStatus;
use crate::store::Store;
use crate::utils::error_400;
use crate::utils::error_500;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    inbound_email_id: Uuid,
    /// Absent for polling subscribers confirming by inbound id alone
    subscription_id: Option<Uuid>,
    status: String,
    ticket_id: Option<String>,
    comment_id: Option<String>,
    error: Option<String>,
}

/// `POST /email/inbound/delivery-confirmation` — the subscriber's end-to-end
/// callback, flipping a delivery row from `sent` to `delivered` or `failed`.
///
/// Idempotence: reapplying the same final status is a no-op; `delivered` is
/// terminal and never downgraded.
#[tracing::instrument(
    skip_all,
    fields(inbound_email_id = %body.inbound_email_id, status = %body.status)
)]
pub async fn delivery_confirmation(
    body: web::Json<ConfirmationRequest>,
    store: web::Data<Store>,
) -> Result<HttpResponse, actix_web::Error> {
    let requested = DeliveryStatus::parse(&body.status).map_err(error_400)?;
    if requested == DeliveryStatus::Sent {
        return Err(error_400("status must be `delivered` or `failed`"));
    }

    match body.subscription_id {
        Some(subscription_id) => {
            confirm_pair(&store, &body, subscription_id, requested).await
        }
        None => {
            // polling subscribers can only ever confirm success
            if requested != DeliveryStatus::Delivered {
                return Err(error_400(
                    "confirmations without a subscriptionId only accept `delivered`",
                ));
            }
            let updated = store
                .confirm_all_sent_for_inbound(
                    body.inbound_email_id,
                    body.ticket_id.as_deref(),
                    body.comment_id.as_deref(),
                )
                .await
                .map_err(error_500)?;
            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "message": format!("{updated} delivery record(s) confirmed"),
            })))
        }
    }
}

async fn confirm_pair(
    store: &Store,
    body: &ConfirmationRequest,
    subscription_id: Uuid,
    requested: DeliveryStatus,
) -> Result<HttpResponse, actix_web::Error> {
    let delivery = store
        .find_latest_delivery(body.inbound_email_id, subscription_id)
        .await
        .map_err(error_500)?;
    let Some(delivery) = delivery else {
        return Ok(HttpResponse::NotFound().json(json!({
            "success": false,
            "message": "no delivery record for this email and subscription",
        })));
    };

    if delivery.status == requested.as_str() {
        return Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("delivery already {}", delivery.status),
        })));
    }
    if delivery.status == DeliveryStatus::Delivered.as_str() {
        return Ok(HttpResponse::Conflict().json(json!({
            "success": false,
            "message": "delivery is already confirmed; refusing to downgrade",
        })));
    }

    store
        .update_delivery_status(
            delivery.id,
            requested,
            body.ticket_id.as_deref(),
            body.comment_id.as_deref(),
            body.error.as_deref(),
        )
        .await
        .map_err(error_500)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("delivery marked {}", requested.as_str()),
    })))
}
