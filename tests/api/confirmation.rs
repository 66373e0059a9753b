use uuid::Uuid;

use crate::helpers::push_notification;
use crate::helpers::sample_mime;
use crate::helpers::spawn_app;
use crate::helpers::TestApp;

/// Ingest one email against one healthy subscriber; returns (inbound id,
/// subscription id) with a `sent` delivery row in place.
async fn ingest_one(app: &TestApp) -> (Uuid, Uuid) {
    let subscription_id = app
        .seed_healthy_subscriber("helpdesk", serde_json::json!({}))
        .await;
    let raw = sample_mime("m-confirm", "a@b.com", "c@d.com", "s", "the body of the message");
    let resp = app.post_inbound_s3(push_notification("m-confirm", &raw)).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let inbound_id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
    (inbound_id, subscription_id)
}

async fn delivery_status(
    app: &TestApp,
    subscription_id: Uuid,
) -> (String, Option<String>) {
    let (status, ticket_id): (String, Option<String>) = sqlx::query_as(
        "SELECT status, ticket_id FROM webhook_deliveries WHERE subscription_id = $1",
    )
    .bind(subscription_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    (status, ticket_id)
}

#[tokio::test]
async fn a_callback_flips_sent_to_delivered() {
    let app = spawn_app().await;
    let (inbound_id, subscription_id) = ingest_one(&app).await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "subscriptionId": subscription_id,
            "status": "delivered",
            "ticketId": "T-42",
        }))
        .await;
    assert!(resp.status().is_success());

    let (status, ticket_id) = delivery_status(&app, subscription_id).await;
    assert_eq!(status, "delivered");
    assert_eq!(ticket_id.as_deref(), Some("T-42"));
}

#[tokio::test]
async fn a_callback_can_report_downstream_failure() {
    let app = spawn_app().await;
    let (inbound_id, subscription_id) = ingest_one(&app).await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "subscriptionId": subscription_id,
            "status": "failed",
            "error": "ticket creation blew up",
        }))
        .await;
    assert!(resp.status().is_success());

    let (status, _) = delivery_status(&app, subscription_id).await;
    assert_eq!(status, "failed");
}

#[tokio::test]
async fn reapplying_the_same_status_is_a_no_op() {
    let app = spawn_app().await;
    let (inbound_id, subscription_id) = ingest_one(&app).await;
    let body = serde_json::json!({
        "inboundEmailId": inbound_id,
        "subscriptionId": subscription_id,
        "status": "delivered",
    });

    assert!(app.post_confirmation(body.clone()).await.status().is_success());
    assert!(app.post_confirmation(body).await.status().is_success());

    let (status, _) = delivery_status(&app, subscription_id).await;
    assert_eq!(status, "delivered");
}

#[tokio::test]
async fn delivered_is_terminal() {
    let app = spawn_app().await;
    let (inbound_id, subscription_id) = ingest_one(&app).await;
    app.post_confirmation(serde_json::json!({
        "inboundEmailId": inbound_id,
        "subscriptionId": subscription_id,
        "status": "delivered",
    }))
    .await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "subscriptionId": subscription_id,
            "status": "failed",
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 409);

    let (status, _) = delivery_status(&app, subscription_id).await;
    assert_eq!(status, "delivered");
}

#[tokio::test]
async fn confirmation_without_subscription_id_confirms_all_sent_rows() {
    let app = spawn_app().await;
    let (inbound_id, subscription_id) = ingest_one(&app).await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "status": "delivered",
            "ticketId": "T-77",
        }))
        .await;
    assert!(resp.status().is_success());

    let (status, ticket_id) = delivery_status(&app, subscription_id).await;
    assert_eq!(status, "delivered");
    assert_eq!(ticket_id.as_deref(), Some("T-77"));
}

#[tokio::test]
async fn confirmation_without_subscription_id_only_accepts_delivered() {
    let app = spawn_app().await;
    let (inbound_id, _) = ingest_one(&app).await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "status": "failed",
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn unknown_pairs_get_a_404() {
    let app = spawn_app().await;
    let (inbound_id, _) = ingest_one(&app).await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "subscriptionId": Uuid::new_v4(),
            "status": "delivered",
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn sent_is_not_an_acceptable_target_status() {
    let app = spawn_app().await;
    let (inbound_id, subscription_id) = ingest_one(&app).await;

    let resp = app
        .post_confirmation(serde_json::json!({
            "inboundEmailId": inbound_id,
            "subscriptionId": subscription_id,
            "status": "sent",
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 400);
}
