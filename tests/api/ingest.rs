use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

use crate::helpers::push_notification;
use crate::helpers::s3_event;
use crate::helpers::sample_mime;
use crate::helpers::spawn_app;

#[tokio::test]
async fn a_push_notification_creates_a_processed_row() {
    let app = spawn_app().await;
    let raw = sample_mime(
        "m-1",
        "Jane Doe <jane@customer.example>",
        "support@helpdesk.example",
        "hello there",
        "a body with plenty of characters",
    );

    let resp = app.post_inbound_s3(push_notification("m-1", &raw)).await;
    assert!(resp.status().is_success());

    let (status, from, to, subject, content): (String, String, String, String, Option<String>) =
        sqlx::query_as(
            "SELECT status, from_address, to_address, subject, raw_data->>'content'
             FROM inbound_emails WHERE message_id = 'm-1'",
        )
        .fetch_one(&app.pool)
        .await
        .expect("row was not created");
    assert_eq!(status, "processed");
    assert_eq!(from, "jane@customer.example");
    assert_eq!(to, "support@helpdesk.example");
    assert_eq!(subject, "hello there");
    // byte preservation: the stored content decodes back to the exact input
    assert_eq!(BASE64.decode(content.unwrap()).unwrap(), raw);
}

#[tokio::test]
async fn the_same_message_id_is_ingested_exactly_once() {
    let app = spawn_app().await;
    app.seed_healthy_subscriber("helpdesk", serde_json::json!({})).await;
    let raw = sample_mime("m-dup", "a@b.com", "c@d.com", "s", "the body of the message");

    // push notification first, object-created event for the same message 2s
    // later (well, immediately; the race is the point)
    app.post_inbound_s3(push_notification("m-dup", &raw)).await;
    app.mount_object("inbound/m-dup", &raw).await;
    app.post_inbound_s3(s3_event("inbound/m-dup")).await;
    // and the push retry for good measure
    app.post_inbound_s3(push_notification("m-dup", &raw)).await;

    assert_eq!(app.inbound_count().await, 1);
    // exactly one POST reached the subscriber
    assert_eq!(
        app.webhook_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method == wiremock::http::Method::POST)
            .count(),
        1
    );
    assert_eq!(app.delivery_count().await, 1);
}

#[tokio::test]
async fn an_object_created_event_fetches_parses_and_fans_out() {
    let app = spawn_app().await;
    app.seed_healthy_subscriber("helpdesk", serde_json::json!({})).await;
    let raw = sample_mime(
        "m-s3",
        "a@b.com",
        "c@d.com",
        "via the object store",
        "fetched from the bucket, not inline",
    );
    app.mount_object("inbound/m-s3", &raw).await;

    let resp = app.post_inbound_s3(s3_event("inbound/m-s3")).await;
    assert!(resp.status().is_success());

    let (message_id, object_key): (String, Option<String>) = sqlx::query_as(
        "SELECT message_id, object_key FROM inbound_emails",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(message_id, "m-s3");
    assert_eq!(object_key.as_deref(), Some("inbound/m-s3"));
    assert_eq!(app.delivery_count().await, 1);
}

#[tokio::test]
async fn unparseable_content_is_recorded_as_failed() {
    let app = spawn_app().await;
    // no CRLFCRLF / LFLF separator anywhere
    let raw = b"Subject: broken".to_vec();

    let resp = app.post_inbound_s3(push_notification("m-bad", &raw)).await;
    // 200 so the upstream does not retry a hopeless message
    assert!(resp.status().is_success());

    let (status, error): (String, Option<String>) =
        sqlx::query_as("SELECT status, error FROM inbound_emails WHERE message_id = 'm-bad'")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(status, "failed");
    assert!(error.unwrap().contains("separator"));
}

#[tokio::test]
async fn the_legacy_route_is_a_no_op() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/email/inbound", app.addr))
        .json(&serde_json::json!({ "anything": "at all" }))
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
    assert_eq!(app.inbound_count().await, 0);
}

#[tokio::test]
async fn subscription_confirmations_require_https() {
    let app = spawn_app().await;
    let confirm_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/confirm"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&confirm_server)
        .await;

    // the mock only speaks plain http, which the adapter refuses to call
    let resp = app
        .post_inbound_s3(serde_json::json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": format!("{}/confirm", confirm_server.uri()),
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn garbage_bodies_get_a_400() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/email/inbound/s3", app.addr))
        .body("certainly not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = app.post_inbound_s3(serde_json::json!({ "unknown": "shape" })).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn wrapped_notifications_are_unwrapped() {
    let app = spawn_app().await;
    let raw = sample_mime("m-wrap", "a@b.com", "c@d.com", "wrapped", "delivered via sns wrapper");
    let inner = push_notification("m-wrap", &raw);

    let resp = app
        .post_inbound_s3(serde_json::json!({
            "Type": "Notification",
            "Message": inner.to_string(),
        }))
        .await;
    assert!(resp.status().is_success());
    assert_eq!(app.inbound_count().await, 1);
}
