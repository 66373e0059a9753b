use std::time::Duration;

use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::push_notification;
use crate::helpers::sample_mime;
use crate::helpers::spawn_app;

#[tokio::test]
async fn the_webhook_payload_has_the_documented_shape() {
    let app = spawn_app().await;
    let subscription_id = app
        .seed_healthy_subscriber("helpdesk", serde_json::json!({}))
        .await;
    let raw = sample_mime(
        "m-shape",
        "Jane Doe <jane@customer.example>",
        "support@helpdesk.example",
        "payload shape",
        "a body with plenty of characters",
    );

    app.post_inbound_s3(push_notification("m-shape", &raw)).await;

    let requests = app.webhook_server.received_requests().await.unwrap();
    let delivery = requests
        .iter()
        .find(|r| r.method == wiremock::http::Method::POST)
        .expect("no delivery was posted");

    assert_eq!(
        delivery.headers.get("X-Notification-Service").unwrap(),
        "notifications-microservice"
    );
    assert_eq!(
        delivery.headers.get("X-Subscription-Id").unwrap(),
        subscription_id.to_string().as_str()
    );

    let body: serde_json::Value = serde_json::from_slice(&delivery.body).unwrap();
    assert_eq!(body["event"], "email.received");
    assert!(body["timestamp"].is_string());
    let data = &body["data"];
    assert_eq!(data["from"], "jane@customer.example");
    assert_eq!(data["to"], "support@helpdesk.example");
    assert_eq!(data["subject"], "payload shape");
    assert_eq!(data["messageId"], "m-shape");
    assert_eq!(data["subscriptionId"], serde_json::json!(subscription_id));
    assert!(data["bodyText"].as_str().unwrap().contains("plenty"));
    assert!(data["rawContentBase64"].is_string());
    assert!(data["rawHeaders"].is_array());
}

#[tokio::test]
async fn filters_route_to_matching_subscriptions_only() {
    let app = spawn_app().await;
    let matching = app
        .seed_healthy_subscriber("helpdesk", serde_json::json!({ "to": ["*@helpdesk.example"] }))
        .await;
    let non_matching = app
        .seed_subscription(
            "crm",
            &format!("{}/api/email/inbound", app.webhook_server.uri()),
            serde_json::json!({ "to": ["*@elsewhere.example"] }),
        )
        .await;
    let raw = sample_mime(
        "m-filter",
        "jane@customer.example",
        "support@helpdesk.example",
        "filters",
        "a body with plenty of characters",
    );

    app.post_inbound_s3(push_notification("m-filter", &raw)).await;

    let matching_row = app.subscription_row(matching).await;
    assert_eq!(matching_row.total_deliveries, 1);
    let non_matching_row = app.subscription_row(non_matching).await;
    assert_eq!(non_matching_row.total_deliveries, 0);
    assert_eq!(non_matching_row.total_failures, 0);
    assert_eq!(app.delivery_count().await, 1);
}

#[tokio::test]
async fn a_2xx_resets_failure_state_and_records_a_delivery_row() {
    let app = spawn_app().await;
    let subscription_id = app
        .seed_healthy_subscriber("helpdesk", serde_json::json!({}))
        .await;
    // simulate earlier trouble
    sqlx::query(
        "UPDATE webhook_subscriptions
         SET retry_count = 1, total_failures = 3, last_error = 'older failure'
         WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(&app.pool)
    .await
    .unwrap();
    let raw = sample_mime("m-ok", "a@b.com", "c@d.com", "s", "the body of the message");

    app.post_inbound_s3(push_notification("m-ok", &raw)).await;

    let row = app.subscription_row(subscription_id).await;
    assert_eq!(row.total_deliveries, 1);
    assert_eq!(row.retry_count, 0);
    assert!(row.last_error.is_none());
    // failures are monotonic; a success does not erase history
    assert_eq!(row.total_failures, 3);

    let (status, http_status): (String, Option<i32>) = sqlx::query_as(
        "SELECT status, http_status FROM webhook_deliveries WHERE subscription_id = $1",
    )
    .bind(subscription_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(status, "sent");
    assert_eq!(http_status, Some(200));
}

#[tokio::test]
async fn non_2xx_responses_update_failure_counters_without_a_delivery_row() {
    let app = spawn_app().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.webhook_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/email/inbound"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.webhook_server)
        .await;
    let subscription_id = app
        .seed_subscription(
            "helpdesk",
            &format!("{}/api/email/inbound", app.webhook_server.uri()),
            serde_json::json!({}),
        )
        .await;
    let raw = sample_mime("m-fail", "a@b.com", "c@d.com", "s", "the body of the message");

    app.post_inbound_s3(push_notification("m-fail", &raw)).await;

    let row = app.subscription_row(subscription_id).await;
    assert_eq!(row.total_failures, 1);
    assert_eq!(row.retry_count, 1);
    assert!(row.last_error.unwrap().contains("500"));
    assert_eq!(app.delivery_count().await, 0);
    // the email row is processed regardless of delivery outcomes
    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM inbound_emails WHERE message_id = 'm-fail'")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(status, "processed");
}

#[tokio::test]
async fn timeouts_widen_the_window_alert_the_operator_and_never_suspend() {
    let app = spawn_app().await;
    // alert mail API
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;
    // a subscriber slower than its delivery window
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.webhook_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/email/inbound"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&app.webhook_server)
        .await;
    let subscription_id = app
        .seed_subscription(
            "helpdesk",
            &format!("{}/api/email/inbound", app.webhook_server.uri()),
            serde_json::json!({}),
        )
        .await;
    sqlx::query("UPDATE webhook_subscriptions SET delivery_timeout_ms = 500 WHERE id = $1")
        .bind(subscription_id)
        .execute(&app.pool)
        .await
        .unwrap();
    let raw = sample_mime("m-slow", "a@b.com", "c@d.com", "s", "the body of the message");

    app.post_inbound_s3(push_notification("m-slow", &raw)).await;

    let row = app.subscription_row(subscription_id).await;
    assert_eq!(row.delivery_timeout_ms, 1000);
    assert_eq!(row.total_failures, 1);
    assert_eq!(row.status, "active");
    assert_eq!(app.delivery_count().await, 0);
}

#[tokio::test]
async fn a_failing_health_probe_skips_the_attempt_without_penalty() {
    let app = spawn_app().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&app.webhook_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/email/inbound"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.webhook_server)
        .await;
    let subscription_id = app
        .seed_subscription(
            "helpdesk",
            &format!("{}/api/email/inbound", app.webhook_server.uri()),
            serde_json::json!({}),
        )
        .await;
    let raw = sample_mime("m-probe", "a@b.com", "c@d.com", "s", "the body of the message");

    app.post_inbound_s3(push_notification("m-probe", &raw)).await;

    let row = app.subscription_row(subscription_id).await;
    assert_eq!(row.total_deliveries, 0);
    assert_eq!(row.total_failures, 0);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn suspended_subscriptions_resume_after_a_successful_probe() {
    let app = spawn_app().await;
    Mock::given(method("POST"))
        .and(path("/api/email/inbound"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.webhook_server)
        .await;
    let subscription_id = app
        .seed_subscription(
            "helpdesk",
            &format!("{}/api/email/inbound", app.webhook_server.uri()),
            serde_json::json!({}),
        )
        .await;
    sqlx::query(
        "UPDATE webhook_subscriptions
         SET status = 'suspended', retry_count = 5,
             last_error_at = now() - interval '2 hours'
         WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(&app.pool)
    .await
    .unwrap();

    let store = mail_fanout::store::Store::new(app.pool.clone());
    let email_client = mail_fanout::email_client::EmailClient::new(
        app.email_server.uri(),
        mail_fanout::domain::AlertRecipient::parse("alerts@x.example".into()).unwrap(),
        secrecy::Secret::new("token".into()),
        Duration::from_secs(1),
    );
    let engine = mail_fanout::fanout::FanoutEngine::new(store, email_client, None);
    let resumed = engine.run_auto_resume_pass().await.unwrap();

    assert_eq!(resumed, 1);
    let row = app.subscription_row(subscription_id).await;
    assert_eq!(row.status, "active");
    assert_eq!(row.retry_count, 0);
}
