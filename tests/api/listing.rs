use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::push_notification;
use crate::helpers::sample_mime;
use crate::helpers::spawn_app;

async fn ingest(
    app: &crate::helpers::TestApp,
    message_id: &str,
    to: &str,
) {
    let raw = sample_mime(
        message_id,
        "sender@customer.example",
        to,
        &format!("subject {message_id}"),
        "a body with plenty of characters",
    );
    app.post_inbound_s3(push_notification(message_id, &raw)).await;
}

#[tokio::test]
async fn listing_filters_by_recipient_and_skips_excluded() {
    let app = spawn_app().await;
    ingest(&app, "m-a", "support@helpdesk.example").await;
    ingest(&app, "m-b", "sales@helpdesk.example").await;
    ingest(&app, "m-c", "support@helpdesk.example").await;

    let body = app
        .get_json("/email/inbound?toFilter=support@helpdesk.example")
        .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);

    let body = app
        .get_json("/email/inbound?excludeTo=support@helpdesk.example,other@x.example")
        .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["to"], "sales@helpdesk.example");
}

#[tokio::test]
async fn list_only_omits_bodies() {
    let app = spawn_app().await;
    ingest(&app, "m-lite", "support@helpdesk.example").await;

    let body = app.get_json("/email/inbound?listOnly=1").await;
    assert_eq!(body["count"], 1);
    let entry = &body["data"][0];
    assert_eq!(entry["messageId"], "m-lite");
    assert!(entry.get("bodyText").is_none());
    assert!(entry.get("attachments").is_none());

    let body = app.get_json("/email/inbound").await;
    assert!(body["data"][0]["bodyText"].is_string());
}

#[tokio::test]
async fn fetching_one_email_includes_bodies_and_attachments() {
    let app = spawn_app().await;
    ingest(&app, "m-one", "support@helpdesk.example").await;
    let listed = app.get_json("/email/inbound").await;
    let id = listed["data"][0]["id"].as_str().unwrap().to_string();

    let body = app.get_json(&format!("/email/inbound/{id}")).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["messageId"], "m-one");
    assert!(body["data"]["bodyText"].is_string());

    let missing = reqwest::Client::new()
        .get(format!(
            "{}/email/inbound/{}",
            app.addr,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn undelivered_lists_unconfirmed_helpdesk_deliveries() {
    let app = spawn_app().await;
    app.seed_healthy_subscriber("helpdesk-prod", serde_json::json!({})).await;
    ingest(&app, "m-und", "support@helpdesk.example").await;

    let body = app.get_json("/email/inbound/undelivered").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["serviceName"], "helpdesk-prod");

    // confirming empties the view
    let listed = app.get_json("/email/inbound").await;
    let id = listed["data"][0]["id"].as_str().unwrap();
    app.post_confirmation(serde_json::json!({
        "inboundEmailId": id,
        "status": "delivered",
    }))
    .await;
    let body = app.get_json("/email/inbound/undelivered").await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn s3_unprocessed_diffs_the_bucket_against_the_database() {
    let app = spawn_app().await;
    // one key already ingested, one not
    let raw = sample_mime("m-known", "a@b.com", "c@d.com", "s", "the body of the message");
    app.mount_object("inbound/m-known", &raw).await;
    app.post_inbound_s3(crate::helpers::s3_event("inbound/m-known")).await;

    let listing = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>inbound-mail</Name>
  <KeyCount>2</KeyCount>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>inbound/m-known</Key>
    <LastModified>2026-07-01T00:00:00.000Z</LastModified>
    <Size>120</Size>
  </Contents>
  <Contents>
    <Key>inbound/m-missing</Key>
    <LastModified>2026-07-01T00:00:00.000Z</LastModified>
    <Size>120</Size>
  </Contents>
</ListBucketResult>"#;
    Mock::given(method("GET"))
        .and(path("/inbound-mail"))
        .and(query_param("list-type", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(listing, "application/xml"))
        .mount(&app.object_store_server)
        .await;

    let body = app.get_json("/email/inbound/s3-unprocessed?maxKeys=10").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["unprocessed"][0], "inbound/m-missing");
}

#[tokio::test]
async fn reparse_repairs_a_row_without_fanning_out_again() {
    let app = spawn_app().await;
    app.seed_healthy_subscriber("helpdesk", serde_json::json!({})).await;
    ingest(&app, "m-reparse", "support@helpdesk.example").await;
    let listed = app.get_json("/email/inbound").await;
    let id = listed["data"][0]["id"].as_str().unwrap().to_string();
    // wreck the parsed projection; raw_data.content still holds the MIME
    sqlx::query("UPDATE inbound_emails SET body_text = '', subject = '' WHERE message_id = 'm-reparse'")
        .execute(&app.pool)
        .await
        .unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{}/email/inbound/{id}/reparse", app.addr))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let (body_text, subject): (String, String) = sqlx::query_as(
        "SELECT body_text, subject FROM inbound_emails WHERE message_id = 'm-reparse'",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert!(body_text.contains("plenty"));
    assert_eq!(subject, "subject m-reparse");

    // exactly the original delivery POST; reparse never fans out
    let posts = app
        .webhook_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method == wiremock::http::Method::POST)
        .count();
    assert_eq!(posts, 1);
    assert_eq!(app.delivery_count().await, 1);
}
