use crate::helpers::spawn_app;

#[tokio::test]
async fn health_check_returns_200_with_no_body() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .get(format!("{}/health_check", app.addr))
        .send()
        .await
        .expect("request failed");

    assert!(resp.status().is_success());
    assert_eq!(resp.content_length(), Some(0));
}
