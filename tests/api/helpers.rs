use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mail_fanout::configuration::get_configuration;
use mail_fanout::configuration::DatabaseSettings;
use mail_fanout::startup::get_connection_pool;
use mail_fanout::startup::Application;
use mail_fanout::telemetry::get_subscriber;
use mail_fanout::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// Init the tracing subscriber once only. Opt in to verbose logging with
/// `TEST_LOG=true cargo test | bunyan`.
static TRACING: Lazy<()> = Lazy::new(|| {
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

pub struct TestApp {
    pub addr: String,
    pub pool: PgPool,
    /// Plays the downstream webhook subscribers
    pub webhook_server: MockServer,
    /// Plays the transactional-mail API (operator alerts)
    pub email_server: MockServer,
    /// Plays the object store (path-style S3)
    pub object_store_server: MockServer,
}

/// Spawn the full application against a randomised per-test database and
/// three mock collaborators: the subscriber endpoint, the alert-mail API and
/// the object store.
pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let webhook_server = MockServer::start().await;
    let email_server = MockServer::start().await;
    let object_store_server = MockServer::start().await;

    // the S3 SDK signs every request; static test credentials satisfy it
    std::env::set_var("AWS_ACCESS_KEY_ID", "test-access-key");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test-secret-key");

    let cfg = {
        let mut cfg = get_configuration().expect("could not read configuration");
        cfg.database.database_name = Uuid::new_v4().to_string();
        cfg.application.port = 0;
        cfg.email_client.base_url = email_server.uri();
        cfg.object_store.endpoint = Some(object_store_server.uri());
        cfg.object_store.bucket = "inbound-mail".to_string();
        cfg.object_store.key_prefix = "inbound/".to_string();
        cfg.fanout.timeout_alert_email = Some("ops@example.com".to_string());
        cfg.catchup.disabled = true;
        cfg
    };
    configure_database(&cfg.database).await;

    let app = Application::build(cfg.clone()).await.expect("could not build application");
    let addr = format!("http://127.0.0.1:{}", app.get_port());
    let pool = get_connection_pool(&cfg.database);
    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        pool,
        webhook_server,
        email_server,
        object_store_server,
    }
}

async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    let mut conn = PgConnection::connect_with(&cfg.connection_without_db())
        .await
        .expect("postgres must be running; run scripts/init_db.sh");
    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .expect("could not create test database");

    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!().run(&pool).await.expect("failed to migrate");
    pool
}

impl TestApp {
    pub async fn post_inbound_s3(
        &self,
        body: serde_json::Value,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/email/inbound/s3", self.addr))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post_confirmation(
        &self,
        body: serde_json::Value,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/email/inbound/delivery-confirmation", self.addr))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn get_json(
        &self,
        path_and_query: &str,
    ) -> serde_json::Value {
        reqwest::Client::new()
            .get(format!("{}{}", self.addr, path_and_query))
            .send()
            .await
            .expect("request failed")
            .json()
            .await
            .expect("response was not json")
    }

    /// Register a subscription row. The admin interface that normally owns
    /// these is out of scope, so tests write the row directly.
    pub async fn seed_subscription(
        &self,
        service_name: &str,
        webhook_url: &str,
        filters: serde_json::Value,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO webhook_subscriptions (id, service_name, webhook_url, filters)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(service_name)
        .bind(webhook_url)
        .bind(filters)
        .execute(&self.pool)
        .await
        .expect("could not seed subscription");
        id
    }

    /// A subscriber that answers its health probe and accepts deliveries;
    /// returns the subscription id.
    pub async fn seed_healthy_subscriber(
        &self,
        service_name: &str,
        filters: serde_json::Value,
    ) -> Uuid {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.webhook_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/email/inbound"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.webhook_server)
            .await;
        let url = format!("{}/api/email/inbound", self.webhook_server.uri());
        self.seed_subscription(service_name, &url, filters).await
    }

    /// Serve `raw` as the object body for `key` in the default test bucket.
    pub async fn mount_object(
        &self,
        key: &str,
        raw: &[u8],
    ) {
        Mock::given(method("GET"))
            .and(path(format!("/inbound-mail/{key}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(raw.to_vec()))
            .mount(&self.object_store_server)
            .await;
    }

    pub async fn subscription_row(
        &self,
        id: Uuid,
    ) -> SubscriptionState {
        sqlx::query_as::<_, SubscriptionState>(
            "SELECT status, total_deliveries, total_failures, retry_count,
                    delivery_timeout_ms, last_error
             FROM webhook_subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .expect("subscription row missing")
    }

    pub async fn inbound_count(&self) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM inbound_emails")
            .fetch_one(&self.pool)
            .await
            .unwrap();
        count
    }

    pub async fn delivery_count(&self) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM webhook_deliveries")
            .fetch_one(&self.pool)
            .await
            .unwrap();
        count
    }
}

#[derive(sqlx::FromRow)]
pub struct SubscriptionState {
    pub status: String,
    pub total_deliveries: i64,
    pub total_failures: i64,
    pub retry_count: i32,
    pub delivery_timeout_ms: i64,
    pub last_error: Option<String>,
}

/// A small but realistic single-part message.
pub fn sample_mime(
    message_id: &str,
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{message_id}>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}",
    )
    .into_bytes()
}

/// A push notification with the raw MIME inline (base64).
pub fn push_notification(
    message_id: &str,
    raw_mime: &[u8],
) -> serde_json::Value {
    serde_json::json!({
        "notificationType": "Received",
        "mail": {
            "messageId": message_id,
            "destination": ["fallback@helpdesk.example"],
        },
        "content": BASE64.encode(raw_mime),
    })
}

/// An object-created event for one key in the default test bucket.
pub fn s3_event(key: &str) -> serde_json::Value {
    serde_json::json!({
        "Records": [
            { "s3": { "bucket": { "name": "inbound-mail" },
                      "object": { "key": key } } },
        ]
    })
}
