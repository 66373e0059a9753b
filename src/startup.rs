use std::net::TcpListener;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::domain::AlertRecipient;
use crate::email_client::EmailClient;
use crate::fanout::FanoutEngine;
use crate::ingest::Ingestor;
use crate::object_store::ObjectStoreClient;
use crate::routes::delivery_confirmation;
use crate::routes::get_inbound;
use crate::routes::health_check;
use crate::routes::inbound_s3;
use crate::routes::legacy_inbound;
use crate::routes::list_inbound;
use crate::routes::reparse_inbound;
use crate::routes::s3_unprocessed;
use crate::routes::undelivered;
use crate::store::Store;

/// Wrapper for actix's `Server` with access to the bound port (the OS picks
/// one when the configured port is 0, which the test harness relies on).
pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    /// Explicit construction of the whole component graph: pool, store,
    /// object-store gateway, alert mailer, fan-out engine, ingestor — wired
    /// here and nowhere else.
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();

        let pool = get_connection_pool(&cfg.database);
        let store = Store::new(pool);
        let object_store = ObjectStoreClient::new(&cfg.object_store).await;

        let sender = cfg.email_client.sender().map_err(|e| anyhow::anyhow!(e))?;
        let email_client = EmailClient::new(
            cfg.email_client.base_url.clone(),
            sender,
            cfg.email_client.authorization_token.clone(),
            cfg.email_client.timeout(),
        );
        let alert_recipient = parse_alert_recipient(&cfg)?;

        let fanout = FanoutEngine::new(store.clone(), email_client, alert_recipient);
        let ingestor = Ingestor::new(store.clone(), object_store.clone(), fanout);

        let server = run(listener, store, object_store, ingestor)?;
        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Because this consumes `self`, this should be the final function call
    /// (or passed to `tokio::spawn`)
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

pub fn parse_alert_recipient(cfg: &Settings) -> Result<Option<AlertRecipient>, anyhow::Error> {
    cfg.fanout
        .timeout_alert_email
        .clone()
        .filter(|address| !address.is_empty())
        .map(AlertRecipient::parse)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))
}

/// Declares all API endpoints. The server is not responsible for binding; it
/// listens on an already bound address.
pub fn run(
    listener: TcpListener,
    store: Store,
    object_store: ObjectStoreClient,
    ingestor: Ingestor,
) -> Result<Server, anyhow::Error> {
    let store = Data::new(store);
    let object_store = Data::new(object_store);
    let ingestor = Data::new(ingestor);
    // for the SubscribeURL confirmation GET
    let http_client = Data::new(reqwest::Client::new());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            // raw MIME arrives inline in push notifications; the default 256 KiB
            // payload cap is far too small for that
            .app_data(web::PayloadConfig::new(10 * 1024 * 1024))
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/email")
                    .route("/inbound", web::post().to(legacy_inbound))
                    .route("/inbound", web::get().to(list_inbound))
                    .route("/inbound/s3", web::post().to(inbound_s3))
                    .route(
                        "/inbound/delivery-confirmation",
                        web::post().to(delivery_confirmation),
                    )
                    // literal segments must be declared before `{id}`
                    .route("/inbound/undelivered", web::get().to(undelivered))
                    .route("/inbound/s3-unprocessed", web::get().to(s3_unprocessed))
                    .route("/inbound/{id}", web::get().to(get_inbound))
                    .route("/inbound/{id}/reparse", web::post().to(reparse_inbound)),
            )
            .app_data(store.clone())
            .app_data(object_store.clone())
            .app_data(ingestor.clone())
            .app_data(http_client.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}
