//! Catch-up reconciler: periodically lists the object store, diffs against
//! the ingested rows, and replays anything the push channel missed. Dedup in
//! `ingest` absorbs the race against notifications arriving mid-run.

use crate::configuration::CatchupSettings;
use crate::configuration::Settings;
use crate::domain::ObjectRecord;
use crate::email_client::EmailClient;
use crate::fanout::FanoutEngine;
use crate::ingest::IngestOutcome;
use crate::ingest::Ingestor;
use crate::object_store::ObjectStoreClient;
use crate::startup::get_connection_pool;
use crate::startup::parse_alert_recipient;
use crate::store::Store;

/// To be run as a separate worker, outside the main API. Builds its own pool
/// and clients; replays go through the same ingestor (and therefore the same
/// dedup and fan-out) as live traffic.
pub async fn init_catchup_worker(cfg: Settings) -> Result<(), anyhow::Error> {
    let store = Store::new(get_connection_pool(&cfg.database));
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
    CatchupScheduler::new(store, object_store, ingestor, cfg.catchup)
        .run_until_stopped()
        .await
}

#[derive(Debug, Default)]
pub struct CatchupReport {
    pub listed: usize,
    pub already_ingested: usize,
    pub replayed: usize,
    pub failed: usize,
}

pub struct CatchupScheduler {
    store: Store,
    object_store: ObjectStoreClient,
    ingestor: Ingestor,
    settings: CatchupSettings,
}

impl CatchupScheduler {
    pub fn new(
        store: Store,
        object_store: ObjectStoreClient,
        ingestor: Ingestor,
        settings: CatchupSettings,
    ) -> Self {
        Self {
            store,
            object_store,
            ingestor,
            settings,
        }
    }

    /// Sleep-loop scheduler. Honors the kill-switch and keeps ticking through
    /// individual run failures.
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        if self.settings.disabled {
            tracing::warn!("catch-up scheduler is disabled by configuration");
            // parked forever rather than returned, so the worker slot in
            // `main`'s select does not read as a crash
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
        loop {
            match self.run_once().await {
                Ok(report) => tracing::info!(
                    listed = report.listed,
                    already_ingested = report.already_ingested,
                    replayed = report.replayed,
                    failed = report.failed,
                    "catch-up run finished"
                ),
                Err(e) => tracing::error!(error.cause_chain = ?e, "catch-up run failed"),
            }
            tokio::time::sleep(self.settings.interval()).await;
        }
    }

    /// One reconciliation pass. Individual replay failures are logged and do
    /// not stop the run.
    #[tracing::instrument(skip_all)]
    pub async fn run_once(&self) -> Result<CatchupReport, anyhow::Error> {
        let keys = self
            .object_store
            .list_keys(self.settings.max_keys(), self.settings.only_last_hours)
            .await?;
        let processed = self.store.processed_object_keys().await?;

        let mut report = CatchupReport {
            listed: keys.len(),
            ..Default::default()
        };
        for key in keys {
            if processed.contains(&key) {
                report.already_ingested += 1;
                continue;
            }
            let record = ObjectRecord {
                bucket: self.object_store.default_bucket().to_string(),
                key: key.clone(),
            };
            match self.ingestor.accept_object_created(std::slice::from_ref(&record)).await {
                Ok(outcomes) => {
                    report.replayed += 1;
                    if let Some(IngestOutcome::ParseFailed { error, .. }) = outcomes.first() {
                        tracing::warn!(key, error.message = %error, "replayed object failed to parse");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(key, error.cause_chain = ?e, "could not replay object");
                }
            }
        }
        Ok(report)
    }
}
