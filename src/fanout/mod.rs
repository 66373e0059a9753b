//! Subscription fan-out: one concurrent delivery attempt per active
//! subscription, with health probing, exponential backoff, adaptive timeouts
//! and per-delivery bookkeeping.

mod health;
mod payload;

pub use health::backoff_delay;
pub use health::derive_health_url;
pub use payload::WebhookPayload;
pub use payload::RAW_CONTENT_MAX_BYTES;

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::domain::AlertRecipient;
use crate::domain::RawHeader;
use crate::email_client::EmailClient;
use crate::store::InboundEmailRow;
use crate::store::Store;
use crate::store::SubscriptionRow;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const AUTO_RESUME_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure classification for one attempt. Never fatal: failures end up in
/// subscription counters, not in a propagated error.
#[derive(thiserror::Error, Debug)]
pub enum AttemptError {
    #[error("delivery timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint returned HTTP {0}")]
    Http(u16),
}

#[derive(Debug)]
pub enum AttemptOutcome {
    /// Filters did not match; nothing was sent, nothing was counted
    Filtered,
    /// Health probe failed; skipped without penalty
    ProbeSkipped,
    Delivered { http_status: u16 },
    Failed { error: AttemptError },
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub subscriptions: usize,
    pub delivered: usize,
    pub failed: usize,
    pub filtered: usize,
    pub probe_skipped: usize,
}

#[derive(Clone)]
pub struct FanoutEngine {
    store: Store,
    http_client: Client,
    email_client: EmailClient,
    alert_recipient: Option<AlertRecipient>,
}

impl FanoutEngine {
    pub fn new(
        store: Store,
        email_client: EmailClient,
        alert_recipient: Option<AlertRecipient>,
    ) -> Self {
        Self {
            store,
            // per-attempt timeouts are set on each request; the client itself
            // stays unbounded
            http_client: Client::new(),
            email_client,
            alert_recipient,
        }
    }

    /// Deliver one inbound email to every matching active subscription, in
    /// parallel. Returns once every attempt has finished.
    #[tracing::instrument(skip_all, fields(inbound_email_id = %email.id))]
    pub async fn deliver_to_subscriptions(
        &self,
        email: &InboundEmailRow,
        raw_headers: Option<Vec<RawHeader>>,
    ) -> Result<FanoutReport, sqlx::Error> {
        let subscriptions = self.store.list_active_subscriptions().await?;
        let payload = WebhookPayload::assemble(email, raw_headers);

        let mut attempts = JoinSet::new();
        let mut report = FanoutReport {
            subscriptions: subscriptions.len(),
            ..Default::default()
        };
        for subscription in subscriptions {
            let engine = self.clone();
            let payload = payload.clone();
            attempts.spawn(async move { engine.attempt_delivery(&subscription, &payload).await });
        }
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(AttemptOutcome::Delivered { .. }) => report.delivered += 1,
                Ok(AttemptOutcome::Failed { .. }) => report.failed += 1,
                Ok(AttemptOutcome::Filtered) => report.filtered += 1,
                Ok(AttemptOutcome::ProbeSkipped) => report.probe_skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(error.cause_chain = ?e, "delivery attempt panicked");
                }
            }
        }
        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            filtered = report.filtered,
            probe_skipped = report.probe_skipped,
            "fan-out finished"
        );
        Ok(report)
    }

    #[tracing::instrument(
        skip_all,
        fields(subscription_id = %subscription.id, service = %subscription.service_name)
    )]
    async fn attempt_delivery(
        &self,
        subscription: &SubscriptionRow,
        payload: &WebhookPayload,
    ) -> AttemptOutcome {
        if !subscription
            .filters
            .0
            .matches(&payload.to, &payload.from, &payload.subject)
        {
            return AttemptOutcome::Filtered;
        }

        if !self.probe_health(&subscription.webhook_url).await {
            tracing::info!("health probe failed; attempt skipped without penalty");
            return AttemptOutcome::ProbeSkipped;
        }

        if subscription.retry_count > 0 {
            tokio::time::sleep(backoff_delay(subscription.retry_count)).await;
        }

        let timeout = Duration::from_millis(subscription.delivery_timeout_ms.max(1) as u64);
        let result = self
            .http_client
            .post(&subscription.webhook_url)
            .timeout(timeout)
            .header("X-Notification-Service", "notifications-microservice")
            .header("X-Subscription-Id", subscription.id.to_string())
            .json(&payload.envelope(subscription.id))
            .send()
            .await;

        let error = match result {
            Ok(response) if response.status().is_success() => {
                let http_status = response.status().as_u16();
                self.record_success(subscription, payload.id, http_status).await;
                return AttemptOutcome::Delivered { http_status };
            }
            Ok(response) => AttemptError::Http(response.status().as_u16()),
            Err(e) => classify_send_error(&e),
        };
        self.record_failure(subscription, &error).await;
        AttemptOutcome::Failed { error }
    }

    /// Non-200 (or unreachable) within 5 s means "not ready"; an URL without
    /// a recognisable tail has no probe and proceeds directly.
    async fn probe_health(
        &self,
        webhook_url: &str,
    ) -> bool {
        let Some(health_url) = derive_health_url(webhook_url) else {
            return true;
        };
        match self
            .http_client
            .get(&health_url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    async fn record_success(
        &self,
        subscription: &SubscriptionRow,
        inbound_email_id: Uuid,
        http_status: u16,
    ) {
        if let Err(e) = self.store.record_delivery_success(subscription.id).await {
            tracing::error!(error.cause_chain = ?e, "could not update subscription counters");
        }
        if let Err(e) = self
            .store
            .insert_delivery(inbound_email_id, subscription.id, i32::from(http_status))
            .await
        {
            tracing::error!(error.cause_chain = ?e, "could not record delivery row");
        }
    }

    async fn record_failure(
        &self,
        subscription: &SubscriptionRow,
        error: &AttemptError,
    ) {
        tracing::warn!(error.message = %error, "delivery attempt failed");
        if let AttemptError::Timeout(_) = error {
            self.widen_timeout_and_alert(subscription).await;
        }
        let message = error.to_string();
        if let Err(e) = self
            .store
            .record_delivery_failure(subscription.id, &message, is_ssl_error(&message))
            .await
        {
            tracing::error!(error.cause_chain = ?e, "could not update subscription counters");
        }
    }

    /// Timeouts widen the adaptive window and page the operator; the
    /// subscription itself is never auto-suspended.
    async fn widen_timeout_and_alert(
        &self,
        subscription: &SubscriptionRow,
    ) {
        let widened = match self.store.widen_delivery_timeout(subscription.id).await {
            Ok(widened) => widened,
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, "could not widen delivery timeout");
                subscription.delivery_timeout_ms
            }
        };
        tracing::warn!(
            previous_ms = subscription.delivery_timeout_ms,
            widened_ms = widened,
            "delivery timeout widened"
        );
        let Some(recipient) = &self.alert_recipient else {
            return;
        };
        let subject = format!("Webhook delivery timeout: {}", subscription.service_name);
        let body = format!(
            "Delivery to {} ({}) timed out after {} ms.\n\
             The delivery timeout has been widened to {} ms.\n\
             The subscription remains active.",
            subscription.service_name,
            subscription.webhook_url,
            subscription.delivery_timeout_ms,
            widened,
        );
        if let Err(e) = self.email_client.send_email(recipient, &subject, &body).await {
            tracing::error!(error.cause_chain = ?e, "could not send timeout alert email");
        }
    }

    /// One auto-resume pass: every suspended subscription idle for at least an
    /// hour gets a synthetic `health.check` POST; a 2xx flips it back to
    /// active.
    #[tracing::instrument(skip_all)]
    pub async fn run_auto_resume_pass(&self) -> Result<usize, sqlx::Error> {
        let candidates = self.store.list_suspended_ready_for_probe().await?;
        let mut resumed = 0;
        for subscription in candidates {
            let body = json!({
                "event": "health.check",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            let outcome = self
                .http_client
                .post(&subscription.webhook_url)
                .timeout(AUTO_RESUME_TIMEOUT)
                .json(&body)
                .send()
                .await;
            match outcome {
                Ok(response) if response.status().is_success() => {
                    self.store.resume_subscription(subscription.id).await?;
                    resumed += 1;
                    tracing::info!(
                        subscription_id = %subscription.id,
                        "suspended subscription resumed"
                    );
                }
                _ => tracing::info!(
                    subscription_id = %subscription.id,
                    "suspended subscription still unhealthy"
                ),
            }
        }
        Ok(resumed)
    }
}

/// To be run as a separate worker, outside the main API: hourly auto-resume
/// passes over suspended subscriptions.
pub async fn init_auto_resume_worker(
    cfg: crate::configuration::Settings,
) -> Result<(), anyhow::Error> {
    let store = Store::new(crate::startup::get_connection_pool(&cfg.database));
    let sender = cfg.email_client.sender().map_err(|e| anyhow::anyhow!(e))?;
    let email_client = EmailClient::new(
        cfg.email_client.base_url.clone(),
        sender,
        cfg.email_client.authorization_token.clone(),
        cfg.email_client.timeout(),
    );
    let alert_recipient = crate::startup::parse_alert_recipient(&cfg)?;
    let engine = FanoutEngine::new(store, email_client, alert_recipient);
    loop {
        match engine.run_auto_resume_pass().await {
            Ok(resumed) if resumed > 0 => tracing::info!(resumed, "auto-resume pass finished"),
            Ok(_) => {}
            Err(e) => tracing::error!(error.cause_chain = ?e, "auto-resume pass failed"),
        }
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

fn classify_send_error(e: &reqwest::Error) -> AttemptError {
    let message = error_chain_string(e);
    match e.is_timeout() || is_timeout_message(&message) {
        true => AttemptError::Timeout(message),
        false => AttemptError::Transport(message),
    }
}

/// Flatten the full source chain: reqwest's outer message rarely names the
/// TLS or timeout root cause.
fn error_chain_string(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut current = e.source();
    while let Some(cause) = current {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        current = cause.source();
    }
    message
}

fn is_timeout_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out") || lower.contains("etimedout")
}

fn is_ssl_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate")
}
