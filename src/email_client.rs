use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;

use crate::domain::AlertRecipient;

/// Client for the transactional-mail API (Postmark-shaped). The pipeline uses
/// it for exactly one thing: out-of-band operator alerts when a subscriber
/// starts timing out.
#[derive(Clone)]
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: AlertRecipient,
    authorization_token: Secret<String>,
}

// establishing a HTTP connection is expensive; one Client is built at startup
// and cloned (it is an Arc internally)

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: AlertRecipient,
        authorization_token: Secret<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("could not build the email http client"),
            base_url,
            sender,
            authorization_token,
        }
    }

    #[tracing::instrument(skip(self, text_body))]
    pub async fn send_email(
        &self,
        recipient: &AlertRecipient,
        subject: &str,
        text_body: &str,
    ) -> Result<(), reqwest::Error> {
        let url = format!("{}/email", self.base_url);
        let body = SendEmailRequest {
            from: self.sender.as_ref(),
            to: recipient.as_ref(),
            subject,
            text_body,
        };
        self.http_client
            .post(&url)
            .header("X-Postmark-Server-Token", self.authorization_token.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
}
