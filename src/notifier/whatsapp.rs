//! `WhatsApp` Cloud API text-message sender.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::Notifier;
use crate::config::WhatsAppConfig;
use crate::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST /{phone_number_id}/messages` for a plain text reply.
#[derive(Debug, Serialize)]
pub(crate) struct TextMessage<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    preview_url: bool,
    body: &'a str,
}

impl<'a> TextMessage<'a> {
    pub(crate) fn new(recipient: &'a str, body: &'a str) -> Self {
        Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: recipient,
            kind: "text",
            text: TextBody {
                preview_url: false,
                body,
            },
        }
    }
}

/// [`Notifier`] posting replies through the Graph API.
pub struct WhatsAppNotifier {
    http: reqwest::Client,
    messages_url: String,
    access_token: String,
}

impl WhatsAppNotifier {
    /// Build a notifier for the configured business phone number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if the HTTP client cannot be built.
    pub fn new(config: &WhatsAppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Notify(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            messages_url: messages_url(&config.endpoint, &config.phone_number_id),
            access_token: config.access_token.clone(),
        })
    }

    async fn post(&self, message: &str, recipient: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&TextMessage::new(recipient, message))
            .send()
            .await
            .map_err(|err| AppError::Notify(format!("failed to send message: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notify(format!(
                "message rejected with {status}: {body}"
            )));
        }

        info!(recipient, "answer sent");
        Ok(())
    }
}

impl Notifier for WhatsAppNotifier {
    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.post(message, recipient))
    }
}

fn messages_url(endpoint: &str, phone_number_id: &str) -> String {
    format!("{}/{phone_number_id}/messages", endpoint.trim_end_matches('/'))
}
