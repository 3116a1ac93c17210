//! Chat-completion answer generator for `OpenAI`-compatible APIs.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::AnswerGenerator;
use crate::config::OpenAiConfig;
use crate::models::HistoryEntry;
use crate::{AppError, Result};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct ChatMessage {
    pub(crate) role: &'static str,
    pub(crate) content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Build the message list: system prompt, prior turns oldest first, then
/// the new query.
pub(crate) fn build_messages(
    system_prompt: &str,
    query: &str,
    history: &[HistoryEntry],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage {
        role: "system",
        content: system_prompt.to_owned(),
    });
    for entry in history {
        messages.push(ChatMessage {
            role: "user",
            content: entry.query.clone(),
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: entry.answer.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: query.to_owned(),
    });
    messages
}

/// [`AnswerGenerator`] backed by `POST {endpoint}/chat/completions`.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    /// Build a generator with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Generation` if the HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| AppError::Generation(format!("failed to build http client: {err}")))?;
        Ok(Self { http, config })
    }

    async fn complete(&self, query: &str, history: &[HistoryEntry]) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: build_messages(&self.config.system_prompt, query, history),
        };
        debug!(model = %self.config.model, turns = history.len(), "requesting chat completion");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| AppError::Generation(format!("chat completion request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation(format!(
                "chat completion returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| AppError::Generation(format!("invalid chat completion body: {err}")))?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Generation("chat completion had no content".into()))?;

        info!("chat completion generated");
        Ok(answer)
    }
}

impl AnswerGenerator for OpenAiGenerator {
    fn generate<'a>(
        &'a self,
        query: &'a str,
        history: &'a [HistoryEntry],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.complete(query, history))
    }
}
