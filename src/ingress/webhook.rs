//! `WhatsApp` Cloud API webhook.
//!
//! `GET /webhook` answers the subscription handshake, `POST /webhook` turns
//! inbound text messages into [`WorkItem`]s on the shared queue, and
//! `GET /health` reports liveness with the current queue length. Delivery
//! acknowledgements are always `200` so the platform never redelivers; the
//! answer goes out later from the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::WorkItem;
use crate::queue::RequestQueue;
use crate::{AppError, Result};

/// Shared state handed to every webhook handler.
#[derive(Clone)]
pub struct WebhookState {
    queue: RequestQueue,
    verify_token: Arc<str>,
}

impl WebhookState {
    /// Build handler state around the shared queue and handshake secret.
    #[must_use]
    pub fn new(queue: RequestQueue, verify_token: impl Into<Arc<str>>) -> Self {
        Self {
            queue,
            verify_token: verify_token.into(),
        }
    }
}

/// Query parameters of the subscription handshake.
#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<InboundMessage>,
    #[serde(default)]
    statuses: Vec<serde_json::Value>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    from: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

/// What one notification payload carried.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// A text message worth answering.
    Text { from: String, body: String },
    /// A message of another type (image, audio, reaction, ...).
    Unsupported { from: String, kind: String },
    /// Delivery statuses or platform errors only.
    Housekeeping,
}

/// Pull the first message out of `entry[0].changes[0].value`.
///
/// Statuses and errors are logged here; they never produce work.
pub(crate) fn parse_notification(body: &[u8]) -> Result<Inbound> {
    let notification: Notification = serde_json::from_slice(body)
        .map_err(|err| AppError::Ingress(format!("invalid notification payload: {err}")))?;

    let value = notification
        .entry
        .into_iter()
        .next()
        .and_then(|entry| entry.changes.into_iter().next())
        .map(|change| change.value)
        .ok_or_else(|| AppError::Ingress("notification has no changes".into()))?;

    if !value.errors.is_empty() {
        warn!(errors = ?value.errors, "notification carried errors");
    }
    if let Some(status) = value.statuses.first() {
        debug!(
            status = status.get("status").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "message status update"
        );
    }

    let Some(message) = value.messages.into_iter().next() else {
        return Ok(Inbound::Housekeeping);
    };
    match (message.kind.as_str(), message.text) {
        ("text", Some(text)) => Ok(Inbound::Text {
            from: message.from,
            body: text.body,
        }),
        _ => Ok(Inbound::Unsupported {
            from: message.from,
            kind: message.kind,
        }),
    }
}

async fn verify(State(state): State<WebhookState>, Query(params): Query<VerifyParams>) -> Response {
    let token_matches = !state.verify_token.is_empty()
        && params.verify_token.as_deref() == Some(&*state.verify_token);
    if params.mode.as_deref() == Some("subscribe") && token_matches {
        info!("webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
    } else {
        warn!(mode = ?params.mode, "webhook verification failed; tokens do not match");
        (
            StatusCode::BAD_REQUEST,
            "Webhook verification tokens do not match.",
        )
            .into_response()
    }
}

async fn receive(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    match parse_notification(&body) {
        Ok(Inbound::Text { from, body }) => {
            let item = WorkItem::new(from, body);
            info!(item_id = %item.id, sender_id = %item.sender_id, "text message received");
            state.queue.enqueue(item);
        }
        Ok(Inbound::Unsupported { from, kind }) => {
            info!(sender_id = %from, kind, "ignoring non-text message");
        }
        Ok(Inbound::Housekeeping) => {}
        Err(err) => warn!(%err, "error processing webhook notification"),
    }
    StatusCode::OK
}

async fn health(State(state): State<WebhookState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "queue_length": state.queue.len(),
    }))
}

/// Build the webhook router.
#[must_use]
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind `addr` and serve the webhook until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Ingress` if the listener cannot bind or the server
/// fails.
pub async fn serve(state: WebhookState, addr: SocketAddr, ct: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Ingress(format!("failed to bind webhook on {addr}: {err}")))?;
    serve_listener(listener, state, ct).await
}

/// Serve the webhook on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Ingress` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    state: WebhookState,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "webhook listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Ingress(format!("webhook server error: {err}")))?;

    info!("webhook shut down");
    Ok(())
}
