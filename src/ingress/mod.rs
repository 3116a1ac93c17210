//! Inbound HTTP surface feeding the request queue.

pub mod webhook;

pub use webhook::{router, serve, serve_listener, WebhookState};
