//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Answer generation failure (collaborator call or bad response).
    Generation(String),
    /// Outbound message delivery failure.
    Notify(String),
    /// Webhook payload or HTTP server failure.
    Ingress(String),
    /// Generation executor failure (task panicked or runtime unavailable).
    Executor(String),
    /// Resource sampling failure.
    Monitor(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Generation(msg) => write!(f, "generation: {msg}"),
            Self::Notify(msg) => write!(f, "notify: {msg}"),
            Self::Ingress(msg) => write!(f, "ingress: {msg}"),
            Self::Executor(msg) => write!(f, "executor: {msg}"),
            Self::Monitor(msg) => write!(f, "monitor: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
