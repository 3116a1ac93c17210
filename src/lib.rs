#![forbid(unsafe_code)]

//! `relaybot` answers `WhatsApp` questions through a queued, resource-aware
//! worker pipeline backed by pooled `SQLite` persistence.

pub mod config;
pub mod errors;
pub mod generator;
pub mod ingress;
pub mod models;
pub mod monitor;
pub mod notifier;
pub mod orchestrator;
pub mod persistence;
pub mod queue;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
