//! Core of the update-ingestion loop for Telegram-style bot platforms.
//!
//! This crate is intentionally transport-agnostic. The Bot API client lives
//! behind the [`ports::UpdateSource`] port and is implemented in adapter crates.

pub mod backoff;
pub mod bot;
pub mod classify;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod poller;
pub mod ports;
pub mod sinks;
pub mod types;
pub mod update;

pub use errors::{Error, Result};
