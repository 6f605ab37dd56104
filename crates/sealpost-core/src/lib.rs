//! Core domain + application logic for Sealpost (letters delivered on a future date).
//!
//! This crate is intentionally transport-agnostic. Email / Telegram / SQLite
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod cron;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod letters;
pub mod logging;
pub mod memory;
pub mod ports;
pub mod scheduler;

pub use errors::{Error, Result};
