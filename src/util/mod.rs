//! Utility module
//!
//! This module provides common utilities and helper functions used
//! throughout the library.

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing_subscriber::EnvFilter;

/// Encodes a date-time as the 12 hex digits of its `yymmddHHMMSS` digits read
/// as one decimal number
pub fn dts_to_hex(dtm: NaiveDateTime) -> String {
    let fields = [
        dtm.year().rem_euclid(100) as u64,
        u64::from(dtm.month()),
        u64::from(dtm.day()),
        u64::from(dtm.hour()),
        u64::from(dtm.minute()),
        u64::from(dtm.second()),
    ];
    let value = fields.iter().fold(0u64, |acc, field| acc * 100 + field);
    format!("{:012X}", value)
}

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`
///
/// Does nothing if a subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
