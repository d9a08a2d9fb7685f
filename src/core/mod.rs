//! Core types for the RAMSES-II stack
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{Address, Code, Config, DeviceId, Priority, Verb};

/// Source address of commands sent via an HGI80-compatible gateway
pub const HGI_DEV_ID: &str = "18:000730";

/// Address used for broadcasts that target no particular device
pub const NUL_DEV_ID: &str = "63:262142";

/// Maximum payload length of a command, in hex digits
pub const MAX_PAYLOAD_HEX: usize = 48;

/// Default capacity of the dispatch queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Default high-water mark for write flow control
pub const DEFAULT_WRITE_BUFFER_HIGH: usize = 10;

/// Maximum subscribers attached to one transport
pub const MAX_SUBSCRIBERS: usize = 3;

/// 80% of a high-water mark, rounded down
pub fn default_low_water_mark(high: usize) -> usize {
    high / 10 * 8 + high % 10 * 8 / 10
}

/// Whether `s` is made only of `0-9A-F`
pub fn is_upper_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}
