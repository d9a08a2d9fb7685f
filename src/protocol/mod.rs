//! RAMSES-II protocol implementation module
//!
//! This module defines the command codec, the line decoder, and the static
//! code, device and zone tables consulted when validating traffic.

pub mod codec;
pub mod command;
pub mod devices;
pub mod message;
pub mod schema;

pub use self::codec::{decode, LineCodec};
pub use self::command::{Command, Qos};
pub use self::devices::{DeviceClass, ZoneClass};
pub use self::message::{validate, Header, Message, Packet};
pub use self::schema::CodeSchema;

use std::time::SystemTime;

/// Decodes and validates a raw line in one step, keeping only valid messages
pub fn parse_line(raw_line: &str, arrival: SystemTime) -> Option<Message> {
    decode(raw_line, arrival)
        .map(validate)
        .filter(Message::is_valid)
}
