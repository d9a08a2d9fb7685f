//! ramses_rf: a RAMSES-II packet/message processing stack
//!
//! This library decodes and validates packets from an RF gateway, encodes
//! commands for it, queues outbound commands by priority with flow control,
//! and correlates requests with their responses.
pub mod core;
pub mod discovery;
pub mod protocol;
pub mod transport;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Config, DeviceId, Error, Priority, Result, Verb};
pub use crate::protocol::{parse_line, Command, Message, Qos};
pub use crate::transport::{MessageProtocol, MessageTransport, Subscriber};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
