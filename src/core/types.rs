use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// A RAMSES-II device identifier, `TT:NNNNNN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId {
    kind: u8,
    serial: u32,
}

impl DeviceId {
    /// The conventional address of an HGI80-compatible gateway
    pub const HGI: DeviceId = DeviceId { kind: 18, serial: 730 };

    /// The null device, target of broadcasts
    pub const NUL: DeviceId = DeviceId { kind: 63, serial: 262_142 };

    /// Creates a device id from its type and serial number
    pub fn new(kind: u8, serial: u32) -> Result<Self> {
        if kind > 99 || serial > 999_999 {
            return Err(Error::invalid_command(format!(
                "device id out of range: {}:{}",
                kind, serial
            )));
        }
        Ok(DeviceId { kind, serial })
    }

    /// The two-digit device type, e.g. `01` for a controller
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// The six-digit serial number
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 9
            && bytes[2] == b':'
            && bytes[..2].iter().all(u8::is_ascii_digit)
            && bytes[3..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(Error::invalid_command(format!("invalid device id: {:?}", s)));
        }

        let kind = s[..2]
            .parse::<u8>()
            .map_err(|e| Error::invalid_command(format!("invalid device type in {:?}: {}", s, e)))?;
        let serial = s[3..]
            .parse::<u32>()
            .map_err(|e| Error::invalid_command(format!("invalid serial in {:?}: {}", s, e)))?;

        Ok(DeviceId { kind, serial })
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:06}", self.kind, self.serial)
    }
}

/// One of the three address slots of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// A real device
    Device(DeviceId),
    /// An unused slot, `--:------`
    Empty,
}

impl Address {
    /// Wire form of an unused address slot
    pub const EMPTY: &'static str = "--:------";

    /// Returns the device id, if the slot is used
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Address::Device(id) => Some(*id),
            Address::Empty => None,
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == Self::EMPTY {
            Ok(Address::Empty)
        } else {
            s.parse().map(Address::Device)
        }
    }
}

impl From<DeviceId> for Address {
    fn from(id: DeviceId) -> Self {
        Address::Device(id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Device(id) => id.fmt(f),
            Address::Empty => f.write_str(Self::EMPTY),
        }
    }
}

/// Message direction/kind marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    /// ` I`: unsolicited information
    Info,
    /// ` W`: write
    Write,
    /// `RQ`: request
    Request,
    /// `RP`: response
    Response,
}

impl Verb {
    /// All verbs, in wire order
    pub const ALL: [Verb; 4] = [Verb::Info, Verb::Request, Verb::Response, Verb::Write];

    /// The fixed two-character wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Info => " I",
            Verb::Write => " W",
            Verb::Request => "RQ",
            Verb::Response => "RP",
        }
    }

    /// Parses the exact two-character wire form
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            " I" => Some(Verb::Info),
            " W" => Some(Verb::Write),
            "RQ" => Some(Verb::Request),
            "RP" => Some(Verb::Response),
            _ => None,
        }
    }

    /// The verb a device answers this one with, if any
    pub fn complement(&self) -> Option<Verb> {
        match self {
            Verb::Request => Some(Verb::Response),
            Verb::Write => Some(Verb::Info),
            Verb::Info | Verb::Response => None,
        }
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "I" => Ok(Verb::Info),
            "W" => Ok(Verb::Write),
            "RQ" => Ok(Verb::Request),
            "RP" => Ok(Verb::Response),
            _ => Err(Error::invalid_command(format!("invalid verb: {:?}", s))),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 4-hex-digit message code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(pub u16);

impl FromStr for Code {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 4 || !super::is_upper_hex(s) {
            return Err(Error::invalid_command(format!("invalid code: {:?}", s)));
        }
        u16::from_str_radix(s, 16)
            .map(Code)
            .map_err(|e| Error::invalid_command(format!("invalid code {:?}: {}", s, e)))
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Dispatch priority; `High` is sent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

impl Priority {
    /// Tier index, 0 for `High`
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Configuration for a gateway/transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source address stamped on every command we send
    pub gateway_id: DeviceId,
    /// Maximum number of queued commands
    pub queue_capacity: usize,
    /// Suspend producers on a full queue instead of failing fast
    pub block_when_full: bool,
    /// Queue depth at which producers are told to pause
    pub write_buffer_high: usize,
    /// Queue depth at which producers are told to resume
    pub write_buffer_low: Option<usize>,
    /// Log and discard every write
    pub disable_sending: bool,
    /// Maximum number of subscribers per transport
    pub max_subscribers: usize,
    /// Correlation deadline for requests
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub default_timeout: Duration,
    /// Interval between device polls
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gateway_id: DeviceId::HGI,
            queue_capacity: super::DEFAULT_QUEUE_CAPACITY,
            block_when_full: true,
            write_buffer_high: super::DEFAULT_WRITE_BUFFER_HIGH,
            write_buffer_low: None,
            disable_sending: false,
            max_subscribers: super::MAX_SUBSCRIBERS,
            default_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// The effective low-water mark, 80% of the high-water mark unless set
    pub fn low_water_mark(&self) -> usize {
        self.write_buffer_low
            .unwrap_or_else(|| super::default_low_water_mark(self.write_buffer_high))
    }

    /// Checks the settings are mutually consistent
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be non-zero"));
        }
        if self.queue_capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::config(format!(
                "queue_capacity ({}) exceeds {}",
                self.queue_capacity,
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        if self.low_water_mark() > self.write_buffer_high {
            return Err(Error::config(format!(
                "write_buffer_low ({}) exceeds write_buffer_high ({})",
                self.low_water_mark(),
                self.write_buffer_high
            )));
        }
        if self.max_subscribers == 0 {
            return Err(Error::config("max_subscribers must be non-zero"));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::config("default_timeout must be non-zero"));
        }
        Ok(())
    }
}
