//! Multi-packet requests to a controller
//!
//! The fault log (`0418`) and zone schedules (`0404`) are both read one
//! packet at a time, each fragment requested only after the previous one
//! has been answered.

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::core::{is_upper_hex, Code, DeviceId, Error, Result, Verb};
use crate::protocol::Command;
use crate::transport::MessageTransport;

/// Number of entries a controller keeps in its fault log
pub const FAULT_LOG_SIZE: u8 = 0x40;

/// Body of an unused fault log slot, after the `0000<idx>` prefix
const NULL_FAULT_BODY: &str = "B0000000000000000000007FFFFF7000000000";

/// Hex characters of schedule data carried by each written fragment
pub const SCHEDULE_CHUNK_HEX: usize = 34;

/// One slot of a controller's fault log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultLogEntry {
    pub log_idx: u8,
    /// The raw `0418` response payload
    pub payload: String,
    /// When the controller answered
    #[serde(serialize_with = "crate::core::serde::serialize_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_time")]
    pub received: SystemTime,
}

impl FaultLogEntry {
    /// An unused slot; the log holds no entries past it
    pub fn is_null(&self) -> bool {
        self.payload.get(6..) == Some(NULL_FAULT_BODY)
    }
}

/// A zone schedule as opaque hex fragments, in the order they are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(serialize_with = "crate::core::serde::serialize_hex_byte")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_hex_byte")]
    pub zone_idx: u8,
    pub schedule: Vec<String>,
}

impl Schedule {
    pub fn from_json(json: &str) -> Result<Self> {
        let schedule: Schedule = serde_json::from_str(json)?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The fragments joined into one hex string
    pub fn data(&self) -> String {
        self.schedule.concat()
    }

    fn validate(&self) -> Result<()> {
        let data = self.data();
        if data.is_empty() {
            return Err(Error::schedule(format!("zone {:02X}: schedule is empty", self.zone_idx)));
        }
        if data.len() % 2 != 0 || !is_upper_hex(&data) {
            return Err(Error::schedule(format!(
                "zone {:02X}: schedule is not whole bytes of uppercase hex",
                self.zone_idx
            )));
        }
        Ok(())
    }
}

/// Reads a controller's fault log, stopping at the first unused slot
pub async fn get_faults(transport: &MessageTransport, ctl: DeviceId) -> Result<Vec<FaultLogEntry>> {
    let mut entries = Vec::new();

    for log_idx in 0..FAULT_LOG_SIZE {
        let cmd = Command::new(Verb::Request, ctl, Code(0x0418), format!("0000{:02X}", log_idx))?;
        let msg = transport.request(cmd).await?;

        let entry = FaultLogEntry {
            log_idx,
            payload: msg.payload().to_string(),
            received: msg.timestamp(),
        };
        if entry.is_null() {
            break;
        }
        tracing::debug!("Fault log {}: entry {:02X} = {}", ctl, log_idx, entry.payload);
        entries.push(entry);
    }
    Ok(entries)
}

fn hex_field(payload: &str, range: std::ops::Range<usize>) -> Result<u8> {
    payload
        .get(range.clone())
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::schedule(format!("bad field at {:?} in {}", range, payload)))
}

/// Reads the schedule of one zone, fragment by fragment
///
/// The first request does not know the fragment count, so it asks for
/// fragment 1 of 0; every later request carries the count from the first reply.
pub async fn get_schedule(transport: &MessageTransport, ctl: DeviceId, zone_idx: u8) -> Result<Schedule> {
    let mut fragments = Vec::new();
    let mut total = 0u8;
    let mut frag_idx = 1u8;

    loop {
        let payload = format!("{:02X}20000800{:02X}{:02X}", zone_idx, frag_idx, total);
        let cmd = Command::new(Verb::Request, ctl, Code(0x0404), payload)?;
        let msg = transport.request(cmd).await?;
        let payload = msg.payload();

        if hex_field(payload, 0..2)? != zone_idx || hex_field(payload, 10..12)? != frag_idx {
            return Err(Error::schedule(format!(
                "zone {:02X}: reply {} does not match fragment {}",
                zone_idx, payload, frag_idx
            )));
        }
        total = hex_field(payload, 12..14)?;
        if total == 0 {
            return Err(Error::schedule(format!("zone {:02X}: reply has no fragments", zone_idx)));
        }
        fragments.push(payload[14..].to_string());

        if frag_idx >= total {
            break;
        }
        frag_idx += 1;
    }

    tracing::info!("Zone {:02X} schedule read in {} fragments", zone_idx, fragments.len());
    Ok(Schedule {
        zone_idx,
        schedule: fragments,
    })
}

/// Writes a zone schedule, waiting for each fragment to be acknowledged
pub async fn set_schedule(transport: &MessageTransport, ctl: DeviceId, schedule: &Schedule) -> Result<()> {
    schedule.validate()?;

    let data = schedule.data();
    // validated as ASCII hex, so any index is a char boundary
    let chunks: Vec<&str> = (0..data.len())
        .step_by(SCHEDULE_CHUNK_HEX)
        .map(|start| &data[start..data.len().min(start + SCHEDULE_CHUNK_HEX)])
        .collect();
    let total = u8::try_from(chunks.len()).map_err(|_| {
        Error::schedule(format!("zone {:02X}: schedule is too long", schedule.zone_idx))
    })?;

    for (frag_idx, chunk) in (1..=total).zip(&chunks) {
        let payload = format!(
            "{:02X}200008{:02X}{:02X}{:02X}{}",
            schedule.zone_idx,
            chunk.len() / 2,
            frag_idx,
            total,
            chunk
        );
        let cmd = Command::new(Verb::Write, ctl, Code(0x0404), payload)?;
        transport.request(cmd).await?;
    }

    tracing::info!("Zone {:02X} schedule written in {} fragments", schedule.zone_idx, total);
    Ok(())
}
