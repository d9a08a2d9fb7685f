//! Bus scans
//!
//! Each scan is a pure builder returning the commands it would send, plus an
//! async wrapper that queues them on a transport. Scans do not wait for
//! responses; whatever answers arrives through the transport's subscribers.

use chrono::NaiveDateTime;

use crate::core::{Code, DeviceId, Priority, Result, Verb};
use crate::protocol::{schema, Command, DeviceClass, Qos, ZoneClass};
use crate::transport::MessageTransport;
use crate::util::dts_to_hex;

/// Codes brute-forced by `scan_hard` and `scan_xxxx`: every 2-byte value below 0x4000
pub const SCAN_CODE_LIMIT: u16 = 0x4000;

/// Payload written by `scan_xxxx`
const GREETING: &[u8] = b"Hello there.";

fn rq(dest: DeviceId, code: u16, payload: impl Into<String>, qos: Qos) -> Result<Command> {
    Ok(Command::new(Verb::Request, dest, Code(code), payload)?.with_qos(qos))
}

fn null_rq_payload(code: Code) -> &'static str {
    schema::lookup(code).map_or("0000", |s| s.null_rq_payload())
}

/// A light discovery: `RQ 0016`, then every code the device's class is known to
/// answer, bar the multi-packet ones
pub fn disc_commands(dev: DeviceId) -> Result<Vec<Command>> {
    let qos = Qos::new(Priority::Default, 1);
    let mut cmds = vec![rq(dev, 0x0016, null_rq_payload(Code(0x0016)), qos)?];

    if let Some(class) = DeviceClass::from_id(&dev) {
        for code in class.answered_codes() {
            if matches!(code.0, 0x0016 | 0x0404 | 0x0418) {
                continue;
            }
            cmds.push(rq(dev, code.0, null_rq_payload(code), qos)?);
        }
    }
    Ok(cmds)
}

/// Requests to a controller for each code it answers about one zone of
/// the given class
pub fn zone_commands(ctl: DeviceId, zone_idx: u8, class: ZoneClass) -> Result<Vec<Command>> {
    let qos = Qos::new(Priority::Default, 1);
    class
        .answered_codes()
        .into_iter()
        .map(|code| {
            let payload = match code.0 {
                // zone name and zone devices take a second index byte
                0x0004 | 0x000C => format!("{:02X}00", zone_idx),
                _ => format!("{:02X}", zone_idx),
            };
            rq(ctl, code.0, payload, qos)
        })
        .collect()
}

/// One or more requests per known code, with payloads suited to each code
pub fn full_commands(dev: DeviceId, now: NaiveDateTime) -> Result<Vec<Command>> {
    let mut cmds = vec![rq(dev, 0x0016, "0000", Qos::high(5))?];

    let qos = Qos::new(Priority::Default, 1);
    for code in schema::known_codes() {
        match code.0 {
            0x0016 => {}
            0x0005 => {
                for zone_type in 0..20u8 {
                    cmds.push(rq(dev, code.0, format!("00{:02X}", zone_type), qos)?);
                }
            }
            0x000C => {
                for zone_idx in 0..16u8 {
                    cmds.push(rq(dev, code.0, format!("{:02X}00", zone_idx), qos)?);
                }
            }
            0x0404 => cmds.push(rq(dev, code.0, "00200008000100", qos)?),
            0x0418 => {
                for log_idx in 0..2u32 {
                    cmds.push(rq(dev, code.0, format!("{:06X}", log_idx), qos)?);
                }
            }
            0x1100 => cmds.push(rq(dev, code.0, "FC", qos)?),
            0x2E04 => cmds.push(rq(dev, code.0, "FF", qos)?),
            0x3220 => {
                // the mandatory READ_DATA ids
                for data_id in ["00", "03"] {
                    cmds.push(rq(dev, code.0, format!("0000{}0000", data_id), qos)?);
                }
            }
            _ => cmds.push(rq(dev, code.0, null_rq_payload(code), qos)?),
        }
    }

    // possible, but difficult, codes
    let qos = Qos::new(Priority::Default, 2);
    for code in [0x0150, 0x2389] {
        cmds.push(rq(dev, code, "0000", qos)?);
    }

    let puzzle = format!("7F{}7F00007F00007F", dts_to_hex(now));
    cmds.push(Command::new(Verb::Info, DeviceId::NUL, Code(0x7FFF), puzzle)?.with_qos(Qos::low(3)));

    Ok(cmds)
}

/// A bare request for every code below `SCAN_CODE_LIMIT`
pub fn hard_commands(dev: DeviceId) -> Result<Vec<Command>> {
    (0..SCAN_CODE_LIMIT)
        .map(|code| rq(dev, code, "0000", Qos::low(0)))
        .collect()
}

/// A harmless write for every unknown code below `SCAN_CODE_LIMIT`
pub fn xxxx_commands(dev: DeviceId) -> Result<Vec<Command>> {
    let payload = format!("0000{}00", hex::encode_upper(GREETING));
    (0..SCAN_CODE_LIMIT)
        .map(Code)
        .filter(|code| !schema::is_known(*code))
        .map(|code| {
            Command::new(Verb::Write, dev, code, payload.clone()).map(|cmd| cmd.with_qos(Qos::low(0)))
        })
        .collect()
}

async fn queue_all(transport: &MessageTransport, cmds: Vec<Command>) -> Result<Vec<Command>> {
    for cmd in &cmds {
        transport.write(cmd.clone()).await?;
    }
    Ok(cmds)
}

pub async fn scan_disc(transport: &MessageTransport, dev: DeviceId) -> Result<Vec<Command>> {
    tracing::warn!("scan_disc({}) invoked", dev);
    queue_all(transport, disc_commands(dev)?).await
}

pub async fn scan_full(transport: &MessageTransport, dev: DeviceId) -> Result<Vec<Command>> {
    tracing::warn!("scan_full({}) invoked, expect a lot of warnings", dev);
    let now = chrono::Local::now().naive_local();
    queue_all(transport, full_commands(dev, now)?).await
}

pub async fn scan_hard(transport: &MessageTransport, dev: DeviceId) -> Result<Vec<Command>> {
    tracing::warn!("scan_hard({}) invoked, expect some warnings", dev);
    queue_all(transport, hard_commands(dev)?).await
}

pub async fn scan_xxxx(transport: &MessageTransport, dev: DeviceId) -> Result<Vec<Command>> {
    tracing::warn!("scan_xxxx({}) invoked, expect a lot of nonsense", dev);
    queue_all(transport, xxxx_commands(dev)?).await
}

pub async fn scan_zone(
    transport: &MessageTransport,
    ctl: DeviceId,
    zone_idx: u8,
    class: ZoneClass,
) -> Result<Vec<Command>> {
    tracing::warn!("scan_zone({}, {:02X}, {}) invoked", ctl, zone_idx, class.slug());
    queue_all(transport, zone_commands(ctl, zone_idx, class)?).await
}
