//! Discovery module
//!
//! This module runs the operator-facing scripts: one-off commands, periodic
//! device polls, fault log and schedule transfers, and bus scans. Every
//! script is a task on the current runtime and reports its own failures.

pub mod requests;
pub mod scan;

pub use self::requests::{get_faults, get_schedule, set_schedule, FaultLogEntry, Schedule};
pub use self::scan::{scan_disc, scan_full, scan_hard, scan_xxxx, scan_zone};

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::core::{Code, DeviceId, Result, Verb};
use crate::protocol::{Command, Qos, ZoneClass};
use crate::transport::MessageTransport;

/// Codes polled by `poll_device`
pub const POLL_CODES: [u16; 2] = [0x0016, 0x1FC9];

/// A zone of a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTarget {
    pub ctl: DeviceId,
    #[serde(serialize_with = "crate::core::serde::serialize_hex_byte")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_hex_byte")]
    pub zone_idx: u8,
}

/// A schedule file to write to a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpload {
    pub ctl: DeviceId,
    pub path: PathBuf,
}

/// A zone of a controller, with its class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneScan {
    pub ctl: DeviceId,
    #[serde(serialize_with = "crate::core::serde::serialize_hex_byte")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_hex_byte")]
    pub zone_idx: u8,
    pub zone_class: ZoneClass,
}

/// The bus scans that take a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Disc,
    Full,
    Hard,
    Xxxx,
}

impl ScanKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScanKind::Disc => "scan_disc",
            ScanKind::Full => "scan_full",
            ScanKind::Hard => "scan_hard",
            ScanKind::Xxxx => "scan_xxxx",
        }
    }

    /// Queues the scan's commands for `dev`
    pub async fn run(self, transport: &MessageTransport, dev: DeviceId) -> Result<Vec<Command>> {
        match self {
            ScanKind::Disc => scan_disc(transport, dev).await,
            ScanKind::Full => scan_full(transport, dev).await,
            ScanKind::Hard => scan_hard(transport, dev).await,
            ScanKind::Xxxx => scan_xxxx(transport, dev).await,
        }
    }
}

/// Which scripts to run, and against which devices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptOptions {
    /// Operator command text, e.g. `RQ 01:145038 1F09 00`
    pub execute_cmd: Option<String>,
    pub poll_devices: Vec<DeviceId>,
    pub get_faults: Option<DeviceId>,
    pub get_schedule: Option<ZoneTarget>,
    pub set_schedule: Option<ScheduleUpload>,
    pub scan_disc: Vec<DeviceId>,
    pub scan_full: Vec<DeviceId>,
    pub scan_hard: Vec<DeviceId>,
    pub scan_xxxx: Vec<DeviceId>,
    pub scan_zones: Vec<ZoneScan>,
    /// Woken before anything else when no `execute_cmd` is given
    pub wake_device: Option<DeviceId>,
}

impl ScriptOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Sends an operator command at high priority
///
/// Invalid text is logged and ignored. Returns the command if it was queued.
pub async fn execute_cmd(transport: &MessageTransport, text: &str) -> Option<Command> {
    let cmd = match Command::from_operator_text(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!("Execute: command is invalid, and will be ignored: '{}' ({})", text, e);
            return None;
        }
    };

    match transport.write(cmd.clone()).await {
        Ok(()) => Some(cmd),
        Err(e) => {
            tracing::warn!("Execute: failed to send '{}': {}", text, e);
            None
        }
    }
}

/// Sends `cmd` every `interval`, `count` times or forever if `count` is zero
///
/// Each send follows a sleep, so the first goes out after one interval.
pub async fn periodic(transport: &MessageTransport, cmd: Command, count: u32, interval: Duration) -> Result<()> {
    let mut sent = 0u32;
    while count == 0 || sent < count {
        tokio::time::sleep(interval).await;
        transport.write(cmd.clone()).await?;
        sent = sent.saturating_add(1);
    }
    Ok(())
}

/// Starts polling a device with `RQ <code> 00` and `RQ <code> 0000` for each
/// of `POLL_CODES`, until the transport closes
pub fn poll_device(transport: &Arc<MessageTransport>, dev: DeviceId) -> Vec<JoinHandle<()>> {
    tracing::warn!("poll_device({}) invoked", dev);

    let interval = transport.config().poll_interval;
    let mut tasks = Vec::new();

    for code in POLL_CODES {
        for payload in ["00", "0000"] {
            let cmd = match Command::new(Verb::Request, dev, Code(code), payload) {
                Ok(cmd) => cmd.with_qos(Qos::low(0)),
                Err(e) => {
                    tracing::error!("Cannot poll {} with {:04X}: {}", dev, code, e);
                    continue;
                }
            };

            let transport = transport.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = periodic(&transport, cmd, 0, interval).await {
                    tracing::debug!("Polling of {} stopped: {}", dev, e);
                }
            }));
        }
    }
    tasks
}

/// Spawns a script, logging how it ended
fn spawn_script<F>(name: &'static str, script: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match script.await {
            Ok(()) => tracing::debug!("{}() finished", name),
            Err(e) if e.is_expired() => tracing::error!("{}(): function timed out: {}", name, e),
            Err(e) => tracing::error!("{}() failed: {}", name, e),
        }
    })
}

/// Runs the scripts that watch the bus: a one-off command and device polls
pub async fn spawn_monitor_scripts(
    transport: &Arc<MessageTransport>,
    opts: &ScriptOptions,
) -> Vec<JoinHandle<()>> {
    if let Some(text) = &opts.execute_cmd {
        execute_cmd(transport, text).await;
    }

    opts.poll_devices
        .iter()
        .flat_map(|dev| poll_device(transport, *dev))
        .collect()
}

/// Runs the scripts that act on the bus: requests, transfers and scans
pub async fn spawn_execute_scripts(
    transport: &Arc<MessageTransport>,
    opts: &ScriptOptions,
) -> Vec<JoinHandle<()>> {
    // make sure the gateway is fully awake
    if opts.execute_cmd.is_none() {
        if let Some(dev) = opts.wake_device {
            match Command::new(Verb::Request, dev, Code(0x0016), "00FF") {
                Ok(cmd) => {
                    if let Err(e) = transport.write(cmd.with_qos(Qos::high(5))).await {
                        tracing::warn!("Wake-up request to {} failed: {}", dev, e);
                    }
                }
                Err(e) => tracing::error!("Cannot wake {}: {}", dev, e),
            }
        }
    }

    if let Some(text) = &opts.execute_cmd {
        execute_cmd(transport, text).await;
    }

    let mut tasks = Vec::new();

    if let Some(ctl) = opts.get_faults {
        let transport = transport.clone();
        tasks.push(spawn_script("get_faults", async move {
            let entries = get_faults(&transport, ctl).await?;
            tracing::info!("Fault log of {} has {} entries", ctl, entries.len());
            for entry in entries {
                tracing::info!("  {}", serde_json::to_string(&entry)?);
            }
            Ok(())
        }));
    }

    if let Some(target) = opts.get_schedule.clone() {
        let transport = transport.clone();
        tasks.push(spawn_script("get_schedule", async move {
            let schedule = get_schedule(&transport, target.ctl, target.zone_idx).await?;
            tracing::info!("Schedule of {} zone {:02X}: {}", target.ctl, target.zone_idx, schedule.to_json()?);
            Ok(())
        }));
    }

    if let Some(upload) = opts.set_schedule.clone() {
        let transport = transport.clone();
        tasks.push(spawn_script("set_schedule", async move {
            let schedule = Schedule::from_file(&upload.path)?;
            set_schedule(&transport, upload.ctl, &schedule).await
        }));
    }

    let scans = [
        (ScanKind::Disc, &opts.scan_disc),
        (ScanKind::Full, &opts.scan_full),
        (ScanKind::Hard, &opts.scan_hard),
        (ScanKind::Xxxx, &opts.scan_xxxx),
    ];
    for (kind, devs) in scans {
        for dev in devs.iter().copied() {
            let transport = transport.clone();
            tasks.push(spawn_script(kind.name(), async move {
                let cmds = kind.run(&transport, dev).await?;
                tracing::debug!("{}({}) queued {} commands", kind.name(), dev, cmds.len());
                Ok(())
            }));
        }
    }

    for zone in opts.scan_zones.iter().cloned() {
        let transport = transport.clone();
        tasks.push(spawn_script("scan_zone", async move {
            scan_zone(&transport, zone.ctl, zone.zone_idx, zone.zone_class).await?;
            Ok(())
        }));
    }

    tasks
}
