//! Device and zone capability tables
//!
//! Which codes each class of device (keyed by the two-digit type of its id)
//! and each class of zone is known to send, and with which verbs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::core::{Code, DeviceId, Verb};

const I_: &[Verb] = &[Verb::Info];
const W_: &[Verb] = &[Verb::Write];
const RQ: &[Verb] = &[Verb::Request];
const RP: &[Verb] = &[Verb::Response];
const I_RP: &[Verb] = &[Verb::Info, Verb::Response];
const I_RQ: &[Verb] = &[Verb::Info, Verb::Request];
const RQ_RP: &[Verb] = &[Verb::Request, Verb::Response];
const RP_W: &[Verb] = &[Verb::Response, Verb::Write];
const I_RP_W: &[Verb] = &[Verb::Info, Verb::Response, Verb::Write];
const I_RQ_W: &[Verb] = &[Verb::Info, Verb::Request, Verb::Write];
const I_RQ_RP: &[Verb] = &[Verb::Info, Verb::Request, Verb::Response];
const RQ_RP_W: &[Verb] = &[Verb::Request, Verb::Response, Verb::Write];
const ALL: &[Verb] = &[Verb::Info, Verb::Request, Verb::Response, Verb::Write];

type Table = &'static [(u16, &'static [Verb])];

/// Known classes of device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// 01: evohome controller
    Controller,
    /// 02: underfloor heating controller
    UfhController,
    /// 03: wireless room thermostat
    Thermostat,
    /// 04 (and 00): radiator valve
    Trv,
    /// 07: DHW sensor
    DhwSensor,
    /// 08: Jasper interface module
    Jasper,
    /// 10: OpenTherm bridge
    OtBridge,
    /// 12 (and 22): programmable thermostat
    DtsThermostat,
    /// 13: relay box
    Relay,
    /// 18: HGI80-compatible gateway
    Gateway,
    /// 20: ventilation unit
    Ventilator,
    /// 23: programmer
    Programmer,
    /// 30: internet gateway
    RfGateway,
    /// 31: Jasper thermostat
    JasperStat,
    /// 32: ventilation sensor
    VentSensor,
    /// 34: round thermostat
    RoundThermostat,
    /// 37: fan
    Fan,
}

static CONTROLLER: Table = &[
    (0x0001, W_),
    (0x0002, I_RP),
    (0x0004, I_RP),
    (0x0005, I_RP),
    (0x0006, RP),
    (0x0008, I_),
    (0x0009, I_),
    (0x000A, I_RP),
    (0x000C, RP),
    (0x0016, RQ_RP),
    (0x0100, RP),
    (0x01D0, I_),
    (0x01E9, I_),
    (0x0404, RP),
    (0x0418, I_RP),
    (0x1030, I_),
    (0x10A0, I_RP),
    (0x10E0, RP),
    (0x1100, ALL),
    (0x1260, RP),
    (0x1290, RP),
    (0x12B0, I_RP),
    (0x1F09, I_RP_W),
    (0x1FC9, I_),
    (0x1F41, I_RP),
    (0x2249, I_),
    (0x22D9, RQ),
    (0x2309, I_RP),
    (0x2349, I_RP),
    (0x2D49, I_),
    (0x2E04, I_RP),
    (0x30C9, I_RP),
    (0x313F, I_RP_W),
    (0x3150, I_),
    (0x3220, RQ),
    (0x3B00, I_),
    (0x3EF0, RQ),
];

static UFH_CONTROLLER: Table = &[
    (0x0001, RP_W),
    (0x0005, RP),
    (0x0008, I_),
    (0x000A, RP),
    (0x000C, RP),
    (0x10E0, I_RP),
    (0x22C9, I_),
    (0x22D0, I_RP),
    (0x2309, RP),
    (0x3150, I_),
];

static THERMOSTAT: Table = &[
    (0x0001, W_),
    (0x0008, I_),
    (0x0009, I_),
    (0x1060, I_),
    (0x1100, I_),
    (0x1F09, I_),
    (0x1FC9, I_),
    (0x2309, I_),
    (0x30C9, I_),
];

static TRV: Table = &[
    (0x0001, W_),
    (0x0004, RQ),
    (0x0016, RQ),
    (0x0100, RQ),
    (0x01D0, W_),
    (0x01E9, W_),
    (0x1060, I_),
    (0x10E0, I_),
    (0x1F09, RQ),
    (0x12B0, I_),
    (0x2309, I_),
    (0x30C9, I_),
    (0x313F, RQ),
    (0x3150, I_),
];

static DHW_SENSOR: Table = &[
    (0x0016, RQ),
    (0x1060, I_),
    (0x10A0, RQ),
    (0x1260, I_),
    (0x1FC9, I_),
];

static JASPER: Table = &[
    (0x0008, RQ),
    (0x10E0, I_),
    (0x1100, I_),
    (0x3EF0, I_),
    (0x3EF1, RP),
];

static OT_BRIDGE: Table = &[
    (0x10A0, RP),
    (0x10E0, I_RP),
    (0x1260, RP),
    (0x1290, RP),
    (0x1FD4, I_),
    (0x22D9, RP),
    (0x2349, I_),
    (0x3150, I_),
    (0x3220, RP),
    (0x3EF0, I_RP),
    (0x3EF1, RP),
];

static DTS_THERMOSTAT: Table = &[
    (0x0001, W_),
    (0x0008, I_),
    (0x0009, I_),
    (0x0016, RQ),
    (0x1100, I_),
    (0x000A, I_RQ_W),
    (0x0B04, I_),
    (0x1030, I_),
    (0x1060, I_),
    (0x1090, RQ),
    (0x1F09, I_),
    (0x2309, I_RQ_W),
    (0x2349, W_),
    (0x30C9, I_),
    (0x313F, I_),
    (0x3B00, I_),
    (0x3EF1, RQ),
];

static RELAY: Table = &[
    (0x0008, RP),
    (0x0016, RP),
    (0x1100, I_RP),
    (0x1FC9, RP_W),
    (0x3B00, I_),
    (0x3EF0, I_),
    (0x3EF1, RP),
];

static VENTILATOR: Table = &[
    (0x10E0, I_RP),
    (0x22F1, I_),
    (0x22F3, I_),
    (0x31D9, I_),
    (0x31DA, I_),
];

static PROGRAMMER: Table = &[
    (0x0009, I_),
    (0x1090, RP),
    (0x1100, I_),
    (0x1F09, I_),
    (0x2249, I_),
    (0x2309, I_),
    (0x30C9, I_),
    (0x3B00, I_),
    (0x3EF1, RP),
];

static RF_GATEWAY: Table = &[
    (0x0002, RQ),
    (0x0004, I_RQ),
    (0x0005, RQ),
    (0x0006, RQ),
    (0x000A, RQ),
    (0x000C, RQ),
    (0x0016, RP),
    (0x0404, RQ),
    (0x0418, RQ),
    (0x10A0, RQ),
    (0x10E0, I_RQ_RP),
    (0x1260, RQ),
    (0x1290, I_),
    (0x1F41, RQ),
    (0x2349, RQ_RP),
    (0x2E04, RQ),
    (0x30C9, RQ),
    (0x313F, RQ_RP_W),
    (0x3EF0, RQ),
    (0x1F09, I_RP),
    (0x31D9, I_),
    (0x31DA, I_RP),
];

static JASPER_STAT: Table = &[(0x0008, I_), (0x10E0, I_), (0x3EF1, RQ)];

static VENT_SENSOR: Table = &[
    (0x1060, I_),
    (0x10E0, I_),
    (0x12A0, I_),
    (0x22F1, I_),
    (0x31DA, RQ),
    (0x31E0, I_),
];

static ROUND_THERMOSTAT: Table = &[
    (0x0005, I_),
    (0x0008, I_),
    (0x000A, RQ),
    (0x000C, I_),
    (0x000E, I_),
    (0x042F, I_),
    (0x1060, I_),
    (0x10E0, I_),
    (0x12C0, I_),
    (0x2309, I_RQ_W),
    (0x2349, RQ),
    (0x30C9, I_),
    (0x3120, I_),
];

impl DeviceClass {
    /// Classifies a device by the type part of its id
    pub fn from_id(id: &DeviceId) -> Option<Self> {
        Self::from_kind(id.kind())
    }

    /// Classifies a two-digit device type
    pub fn from_kind(kind: u8) -> Option<Self> {
        let class = match kind {
            0 | 4 => DeviceClass::Trv,
            1 => DeviceClass::Controller,
            2 => DeviceClass::UfhController,
            3 => DeviceClass::Thermostat,
            7 => DeviceClass::DhwSensor,
            8 => DeviceClass::Jasper,
            10 => DeviceClass::OtBridge,
            12 | 22 => DeviceClass::DtsThermostat,
            13 => DeviceClass::Relay,
            18 => DeviceClass::Gateway,
            20 => DeviceClass::Ventilator,
            23 => DeviceClass::Programmer,
            30 => DeviceClass::RfGateway,
            31 => DeviceClass::JasperStat,
            32 => DeviceClass::VentSensor,
            34 => DeviceClass::RoundThermostat,
            37 => DeviceClass::Fan,
            _ => return None,
        };
        Some(class)
    }

    /// Three-letter slug, as seen in packet logs
    pub fn slug(&self) -> &'static str {
        match self {
            DeviceClass::Controller => "CTL",
            DeviceClass::UfhController => "UFC",
            DeviceClass::Thermostat => "STA",
            DeviceClass::Trv => "TRV",
            DeviceClass::DhwSensor => "DHW",
            DeviceClass::Jasper => "JIM",
            DeviceClass::OtBridge => "OTB",
            DeviceClass::DtsThermostat => "THM",
            DeviceClass::Relay => "BDR",
            DeviceClass::Gateway => "HGI",
            DeviceClass::Ventilator => "VCE",
            DeviceClass::Programmer => "PRG",
            DeviceClass::RfGateway => "GWY",
            DeviceClass::JasperStat => "JST",
            DeviceClass::VentSensor => "VMS",
            DeviceClass::RoundThermostat => "RND",
            DeviceClass::Fan => "FAN",
        }
    }

    fn table(&self) -> Table {
        match self {
            DeviceClass::Controller => CONTROLLER,
            DeviceClass::UfhController => UFH_CONTROLLER,
            DeviceClass::Thermostat => THERMOSTAT,
            DeviceClass::Trv => TRV,
            DeviceClass::DhwSensor => DHW_SENSOR,
            DeviceClass::Jasper => JASPER,
            DeviceClass::OtBridge => OT_BRIDGE,
            DeviceClass::DtsThermostat => DTS_THERMOSTAT,
            DeviceClass::Relay => RELAY,
            DeviceClass::Ventilator => VENTILATOR,
            DeviceClass::Programmer => PROGRAMMER,
            DeviceClass::RfGateway => RF_GATEWAY,
            DeviceClass::JasperStat => JASPER_STAT,
            DeviceClass::VentSensor => VENT_SENSOR,
            DeviceClass::RoundThermostat => ROUND_THERMOSTAT,
            DeviceClass::Gateway | DeviceClass::Fan => &[],
        }
    }

    /// Verbs this class is known to send a code with
    pub fn verbs(&self, code: Code) -> &'static [Verb] {
        self.table()
            .iter()
            .find(|(c, _)| *c == code.0)
            .map_or(&[], |(_, verbs)| *verbs)
    }

    /// Whether this class is known to send `code` with `verb`
    pub fn supports(&self, code: Code, verb: Verb) -> bool {
        self.verbs(code).contains(&verb)
    }

    /// Codes this class answers requests for, in ascending order
    pub fn answered_codes(&self) -> Vec<Code> {
        let mut codes: Vec<Code> = self
            .table()
            .iter()
            .filter(|(_, verbs)| verbs.contains(&Verb::Response))
            .map(|(c, _)| Code(*c))
            .collect();
        codes.sort();
        codes
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Known classes of heating zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneClass {
    #[serde(rename = "RAD")]
    Radiator,
    #[serde(rename = "ELE")]
    Electric,
    #[serde(rename = "VAL")]
    Valve,
    #[serde(rename = "UFH")]
    Underfloor,
    #[serde(rename = "MIX")]
    Mixing,
    #[serde(rename = "DHW")]
    Dhw,
}

impl ZoneClass {
    pub const ALL: [ZoneClass; 6] = [
        ZoneClass::Radiator,
        ZoneClass::Electric,
        ZoneClass::Valve,
        ZoneClass::Underfloor,
        ZoneClass::Mixing,
        ZoneClass::Dhw,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            ZoneClass::Radiator => "RAD",
            ZoneClass::Electric => "ELE",
            ZoneClass::Valve => "VAL",
            ZoneClass::Underfloor => "UFH",
            ZoneClass::Mixing => "MIX",
            ZoneClass::Dhw => "DHW",
        }
    }

    fn own_table(&self) -> Table {
        match self {
            ZoneClass::Radiator => &[(0x12B0, I_RP)],
            ZoneClass::Electric | ZoneClass::Valve => &[(0x0008, I_), (0x0009, I_)],
            ZoneClass::Underfloor => &[(0x3150, I_)],
            ZoneClass::Mixing => &[(0x0008, I_)],
            ZoneClass::Dhw => &[],
        }
    }

    /// Codes and verbs this class of zone is known to carry
    pub fn capabilities(&self) -> &'static BTreeMap<Code, &'static [Verb]> {
        &ZONE_CAPABILITIES[self]
    }

    pub fn supports(&self, code: Code, verb: Verb) -> bool {
        self.capabilities()
            .get(&code)
            .map_or(false, |verbs| verbs.contains(&verb))
    }

    /// Codes a controller answers for this class of zone, in code order
    pub fn answered_codes(&self) -> Vec<Code> {
        self.capabilities()
            .iter()
            .filter(|(_, verbs)| verbs.contains(&Verb::Response))
            .map(|(code, _)| *code)
            .collect()
    }
}

/// Shared by every zone class but DHW
static COMMON_ZONE: Table = &[
    (0x0004, I_RP),
    (0x000C, RP),
    (0x000A, I_RP),
    (0x2309, I_RP),
    (0x2349, I_RP),
    (0x30C9, I_RP),
];

static ZONE_CAPABILITIES: Lazy<HashMap<ZoneClass, BTreeMap<Code, &'static [Verb]>>> =
    Lazy::new(|| {
        ZoneClass::ALL
            .iter()
            .map(|class| {
                let common: Table = if *class == ZoneClass::Dhw { &[] } else { COMMON_ZONE };
                let caps = class
                    .own_table()
                    .iter()
                    .chain(common.iter())
                    .map(|(code, verbs)| (Code(*code), *verbs))
                    .collect();
                (*class, caps)
            })
            .collect()
    });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class_aliases() {
        assert_eq!(DeviceClass::from_kind(0), Some(DeviceClass::Trv));
        assert_eq!(DeviceClass::from_kind(4), Some(DeviceClass::Trv));
        assert_eq!(DeviceClass::from_kind(22), Some(DeviceClass::DtsThermostat));
        assert_eq!(DeviceClass::from_kind(99), None);

        let id: DeviceId = "01:145038".parse().unwrap();
        assert_eq!(DeviceClass::from_id(&id), Some(DeviceClass::Controller));
    }

    #[test]
    fn test_controller_capabilities() {
        let ctl = DeviceClass::Controller;
        assert!(ctl.supports(Code(0x0016), Verb::Request));
        assert!(ctl.supports(Code(0x0016), Verb::Response));
        assert!(ctl.supports(Code(0x1100), Verb::Write));
        assert!(!ctl.supports(Code(0x22F1), Verb::Info));

        let answered = ctl.answered_codes();
        assert!(answered.contains(&Code(0x0404)));
        assert!(answered.contains(&Code(0x0418)));
        assert!(!answered.contains(&Code(0x3220)));
    }

    #[test]
    fn test_empty_classes() {
        assert!(DeviceClass::Gateway.answered_codes().is_empty());
        assert!(DeviceClass::Fan.verbs(Code(0x0016)).is_empty());
    }

    #[test]
    fn test_zones_inherit_common_capabilities() {
        for class in ZoneClass::ALL {
            let has_common = class.supports(Code(0x30C9), Verb::Info);
            assert_eq!(has_common, class != ZoneClass::Dhw, "{}", class.slug());
        }
        assert!(ZoneClass::Radiator.supports(Code(0x12B0), Verb::Response));
        assert!(!ZoneClass::Underfloor.supports(Code(0x12B0), Verb::Info));
        assert!(ZoneClass::Dhw.capabilities().is_empty());

        let codes: Vec<u16> = ZoneClass::Radiator.answered_codes().iter().map(|c| c.0).collect();
        assert_eq!(codes, [0x0004, 0x000A, 0x000C, 0x12B0, 0x2309, 0x2349, 0x30C9]);
        assert!(!ZoneClass::Underfloor.answered_codes().contains(&Code(0x3150)));
        assert_eq!(serde_json::to_string(&ZoneClass::Underfloor).unwrap(), r#""UFH""#);
    }
}
