//! Per-code payload grammar
//!
//! The master table of every known RAMSES-II code, even those without a
//! parser. Each entry may carry a payload regex per verb, flags that relax
//! validation of requests, and how long a message of that code stays fresh.
//! The table is compiled once on first use and never mutated afterwards, so
//! any number of transports may read it without locking.

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{Code, Verb};

/// Raw table row, before regex compilation
#[derive(Clone, Copy)]
struct RawSchema {
    code: u16,
    name: &'static str,
    rq: Option<&'static str>,
    rp: Option<&'static str>,
    i: Option<&'static str>,
    w: Option<&'static str>,
    may_have_domain: bool,
    rq_may_have_payload: bool,
    expiry_secs: Option<u64>,
}

const fn row(code: u16, name: &'static str) -> RawSchema {
    RawSchema {
        code,
        name,
        rq: None,
        rp: None,
        i: None,
        w: None,
        may_have_domain: false,
        rq_may_have_payload: false,
        expiry_secs: None,
    }
}

const fn rq(code: u16, name: &'static str, pattern: &'static str) -> RawSchema {
    RawSchema {
        rq: Some(pattern),
        ..row(code, name)
    }
}

const fn rq_payload(code: u16, name: &'static str, pattern: &'static str) -> RawSchema {
    RawSchema {
        rq_may_have_payload: true,
        ..rq(code, name, pattern)
    }
}

const fn domain(schema: RawSchema) -> RawSchema {
    RawSchema {
        may_have_domain: true,
        ..schema
    }
}

static RAW_SCHEMAS: &[RawSchema] = &[
    row(0x0001, "rf_unknown"),
    rq(0x0002, "sensor_weather", r"^00$"),
    rq(0x0004, "zone_name", r"^0[0-9A-F]00$"),
    rq_payload(0x0005, "system_zones", r"^00[01][0-9A-F]$"),
    rq(0x0006, "schedule_sync", r"^00$"),
    domain(rq(0x0008, "relay_demand", r"^00$")),
    domain(row(0x0009, "relay_failsafe")),
    RawSchema {
        i: Some(r"^(0[0-9A-F][0-9A-F]{10}){1,8}$"),
        ..rq_payload(0x000A, "zone_params", r"^0[0-9A-F]([0-9A-F]{10})?$")
    },
    rq_payload(0x000C, "zone_devices", r"^0[0-9A-F][01][0-9A-F]$"),
    row(0x000E, "message_000e"),
    RawSchema {
        rp: Some(r"^0[0-9A-F]{3}$"),
        ..rq(0x0016, "rf_check", r"^0[0-9A-F]([0-9A-F]{2})?$")
    },
    rq_payload(0x0100, "language", r"^00([0-9A-F]{4}F{4})?$"),
    row(0x01D0, "message_01d0"),
    row(0x01E9, "message_01e9"),
    rq_payload(0x0404, "zone_schedule", r"^0[0-9A-F](20|23)000800[0-9A-F]{4}$"),
    rq(0x0418, "system_fault", r"^0000[0-3][0-9A-F]$"),
    row(0x042F, "message_042f"),
    row(0x0B04, "message_0b04"),
    row(0x1030, "mixvalve_params"),
    row(0x1060, "device_battery"),
    row(0x1090, "message_1090"),
    rq_payload(0x10A0, "dhw_params", r"^0[01]([0-9A-F]{10})?$"),
    rq(0x10E0, "device_info", r"^00$"),
    domain(rq(0x1100, "tpi_params", r"^(00|FC)")),
    RawSchema {
        rp: Some(r"^00[0-9A-F]{4}$"),
        i: Some(r"^00[0-9A-F]{4}$"),
        ..rq(0x1260, "dhw_temp", r"^00(00)?$")
    },
    row(0x1280, "outdoor_humidity"),
    row(0x1290, "outdoor_temp"),
    row(0x12A0, "indoor_humidity"),
    RawSchema {
        expiry_secs: Some(60 * 60),
        ..rq(0x12B0, "window_state", r"^0[0-9A-F](00)?$")
    },
    row(0x12C0, "message_12c0"),
    rq(0x1F09, "system_sync", r"^00$"),
    rq(0x1F41, "dhw_mode", r"^00$"),
    rq(0x1FC9, "rf_bind", r"^00$"),
    row(0x1FD4, "opentherm_sync"),
    row(0x2249, "setpoint_now"),
    row(0x22C9, "ufh_setpoint"),
    row(0x22D0, "message_22d0"),
    rq(0x22D9, "boiler_setpoint", r"^00$"),
    row(0x22F1, "switch_vent"),
    row(0x22F3, "switch_other"),
    rq_payload(0x2309, "setpoint", r"^0[0-9A-F]"),
    rq(0x2349, "zone_mode", r"^0[0-9A-F]$"),
    row(0x2D49, "message_2d49"),
    rq(0x2E04, "system_mode", r"^FF$"),
    RawSchema {
        rp: Some(r"^0[0-9A-F][0-9A-F]{4}$"),
        i: Some(r"^(0[0-9A-F][0-9A-F]{4}){1,8}$"),
        ..rq(0x30C9, "temperature", r"^0[0-9A-F](00)?$")
    },
    row(0x3120, "message_3120"),
    domain(row(0x3150, "heat_demand")),
    rq(0x313F, "datetime", r"^00$"),
    rq(0x31D9, "message_31d9", r"^00$"),
    rq(0x31DA, "message_31da", r"^(00|21)$"),
    row(0x31E0, "message_31e0"),
    rq_payload(0x3220, "opentherm_msg", r"^00[0-9A-F]{4}0{4}$"),
    domain(row(0x3B00, "actuator_sync")),
    domain(rq(0x3EF0, "actuator_state", r"^00$")),
    rq(0x3EF1, "actuator_cycle", r"^0[0-9A-F](00)?$"),
    RawSchema {
        i: Some(r"^7F[0-9A-F]{12}7F[0-9A-F]{4}7F[0-9A-F]{4}(7F)+"),
        ..row(0x7FFF, "puzzle_packet")
    },
];

/// A compiled entry of the code table
#[derive(Debug)]
pub struct CodeSchema {
    pub code: Code,
    pub name: &'static str,
    rq: Option<Regex>,
    rp: Option<Regex>,
    i: Option<Regex>,
    w: Option<Regex>,
    /// Payload may be prefixed by a 2-hex-digit domain id
    pub may_have_domain: bool,
    /// A request may carry more than the bare index
    pub rq_may_have_payload: bool,
    /// How long a message of this code stays fresh
    pub expiry: Option<Duration>,
}

impl CodeSchema {
    /// The payload grammar for a verb, if one is known
    pub fn pattern(&self, verb: Verb) -> Option<&Regex> {
        match verb {
            Verb::Request => self.rq.as_ref(),
            Verb::Response => self.rp.as_ref(),
            Verb::Info => self.i.as_ref(),
            Verb::Write => self.w.as_ref(),
        }
    }

    /// A null request payload derived from the RQ grammar: `00` if it is
    /// accepted, else `0000`
    pub fn null_rq_payload(&self) -> &'static str {
        match &self.rq {
            Some(re) if re.is_match("00") => "00",
            _ => "0000",
        }
    }
}

fn compile(code: u16, pattern: Option<&'static str>) -> Option<Regex> {
    // patterns are checked by test_all_patterns_compile
    pattern.and_then(|p| match Regex::new(p) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Bad payload pattern for {:04X}: {}", code, e);
            None
        }
    })
}

/// The master code table, indexed by code
pub static CODE_SCHEMAS: Lazy<BTreeMap<Code, CodeSchema>> = Lazy::new(|| {
    RAW_SCHEMAS
        .iter()
        .map(|raw| {
            let schema = CodeSchema {
                code: Code(raw.code),
                name: raw.name,
                rq: compile(raw.code, raw.rq),
                rp: compile(raw.code, raw.rp),
                i: compile(raw.code, raw.i),
                w: compile(raw.code, raw.w),
                may_have_domain: raw.may_have_domain,
                rq_may_have_payload: raw.rq_may_have_payload,
                expiry: raw.expiry_secs.map(Duration::from_secs),
            };
            (schema.code, schema)
        })
        .collect()
});

/// Looks up a code in the master table
pub fn lookup(code: Code) -> Option<&'static CodeSchema> {
    CODE_SCHEMAS.get(&code)
}

/// Whether a code is in the master table
pub fn is_known(code: Code) -> bool {
    CODE_SCHEMAS.contains_key(&code)
}

/// Every known code, in ascending order
pub fn known_codes() -> impl Iterator<Item = Code> {
    CODE_SCHEMAS.keys().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for raw in RAW_SCHEMAS {
            for pattern in [raw.rq, raw.rp, raw.i, raw.w].into_iter().flatten() {
                assert!(Regex::new(pattern).is_ok(), "{:04X}: {}", raw.code, pattern);
            }
        }
    }

    #[test]
    fn test_table_has_no_duplicates() {
        assert_eq!(CODE_SCHEMAS.len(), RAW_SCHEMAS.len());
    }

    #[test]
    fn test_lookup() {
        let schema = lookup(Code(0x0016)).unwrap();
        assert_eq!(schema.name, "rf_check");
        assert!(schema.pattern(Verb::Request).unwrap().is_match("00FF"));
        assert!(schema.pattern(Verb::Response).unwrap().is_match("0022"));
        assert!(schema.pattern(Verb::Info).is_none());

        assert!(lookup(Code(0x4321)).is_none());
        assert!(is_known(Code(0x7FFF)));
    }

    #[test]
    fn test_expiry() {
        assert_eq!(lookup(Code(0x12B0)).unwrap().expiry, Some(Duration::from_secs(3600)));
        assert_eq!(lookup(Code(0x30C9)).unwrap().expiry, None);
    }

    #[test]
    fn test_null_rq_payload() {
        assert_eq!(lookup(Code(0x1F09)).unwrap().null_rq_payload(), "00");
        assert_eq!(lookup(Code(0x0004)).unwrap().null_rq_payload(), "0000");
        assert_eq!(lookup(Code(0x0001)).unwrap().null_rq_payload(), "0000");
    }

    #[test]
    fn test_known_codes_sorted() {
        let codes: Vec<Code> = known_codes().collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
        assert_eq!(codes.first(), Some(&Code(0x0001)));
    }
}
