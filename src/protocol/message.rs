use std::fmt;
use std::time::{Duration, SystemTime};

use crate::core::{Address, Code, DeviceId, Verb};
use super::schema::{self, CodeSchema};

/// Response-matching key: which code, with which verb, from which device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub code: Code,
    pub verb: Verb,
    pub device: DeviceId,
}

impl Header {
    pub fn new(code: Code, verb: Verb, device: DeviceId) -> Self {
        Header { code, verb, device }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.code, self.verb.as_str().trim(), self.device)
    }
}

/// A raw line split into its fixed fields
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Arrival time, or the logged time when replaying a packet log
    pub timestamp: SystemTime,
    /// Signal strength reported by the gateway, if any
    pub rssi: Option<u16>,
    pub verb: Verb,
    /// Sequence number; `None` for `---`
    pub seq: Option<u16>,
    pub addrs: [Address; 3],
    pub code: Code,
    /// Uppercase hex, two digits per declared byte
    pub payload: String,
}

impl Packet {
    pub fn src(&self) -> Address {
        self.addrs[0]
    }

    /// Address 1, or address 2 when address 1 is empty
    pub fn dst(&self) -> Address {
        match self.addrs[1] {
            Address::Empty => self.addrs[2],
            addr => addr,
        }
    }

    /// Declared payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The packet's identity, if it has a source device
    pub fn header(&self) -> Option<Header> {
        self.src()
            .device()
            .map(|src| Header::new(self.code, self.verb, src))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seq = match self.seq {
            Some(n) => format!("{:03}", n),
            None => "---".to_string(),
        };
        write!(
            f,
            "{} {} {} {} {} {} {:03} {}",
            self.verb, seq, self.addrs[0], self.addrs[1], self.addrs[2], self.code,
            self.len(), self.payload
        )
    }
}

/// A packet checked against the code schema table
#[derive(Debug, Clone)]
pub struct Message {
    packet: Packet,
    schema: Option<&'static CodeSchema>,
    is_valid: bool,
}

impl Message {
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// The code's schema entry; `None` for codes outside the master table
    pub fn schema(&self) -> Option<&'static CodeSchema> {
        self.schema
    }

    pub fn is_known(&self) -> bool {
        self.schema.is_some()
    }

    pub fn header(&self) -> Option<Header> {
        self.packet.header()
    }

    pub fn verb(&self) -> Verb {
        self.packet.verb
    }

    pub fn code(&self) -> Code {
        self.packet.code
    }

    pub fn src(&self) -> Address {
        self.packet.src()
    }

    pub fn dst(&self) -> Address {
        self.packet.dst()
    }

    pub fn payload(&self) -> &str {
        &self.packet.payload
    }

    pub fn timestamp(&self) -> SystemTime {
        self.packet.timestamp
    }

    /// Whether the message is older than its code's freshness window
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.schema.and_then(|s| s.expiry) {
            Some(expiry) => {
                let age = now
                    .duration_since(self.packet.timestamp)
                    .unwrap_or(Duration::ZERO);
                age > expiry
            }
            None => false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schema {
            Some(schema) => write!(f, "{} ({})", self.packet, schema.name),
            None => self.packet.fmt(f),
        }
    }
}

fn payload_is_valid(schema: &CodeSchema, verb: Verb, payload: &str) -> bool {
    match schema.pattern(verb) {
        Some(re) => {
            re.is_match(payload)
                || (schema.may_have_domain
                    && payload.len() >= 2
                    && re.is_match(&payload[2..]))
        }
        // a bare request carries at most a 1-byte index
        None if verb == Verb::Request => schema.rq_may_have_payload || payload.len() <= 4,
        None => true,
    }
}

/// Checks a packet's payload against the grammar for its code and verb
pub fn validate(packet: Packet) -> Message {
    let schema = schema::lookup(packet.code);
    let is_valid = match schema {
        Some(schema) => payload_is_valid(schema, packet.verb, &packet.payload),
        None => {
            tracing::debug!("Unknown code {}: parsed generically", packet.code);
            true
        }
    };

    if !is_valid {
        tracing::debug!("Payload fails the {} grammar: {}", packet.code, packet);
    }

    Message { packet, schema, is_valid }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(verb: Verb, code: u16, payload: &str) -> Packet {
        Packet {
            timestamp: SystemTime::UNIX_EPOCH,
            rssi: None,
            verb,
            seq: None,
            addrs: [
                "01:145038".parse().unwrap(),
                "18:000730".parse().unwrap(),
                Address::Empty,
            ],
            code: Code(code),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_header_display() {
        let msg = validate(packet(Verb::Response, 0x0016, "0022"));
        let header = msg.header().unwrap();
        assert_eq!(header.to_string(), "0016|RP|01:145038");
        assert_eq!(header.verb, Verb::Response);
    }

    #[test]
    fn test_valid_and_invalid_payloads() {
        assert!(validate(packet(Verb::Response, 0x0016, "0022")).is_valid());
        assert!(!validate(packet(Verb::Response, 0x0016, "00")).is_valid());
        assert!(validate(packet(Verb::Request, 0x1F09, "00")).is_valid());
        assert!(!validate(packet(Verb::Request, 0x1F09, "01")).is_valid());
    }

    #[test]
    fn test_domain_prefix_is_optional() {
        // 3EF0 RQ grammar is ^00$; a domain id may precede it
        assert!(validate(packet(Verb::Request, 0x3EF0, "00")).is_valid());
        assert!(validate(packet(Verb::Request, 0x3EF0, "FC00")).is_valid());
        // 2349 has no domain flag
        assert!(!validate(packet(Verb::Request, 0x2349, "FC01")).is_valid());
    }

    #[test]
    fn test_bare_request_length_rule() {
        // 0001 has no RQ grammar and no payload flag
        assert!(validate(packet(Verb::Request, 0x0001, "0000")).is_valid());
        assert!(!validate(packet(Verb::Request, 0x0001, "000000")).is_valid());
    }

    #[test]
    fn test_unknown_code_is_tolerated() {
        let msg = validate(packet(Verb::Info, 0x4E01, "ABCDEF"));
        assert!(msg.is_valid());
        assert!(!msg.is_known());
    }

    #[test]
    fn test_destination_falls_back_to_third_address() {
        let mut pkt = packet(Verb::Info, 0x30C9, "0007D0");
        pkt.addrs = [
            "01:145038".parse().unwrap(),
            Address::Empty,
            "01:145038".parse().unwrap(),
        ];
        assert_eq!(pkt.dst(), pkt.src());
    }

    #[test]
    fn test_expiry() {
        let msg = validate(packet(Verb::Info, 0x12B0, "0100"));
        let base = SystemTime::UNIX_EPOCH;
        assert!(!msg.is_expired(base + Duration::from_secs(3600)));
        assert!(msg.is_expired(base + Duration::from_secs(3601)));

        let msg = validate(packet(Verb::Info, 0x30C9, "0007D0"));
        assert!(!msg.is_expired(base + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_packet_display_is_wire_form() {
        let pkt = packet(Verb::Request, 0x1F09, "00");
        assert_eq!(
            pkt.to_string(),
            "RQ --- 01:145038 18:000730 --:------ 1F09 001 00"
        );
    }
}
