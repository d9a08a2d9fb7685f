use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{is_upper_hex, Address, Code, DeviceId, Error, Priority, Result, Verb, MAX_PAYLOAD_HEX};
use super::message::Header;

/// Quality of service for one send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    pub priority: Priority,
    /// Re-sends allowed when no response arrives in time
    pub retries: u8,
}

impl Qos {
    pub const fn new(priority: Priority, retries: u8) -> Self {
        Qos { priority, retries }
    }

    pub const fn high(retries: u8) -> Self {
        Qos::new(Priority::High, retries)
    }

    pub const fn low(retries: u8) -> Self {
        Qos::new(Priority::Low, retries)
    }
}

impl Default for Qos {
    fn default() -> Self {
        Qos::new(Priority::Default, 3)
    }
}

/// An outbound RF command, validated on construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    src: DeviceId,
    dest: DeviceId,
    code: Code,
    payload: String,
    qos: Qos,
}

fn check_payload(payload: &str) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_HEX {
        return Err(Error::invalid_command(format!(
            "payload longer than {} hex digits: {:?}",
            MAX_PAYLOAD_HEX, payload
        )));
    }
    if payload.len() % 2 != 0 || !is_upper_hex(payload) {
        return Err(Error::invalid_command(format!(
            "payload is not uppercase hex bytes: {:?}",
            payload
        )));
    }
    Ok(())
}

impl Command {
    /// Builds a command from typed parts, checking the payload
    pub fn new(verb: Verb, dest: DeviceId, code: Code, payload: impl Into<String>) -> Result<Self> {
        let payload = payload.into();
        check_payload(&payload)?;

        Ok(Command {
            verb,
            src: DeviceId::HGI,
            dest,
            code,
            payload,
            qos: Qos::default(),
        })
    }

    /// Builds a command from its textual parts, checking every field's grammar
    pub fn encode(verb: &str, dest_id: &str, code: &str, payload: &str, qos: Qos) -> Result<Self> {
        let verb: Verb = verb.parse()?;
        let dest: DeviceId = dest_id.parse()?;
        let code: Code = code.parse()?;
        Ok(Self::new(verb, dest, code, payload)?.with_qos(qos))
    }

    /// Parses operator input, `<verb> <dest_id> <code> <payload>`
    pub fn from_operator_text(text: &str) -> Result<Self> {
        let field = |range: std::ops::Range<usize>| {
            text.get(range)
                .ok_or_else(|| Error::invalid_command(format!("command text too short: {:?}", text)))
        };
        let verb = field(0..2)?;
        let dest = field(3..12)?;
        let code = field(13..17)?;
        let payload = text.get(18..).unwrap_or("").trim();

        Self::encode(verb, dest, code, payload, Qos::high(3))
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.qos.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.qos.retries = retries;
        self
    }

    /// Replaces the source address, normally the gateway's own id
    pub fn with_source(mut self, src: DeviceId) -> Self {
        self.src = src;
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn src(&self) -> DeviceId {
        self.src
    }

    pub fn dest(&self) -> DeviceId {
        self.dest
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn priority(&self) -> Priority {
        self.qos.priority
    }

    /// The header a response to this command will carry, if one is expected
    pub fn rx_header(&self) -> Option<Header> {
        self.verb
            .complement()
            .map(|verb| Header::new(self.code, verb, self.dest))
    }

    /// The exact wire form, without line terminator
    pub fn to_line(&self) -> String {
        format!(
            "{} --- {} {} {} {} {:03} {}",
            self.verb,
            self.src,
            self.dest,
            Address::EMPTY,
            self.code,
            self.payload.len() / 2,
            self.payload
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode;
    use std::time::SystemTime;

    #[test]
    fn test_encode_to_wire() {
        let cmd = Command::encode("RQ", "01:145038", "1F09", "00", Qos::default()).unwrap();
        assert_eq!(cmd.to_line(), "RQ --- 18:000730 01:145038 --:------ 1F09 001 00");
        assert_eq!(cmd.priority(), Priority::Default);
    }

    #[test]
    fn test_wire_round_trip() {
        let cmd = Command::encode(" W", "13:237335", "0008", "FC00", Qos::high(0)).unwrap();
        let pkt = decode(&cmd.to_line(), SystemTime::now()).unwrap();
        assert_eq!(pkt.verb, cmd.verb());
        assert_eq!(pkt.dst().device(), Some(cmd.dest()));
        assert_eq!(pkt.code, cmd.code());
        assert_eq!(pkt.payload, cmd.payload());
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let cmd = Command::encode("RQ", "01:145038", "0001", "", Qos::default()).unwrap();
        assert!(cmd.to_line().ends_with(" 000 "));
        let pkt = decode(&cmd.to_line(), SystemTime::now()).unwrap();
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn test_encode_rejects_bad_grammar() {
        let qos = Qos::default();
        for (verb, dest, code, payload) in [
            ("XX", "01:145038", "1F09", "00"),
            ("RQ", "1:145038", "1F09", "00"),
            ("RQ", "01:145038", "1f09", "00"),
            ("RQ", "01:145038", "1F9", "00"),
            ("RQ", "01:145038", "1F09", "0"),
            ("RQ", "01:145038", "1F09", "0g"),
            ("RQ", "01:145038", "1F09", "ab"),
        ] {
            let err = Command::encode(verb, dest, code, payload, qos).unwrap_err();
            assert!(matches!(err, Error::InvalidCommand(_)), "{verb} {dest} {code} {payload}");
        }

        let long = "00".repeat(25);
        assert!(Command::encode("RQ", "01:145038", "1F09", &long, qos).is_err());
        let max = "00".repeat(24);
        assert!(Command::encode("RQ", "01:145038", "1F09", &max, qos).is_ok());
    }

    #[test]
    fn test_rx_header() {
        let cmd = Command::encode("RQ", "01:145038", "0016", "00", Qos::default()).unwrap();
        assert_eq!(cmd.rx_header().unwrap().to_string(), "0016|RP|01:145038");

        let cmd = Command::encode(" W", "01:145038", "2309", "0107D0", Qos::default()).unwrap();
        assert_eq!(cmd.rx_header().unwrap().to_string(), "2309|I|01:145038");

        let cmd = Command::encode(" I", "01:145038", "1FC9", "00", Qos::default()).unwrap();
        assert!(cmd.rx_header().is_none());
    }

    #[test]
    fn test_operator_text() {
        let cmd = Command::from_operator_text("RQ 01:145038 1F09 00").unwrap();
        assert_eq!(cmd.verb(), Verb::Request);
        assert_eq!(cmd.dest().to_string(), "01:145038");
        assert_eq!(cmd.code(), Code(0x1F09));
        assert_eq!(cmd.payload(), "00");
        assert_eq!(cmd.qos(), Qos::high(3));

        let cmd = Command::from_operator_text(" I 01:145038 1FC9").unwrap();
        assert_eq!(cmd.verb(), Verb::Info);
        assert_eq!(cmd.payload(), "");

        assert!(Command::from_operator_text("RQ 01:145038").is_err());
        assert!(Command::from_operator_text("RQ 01-145038 1F09 00").is_err());
    }

    #[test]
    fn test_source_is_replaceable() {
        let gwy: DeviceId = "18:005570".parse().unwrap();
        let cmd = Command::new(Verb::Request, "01:145038".parse().unwrap(), Code(0x1F09), "00")
            .unwrap()
            .with_source(gwy);
        assert_eq!(cmd.src(), gwy);
        assert!(cmd.to_line().starts_with("RQ --- 18:005570 01:145038"));
    }
}
