use std::io;
use std::time::SystemTime;

use bytes::{BufMut, BytesMut};
use chrono::NaiveDateTime;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::core::{is_upper_hex, Address, Code, Error, Verb};
use super::message::Packet;

/// Length of a frame with an empty payload, up to and including the space
/// before the payload
pub const FRAME_HEADER_LEN: usize = 46;

/// Lines longer than this are discarded unread
pub const MAX_LINE_LEN: usize = 512;

/// Byte offset of each space separator in a frame
const SEPARATORS: [usize; 7] = [2, 6, 16, 26, 36, 41, 45];

fn split_timestamp(line: &str) -> (Option<SystemTime>, &str) {
    if let Some((first, rest)) = line.split_once(' ') {
        if first.contains('T') {
            if let Ok(dtm) = NaiveDateTime::parse_from_str(first, "%Y-%m-%dT%H:%M:%S%.f") {
                return (Some(dtm.and_utc().into()), rest);
            }
        }
    }
    (None, line)
}

fn split_rssi(line: &str) -> (Option<u16>, &str) {
    let bytes = line.as_bytes();
    if bytes.len() > 4 && bytes[..3].iter().all(u8::is_ascii_digit) && bytes[3] == b' ' {
        if let Ok(rssi) = line[..3].parse() {
            return (Some(rssi), &line[4..]);
        }
    }
    (None, line)
}

fn parse_frame(frame: &str, timestamp: SystemTime, rssi: Option<u16>) -> Result<Packet, String> {
    if !frame.is_ascii() {
        return Err("not ASCII".to_string());
    }
    if frame.len() < FRAME_HEADER_LEN {
        return Err(format!("too short ({} chars)", frame.len()));
    }
    let bytes = frame.as_bytes();
    if SEPARATORS.iter().any(|&i| bytes[i] != b' ') {
        return Err("fields are misaligned".to_string());
    }

    let verb = Verb::from_wire(&frame[0..2]).ok_or("invalid verb")?;
    let seq = match &frame[3..6] {
        "---" => None,
        s => Some(s.parse::<u16>().map_err(|_| "invalid sequence number")?),
    };

    let mut addrs = [Address::Empty; 3];
    for (i, addr) in addrs.iter_mut().enumerate() {
        let start = 7 + 10 * i;
        *addr = frame[start..start + 9]
            .parse()
            .map_err(|e: Error| e.to_string())?;
    }
    if addrs[0] == Address::Empty {
        return Err("no source address".to_string());
    }

    let code: Code = frame[37..41].parse().map_err(|e: Error| e.to_string())?;

    let len_field = &frame[42..45];
    if !len_field.bytes().all(|b| b.is_ascii_digit()) {
        return Err("invalid length field".to_string());
    }
    let len: usize = len_field.parse().map_err(|_| "invalid length field")?;

    let payload = &frame[FRAME_HEADER_LEN..];
    if payload.len() != 2 * len {
        return Err(format!(
            "payload has {} hex digits, length field says {}",
            payload.len(),
            2 * len
        ));
    }
    if !is_upper_hex(payload) {
        return Err("payload is not uppercase hex".to_string());
    }

    Ok(Packet {
        timestamp,
        rssi,
        verb,
        seq,
        addrs,
        code,
        payload: payload.to_string(),
    })
}

/// Splits a raw line into a packet
///
/// The line may be prefixed by an ISO-8601 timestamp (packet logs) and then
/// by a 3-digit RSSI (gateway output). A logged timestamp overrides
/// `arrival`. Malformed lines are dropped.
pub fn decode(raw_line: &str, arrival: SystemTime) -> Option<Packet> {
    let line = raw_line.trim_end_matches(['\r', '\n']);
    let (logged, rest) = split_timestamp(line);
    let (rssi, frame) = split_rssi(rest);

    match parse_frame(frame, logged.unwrap_or(arrival), rssi) {
        Ok(packet) => Some(packet),
        Err(reason) => {
            tracing::debug!("Dropped line {:?}: {}", raw_line, reason);
            None
        }
    }
}

/// Newline-delimited text framing for gateway byte streams
///
/// Decodes with `LinesCodec`, dropping over-long lines and lines that are not
/// UTF-8 instead of ending the stream; encodes with a CRLF terminator.
#[derive(Clone, Debug)]
pub struct LineCodec {
    lines: LinesCodec,
}

impl LineCodec {
    /// Creates a new line codec
    pub fn new() -> Self {
        LineCodec {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LEN),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                Ok(line) => return Ok(line),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!("Discarding over-long line (more than {} bytes)", MAX_LINE_LEN);
                }
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!("Discarding line that is not UTF-8: {}", e);
                }
                Err(LinesCodecError::Io(e)) => return Err(e.into()),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        match self.lines.decode_eof(src) {
            Ok(line) => Ok(line),
            Err(LinesCodecError::Io(e)) if e.kind() != io::ErrorKind::InvalidData => Err(e.into()),
            Err(e) => {
                tracing::warn!("Discarding trailing partial line: {}", e);
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const RP_0016: &str = "RP --- 01:145038 18:000730 --:------ 0016 002 0022";

    #[test]
    fn test_decode_plain_frame() {
        let arrival = SystemTime::now();
        let pkt = decode(RP_0016, arrival).unwrap();
        assert_eq!(pkt.verb, Verb::Response);
        assert_eq!(pkt.src().to_string(), "01:145038");
        assert_eq!(pkt.dst().to_string(), "18:000730");
        assert_eq!(pkt.code, Code(0x0016));
        assert_eq!(pkt.payload, "0022");
        assert_eq!(pkt.timestamp, arrival);
        assert_eq!(pkt.seq, None);
        assert_eq!(pkt.rssi, None);
    }

    #[test]
    fn test_decode_prefixes() {
        let line = format!("045 {}\r\n", RP_0016);
        let pkt = decode(&line, SystemTime::now()).unwrap();
        assert_eq!(pkt.rssi, Some(45));

        let line = format!("2020-11-01T12:00:00.500000 045 {}", RP_0016);
        let pkt = decode(&line, SystemTime::now()).unwrap();
        let expected = SystemTime::UNIX_EPOCH + Duration::from_millis(1_604_232_000_500);
        assert_eq!(pkt.timestamp, expected);
        assert_eq!(pkt.rssi, Some(45));

        let line = "045  I 003 01:145038 --:------ 01:145038 30C9 003 0007D0";
        let pkt = decode(line, SystemTime::now()).unwrap();
        assert_eq!(pkt.verb, Verb::Info);
        assert_eq!(pkt.seq, Some(3));
        assert_eq!(pkt.dst().to_string(), "01:145038");
    }

    #[test]
    fn test_length_mismatch_is_dropped() {
        let now = SystemTime::now();
        assert!(decode("RP --- 01:145038 18:000730 --:------ 0016 002 00", now).is_none());
        assert!(decode("RP --- 01:145038 18:000730 --:------ 0016 001 0022", now).is_none());
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let now = SystemTime::now();
        for line in [
            "",
            "# a comment",
            "XX --- 01:145038 18:000730 --:------ 0016 002 0022",
            "RP --- 01:14503 18:000730 --:------ 0016 002 0022",
            "RP --- --:------ 18:000730 --:------ 0016 002 0022",
            "RP --- 01:145038 18:000730 --:------ 0016 002 00zz",
            "RP --- 01:145038 18:000730 --:------ 0016 0x2 0022",
            "RP  --- 01:145038 18:000730 --:------ 0016 002 0022",
        ] {
            assert!(decode(line, now).is_none(), "{line:?}");
        }
    }

    #[test]
    fn test_line_codec() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"RQ --- 18:000730 01:145038 --:------ 1F09 001 00\r\n045 RP"[..]);

        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "RQ --- 18:000730 01:145038 --:------ 1F09 001 00");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b" ---\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "045 RP ---");

        let mut out = BytesMut::new();
        codec.encode("RQ".to_string(), &mut out).unwrap();
        assert_eq!(&out[..], b"RQ\r\n");
    }

    #[test]
    fn test_line_codec_discards_over_long_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&vec![b'0'; MAX_LINE_LEN + 1][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"tail of junk\nnext\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "next");
    }

    #[test]
    fn test_line_codec_skips_non_utf8_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe junk\r\n045 RP ---\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "045 RP ---");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_codec_eof() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"partial"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap(), "partial");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }
}
