use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
}

/// Serializes SystemTime as seconds since UNIX_EPOCH
pub fn serialize_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let duration = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes SystemTime from seconds since UNIX_EPOCH
pub fn deserialize_time<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    let duration = Duration::try_from_secs_f64(secs).map_err(D::Error::custom)?;
    Ok(UNIX_EPOCH + duration)
}

/// Serializes a byte as two uppercase hex digits, e.g. a zone index
pub fn serialize_hex_byte<S>(value: &u8, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    format!("{:02X}", value).serialize(serializer)
}

/// Deserializes a byte from exactly two hex digits
pub fn deserialize_hex_byte<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.len() != 2 {
        return Err(D::Error::custom(format!("expected 2 hex digits, got {:?}", s)));
    }
    u8::from_str_radix(&s, 16).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_time_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_time")]
            #[serde(deserialize_with = "deserialize_time")]
            time: SystemTime,
        }

        let original = Test {
            time: SystemTime::now(),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: Test = serde_json::from_str(&serialized).unwrap();

        let diff = deserialized.time
            .duration_since(original.time)
            .unwrap_or_else(|e| e.duration());

        assert!(diff < Duration::from_millis(1));
    }

    #[test]
    fn test_negative_duration_rejected() {
        #[derive(Deserialize)]
        struct Test {
            #[serde(deserialize_with = "deserialize_duration")]
            #[allow(dead_code)]
            timeout: Duration,
        }

        assert!(serde_json::from_str::<Test>(r#"{"timeout": -1.0}"#).is_err());
        assert!(serde_json::from_str::<Test>(r#"{"timeout": 0.25}"#).is_ok());
    }

    #[test]
    fn test_hex_byte_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_hex_byte")]
            #[serde(deserialize_with = "deserialize_hex_byte")]
            zone_idx: u8,
        }

        let parsed: Test = serde_json::from_str(r#"{"zone_idx": "0A"}"#).unwrap();
        assert_eq!(parsed.zone_idx, 10);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#"{"zone_idx":"0A"}"#);

        assert!(serde_json::from_str::<Test>(r#"{"zone_idx": "A"}"#).is_err());
        assert!(serde_json::from_str::<Test>(r#"{"zone_idx": "GG"}"#).is_err());
    }
}
