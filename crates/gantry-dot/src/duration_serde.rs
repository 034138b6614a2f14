//! Serde support and canonical formatting for duration attribute values.

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Canonical text form: whole seconds as `Ns`, otherwise `Nms`.
pub(crate) fn format_duration(d: &Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let (digits, mult_ms) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1u64)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else if let Some(v) = s.strip_suffix('d') {
        (v, 86_400_000)
    } else {
        return Err(format!("unknown duration format: {}", s));
    };
    let n: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration: {}", e))?;
    Ok(Duration::from_millis(n * mult_ms))
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_whole_seconds_uses_s_suffix() {
        assert_eq!(format_duration(&Duration::from_secs(900)), "900s");
        assert_eq!(format_duration(&Duration::from_millis(250)), "250ms");
    }

    #[test]
    fn parse_all_suffixes() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
        assert!(parse_duration("12").is_err());
    }

    #[test]
    fn format_parse_round_trip() {
        for d in [Duration::from_millis(1500), Duration::from_secs(60)] {
            assert_eq!(parse_duration(&format_duration(&d)).unwrap(), d);
        }
    }
}
