use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MICROS_PER_SEC: i64 = 1_000_000;

/// A platform message timestamp with microsecond precision.
///
/// On the wire it is the string `"<seconds>.<micros>"` (e.g. `"1700000000.000100"`),
/// in storage it is the integer number of microseconds since the epoch. The
/// timestamp doubles as the message identity within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlackTs(i64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message timestamp {0:?}")]
pub struct ParseTsError(pub String);

impl SlackTs {
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * MICROS_PER_SEC)
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for SlackTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0.div_euclid(MICROS_PER_SEC),
            self.0.rem_euclid(MICROS_PER_SEC)
        )
    }
}

impl FromStr for SlackTs {
    type Err = ParseTsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTsError(s.to_string());

        let (secs, frac) = s.split_once('.').unwrap_or((s, ""));
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        if frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }

        let secs: i64 = secs.parse().map_err(|_| err())?;
        // "5" means 500000 micros, so pad on the right
        let micros: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| err())?
        };

        secs.checked_mul(MICROS_PER_SEC)
            .and_then(|v| v.checked_add(micros))
            .map(Self)
            .ok_or_else(err)
    }
}

impl Serialize for SlackTs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlackTs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let ts: SlackTs = "1700000000.000100".parse().unwrap();
        assert_eq!(ts.as_micros(), 1_700_000_000_000_100);
        assert_eq!(ts.to_string(), "1700000000.000100");
    }

    #[test]
    fn test_short_fraction_is_right_padded() {
        let ts: SlackTs = "12.5".parse().unwrap();
        assert_eq!(ts.as_micros(), 12_500_000);
        assert_eq!(ts.to_string(), "12.500000");

        let whole: SlackTs = "100".parse().unwrap();
        assert_eq!(whole, SlackTs::from_secs(100));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<SlackTs>().is_err());
        assert!("abc.123".parse::<SlackTs>().is_err());
        assert!("1.1234567".parse::<SlackTs>().is_err());
        assert!("-1.0".parse::<SlackTs>().is_err());
    }

    #[test]
    fn test_ordering_follows_time() {
        let a: SlackTs = "100.000001".parse().unwrap();
        let b: SlackTs = "100.1".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_datetime_conversion() {
        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let ts = SlackTs::from_datetime(at);
        assert_eq!(ts.to_string(), "1700000000.250000");
        assert_eq!(ts.to_datetime(), Some(at));
    }

    #[test]
    fn test_serde_as_string() {
        let ts = SlackTs::from_secs(42);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"42.000000\"");
        let back: SlackTs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
