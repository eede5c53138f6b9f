// Serde adapters for the human readable units used in config files.
// Durations are written like "30 ms" or "2 s", sizes like "1500 B" or "2 KiB".

use byte_unit::Byte;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
pub enum UnitError {
    InvalidDuration(String),
    InvalidSize(String),
}

impl std::fmt::Display for UnitError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            UnitError::InvalidDuration(s) => write!(f, "Invalid duration '{}'", s),
            UnitError::InvalidSize(s) => write!(f, "Invalid size '{}'", s),
        }
    }
}

pub fn parse_duration_argument(s: &str) -> Result<Duration, UnitError> {
    parse_duration::parse(s).map_err(|_| UnitError::InvalidDuration(s.to_owned()))
}

pub fn parse_byte_argument(s: &str) -> Result<usize, UnitError> {
    match Byte::parse_str(s, true) {
        Ok(b) => Ok(b.as_u64() as usize),
        Err(_) => Err(UnitError::InvalidSize(s.to_owned())),
    }
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration_argument(&s).map_err(serde::de::Error::custom)
}

pub fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_byte_argument(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(
            parse_duration_argument("30 ms"),
            Ok(Duration::from_millis(30))
        );
        assert_eq!(parse_byte_argument("1500 B"), Ok(1500));
        assert_eq!(parse_byte_argument("2 KiB"), Ok(2048));
        assert!(parse_duration_argument("soon").is_err());
        assert!(parse_byte_argument("lots").is_err());
    }
}
