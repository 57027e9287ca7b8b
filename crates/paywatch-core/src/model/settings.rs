use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Preferred wall-clock time for the daily check, rendered `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DailyTime(NaiveTime);

impl DailyTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ValidationError> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidTime(format!("{hour}:{minute}")))
    }

    pub fn as_naive(self) -> NaiveTime {
        self.0
    }
}

impl Default for DailyTime {
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default())
    }
}

impl fmt::Display for DailyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for DailyTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| ValidationError::InvalidTime(s.to_string()))
    }
}

impl Serialize for DailyTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DailyTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Scheduler settings, changed only by explicit configuration messages
/// from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub time: DailyTime,
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            time: DailyTime::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_time_is_nine() {
        assert_eq!(DailyTime::default().to_string(), "09:00");
    }

    #[test]
    fn parses_settings_message_body() {
        let s: SchedulerSettings =
            serde_json::from_str(r#"{"enabled": false, "time": "21:30"}"#).unwrap();
        assert!(!s.enabled);
        assert_eq!(s.time, DailyTime::new(21, 30).unwrap());
    }

    #[test]
    fn rejects_bad_time() {
        assert!("25:00".parse::<DailyTime>().is_err());
        assert!("9am".parse::<DailyTime>().is_err());
        assert!(serde_json::from_str::<SchedulerSettings>(r#"{"time": "noon"}"#).is_err());
    }
}
