//! TOML-based engine configuration.
//!
//! Stores:
//! - Escalation offsets and the due-soon window
//! - Ledger retention
//! - Default notification text, icon, and deep-link base
//!
//! Configuration is stored at `~/.config/paywatch/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::ConfigError;

/// Escalation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Hours after the first reminder at which each step fires. Step 0 is
    /// the first entry.
    #[serde(default = "default_offsets")]
    pub offsets_hours: Vec<u32>,
    /// Days ahead of the due day that reminders start (0 = on the day).
    #[serde(default)]
    pub due_soon_window_days: u32,
    /// Ledger entries older than this many cycles are pruned on activate.
    #[serde(default = "default_retention_cycles")]
    pub retention_cycles: u32,
}

/// Notification presentation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_title")]
    pub default_title: String,
    #[serde(default = "default_body")]
    pub default_body: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub badge: Option<String>,
    /// Base URL the deep link is built on.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Attach "Mark paid" / "Open" buttons to reminders.
    #[serde(default = "default_true")]
    pub actions: bool,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/paywatch/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

fn default_offsets() -> Vec<u32> {
    vec![0, 3, 6, 9]
}
fn default_retention_cycles() -> u32 {
    3
}

/// Upper bound for `escalation.retention_cycles`: ten years.
pub const MAX_RETENTION_CYCLES: u32 = 120;
fn default_title() -> String {
    "Payment reminder".into()
}
fn default_body() -> String {
    "You have payments due.".into()
}
fn default_icon() -> String {
    "/images/icon-192x192.png".into()
}
fn default_app_url() -> String {
    "/".into()
}
fn default_true() -> bool {
    true
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            offsets_hours: default_offsets(),
            due_soon_window_days: 0,
            retention_cycles: default_retention_cycles(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            default_body: default_body(),
            icon: default_icon(),
            badge: None,
            app_url: default_app_url(),
            actions: true,
        }
    }
}

impl EscalationConfig {
    /// # Errors
    /// Returns an error if the offsets are empty or decreasing, the
    /// due-soon window exceeds a month, or retention exceeds
    /// [`MAX_RETENTION_CYCLES`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.offsets_hours.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "escalation.offsets_hours".into(),
                message: "at least one offset is required".into(),
            });
        }
        if self.offsets_hours.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::InvalidValue {
                key: "escalation.offsets_hours".into(),
                message: "offsets must be non-decreasing".into(),
            });
        }
        if self.due_soon_window_days > 28 {
            return Err(ConfigError::InvalidValue {
                key: "escalation.due_soon_window_days".into(),
                message: "must be at most 28".into(),
            });
        }
        if self.retention_cycles > MAX_RETENTION_CYCLES {
            return Err(ConfigError::InvalidValue {
                key: "escalation.retention_cycles".into(),
                message: format!("must be at most {MAX_RETENTION_CYCLES}"),
            });
        }
        Ok(())
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Optional strings serialize as null when unset.
                    serde_json::Value::Null if value.is_empty() => serde_json::Value::Null,
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk or create the default file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or is
    /// invalid, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "falling back to default configuration");
                Self::default()
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// # Errors
    /// Returns the first invalid section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.escalation.validate()
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting configuration is invalid. `self` is left unchanged
    /// on error.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save.
    ///
    /// # Errors
    ///
    /// See [`Config::apply`] and [`Config::save`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }
}
