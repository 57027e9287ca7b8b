//! Engine configuration commands for CLI.
//!
//! Keys are dot-paths into `config.toml`, e.g. `escalation.offsets_hours`.

use clap::Subcommand;
use paywatch_core::{Config, ConfigError};
use serde_json::{json, Value};

use crate::common::{print_json, CliResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show one value
    Get {
        /// Dot-path, e.g. "escalation.offsets_hours"
        key: String,
    },
    /// Change one value and save
    Set {
        key: String,
        /// JSON for arrays and numbers, e.g. "[0, 2, 4]"
        value: String,
    },
    /// Show the whole configuration
    List,
    /// Write the defaults back to disk
    Reset,
}

fn lookup(config: &Config, key: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let root = serde_json::to_value(config)?;
    root.pointer(&format!("/{}", key.replace('.', "/")))
        .filter(|value| !value.is_object())
        .cloned()
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()).into())
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let value = lookup(&Config::load()?, &key)?;
            print_json(&json!({ "key": key, "value": value }))
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            let value = lookup(&config, &key)?;
            print_json(&json!({ "key": key, "value": value }))
        }
        ConfigAction::List => print_json(&Config::load()?),
        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            print_json(&config)
        }
    }
}
