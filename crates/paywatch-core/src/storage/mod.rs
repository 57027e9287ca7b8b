mod config;
pub mod migrations;
pub mod store;

pub use config::{Config, EscalationConfig, NotificationsConfig, MAX_RETENTION_CYCLES};
pub use store::{Collection, DurableStore, OpenStore, SqlitePath, SqliteStore, StoreExt};

use std::path::PathBuf;

/// Returns the data directory.
///
/// `PAYWATCH_DATA_DIR` overrides the location outright. Otherwise this is
/// `~/.config/paywatch[-dev]/`, with `PAYWATCH_ENV=dev` selecting the
/// development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("PAYWATCH_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("PAYWATCH_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("paywatch-dev")
            } else {
                base_dir.join("paywatch")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
