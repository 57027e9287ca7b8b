//! Shared plumbing for the CLI host.

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local};
use paywatch_core::storage::data_dir;
use paywatch_core::{Config, LocalHost, NotificationHost, SqlitePath, SqliteStore, WakeDispatcher};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn Error>>;

/// `at`, or the local wall clock.
pub fn now(at: Option<DateTime<FixedOffset>>) -> DateTime<FixedOffset> {
    at.unwrap_or_else(|| Local::now().fixed_offset())
}

/// The host database next to the store.
///
/// `PAYWATCH_HOST_TRIGGERS=0` simulates a host without scheduled
/// notifications.
pub fn open_host() -> Result<Arc<LocalHost>, Box<dyn Error>> {
    let triggers = std::env::var("PAYWATCH_HOST_TRIGGERS").map_or(true, |v| v != "0");
    let path = data_dir()?.join("host.db");
    Ok(Arc::new(LocalHost::open_at(path, triggers)?))
}

pub fn open_store() -> Result<SqliteStore, Box<dyn Error>> {
    Ok(SqliteStore::open()?)
}

/// A dispatcher that opens the store afresh for every wake.
pub fn dispatcher(host: &Arc<LocalHost>) -> Result<WakeDispatcher, Box<dyn Error>> {
    let host: Arc<dyn NotificationHost> = host.clone();
    Ok(WakeDispatcher::new(
        SqlitePath(SqliteStore::default_path()?),
        host,
        Config::load_or_default(),
    ))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
