use chrono::{DateTime, FixedOffset};
use clap::Subcommand;
use paywatch_core::dispatcher::SETTINGS_KEY;
use paywatch_core::{Collection, DailyTime, SchedulerSettings, StoreExt, Wake};

use crate::common::{dispatcher, open_host, open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show the current settings
    Show,
    /// Change settings and re-arm the daily check
    Set {
        /// Enable or disable reminders
        #[arg(long)]
        enabled: Option<bool>,
        /// Daily check time, HH:MM
        #[arg(long)]
        time: Option<DailyTime>,
    },
}

pub fn run(action: SettingsAction, now: DateTime<FixedOffset>) -> CliResult {
    let current: SchedulerSettings = open_store()?
        .get_json(Collection::Meta, SETTINGS_KEY)?
        .unwrap_or_default();

    match action {
        SettingsAction::Show => print_json(&current),
        SettingsAction::Set { enabled, time } => {
            let settings = SchedulerSettings {
                enabled: enabled.unwrap_or(current.enabled),
                time: time.unwrap_or(current.time),
            };
            let host = open_host()?;
            let report = dispatcher(&host)?.dispatch(Wake::settings(settings), now);
            print_json(&report)
        }
    }
}
