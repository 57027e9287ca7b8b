use chrono::{DateTime, FixedOffset};
use clap::Subcommand;
use paywatch_core::NotificationHost;

use crate::common::{open_host, print_json, CliResult};

#[derive(Subcommand)]
pub enum NotificationsAction {
    /// List outstanding notifications
    List {
        /// Only tags starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Only scheduled notifications still waiting for their trigger
        #[arg(long)]
        pending: bool,
        /// Only notifications shown to the user
        #[arg(long, conflicts_with = "pending")]
        visible: bool,
    },
}

pub fn run(action: NotificationsAction, now: DateTime<FixedOffset>) -> CliResult {
    let host = open_host()?;
    let now_ms = now.timestamp_millis();

    match action {
        NotificationsAction::List {
            prefix,
            pending,
            visible,
        } => {
            let handles: Vec<_> = host
                .outstanding(prefix.as_deref())?
                .into_iter()
                .filter(|h| !pending || h.is_pending(now_ms))
                .filter(|h| !visible || (!h.request.silent && !h.is_pending(now_ms)))
                .collect();
            print_json(&handles)
        }
    }
}
