//! Wake delivery commands for CLI.
//!
//! Each command is one wake: it builds a dispatcher, delivers the wake, and
//! prints the resulting report as JSON.

use std::io::Read;

use chrono::{DateTime, FixedOffset};
use clap::Subcommand;
use paywatch_core::{AppMessage, Handle, Interaction, NotificationHost, Wake, WakeReport};

use crate::common::{dispatcher, open_host, print_json, CliResult};

#[derive(Subcommand)]
pub enum WakeAction {
    /// First start: record installation and arm the daily check
    Install,
    /// Startup housekeeping and catch-up check
    Activate,
    /// Periodic background tick
    Tick {
        #[arg(long, default_value = "periodic-sync")]
        tag: String,
    },
    /// Deliver a push payload (reads stdin when omitted)
    Push { payload: Option<String> },
    /// Click a notification or one of its buttons
    Click {
        /// Notification ID
        id: u64,
        /// Button action (e.g. "mark-paid", "open")
        #[arg(long)]
        action: Option<String>,
    },
    /// Dismiss a notification
    Dismiss {
        /// Notification ID
        id: u64,
    },
    /// Deliver the trigger of one scheduled notification
    Trigger { tag: String },
    /// Deliver every scheduled notification whose trigger time has passed
    FireDue,
    /// Send an application message, e.g. '{"action":"cancel-notifications","obligationId":"A"}'
    Message { json: String },
}

fn find_handle(host: &dyn NotificationHost, id: u64) -> Result<Handle, Box<dyn std::error::Error>> {
    host.outstanding(None)?
        .into_iter()
        .find(|h| h.id == id)
        .ok_or_else(|| format!("no outstanding notification with id {id}").into())
}

pub fn run(action: WakeAction, now: DateTime<FixedOffset>) -> CliResult {
    let host = open_host()?;
    let dispatcher = dispatcher(&host)?;

    let wake = match action {
        WakeAction::Install => Wake::Install,
        WakeAction::Activate => Wake::Activate,
        WakeAction::Tick { tag } => Wake::PeriodicTick { tag },
        WakeAction::Push { payload } => {
            let payload = match payload {
                Some(payload) => payload.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            Wake::ExternalPush { payload }
        }
        WakeAction::Click { id, action } => Wake::UserInteraction {
            handle: find_handle(host.as_ref(), id)?,
            interaction: Interaction::Click { action },
        },
        WakeAction::Dismiss { id } => Wake::UserInteraction {
            handle: find_handle(host.as_ref(), id)?,
            interaction: Interaction::Dismiss,
        },
        WakeAction::Trigger { tag } => Wake::TriggerFired { tag },
        WakeAction::FireDue => {
            let reports: Vec<WakeReport> = host
                .take_due_triggers(now.timestamp_millis())?
                .into_iter()
                .filter(|h| h.request.silent)
                .map(|h| {
                    dispatcher.dispatch(
                        Wake::TriggerFired {
                            tag: h.tag().to_string(),
                        },
                        now,
                    )
                })
                .collect();
            return print_json(&reports);
        }
        WakeAction::Message { json } => Wake::Message(AppMessage::parse(&json)?),
    };

    print_json(&dispatcher.dispatch(wake, now))
}
