//! Obligation management commands for CLI.
//!
//! These stand in for the application that owns obligation records. Paying,
//! unpaying, and deleting update the store first and then tell the engine,
//! the same way the application would.

use chrono::{DateTime, FixedOffset};
use clap::Subcommand;
use paywatch_core::{
    current_cycle, due_occurrence, AppMessage, Collection, Config, Cycle, DurableStore, Obligation,
    StoreExt, Wake,
};
use serde::Serialize;
use uuid::Uuid;

use crate::common::{dispatcher, open_host, open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum ObligationAction {
    /// Add an obligation
    Add {
        /// Display name
        name: String,
        /// Day of month the payment is due (1-31)
        #[arg(long)]
        due_day: u8,
        /// Amount, shown in reminders
        #[arg(long)]
        amount: Option<f64>,
        /// Explicit ID (default: random UUID)
        #[arg(long)]
        id: Option<String>,
        /// First active cycle, YYYY-MM (default: current)
        #[arg(long)]
        since: Option<Cycle>,
    },
    /// List obligations with their due status
    List,
    /// Mark a cycle paid
    Pay {
        id: String,
        /// Cycle, YYYY-MM (default: current)
        #[arg(long)]
        cycle: Option<Cycle>,
    },
    /// Clear a cycle's paid flag
    Unpay {
        id: String,
        #[arg(long)]
        cycle: Option<Cycle>,
    },
    /// Delete an obligation and its reminders
    Delete { id: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObligationStatus<'a> {
    #[serde(flatten)]
    obligation: &'a Obligation,
    paid_this_cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_due: Option<paywatch_core::DueOccurrence>,
}

fn load(store: &dyn DurableStore, id: &str) -> Result<Obligation, Box<dyn std::error::Error>> {
    store
        .get_json::<Obligation>(Collection::Obligations, id)?
        .ok_or_else(|| format!("obligation not found: {id}").into())
}

fn notify_cancel(id: &str, now: DateTime<FixedOffset>) -> CliResult {
    let host = open_host()?;
    let report = dispatcher(&host)?.dispatch(
        Wake::Message(AppMessage::CancelNotifications {
            obligation_id: id.to_string(),
        }),
        now,
    );
    print_json(&report)
}

pub fn run(action: ObligationAction, now: DateTime<FixedOffset>) -> CliResult {
    let store = open_store()?;

    match action {
        ObligationAction::Add {
            name,
            due_day,
            amount,
            id,
            since,
        } => {
            let mut obligation = Obligation::new(
                id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                name,
                due_day,
                since.unwrap_or_else(|| current_cycle(&now)),
            );
            obligation.amount = amount;
            obligation.validate()?;
            let inserted =
                store.put_json_if_absent(Collection::Obligations, &obligation.id, &obligation)?;
            if !inserted {
                return Err(format!("obligation already exists: {}", obligation.id).into());
            }
            print_json(&obligation)?;
        }
        ObligationAction::List => {
            let window = Config::load_or_default().escalation.due_soon_window_days;
            let cycle = current_cycle(&now);
            let mut obligations: Vec<Obligation> = store.get_all_json(Collection::Obligations)?;
            obligations.sort_by(|a, b| a.due_day.cmp(&b.due_day).then_with(|| a.name.cmp(&b.name)));
            let statuses: Vec<ObligationStatus<'_>> = obligations
                .iter()
                .map(|ob| ObligationStatus {
                    obligation: ob,
                    paid_this_cycle: ob.is_paid(cycle),
                    next_due: due_occurrence(ob, now.date_naive(), window),
                })
                .collect();
            print_json(&statuses)?;
        }
        ObligationAction::Pay { id, cycle } => {
            let mut obligation = load(&store, &id)?;
            obligation.set_paid(cycle.unwrap_or_else(|| current_cycle(&now)), true);
            store.put_json(Collection::Obligations, &id, &obligation)?;
            drop(store);
            notify_cancel(&id, now)?;
        }
        ObligationAction::Unpay { id, cycle } => {
            let mut obligation = load(&store, &id)?;
            obligation.set_paid(cycle.unwrap_or_else(|| current_cycle(&now)), false);
            store.put_json(Collection::Obligations, &id, &obligation)?;
            print_json(&obligation)?;
        }
        ObligationAction::Delete { id } => {
            if !store.delete(Collection::Obligations, &id)? {
                return Err(format!("obligation not found: {id}").into());
            }
            drop(store);
            notify_cancel(&id, now)?;
        }
    }
    Ok(())
}
