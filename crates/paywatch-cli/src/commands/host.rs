//! Long-running host loop for CLI.
//!
//! Plays the part of the platform: delivers scheduled notifications when
//! their trigger time comes, sends periodic ticks, and waits for each wake
//! to finish before starting the next.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use clap::Subcommand;
use paywatch_core::{LocalHost, Wake, WakeDispatcher, WakeReport};
use tracing::{info, warn};

use crate::common::{dispatcher, now, open_host, CliResult};

#[derive(Subcommand)]
pub enum HostAction {
    /// Run until interrupted
    Run {
        /// Seconds between checks for due triggers
        #[arg(long, default_value = "30")]
        poll_secs: u64,
        /// Seconds between periodic ticks
        #[arg(long, default_value = "900")]
        tick_secs: u64,
        /// Activate, deliver due triggers once, and exit
        #[arg(long)]
        once: bool,
    },
}

pub fn run(action: HostAction, at: Option<DateTime<FixedOffset>>) -> CliResult {
    match action {
        HostAction::Run {
            poll_secs,
            tick_secs,
            once,
        } => {
            let host = open_host()?;
            let dispatcher = Arc::new(dispatcher(&host)?);
            let rt = tokio::runtime::Runtime::new()?;
            if once {
                return rt.block_on(run_once(&host, &dispatcher, now(at)));
            }
            rt.block_on(serve(
                host,
                dispatcher,
                Duration::from_secs(poll_secs.max(1)),
                Duration::from_secs(tick_secs.max(1)),
            ))
        }
    }
}

/// Run one wake to completion off the async workers.
async fn deliver(dispatcher: &Arc<WakeDispatcher>, wake: Wake, at: DateTime<FixedOffset>) -> CliResult {
    let dispatcher = Arc::clone(dispatcher);
    let report = tokio::task::spawn_blocking(move || dispatcher.dispatch(wake, at)).await?;
    emit(&report)
}

fn emit(report: &WakeReport) -> CliResult {
    if !report.errors.is_empty() {
        warn!(reason = report.reason, errors = ?report.errors, "wake finished with errors");
    }
    println!("{}", serde_json::to_string(report)?);
    Ok(())
}

async fn fire_due(host: &LocalHost, dispatcher: &Arc<WakeDispatcher>, at: DateTime<FixedOffset>) -> CliResult {
    let mut failed = None;
    for handle in host.take_due_triggers(at.timestamp_millis())? {
        if !handle.request.silent {
            continue;
        }
        let wake = Wake::TriggerFired {
            tag: handle.tag().to_string(),
        };
        // Triggers are already taken; keep going so later ones still run.
        if let Err(err) = deliver(dispatcher, wake, at).await {
            warn!(tag = %handle.tag(), error = %err, "trigger wake failed");
            failed = Some(err);
        }
    }
    failed.map_or(Ok(()), Err)
}

async fn run_once(host: &LocalHost, dispatcher: &Arc<WakeDispatcher>, at: DateTime<FixedOffset>) -> CliResult {
    deliver(dispatcher, Wake::Activate, at).await?;
    fire_due(host, dispatcher, at).await
}

async fn serve(
    host: Arc<LocalHost>,
    dispatcher: Arc<WakeDispatcher>,
    poll: Duration,
    tick: Duration,
) -> CliResult {
    deliver(&dispatcher, Wake::Activate, now(None)).await?;
    info!(poll_secs = poll.as_secs(), tick_secs = tick.as_secs(), "host running");

    let mut poll_timer = tokio::time::interval(poll);
    let mut tick_timer = tokio::time::interval(tick);
    // Activation already ran a full check.
    tick_timer.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("host stopping");
                return Ok(());
            }
            _ = poll_timer.tick() => {
                if let Err(err) = fire_due(&host, &dispatcher, now(None)).await {
                    warn!(error = %err, "delivering due triggers failed");
                }
            }
            _ = tick_timer.tick() => {
                let wake = Wake::PeriodicTick { tag: "periodic-sync".into() };
                if let Err(err) = deliver(&dispatcher, wake, now(None)).await {
                    warn!(error = %err, "periodic tick failed");
                }
            }
        }
    }
}
