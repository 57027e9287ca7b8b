use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "paywatch", version, about = "Paywatch payment reminders")]
struct Cli {
    /// Evaluate as if the current time were this RFC 3339 timestamp
    #[arg(long, global = true, value_name = "RFC3339")]
    at: Option<DateTime<FixedOffset>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obligation management
    Obligation {
        #[command(subcommand)]
        action: commands::obligation::ObligationAction,
    },
    /// Reminder schedule settings
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Deliver a wake to the engine
    Wake {
        #[command(subcommand)]
        action: commands::wake::WakeAction,
    },
    /// Outstanding notifications
    Notifications {
        #[command(subcommand)]
        action: commands::notifications::NotificationsAction,
    },
    /// Long-running notification host
    Host {
        #[command(subcommand)]
        action: commands::host::HostAction,
    },
}

fn init_tracing() {
    let filter = std::env::var("PAYWATCH_LOG")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let now = common::now(cli.at);
    let result = match cli.command {
        Commands::Obligation { action } => commands::obligation::run(action, now),
        Commands::Settings { action } => commands::settings::run(action, now),
        Commands::Config { action } => commands::config::run(action),
        Commands::Wake { action } => commands::wake::run(action, now),
        Commands::Notifications { action } => commands::notifications::run(action, now),
        Commands::Host { action } => commands::host::run(action, cli.at),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
