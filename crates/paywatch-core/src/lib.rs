//! # Paywatch Core Library
//!
//! This library is the reminder engine behind Paywatch: it tells the user
//! about recurring payments that are due, from a process the host may
//! suspend or kill between wakes. The CLI is a thin host over the same
//! library.
//!
//! ## Architecture
//!
//! - **Storage**: SQLite key/value store for obligations, settings, and the
//!   dedup ledger, plus TOML-based engine configuration
//! - **Cycle calculator**: pure date logic for "is this due now"
//! - **Ledger**: at-most-once claims per (obligation, cycle, step)
//! - **Escalation**: step sequencing, chained through scheduled notifications
//! - **Dispatcher**: one entry point per host wake
//! - **Presenter**: reminder rendering and the notification host seam
//!
//! ## Key Components
//!
//! - [`WakeDispatcher`]: Host entry point
//! - [`EscalationScheduler`]: Reminder state machine
//! - [`DedupLedger`]: Fired-reminder bookkeeping
//! - [`SqliteStore`]: Durable store
//! - [`NotificationHost`]: Trait for the host's notification surface

pub mod cycle;
pub mod dispatcher;
pub mod error;
pub mod escalation;
pub mod ledger;
pub mod messages;
pub mod model;
pub mod presenter;
pub mod storage;

pub use cycle::{current_cycle, due_occurrence, is_due, is_due_within, DueOccurrence};
pub use dispatcher::{Interaction, Outcome, Wake, WakeDispatcher, WakeReport};
pub use error::{ConfigError, CoreError, PresentError, StoreError, ValidationError};
pub use escalation::{next_daily_check, EscalationScheduler, EscalationState};
pub use ledger::{DedupKey, DedupLedger, FiredRecord};
pub use messages::{AppMessage, PushPayload};
pub use model::{Cycle, DailyTime, Obligation, SchedulerSettings};
pub use presenter::{Handle, LocalHost, MemoryHost, NotificationHost, NotificationRequest, Presenter};
pub use storage::{Collection, Config, DurableStore, OpenStore, SqlitePath, SqliteStore, StoreExt};
