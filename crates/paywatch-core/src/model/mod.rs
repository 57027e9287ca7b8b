//! Data model shared by the application and the reminder engine.
//!
//! Obligations and scheduler settings are owned by the application; the
//! engine reads them and only writes the paid flag when the user
//! acknowledges a reminder from the notification itself.

mod cycle;
mod obligation;
mod settings;

pub use cycle::Cycle;
pub use obligation::Obligation;
pub use settings::{DailyTime, SchedulerSettings};
