pub mod config;
pub mod host;
pub mod notifications;
pub mod obligation;
pub mod settings;
pub mod wake;
