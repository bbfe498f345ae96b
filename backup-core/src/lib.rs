pub mod backup;
pub mod catalog;
pub mod compression;
pub mod config;
pub mod constants;
pub mod cron;
pub mod error;
pub mod export;
pub mod graph;
pub mod jobs;
pub mod restore;
pub mod service;
pub mod state;
pub mod statement;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use error::{BackupError, Result};
pub use service::BackupService;
pub use state::{JobStatus, RestorePhase, ScheduleSettings};
