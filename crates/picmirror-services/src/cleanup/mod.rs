//! Deferred deletion of produced files.

pub mod scheduler;
pub mod sweep;

pub use scheduler::{CleanupEntry, CleanupScheduler, ReapReport, SchedulerSettings, SchedulerState};
pub use sweep::sweep_stale_temps;
