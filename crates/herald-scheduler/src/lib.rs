//! Campaign job scheduler for Herald.
//!
//! Keeps one job per active campaign plus a periodic reconcile job that
//! re-derives the job table from the campaign store. Recurring campaigns fire
//! on the cadence of their soonest trigger; one-shot campaigns fire once at
//! their scheduled instant, never earlier than a minute after arming.

mod error;
mod scheduler;
mod types;

pub use error::SchedulerError;
pub use scheduler::{CampaignScheduler, DEFAULT_RECONCILE_INTERVAL, RunResult};
pub use types::{
    JobId, JobSnapshot, JobTrigger, ONE_SHOT_MIN_LEAD_SECS, ReconcileSummary, one_shot_fire_time,
};
