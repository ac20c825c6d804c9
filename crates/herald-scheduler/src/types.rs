//! Scheduler types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_campaign::{Campaign, CampaignId, CronSchedule};

/// Minimum lead time, in seconds, of a one-shot job relative to the moment it is armed.
pub const ONE_SHOT_MIN_LEAD_SECS: i64 = 60;

/// Identity of a job in the table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobId {
    /// The periodic reconcile job.
    Reconcile,
    /// The job of one campaign; at most one per campaign id.
    Campaign(CampaignId),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile => f.write_str("sync_campaigns"),
            Self::Campaign(id) => write!(f, "{}", id),
        }
    }
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTrigger {
    /// Every fixed period, measured from the previous fire.
    Interval { every: Duration },
    /// On a cron cadence.
    Cron(CronSchedule),
    /// Once, at an instant.
    Date { at: DateTime<Utc> },
}

impl JobTrigger {
    /// First fire time when armed at `now`.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Date { at } => Some(*at),
            _ => self.next_after_fire(now),
        }
    }

    /// Next fire time after firing at `fired_at`. One-shot triggers are exhausted.
    pub fn next_after_fire(&self, fired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every } => {
                let every = chrono::Duration::from_std(*every).ok()?;
                Some(fired_at + every)
            }
            Self::Cron(schedule) => schedule.next_after(fired_at),
            Self::Date { .. } => None,
        }
    }
}

impl fmt::Display for JobTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { every } => write!(f, "interval[{}s]", every.as_secs()),
            Self::Cron(schedule) => write!(f, "cron[{}]", schedule),
            Self::Date { at } => write!(f, "date[{}]", at.to_rfc3339()),
        }
    }
}

/// Fire instant of a one-shot campaign armed at `now`: never earlier than one
/// minute from now, even when `scheduled_at` has already passed.
pub fn one_shot_fire_time(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    scheduled_at.max(now + chrono::Duration::seconds(ONE_SHOT_MIN_LEAD_SECS))
}

/// What a job does when it fires.
#[derive(Debug, Clone)]
pub(crate) enum JobAction {
    Reconcile,
    Run(Arc<Campaign>),
}

/// A live entry of the job table.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledJob {
    pub id: JobId,
    pub trigger: JobTrigger,
    /// `None` once a one-shot job has fired.
    pub next_fire: Option<DateTime<Utc>>,
    pub action: JobAction,
}

impl ScheduledJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire.is_some_and(|at| at <= now)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            trigger: self.trigger.clone(),
            next_fire: self.next_fire,
        }
    }
}

/// Read-only view of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub trigger: JobTrigger,
    pub next_fire: Option<DateTime<Utc>>,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    /// Campaign jobs armed or replaced.
    pub armed: Vec<JobId>,
    /// Jobs removed because their campaign is no longer active.
    pub removed: Vec<JobId>,
    /// Active campaigns that could not be armed, with the reason.
    pub rejected: Vec<(CampaignId, String)>,
    /// Set when the active set could not be fetched; the table was left untouched.
    pub fetch_error: Option<String>,
}
