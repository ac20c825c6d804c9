//! Campaign job scheduler.
//!
//! The scheduler owns the job table outright: every addition and removal goes
//! through its own methods. Campaign firings run as spawned tasks holding their
//! own `Arc<Campaign>`, so replacing a job never disturbs a run in flight.
//! A one-shot job is never re-armed while its own run is still in flight.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use herald_campaign::{
    Campaign, CampaignError, CampaignId, CampaignKind, ConfigurationError, RunContext, RunReport,
    TriggerCatalog,
};

use crate::types::{JobAction, ScheduledJob, one_shot_fire_time};
use crate::{JobId, JobSnapshot, JobTrigger, ReconcileSummary, SchedulerError};

/// Default period of the reconcile job.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum sleep duration between scheduler checks.
const MIN_SLEEP_SECS: u64 = 1;

/// Maximum sleep duration between scheduler checks.
const MAX_SLEEP_SECS: u64 = 60;

/// Result of one campaign firing, as collected from its task.
pub type RunResult = (CampaignId, Result<RunReport, CampaignError>);

/// The campaign scheduler.
pub struct CampaignScheduler {
    catalog: TriggerCatalog,
    context: RunContext,
    jobs: BTreeMap<JobId, ScheduledJob>,
    in_flight: JoinSet<RunResult>,
    running: HashMap<task::Id, CampaignId>,
}

impl CampaignScheduler {
    /// Create a scheduler whose job table holds only the reconcile job.
    ///
    /// The first periodic reconcile is due one interval from now; callers that
    /// want an immediate pass call [`reconcile`](Self::reconcile) themselves.
    pub fn new(
        catalog: TriggerCatalog,
        context: RunContext,
        reconcile_interval: Duration,
    ) -> Result<Self, SchedulerError> {
        if reconcile_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "reconcile interval must be positive".to_string(),
            ));
        }

        let trigger = JobTrigger::Interval {
            every: reconcile_interval,
        };
        let next_fire = trigger.first_fire(context.clock.now());
        let mut jobs = BTreeMap::new();
        jobs.insert(
            JobId::Reconcile,
            ScheduledJob {
                id: JobId::Reconcile,
                trigger,
                next_fire,
                action: JobAction::Reconcile,
            },
        );

        Ok(Self {
            catalog,
            context,
            jobs,
            in_flight: JoinSet::new(),
            running: HashMap::new(),
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.context.clock.now()
    }

    /// Re-derive the job table from the store's active campaigns.
    ///
    /// Never fails: a failed fetch leaves the table untouched, and a campaign
    /// that cannot be armed is logged, dropped from the table and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&mut self) -> ReconcileSummary {
        debug!("reconciling campaign jobs");
        let now = self.now();
        let mut summary = ReconcileSummary::default();

        let records = match self.context.store.get_all(true).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "failed to fetch active campaigns, keeping current jobs");
                summary.fetch_error = Some(e.to_string());
                return summary;
            }
        };

        let active: HashSet<JobId> = records.iter().map(|r| JobId::Campaign(r.id)).collect();
        let stale: Vec<JobId> = self
            .jobs
            .keys()
            .filter(|id| **id != JobId::Reconcile && !active.contains(id))
            .cloned()
            .collect();
        for id in stale {
            self.remove_job(&id);
            info!(job_id = %id, "removed job of inactive campaign");
            summary.removed.push(id);
        }

        for record in records {
            let campaign_id = record.id;
            let armed = Campaign::new(record, &self.catalog)
                .map_err(SchedulerError::from)
                .and_then(|campaign| self.arm(campaign, now));

            match armed {
                Ok(id) => summary.armed.push(id),
                Err(e) => {
                    error!(campaign_id, error = %e, "failed to schedule campaign");
                    // Never keep firing an outdated definition of a broken campaign.
                    self.remove_job(&JobId::Campaign(campaign_id));
                    summary.rejected.push((campaign_id, e.to_string()));
                }
            }
        }

        info!(
            armed = summary.armed.len(),
            removed = summary.removed.len(),
            rejected = summary.rejected.len(),
            "reconciled campaign jobs"
        );
        summary
    }

    /// Arm or replace the job of one campaign.
    pub fn schedule(&mut self, campaign: Campaign) -> Result<JobId, SchedulerError> {
        let now = self.now();
        self.arm(campaign, now)
    }

    fn arm(&mut self, campaign: Campaign, now: DateTime<Utc>) -> Result<JobId, SchedulerError> {
        let id = JobId::Campaign(campaign.id());
        if campaign.kind() == CampaignKind::OneTime && self.is_running(campaign.id()) {
            // The run deactivates the campaign; the next reconcile drops the job.
            debug!(job_id = %id, "one-shot run in flight, keeping fired job");
            return Ok(id);
        }

        let trigger = match campaign.kind() {
            CampaignKind::Trigger => {
                JobTrigger::Cron(campaign.derive_cadence(now)?.schedule().clone())
            }
            CampaignKind::OneTime => {
                let scheduled_at = campaign
                    .scheduled_at()
                    .ok_or(ConfigurationError::MissingScheduledAt(campaign.id()))?;
                JobTrigger::Date {
                    at: one_shot_fire_time(scheduled_at, now),
                }
            }
        };

        let next_fire = trigger.first_fire(now);
        debug!(job_id = %id, trigger = %trigger, next_fire = ?next_fire, "arming campaign job");

        self.jobs.insert(
            id.clone(),
            ScheduledJob {
                id: id.clone(),
                trigger,
                next_fire,
                action: JobAction::Run(Arc::new(campaign)),
            },
        );
        Ok(id)
    }

    fn remove_job(&mut self, id: &JobId) -> bool {
        self.jobs.remove(id).is_some()
    }

    /// Snapshot of the job table, ordered by job id.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.values().map(ScheduledJob::snapshot).collect()
    }

    /// Snapshot of a single job.
    pub fn job(&self, id: &JobId) -> Option<JobSnapshot> {
        self.jobs.get(id).map(ScheduledJob::snapshot)
    }

    /// Number of campaign runs still in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a run of `campaign_id` is still in flight.
    pub fn is_running(&self, campaign_id: CampaignId) -> bool {
        self.running.values().any(|id| *id == campaign_id)
    }

    /// Fire every job that is due now. Returns how many fired.
    ///
    /// Campaign jobs are spawned before a due reconcile runs, so a reconcile
    /// never re-arms a job past an occurrence that was already due.
    pub async fn run_due_jobs(&mut self) -> usize {
        let now = self.now();
        let due: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.is_due(now))
            .map(|job| job.id.clone())
            .collect();

        let mut fired = 0;
        let mut reconcile_due = false;
        for id in due {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.next_fire = job.trigger.next_after_fire(now);

            match &job.action {
                JobAction::Reconcile => reconcile_due = true,
                JobAction::Run(campaign) => {
                    info!(job_id = %id, next_fire = ?job.next_fire, "firing campaign job");
                    let campaign = Arc::clone(campaign);
                    let campaign_id = campaign.id();
                    let context = self.context.clone();
                    let handle = self.in_flight.spawn(async move {
                        let result = campaign.run(&context).await;
                        (campaign.id(), result)
                    });
                    self.running.insert(handle.id(), campaign_id);
                }
            }
            fired += 1;
        }

        if reconcile_due {
            self.reconcile().await;
        }
        fired
    }

    /// Wait for every in-flight run and return their results.
    pub async fn wait_for_runs(&mut self) -> Vec<RunResult> {
        let mut results = Vec::new();
        while let Some(joined) = self.in_flight.join_next_with_id().await {
            if let Some(result) = self.finish(joined) {
                results.push(result);
            }
        }
        results
    }

    /// Calculate how long to sleep until the next job is due.
    pub fn calculate_sleep_duration(&self) -> Duration {
        let now = self.now();
        let next_due = self.jobs.values().filter_map(|job| job.next_fire).min();

        let secs = match next_due {
            Some(next) => {
                let diff = (next - now).num_seconds();
                (diff.max(MIN_SLEEP_SECS as i64) as u64).min(MAX_SLEEP_SECS)
            }
            None => MAX_SLEEP_SECS,
        };

        Duration::from_secs(secs)
    }

    /// Drive the job table until shutdown, then wait for in-flight runs.
    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(jobs = self.jobs.len(), "scheduler starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.run_due_jobs().await;
            let sleep_duration = self.calculate_sleep_duration();

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                }
                Some(joined) = self.in_flight.join_next_with_id() => {
                    self.finish(joined);
                }
                _ = sleep(sleep_duration) => {}
            }
        }

        if !self.in_flight.is_empty() {
            info!(in_flight = self.in_flight.len(), "waiting for in-flight campaign runs");
        }
        self.wait_for_runs().await;
        info!("scheduler shut down gracefully");
    }

    fn finish(&mut self, joined: Result<(task::Id, RunResult), JoinError>) -> Option<RunResult> {
        let task_id = match &joined {
            Ok((task_id, _)) => *task_id,
            Err(e) => e.id(),
        };
        self.running.remove(&task_id);

        match joined {
            Ok((_, (campaign_id, Ok(report)))) => {
                info!(
                    campaign_id,
                    delivered = report.delivered(),
                    targeted = report.targeted(),
                    "campaign run finished"
                );
                Some((campaign_id, Ok(report)))
            }
            Ok((_, (campaign_id, Err(e)))) => {
                warn!(campaign_id, error = %e, "campaign run aborted, job stays armed");
                Some((campaign_id, Err(e)))
            }
            Err(e) => {
                error!(error = %e, "campaign run task failed");
                None
            }
        }
    }
}
