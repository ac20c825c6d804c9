//! End-to-end campaign firings through the scheduler.

mod common;

use std::time::Duration;

use chrono::TimeZone;
use chrono::Utc;

use herald_campaign::{
    Campaign, CampaignError, CampaignKind, ConfigurationError, Deactivation, TriggerCatalog,
};
use herald_scheduler::{JobId, JobTrigger, SchedulerError};

use common::{Harness, TaskAudience, campaign, recipients, start, task_trigger};

#[tokio::test]
async fn test_recurring_campaign_delivers_to_union_of_cohorts() {
    let mut h = Harness::manual(TaskAudience::with(&[(1, &[1, 2, 3]), (2, &[3, 4])]));
    h.store.put(campaign(
        11,
        CampaignKind::Trigger,
        None,
        vec![
            task_trigger(1, "0 10 * * *"),
            task_trigger(2, "30 10 * * *"),
        ],
    ));

    let summary = h.scheduler.reconcile().await;
    assert_eq!(summary.armed, vec![JobId::Campaign(11)]);

    let ten = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
    let job = h.scheduler.job(&JobId::Campaign(11)).unwrap();
    assert_eq!(job.next_fire, Some(ten));

    h.clock.set(ten);
    assert_eq!(h.scheduler.run_due_jobs().await, 1);

    let results = h.scheduler.wait_for_runs().await;
    assert_eq!(results.len(), 1);
    let (id, result) = &results[0];
    assert_eq!(*id, 11);
    let report = result.as_ref().unwrap();
    assert_eq!(report.delivered(), 4);
    assert!(matches!(report.deactivation, Deactivation::NotApplicable));
    assert_eq!(h.sender.sent(), recipients(&[1, 2, 3, 4]));

    // Recurring jobs stay armed on their cadence and campaigns stay active.
    let job = h.scheduler.job(&JobId::Campaign(11)).unwrap();
    assert_eq!(
        job.next_fire,
        Some(Utc.with_ymd_and_hms(2026, 3, 11, 10, 0, 0).unwrap())
    );
    assert_eq!(h.store.is_active(11), Some(true));
}

#[tokio::test]
async fn test_one_shot_campaign_delivers_to_intersection_and_deactivates() {
    let mut h = Harness::manual(TaskAudience::with(&[(1, &[1, 2, 3]), (2, &[2, 3, 4])]));
    let at = start() + chrono::Duration::hours(2);
    h.store.put(campaign(
        12,
        CampaignKind::OneTime,
        Some(at),
        vec![task_trigger(1, "0 10 * * *"), task_trigger(2, "0 10 * * *")],
    ));

    h.scheduler.reconcile().await;
    let job = h.scheduler.job(&JobId::Campaign(12)).unwrap();
    assert_eq!(job.trigger, JobTrigger::Date { at });
    assert_eq!(job.next_fire, Some(at));

    h.clock.set(at);
    assert_eq!(h.scheduler.run_due_jobs().await, 1);
    let results = h.scheduler.wait_for_runs().await;
    let report = results[0].1.as_ref().unwrap();
    assert!(matches!(report.deactivation, Deactivation::Deactivated));
    assert_eq!(h.sender.sent(), recipients(&[2, 3]));
    assert_eq!(h.store.is_active(12), Some(false));

    // Fired one-shots linger without a next fire until the next reconcile.
    let job = h.scheduler.job(&JobId::Campaign(12)).unwrap();
    assert_eq!(job.next_fire, None);
    assert_eq!(h.scheduler.run_due_jobs().await, 0);

    let summary = h.scheduler.reconcile().await;
    assert_eq!(summary.removed, vec![JobId::Campaign(12)]);
    assert!(h.scheduler.job(&JobId::Campaign(12)).is_none());
}

#[tokio::test]
async fn test_one_shot_fires_once_when_reconcile_is_due_alongside_it() {
    let mut h = Harness::new(TaskAudience::with(&[(1, &[1, 2])]), Duration::from_secs(60));
    let at = start() + chrono::Duration::minutes(1);
    h.store.put(campaign(
        17,
        CampaignKind::OneTime,
        Some(at),
        vec![task_trigger(1, "0 10 * * *")],
    ));
    h.scheduler.reconcile().await;

    // The periodic reconcile lands on the same tick and still sees the campaign active.
    h.clock.set(at);
    assert_eq!(h.scheduler.run_due_jobs().await, 2);
    assert!(h.scheduler.is_running(17));
    let job = h.scheduler.job(&JobId::Campaign(17)).unwrap();
    assert_eq!(job.next_fire, None);

    h.scheduler.wait_for_runs().await;
    assert!(!h.scheduler.is_running(17));
    assert_eq!(h.store.is_active(17), Some(false));

    h.clock.set(at + chrono::Duration::minutes(1));
    assert_eq!(h.scheduler.run_due_jobs().await, 1);
    h.scheduler.wait_for_runs().await;

    assert_eq!(h.sender.sent(), recipients(&[1, 2]));
    assert!(h.scheduler.job(&JobId::Campaign(17)).is_none());
}

#[tokio::test]
async fn test_overdue_one_shot_is_clamped_to_one_minute_ahead() {
    let mut h = Harness::manual(TaskAudience::with(&[(1, &[1])]));
    h.store.put(campaign(
        13,
        CampaignKind::OneTime,
        Some(start() - chrono::Duration::minutes(10)),
        vec![task_trigger(1, "* * * * *")],
    ));

    h.scheduler.reconcile().await;
    let job = h.scheduler.job(&JobId::Campaign(13)).unwrap();
    let clamped = start() + chrono::Duration::minutes(1);
    assert_eq!(job.trigger, JobTrigger::Date { at: clamped });

    h.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(h.scheduler.run_due_jobs().await, 0);

    h.clock.set(clamped);
    assert_eq!(h.scheduler.run_due_jobs().await, 1);
    h.scheduler.wait_for_runs().await;
    assert_eq!(h.sender.sent(), recipients(&[1]));
}

#[tokio::test]
async fn test_failing_trigger_skips_firing_and_keeps_job_armed() {
    let audience = TaskAudience::with(&[(1, &[1, 2])]).failing(2);
    let mut h = Harness::manual(audience);
    h.store.put(campaign(
        14,
        CampaignKind::Trigger,
        None,
        vec![task_trigger(1, "0 10 * * *"), task_trigger(2, "0 12 * * *")],
    ));
    h.scheduler.reconcile().await;

    let ten = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
    h.clock.set(ten);
    assert_eq!(h.scheduler.run_due_jobs().await, 1);

    let results = h.scheduler.wait_for_runs().await;
    assert!(matches!(
        &results[0],
        (14, Err(CampaignError::AudienceResolution { trigger: 4, .. }))
    ));
    assert!(h.sender.sent().is_empty());

    let job = h.scheduler.job(&JobId::Campaign(14)).unwrap();
    assert_eq!(
        job.next_fire,
        Some(Utc.with_ymd_and_hms(2026, 3, 11, 10, 0, 0).unwrap())
    );
    assert_eq!(h.store.is_active(14), Some(true));
}

#[tokio::test]
async fn test_schedule_arms_a_single_campaign() {
    let mut h = Harness::manual(TaskAudience::default());
    let record = campaign(
        15,
        CampaignKind::Trigger,
        None,
        vec![task_trigger(1, "15 * * * *")],
    );
    let built = Campaign::new(record, &TriggerCatalog::standard()).unwrap();

    assert_eq!(h.scheduler.schedule(built).unwrap(), JobId::Campaign(15));
    let job = h.scheduler.job(&JobId::Campaign(15)).unwrap();
    assert_eq!(
        job.next_fire,
        Some(Utc.with_ymd_and_hms(2026, 3, 10, 10, 15, 0).unwrap())
    );
}

#[tokio::test]
async fn test_schedule_rejects_campaign_that_never_fires() {
    let mut h = Harness::manual(TaskAudience::default());
    let record = campaign(
        16,
        CampaignKind::Trigger,
        None,
        vec![task_trigger(1, "0 0 30 2 *")],
    );
    let built = Campaign::new(record, &TriggerCatalog::standard()).unwrap();

    assert!(matches!(
        h.scheduler.schedule(built),
        Err(SchedulerError::Configuration(
            ConfigurationError::NoUpcomingFire(16)
        ))
    ));
    assert!(h.scheduler.job(&JobId::Campaign(16)).is_none());
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let h = Harness::new(TaskAudience::default(), Duration::from_secs(60));
    let mut scheduler = h.scheduler;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
        scheduler
    });

    shutdown_tx.send(true).unwrap();
    let scheduler = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(scheduler.in_flight(), 0);
}
