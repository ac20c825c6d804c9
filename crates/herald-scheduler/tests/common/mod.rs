//! Shared in-memory collaborators for scheduler tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;

use herald_campaign::{
    AudienceDataProvider, AudienceError, CampaignId, CampaignKind, CampaignRecord, CampaignStore,
    DeliveryError, ManualClock, Message, MessageSender, RecipientId, RunContext, StoreError,
    TriggerCatalog, TriggerDefinition, TriggerParams,
};
use herald_scheduler::CampaignScheduler;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap()
}

/// Campaign store backed by a map; `update` flips the stored flag.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<CampaignId, CampaignRecord>>,
    fail_fetch: AtomicBool,
}

impl MemoryStore {
    pub fn put(&self, record: CampaignRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    pub fn is_active(&self, id: CampaignId) -> Option<bool> {
        self.records.lock().unwrap().get(&id).map(|r| r.is_active)
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn get_all(&self, is_active: bool) -> Result<Vec<CampaignRecord>, StoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_active == is_active)
            .cloned()
            .collect())
    }

    async fn update(&self, campaign_id: CampaignId, is_active: bool) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&campaign_id)
            .ok_or(StoreError::NotFound(campaign_id))?;
        record.is_active = is_active;
        Ok(())
    }
}

/// Audience keyed by task id; listed task ids fail.
#[derive(Default)]
pub struct TaskAudience {
    pub cohorts: HashMap<i64, Vec<i64>>,
    pub failing: HashSet<i64>,
}

impl TaskAudience {
    pub fn with(cohorts: &[(i64, &[i64])]) -> Self {
        Self {
            cohorts: cohorts
                .iter()
                .map(|(task, users)| (*task, users.to_vec()))
                .collect(),
            failing: HashSet::new(),
        }
    }

    pub fn failing(mut self, task_id: i64) -> Self {
        self.failing.insert(task_id);
        self
    }
}

#[async_trait]
impl AudienceDataProvider for TaskAudience {
    async fn users_missing_daily_reward(
        &self,
        _day: NaiveDate,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        Ok(vec![])
    }

    async fn users_inactive_since(
        &self,
        _since: NaiveDate,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        Ok(vec![])
    }

    async fn users_below_task_completions(
        &self,
        task_id: i64,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        if self.failing.contains(&task_id) {
            return Err(AudienceError::Query(format!(
                "task {} cohort query failed",
                task_id
            )));
        }
        Ok(self
            .cohorts
            .get(&task_id)
            .map(|ids| ids.iter().copied().map(RecipientId::from).collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<RecipientId>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<RecipientId> {
        let mut sent = self.sent.lock().unwrap().clone();
        sent.sort();
        sent
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, recipient: &RecipientId, _message: &Message) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(recipient.clone());
        Ok(())
    }
}

pub fn task_trigger(task_id: i64, cron: &str) -> TriggerDefinition {
    TriggerDefinition {
        id: 4,
        name: format!("task {} not completed", task_id),
        cron_expression: cron.to_string(),
        trigger_params: TriggerParams::from(json!({ "task_id": task_id })),
    }
}

pub fn campaign(
    id: CampaignId,
    kind: CampaignKind,
    scheduled_at: Option<DateTime<Utc>>,
    triggers: Vec<TriggerDefinition>,
) -> CampaignRecord {
    CampaignRecord {
        id,
        name: format!("campaign {}", id),
        kind,
        scheduled_at,
        title: Some("Weekly quest".to_string()),
        text: "Finish your tasks".to_string(),
        button_text: None,
        button_url: None,
        photo: None,
        is_active: true,
        triggers,
    }
}

pub fn recipients(ids: &[i64]) -> Vec<RecipientId> {
    let mut ids: Vec<RecipientId> = ids.iter().copied().map(RecipientId::from).collect();
    ids.sort();
    ids
}

/// A scheduler over in-memory collaborators and a manual clock set to [`start`].
pub struct Harness {
    pub scheduler: CampaignScheduler,
    pub store: Arc<MemoryStore>,
    pub sender: Arc<RecordingSender>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(audience: TaskAudience, reconcile_every: Duration) -> Self {
        let store = Arc::new(MemoryStore::default());
        let sender = Arc::new(RecordingSender::default());
        let clock = Arc::new(ManualClock::new(start()));
        let context = RunContext::new(
            Arc::new(audience),
            sender.clone(),
            store.clone(),
            clock.clone(),
        );
        let scheduler =
            CampaignScheduler::new(TriggerCatalog::standard(), context, reconcile_every).unwrap();

        Self {
            scheduler,
            store,
            sender,
            clock,
        }
    }

    /// Reconcile only on demand.
    pub fn manual(audience: TaskAudience) -> Self {
        Self::new(audience, Duration::from_secs(24 * 3600))
    }
}
