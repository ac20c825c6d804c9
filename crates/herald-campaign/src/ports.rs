//! Collaborators the engine consumes: campaign store, audience data and
//! message transport.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::campaign::Message;
use crate::error::{AudienceError, DeliveryError, StoreError};
use crate::record::{CampaignId, CampaignRecord, RecipientId};

/// Persistent campaign records.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// All campaigns with the given activity flag, each with its linked triggers.
    async fn get_all(&self, is_active: bool) -> Result<Vec<CampaignRecord>, StoreError>;

    /// Set the activity flag. Setting a flag to its current value succeeds.
    async fn update(&self, campaign_id: CampaignId, is_active: bool) -> Result<(), StoreError>;
}

/// Read-only behavioral cohort queries, one per trigger kind.
#[async_trait]
pub trait AudienceDataProvider: Send + Sync {
    /// Users who have not claimed the daily reward on `day`.
    async fn users_missing_daily_reward(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<RecipientId>, AudienceError>;

    /// Users with no recorded activity on or after `since`.
    async fn users_inactive_since(&self, since: NaiveDate)
    -> Result<Vec<RecipientId>, AudienceError>;

    /// Users below the required completion count of a task.
    async fn users_below_task_completions(
        &self,
        task_id: i64,
    ) -> Result<Vec<RecipientId>, AudienceError>;
}

/// Outbound message transport. Retries, if any, belong to the implementation.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &RecipientId, message: &Message) -> Result<(), DeliveryError>;
}
