//! Error taxonomy for campaign construction and runs.

use thiserror::Error;

use crate::cron::CronError;
use crate::record::{CampaignId, CatalogId};

/// A campaign or trigger is shaped in a way that can never work.
///
/// Raised while building a [`Campaign`](crate::Campaign) or while a trigger
/// interprets its params. The scheduler catches it per campaign.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The campaign has no linked triggers.
    #[error("campaign {0} has no linked triggers")]
    NoTriggers(CampaignId),

    /// A one-shot campaign without a scheduled instant.
    #[error("one-shot campaign {0} has no scheduled_at")]
    MissingScheduledAt(CampaignId),

    /// Title and text are both empty.
    #[error("campaign {0} has an empty message body")]
    EmptyMessage(CampaignId),

    /// The catalog id is not mapped to any strategy.
    #[error("unknown trigger catalog id {0}")]
    UnknownTrigger(CatalogId),

    /// The catalog id is mapped, but the strategy has no audience query yet.
    #[error("trigger {name} (catalog id {id}) has no implementation")]
    StrategyNotImplemented { id: CatalogId, name: String },

    /// A required trigger param is missing or has the wrong type.
    #[error("trigger {trigger} param `{param}`: {reason}")]
    InvalidTriggerParam {
        trigger: CatalogId,
        param: &'static str,
        reason: String,
    },

    /// A trigger's cron expression could not be parsed.
    #[error("trigger {trigger} cron expression: {source}")]
    InvalidCron {
        trigger: CatalogId,
        #[source]
        source: CronError,
    },

    /// None of the campaign's triggers will ever fire again.
    #[error("campaign {0} has no upcoming trigger fire time")]
    NoUpcomingFire(CampaignId),
}

/// An audience query failed.
#[derive(Debug, Error)]
pub enum AudienceError {
    /// The backing query failed.
    #[error("audience query failed: {0}")]
    Query(String),
}

/// One recipient did not receive the message.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The transport answered, but refused the message.
    #[error("rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },

    /// The transport could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
}

/// The campaign store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No campaign with this id.
    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded.
    #[error("malformed campaign row {id}: {reason}")]
    Malformed { id: CampaignId, reason: String },
}

/// Resolving a single trigger's cohort failed.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Audience(#[from] AudienceError),
}

/// A campaign firing was aborted before delivery.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// One of the triggers could not be resolved, so the audience is unknown.
    #[error("campaign {campaign_id}: trigger {trigger} failed to resolve: {source}")]
    AudienceResolution {
        campaign_id: CampaignId,
        trigger: CatalogId,
        #[source]
        source: TriggerError,
    },
}
