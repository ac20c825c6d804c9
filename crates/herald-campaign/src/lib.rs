//! Campaign model for Herald.
//!
//! This crate provides:
//! - Campaign records and trigger definitions as handed over by the store
//! - A 5-field cron parser used for trigger cadences
//! - The fixed trigger catalog and its audience strategies
//! - The [`Campaign`] aggregate that resolves an audience and delivers a message
//! - The collaborator traits (store, audience data, transport) it runs against

mod campaign;
mod clock;
pub mod cron;
mod error;
mod ports;
mod record;
mod trigger;

pub use campaign::{
    Button, Campaign, DEFAULT_MAX_PARALLEL_SENDS, Deactivation, DeliveryOutcome, Message,
    RunContext, RunReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::{CronError, CronSchedule};
pub use error::{
    AudienceError, CampaignError, ConfigurationError, DeliveryError, StoreError, TriggerError,
};
pub use ports::{AudienceDataProvider, CampaignStore, MessageSender};
pub use record::{
    CampaignId, CampaignKind, CampaignRecord, CatalogId, RecipientId, RecipientSet,
    TriggerDefinition, TriggerParams,
};
pub use trigger::{Trigger, TriggerCatalog, TriggerKind};
