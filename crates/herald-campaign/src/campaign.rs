//! The campaign aggregate: one record plus its bound triggers, rebuilt on
//! every reconcile.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::try_join_all;
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{CampaignError, ConfigurationError, DeliveryError, StoreError};
use crate::ports::{AudienceDataProvider, CampaignStore, MessageSender};
use crate::record::{CampaignId, CampaignKind, CampaignRecord, RecipientId, RecipientSet};
use crate::trigger::{Trigger, TriggerCatalog};

/// Default number of concurrent sends per firing.
pub const DEFAULT_MAX_PARALLEL_SENDS: usize = 25;

/// A single URL button under the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub url: String,
}

/// Outbound content of a campaign, computed once per aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// HTML body: bold title line (if any) followed by the text.
    pub text: String,
    /// Photo reference as stored.
    pub photo: Option<String>,
    pub button: Option<Button>,
}

impl Message {
    fn compose(record: &CampaignRecord) -> Result<Self, ConfigurationError> {
        let title = non_empty(&record.title);
        if title.is_none() && record.text.trim().is_empty() {
            return Err(ConfigurationError::EmptyMessage(record.id));
        }

        let text = match title {
            Some(title) => format!("<b>{}</b>\n{}", title, record.text),
            None => record.text.clone(),
        };

        let button = match (non_empty(&record.button_text), non_empty(&record.button_url)) {
            (Some(text), Some(url)) => Some(Button {
                text: text.to_string(),
                url: url.to_string(),
            }),
            _ => None,
        };

        Ok(Self {
            text,
            photo: non_empty(&record.photo).map(str::to_string),
            button,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Everything a firing needs besides the campaign itself.
#[derive(Clone)]
pub struct RunContext {
    pub audience: Arc<dyn AudienceDataProvider>,
    pub sender: Arc<dyn MessageSender>,
    pub store: Arc<dyn CampaignStore>,
    pub clock: Arc<dyn Clock>,
    pub max_parallel_sends: usize,
}

impl RunContext {
    pub fn new(
        audience: Arc<dyn AudienceDataProvider>,
        sender: Arc<dyn MessageSender>,
        store: Arc<dyn CampaignStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            audience,
            sender,
            store,
            clock,
            max_parallel_sends: DEFAULT_MAX_PARALLEL_SENDS,
        }
    }

    pub fn with_max_parallel_sends(mut self, max: usize) -> Self {
        self.max_parallel_sends = max.max(1);
        self
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub recipient: RecipientId,
    pub result: Result<(), DeliveryError>,
}

/// What happened to the activity flag after a firing.
#[derive(Debug)]
pub enum Deactivation {
    /// Recurring campaigns are never deactivated by a run.
    NotApplicable,
    Deactivated,
    /// The store refused; the campaign stays active and may fire again.
    Failed(StoreError),
}

/// Summary of one firing.
#[derive(Debug)]
pub struct RunReport {
    pub campaign_id: CampaignId,
    pub kind: CampaignKind,
    pub outcomes: Vec<DeliveryOutcome>,
    pub deactivation: Deactivation,
}

impl RunReport {
    pub fn targeted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Recipients that were sent to successfully.
    pub fn delivered_to(&self) -> RecipientSet {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.recipient.clone())
            .collect()
    }
}

/// A campaign ready to be scheduled and fired.
#[derive(Debug, Clone)]
pub struct Campaign {
    id: CampaignId,
    name: String,
    kind: CampaignKind,
    scheduled_at: Option<DateTime<Utc>>,
    triggers: Vec<Trigger>,
    message: Message,
}

impl Campaign {
    /// Build the aggregate, rejecting records that can never run.
    pub fn new(record: CampaignRecord, catalog: &TriggerCatalog) -> Result<Self, ConfigurationError> {
        if record.triggers.is_empty() {
            return Err(ConfigurationError::NoTriggers(record.id));
        }
        if record.kind == CampaignKind::OneTime && record.scheduled_at.is_none() {
            return Err(ConfigurationError::MissingScheduledAt(record.id));
        }

        let message = Message::compose(&record)?;
        let triggers = record
            .triggers
            .into_iter()
            .map(|definition| Trigger::new(catalog, definition))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: record.id,
            name: record.name,
            kind: record.kind,
            scheduled_at: record.scheduled_at,
            triggers,
            message,
        })
    }

    pub fn id(&self) -> CampaignId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CampaignKind {
        self.kind
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The trigger whose cadence fires soonest after `now`.
    ///
    /// Ties go to the trigger linked first. Triggers that never fire again are
    /// skipped. This only picks the recurring job's cadence; every trigger is
    /// still evaluated when the job fires. The winner carries both its stored
    /// cron text and the parsed schedule.
    pub fn derive_cadence(&self, now: DateTime<Utc>) -> Result<&Trigger, ConfigurationError> {
        let mut soonest: Option<(DateTime<Utc>, &Trigger)> = None;

        for trigger in &self.triggers {
            let Some(next) = trigger.next_fire_after(now) else {
                continue;
            };
            if soonest.is_none_or(|(best, _)| next < best) {
                soonest = Some((next, trigger));
            }
        }

        soonest
            .map(|(_, trigger)| trigger)
            .ok_or(ConfigurationError::NoUpcomingFire(self.id))
    }

    /// Resolve every trigger and combine the cohorts: union for recurring
    /// campaigns, intersection for one-shot ones.
    ///
    /// Any failing trigger aborts the whole resolution.
    pub async fn resolve_audience(
        &self,
        audience: &dyn AudienceDataProvider,
        today: NaiveDate,
    ) -> Result<RecipientSet, CampaignError> {
        let cohorts = try_join_all(self.triggers.iter().map(|trigger| async move {
            trigger
                .resolve(audience, today)
                .await
                .map_err(|source| CampaignError::AudienceResolution {
                    campaign_id: self.id,
                    trigger: trigger.id(),
                    source,
                })
        }))
        .await?;

        let mut cohorts = cohorts.into_iter();
        let mut pool = cohorts.next().unwrap_or_default();
        for cohort in cohorts {
            match self.kind {
                CampaignKind::Trigger => pool.extend(cohort),
                CampaignKind::OneTime => pool.retain(|recipient| cohort.contains(recipient)),
            }
        }
        Ok(pool)
    }

    /// Fire the campaign once: resolve, deliver to everyone, then deactivate
    /// one-shot campaigns.
    #[tracing::instrument(skip(self, ctx), fields(campaign_id = self.id, kind = %self.kind))]
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport, CampaignError> {
        info!("resolving campaign audience");
        let today = ctx.clock.now().date_naive();
        let recipients = match self.resolve_audience(ctx.audience.as_ref(), today).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(error = %e, "campaign audience resolution failed, skipping this firing");
                return Err(e);
            }
        };
        info!(recipients = recipients.len(), "resolved campaign audience");

        let outcomes = self.deliver(recipients, ctx).await;
        let delivered = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            delivered,
            attempted = outcomes.len(),
            "campaign messages sent"
        );

        let deactivation = match self.kind {
            CampaignKind::Trigger => Deactivation::NotApplicable,
            CampaignKind::OneTime => match ctx.store.update(self.id, false).await {
                Ok(()) => {
                    info!("one-shot campaign deactivated");
                    Deactivation::Deactivated
                }
                Err(e) => {
                    error!(error = %e, "failed to deactivate one-shot campaign, it may fire again");
                    Deactivation::Failed(e)
                }
            },
        };

        Ok(RunReport {
            campaign_id: self.id,
            kind: self.kind,
            outcomes,
            deactivation,
        })
    }

    /// Send to every recipient with bounded concurrency and wait for all of them.
    async fn deliver(&self, recipients: RecipientSet, ctx: &RunContext) -> Vec<DeliveryOutcome> {
        stream::iter(recipients)
            .map(|recipient| async move {
                let result = ctx.sender.send(&recipient, &self.message).await;
                if let Err(e) = &result {
                    warn!(recipient = %recipient, error = %e, "delivery failed");
                }
                DeliveryOutcome { recipient, result }
            })
            .buffer_unordered(ctx.max_parallel_sends.max(1))
            .collect()
            .await
    }
}
