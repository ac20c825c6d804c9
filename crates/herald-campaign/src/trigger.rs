//! Trigger catalog and audience strategies.
//!
//! Every catalog id maps to exactly one [`TriggerKind`]. The mapping is a
//! fixed table built once at startup ([`TriggerCatalog::standard`]); the
//! catalog id is the persisted contract, the enum variant is internal.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use crate::cron::CronSchedule;
use crate::error::{ConfigurationError, TriggerError};
use crate::ports::AudienceDataProvider;
use crate::record::{CatalogId, RecipientSet, TriggerDefinition, TriggerParams};

/// Behavioral condition behind a catalog id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Has not claimed today's daily reward.
    DailyRewardUnclaimed,
    /// Received a first prediction.
    FirstPrediction,
    /// Inactive for `inactive_days` days.
    Inactivity,
    /// Has not reached the required completions of `task_id`.
    TaskIncomplete,
    /// A giveaway ends soon.
    GiveawayEndingSoon,
    /// Did not take part in a giveaway.
    GiveawayNonParticipation,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 6] = [
        Self::DailyRewardUnclaimed,
        Self::FirstPrediction,
        Self::Inactivity,
        Self::TaskIncomplete,
        Self::GiveawayEndingSoon,
        Self::GiveawayNonParticipation,
    ];

    /// The persisted catalog id of this kind.
    pub fn catalog_id(self) -> CatalogId {
        match self {
            Self::DailyRewardUnclaimed => 1,
            Self::FirstPrediction => 2,
            Self::Inactivity => 3,
            Self::TaskIncomplete => 4,
            Self::GiveawayEndingSoon => 5,
            Self::GiveawayNonParticipation => 6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::DailyRewardUnclaimed => "daily_reward_unclaimed",
            Self::FirstPrediction => "first_prediction",
            Self::Inactivity => "inactivity",
            Self::TaskIncomplete => "task_incomplete",
            Self::GiveawayEndingSoon => "giveaway_ending_soon",
            Self::GiveawayNonParticipation => "giveaway_non_participation",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Catalog id to strategy table.
#[derive(Debug, Clone)]
pub struct TriggerCatalog {
    kinds: HashMap<CatalogId, TriggerKind>,
}

impl TriggerCatalog {
    /// The production catalog: every [`TriggerKind`] under its own id.
    pub fn standard() -> Self {
        Self::from_kinds(TriggerKind::ALL)
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = TriggerKind>) -> Self {
        Self {
            kinds: kinds
                .into_iter()
                .map(|kind| (kind.catalog_id(), kind))
                .collect(),
        }
    }

    pub fn lookup(&self, id: CatalogId) -> Result<TriggerKind, ConfigurationError> {
        self.kinds
            .get(&id)
            .copied()
            .ok_or(ConfigurationError::UnknownTrigger(id))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for TriggerCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// One trigger linked to a campaign, bound to its strategy and cadence.
#[derive(Debug, Clone)]
pub struct Trigger {
    kind: TriggerKind,
    definition: TriggerDefinition,
    schedule: CronSchedule,
}

impl Trigger {
    /// Bind a definition to its strategy. Unknown ids and bad cron text fail here;
    /// params are only read when the trigger is resolved.
    pub fn new(
        catalog: &TriggerCatalog,
        definition: TriggerDefinition,
    ) -> Result<Self, ConfigurationError> {
        let kind = catalog.lookup(definition.id)?;
        let schedule = CronSchedule::parse(&definition.cron_expression).map_err(|source| {
            ConfigurationError::InvalidCron {
                trigger: definition.id,
                source,
            }
        })?;

        Ok(Self {
            kind,
            definition,
            schedule,
        })
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn id(&self) -> CatalogId {
        self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn params(&self) -> &TriggerParams {
        &self.definition.trigger_params
    }

    /// The cron text exactly as stored with the trigger.
    pub fn cron_expression(&self) -> &str {
        &self.definition.cron_expression
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.next_after(now)
    }

    /// Query this trigger's cohort. `today` anchors day-relative conditions.
    pub async fn resolve(
        &self,
        audience: &dyn AudienceDataProvider,
        today: NaiveDate,
    ) -> Result<RecipientSet, TriggerError> {
        let recipients = match self.kind {
            TriggerKind::DailyRewardUnclaimed => audience.users_missing_daily_reward(today).await?,
            TriggerKind::Inactivity => {
                let days: u32 = self.int_param("inactive_days")?;
                if days == 0 {
                    return Err(self.bad_param("inactive_days", "must be at least 1").into());
                }
                let since = today
                    .checked_sub_signed(Duration::days(i64::from(days)))
                    .ok_or_else(|| self.bad_param("inactive_days", "reaches before the calendar"))?;
                audience.users_inactive_since(since).await?
            }
            TriggerKind::TaskIncomplete => {
                let task_id: i64 = self.int_param("task_id")?;
                audience.users_below_task_completions(task_id).await?
            }
            TriggerKind::FirstPrediction
            | TriggerKind::GiveawayEndingSoon
            | TriggerKind::GiveawayNonParticipation => {
                return Err(ConfigurationError::StrategyNotImplemented {
                    id: self.definition.id,
                    name: self.definition.name.clone(),
                }
                .into());
            }
        };

        let cohort: RecipientSet = recipients.into_iter().collect();
        debug!(
            trigger = self.definition.id,
            kind = %self.kind,
            count = cohort.len(),
            "resolved trigger cohort"
        );
        Ok(cohort)
    }

    fn int_param<T>(&self, key: &'static str) -> Result<T, ConfigurationError>
    where
        T: TryFrom<i64>,
    {
        let value = self
            .definition
            .trigger_params
            .get(key)
            .ok_or_else(|| self.bad_param(key, "missing"))?;
        let number = value
            .as_i64()
            .ok_or_else(|| self.bad_param(key, format!("expected an integer, got {}", value)))?;
        T::try_from(number).map_err(|_| self.bad_param(key, format!("{} is out of range", number)))
    }

    fn bad_param(&self, param: &'static str, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidTriggerParam {
            trigger: self.definition.id,
            param,
            reason: reason.into(),
        }
    }
}
