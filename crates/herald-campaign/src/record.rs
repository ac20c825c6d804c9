//! Persisted campaign shapes as handed over by the store.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Primary key of a persisted campaign.
pub type CampaignId = i64;

/// Stable, externally persisted trigger catalog id.
pub type CatalogId = u32;

/// Deduplicated recipients of one firing.
pub type RecipientSet = BTreeSet<RecipientId>;

/// Whether a campaign fires once or on a cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    /// Fires once at (or shortly after) `scheduled_at`; targets recipients matching all triggers.
    OneTime,
    /// Fires on the soonest trigger cadence; targets recipients matching any trigger.
    Trigger,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Trigger => "trigger",
        }
    }
}

impl fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(Self::OneTime),
            "trigger" => Ok(Self::Trigger),
            other => Err(format!("unknown campaign type '{}'", other)),
        }
    }
}

/// Opaque recipient identifier (a Telegram chat id in production).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RecipientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecipientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Key/value params of one campaign-trigger link, interpreted only by the
/// matching strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerParams(Map<String, Value>);

impl TriggerParams {
    pub fn new(params: Map<String, Value>) -> Self {
        Self(params)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Value> for TriggerParams {
    /// Anything but a JSON object becomes an empty bag.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<TriggerParams, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<TriggerParams>::deserialize(deserializer)?.unwrap_or_default())
}

/// A catalog trigger linked to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Catalog id.
    pub id: CatalogId,
    /// Display name.
    pub name: String,
    /// 5-field crontab cadence of this trigger.
    pub cron_expression: String,
    /// Per-link params.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub trigger_params: TriggerParams,
}

/// A persisted campaign row together with its linked triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: CampaignId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CampaignKind,
    /// Required for one-shot campaigns.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub text: String,
    pub button_text: Option<String>,
    pub button_url: Option<String>,
    /// Absolute URL or path relative to the media host.
    pub photo: Option<String>,
    pub is_active: bool,
    pub triggers: Vec<TriggerDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_store_json() {
        let record: CampaignRecord = serde_json::from_value(json!({
            "id": 7,
            "name": "comeback",
            "type": "trigger",
            "scheduled_at": null,
            "title": "We miss you",
            "text": "Come back for a bonus",
            "button_text": null,
            "button_url": null,
            "photo": null,
            "is_active": true,
            "triggers": [
                {"id": 3, "name": "inactive", "cron_expression": "0 10 * * *", "trigger_params": {"inactive_days": 7}},
                {"id": 1, "name": "daily reward", "cron_expression": "0 18 * * *", "trigger_params": null}
            ]
        }))
        .unwrap();

        assert_eq!(record.kind, CampaignKind::Trigger);
        assert_eq!(record.triggers.len(), 2);
        assert_eq!(
            record.triggers[0].trigger_params.get("inactive_days"),
            Some(&json!(7))
        );
        assert!(record.triggers[1].trigger_params.is_empty());
    }

    #[test]
    fn test_campaign_kind_round_trips_through_text() {
        for kind in [CampaignKind::OneTime, CampaignKind::Trigger] {
            assert_eq!(kind.as_str().parse::<CampaignKind>(), Ok(kind));
        }
        assert!("weekly".parse::<CampaignKind>().is_err());
    }

    #[test]
    fn test_non_object_params_are_empty() {
        assert!(TriggerParams::from(json!([1, 2])).is_empty());
        assert!(!TriggerParams::from(json!({"task_id": 4})).is_empty());
    }

    #[test]
    fn test_recipient_sets_deduplicate() {
        let set: RecipientSet = [1i64, 2, 2, 3].into_iter().map(RecipientId::from).collect();
        assert_eq!(set.len(), 3);
        assert_eq!(RecipientId::from(42).as_str(), "42");
    }
}
