//! Analytics tags a hook attaches to its outcome for out-of-band reporting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tags {
    pub activities: Vec<ActivityTag>,
}

impl Tags {
    #[must_use]
    pub fn new(activities: Vec<ActivityTag>) -> Self {
        Self { activities }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Appends the activities of `other`, keeping order.
    pub fn merge(&mut self, other: Tags) {
        self.activities.extend(other.activities);
    }
}

/// Something a module did, e.g. `pb-rule-engine` filtering bidders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTag {
    pub name: String,
    pub status: String,
    pub results: Vec<ResultTag>,
}

impl ActivityTag {
    #[must_use]
    pub fn success(name: impl Into<String>, results: Vec<ResultTag>) -> Self {
        Self {
            name: name.into(),
            status: "success".to_string(),
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTag {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(rename = "appliedto", skip_serializing_if = "Option::is_none")]
    pub applied_to: Option<AppliedTo>,
}

impl ResultTag {
    #[must_use]
    pub fn success(values: Option<Value>, applied_to: Option<AppliedTo>) -> Self {
        Self {
            status: "success".to_string(),
            values,
            applied_to,
        }
    }
}

/// Part of the request or response a result applies to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppliedTo {
    #[serde(rename = "impids", default, skip_serializing_if = "Vec::is_empty")]
    pub imp_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bidders: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub response: bool,
    #[serde(rename = "bidids", default, skip_serializing_if = "Vec::is_empty")]
    pub bid_ids: Vec<String>,
}

impl AppliedTo {
    #[must_use]
    pub fn imps(imp_ids: Vec<String>) -> Self {
        Self {
            imp_ids,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn whole_request() -> Self {
        Self {
            request: true,
            ..Self::default()
        }
    }
}
