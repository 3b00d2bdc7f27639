//! Activity infrastructure: rule-based allow/deny gating of privacy-sensitive
//! operations.
//!
//! Callers describe who is about to act with an [`ActivityInvocationPayload`]
//! and ask [`ActivityInfrastructure::is_allowed`] whether the named
//! [`Activity`] may proceed. Rules are compiled once from configuration and
//! evaluated first-match-wins; a rule that needs a capability the payload does
//! not carry abstains.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod debug;
pub mod infrastructure;
pub mod payload;
pub mod rule;

pub use config::{ActivityCondition, ActivityConfiguration, ActivityRuleConfig};
pub use debug::{ActivityDebug, ActivityTraceEntry, TraceLevel};
pub use infrastructure::{ActivityController, ActivityInfrastructure, SharedActivityInfrastructure};
pub use payload::{
    ActivityInvocationPayload, ComponentPayload, GeoCapability, GpcCapability, PayloadBuilder,
    WithGeo, WithGpc,
};
pub use rule::{ConditionalRule, GeoCode, Rule, RuleResult};

/// Named privacy-sensitive operation subject to gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Activity {
    SyncUser,
    FetchBids,
    EnrichUfpd,
    ReportAnalytics,
    TransmitUfpd,
    TransmitEids,
    TransmitPreciseGeo,
    TransmitTid,
}

impl Activity {
    pub const ALL: [Activity; 8] = [
        Activity::SyncUser,
        Activity::FetchBids,
        Activity::EnrichUfpd,
        Activity::ReportAnalytics,
        Activity::TransmitUfpd,
        Activity::TransmitEids,
        Activity::TransmitPreciseGeo,
        Activity::TransmitTid,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncUser => "syncUser",
            Self::FetchBids => "fetchBids",
            Self::EnrichUfpd => "enrichUfpd",
            Self::ReportAnalytics => "reportAnalytics",
            Self::TransmitUfpd => "transmitUfpd",
            Self::TransmitEids => "transmitEids",
            Self::TransmitPreciseGeo => "transmitPreciseGeo",
            Self::TransmitTid => "transmitTid",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = String;

    /// Accepts the camelCase wire name as well as the snake_case form used in
    /// TOML section names (`[activities.sync_user]`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('_', "").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|activity| activity.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("Unknown activity: {s}"))
    }
}

/// Kind of component asking to perform an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentType {
    Bidder,
    Analytics,
    #[serde(alias = "general")]
    GeneralModule,
    #[serde(alias = "rtd")]
    RtdModule,
    #[serde(alias = "userid")]
    UserIdModule,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bidder => "bidder",
            Self::Analytics => "analytics",
            Self::GeneralModule => "generalModule",
            Self::RtdModule => "rtdModule",
            Self::UserIdModule => "userIdModule",
        };
        f.write_str(name)
    }
}

/// Identity of the component asking to perform an activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "componentType")]
    pub component_type: ComponentType,
    #[serde(rename = "componentName")]
    pub name: String,
}

impl Component {
    #[must_use]
    pub fn new(component_type: ComponentType, name: impl Into<String>) -> Self {
        Self {
            component_type,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn bidder(name: impl Into<String>) -> Self {
        Self::new(ComponentType::Bidder, name)
    }

    #[must_use]
    pub fn general_module(name: impl Into<String>) -> Self {
        Self::new(ComponentType::GeneralModule, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_from_str_accepts_both_spellings() {
        assert_eq!("syncUser".parse::<Activity>(), Ok(Activity::SyncUser));
        assert_eq!(
            "transmit_precise_geo".parse::<Activity>(),
            Ok(Activity::TransmitPreciseGeo)
        );
        assert!("teleport".parse::<Activity>().is_err());
    }

    #[test]
    fn test_component_type_serde() {
        let parsed: ComponentType =
            serde_json::from_str("\"generalModule\"").expect("should parse");
        assert_eq!(parsed, ComponentType::GeneralModule);
        let alias: ComponentType = serde_json::from_str("\"rtd\"").expect("should parse alias");
        assert_eq!(alias, ComponentType::RtdModule);
        assert_eq!(ComponentType::UserIdModule.to_string(), "userIdModule");
    }
}
