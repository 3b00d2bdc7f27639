//! Activity rule configuration and its compilation into [`ConditionalRule`]s.

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::rule::{ConditionalRule, GeoCode};
use super::ComponentType;
use crate::error::AuctionHooksError;

/// Configured rules and default for one activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ActivityConfiguration {
    /// Decision when no rule matches. Absent means allow.
    #[serde(default, rename = "default", alias = "allow")]
    pub default_allow: Option<bool>,

    #[serde(default)]
    #[validate(nested)]
    pub rules: Vec<ActivityRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ActivityRuleConfig {
    #[serde(default)]
    #[validate(nested)]
    pub condition: Option<ActivityCondition>,

    #[serde(default = "default_allow")]
    pub allow: bool,
}

/// Clauses of a rule. An absent clause matches anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ActivityCondition {
    #[serde(default, alias = "componentType")]
    #[validate(length(min = 1))]
    pub component_type: Option<Vec<ComponentType>>,

    #[serde(default, alias = "componentName")]
    #[validate(length(min = 1))]
    pub component_name: Option<Vec<String>>,

    /// `COUNTRY` or `COUNTRY.REGION` codes.
    #[serde(default)]
    #[validate(length(min = 1))]
    pub geo: Option<Vec<String>>,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub gpc: Option<String>,
}

fn default_allow() -> bool {
    true
}

impl ActivityConfiguration {
    /// Default decision applied when no rule matches.
    #[must_use]
    pub fn default_result(&self) -> bool {
        self.default_allow.unwrap_or(true)
    }

    /// Validates the configuration and compiles every rule.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::Activity`] if a rule is structurally invalid
    /// or references a malformed geo code.
    pub fn compile(&self) -> Result<Vec<ConditionalRule>, Report<AuctionHooksError>> {
        self.validate()
            .change_context(AuctionHooksError::Activity {
                message: "Activity configuration validation failed".to_string(),
            })?;

        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| rule.compile(index))
            .collect()
    }
}

impl ActivityRuleConfig {
    fn compile(&self, index: usize) -> Result<ConditionalRule, Report<AuctionHooksError>> {
        let Some(condition) = &self.condition else {
            return Ok(ConditionalRule::new(None, None, None, None, self.allow));
        };

        let geo_codes = condition
            .geo
            .as_ref()
            .map(|codes| {
                codes
                    .iter()
                    .map(|code| code.parse::<GeoCode>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|message| {
                Report::new(AuctionHooksError::Activity {
                    message: format!("rule #{index}: {message}"),
                })
            })?;

        Ok(ConditionalRule::new(
            condition.component_type.clone(),
            condition.component_name.clone(),
            geo_codes,
            condition.gpc.clone(),
            self.allow,
        ))
    }
}
