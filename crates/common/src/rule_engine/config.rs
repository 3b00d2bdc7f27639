//! Rule engine configuration as it appears under `[hooks.modules."pb-rule-engine"]`
//! or in the account's module section.

use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationErrors};

use crate::error::{AuctionHooksError, ConfigurationValidationError};
use crate::hooks::Stage;

const DEFAULT_WEIGHT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct RuleEngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, alias = "ruleSets")]
    #[validate(nested)]
    pub rule_sets: Vec<RuleSetConfig>,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rule_sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct RuleSetConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_stage")]
    pub stage: Stage,

    #[serde(alias = "modelGroups")]
    #[validate(length(min = 1), nested)]
    pub model_groups: Vec<ModelGroupConfig>,
}

/// A candidate model; one group per rule set is picked per request by weight.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct ModelGroupConfig {
    #[serde(default = "default_weight")]
    #[validate(range(min = 1, max = 100))]
    pub weight: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Analytics tags are emitted only when set.
    #[serde(default, alias = "analyticsKey", skip_serializing_if = "Option::is_none")]
    pub analytics_key: Option<String>,

    #[validate(length(min = 1))]
    pub schema: Vec<FunctionConfig>,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Results applied when no rule matches.
    #[serde(default)]
    pub default: Vec<FunctionConfig>,
}

/// A named schema or result function with its arguments.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionConfig {
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleConfig {
    /// One value per schema function; `*` matches anything.
    pub conditions: Vec<String>,
    pub results: Vec<FunctionConfig>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_stage() -> Stage {
    Stage::ProcessedAuctionRequest
}

impl RuleEngineConfig {
    /// Parses and validates a configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::RuleEngine`] if the value has the wrong
    /// shape or fails validation.
    pub fn from_value(value: &Value) -> Result<Self, Report<AuctionHooksError>> {
        let config: Self = serde_json::from_value(value.clone()).change_context(
            AuctionHooksError::RuleEngine {
                message: "Failed to parse rule engine configuration".to_string(),
            },
        )?;
        config.validate().change_context(AuctionHooksError::RuleEngine {
            message: "Rule engine configuration is invalid".to_string(),
        })?;
        Ok(config)
    }
}

/// Deserializes and validates function arguments.
///
/// # Errors
///
/// Returns a [`ConfigurationValidationError`] when the arguments are missing,
/// malformed or fail validation.
pub fn parse_args<T: DeserializeOwned + Validate>(
    function: &str,
    args: Option<&Value>,
) -> Result<T, Report<ConfigurationValidationError>> {
    let Some(args) = args.filter(|args| !args.is_null()) else {
        return Err(Report::new(ConfigurationValidationError::new(
            "Configuration is required, but not provided",
        )));
    };

    let parsed: T = serde_json::from_value(args.clone()).map_err(|error| {
        Report::new(ConfigurationValidationError::new(format!(
            "Invalid configuration for '{function}': {error}"
        )))
    })?;

    parsed
        .validate()
        .map_err(|errors| Report::new(ConfigurationValidationError::new(first_message(&errors))))?;
    Ok(parsed)
}

fn first_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|field_errors| field_errors.iter())
        .find_map(|error| error.message.as_ref().map(ToString::to_string))
        .unwrap_or_else(|| errors.to_string())
}
