use std::collections::BTreeMap;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::activity::{Activity, ActivityConfiguration};
use crate::error::AuctionHooksError;
use crate::hooks::plan::ExecutionPlan;

pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "AUCTION_HOOKS";
pub const ENVIRONMENT_VARIABLE_SEPARATOR: &str = "__";

const DEFAULT_HOOKS_TIMEOUT_MS: u64 = 1000;

/// Hook engine configuration (`[hooks]`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
pub struct HooksSettings {
    /// Plan applied to every account. JSON string or inline table.
    #[serde(default)]
    pub host_execution_plan: Option<Value>,

    /// Plan used for accounts that do not define their own.
    #[serde(default)]
    pub default_account_execution_plan: Option<Value>,

    /// Host-level module switches; these override account switches.
    #[serde(default)]
    pub host_module_execution: BTreeMap<String, bool>,

    /// When set, a module runs only if enabled explicitly or configured by the account.
    #[serde(default)]
    pub config_to_invoke_required: bool,

    /// Budget used when the caller does not provide one.
    #[serde(default = "default_hooks_timeout_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub default_timeout_ms: u64,

    /// Per-module host configuration (`[hooks.modules.<code>]`).
    #[serde(default)]
    pub modules: BTreeMap<String, Value>,
}

fn default_hooks_timeout_ms() -> u64 {
    DEFAULT_HOOKS_TIMEOUT_MS
}

impl HooksSettings {
    /// Parsed host execution plan, empty when not configured.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::InvalidExecutionPlan`] if the plan is malformed.
    pub fn host_plan(&self) -> Result<ExecutionPlan, Report<AuctionHooksError>> {
        parse_plan_value(self.host_execution_plan.as_ref(), "host")
    }

    /// Parsed default account execution plan, empty when not configured.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::InvalidExecutionPlan`] if the plan is malformed.
    pub fn default_account_plan(&self) -> Result<ExecutionPlan, Report<AuctionHooksError>> {
        parse_plan_value(self.default_account_execution_plan.as_ref(), "default account")
    }
}

fn parse_plan_value(
    value: Option<&Value>,
    name: &str,
) -> Result<ExecutionPlan, Report<AuctionHooksError>> {
    let plan = match value {
        None => ExecutionPlan::default(),
        Some(Value::String(json)) if json.trim().is_empty() => ExecutionPlan::default(),
        Some(Value::String(json)) => ExecutionPlan::parse(json)?,
        Some(other) => ExecutionPlan::from_value(other.clone())?,
    };
    log::debug!("Loaded {name} execution plan");
    Ok(plan)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub hooks: HooksSettings,

    /// Host activity rules keyed by activity name (`[activities.sync_user]`).
    #[serde(default)]
    pub activities: BTreeMap<String, ActivityConfiguration>,
}

impl Settings {
    /// Loads settings from a TOML string, applying `AUCTION_HOOKS__*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::Settings`] if the TOML is invalid or does
    /// not deserialize.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<AuctionHooksError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_VARIABLE_PREFIX)
            .separator(ENVIRONMENT_VARIABLE_SEPARATOR);

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(AuctionHooksError::Settings {
                message: "Failed to build configuration".to_string(),
            })?;

        config
            .try_deserialize()
            .change_context(AuctionHooksError::Settings {
                message: "Failed to deserialize configuration".to_string(),
            })
    }

    /// Loads and validates settings.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or a field is out of range.
    pub fn from_toml_validated(toml_str: &str) -> Result<Self, Report<AuctionHooksError>> {
        let settings = Self::from_toml(toml_str)?;
        settings
            .validate()
            .change_context(AuctionHooksError::Configuration {
                message: "Settings validation failed".to_string(),
            })?;
        Ok(settings)
    }

    /// Activity configuration keyed by parsed [`Activity`].
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::Activity`] for an unknown activity name.
    pub fn activity_configs(
        &self,
    ) -> Result<BTreeMap<Activity, ActivityConfiguration>, Report<AuctionHooksError>> {
        self.activities
            .iter()
            .map(|(name, config)| {
                let activity = name.parse::<Activity>().map_err(|message| {
                    Report::new(AuctionHooksError::Activity { message })
                })?;
                Ok((activity, config.clone()))
            })
            .collect()
    }

    /// Serialise the effective settings (after environment overrides) to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::Settings`] if a value cannot be represented in TOML.
    pub fn to_canonical_toml(&self) -> Result<String, Report<AuctionHooksError>> {
        toml::to_string(self).change_context(AuctionHooksError::Settings {
            message: "Failed to serialize settings".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Stage;
    use crate::test_support::tests::{crate_test_settings_str, create_test_settings};

    #[test]
    fn test_settings_from_valid_toml() {
        let settings = create_test_settings();

        assert_eq!(settings.hooks.default_timeout_ms, 300);
        assert!(settings.hooks.config_to_invoke_required);
        assert_eq!(
            settings.hooks.host_module_execution.get("pb-rule-engine"),
            Some(&true)
        );

        let plan = settings.hooks.host_plan().expect("host plan should parse");
        let groups = plan.groups("/openrtb2/auction", Stage::ProcessedAuctionRequest);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hook_sequence[0].module_code, "pb-rule-engine");

        let activities = settings.activity_configs().expect("activities should parse");
        assert!(activities.contains_key(&Activity::SyncUser));
    }

    #[test]
    fn test_settings_empty_toml_uses_defaults() {
        let settings = Settings::from_toml("").expect("empty settings are valid");
        assert_eq!(settings.hooks.default_timeout_ms, DEFAULT_HOOKS_TIMEOUT_MS);
        assert!(settings.hooks.host_plan().expect("empty plan").endpoints.is_empty());
        assert!(settings.activities.is_empty());
    }

    #[test]
    fn test_settings_invalid_toml_syntax() {
        let toml_str = r#"
            [hooks
            default_timeout_ms = 10
            "#;

        let settings = Settings::from_toml(toml_str);
        assert!(settings.is_err(), "Should fail with invalid TOML syntax");
    }

    #[test]
    fn test_settings_validation_rejects_zero_timeout() {
        let toml_str = r#"
            [hooks]
            default_timeout_ms = 0
            "#;

        assert!(Settings::from_toml(toml_str).is_ok());
        assert!(
            Settings::from_toml_validated(toml_str).is_err(),
            "Zero timeout should fail validation"
        );
    }

    #[test]
    fn test_unknown_activity_name_is_rejected() {
        let toml_str = r#"
            [activities.teleport]
            default = false
            "#;

        let settings = Settings::from_toml(toml_str).expect("should load");
        assert!(settings.activity_configs().is_err());
    }

    #[test]
    fn test_override_env() {
        let toml_str = crate_test_settings_str();

        temp_env::with_var(
            "AUCTION_HOOKS__HOOKS__HOST_MODULE_EXECUTION__AUDIT_MODULE",
            Some("false"),
            || {
                let settings = Settings::from_toml(&toml_str);

                assert!(settings.is_ok(), "Settings should load with env override");
                let settings = settings.expect("checked above");
                assert_eq!(
                    settings.hooks.host_module_execution.get("audit_module"),
                    Some(&false)
                );
                assert_eq!(
                    settings.hooks.host_module_execution.get("pb-rule-engine"),
                    Some(&true)
                );
            },
        );
    }

    #[test]
    fn test_canonical_toml_round_trips() {
        let settings = create_test_settings();
        let canonical = settings.to_canonical_toml().expect("should serialize");
        let reloaded = Settings::from_toml(&canonical).expect("should reload");
        assert_eq!(reloaded.hooks.default_timeout_ms, settings.hooks.default_timeout_ms);
    }
}
