//! Account-level hook configuration supplied by the exchange per request.

use std::collections::BTreeMap;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuctionHooksError;
use crate::hooks;
use crate::hooks::plan::ExecutionPlan;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<AccountHooksConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountHooksConfiguration {
    /// Replaces the host's default account plan when present.
    #[serde(
        default,
        alias = "execution-plan",
        alias = "executionPlan",
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_plan: Option<ExecutionPlan>,

    /// Module configuration keyed by module code.
    #[serde(default)]
    pub modules: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<HooksAdminConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HooksAdminConfig {
    #[serde(default, alias = "module-execution", alias = "moduleExecution")]
    pub module_execution: BTreeMap<String, bool>,
}

impl Account {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hooks: None,
        }
    }

    /// Parses an account from its JSON representation and validates the
    /// configuration of every built-in module it configures.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::Configuration`] if the JSON does not describe an account
    /// or a module configuration is invalid.
    pub fn from_json(json: &str) -> Result<Self, Report<AuctionHooksError>> {
        let account: Self =
            serde_json::from_str(json).change_context(AuctionHooksError::Configuration {
                message: "Failed to parse account configuration".to_string(),
            })?;
        account.validate_module_configs()?;
        Ok(account)
    }

    /// Checks the account's configuration of built-in modules.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::Configuration`] naming the first module
    /// whose configuration does not compile.
    pub fn validate_module_configs(&self) -> Result<(), Report<AuctionHooksError>> {
        for (module_code, validate) in hooks::account_config_validators() {
            if let Some(config) = self.module_config(module_code) {
                validate(config).change_context(AuctionHooksError::Configuration {
                    message: format!(
                        "Invalid '{module_code}' configuration for account '{}'",
                        self.id
                    ),
                })?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn execution_plan(&self) -> Option<&ExecutionPlan> {
        self.hooks
            .as_ref()
            .and_then(|hooks| hooks.execution_plan.as_ref())
    }

    /// The account's configuration section for `module_code`.
    #[must_use]
    pub fn module_config(&self, module_code: &str) -> Option<&Value> {
        self.hooks
            .as_ref()
            .and_then(|hooks| hooks.modules.get(module_code))
    }

    pub(crate) fn module_codes(&self) -> impl Iterator<Item = &str> {
        self.hooks
            .iter()
            .flat_map(|hooks| hooks.modules.keys().map(String::as_str))
    }

    pub(crate) fn module_execution(&self) -> impl Iterator<Item = (&str, bool)> {
        self.hooks
            .iter()
            .filter_map(|hooks| hooks.admin.as_ref())
            .flat_map(|admin| {
                admin
                    .module_execution
                    .iter()
                    .map(|(code, enabled)| (code.as_str(), *enabled))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Stage;

    #[test]
    fn test_account_from_json_with_kebab_keys() {
        let account = Account::from_json(
            r#"{
                "id": "acc-1",
                "hooks": {
                    "execution-plan": {"endpoints": {"/openrtb2/auction": {"stages": {
                        "bidder-request": {"groups": [{"hook-sequence": [
                            {"module-code": "m", "hook-impl-code": "m-bidder"}
                        ]}]}
                    }}}},
                    "modules": {"m": {"flag": true}},
                    "admin": {"module-execution": {"m": false}}
                }
            }"#,
        )
        .expect("should parse");

        assert_eq!(account.id, "acc-1");
        let plan = account.execution_plan().expect("plan");
        assert_eq!(plan.groups("/openrtb2/auction", Stage::BidderRequest).len(), 1);
        assert_eq!(account.module_config("m"), Some(&serde_json::json!({"flag": true})));
        assert_eq!(account.module_codes().collect::<Vec<_>>(), vec!["m"]);
        assert_eq!(account.module_execution().collect::<Vec<_>>(), vec![("m", false)]);
    }

    #[test]
    fn test_account_without_hooks() {
        let account = Account::new("bare");
        assert!(account.execution_plan().is_none());
        assert!(account.module_config("m").is_none());
        assert_eq!(account.module_codes().count(), 0);
    }

    #[test]
    fn test_invalid_module_config_fails_at_load() {
        let err = Account::from_json(
            r#"{"id": "acc-1", "hooks": {"modules": {"pb-rule-engine": {"rule_sets": "nope"}}}}"#,
        )
        .expect_err("broken rule engine config should fail");

        assert!(err
            .to_string()
            .contains("Invalid 'pb-rule-engine' configuration for account 'acc-1'"));
    }

    #[test]
    fn test_invalid_account_json() {
        assert!(Account::from_json("{\"hooks\": 1}").is_err());
    }
}
