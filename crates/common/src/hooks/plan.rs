//! Execution plans: which hooks run, in which groups, per endpoint and stage.
//!
//! ```json
//! {"endpoints": {"/openrtb2/auction": {"stages": {"processed-auction-request": {
//!     "groups": [{"timeout": 100, "hook_sequence": [
//!         {"module_code": "pb-rule-engine", "hook_impl_code": "pb-rule-engine-processed-auction-request"}
//!     ]}]
//! }}}}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::HookCatalog;
use super::stage::Stage;
use crate::error::AuctionHooksError;

/// Identifies one hook implementation of one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HookId {
    #[serde(alias = "module-code", alias = "moduleCode")]
    pub module_code: String,
    #[serde(alias = "hook-impl-code", alias = "hookImplCode")]
    pub hook_impl_code: String,
}

impl HookId {
    #[must_use]
    pub fn new(module_code: impl Into<String>, hook_impl_code: impl Into<String>) -> Self {
        Self {
            module_code: module_code.into(),
            hook_impl_code: hook_impl_code.into(),
        }
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module_code, self.hook_impl_code)
    }
}

/// Hooks that run concurrently against the same payload snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionGroup {
    /// Group time limit in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, alias = "hook-sequence", alias = "hookSequence")]
    pub hook_sequence: Vec<HookId>,
}

impl ExecutionGroup {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageExecutionPlan {
    #[serde(default)]
    pub groups: Vec<ExecutionGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointExecutionPlan {
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageExecutionPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointExecutionPlan>,
}

impl ExecutionPlan {
    /// Parses a plan from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::InvalidExecutionPlan`] if the JSON is malformed.
    pub fn parse(json: &str) -> Result<Self, Report<AuctionHooksError>> {
        serde_json::from_str(json).change_context(AuctionHooksError::InvalidExecutionPlan {
            message: "Failed to parse execution plan".to_string(),
        })
    }

    /// Converts an already parsed JSON value into a plan.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::InvalidExecutionPlan`] if the value has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self, Report<AuctionHooksError>> {
        serde_json::from_value(value).change_context(AuctionHooksError::InvalidExecutionPlan {
            message: "Failed to parse execution plan".to_string(),
        })
    }

    /// Groups configured for `stage` on `endpoint`, empty when none.
    #[must_use]
    pub fn groups(&self, endpoint: &str, stage: Stage) -> &[ExecutionGroup] {
        self.endpoints
            .get(endpoint)
            .and_then(|plan| plan.stages.get(&stage))
            .map(|plan| plan.groups.as_slice())
            .unwrap_or_default()
    }

    /// Every `(stage, hook)` pair referenced by the plan.
    pub fn hook_refs(&self) -> impl Iterator<Item = (Stage, &HookId)> {
        self.endpoints.values().flat_map(|endpoint| {
            endpoint.stages.iter().flat_map(|(stage, plan)| {
                plan.groups
                    .iter()
                    .flat_map(move |group| group.hook_sequence.iter().map(move |id| (*stage, id)))
            })
        })
    }

    /// Checks that every referenced hook is registered for its stage.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::InvalidExecutionPlan`] naming the first
    /// unknown hook.
    pub fn validate(&self, catalog: &HookCatalog) -> Result<(), Report<AuctionHooksError>> {
        for (stage, id) in self.hook_refs() {
            if !catalog.contains(stage, id) {
                return Err(Report::new(AuctionHooksError::InvalidExecutionPlan {
                    message: format!("Hook '{id}' is not registered for stage '{stage}'"),
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{
        "endpoints": {
            "/openrtb2/auction": {
                "stages": {
                    "raw-auction-request": {
                        "groups": [
                            {"timeout": 50, "hook-sequence": [{"module-code": "a", "hook-impl-code": "a-raw"}]},
                            {"hook_sequence": [{"module_code": "b", "hook_impl_code": "b-raw"}]}
                        ]
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_accepts_both_key_spellings() {
        let plan = ExecutionPlan::parse(PLAN).expect("should parse");
        let groups = plan.groups("/openrtb2/auction", Stage::RawAuctionRequest);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].timeout(), Some(Duration::from_millis(50)));
        assert_eq!(groups[0].hook_sequence[0], HookId::new("a", "a-raw"));
        assert_eq!(groups[1].timeout(), None);
        assert_eq!(groups[1].hook_sequence[0].to_string(), "b/b-raw");
    }

    #[test]
    fn test_missing_endpoint_or_stage_yields_no_groups() {
        let plan = ExecutionPlan::parse(PLAN).expect("should parse");
        assert!(plan.groups("/openrtb2/amp", Stage::RawAuctionRequest).is_empty());
        assert!(plan
            .groups("/openrtb2/auction", Stage::BidderRequest)
            .is_empty());
    }

    #[test]
    fn test_unknown_stage_is_a_parse_error() {
        let err = ExecutionPlan::parse(
            r#"{"endpoints": {"/x": {"stages": {"after-party": {"groups": []}}}}}"#,
        )
        .expect_err("should reject unknown stage");
        assert!(err.to_string().contains("Invalid execution plan"));
    }

    #[test]
    fn test_hook_refs_lists_every_hook() {
        let plan = ExecutionPlan::parse(PLAN).expect("should parse");
        let refs: Vec<_> = plan.hook_refs().map(|(_, id)| id.to_string()).collect();
        assert_eq!(refs, vec!["a/a-raw", "b/b-raw"]);
    }
}
