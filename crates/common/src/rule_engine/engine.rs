//! Compiled rule sets and their evaluation against a bid request.

use error_stack::{Report, ResultExt};
use rand::Rng;
use serde_json::Value;

use super::config::{FunctionConfig, ModelGroupConfig, RuleEngineConfig, RuleSetConfig};
use super::functions::{InfrastructureArguments, ResultFunction};
use super::result::{Granularity, RuleResult};
use super::schema::SchemaFunction;
use crate::error::{AuctionHooksError, ConfigurationValidationError};
use crate::hooks::Stage;
use crate::openrtb::BidRequest;

const WILDCARD: &str = "*";
const DEFAULT_RULE: &str = "default";

/// Rule sets ready to be applied, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rule_sets: Vec<RuleSet>,
}

#[derive(Debug, Clone)]
struct RuleSet {
    name: String,
    model_groups: Vec<ModelGroup>,
    total_weight: u32,
}

#[derive(Debug, Clone)]
struct ModelGroup {
    weight: u32,
    version: Option<String>,
    analytics_key: Option<String>,
    schema: Vec<SchemaFunction>,
    rules: Vec<Rule>,
    default: Vec<ResultFunction>,
}

#[derive(Debug, Clone)]
struct Rule {
    conditions: Vec<String>,
    results: Vec<ResultFunction>,
}

impl RuleEngine {
    /// Parses, validates and compiles a raw configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::RuleEngine`] if the configuration is
    /// malformed or any function in it fails to compile.
    pub fn from_value(value: &Value) -> Result<Self, Report<AuctionHooksError>> {
        Self::compile(&RuleEngineConfig::from_value(value)?)
    }

    /// Compiles a validated configuration. Disabled rule sets are left out;
    /// a disabled configuration compiles to an engine that does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::RuleEngine`] naming the first rule set
    /// that fails to compile.
    pub(crate) fn compile(config: &RuleEngineConfig) -> Result<Self, Report<AuctionHooksError>> {
        if !config.enabled {
            return Ok(Self::default());
        }

        let rule_sets = config
            .rule_sets
            .iter()
            .filter(|rule_set| rule_set.enabled)
            .map(|rule_set| {
                RuleSet::compile(rule_set).change_context(AuctionHooksError::RuleEngine {
                    message: format!("Invalid rule set '{}'", rule_set.name),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Compiled {} rule set(s)", rule_sets.len());
        Ok(Self { rule_sets })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }

    /// Applies every rule set in order until one rejects the request.
    #[must_use]
    pub fn apply(&self, request: BidRequest) -> RuleResult<BidRequest> {
        self.apply_with_rng(request, &mut rand::thread_rng())
    }

    /// [`RuleEngine::apply`] with an explicit source of randomness for model
    /// group selection and percentage conditions.
    #[must_use]
    pub fn apply_with_rng<R: Rng>(&self, request: BidRequest, rng: &mut R) -> RuleResult<BidRequest> {
        let mut result = RuleResult::unchanged(request);
        for rule_set in &self.rule_sets {
            let Some(current) = result.value.take() else {
                break;
            };
            let Some(group) = rule_set.pick(rng) else {
                log::warn!("Rule set '{}' has no model group to pick", rule_set.name);
                result.value = Some(current);
                continue;
            };
            log::debug!(
                "Rule set '{}' evaluating model version {:?}",
                rule_set.name,
                group.version
            );
            result = result.merge(group.apply(current, rng));
            if result.is_rejected() {
                break;
            }
        }
        result
    }
}

impl RuleSet {
    fn compile(config: &RuleSetConfig) -> Result<Self, Report<ConfigurationValidationError>> {
        if config.stage != Stage::ProcessedAuctionRequest {
            return Err(Report::new(ConfigurationValidationError::new(format!(
                "Stage '{}' is not supported",
                config.stage
            ))));
        }

        let model_groups = config
            .model_groups
            .iter()
            .map(ModelGroup::compile)
            .collect::<Result<Vec<_>, _>>()?;
        if model_groups.is_empty() {
            return Err(Report::new(ConfigurationValidationError::new(
                "At least one model group is required",
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            total_weight: model_groups.iter().map(|group| group.weight).sum(),
            model_groups,
        })
    }

    /// Draws a model group with probability proportional to its weight.
    fn pick<R: Rng>(&self, rng: &mut R) -> Option<&ModelGroup> {
        let mut roll = rng.gen_range(0..self.total_weight.max(1));
        self.model_groups.iter().find(|group| {
            if roll < group.weight {
                return true;
            }
            roll -= group.weight;
            false
        })
    }
}

impl ModelGroup {
    fn compile(config: &ModelGroupConfig) -> Result<Self, Report<ConfigurationValidationError>> {
        if config.weight == 0 {
            return Err(Report::new(ConfigurationValidationError::new(
                "Model group weight must be at least 1",
            )));
        }

        let schema = config
            .schema
            .iter()
            .map(SchemaFunction::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let rules = config
            .rules
            .iter()
            .map(|rule| {
                if rule.conditions.len() != schema.len() {
                    return Err(Report::new(ConfigurationValidationError::new(format!(
                        "Rule has {} condition(s) but the schema has {} function(s)",
                        rule.conditions.len(),
                        schema.len()
                    ))));
                }
                Ok(Rule {
                    conditions: rule.conditions.clone(),
                    results: compile_results(&rule.results)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            weight: config.weight,
            version: config.version.clone(),
            analytics_key: config.analytics_key.clone(),
            schema,
            rules,
            default: compile_results(&config.default)?,
        })
    }

    fn is_imp_scoped(&self) -> bool {
        self.schema.iter().any(SchemaFunction::is_imp_scoped)
    }

    fn apply<R: Rng>(&self, request: BidRequest, rng: &mut R) -> RuleResult<BidRequest> {
        if !self.is_imp_scoped() {
            return self.evaluate(request, Granularity::Request, rng);
        }

        let imp_ids: Vec<String> = request.imp.iter().map(|imp| imp.id.clone()).collect();
        let mut result = RuleResult::unchanged(request);
        for imp_id in imp_ids {
            let Some(current) = result.value.take() else {
                break;
            };
            result = result.merge(self.evaluate(current, Granularity::Imp(imp_id), rng));
            if result.is_rejected() {
                break;
            }
        }
        result
    }

    fn evaluate<R: Rng>(
        &self,
        request: BidRequest,
        granularity: Granularity,
        rng: &mut R,
    ) -> RuleResult<BidRequest> {
        let values: Vec<String> = self
            .schema
            .iter()
            .map(|function| function.evaluate(&request, &granularity, rng))
            .collect();

        let (rule_fired, results) = match self.rules.iter().find(|rule| rule.matches(&values)) {
            Some(rule) => (rule.conditions.join("|"), &rule.results),
            None => (DEFAULT_RULE.to_string(), &self.default),
        };

        let infrastructure = InfrastructureArguments {
            granularity,
            analytics_key: self.analytics_key.clone(),
            model_version: self.version.clone(),
            rule_fired,
        };

        let mut result = RuleResult::unchanged(request);
        for function in results {
            let Some(current) = result.value.take() else {
                break;
            };
            result = result.merge(function.apply(current, &infrastructure));
            if result.is_rejected() {
                break;
            }
        }
        result
    }
}

impl Rule {
    fn matches(&self, values: &[String]) -> bool {
        self.conditions
            .iter()
            .zip(values)
            .all(|(condition, value)| condition == WILDCARD || condition.eq_ignore_ascii_case(value))
    }
}

fn compile_results(
    configs: &[FunctionConfig],
) -> Result<Vec<ResultFunction>, Report<ConfigurationValidationError>> {
    configs.iter().map(ResultFunction::compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::{Device, Geo};
    use crate::rule_engine::result::RuleAction;
    use crate::test_support::tests::bid_request_with_imps;
    use rand::rngs::mock::StepRng;
    use serde_json::json;

    fn with_country(mut request: BidRequest, country: &str) -> BidRequest {
        request.device = Some(Device {
            geo: Some(Geo {
                country: Some(country.into()),
                ..Geo::default()
            }),
            ..Device::default()
        });
        request
    }

    fn engine(config: Value) -> RuleEngine {
        RuleEngine::from_value(&config).expect("should compile")
    }

    fn bidders(result: &RuleResult<BidRequest>) -> Vec<(String, Vec<String>)> {
        result
            .value
            .as_ref()
            .expect("request kept")
            .imp
            .iter()
            .map(|imp| {
                (
                    imp.id.clone(),
                    imp.bidders().into_iter().map(str::to_string).collect(),
                )
            })
            .collect()
    }

    fn country_engine() -> RuleEngine {
        engine(json!({
            "rule_sets": [{
                "name": "geo",
                "model_groups": [{
                    "version": "v1",
                    "analytics_key": "geo-filter",
                    "schema": [{"function": "deviceCountry"}],
                    "rules": [
                        {"conditions": ["US"], "results": [{"function": "excludeBidders", "args": {"bidders": ["bidder1"]}}]},
                        {"conditions": ["*"], "results": [{"function": "excludeBidders", "args": {"bidders": ["bidder2"]}}]}
                    ]
                }]
            }]
        }))
    }

    #[test]
    fn test_first_matching_rule_wins_case_insensitive() {
        let request = with_country(bid_request_with_imps(&[("imp", &["bidder1", "bidder2"])]), "us");
        let result = country_engine().apply_with_rng(request, &mut StepRng::new(0, 0));

        assert_eq!(result.action, RuleAction::Update);
        assert_eq!(bidders(&result), vec![("imp".to_string(), vec!["bidder2".to_string()])]);
        let values = result.tags.activities[0].results[0]
            .values
            .clone()
            .expect("values");
        assert_eq!(values["conditionFired"], "US");
        assert_eq!(values["modelVersion"], "v1");
    }

    #[test]
    fn test_wildcard_matches_anything() {
        let request = with_country(bid_request_with_imps(&[("imp", &["bidder1", "bidder2"])]), "DE");
        let result = country_engine().apply_with_rng(request, &mut StepRng::new(0, 0));

        assert_eq!(bidders(&result), vec![("imp".to_string(), vec!["bidder1".to_string()])]);
    }

    #[test]
    fn test_default_results_when_nothing_matches() {
        let engine = engine(json!({
            "rule_sets": [{
                "name": "channel",
                "model_groups": [{
                    "analytics_key": "channel",
                    "schema": [{"function": "channel"}],
                    "rules": [{"conditions": ["app"], "results": []}],
                    "default": [{"function": "logATag", "args": {"analyticsValue": "not-app"}}]
                }]
            }]
        }));
        let request = bid_request_with_imps(&[("imp", &["bidder1"])]);
        let result = engine.apply_with_rng(request.clone(), &mut StepRng::new(0, 0));

        assert_eq!(result.action, RuleAction::NoAction);
        assert_eq!(result.value, Some(request));
        let values = result.tags.activities[0].results[0]
            .values
            .clone()
            .expect("values");
        assert_eq!(values["conditionFired"], "default");
    }

    #[test]
    fn test_imp_scoped_schema_evaluates_each_imp() {
        let engine = engine(json!({
            "rule_sets": [{
                "name": "units",
                "model_groups": [{
                    "schema": [{"function": "adUnitCodeIn", "args": {"codes": ["imp-2"]}}],
                    "rules": [{"conditions": ["true"], "results": [{"function": "excludeBidders", "args": {"bidders": ["bidder1"]}}]}]
                }]
            }]
        }));
        let request = bid_request_with_imps(&[
            ("imp-1", &["bidder1", "bidder2"]),
            ("imp-2", &["bidder1", "bidder2"]),
        ]);
        let result = engine.apply_with_rng(request, &mut StepRng::new(0, 0));

        assert_eq!(
            bidders(&result),
            vec![
                ("imp-1".to_string(), vec!["bidder1".to_string(), "bidder2".to_string()]),
                ("imp-2".to_string(), vec!["bidder2".to_string()]),
            ]
        );
        assert_eq!(result.seat_non_bids.len(), 1);
        assert_eq!(result.seat_non_bids[0].non_bid[0].imp_id, "imp-2");
    }

    #[test]
    fn test_rejection_stops_later_rule_sets() {
        let engine = engine(json!({
            "rule_sets": [
                {
                    "name": "drop-all",
                    "model_groups": [{
                        "schema": [{"function": "channel"}],
                        "rules": [{"conditions": ["*"], "results": [{"function": "excludeBidders", "args": {"bidders": ["bidder1"]}}]}]
                    }]
                },
                {
                    "name": "never-reached",
                    "model_groups": [{
                        "analytics_key": "late",
                        "schema": [{"function": "channel"}],
                        "rules": [{"conditions": ["*"], "results": [{"function": "logATag", "args": {"analyticsValue": "x"}}]}]
                    }]
                }
            ]
        }));
        let request = bid_request_with_imps(&[("imp", &["bidder1"])]);
        let result = engine.apply_with_rng(request, &mut StepRng::new(0, 0));

        assert!(result.is_rejected());
        assert!(result.tags.is_empty());
        assert_eq!(result.seat_non_bids.len(), 1);
    }

    #[test]
    fn test_model_group_picked_by_weight() {
        let engine = engine(json!({
            "rule_sets": [{
                "name": "ab",
                "model_groups": [
                    {"weight": 30, "version": "a", "analytics_key": "k", "schema": [{"function": "channel"}],
                     "rules": [{"conditions": ["*"], "results": [{"function": "logATag", "args": {"analyticsValue": "a"}}]}]},
                    {"weight": 70, "version": "b", "analytics_key": "k", "schema": [{"function": "channel"}],
                     "rules": [{"conditions": ["*"], "results": [{"function": "logATag", "args": {"analyticsValue": "b"}}]}]}
                ]
            }]
        }));
        let request = bid_request_with_imps(&[("imp", &["bidder1"])]);

        let version = |rng: &mut StepRng| {
            let result = engine.apply_with_rng(request.clone(), rng);
            result.tags.activities[0].results[0]
                .values
                .clone()
                .expect("values")["modelVersion"]
                .clone()
        };

        // A zero draw lands in the first group, a draw of half the range in the second.
        assert_eq!(version(&mut StepRng::new(0, 0)), json!("a"));
        assert_eq!(version(&mut StepRng::new(1 << 31, 0)), json!("b"));
    }

    #[test]
    fn test_compile_errors_name_the_rule_set() {
        let mismatch = RuleEngine::from_value(&json!({
            "rule_sets": [{
                "name": "broken",
                "model_groups": [{
                    "schema": [{"function": "channel"}],
                    "rules": [{"conditions": ["web", "US"], "results": []}]
                }]
            }]
        }))
        .expect_err("condition count must match schema");
        assert_eq!(
            mismatch.current_context().to_string(),
            "Rule engine error: Invalid rule set 'broken'"
        );

        let bad_result = RuleEngine::from_value(&json!({
            "rule_sets": [{
                "name": "no-bidders",
                "model_groups": [{
                    "schema": [{"function": "channel"}],
                    "rules": [{"conditions": ["*"], "results": [{"function": "excludeBidders", "args": {}}]}]
                }]
            }]
        }))
        .expect_err("bidders are required");
        assert!(format!("{bad_result:?}").contains("'bidders' field is required"));

        let wrong_stage = RuleEngine::from_value(&json!({
            "rule_sets": [{
                "name": "late",
                "stage": "auction-response",
                "model_groups": [{"schema": [{"function": "channel"}], "rules": []}]
            }]
        }))
        .expect_err("only processed-auction-request is supported");
        assert!(format!("{wrong_stage:?}").contains("auction-response"));
    }

    #[test]
    fn test_zero_weight_model_group_fails_compile() {
        let mut config = RuleEngineConfig::from_value(&json!({
            "rule_sets": [{
                "name": "weightless",
                "model_groups": [{"schema": [{"function": "channel"}], "rules": []}]
            }]
        }))
        .expect("should parse");
        config.rule_sets[0].model_groups[0].weight = 0;

        let err = RuleEngine::compile(&config).expect_err("zero weight can never be picked");
        assert_eq!(
            err.current_context().to_string(),
            "Rule engine error: Invalid rule set 'weightless'"
        );
        assert!(format!("{err:?}").contains("weight must be at least 1"));
    }

    #[test]
    fn test_disabled_config_compiles_to_empty_engine() {
        let engine = engine(json!({"enabled": false, "rule_sets": []}));
        assert!(engine.is_empty());
        let request = bid_request_with_imps(&[("imp", &["bidder1"])]);
        assert_eq!(engine.apply(request.clone()), RuleResult::unchanged(request));
    }
}
