//! Result functions: what a matched rule does to the request.

use std::collections::{BTreeMap, BTreeSet};

use error_stack::Report;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use validator::Validate;

use super::config::{parse_args, FunctionConfig};
use super::result::{Granularity, RuleResult};
use super::MODULE_CODE;
use crate::error::ConfigurationValidationError;
use crate::hooks::analytics::{ActivityTag, AppliedTo, ResultTag, Tags};
use crate::openrtb::{BidRejectionReason, BidRequest, NonBid, SeatNonBid};

pub const EXCLUDE_BIDDERS: &str = "excludeBidders";
pub const INCLUDE_BIDDERS: &str = "includeBidders";
pub const LOG_A_TAG: &str = "logATag";

#[derive(Debug, Deserialize, Validate)]
struct FilterBiddersArgs {
    #[validate(
        required(message = "'bidders' field is required"),
        length(min = 1, message = "'bidders' field is required")
    )]
    bidders: Option<Vec<String>>,

    #[serde(default = "default_seat_non_bid", alias = "seatNonBid")]
    seat_non_bid: BidRejectionReason,

    #[serde(default, alias = "analyticsValue")]
    analytics_value: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct LogATagArgs {
    #[validate(required(message = "'analyticsValue' field is required"))]
    #[serde(alias = "analyticsValue")]
    analytics_value: Option<String>,
}

fn default_seat_non_bid() -> BidRejectionReason {
    BidRejectionReason::RequestBlockedGeneral
}

/// Arguments for bidder filtering, with bidder names lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterBidders {
    pub bidders: BTreeSet<String>,
    pub seat_non_bid: BidRejectionReason,
    pub analytics_value: Option<String>,
}

/// A compiled result function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultFunction {
    /// Removes the listed bidders.
    ExcludeBidders(FilterBidders),
    /// Removes every bidder that is not listed.
    IncludeBidders(FilterBidders),
    /// Leaves the request alone and only reports an analytics tag.
    LogATag { analytics_value: String },
}

/// What the engine knows about the rule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfrastructureArguments {
    pub granularity: Granularity,
    pub analytics_key: Option<String>,
    pub model_version: Option<String>,
    /// Matched conditions joined with `|`, or `default`.
    pub rule_fired: String,
}

impl ResultFunction {
    /// Compiles a result function from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationValidationError`] for an unknown function or
    /// invalid arguments.
    pub fn compile(config: &FunctionConfig) -> Result<Self, Report<ConfigurationValidationError>> {
        let name = config.function.as_str();
        let args = config.args.as_ref();
        match name {
            EXCLUDE_BIDDERS => Ok(Self::ExcludeBidders(filter_args(name, args)?)),
            INCLUDE_BIDDERS => Ok(Self::IncludeBidders(filter_args(name, args)?)),
            LOG_A_TAG => {
                let args: LogATagArgs = parse_args(name, args)?;
                Ok(Self::LogATag {
                    analytics_value: args.analytics_value.unwrap_or_default(),
                })
            }
            unknown => Err(Report::new(ConfigurationValidationError::new(format!(
                "Unknown result function '{unknown}'"
            )))),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExcludeBidders(_) => EXCLUDE_BIDDERS,
            Self::IncludeBidders(_) => INCLUDE_BIDDERS,
            Self::LogATag { .. } => LOG_A_TAG,
        }
    }

    /// Applies the function to `request`.
    #[must_use]
    pub fn apply(
        &self,
        request: BidRequest,
        infrastructure: &InfrastructureArguments,
    ) -> RuleResult<BidRequest> {
        match self {
            Self::ExcludeBidders(args) => {
                filter_bidders(request, args, infrastructure, self.name(), |bidder| {
                    args.bidders.contains(bidder)
                })
            }
            Self::IncludeBidders(args) => {
                filter_bidders(request, args, infrastructure, self.name(), |bidder| {
                    !args.bidders.contains(bidder)
                })
            }
            Self::LogATag { analytics_value } => {
                let tags = infrastructure
                    .analytics_key
                    .as_deref()
                    .map(|key| {
                        let mut values = base_values(key, Some(analytics_value.as_str()), infrastructure);
                        values.insert("resultFunction".into(), json!(LOG_A_TAG));
                        result_tags(values, applied_imps(&request, &infrastructure.granularity))
                    })
                    .unwrap_or_default();
                let mut result = RuleResult::unchanged(request);
                result.tags = tags;
                result
            }
        }
    }
}

fn filter_args(
    name: &str,
    args: Option<&Value>,
) -> Result<FilterBidders, Report<ConfigurationValidationError>> {
    let args: FilterBiddersArgs = parse_args(name, args)?;
    Ok(FilterBidders {
        bidders: args
            .bidders
            .unwrap_or_default()
            .iter()
            .map(|bidder| bidder.to_ascii_lowercase())
            .collect(),
        seat_non_bid: args.seat_non_bid,
        analytics_value: args.analytics_value,
    })
}

/// Removes the bidders `remove` selects from every impression the
/// granularity covers. Impressions left without bidders are dropped and a
/// request left without impressions is rejected.
fn filter_bidders(
    mut request: BidRequest,
    args: &FilterBidders,
    infrastructure: &InfrastructureArguments,
    function: &str,
    remove: impl Fn(&str) -> bool,
) -> RuleResult<BidRequest> {
    let mut affected_imps = Vec::new();
    let mut removed_bidders = BTreeSet::new();
    let mut non_bids: BTreeMap<String, Vec<NonBid>> = BTreeMap::new();

    for imp in &mut request.imp {
        if !infrastructure.granularity.covers(&imp.id) {
            continue;
        }
        let imp_id = imp.id.clone();
        let Some(bidders) = imp.bidders_mut() else {
            continue;
        };

        let removed: Vec<String> = bidders
            .keys()
            .filter(|bidder| remove(&bidder.to_ascii_lowercase()))
            .cloned()
            .collect();
        if removed.is_empty() {
            continue;
        }

        for bidder in removed {
            bidders.remove(&bidder);
            non_bids
                .entry(bidder.clone())
                .or_default()
                .push(NonBid::new(imp_id.clone(), args.seat_non_bid));
            removed_bidders.insert(bidder);
        }
        affected_imps.push(imp_id);
    }

    if affected_imps.is_empty() {
        return RuleResult::unchanged(request);
    }

    request
        .imp
        .retain(|imp| !affected_imps.contains(&imp.id) || !imp.bidders().is_empty());

    let seat_non_bids: Vec<SeatNonBid> = non_bids
        .into_iter()
        .map(|(seat, non_bid)| SeatNonBid::new(seat, non_bid))
        .collect();

    let tags = infrastructure
        .analytics_key
        .as_deref()
        .map(|key| {
            let mut values = base_values(key, args.analytics_value.as_deref(), infrastructure);
            values.insert("resultFunction".into(), json!(function));
            values.insert("biddersRemoved".into(), json!(removed_bidders));
            values.insert("seatNonBid".into(), json!(args.seat_non_bid.code()));
            result_tags(values, affected_imps)
        })
        .unwrap_or_default();

    if request.imp.is_empty() {
        log::debug!("All impressions of request '{}' lost their bidders", request.id);
        RuleResult::rejected(tags, seat_non_bids)
    } else {
        RuleResult::updated(request, tags, seat_non_bids)
    }
}

fn base_values(
    analytics_key: &str,
    analytics_value: Option<&str>,
    infrastructure: &InfrastructureArguments,
) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("analyticsKey".into(), json!(analytics_key));
    values.insert("analyticsValue".into(), json!(analytics_value));
    values.insert("modelVersion".into(), json!(infrastructure.model_version));
    values.insert("conditionFired".into(), json!(infrastructure.rule_fired));
    values
}

fn result_tags(values: Map<String, Value>, imp_ids: Vec<String>) -> Tags {
    Tags::new(vec![ActivityTag::success(
        MODULE_CODE,
        vec![ResultTag::success(
            Some(Value::Object(values)),
            Some(AppliedTo::imps(imp_ids)),
        )],
    )])
}

fn applied_imps(request: &BidRequest, granularity: &Granularity) -> Vec<String> {
    request
        .imp
        .iter()
        .filter(|imp| granularity.covers(&imp.id))
        .map(|imp| imp.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::bid_request_with_imps;

    fn infrastructure(granularity: Granularity, analytics_key: Option<&str>) -> InfrastructureArguments {
        InfrastructureArguments {
            granularity,
            analytics_key: analytics_key.map(str::to_string),
            model_version: Some("modelVersion".into()),
            rule_fired: "ruleFired".into(),
        }
    }

    fn exclude(bidders: &[&str]) -> ResultFunction {
        ResultFunction::compile(&FunctionConfig {
            function: EXCLUDE_BIDDERS.into(),
            args: Some(json!({
                "bidders": bidders,
                "seatNonBid": 200,
                "analyticsValue": "analyticsValue"
            })),
        })
        .expect("should compile")
    }

    fn expected_tags(removed: &[&str], imp_ids: &[&str]) -> Tags {
        Tags::new(vec![ActivityTag::success(
            "pb-rule-engine",
            vec![ResultTag::success(
                Some(json!({
                    "analyticsKey": "analyticsKey",
                    "analyticsValue": "analyticsValue",
                    "modelVersion": "modelVersion",
                    "conditionFired": "ruleFired",
                    "resultFunction": "excludeBidders",
                    "biddersRemoved": removed,
                    "seatNonBid": 200
                })),
                Some(AppliedTo::imps(imp_ids.iter().map(|id| id.to_string()).collect())),
            )],
        )])
    }

    fn seat(bidder: &str, imp_id: &str) -> SeatNonBid {
        SeatNonBid::new(
            bidder,
            vec![NonBid::new(imp_id, BidRejectionReason::RequestBlockedGeneral)],
        )
    }

    #[test]
    fn test_compile_requires_args() {
        let missing = ResultFunction::compile(&FunctionConfig {
            function: EXCLUDE_BIDDERS.into(),
            args: None,
        })
        .expect_err("args are required");
        assert_eq!(
            missing.current_context().message,
            "Configuration is required, but not provided"
        );

        let no_bidders = ResultFunction::compile(&FunctionConfig {
            function: EXCLUDE_BIDDERS.into(),
            args: Some(json!({})),
        })
        .expect_err("bidders are required");
        assert_eq!(no_bidders.current_context().message, "'bidders' field is required");

        assert!(ResultFunction::compile(&FunctionConfig {
            function: EXCLUDE_BIDDERS.into(),
            args: Some(json!({"bidders": "test"})),
        })
        .is_err());

        assert!(ResultFunction::compile(&FunctionConfig {
            function: "dropEverything".into(),
            args: None,
        })
        .is_err());
    }

    #[test]
    fn test_exclude_bidders_for_whole_request() {
        let request = bid_request_with_imps(&[("impId", &["bidder1", "bidder2"])]);

        let result = exclude(&["bidder1"]).apply(
            request,
            &infrastructure(Granularity::Request, Some("analyticsKey")),
        );

        assert_eq!(
            result,
            RuleResult::updated(
                bid_request_with_imps(&[("impId", &["bidder2"])]),
                expected_tags(&["bidder1"], &["impId"]),
                vec![seat("bidder1", "impId")],
            )
        );
    }

    #[test]
    fn test_exclude_bidders_only_for_targeted_imp() {
        let request = bid_request_with_imps(&[
            ("impId", &["bidder1", "bidder2"]),
            ("impId2", &["bidder3", "bidder4"]),
        ]);

        let result = exclude(&["bidder3"]).apply(
            request,
            &infrastructure(Granularity::Imp("impId2".into()), Some("analyticsKey")),
        );

        assert_eq!(
            result,
            RuleResult::updated(
                bid_request_with_imps(&[
                    ("impId", &["bidder1", "bidder2"]),
                    ("impId2", &["bidder4"]),
                ]),
                expected_tags(&["bidder3"], &["impId2"]),
                vec![seat("bidder3", "impId2")],
            )
        );
    }

    #[test]
    fn test_imp_without_bidders_is_dropped() {
        let request = bid_request_with_imps(&[
            ("impId", &["bidder1", "bidder2"]),
            ("impId2", &["bidder3", "bidder4"]),
        ]);

        let result = exclude(&["bidder3", "bidder4"]).apply(
            request,
            &infrastructure(Granularity::Imp("impId2".into()), Some("analyticsKey")),
        );

        assert_eq!(
            result,
            RuleResult::updated(
                bid_request_with_imps(&[("impId", &["bidder1", "bidder2"])]),
                expected_tags(&["bidder3", "bidder4"], &["impId2"]),
                vec![seat("bidder3", "impId2"), seat("bidder4", "impId2")],
            )
        );
    }

    #[test]
    fn test_request_without_imps_is_rejected() {
        let request = bid_request_with_imps(&[("impId", &["bidder"])]);

        let result = exclude(&["bidder"]).apply(
            request,
            &infrastructure(Granularity::Imp("impId".into()), Some("analyticsKey")),
        );

        assert_eq!(
            result,
            RuleResult::rejected(
                expected_tags(&["bidder"], &["impId"]),
                vec![seat("bidder", "impId")],
            )
        );
    }

    #[test]
    fn test_no_tag_without_analytics_key() {
        let request = bid_request_with_imps(&[("impId", &["bidder1", "bidder2"])]);

        let result = exclude(&["bidder1"])
            .apply(request, &infrastructure(Granularity::Imp("impId".into()), None));

        assert_eq!(
            result,
            RuleResult::updated(
                bid_request_with_imps(&[("impId", &["bidder2"])]),
                Tags::default(),
                vec![seat("bidder1", "impId")],
            )
        );
    }

    #[test]
    fn test_nothing_to_remove_leaves_request_unchanged() {
        let request = bid_request_with_imps(&[("impId", &["bidder2"])]);

        let result = exclude(&["bidder1"]).apply(
            request.clone(),
            &infrastructure(Granularity::Request, Some("analyticsKey")),
        );

        assert_eq!(result, RuleResult::unchanged(request));
    }

    #[test]
    fn test_include_bidders_keeps_only_listed_case_insensitive() {
        let include = ResultFunction::compile(&FunctionConfig {
            function: INCLUDE_BIDDERS.into(),
            args: Some(json!({"bidders": ["Bidder2"]})),
        })
        .expect("should compile");
        let request = bid_request_with_imps(&[("impId", &["bidder1", "bidder2", "bidder3"])]);

        let result = include.apply(request, &infrastructure(Granularity::Request, None));

        assert_eq!(
            result.value,
            Some(bid_request_with_imps(&[("impId", &["bidder2"])]))
        );
        assert_eq!(
            result
                .seat_non_bids
                .iter()
                .map(|seat| seat.seat.as_str())
                .collect::<Vec<_>>(),
            vec!["bidder1", "bidder3"]
        );
    }

    #[test]
    fn test_log_a_tag_only_reports() {
        let log = ResultFunction::compile(&FunctionConfig {
            function: LOG_A_TAG.into(),
            args: Some(json!({"analyticsValue": "seen"})),
        })
        .expect("should compile");
        let request = bid_request_with_imps(&[("impId", &["bidder1"])]);

        let result = log.apply(
            request.clone(),
            &infrastructure(Granularity::Request, Some("analyticsKey")),
        );

        assert_eq!(result.value, Some(request));
        assert!(result.seat_non_bids.is_empty());
        let values = result.tags.activities[0].results[0]
            .values
            .clone()
            .expect("values");
        assert_eq!(values["analyticsValue"], "seen");
        assert_eq!(values["resultFunction"], "logATag");
    }
}
