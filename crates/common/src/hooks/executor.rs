//! Entry point the exchange calls once per stage occurrence.

use std::collections::BTreeMap;
use std::time::Duration;

use error_stack::Report;
use http::HeaderMap;

use super::catalog::HookCatalog;
use super::context::HookExecutionContext;
use super::group_executor::{
    execute_stage, HookStageExecutionResult, PlannedGroup, PlannedHook, StageInvocation,
};
use super::outcome::StageExecutionOutcome;
use super::payload::{
    AllProcessedBidResponsesPayload, AuctionRequestPayload, AuctionResponsePayload,
    BidderRequestPayload, BidderResponsePayload, EntrypointPayload, ExitpointPayload, Payload,
};
use super::plan::{ExecutionGroup, ExecutionPlan};
use super::stage::{self, Stage, StageWithHookType};
use super::build_catalog;
use crate::account::Account;
use crate::activity::{ActivityInfrastructure, SharedActivityInfrastructure};
use crate::error::AuctionHooksError;
use crate::openrtb::{BidRequest, BidResponse, BidderBid, BidderResponse};
use crate::settings::{HooksSettings, Settings};
use crate::timeout::Timeout;

/// Runs the hooks configured for a stage against its payload.
///
/// Built once at startup; shared by every request.
pub struct HookStageExecutor {
    host_plan: ExecutionPlan,
    default_account_plan: ExecutionPlan,
    host_module_execution: BTreeMap<String, bool>,
    config_to_invoke_required: bool,
    default_timeout: Duration,
    catalog: HookCatalog,
    activities: SharedActivityInfrastructure,
}

impl HookStageExecutor {
    /// Creates the executor and validates the host and default account plans
    /// against `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::InvalidExecutionPlan`] if a plan is malformed
    /// or references a hook that is not registered for its stage.
    pub fn new(
        settings: &HooksSettings,
        catalog: HookCatalog,
        activities: SharedActivityInfrastructure,
    ) -> Result<Self, Report<AuctionHooksError>> {
        let host_plan = settings.host_plan()?;
        host_plan.validate(&catalog)?;
        let default_account_plan = settings.default_account_plan()?;
        default_account_plan.validate(&catalog)?;

        log::info!(
            "Hook executor ready: {} host hook(s), {} default account hook(s)",
            host_plan.hook_refs().count(),
            default_account_plan.hook_refs().count()
        );

        Ok(Self {
            host_plan,
            default_account_plan,
            host_module_execution: settings.host_module_execution.clone(),
            config_to_invoke_required: settings.config_to_invoke_required,
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            catalog,
            activities,
        })
    }

    /// Builds the executor the way the server does at startup: built-in
    /// modules from `[hooks.modules]`, host activity rules from
    /// `[activities]`, plans from `[hooks]`.
    ///
    /// # Errors
    ///
    /// Fails closed on any invalid module configuration, activity rule or
    /// execution plan.
    pub fn from_settings(settings: &Settings) -> Result<Self, Report<AuctionHooksError>> {
        let catalog = build_catalog(settings)?;
        let activities = ActivityInfrastructure::from_config(&settings.activity_configs()?)?;
        Self::new(
            &settings.hooks,
            catalog,
            SharedActivityInfrastructure::new(activities),
        )
    }

    #[must_use]
    pub fn catalog(&self) -> &HookCatalog {
        &self.catalog
    }

    /// Starts the hook context of one request on `endpoint`.
    ///
    /// `budget` is the time the exchange grants the hooks; without one the
    /// configured `default_timeout_ms` applies.
    #[must_use]
    pub fn new_context(
        &self,
        endpoint: impl Into<String>,
        budget: Option<Duration>,
    ) -> HookExecutionContext {
        HookExecutionContext::new(endpoint, Timeout::new(budget.unwrap_or(self.default_timeout)))
    }

    /// Handle used to swap activity rules at runtime.
    #[must_use]
    pub fn activities(&self) -> &SharedActivityInfrastructure {
        &self.activities
    }

    /// Runs `stage` for `entity` and records the outcome in `context`.
    ///
    /// `bidder` is exposed to hooks on bidder stages.
    pub async fn execute<P: Payload>(
        &self,
        stage: StageWithHookType<P>,
        entity: &str,
        bidder: Option<&str>,
        payload: P,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<P> {
        let groups = self.planned_groups(stage, context);
        if groups.is_empty() {
            let outcome = StageExecutionOutcome::new(entity);
            context.push_stage_outcome(stage.stage(), outcome.clone());
            return HookStageExecutionResult::unchanged(payload, outcome);
        }

        let activities = self.activities.load();
        let invocation = StageInvocation {
            stage: stage.stage(),
            entity: entity.to_string(),
            bidder: bidder.map(str::to_string),
            activities: &activities,
        };
        execute_stage(&invocation, groups, payload, context).await
    }

    pub async fn execute_entrypoint_stage(
        &self,
        query_params: BTreeMap<String, String>,
        headers: HeaderMap,
        body: String,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<EntrypointPayload> {
        let payload = EntrypointPayload {
            query_params,
            headers,
            body,
        };
        self.execute(
            stage::ENTRYPOINT,
            Stage::Entrypoint.default_entity(),
            None,
            payload,
            context,
        )
        .await
    }

    pub async fn execute_raw_auction_request_stage(
        &self,
        bid_request: BidRequest,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<AuctionRequestPayload> {
        self.execute(
            stage::RAW_AUCTION_REQUEST,
            Stage::RawAuctionRequest.default_entity(),
            None,
            AuctionRequestPayload { bid_request },
            context,
        )
        .await
    }

    pub async fn execute_processed_auction_request_stage(
        &self,
        bid_request: BidRequest,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<AuctionRequestPayload> {
        self.execute(
            stage::PROCESSED_AUCTION_REQUEST,
            Stage::ProcessedAuctionRequest.default_entity(),
            None,
            AuctionRequestPayload { bid_request },
            context,
        )
        .await
    }

    pub async fn execute_bidder_request_stage(
        &self,
        bid_request: BidRequest,
        bidder: &str,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<BidderRequestPayload> {
        self.execute(
            stage::BIDDER_REQUEST,
            bidder,
            Some(bidder),
            BidderRequestPayload { bid_request },
            context,
        )
        .await
    }

    pub async fn execute_raw_bidder_response_stage(
        &self,
        bids: Vec<BidderBid>,
        bidder: &str,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<BidderResponsePayload> {
        self.execute(
            stage::RAW_BIDDER_RESPONSE,
            bidder,
            Some(bidder),
            BidderResponsePayload { bids },
            context,
        )
        .await
    }

    pub async fn execute_processed_bidder_response_stage(
        &self,
        bids: Vec<BidderBid>,
        bidder: &str,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<BidderResponsePayload> {
        self.execute(
            stage::PROCESSED_BIDDER_RESPONSE,
            bidder,
            Some(bidder),
            BidderResponsePayload { bids },
            context,
        )
        .await
    }

    pub async fn execute_all_processed_bid_responses_stage(
        &self,
        bid_responses: Vec<BidderResponse>,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<AllProcessedBidResponsesPayload> {
        self.execute(
            stage::ALL_PROCESSED_BID_RESPONSES,
            Stage::AllProcessedBidResponses.default_entity(),
            None,
            AllProcessedBidResponsesPayload { bid_responses },
            context,
        )
        .await
    }

    pub async fn execute_auction_response_stage(
        &self,
        bid_response: BidResponse,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<AuctionResponsePayload> {
        self.execute(
            stage::AUCTION_RESPONSE,
            Stage::AuctionResponse.default_entity(),
            None,
            AuctionResponsePayload { bid_response },
            context,
        )
        .await
    }

    pub async fn execute_exitpoint_stage(
        &self,
        headers: HeaderMap,
        body: String,
        context: &mut HookExecutionContext,
    ) -> HookStageExecutionResult<ExitpointPayload> {
        self.execute(
            stage::EXITPOINT,
            Stage::Exitpoint.default_entity(),
            None,
            ExitpointPayload { headers, body },
            context,
        )
        .await
    }

    /// Whether hooks of `module_code` may run for `account`.
    ///
    /// Host switches win; then the account's admin switches; then, when
    /// configuration is required, modules the account configures are enabled.
    /// Anything else runs unless configuration is required.
    #[must_use]
    pub fn is_module_enabled(&self, account: Option<&Account>, module_code: &str) -> bool {
        if let Some(enabled) = self.host_module_execution.get(module_code) {
            return *enabled;
        }
        let Some(account) = account else {
            return !self.config_to_invoke_required;
        };
        if let Some((_, enabled)) = account
            .module_execution()
            .find(|(code, _)| *code == module_code)
        {
            return enabled;
        }
        if self.config_to_invoke_required && account.module_codes().any(|code| code == module_code)
        {
            return true;
        }
        !self.config_to_invoke_required
    }

    /// Host groups first, then the account's (or the default account plan's).
    /// The entrypoint runs before the account is known and uses only the host plan.
    fn stage_groups<'a>(
        &'a self,
        stage: Stage,
        endpoint: &str,
        account: Option<&'a Account>,
    ) -> impl Iterator<Item = &'a ExecutionGroup> {
        let host = self.host_plan.groups(endpoint, stage);
        let account_groups = if stage == Stage::Entrypoint {
            &[][..]
        } else {
            account
                .and_then(Account::execution_plan)
                .unwrap_or(&self.default_account_plan)
                .groups(endpoint, stage)
        };
        host.iter().chain(account_groups.iter())
    }

    fn planned_groups<P: Payload>(
        &self,
        stage: StageWithHookType<P>,
        context: &HookExecutionContext,
    ) -> Vec<PlannedGroup<P>> {
        let account = context.account.as_deref();
        let module_account = if stage.stage() == Stage::Entrypoint {
            None
        } else {
            account
        };

        let mut planned = Vec::new();
        for group in self.stage_groups(stage.stage(), &context.endpoint, account) {
            let mut hooks = Vec::with_capacity(group.hook_sequence.len());
            for id in &group.hook_sequence {
                if stage.stage() == Stage::Entrypoint {
                    if self.host_module_execution.get(&id.module_code) == Some(&false) {
                        continue;
                    }
                } else if !self.is_module_enabled(module_account, &id.module_code) {
                    log::debug!("Module '{}' is disabled, skipping hook '{id}'", id.module_code);
                    continue;
                }

                let Some(hook) = self.catalog.hook(stage, id) else {
                    log::warn!(
                        "Hook '{id}' is not registered for stage '{}', skipping",
                        stage.stage()
                    );
                    continue;
                };

                hooks.push(PlannedHook {
                    id: id.clone(),
                    hook,
                    timeout: self.catalog.module_timeout(&id.module_code),
                    account_config: module_account
                        .and_then(|account| account.module_config(&id.module_code))
                        .cloned(),
                    initial_context: self.catalog.initial_context(&id.module_code),
                });
            }
            if !hooks.is_empty() {
                planned.push(PlannedGroup {
                    timeout: group.timeout(),
                    hooks,
                });
            }
        }
        planned
    }
}
