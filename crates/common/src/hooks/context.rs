//! Per-request accumulator of stage outcomes and module contexts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::analytics::Tags;
use super::invocation::ModuleContext;
use super::outcome::StageExecutionOutcome;
use super::stage::Stage;
use crate::account::Account;
use crate::activity::TraceLevel;
use crate::openrtb::SeatNonBid;
use crate::timeout::Timeout;

/// State of one request's pipeline run.
///
/// Created when the request arrives and dropped when it completes; it is never
/// shared between requests.
#[derive(Debug)]
pub struct HookExecutionContext {
    pub endpoint: String,
    pub account: Option<Arc<Account>>,
    pub timeout: Timeout,
    pub debug_enabled: bool,
    pub trace_level: Option<TraceLevel>,
    stage_outcomes: BTreeMap<Stage, Vec<StageExecutionOutcome>>,
    module_contexts: HashMap<String, ModuleContext>,
}

impl HookExecutionContext {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Timeout) -> Self {
        Self {
            endpoint: endpoint.into(),
            account: None,
            timeout,
            debug_enabled: false,
            trace_level: None,
            stage_outcomes: BTreeMap::new(),
            module_contexts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_account(mut self, account: Arc<Account>) -> Self {
        self.account = Some(account);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug_enabled: bool, trace_level: Option<TraceLevel>) -> Self {
        self.debug_enabled = debug_enabled;
        self.trace_level = trace_level;
        self
    }

    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.account.as_deref().map(|account| account.id.as_str())
    }

    /// Outcomes recorded so far, by stage, in invocation order.
    #[must_use]
    pub fn stage_outcomes(&self) -> &BTreeMap<Stage, Vec<StageExecutionOutcome>> {
        &self.stage_outcomes
    }

    #[must_use]
    pub fn outcomes_for(&self, stage: Stage) -> &[StageExecutionOutcome] {
        self.stage_outcomes
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn push_stage_outcome(&mut self, stage: Stage, outcome: StageExecutionOutcome) {
        self.stage_outcomes.entry(stage).or_default().push(outcome);
    }

    #[must_use]
    pub fn module_context(&self, module_code: &str) -> Option<ModuleContext> {
        self.module_contexts.get(module_code).cloned()
    }

    pub(crate) fn put_module_context(&mut self, module_code: &str, context: ModuleContext) {
        self.module_contexts.insert(module_code.to_string(), context);
    }

    /// Analytics tags of every hook in stage, invocation and declaration order.
    #[must_use]
    pub fn analytics_tags(&self) -> Tags {
        let mut tags = Tags::default();
        for outcome in self.all_hook_outcomes() {
            if let Some(hook_tags) = &outcome.analytics_tags {
                tags.merge(hook_tags.clone());
            }
        }
        tags
    }

    /// Seat non-bids reported by hooks, in the same order as [`Self::analytics_tags`].
    #[must_use]
    pub fn seat_non_bids(&self) -> Vec<SeatNonBid> {
        self.all_hook_outcomes()
            .flat_map(|outcome| outcome.seat_non_bids.iter().cloned())
            .collect()
    }

    fn all_hook_outcomes(&self) -> impl Iterator<Item = &super::outcome::HookExecutionOutcome> {
        self.stage_outcomes
            .values()
            .flatten()
            .flat_map(StageExecutionOutcome::hook_outcomes)
    }
}
