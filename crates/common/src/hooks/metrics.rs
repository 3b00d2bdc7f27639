//! Per-hook execution metrics exposed as plain values.

use std::collections::BTreeMap;

use serde::Serialize;

use super::context::HookExecutionContext;
use super::outcome::{ExecutionAction, ExecutionStatus, HookExecutionOutcome, StageExecutionOutcome};
use super::stage::Stage;

/// Counters for one hook at one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HookStats {
    pub calls: u64,
    pub execution_time_ms: u64,
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub invocation_failure: u64,
    pub execution_failure: u64,
    pub no_action: u64,
    pub update: u64,
    pub reject: u64,
}

impl HookStats {
    fn record(&mut self, outcome: &HookExecutionOutcome) {
        self.calls += 1;
        self.execution_time_ms += outcome.execution_time_ms;
        match outcome.status {
            ExecutionStatus::Success => self.success += 1,
            ExecutionStatus::Failure => self.failure += 1,
            ExecutionStatus::Timeout => self.timeout += 1,
            ExecutionStatus::InvocationFailure => self.invocation_failure += 1,
            ExecutionStatus::ExecutionFailure => self.execution_failure += 1,
        }
        match outcome.action {
            ExecutionAction::NoAction => self.no_action += 1,
            ExecutionAction::Update => self.update += 1,
            ExecutionAction::Reject => self.reject += 1,
        }
    }
}

/// Stats keyed by stage, then `module/hook`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookMetrics {
    pub stages: BTreeMap<Stage, BTreeMap<String, HookStats>>,
}

impl HookMetrics {
    #[must_use]
    pub fn from_context(context: &HookExecutionContext) -> Self {
        let mut metrics = Self::default();
        for (stage, outcomes) in context.stage_outcomes() {
            for outcome in outcomes.iter().flat_map(StageExecutionOutcome::hook_outcomes) {
                metrics.record(*stage, outcome);
            }
        }
        metrics
    }

    pub fn record(&mut self, stage: Stage, outcome: &HookExecutionOutcome) {
        self.stages
            .entry(stage)
            .or_default()
            .entry(outcome.hook_id.to_string())
            .or_default()
            .record(outcome);
    }

    #[must_use]
    pub fn hook(&self, stage: Stage, hook: &str) -> Option<&HookStats> {
        self.stages.get(&stage).and_then(|hooks| hooks.get(hook))
    }

    #[must_use]
    pub fn total_execution_time_ms(&self) -> u64 {
        self.stages
            .values()
            .flat_map(BTreeMap::values)
            .map(|stats| stats.execution_time_ms)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::outcome::GroupExecutionOutcome;
    use crate::hooks::plan::HookId;
    use crate::timeout::Timeout;

    #[test]
    fn test_metrics_count_status_and_action() {
        let mut context = HookExecutionContext::new("/openrtb2/auction", Timeout::from_millis(50));
        let id = HookId::new("m", "m-bidder");
        let mut updated = HookExecutionOutcome::failed(id.clone(), ExecutionStatus::Success, "", 3);
        updated.action = ExecutionAction::Update;
        let timed_out = HookExecutionOutcome::failed(id, ExecutionStatus::Timeout, "late", 7);

        for (entity, outcome) in [("bidder1", updated), ("bidder2", timed_out)] {
            let mut stage = StageExecutionOutcome::new(entity);
            stage.groups.push(GroupExecutionOutcome {
                hooks: vec![outcome],
            });
            context.push_stage_outcome(Stage::BidderRequest, stage);
        }

        let metrics = HookMetrics::from_context(&context);
        let stats = metrics
            .hook(Stage::BidderRequest, "m/m-bidder")
            .expect("stats recorded");
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.timeout, 1);
        assert_eq!(stats.update, 1);
        assert_eq!(stats.no_action, 1);
        assert_eq!(metrics.total_execution_time_ms(), 10);
    }
}
