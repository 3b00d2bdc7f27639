//! Structured record of what every hook did during a stage.

use serde::Serialize;

use super::analytics::Tags;
use super::invocation::ModuleContext;
use super::plan::HookId;
use crate::openrtb::SeatNonBid;

/// How a hook invocation ended from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    /// The hook reported failure itself.
    Failure,
    Timeout,
    /// The hook panicked.
    InvocationFailure,
    /// The hook returned an error or an unusable result.
    ExecutionFailure,
}

/// What the engine did with the hook's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    NoAction,
    Update,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookExecutionOutcome {
    pub hook_id: HookId,
    pub execution_time_ms: u64,
    pub status: ExecutionStatus,
    /// `NoAction` whenever the hook produced no usable result.
    pub action: ExecutionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_tags: Option<Tags>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seat_non_bids: Vec<SeatNonBid>,
    /// Context the hook handed back; also stored in the execution context.
    #[serde(skip)]
    pub module_context: Option<ModuleContext>,
}

impl HookExecutionOutcome {
    /// Outcome of a hook that produced nothing usable.
    #[must_use]
    pub fn failed(
        hook_id: HookId,
        status: ExecutionStatus,
        message: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            hook_id,
            execution_time_ms,
            status,
            action: ExecutionAction::NoAction,
            message: Some(message.into()),
            errors: Vec::new(),
            warnings: Vec::new(),
            debug_messages: Vec::new(),
            analytics_tags: None,
            seat_non_bids: Vec::new(),
            module_context: None,
        }
    }

    /// Outcome of a hook the engine chose not to invoke.
    #[must_use]
    pub fn skipped(hook_id: HookId, warning: impl Into<String>) -> Self {
        let mut outcome = Self::failed(hook_id, ExecutionStatus::Success, String::new(), 0);
        outcome.message = None;
        outcome.warnings.push(warning.into());
        outcome
    }

    #[must_use]
    pub fn is_rejection(&self) -> bool {
        self.action == ExecutionAction::Reject
    }
}

/// Outcomes of the hooks of one group, in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupExecutionOutcome {
    pub hooks: Vec<HookExecutionOutcome>,
}

/// Outcome of one stage invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StageExecutionOutcome {
    /// What the stage ran for: `auction-request`, a bidder name, ...
    pub entity: String,
    pub groups: Vec<GroupExecutionOutcome>,
}

impl StageExecutionOutcome {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            groups: Vec::new(),
        }
    }

    /// Every hook outcome in group then declaration order.
    pub fn hook_outcomes(&self) -> impl Iterator<Item = &HookExecutionOutcome> {
        self.groups.iter().flat_map(|group| group.hooks.iter())
    }
}
