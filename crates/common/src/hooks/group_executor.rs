//! Runs the groups of one stage: concurrent hooks inside a group, groups in
//! sequence, updates merged in declaration order.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use error_stack::Report;
use futures::future::join_all;
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};

use super::context::HookExecutionContext;
use super::invocation::{
    Hook, InvocationAction, InvocationContext, InvocationResult, InvocationStatus, ModuleContext,
    PayloadUpdate,
};
use super::outcome::{
    ExecutionAction, ExecutionStatus, GroupExecutionOutcome, HookExecutionOutcome,
    StageExecutionOutcome,
};
use super::payload::Payload;
use super::plan::HookId;
use super::stage::Stage;
use crate::activity::{ActivityInfrastructure, ActivityInvocationPayload, Component, ComponentPayload};
use crate::error::AuctionHooksError;

const TIMEOUT_MESSAGE: &str = "Timed out while executing action";
const MISSING_UPDATE_MESSAGE: &str = "Payload update is missing";
const REJECT_NOT_SUPPORTED_MESSAGE: &str = "Rejection is not supported during this stage";

type CallResult<P> = Result<InvocationResult<P>, Report<AuctionHooksError>>;

/// A hook resolved from the plan and ready to invoke.
pub(crate) struct PlannedHook<P: Payload> {
    pub(crate) id: HookId,
    pub(crate) hook: Arc<dyn Hook<P>>,
    /// Module-declared time limit.
    pub(crate) timeout: Option<Duration>,
    pub(crate) account_config: Option<Value>,
    pub(crate) initial_context: Option<ModuleContext>,
}

pub(crate) struct PlannedGroup<P: Payload> {
    pub(crate) timeout: Option<Duration>,
    pub(crate) hooks: Vec<PlannedHook<P>>,
}

/// Stage-wide facts shared by every hook of the stage.
pub(crate) struct StageInvocation<'a> {
    pub(crate) stage: Stage,
    pub(crate) entity: String,
    pub(crate) bidder: Option<String>,
    pub(crate) activities: &'a ActivityInfrastructure,
}

/// What a stage hands back to the exchange.
#[derive(Debug)]
pub struct HookStageExecutionResult<P> {
    /// Payload after every applied update; the input itself when nothing changed.
    pub payload: P,
    /// A hook rejected the stage; remaining groups were not run.
    pub rejected: bool,
    /// Also recorded in the execution context.
    pub outcome: StageExecutionOutcome,
}

impl<P> HookStageExecutionResult<P> {
    /// Result of a stage with nothing to run.
    pub(crate) fn unchanged(payload: P, outcome: StageExecutionOutcome) -> Self {
        Self {
            payload,
            rejected: false,
            outcome,
        }
    }
}

/// Runs `groups` in order against `payload` and records the stage outcome in
/// `context`. Never fails: hook faults end up in the outcome.
pub(crate) async fn execute_stage<P: Payload>(
    invocation: &StageInvocation<'_>,
    groups: Vec<PlannedGroup<P>>,
    payload: P,
    context: &mut HookExecutionContext,
) -> HookStageExecutionResult<P> {
    let started = Instant::now();
    let mut outcome = StageExecutionOutcome::new(invocation.entity.clone());
    let mut current = Arc::new(payload);
    let mut rejected = false;

    let total = groups.len();
    for (index, group) in groups.into_iter().enumerate() {
        let groups_left = u32::try_from(total - index).unwrap_or(u32::MAX);
        let group_run = execute_group(invocation, group, groups_left, &current, context).await;
        outcome.groups.push(group_run.outcome);

        if group_run.rejected {
            rejected = true;
            break;
        }
        if let Some(updated) = group_run.payload {
            current = Arc::new(updated);
        }
    }

    log::debug!(
        "Stage '{}' for '{}' ran {} group(s) in {}ms{}; {}",
        invocation.stage,
        invocation.entity,
        outcome.groups.len(),
        millis(started.elapsed()),
        if rejected { " (rejected)" } else { "" },
        context.timeout.log_line()
    );

    // An abandoned task may still hold the snapshot until its abort lands.
    let payload = Arc::try_unwrap(current).unwrap_or_else(|shared| (*shared).clone());
    context.push_stage_outcome(invocation.stage, outcome.clone());

    HookStageExecutionResult {
        payload,
        rejected,
        outcome,
    }
}

struct GroupRun<P> {
    outcome: GroupExecutionOutcome,
    rejected: bool,
    /// `None` when no hook updated the payload.
    payload: Option<P>,
}

enum Invocation<P> {
    Skipped(HookExecutionOutcome),
    Started {
        handle: JoinHandle<CallResult<P>>,
        started: Instant,
        slice: Duration,
    },
}

enum Finished<P> {
    Skipped(HookExecutionOutcome),
    Returned(CallResult<P>, u64),
    Crashed(JoinError, u64),
    TimedOut(u64),
}

async fn execute_group<P: Payload>(
    invocation: &StageInvocation<'_>,
    group: PlannedGroup<P>,
    groups_left: u32,
    payload: &Arc<P>,
    context: &mut HookExecutionContext,
) -> GroupRun<P> {
    let remaining = context.timeout.remaining();
    let group_slice = group
        .timeout
        .map_or(remaining / groups_left.max(1), |timeout| timeout.min(remaining));

    let mut pending = Vec::with_capacity(group.hooks.len());
    for planned in group.hooks {
        pending.push(start_hook(invocation, planned, group_slice, remaining, payload, context));
    }

    let finished = join_all(pending.into_iter().map(|(id, pending_hook)| async move {
        let finished = match pending_hook {
            Invocation::Skipped(outcome) => Finished::Skipped(outcome),
            Invocation::Started {
                mut handle,
                started,
                slice,
            } => {
                let budget = slice.saturating_sub(started.elapsed());
                match tokio::time::timeout(budget, &mut handle).await {
                    Ok(Ok(result)) => Finished::Returned(result, millis(started.elapsed())),
                    Ok(Err(error)) => Finished::Crashed(error, millis(started.elapsed())),
                    Err(_) => {
                        handle.abort();
                        Finished::TimedOut(millis(started.elapsed()))
                    }
                }
            }
        };
        (id, finished)
    }))
    .await;

    let mut hooks = Vec::with_capacity(finished.len());
    let mut updates = Vec::new();
    for (id, finished) in finished {
        let (outcome, update) = into_outcome(invocation.stage, id, finished);
        if let Some(module_context) = &outcome.module_context {
            context.put_module_context(&outcome.hook_id.module_code, Arc::clone(module_context));
        }
        if let Some(update) = update {
            updates.push((hooks.len(), update));
        }
        hooks.push(outcome);
    }

    if hooks.iter().any(HookExecutionOutcome::is_rejection) {
        return GroupRun {
            outcome: GroupExecutionOutcome { hooks },
            rejected: true,
            payload: None,
        };
    }

    let payload = if updates.is_empty() {
        None
    } else {
        Some(apply_updates(payload, updates, &mut hooks))
    };

    GroupRun {
        outcome: GroupExecutionOutcome { hooks },
        rejected: false,
        payload,
    }
}

fn start_hook<P: Payload>(
    invocation: &StageInvocation<'_>,
    planned: PlannedHook<P>,
    group_slice: Duration,
    remaining: Duration,
    payload: &Arc<P>,
    context: &HookExecutionContext,
) -> (HookId, Invocation<P>) {
    let PlannedHook {
        id,
        hook,
        timeout,
        account_config,
        initial_context,
    } = planned;

    if let Some(activity) = invocation.stage.privacy_activity() {
        let component = Component::general_module(id.module_code.clone());
        let activity_payload: Box<dyn ActivityInvocationPayload> = match payload.bid_request() {
            Some(request) => ComponentPayload::for_bid_request(component, request),
            None => Box::new(ComponentPayload::new(component)),
        };
        if !invocation.activities.is_allowed(activity, activity_payload.as_ref()) {
            log::debug!("Hook '{id}' not invoked: activity '{activity}' denied");
            let outcome = HookExecutionOutcome::skipped(
                id.clone(),
                format!("Hook invocation skipped: activity '{activity}' is not allowed"),
            );
            return (id, Invocation::Skipped(outcome));
        }
    }

    let slice = timeout.map_or(group_slice, |timeout| timeout.min(remaining));
    if slice.is_zero() {
        log::warn!("Hook '{id}' not started: no time left");
        let outcome =
            HookExecutionOutcome::failed(id.clone(), ExecutionStatus::Timeout, TIMEOUT_MESSAGE, 0);
        return (id, Invocation::Skipped(outcome));
    }

    let invocation_context = InvocationContext {
        endpoint: context.endpoint.clone(),
        stage: invocation.stage,
        timeout: slice,
        debug_enabled: context.debug_enabled,
        account_id: context.account_id().map(str::to_string),
        account_config,
        module_context: context
            .module_context(&id.module_code)
            .or(initial_context),
        bidder: invocation.bidder.clone(),
    };

    let input = Arc::clone(payload);
    let handle = tokio::spawn(async move { hook.call(&input, &invocation_context).await });

    (
        id,
        Invocation::Started {
            handle,
            started: Instant::now(),
            slice,
        },
    )
}

fn into_outcome<P: Payload>(
    stage: Stage,
    id: HookId,
    finished: Finished<P>,
) -> (HookExecutionOutcome, Option<PayloadUpdate<P>>) {
    match finished {
        Finished::Skipped(outcome) => (outcome, None),
        Finished::Returned(Ok(result), elapsed) => validate_result(stage, id, result, elapsed),
        Finished::Returned(Err(report), elapsed) => {
            let message = report.current_context().to_string();
            log::warn!("Hook '{id}' failed: {message}");
            let outcome =
                HookExecutionOutcome::failed(id, ExecutionStatus::ExecutionFailure, message, elapsed);
            (outcome, None)
        }
        Finished::Crashed(error, elapsed) => {
            let message = if error.is_panic() {
                format!("Hook panicked: {}", panic_message(error.into_panic()))
            } else {
                "Hook task was cancelled".to_string()
            };
            log::warn!("Hook '{id}' crashed: {message}");
            let outcome =
                HookExecutionOutcome::failed(id, ExecutionStatus::InvocationFailure, message, elapsed);
            (outcome, None)
        }
        Finished::TimedOut(elapsed) => {
            log::warn!("Hook '{id}' timed out after {elapsed}ms");
            let outcome =
                HookExecutionOutcome::failed(id, ExecutionStatus::Timeout, TIMEOUT_MESSAGE, elapsed);
            (outcome, None)
        }
    }
}

fn validate_result<P: Payload>(
    stage: Stage,
    id: HookId,
    result: InvocationResult<P>,
    elapsed: u64,
) -> (HookExecutionOutcome, Option<PayloadUpdate<P>>) {
    let InvocationResult {
        status,
        action,
        payload_update,
        message,
        errors,
        warnings,
        debug_messages,
        analytics_tags,
        module_context,
        seat_non_bids,
    } = result;

    let mut outcome = HookExecutionOutcome {
        hook_id: id,
        execution_time_ms: elapsed,
        status: ExecutionStatus::Success,
        action: ExecutionAction::NoAction,
        message,
        errors,
        warnings,
        debug_messages,
        analytics_tags,
        seat_non_bids,
        module_context,
    };

    let update = match (status, action) {
        (InvocationStatus::Failure, _) => {
            outcome.status = ExecutionStatus::Failure;
            None
        }
        (InvocationStatus::Success, InvocationAction::NoAction) => None,
        (InvocationStatus::Success, InvocationAction::Update) => {
            if payload_update.is_some() {
                outcome.action = ExecutionAction::Update;
            } else {
                outcome.status = ExecutionStatus::ExecutionFailure;
                outcome.message = Some(MISSING_UPDATE_MESSAGE.to_string());
            }
            payload_update
        }
        (InvocationStatus::Success, InvocationAction::Reject) if stage.is_reject_supported() => {
            outcome.action = ExecutionAction::Reject;
            None
        }
        (InvocationStatus::Success, InvocationAction::Reject) => {
            outcome.status = ExecutionStatus::ExecutionFailure;
            outcome.message = Some(REJECT_NOT_SUPPORTED_MESSAGE.to_string());
            None
        }
    };

    if outcome.status != ExecutionStatus::Success {
        log::warn!(
            "Hook '{}' result discarded: {}",
            outcome.hook_id,
            outcome.message.as_deref().unwrap_or("hook reported failure")
        );
    }
    (outcome, update)
}

/// Applies `updates` in declaration order. An update that panics is dropped
/// and its hook outcome turned into an execution failure.
fn apply_updates<P: Payload>(
    payload: &Arc<P>,
    updates: Vec<(usize, PayloadUpdate<P>)>,
    hooks: &mut [HookExecutionOutcome],
) -> P {
    let mut current = (**payload).clone();
    for (index, update) in updates {
        let backup = current.clone();
        match catch_unwind(AssertUnwindSafe(move || update(current))) {
            Ok(updated) => current = updated,
            Err(panic) => {
                current = backup;
                if let Some(outcome) = hooks.get_mut(index) {
                    let message = format!("Payload update failed: {}", panic_message(panic));
                    log::warn!("Hook '{}': {message}", outcome.hook_id);
                    outcome.status = ExecutionStatus::ExecutionFailure;
                    outcome.action = ExecutionAction::NoAction;
                    outcome.message = Some(message);
                }
            }
        }
    }
    current
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
