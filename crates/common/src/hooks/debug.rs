//! Debug section of the auction response: hook errors, warnings and the
//! execution trace.

use std::collections::BTreeMap;

use serde::Serialize;

use super::analytics::Tags;
use super::context::HookExecutionContext;
use super::outcome::{
    ExecutionAction, ExecutionStatus, GroupExecutionOutcome, HookExecutionOutcome,
    StageExecutionOutcome,
};
use super::plan::HookId;
use super::stage::Stage;
use crate::activity::TraceLevel;

/// Messages keyed by module code, then hook implementation code.
pub type ModuleMessages = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModulesExt {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: ModuleMessages,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub warnings: ModuleMessages,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ModulesTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModulesTrace {
    #[serde(rename = "executiontimemillis")]
    pub execution_time_ms: u64,
    pub stages: Vec<StageTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTrace {
    pub stage: Stage,
    #[serde(rename = "executiontimemillis")]
    pub execution_time_ms: u64,
    pub outcomes: Vec<StageOutcomeTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcomeTrace {
    pub entity: String,
    #[serde(rename = "executiontimemillis")]
    pub execution_time_ms: u64,
    pub groups: Vec<GroupTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTrace {
    #[serde(rename = "executiontimemillis")]
    pub execution_time_ms: u64,
    #[serde(rename = "invocationresults")]
    pub invocation_results: Vec<HookTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookTrace {
    #[serde(rename = "hookid")]
    pub hook_id: HookId,
    #[serde(rename = "executiontimemillis")]
    pub execution_time_ms: u64,
    pub status: ExecutionStatus,
    pub action: ExecutionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "debugmessages", skip_serializing_if = "Vec::is_empty")]
    pub debug_messages: Vec<String>,
    #[serde(rename = "analyticstags", skip_serializing_if = "Option::is_none")]
    pub analytics_tags: Option<Tags>,
}

/// Renders what the hooks of one request did.
///
/// Errors and warnings are reported only when debug is enabled on the
/// context; the trace only when the context has a trace level. `None` when
/// there is nothing to report.
#[must_use]
pub fn modules_ext(context: &HookExecutionContext) -> Option<ModulesExt> {
    let mut ext = ModulesExt::default();

    if context.debug_enabled {
        for outcome in context
            .stage_outcomes()
            .values()
            .flatten()
            .flat_map(StageExecutionOutcome::hook_outcomes)
        {
            let errors = hook_errors(outcome);
            if !errors.is_empty() {
                entry(&mut ext.errors, &outcome.hook_id).extend(errors);
            }
            if !outcome.warnings.is_empty() {
                entry(&mut ext.warnings, &outcome.hook_id).extend(outcome.warnings.iter().cloned());
            }
        }
    }

    ext.trace = context.trace_level.map(|level| trace(context, level));

    if ext.errors.is_empty() && ext.warnings.is_empty() && ext.trace.is_none() {
        None
    } else {
        Some(ext)
    }
}

fn hook_errors(outcome: &HookExecutionOutcome) -> Vec<String> {
    let mut errors = outcome.errors.clone();
    if outcome.status != ExecutionStatus::Success {
        if let Some(message) = &outcome.message {
            errors.push(message.clone());
        }
    }
    errors
}

fn entry<'a>(messages: &'a mut ModuleMessages, id: &HookId) -> &'a mut Vec<String> {
    messages
        .entry(id.module_code.clone())
        .or_default()
        .entry(id.hook_impl_code.clone())
        .or_default()
}

fn trace(context: &HookExecutionContext, level: TraceLevel) -> ModulesTrace {
    let stages: Vec<StageTrace> = context
        .stage_outcomes()
        .iter()
        .map(|(stage, outcomes)| {
            let outcomes: Vec<StageOutcomeTrace> = outcomes
                .iter()
                .map(|outcome| stage_outcome_trace(outcome, level))
                .collect();
            StageTrace {
                stage: *stage,
                execution_time_ms: outcomes.iter().map(|outcome| outcome.execution_time_ms).sum(),
                outcomes,
            }
        })
        .collect();

    ModulesTrace {
        execution_time_ms: stages.iter().map(|stage| stage.execution_time_ms).sum(),
        stages,
    }
}

fn stage_outcome_trace(outcome: &StageExecutionOutcome, level: TraceLevel) -> StageOutcomeTrace {
    let groups: Vec<GroupTrace> = outcome
        .groups
        .iter()
        .map(|group| group_trace(group, level))
        .collect();
    StageOutcomeTrace {
        entity: outcome.entity.clone(),
        execution_time_ms: groups.iter().map(|group| group.execution_time_ms).sum(),
        groups,
    }
}

/// Hooks of a group run concurrently, so the group takes as long as its slowest hook.
fn group_trace(group: &GroupExecutionOutcome, level: TraceLevel) -> GroupTrace {
    let invocation_results: Vec<HookTrace> = group
        .hooks
        .iter()
        .map(|hook| {
            let verbose = level == TraceLevel::Verbose;
            HookTrace {
                hook_id: hook.hook_id.clone(),
                execution_time_ms: hook.execution_time_ms,
                status: hook.status,
                action: hook.action,
                message: hook.message.clone(),
                debug_messages: if verbose {
                    hook.debug_messages.clone()
                } else {
                    Vec::new()
                },
                analytics_tags: if verbose {
                    hook.analytics_tags.clone()
                } else {
                    None
                },
            }
        })
        .collect();

    GroupTrace {
        execution_time_ms: invocation_results
            .iter()
            .map(|hook| hook.execution_time_ms)
            .max()
            .unwrap_or_default(),
        invocation_results,
    }
}
