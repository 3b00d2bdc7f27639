//! Per-request debug trace of activity decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payload::ActivityInvocationPayload;
use super::rule::{Rule, RuleResult};
use super::Activity;

/// Amount of detail recorded in debug traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Basic,
    Verbose,
}

/// One line of the activity trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActivityTraceEntry {
    Invocation {
        description: &'static str,
        activity: Activity,
        payload: Value,
    },
    DefaultResult {
        description: &'static str,
        allowed: bool,
    },
    Rule {
        description: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_configuration: Option<Value>,
        result: RuleResult,
    },
    InvocationResult {
        description: &'static str,
        activity: Activity,
        allowed: bool,
    },
}

/// Collects trace entries and plain counters for one request.
///
/// With no trace level only the counters are maintained.
#[derive(Debug, Default)]
pub struct ActivityDebug {
    trace_level: Option<TraceLevel>,
    trace: Vec<ActivityTraceEntry>,
    processed_rules: u64,
    disallowed: Vec<(Activity, String)>,
}

impl ActivityDebug {
    #[must_use]
    pub fn new(trace_level: Option<TraceLevel>) -> Self {
        Self {
            trace_level,
            ..Self::default()
        }
    }

    pub(crate) fn emit_invocation(
        &mut self,
        activity: Activity,
        payload: &dyn ActivityInvocationPayload,
    ) {
        if self.trace_level.is_some() {
            self.trace.push(ActivityTraceEntry::Invocation {
                description: "Invocation of Activity Infrastructure.",
                activity,
                payload: payload.to_trace_json(),
            });
        }
    }

    pub(crate) fn emit_default_result(&mut self, allowed: bool) {
        if self.trace_level.is_some() {
            self.trace.push(ActivityTraceEntry::DefaultResult {
                description: "Setting the default invocation result.",
                allowed,
            });
        }
    }

    pub(crate) fn emit_processed_rule(&mut self, rule: &dyn Rule, result: RuleResult) {
        self.processed_rules += 1;
        match self.trace_level {
            Some(TraceLevel::Basic) => self.trace.push(ActivityTraceEntry::Rule {
                description: "Processing rule.",
                rule_configuration: None,
                result,
            }),
            Some(TraceLevel::Verbose) => self.trace.push(ActivityTraceEntry::Rule {
                description: "Processing rule.",
                rule_configuration: Some(rule.describe()),
                result,
            }),
            None => {}
        }
    }

    pub(crate) fn emit_result(
        &mut self,
        activity: Activity,
        payload: &dyn ActivityInvocationPayload,
        allowed: bool,
    ) {
        if !allowed {
            self.disallowed
                .push((activity, payload.component().name.clone()));
        }
        if self.trace_level.is_some() {
            self.trace.push(ActivityTraceEntry::InvocationResult {
                description: "Activity Infrastructure invocation result.",
                activity,
                allowed,
            });
        }
    }

    #[must_use]
    pub fn trace(&self) -> &[ActivityTraceEntry] {
        &self.trace
    }

    /// Number of rules evaluated, whether or not they matched.
    #[must_use]
    pub fn processed_rules_count(&self) -> u64 {
        self.processed_rules
    }

    /// Denied `(activity, component name)` pairs in decision order.
    #[must_use]
    pub fn disallowed(&self) -> &[(Activity, String)] {
        &self.disallowed
    }
}
