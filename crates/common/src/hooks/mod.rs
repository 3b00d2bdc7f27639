//! Hook execution pipeline.
//!
//! Modules register hooks for fixed stages of the auction. Per request the
//! [`HookStageExecutor`] resolves which hooks run at a stage from the host and
//! account execution plans, runs each group concurrently within its share of
//! the request budget, applies payload updates in declaration order and
//! records every outcome in the [`HookExecutionContext`].

use error_stack::Report;
use serde_json::Value;

use crate::error::AuctionHooksError;
use crate::rule_engine;
use crate::settings::Settings;

pub mod analytics;
pub mod catalog;
pub mod context;
pub mod debug;
pub mod executor;
mod group_executor;
pub mod invocation;
pub mod metrics;
pub mod outcome;
pub mod payload;
pub mod plan;
pub mod stage;

pub use analytics::{ActivityTag, AppliedTo, ResultTag, Tags};
pub use catalog::{HookCatalog, ModuleRegistration, ModuleRegistrationBuilder};
pub use context::HookExecutionContext;
pub use debug::{modules_ext, ModulesExt};
pub use executor::HookStageExecutor;
pub use group_executor::HookStageExecutionResult;
pub use invocation::{
    Hook, InvocationAction, InvocationContext, InvocationResult, InvocationStatus, ModuleContext,
};
pub use metrics::{HookMetrics, HookStats};
pub use outcome::{
    ExecutionAction, ExecutionStatus, GroupExecutionOutcome, HookExecutionOutcome,
    StageExecutionOutcome,
};
pub use plan::{ExecutionPlan, HookId};
pub use stage::{Stage, StageWithHookType};

type ModuleBuilder = fn(&Settings) -> Result<Option<ModuleRegistration>, Report<AuctionHooksError>>;

/// Modules that ship with the crate.
pub(crate) fn builders() -> &'static [ModuleBuilder] {
    &[rule_engine::register]
}

type AccountConfigValidator = fn(&Value) -> Result<(), Report<AuctionHooksError>>;

/// Account configuration checks of the built-in modules, by module code.
pub(crate) fn account_config_validators() -> &'static [(&'static str, AccountConfigValidator)] {
    &[(rule_engine::MODULE_CODE, rule_engine::validate_account_config)]
}

/// Registers every built-in module that is configured and enabled.
///
/// # Errors
///
/// Fails on the first module whose configuration is invalid or whose
/// registration conflicts with another module.
pub fn build_catalog(settings: &Settings) -> Result<HookCatalog, Report<AuctionHooksError>> {
    let mut catalog = HookCatalog::new();
    for builder in builders() {
        if let Some(registration) = builder(settings)? {
            catalog.register(registration)?;
        }
    }
    Ok(catalog)
}
