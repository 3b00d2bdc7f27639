//! The `pb-rule-engine` module: configurable rules that filter bidders per
//! request or impression, built on the hook and analytics primitives.
//!
//! A rule set holds weighted model groups. Per request one group is drawn;
//! its schema functions turn the request into values, the first rule whose
//! conditions match those values fires its result functions, and the
//! `default` results fire when none does.

use std::sync::Arc;

use error_stack::Report;
use serde_json::Value;

use crate::error::AuctionHooksError;
use crate::hooks::catalog::ModuleRegistration;
use crate::hooks::invocation::Hook;
use crate::hooks::payload::AuctionRequestPayload;
use crate::hooks::stage;
use crate::settings::Settings;

pub mod config;
pub mod engine;
pub mod functions;
pub mod hook;
pub mod result;
pub mod schema;

pub use config::RuleEngineConfig;
pub use engine::RuleEngine;
pub use hook::RuleEngineHook;
pub use result::{Granularity, RuleAction, RuleResult};

pub const MODULE_CODE: &str = "pb-rule-engine";
pub const HOOK_CODE: &str = "pb-rule-engine-processed-auction-request";

/// Registers the module when `[hooks.modules."pb-rule-engine"]` is present
/// and enabled. The host rules are compiled here so a broken configuration
/// fails startup instead of a request.
///
/// # Errors
///
/// Returns [`AuctionHooksError::RuleEngine`] if the host configuration is
/// invalid.
pub fn register(settings: &Settings) -> Result<Option<ModuleRegistration>, Report<AuctionHooksError>> {
    let Some(raw) = settings.hooks.modules.get(MODULE_CODE) else {
        log::debug!("Rule engine not configured");
        return Ok(None);
    };

    let config = RuleEngineConfig::from_value(raw)?;
    if !config.enabled {
        log::info!("Rule engine disabled by configuration");
        return Ok(None);
    }

    let engine = RuleEngine::compile(&config)?;
    let hook: Arc<dyn Hook<AuctionRequestPayload>> = Arc::new(RuleEngineHook::new(engine));
    Ok(Some(
        ModuleRegistration::builder(MODULE_CODE)
            .with_hook(stage::PROCESSED_AUCTION_REQUEST, hook)
            .build(),
    ))
}

/// Compiles an account's module configuration without keeping the result,
/// so a broken account is rejected when it loads.
///
/// # Errors
///
/// Returns [`AuctionHooksError::RuleEngine`] or
/// [`AuctionHooksError::Configuration`] if the rules do not compile.
pub fn validate_account_config(config: &Value) -> Result<(), Report<AuctionHooksError>> {
    RuleEngine::from_value(config).map(|_| ())
}
