//! Offline evaluation of activity rules.
//!
//! Loads `[activities]` from a configuration file and answers whether one
//! component may perform one activity under the given privacy signals.

use std::fs;
use std::path::Path;

use auction_hooks_common::activity::{
    Activity, ActivityDebug, ActivityInfrastructure, Component, ComponentPayload, ComponentType,
    TraceLevel,
};
use auction_hooks_common::geo::GeoInfo;
use auction_hooks_common::settings::Settings;

use crate::error::CliError;

/// Inputs of a single activity check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub activity: String,
    pub component_type: ComponentType,
    pub component_name: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub gpc: Option<String>,
    pub trace: Option<TraceLevel>,
}

/// Decision returned by [`evaluate`].
#[derive(Debug)]
pub struct CheckOutcome {
    pub activity: Activity,
    pub allowed: bool,
    pub processed_rules: u64,
    pub debug: ActivityDebug,
}

/// Evaluates `request` against the activity rules in `content`.
pub fn evaluate(content: &str, request: &CheckRequest) -> Result<CheckOutcome, CliError> {
    let activity = request
        .activity
        .parse::<Activity>()
        .map_err(CliError::Activity)?;

    let settings = Settings::from_toml_validated(content)
        .map_err(|e| CliError::Config(format!("Failed to parse and merge config: {:?}", e)))?;
    let configs = settings
        .activity_configs()
        .map_err(|e| CliError::Activity(format!("{e:?}")))?;
    let infrastructure = ActivityInfrastructure::from_config(&configs)
        .map_err(|e| CliError::Activity(format!("{e:?}")))?;

    let geo = request
        .country
        .as_ref()
        .map(|country| GeoInfo::new(country.as_str(), request.region.clone()));
    let payload = ComponentPayload::for_signals(
        Component::new(request.component_type, request.component_name.as_str()),
        geo,
        request.gpc.clone(),
    );

    let mut debug = ActivityDebug::new(request.trace);
    let allowed = infrastructure.is_allowed_traced(activity, payload.as_ref(), &mut debug);

    Ok(CheckOutcome {
        activity,
        allowed,
        processed_rules: debug.processed_rules_count(),
        debug,
    })
}

/// Runs [`evaluate`] on `file` and prints the decision.
pub fn check(file: &Path, request: &CheckRequest, verbose: bool) -> Result<(), CliError> {
    let content = fs::read_to_string(file)?;
    if verbose {
        println!("Loading activity rules from: {}", file.display());
    }

    let outcome = evaluate(&content, request)?;

    println!(
        "{} '{}' {} activity '{}'",
        request.component_type,
        request.component_name,
        if outcome.allowed {
            "is allowed"
        } else {
            "is denied"
        },
        outcome.activity
    );
    println!("  Rules processed: {}", outcome.processed_rules);

    if request.trace.is_some() {
        let trace = serde_json::to_string_pretty(outcome.debug.trace())
            .map_err(|e| CliError::Activity(format!("Failed to render trace: {e}")))?;
        println!("\nTrace:\n{}", trace);
    }

    Ok(())
}
