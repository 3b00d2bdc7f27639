//! Activity decision point.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use error_stack::{Report, ResultExt};

use super::config::ActivityConfiguration;
use super::debug::ActivityDebug;
use super::payload::ActivityInvocationPayload;
use super::rule::{Rule, RuleResult};
use super::Activity;
use crate::error::AuctionHooksError;

/// Ordered rules plus default for one activity.
#[derive(Debug)]
pub struct ActivityController {
    default_allowed: bool,
    rules: Vec<Box<dyn Rule>>,
}

impl ActivityController {
    #[must_use]
    pub fn new(default_allowed: bool, rules: Vec<Box<dyn Rule>>) -> Self {
        Self {
            default_allowed,
            rules,
        }
    }

    /// Compiles a controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any rule fails validation.
    pub fn from_config(
        config: &ActivityConfiguration,
    ) -> Result<Self, Report<AuctionHooksError>> {
        let rules = config
            .compile()?
            .into_iter()
            .map(|rule| Box::new(rule) as Box<dyn Rule>)
            .collect();
        Ok(Self::new(config.default_result(), rules))
    }

    /// First non-abstaining rule decides; otherwise the default applies.
    pub fn is_allowed(
        &self,
        payload: &dyn ActivityInvocationPayload,
        debug: &mut ActivityDebug,
    ) -> bool {
        debug.emit_default_result(self.default_allowed);

        for rule in &self.rules {
            let result = rule.evaluate(payload);
            debug.emit_processed_rule(rule.as_ref(), result);
            match result {
                RuleResult::Allow => return true,
                RuleResult::Disallow => return false,
                RuleResult::Abstain => {}
            }
        }

        self.default_allowed
    }
}

/// Read-only set of controllers, one per configured activity.
///
/// Activities without configuration are allowed.
#[derive(Debug, Default)]
pub struct ActivityInfrastructure {
    controllers: HashMap<Activity, ActivityController>,
}

impl ActivityInfrastructure {
    #[must_use]
    pub fn new(controllers: HashMap<Activity, ActivityController>) -> Self {
        Self { controllers }
    }

    /// Builds the infrastructure from per-activity configuration.
    ///
    /// # Errors
    ///
    /// Fails closed: if any activity's rules are invalid, no infrastructure is
    /// built.
    pub fn from_config(
        configs: &BTreeMap<Activity, ActivityConfiguration>,
    ) -> Result<Self, Report<AuctionHooksError>> {
        let mut controllers = HashMap::with_capacity(configs.len());
        for (activity, config) in configs {
            let controller = ActivityController::from_config(config).change_context(
                AuctionHooksError::Activity {
                    message: format!("Invalid rules for activity '{activity}'"),
                },
            )?;
            log::info!(
                "Registered {} rule(s) for activity '{}' (default allow: {})",
                config.rules.len(),
                activity,
                config.default_result()
            );
            controllers.insert(*activity, controller);
        }
        Ok(Self::new(controllers))
    }

    /// Whether `activity` may proceed for the component described by `payload`.
    #[must_use]
    pub fn is_allowed(&self, activity: Activity, payload: &dyn ActivityInvocationPayload) -> bool {
        self.is_allowed_traced(activity, payload, &mut ActivityDebug::default())
    }

    /// Same as [`Self::is_allowed`], recording the decision in `debug`.
    pub fn is_allowed_traced(
        &self,
        activity: Activity,
        payload: &dyn ActivityInvocationPayload,
        debug: &mut ActivityDebug,
    ) -> bool {
        debug.emit_invocation(activity, payload);

        let allowed = self
            .controllers
            .get(&activity)
            .map_or(true, |controller| controller.is_allowed(payload, debug));

        if !allowed {
            log::debug!(
                "Activity '{}' denied for {} '{}'",
                activity,
                payload.component().component_type,
                payload.component().name
            );
        }
        debug.emit_result(activity, payload, allowed);
        allowed
    }
}

/// Process-wide handle to the current [`ActivityInfrastructure`].
///
/// Readers take an `Arc` snapshot without locking; reconfiguration swaps in a
/// freshly built infrastructure.
#[derive(Debug, Clone)]
pub struct SharedActivityInfrastructure {
    current: Arc<ArcSwap<ActivityInfrastructure>>,
}

impl Default for SharedActivityInfrastructure {
    fn default() -> Self {
        Self::new(ActivityInfrastructure::default())
    }
}

impl SharedActivityInfrastructure {
    #[must_use]
    pub fn new(infrastructure: ActivityInfrastructure) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(infrastructure)),
        }
    }

    /// Snapshot of the current infrastructure.
    #[must_use]
    pub fn load(&self) -> Arc<ActivityInfrastructure> {
        self.current.load_full()
    }

    /// Replaces the infrastructure; in-flight snapshots keep the old rules.
    pub fn store(&self, infrastructure: ActivityInfrastructure) {
        self.current.store(Arc::new(infrastructure));
        log::info!("Activity infrastructure reloaded");
    }

    /// Rebuilds from configuration and swaps only if every rule compiles.
    ///
    /// # Errors
    ///
    /// Returns the compilation error; the previous infrastructure stays active.
    pub fn reload(
        &self,
        configs: &BTreeMap<Activity, ActivityConfiguration>,
    ) -> Result<(), Report<AuctionHooksError>> {
        let infrastructure = ActivityInfrastructure::from_config(configs)?;
        self.store(infrastructure);
        Ok(())
    }
}
