//! Module registration surface and the catalog of registered hooks.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;

use super::invocation::{Hook, ModuleContext};
use super::payload::Payload;
use super::plan::HookId;
use super::stage::{Stage, StageWithHookType};
use crate::error::AuctionHooksError;

type ErasedHook = Box<dyn Any + Send + Sync>;

/// What a module declares when it is registered.
#[derive(Debug)]
pub struct ModuleRegistration {
    code: String,
    hooks: Vec<(Stage, String, ErasedHook)>,
    initial_context: Option<ModuleContext>,
    timeout: Option<Duration>,
}

impl ModuleRegistration {
    #[must_use]
    pub fn builder(code: impl Into<String>) -> ModuleRegistrationBuilder {
        ModuleRegistrationBuilder {
            registration: Self {
                code: code.into(),
                hooks: Vec::new(),
                initial_context: None,
                timeout: None,
            },
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

pub struct ModuleRegistrationBuilder {
    registration: ModuleRegistration,
}

impl ModuleRegistrationBuilder {
    /// Registers `hook` for `stage`. The typed stage marker guarantees the hook
    /// accepts the payload that flows through the stage.
    #[must_use]
    pub fn with_hook<P: Payload>(
        mut self,
        stage: StageWithHookType<P>,
        hook: Arc<dyn Hook<P>>,
    ) -> Self {
        let code = hook.code().to_string();
        self.registration
            .hooks
            .push((stage.stage(), code, Box::new(hook)));
        self
    }

    /// Context handed to the module's first invocation in every request.
    #[must_use]
    pub fn with_initial_context<T: Any + Send + Sync>(mut self, context: T) -> Self {
        self.registration.initial_context = Some(Arc::new(context));
        self
    }

    /// Per-hook time limit overriding the group's, bounded by the remaining budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.registration.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn build(self) -> ModuleRegistration {
        self.registration
    }
}

struct RegisteredModule {
    hooks: HashMap<(Stage, String), ErasedHook>,
    initial_context: Option<ModuleContext>,
    timeout: Option<Duration>,
}

/// Every registered module, keyed by module code.
#[derive(Default)]
pub struct HookCatalog {
    modules: BTreeMap<String, RegisteredModule>,
}

impl HookCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module to the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionHooksError::ModuleRegistration`] if the module code is
    /// already taken or the module registers the same hook code twice for a stage.
    pub fn register(
        &mut self,
        registration: ModuleRegistration,
    ) -> Result<(), Report<AuctionHooksError>> {
        let ModuleRegistration {
            code,
            hooks,
            initial_context,
            timeout,
        } = registration;

        if self.modules.contains_key(&code) {
            return Err(Report::new(AuctionHooksError::ModuleRegistration {
                message: format!("Module '{code}' is already registered"),
            }));
        }

        let mut by_key = HashMap::with_capacity(hooks.len());
        for (stage, hook_code, hook) in hooks {
            if by_key.insert((stage, hook_code.clone()), hook).is_some() {
                return Err(Report::new(AuctionHooksError::ModuleRegistration {
                    message: format!(
                        "Module '{code}' registers hook '{hook_code}' twice for stage '{stage}'"
                    ),
                }));
            }
        }

        log::info!(
            "Registered module '{}' with {} hook(s)",
            code,
            by_key.len()
        );
        self.modules.insert(
            code,
            RegisteredModule {
                hooks: by_key,
                initial_context,
                timeout,
            },
        );
        Ok(())
    }

    /// Whether `id` names a hook registered for `stage`.
    #[must_use]
    pub fn contains(&self, stage: Stage, id: &HookId) -> bool {
        self.modules.get(&id.module_code).is_some_and(|module| {
            module
                .hooks
                .contains_key(&(stage, id.hook_impl_code.clone()))
        })
    }

    /// Typed hook lookup.
    #[must_use]
    pub fn hook<P: Payload>(
        &self,
        stage: StageWithHookType<P>,
        id: &HookId,
    ) -> Option<Arc<dyn Hook<P>>> {
        self.modules
            .get(&id.module_code)
            .and_then(|module| {
                module
                    .hooks
                    .get(&(stage.stage(), id.hook_impl_code.clone()))
            })
            .and_then(|hook| hook.downcast_ref::<Arc<dyn Hook<P>>>())
            .cloned()
    }

    #[must_use]
    pub fn initial_context(&self, module_code: &str) -> Option<ModuleContext> {
        self.modules
            .get(module_code)
            .and_then(|module| module.initial_context.clone())
    }

    #[must_use]
    pub fn module_timeout(&self, module_code: &str) -> Option<Duration> {
        self.modules
            .get(module_code)
            .and_then(|module| module.timeout)
    }

    pub fn module_codes(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}
