//! Hook execution pipeline, activity infrastructure and rule engine for an
//! OpenRTB auction server.
//!
//! The exchange calls the [`hooks::HookStageExecutor`] at each stage of an
//! auction; registered modules observe and mutate the request or response,
//! gated per invocation by the privacy rules of the
//! [`activity::ActivityInfrastructure`].
//!
//! # Modules
//!
//! - [`account`]: Account-level hook configuration
//! - [`activity`]: Privacy activity rules and their evaluation
//! - [`error`]: Error types and error handling utilities
//! - [`geo`]: Geographic signals used by activity rules
//! - [`hooks`]: Stages, execution plans, the hook catalog and the executor
//! - [`logging`]: Logger initialisation
//! - [`openrtb`]: The subset of OpenRTB the hooks see
//! - [`rule_engine`]: The `pb-rule-engine` module
//! - [`settings`]: Configuration management and validation
//! - [`test_support`]: Testing utilities and mocks
//! - [`timeout`]: Request-wide execution budget

pub mod account;
pub mod activity;
pub mod error;
pub mod geo;
pub mod hooks;
pub mod logging;
pub mod openrtb;
pub mod rule_engine;
pub mod settings;
pub mod timeout;
