//! Error types shared by the hook engine, the activity infrastructure and the
//! rule engine.
//!
//! Fallible operations return `Result<T, Report<AuctionHooksError>>`. Hook faults
//! raised while a stage runs are never surfaced through this type to the caller of
//! the executor; they are captured into the hook outcome instead.

use derive_more::{Display, Error};

/// Top-level error for the crate.
#[derive(Debug, Display, Error)]
pub enum AuctionHooksError {
    /// Malformed or missing configuration.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// Execution plan could not be parsed or references unknown hooks.
    #[display("Invalid execution plan: {message}")]
    InvalidExecutionPlan { message: String },

    /// A module could not be registered in the hook catalog.
    #[display("Module registration error: {message}")]
    ModuleRegistration { message: String },

    /// A hook implementation reported an error.
    #[display("Hook error: {message}")]
    Hook { message: String },

    /// Rule engine configuration or evaluation error.
    #[display("Rule engine error: {message}")]
    RuleEngine { message: String },

    /// Activity rule configuration error.
    #[display("Activity configuration error: {message}")]
    Activity { message: String },

    /// Settings could not be loaded.
    #[display("Settings error: {message}")]
    Settings { message: String },
}

impl AuctionHooksError {
    /// Shorthand used by hook implementations to fail an invocation.
    #[must_use]
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
        }
    }
}

/// Raised while validating result/schema function configuration.
///
/// Kept separate from [`AuctionHooksError`] so that callers can distinguish a
/// misconfigured rule from other load failures.
#[derive(Debug, Display, Error, PartialEq, Eq)]
#[display("{message}")]
pub struct ConfigurationValidationError {
    pub message: String,
}

impl ConfigurationValidationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
