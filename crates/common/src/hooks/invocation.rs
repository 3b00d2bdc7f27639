//! Hook trait plus what goes in and comes out of a single hook invocation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::analytics::Tags;
use super::payload::Payload;
use super::stage::Stage;
use crate::error::AuctionHooksError;
use crate::openrtb::SeatNonBid;

/// Opaque per-module state carried between a module's invocations within one
/// request. The engine stores and replays it, never inspects it.
pub type ModuleContext = Arc<dyn Any + Send + Sync>;

/// Pure function producing the next payload from the current one.
pub type PayloadUpdate<P> = Box<dyn FnOnce(P) -> P + Send>;

/// One module's extension point for a given stage.
#[async_trait]
pub trait Hook<P: Payload>: Send + Sync {
    /// Hook implementation code referenced from execution plans.
    fn code(&self) -> &str;

    /// Inspect `payload` and decide what to do with it.
    ///
    /// Errors are captured into the hook outcome; they never fail the request.
    async fn call(
        &self,
        payload: &P,
        context: &InvocationContext,
    ) -> Result<InvocationResult<P>, Report<AuctionHooksError>>;
}

/// Status a hook reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationAction {
    NoAction,
    Update,
    Reject,
}

/// Everything a hook learns about the invocation besides the payload.
#[derive(Clone)]
pub struct InvocationContext {
    pub endpoint: String,
    pub stage: Stage,
    /// Time slice allotted to this invocation.
    pub timeout: Duration,
    pub debug_enabled: bool,
    pub account_id: Option<String>,
    /// The module's section of the account hook configuration.
    pub account_config: Option<Value>,
    /// Context returned by this module's previous invocation, or its initial one.
    pub module_context: Option<ModuleContext>,
    /// Bidder the stage runs for, on bidder stages.
    pub bidder: Option<String>,
}

impl InvocationContext {
    /// Downcasts the carried module context.
    #[must_use]
    pub fn module_context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.module_context
            .as_ref()
            .and_then(|context| context.downcast_ref::<T>())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("endpoint", &self.endpoint)
            .field("stage", &self.stage)
            .field("timeout", &self.timeout)
            .field("debug_enabled", &self.debug_enabled)
            .field("account_id", &self.account_id)
            .field("account_config", &self.account_config)
            .field("has_module_context", &self.module_context.is_some())
            .field("bidder", &self.bidder)
            .finish()
    }
}

/// Result a hook returns to the engine.
pub struct InvocationResult<P> {
    pub status: InvocationStatus,
    pub action: InvocationAction,
    pub payload_update: Option<PayloadUpdate<P>>,
    pub message: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub debug_messages: Vec<String>,
    pub analytics_tags: Option<Tags>,
    pub module_context: Option<ModuleContext>,
    pub seat_non_bids: Vec<SeatNonBid>,
}

impl<P> InvocationResult<P> {
    fn with_action(status: InvocationStatus, action: InvocationAction) -> Self {
        Self {
            status,
            action,
            payload_update: None,
            message: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            debug_messages: Vec::new(),
            analytics_tags: None,
            module_context: None,
            seat_non_bids: Vec::new(),
        }
    }

    #[must_use]
    pub fn no_action() -> Self {
        Self::with_action(InvocationStatus::Success, InvocationAction::NoAction)
    }

    #[must_use]
    pub fn update(update: impl FnOnce(P) -> P + Send + 'static) -> Self {
        let mut result = Self::with_action(InvocationStatus::Success, InvocationAction::Update);
        result.payload_update = Some(Box::new(update));
        result
    }

    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        let mut result = Self::with_action(InvocationStatus::Success, InvocationAction::Reject);
        result.message = Some(message.into());
        result
    }

    /// Hook ran but reports its own failure; the payload is left untouched.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        let mut result = Self::with_action(InvocationStatus::Failure, InvocationAction::NoAction);
        result.message = Some(message.into());
        result
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    #[must_use]
    pub fn with_debug_message(mut self, message: impl Into<String>) -> Self {
        self.debug_messages.push(message.into());
        self
    }

    #[must_use]
    pub fn with_analytics_tags(mut self, tags: Tags) -> Self {
        self.analytics_tags = Some(tags);
        self
    }

    #[must_use]
    pub fn with_module_context<T: Any + Send + Sync>(mut self, context: T) -> Self {
        self.module_context = Some(Arc::new(context));
        self
    }

    #[must_use]
    pub fn with_seat_non_bids(mut self, seat_non_bids: Vec<SeatNonBid>) -> Self {
        self.seat_non_bids = seat_non_bids;
        self
    }
}

impl<P> fmt::Debug for InvocationResult<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationResult")
            .field("status", &self.status)
            .field("action", &self.action)
            .field("has_payload_update", &self.payload_update.is_some())
            .field("message", &self.message)
            .field("errors", &self.errors)
            .field("warnings", &self.warnings)
            .field("debug_messages", &self.debug_messages)
            .field("analytics_tags", &self.analytics_tags)
            .field("has_module_context", &self.module_context.is_some())
            .field("seat_non_bids", &self.seat_non_bids)
            .finish()
    }
}
