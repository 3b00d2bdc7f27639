use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use error_stack::Report;
use serde_json::Value;

use super::engine::RuleEngine;
use super::result::RuleAction;
use super::HOOK_CODE;
use crate::error::AuctionHooksError;
use crate::hooks::invocation::{Hook, InvocationContext, InvocationResult};
use crate::hooks::payload::AuctionRequestPayload;

/// Engine compiled from one account's configuration.
struct AccountEngine {
    config: Value,
    engine: Arc<RuleEngine>,
}

/// Applies the rule engine to the processed auction request.
///
/// An account that configures the module gets its own rules, compiled on
/// first use and reused until the account's configuration changes; everybody
/// else gets the host rules compiled at startup.
pub struct RuleEngineHook {
    host_engine: Arc<RuleEngine>,
    account_engines: ArcSwap<HashMap<String, Arc<AccountEngine>>>,
}

impl RuleEngineHook {
    #[must_use]
    pub fn new(host_engine: RuleEngine) -> Self {
        Self {
            host_engine: Arc::new(host_engine),
            account_engines: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    fn account_engine(
        &self,
        account_id: Option<&str>,
        config: &Value,
    ) -> Result<Arc<RuleEngine>, Report<AuctionHooksError>> {
        let Some(account_id) = account_id else {
            return RuleEngine::from_value(config).map(Arc::new);
        };

        if let Some(cached) = self.account_engines.load().get(account_id) {
            if cached.config == *config {
                return Ok(Arc::clone(&cached.engine));
            }
        }

        let engine = Arc::new(RuleEngine::from_value(config)?);
        let entry = Arc::new(AccountEngine {
            config: config.clone(),
            engine: Arc::clone(&engine),
        });
        self.account_engines.rcu(|engines| {
            let mut next = (**engines).clone();
            next.insert(account_id.to_string(), Arc::clone(&entry));
            next
        });
        log::debug!("Compiled rule engine for account '{account_id}'");
        Ok(engine)
    }
}

#[async_trait]
impl Hook<AuctionRequestPayload> for RuleEngineHook {
    fn code(&self) -> &str {
        HOOK_CODE
    }

    async fn call(
        &self,
        payload: &AuctionRequestPayload,
        context: &InvocationContext,
    ) -> Result<InvocationResult<AuctionRequestPayload>, Report<AuctionHooksError>> {
        let engine = match &context.account_config {
            Some(config) => self.account_engine(context.account_id.as_deref(), config)?,
            None => Arc::clone(&self.host_engine),
        };

        if engine.is_empty() {
            return Ok(InvocationResult::no_action());
        }

        let result = engine.apply(payload.bid_request.clone());
        let mut invocation = match (result.action, result.value) {
            (RuleAction::Reject, _) => {
                log::info!(
                    "Rule engine rejected request '{}' for account {:?}",
                    payload.bid_request.id,
                    context.account_id
                );
                InvocationResult::reject("Request rejected by rule engine")
            }
            (RuleAction::Update, Some(request)) => {
                InvocationResult::update(move |mut payload: AuctionRequestPayload| {
                    payload.bid_request = request;
                    payload
                })
            }
            _ => InvocationResult::no_action(),
        };

        if !result.tags.is_empty() {
            invocation = invocation.with_analytics_tags(result.tags);
        }
        Ok(invocation.with_seat_non_bids(result.seat_non_bids))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::account::Account;
    use crate::hooks::invocation::InvocationAction;
    use crate::hooks::Stage;
    use crate::test_support::tests::bid_request_with_imps;

    fn context(account_config: Option<serde_json::Value>) -> InvocationContext {
        InvocationContext {
            endpoint: "/openrtb2/auction".into(),
            stage: Stage::ProcessedAuctionRequest,
            timeout: Duration::from_millis(100),
            debug_enabled: false,
            account_id: Some("acc-1".into()),
            account_config,
            module_context: None,
            bidder: None,
        }
    }

    fn exclude_config(bidders: &[&str]) -> serde_json::Value {
        json!({
            "rule_sets": [{
                "name": "filter",
                "model_groups": [{
                    "analytics_key": "filter",
                    "schema": [{"function": "channel"}],
                    "rules": [{"conditions": ["*"], "results": [
                        {"function": "excludeBidders", "args": {"bidders": bidders}}
                    ]}]
                }]
            }]
        })
    }

    fn payload(imps: &[(&str, &[&str])]) -> AuctionRequestPayload {
        AuctionRequestPayload {
            bid_request: bid_request_with_imps(imps),
        }
    }

    #[tokio::test]
    async fn test_host_rules_update_request() {
        let hook = RuleEngineHook::new(
            RuleEngine::from_value(&exclude_config(&["bidder1"])).expect("should compile"),
        );
        let payload = payload(&[("imp", &["bidder1", "bidder2"])]);

        let result = hook.call(&payload, &context(None)).await.expect("should run");

        assert_eq!(result.action, InvocationAction::Update);
        assert_eq!(result.seat_non_bids[0].seat, "bidder1");
        assert_eq!(
            result.analytics_tags.expect("tags").activities[0].name,
            "pb-rule-engine"
        );
        let update = result.payload_update.expect("update");
        assert_eq!(update(payload).bid_request.imp[0].bidders(), vec!["bidder2"]);
    }

    #[tokio::test]
    async fn test_account_rules_take_precedence() {
        let hook = RuleEngineHook::new(RuleEngine::default());
        let payload = payload(&[("imp", &["bidder1"])]);

        let result = hook
            .call(&payload, &context(Some(exclude_config(&["bidder1"]))))
            .await
            .expect("should run");

        assert_eq!(result.action, InvocationAction::Reject);
        assert_eq!(result.seat_non_bids.len(), 1);
    }

    #[test]
    fn test_account_engine_is_compiled_once_per_config() {
        let hook = RuleEngineHook::new(RuleEngine::default());
        let config = exclude_config(&["bidder1"]);

        let first = hook
            .account_engine(Some("acc-1"), &config)
            .expect("should compile");
        let second = hook
            .account_engine(Some("acc-1"), &config)
            .expect("should reuse");
        assert!(Arc::ptr_eq(&first, &second));

        let changed = hook
            .account_engine(Some("acc-1"), &exclude_config(&["bidder2"]))
            .expect("should recompile");
        assert!(!Arc::ptr_eq(&first, &changed));

        let other_account = hook
            .account_engine(Some("acc-2"), &config)
            .expect("should compile");
        assert!(!Arc::ptr_eq(&first, &other_account));
        assert_eq!(hook.account_engines.load().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_engine_does_nothing() {
        let hook = RuleEngineHook::new(RuleEngine::default());
        let result = hook
            .call(&payload(&[("imp", &["bidder1"])]), &context(None))
            .await
            .expect("should run");

        assert_eq!(result.action, InvocationAction::NoAction);
        assert!(result.analytics_tags.is_none());
    }

    #[tokio::test]
    async fn test_invalid_account_config_is_an_error() {
        let broken = json!({"rule_sets": "nope"});

        let load_err = Account::from_json(
            &json!({"id": "acc-1", "hooks": {"modules": {"pb-rule-engine": broken.clone()}}}).to_string(),
        )
        .expect_err("account should be rejected when it loads");
        assert!(load_err.to_string().contains("pb-rule-engine"));

        // an account built without `from_json` still fails the invocation
        let hook = RuleEngineHook::new(RuleEngine::default());
        let err = hook
            .call(&payload(&[("imp", &["bidder1"])]), &context(Some(broken)))
            .await
            .expect_err("should fail");

        assert!(err.current_context().to_string().contains("Rule engine"));
        assert!(hook.account_engines.load().is_empty());
    }
}
