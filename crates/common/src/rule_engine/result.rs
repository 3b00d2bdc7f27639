//! What a rule produces: the (possibly) updated request, analytics and
//! rejected-bid records.

use crate::hooks::analytics::Tags;
use crate::openrtb::SeatNonBid;

/// Scope of a rule's effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granularity {
    /// The rule may change the whole request.
    Request,
    /// The rule may only change the bidders of the named impression.
    Imp(String),
}

impl Granularity {
    /// Whether an impression falls under this granularity.
    #[must_use]
    pub fn covers(&self, imp_id: &str) -> bool {
        match self {
            Self::Request => true,
            Self::Imp(id) => id == imp_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleAction {
    NoAction,
    Update,
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleResult<T> {
    /// `None` only for rejections.
    pub value: Option<T>,
    pub action: RuleAction,
    pub tags: Tags,
    pub seat_non_bids: Vec<SeatNonBid>,
}

impl<T> RuleResult<T> {
    #[must_use]
    pub fn unchanged(value: T) -> Self {
        Self {
            value: Some(value),
            action: RuleAction::NoAction,
            tags: Tags::default(),
            seat_non_bids: Vec::new(),
        }
    }

    #[must_use]
    pub fn updated(value: T, tags: Tags, seat_non_bids: Vec<SeatNonBid>) -> Self {
        Self {
            value: Some(value),
            action: RuleAction::Update,
            tags,
            seat_non_bids,
        }
    }

    #[must_use]
    pub fn rejected(tags: Tags, seat_non_bids: Vec<SeatNonBid>) -> Self {
        Self {
            value: None,
            action: RuleAction::Reject,
            tags,
            seat_non_bids,
        }
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.action == RuleAction::Reject
    }

    /// Chains `next` after `self`: the stronger action wins and tags and
    /// seat non-bids accumulate in order.
    #[must_use]
    pub fn merge(mut self, next: RuleResult<T>) -> Self {
        self.tags.merge(next.tags);
        self.seat_non_bids.extend(next.seat_non_bids);
        self.action = self.action.max(next.action);
        self.value = if self.action == RuleAction::Reject {
            None
        } else {
            next.value
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::analytics::ActivityTag;

    #[test]
    fn test_granularity_covers() {
        assert!(Granularity::Request.covers("any"));
        assert!(Granularity::Imp("a".into()).covers("a"));
        assert!(!Granularity::Imp("a".into()).covers("b"));
    }

    #[test]
    fn test_merge_keeps_strongest_action_and_accumulates() {
        let first = RuleResult::updated(
            1,
            Tags::new(vec![ActivityTag::success("first", vec![])]),
            Vec::new(),
        );
        let second = RuleResult::unchanged(2).merge(RuleResult::unchanged(3));
        assert_eq!(second.action, RuleAction::NoAction);
        assert_eq!(second.value, Some(3));

        let merged = first.merge(RuleResult::unchanged(4));
        assert_eq!(merged.action, RuleAction::Update);
        assert_eq!(merged.value, Some(4));
        assert_eq!(merged.tags.activities.len(), 1);

        let rejected = merged.merge(RuleResult::rejected(Tags::default(), Vec::new()));
        assert!(rejected.is_rejected());
        assert_eq!(rejected.value, None);
    }
}
