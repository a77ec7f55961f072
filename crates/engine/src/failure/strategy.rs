//! Failure strategies and the advice derived from them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::state::FailureType;

/// What to do when a state fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureAction {
    Abort,
    Ignore,
    RetryThenFail,
    Rollback,
}

/// A workflow-level rule mapping failure types to an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureStrategy {
    /// Empty matches every failure.
    #[serde(default)]
    pub failure_types: Vec<FailureType>,
    pub action: FailureAction,
    #[serde(default)]
    pub retry_count: u32,
}

impl FailureStrategy {
    pub fn new(action: FailureAction) -> Self {
        Self {
            failure_types: Vec::new(),
            action,
            retry_count: 0,
        }
    }

    pub fn on(mut self, failure_type: FailureType) -> Self {
        self.failure_types.push(failure_type);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    fn matches(&self, failure_types: &BTreeSet<FailureType>) -> bool {
        self.failure_types.is_empty() || self.failure_types.iter().any(|t| failure_types.contains(t))
    }
}

/// Decision for a failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAdvice {
    /// Re-run the state; `attempt` counts from 1.
    Retry { attempt: u32 },
    /// Treat the state as done and continue.
    Ignore,
    /// Run the rollback plan.
    Rollback,
    /// End the workflow as aborted.
    Abort,
    /// End the workflow as failed.
    Fail,
}

/// Failure types a strategy is matched against. Without timeout failure
/// support a timeout is matched as a plain application failure.
pub fn effective_failure_types(
    failure_types: &BTreeSet<FailureType>,
    timeout_failure_support: bool,
) -> BTreeSet<FailureType> {
    let mut effective = failure_types.clone();
    if !timeout_failure_support {
        effective.remove(&FailureType::Timeout);
    }
    if effective.is_empty() {
        effective.insert(FailureType::ApplicationError);
    }
    effective
}

/// First strategy matching the failure, in declaration order.
pub fn select_strategy<'a>(
    strategies: &'a [FailureStrategy],
    failure_types: &BTreeSet<FailureType>,
    timeout_failure_support: bool,
) -> Option<&'a FailureStrategy> {
    let effective = effective_failure_types(failure_types, timeout_failure_support);
    strategies.iter().find(|s| s.matches(&effective))
}

/// Advice for a state that failed after `retries_so_far` retries.
pub fn advise(
    strategies: &[FailureStrategy],
    failure_types: &BTreeSet<FailureType>,
    retries_so_far: u32,
    timeout_failure_support: bool,
) -> FailureAdvice {
    match select_strategy(strategies, failure_types, timeout_failure_support) {
        None => FailureAdvice::Fail,
        Some(strategy) => match strategy.action {
            FailureAction::Abort => FailureAdvice::Abort,
            FailureAction::Ignore => FailureAdvice::Ignore,
            FailureAction::Rollback => FailureAdvice::Rollback,
            FailureAction::RetryThenFail if retries_so_far < strategy.retry_count => {
                FailureAdvice::Retry {
                    attempt: retries_so_far + 1,
                }
            }
            FailureAction::RetryThenFail => FailureAdvice::Fail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[FailureType]) -> BTreeSet<FailureType> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_no_strategy_fails() {
        assert_eq!(advise(&[], &types(&[FailureType::ApplicationError]), 0, true), FailureAdvice::Fail);
    }

    #[test]
    fn test_retry_then_fail() {
        let strategies = vec![FailureStrategy::new(FailureAction::RetryThenFail).with_retry_count(2)];
        let failure = types(&[FailureType::ApplicationError]);
        assert_eq!(advise(&strategies, &failure, 0, false), FailureAdvice::Retry { attempt: 1 });
        assert_eq!(advise(&strategies, &failure, 1, false), FailureAdvice::Retry { attempt: 2 });
        assert_eq!(advise(&strategies, &failure, 2, false), FailureAdvice::Fail);
    }

    #[test]
    fn test_timeout_strategy_requires_flag() {
        let strategies = vec![
            FailureStrategy::new(FailureAction::Ignore).on(FailureType::Timeout),
            FailureStrategy::new(FailureAction::Rollback).on(FailureType::ApplicationError),
        ];
        let timeout = types(&[FailureType::Timeout]);
        assert_eq!(advise(&strategies, &timeout, 0, true), FailureAdvice::Ignore);
        assert_eq!(advise(&strategies, &timeout, 0, false), FailureAdvice::Rollback);
    }

    #[test]
    fn test_typed_strategy_skips_other_failures() {
        let strategies = vec![FailureStrategy::new(FailureAction::Abort).on(FailureType::Connectivity)];
        assert_eq!(
            advise(&strategies, &types(&[FailureType::Verification]), 0, true),
            FailureAdvice::Fail
        );
        assert_eq!(
            advise(&strategies, &types(&[FailureType::Connectivity]), 0, true),
            FailureAdvice::Abort
        );
    }

    #[test]
    fn test_untagged_failure_is_application_error() {
        assert_eq!(
            effective_failure_types(&BTreeSet::new(), true),
            types(&[FailureType::ApplicationError])
        );
    }
}
