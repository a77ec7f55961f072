//! Correlation registry routing delegate results to waiting states.
//!
//! A suspended state registers the full set of correlation ids it
//! dispatched. Responses are buffered until every id has arrived, then
//! handed back as one batch. A response may beat the registration of its
//! id; it is held until a state claims the id or it ages out.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::response::ResponseData;
use crate::error::{EngineError, EngineResult};

/// Result of delivering one response, or of registering a wait.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    /// Recorded; other correlation ids of the batch are still outstanding.
    Pending,
    /// The batch is complete and the waiter has been released.
    Ready {
        state_execution_id: String,
        responses: HashMap<String, ResponseData>,
    },
    /// No state has claimed the id yet. The response is kept for the
    /// registration that follows its dispatch.
    Buffered,
    /// The id belonged to a wait that already completed or was cancelled.
    Unclaimed,
}

#[derive(Debug)]
struct Waiter {
    expected: HashSet<String>,
    received: HashMap<String, ResponseData>,
}

#[derive(Debug, Default)]
struct Registry {
    waiters: HashMap<String, Waiter>,
    owners: HashMap<String, String>,
    early: HashMap<String, (ResponseData, DateTime<Utc>)>,
    retired: HashMap<String, DateTime<Utc>>,
}

impl Registry {
    fn release(&mut self, state_execution_id: &str) -> Option<Waiter> {
        let waiter = self.waiters.remove(state_execution_id)?;
        let now = Utc::now();
        for id in &waiter.expected {
            self.owners.remove(id);
            self.retired.insert(id.clone(), now);
        }
        Some(waiter)
    }
}

#[derive(Debug, Default)]
pub struct WaitNotifyEngine {
    registry: Mutex<Registry>,
}

impl WaitNotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `state_execution_id` as waiting for every id in
    /// `correlation_ids`. Responses buffered for those ids are taken over;
    /// when they already cover the batch the outcome is `Ready` and nothing
    /// stays registered.
    pub async fn wait_for_all(
        &self,
        state_execution_id: &str,
        correlation_ids: &[String],
    ) -> EngineResult<NotifyOutcome> {
        let expected: HashSet<String> = correlation_ids
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        if expected.is_empty() {
            return Err(EngineError::invalid_request(format!(
                "State execution {} registered no correlation ids",
                state_execution_id
            )));
        }

        let mut registry = self.registry.lock().await;
        if let Some(id) = expected
            .iter()
            .find(|id| registry.owners.get(*id).is_some_and(|owner| owner != state_execution_id))
        {
            return Err(EngineError::invalid_request(format!(
                "Correlation id {} is already claimed by another state execution",
                id
            )));
        }

        let mut received = HashMap::new();
        for id in &expected {
            registry.retired.remove(id);
            if let Some((response, _)) = registry.early.remove(id) {
                received.insert(id.clone(), response);
            }
            registry
                .owners
                .insert(id.clone(), state_execution_id.to_string());
        }
        tracing::debug!(
            state_execution_id = %state_execution_id,
            correlation_ids = ?expected,
            already_received = received.len(),
            "Waiting for delegate responses"
        );
        let complete = received.len() == expected.len();
        registry.waiters.insert(
            state_execution_id.to_string(),
            Waiter { expected, received },
        );
        if !complete {
            return Ok(NotifyOutcome::Pending);
        }

        Ok(match registry.release(state_execution_id) {
            Some(waiter) => NotifyOutcome::Ready {
                state_execution_id: state_execution_id.to_string(),
                responses: waiter.received,
            },
            None => NotifyOutcome::Pending,
        })
    }

    /// Deliver the response for `correlation_id`.
    pub async fn notify(&self, correlation_id: &str, response: ResponseData) -> NotifyOutcome {
        let mut registry = self.registry.lock().await;
        let Some(owner) = registry.owners.get(correlation_id).cloned() else {
            if registry.retired.contains_key(correlation_id) {
                tracing::warn!(correlation_id = %correlation_id, "Response for a finished wait");
                return NotifyOutcome::Unclaimed;
            }
            tracing::debug!(correlation_id = %correlation_id, "Holding response until its id is claimed");
            registry
                .early
                .insert(correlation_id.to_string(), (response, Utc::now()));
            return NotifyOutcome::Buffered;
        };

        let complete = match registry.waiters.get_mut(&owner) {
            Some(waiter) => {
                waiter.received.insert(correlation_id.to_string(), response);
                waiter.expected.iter().all(|id| waiter.received.contains_key(id))
            }
            None => return NotifyOutcome::Unclaimed,
        };
        if !complete {
            return NotifyOutcome::Pending;
        }

        match registry.release(&owner) {
            Some(waiter) => NotifyOutcome::Ready {
                state_execution_id: owner,
                responses: waiter.received,
            },
            None => NotifyOutcome::Unclaimed,
        }
    }

    /// Drop the waiter for `state_execution_id`. Returns whether one existed.
    pub async fn cancel(&self, state_execution_id: &str) -> bool {
        self.registry.lock().await.release(state_execution_id).is_some()
    }

    /// Forget buffered responses and finished ids recorded before `cutoff`.
    /// Returns how many entries were dropped.
    pub async fn purge(&self, cutoff: DateTime<Utc>) -> usize {
        let mut registry = self.registry.lock().await;
        let before = registry.early.len() + registry.retired.len();
        registry.early.retain(|_, (_, at)| *at >= cutoff);
        registry.retired.retain(|_, at| *at >= cutoff);
        before - registry.early.len() - registry.retired.len()
    }

    /// Correlation ids still outstanding for `state_execution_id`.
    pub async fn pending_ids(&self, state_execution_id: &str) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<String> = registry
            .waiters
            .get(state_execution_id)
            .map(|w| {
                w.expected
                    .iter()
                    .filter(|id| !w.received.contains_key(*id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{CommandExecutionStatus, DelegateTaskResponse};

    fn ok() -> ResponseData {
        ResponseData::Delegate(DelegateTaskResponse::new(CommandExecutionStatus::Success))
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batch_resumes_only_when_complete() {
        let engine = WaitNotifyEngine::new();
        let registered = engine.wait_for_all("se-1", &ids(&["a", "b"])).await.unwrap();
        assert_eq!(registered, NotifyOutcome::Pending);

        assert_eq!(engine.notify("a", ok()).await, NotifyOutcome::Pending);
        assert_eq!(engine.pending_ids("se-1").await, vec!["b"]);

        match engine.notify("b", ok()).await {
            NotifyOutcome::Ready {
                state_execution_id,
                responses,
            } => {
                assert_eq!(state_execution_id, "se-1");
                assert!(responses.contains_key("a"));
                assert!(responses.contains_key("b"));
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert_eq!(engine.notify("a", ok()).await, NotifyOutcome::Unclaimed);
    }

    #[tokio::test]
    async fn test_empty_registration_is_invalid() {
        let engine = WaitNotifyEngine::new();
        let err = engine.wait_for_all("se-1", &[]).await.unwrap_err();
        assert!(err.is_contract_violation());
        let err = engine.wait_for_all("se-1", &ids(&[""])).await.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_response_before_registration_is_buffered() {
        let engine = WaitNotifyEngine::new();
        assert_eq!(engine.notify("a", ok()).await, NotifyOutcome::Buffered);

        match engine.wait_for_all("se-1", &ids(&["a"])).await.unwrap() {
            NotifyOutcome::Ready {
                state_execution_id,
                responses,
            } => {
                assert_eq!(state_execution_id, "se-1");
                assert_eq!(responses.get("a"), Some(&ok()));
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert!(engine.pending_ids("se-1").await.is_empty());
        assert_eq!(engine.notify("a", ok()).await, NotifyOutcome::Unclaimed);
    }

    #[tokio::test]
    async fn test_partially_buffered_batch_waits_for_the_rest() {
        let engine = WaitNotifyEngine::new();
        engine.notify("a", ok()).await;

        let registered = engine.wait_for_all("se-1", &ids(&["a", "b"])).await.unwrap();
        assert_eq!(registered, NotifyOutcome::Pending);
        assert_eq!(engine.pending_ids("se-1").await, vec!["b"]);
        assert!(matches!(engine.notify("b", ok()).await, NotifyOutcome::Ready { .. }));
    }

    #[tokio::test]
    async fn test_cancel_releases_ids() {
        let engine = WaitNotifyEngine::new();
        engine.wait_for_all("se-1", &ids(&["a"])).await.unwrap();
        assert!(engine.cancel("se-1").await);
        assert!(!engine.cancel("se-1").await);
        assert_eq!(engine.notify("a", ok()).await, NotifyOutcome::Unclaimed);
        engine.wait_for_all("se-2", &ids(&["a"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_drops_old_entries() {
        let engine = WaitNotifyEngine::new();
        engine.notify("early", ok()).await;
        engine.wait_for_all("se-1", &ids(&["a"])).await.unwrap();
        engine.cancel("se-1").await;

        assert_eq!(engine.purge(Utc::now() - chrono::Duration::hours(1)).await, 0);
        assert_eq!(engine.purge(Utc::now() + chrono::Duration::seconds(1)).await, 2);
        // Once purged, a late response is held again like any early one.
        assert_eq!(engine.notify("a", ok()).await, NotifyOutcome::Buffered);
    }

    #[tokio::test]
    async fn test_correlation_id_cannot_be_claimed_twice() {
        let engine = WaitNotifyEngine::new();
        engine.wait_for_all("se-1", &ids(&["a"])).await.unwrap();
        let err = engine.wait_for_all("se-2", &ids(&["a"])).await.unwrap_err();
        assert!(err.to_string().contains("already claimed"));
    }
}
