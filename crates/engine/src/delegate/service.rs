//! Delegate fabric and state execution bookkeeping interfaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::task::{DelegateTask, DelegateTaskDetails};
use crate::error::{EngineError, EngineResult};
use crate::result_ext::ResultExt;

/// Submits work to the remote execution fabric.
#[async_trait]
pub trait DelegateService: Send + Sync {
    /// Legacy submission without selection-log tracking.
    async fn queue_task(&self, task: DelegateTask) -> EngineResult<String>;

    /// Submission with selection-log tracking. Preferred for new call sites.
    async fn queue_task_v2(&self, task: DelegateTask) -> EngineResult<String>;
}

/// Records observability data against a state execution.
#[async_trait]
pub trait StateExecutionService: Send + Sync {
    async fn append_delegate_task_details(
        &self,
        state_execution_id: &str,
        details: DelegateTaskDetails,
    ) -> EngineResult<()>;
}

/// Append task details, logging and discarding any failure.
pub async fn append_delegate_task_details(
    service: &dyn StateExecutionService,
    state_execution_id: &str,
    details: DelegateTaskDetails,
) {
    let task_id = details.delegate_task_id.clone();
    let _ = service
        .append_delegate_task_details(state_execution_id, details)
        .await
        .log(format!(
            "appending delegate task {} details to state execution {}",
            task_id, state_execution_id
        ));
}

/// Queue `task` and record its details against the state execution.
/// `queue_task_v2` is used when `selection_logs` is set. Returns the
/// delegate task id.
pub async fn queue_and_record(
    delegate_service: &dyn DelegateService,
    state_execution_service: &dyn StateExecutionService,
    state_execution_id: &str,
    task: DelegateTask,
    selection_logs: bool,
) -> EngineResult<String> {
    if task.wait_id.is_empty() {
        return Err(EngineError::invalid_request(format!(
            "Delegate task {} has no wait id",
            task.task_type
        )));
    }

    let mut details = DelegateTaskDetails::for_task(String::new(), &task);
    details.selection_logs_tracking_enabled = selection_logs;
    let task_id = if selection_logs {
        delegate_service.queue_task_v2(task).await?
    } else {
        delegate_service.queue_task(task).await?
    };
    details.delegate_task_id = task_id.clone();

    tracing::info!(
        state_execution_id = %state_execution_id,
        delegate_task_id = %task_id,
        task_type = %details.task_type,
        "Delegate task queued"
    );

    append_delegate_task_details(state_execution_service, state_execution_id, details).await;
    Ok(task_id)
}

/// Selection audit entry recorded by `queue_task_v2`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionLog {
    pub task_id: String,
    pub account_id: String,
    pub message: String,
}

/// In-process delegate fabric that records every queued task.
#[derive(Default)]
pub struct InMemoryDelegateService {
    queued: Mutex<Vec<DelegateTask>>,
    selection_logs: Mutex<Vec<SelectionLog>>,
    /// Submissions to let through, then the error for the one after.
    failure: Mutex<Option<(usize, EngineError)>>,
}

impl InMemoryDelegateService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next submission fail with `error`.
    pub async fn fail_next_with(&self, error: EngineError) {
        self.fail_after(0, error).await;
    }

    /// Accept `accepted` more submissions, then fail one with `error`.
    pub async fn fail_after(&self, accepted: usize, error: EngineError) {
        *self.failure.lock().await = Some((accepted, error));
    }

    pub async fn queued_tasks(&self) -> Vec<DelegateTask> {
        self.queued.lock().await.clone()
    }

    pub async fn queued_count(&self) -> usize {
        self.queued.lock().await.len()
    }

    pub async fn selection_logs(&self) -> Vec<SelectionLog> {
        self.selection_logs.lock().await.clone()
    }

    async fn record(&self, task: DelegateTask) -> EngineResult<String> {
        {
            let mut failure = self.failure.lock().await;
            let due = match failure.as_mut() {
                Some((accepted, _)) if *accepted > 0 => {
                    *accepted -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if due {
                if let Some((_, error)) = failure.take() {
                    return Err(error);
                }
            }
        }
        let id = task.uuid.clone();
        self.queued.lock().await.push(task);
        Ok(id)
    }
}

#[async_trait]
impl DelegateService for InMemoryDelegateService {
    async fn queue_task(&self, task: DelegateTask) -> EngineResult<String> {
        self.record(task).await
    }

    async fn queue_task_v2(&self, mut task: DelegateTask) -> EngineResult<String> {
        task.selection_logs_tracking_enabled = true;
        let account_id = task.account_id.clone();
        let task_type = task.task_type.clone();
        let id = self.record(task).await?;
        self.selection_logs.lock().await.push(SelectionLog {
            task_id: id.clone(),
            account_id,
            message: format!("Task {} assigned to in-process delegate", task_type),
        });
        Ok(id)
    }
}

/// In-process task detail log keyed by state execution id.
#[derive(Default)]
pub struct InMemoryStateExecutionService {
    details: Mutex<HashMap<String, Vec<DelegateTaskDetails>>>,
    failing: AtomicBool,
}

impl InMemoryStateExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn details_for(&self, state_execution_id: &str) -> Vec<DelegateTaskDetails> {
        self.details
            .lock()
            .await
            .get(state_execution_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateExecutionService for InMemoryStateExecutionService {
    async fn append_delegate_task_details(
        &self,
        state_execution_id: &str,
        details: DelegateTaskDetails,
    ) -> EngineResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Persistence(
                "State execution store is unavailable".to_string(),
            ));
        }
        self.details
            .lock()
            .await
            .entry(state_execution_id.to_string())
            .or_default()
            .push(details);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DelegateTask {
        DelegateTask::builder("acc-1", "AWS_AMI_ASYNC_TASK")
            .wait_id("act-1")
            .build()
    }

    #[tokio::test]
    async fn test_queue_task_v2_enables_selection_logs() {
        let delegates = InMemoryDelegateService::new();
        let id = delegates.queue_task_v2(task()).await.unwrap();
        let queued = delegates.queued_tasks().await;
        assert_eq!(queued.len(), 1);
        assert!(queued[0].selection_logs_tracking_enabled);
        assert_eq!(delegates.selection_logs().await[0].task_id, id);
    }

    #[tokio::test]
    async fn test_fail_after_lets_earlier_submissions_through() {
        let delegates = InMemoryDelegateService::new();
        delegates
            .fail_after(1, EngineError::Delegate("fabric offline".to_string()))
            .await;
        assert!(delegates.queue_task(task()).await.is_ok());
        assert!(matches!(delegates.queue_task(task()).await, Err(EngineError::Delegate(_))));
        assert!(delegates.queue_task(task()).await.is_ok());
        assert_eq!(delegates.queued_count().await, 2);
    }

    #[tokio::test]
    async fn test_queue_task_legacy_has_no_selection_logs() {
        let delegates = InMemoryDelegateService::new();
        delegates.queue_task(task()).await.unwrap();
        assert!(!delegates.queued_tasks().await[0].selection_logs_tracking_enabled);
        assert!(delegates.selection_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_and_record_swallows_detail_failures() {
        let delegates = InMemoryDelegateService::new();
        let executions = InMemoryStateExecutionService::new();
        executions.set_failing(true);

        let id = queue_and_record(&delegates, &executions, "se-1", task(), true)
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert!(executions.details_for("se-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_and_record_appends_details() {
        let delegates = InMemoryDelegateService::new();
        let executions = InMemoryStateExecutionService::new();
        let id = queue_and_record(&delegates, &executions, "se-1", task(), true)
            .await
            .unwrap();
        let details = executions.details_for("se-1").await;
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].delegate_task_id, id);
    }

    #[tokio::test]
    async fn test_task_without_wait_id_is_contract_violation() {
        let delegates = InMemoryDelegateService::new();
        let executions = InMemoryStateExecutionService::new();
        let unwired = DelegateTask::builder("acc-1", "ECS_COMMAND_TASK").build();
        let err = queue_and_record(&delegates, &executions, "se-1", unwired, true)
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(delegates.queued_count().await, 0);
    }

    #[tokio::test]
    async fn test_submission_failure_propagates() {
        let delegates = InMemoryDelegateService::new();
        let executions = InMemoryStateExecutionService::new();
        delegates
            .fail_next_with(EngineError::Delegate("no eligible delegates".to_string()))
            .await;
        let err = queue_and_record(&delegates, &executions, "se-1", task(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Delegate(_)));
    }
}
