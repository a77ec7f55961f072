//! The verdict a state returns to the executor.

use std::collections::BTreeSet;

use crate::context::ContextElement;
use crate::state::{ExecutionStatus, FailureType};

/// Result of `execute` or `handle_async_response`.
///
/// An asynchronous response must carry the correlation ids the executor
/// will wait on; a synchronous response carries a terminal status.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResponse {
    pub execution_status: ExecutionStatus,
    pub is_async: bool,
    pub correlation_ids: Vec<String>,
    pub error_message: Option<String>,
    /// Elements pushed onto the phase context once the response is accepted.
    pub context_elements: Vec<ContextElement>,
    /// Free-form per-state data (delegate meta info, task parameters).
    pub state_execution_data: Option<serde_json::Value>,
    pub failure_types: BTreeSet<FailureType>,
    pub delegate_task_id: Option<String>,
}

impl ExecutionResponse {
    pub fn builder() -> ExecutionResponseBuilder {
        ExecutionResponseBuilder::default()
    }

    pub fn success() -> Self {
        Self::builder().status(ExecutionStatus::Success).build()
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::builder()
            .status(ExecutionStatus::Failed)
            .error_message(message)
            .build()
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::builder()
            .status(ExecutionStatus::Skipped)
            .error_message(message)
            .build()
    }

    /// Suspend the state until every id in `correlation_ids` has a response.
    pub fn async_on(correlation_ids: Vec<String>) -> Self {
        Self::builder()
            .status(ExecutionStatus::Running)
            .is_async(true)
            .correlation_ids(correlation_ids)
            .build()
    }

    pub fn has_failure_type(&self, failure_type: FailureType) -> bool {
        self.failure_types.contains(&failure_type)
    }
}

/// Response for a state whose skip condition evaluated true.
pub fn skip_state_execution_response(skip_condition: &str) -> ExecutionResponse {
    ExecutionResponse::skipped(format!("Skip condition: {}", skip_condition))
}

/// Builder for [`ExecutionResponse`].
#[derive(Debug, Default)]
pub struct ExecutionResponseBuilder {
    inner: ExecutionResponse,
}

impl ExecutionResponseBuilder {
    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.inner.execution_status = status;
        self
    }

    pub fn is_async(mut self, is_async: bool) -> Self {
        self.inner.is_async = is_async;
        self
    }

    pub fn correlation_ids(mut self, ids: Vec<String>) -> Self {
        self.inner.correlation_ids = ids;
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.inner.correlation_ids.push(id.into());
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.inner.error_message = Some(message.into());
        self
    }

    pub fn context_element(mut self, element: ContextElement) -> Self {
        self.inner.context_elements.push(element);
        self
    }

    pub fn state_execution_data(mut self, data: serde_json::Value) -> Self {
        self.inner.state_execution_data = Some(data);
        self
    }

    pub fn failure_type(mut self, failure_type: FailureType) -> Self {
        self.inner.failure_types.insert(failure_type);
        self
    }

    pub fn failure_types(mut self, types: impl IntoIterator<Item = FailureType>) -> Self {
        self.inner.failure_types.extend(types);
        self
    }

    pub fn delegate_task_id(mut self, id: impl Into<String>) -> Self {
        self.inner.delegate_task_id = Some(id.into());
        self
    }

    pub fn build(self) -> ExecutionResponse {
        self.inner
    }
}
