//! Mapping delegate results and errors onto execution responses.

use serde_json::json;

use crate::delegate::{CommandExecutionStatus, DelegateTaskResponse, ResponseData};
use crate::error::{EngineError, EngineResult};
use crate::state::{ExecutionResponse, ExecutionStatus, FailureType};

/// Classify one delegate result for a task of `task_type`.
///
/// Remote failures keep the delegate's message; a `timeout_failure` flag
/// tags the response with [`FailureType::Timeout`].
pub fn classify_delegate_response(response: &ResponseData, task_type: &str) -> ExecutionResponse {
    let delegate = match response {
        ResponseData::Delegate(delegate) => delegate,
        ResponseData::ErrorNotify(notify) => {
            return ExecutionResponse::builder()
                .status(ExecutionStatus::Failed)
                .error_message(notify.error_message.clone())
                .failure_type(FailureType::DelegateProvisioning)
                .build();
        }
    };

    let data = state_execution_data(delegate);

    if delegate.timeout_failure {
        return ExecutionResponse::builder()
            .status(ExecutionStatus::Failed)
            .error_message(
                remote_message(delegate)
                    .unwrap_or_else(|| format!("Timed out waiting for {} to complete", task_type)),
            )
            .failure_type(FailureType::Timeout)
            .state_execution_data(data)
            .build();
    }

    match delegate.command_execution_status {
        CommandExecutionStatus::Success => ExecutionResponse::builder()
            .status(ExecutionStatus::Success)
            .state_execution_data(data)
            .build(),
        CommandExecutionStatus::Skipped => ExecutionResponse::builder()
            .status(ExecutionStatus::Skipped)
            .error_message(
                remote_message(delegate).unwrap_or_else(|| format!("{} was skipped by the delegate", task_type)),
            )
            .state_execution_data(data)
            .build(),
        CommandExecutionStatus::Failure => ExecutionResponse::builder()
            .status(ExecutionStatus::Failed)
            .error_message(
                remote_message(delegate).unwrap_or_else(|| format!("{} failed on the delegate", task_type)),
            )
            .failure_type(FailureType::ApplicationError)
            .state_execution_data(data)
            .build(),
        status @ (CommandExecutionStatus::Running | CommandExecutionStatus::Queued) => {
            ExecutionResponse::builder()
                .status(ExecutionStatus::Failed)
                .error_message(format!(
                    "{} reported non-terminal status {} as its result",
                    task_type, status
                ))
                .failure_type(FailureType::ApplicationError)
                .state_execution_data(data)
                .build()
        }
    }
}

/// Translate a business-domain error into a `FAILED` response. Contract
/// violations are handed back as `Err`.
pub fn failure_response_from_error(err: EngineError) -> EngineResult<ExecutionResponse> {
    if err.is_contract_violation() {
        return Err(err);
    }
    tracing::warn!(error = %err, "State failed with business error");
    Ok(ExecutionResponse::builder()
        .status(ExecutionStatus::Failed)
        .error_message(err.to_string())
        .failure_types(err.failure_types())
        .build())
}

fn remote_message(delegate: &DelegateTaskResponse) -> Option<String> {
    delegate
        .error_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

fn state_execution_data(delegate: &DelegateTaskResponse) -> serde_json::Value {
    json!({
        "commandExecutionStatus": delegate.command_execution_status,
        "delegateMetaInfo": delegate.delegate_meta_info,
        "output": delegate.output,
    })
}
