//! Results delivered back from the delegate fabric.

use serde::{Deserialize, Serialize};

/// Outcome reported by the delegate for a command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandExecutionStatus {
    Success,
    Failure,
    Running,
    Queued,
    Skipped,
}

impl std::fmt::Display for CommandExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Queued => write!(f, "QUEUED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Identity of the delegate that ran a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateMetaInfo {
    pub id: String,
    pub host_name: String,
}

/// A delegate's report for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateTaskResponse {
    pub command_execution_status: CommandExecutionStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub timeout_failure: bool,
    #[serde(default)]
    pub output: serde_json::Value,
    pub delegate_meta_info: Option<DelegateMetaInfo>,
}

impl DelegateTaskResponse {
    pub fn new(status: CommandExecutionStatus) -> Self {
        Self {
            command_execution_status: status,
            error_message: None,
            timeout_failure: false,
            output: serde_json::Value::Null,
            delegate_meta_info: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(CommandExecutionStatus::Failure)
        }
    }

    pub fn with_timeout_failure(mut self, timeout: bool) -> Self {
        self.timeout_failure = timeout;
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_meta_info(mut self, meta: DelegateMetaInfo) -> Self {
        self.delegate_meta_info = Some(meta);
        self
    }
}

/// Fabric-level failure in place of a task response (no delegate
/// available, task expired before pickup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotifyResponse {
    pub error_message: String,
}

/// What a waiting state receives for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseData {
    Delegate(DelegateTaskResponse),
    ErrorNotify(ErrorNotifyResponse),
}

impl ResponseData {
    pub fn error_notify(message: impl Into<String>) -> Self {
        Self::ErrorNotify(ErrorNotifyResponse {
            error_message: message.into(),
        })
    }

    pub fn is_error_notify(&self) -> bool {
        matches!(self, Self::ErrorNotify(_))
    }

    pub fn as_delegate(&self) -> Option<&DelegateTaskResponse> {
        match self {
            Self::Delegate(response) => Some(response),
            Self::ErrorNotify(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_data_tagging() {
        let data = ResponseData::Delegate(
            DelegateTaskResponse::failure("boom").with_timeout_failure(true),
        );
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "DELEGATE");
        assert_eq!(json["timeoutFailure"], true);
        assert_eq!(json["commandExecutionStatus"], "FAILURE");

        let back: ResponseData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_error_notify() {
        let data = ResponseData::error_notify("No eligible delegates");
        assert!(data.is_error_notify());
        assert!(data.as_delegate().is_none());
    }
}
