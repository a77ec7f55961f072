//! Execution status and failure type tags.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a state execution or a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    New,
    Starting,
    Running,
    Success,
    Failed,
    Error,
    Skipped,
    Aborted,
    Expired,
}

impl ExecutionStatus {
    /// Terminal statuses never transition again.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Failed
                | Self::Error
                | Self::Skipped
                | Self::Aborted
                | Self::Expired
        )
    }

    /// Outcomes that let the workflow advance.
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Outcomes that trigger failure strategy evaluation.
    pub fn is_broke(&self) -> bool {
        matches!(self, Self::Failed | Self::Error | Self::Expired)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Error => write!(f, "ERROR"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Tag attached to a failed response so retry and alerting policy can
/// distinguish kinds of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Timeout,
    Expired,
    ApplicationError,
    Connectivity,
    Authentication,
    Authorization,
    DelegateProvisioning,
    Verification,
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::ApplicationError => write!(f, "APPLICATION_ERROR"),
            Self::Connectivity => write!(f, "CONNECTIVITY"),
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::Authorization => write!(f, "AUTHORIZATION"),
            Self::DelegateProvisioning => write!(f, "DELEGATE_PROVISIONING"),
            Self::Verification => write!(f, "VERIFICATION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ExecutionStatus::Skipped.is_final());
        assert!(ExecutionStatus::Skipped.is_positive());
        assert!(!ExecutionStatus::Skipped.is_broke());
        assert!(ExecutionStatus::Expired.is_broke());
        assert!(!ExecutionStatus::Running.is_final());
        assert!(!ExecutionStatus::Aborted.is_broke());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Skipped).unwrap();
        assert_eq!(json, "\"SKIPPED\"");
        let ft: FailureType = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(ft, FailureType::Timeout);
        assert_eq!(FailureType::DelegateProvisioning.to_string(), "DELEGATE_PROVISIONING");
    }
}
