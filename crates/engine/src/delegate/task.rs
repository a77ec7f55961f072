//! Units of remote work submitted to the delegate fabric.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default budget for an async delegate call, in milliseconds.
pub const DEFAULT_ASYNC_CALL_TIMEOUT: u64 = 10 * 60 * 1000;

/// Routing and audit metadata for a delegate task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupAbstractions {
    pub app_id: String,
    pub env_id: Option<String>,
    pub env_type: Option<String>,
    pub infrastructure_mapping_id: Option<String>,
    pub service_id: Option<String>,
}

/// A task dispatched to a remote delegate.
///
/// `wait_id` is the correlation id the dispatching state waits on; it must
/// appear among the state's async response correlation ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateTask {
    pub uuid: String,
    pub account_id: String,
    pub task_type: String,
    pub parameters: serde_json::Value,
    pub timeout_millis: u64,
    pub is_async: bool,
    #[serde(default)]
    pub selectors: Vec<String>,
    pub setup_abstractions: SetupAbstractions,
    pub wait_id: String,
    pub description: Option<String>,
    #[serde(default)]
    pub selection_logs_tracking_enabled: bool,
}

impl DelegateTask {
    pub fn builder(account_id: impl Into<String>, task_type: impl Into<String>) -> DelegateTaskBuilder {
        DelegateTaskBuilder {
            task: DelegateTask {
                uuid: Uuid::new_v4().to_string(),
                account_id: account_id.into(),
                task_type: task_type.into(),
                parameters: serde_json::Value::Null,
                timeout_millis: DEFAULT_ASYNC_CALL_TIMEOUT,
                is_async: true,
                selectors: Vec::new(),
                setup_abstractions: SetupAbstractions::default(),
                wait_id: String::new(),
                description: None,
                selection_logs_tracking_enabled: false,
            },
        }
    }

    /// Human-readable description, defaulting to the task type.
    pub fn calc_description(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!("{} task", self.task_type),
        }
    }
}

pub struct DelegateTaskBuilder {
    task: DelegateTask,
}

impl DelegateTaskBuilder {
    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.task.parameters = parameters;
        self
    }

    pub fn timeout_millis(mut self, timeout: u64) -> Self {
        self.task.timeout_millis = timeout;
        self
    }

    pub fn is_async(mut self, is_async: bool) -> Self {
        self.task.is_async = is_async;
        self
    }

    pub fn selectors(mut self, selectors: Vec<String>) -> Self {
        self.task.selectors = selectors;
        self
    }

    pub fn setup_abstractions(mut self, abstractions: SetupAbstractions) -> Self {
        self.task.setup_abstractions = abstractions;
        self
    }

    pub fn wait_id(mut self, wait_id: impl Into<String>) -> Self {
        self.task.wait_id = wait_id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.task.description = Some(description.into());
        self
    }

    pub fn selection_logs_tracking_enabled(mut self, enabled: bool) -> Self {
        self.task.selection_logs_tracking_enabled = enabled;
        self
    }

    pub fn build(self) -> DelegateTask {
        self.task
    }
}

/// Observability record appended to a state execution per dispatched task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateTaskDetails {
    pub delegate_task_id: String,
    pub task_type: String,
    pub task_description: String,
    pub selection_logs_tracking_enabled: bool,
    pub setup_abstractions: SetupAbstractions,
}

impl DelegateTaskDetails {
    pub fn for_task(delegate_task_id: impl Into<String>, task: &DelegateTask) -> Self {
        Self {
            delegate_task_id: delegate_task_id.into(),
            task_type: task.task_type.clone(),
            task_description: task.calc_description(),
            selection_logs_tracking_enabled: task.selection_logs_tracking_enabled,
            setup_abstractions: task.setup_abstractions.clone(),
        }
    }
}
