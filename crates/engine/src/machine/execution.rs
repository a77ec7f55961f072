//! Snapshots of workflow and state executions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ExecutionStatus, FailureType};

/// Suspension stage of a state execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatePhase {
    /// `execute` is running or returned synchronously.
    Executing,
    /// Waiting for every listed correlation id.
    Dispatched {
        #[serde(rename = "correlationIds")]
        correlation_ids: Vec<String>,
    },
    /// `handle_async_response` has been invoked.
    Resumed,
}

/// One run of one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateExecutionInstance {
    pub uuid: String,
    pub state_name: String,
    pub state_type: String,
    pub phase_name: Option<String>,
    pub rollback: bool,
    pub status: ExecutionStatus,
    pub phase: StatePhase,
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub failure_types: BTreeSet<FailureType>,
    pub state_execution_data: Option<serde_json::Value>,
    pub delegate_task_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StateExecutionInstance {
    pub fn correlation_ids(&self) -> &[String] {
        match &self.phase {
            StatePhase::Dispatched { correlation_ids } => correlation_ids,
            _ => &[],
        }
    }
}

/// A running or finished workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_name: String,
    pub app_id: String,
    pub account_id: String,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub rollback_triggered: bool,
    pub state_executions: Vec<StateExecutionInstance>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Latest run of the state named `name`.
    pub fn state_execution(&self, name: &str) -> Option<&StateExecutionInstance> {
        self.state_executions.iter().rev().find(|s| s.state_name == name)
    }

    /// Every run of the state named `name`, oldest first.
    pub fn state_executions_named(&self, name: &str) -> Vec<&StateExecutionInstance> {
        self.state_executions
            .iter()
            .filter(|s| s.state_name == name)
            .collect()
    }
}
