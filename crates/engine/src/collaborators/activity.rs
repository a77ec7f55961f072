//! Activity audit log.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::state::ExecutionStatus;

/// Audit record of one command run. Its id doubles as the correlation id
/// of the delegate task carrying the command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub uuid: String,
    pub app_id: String,
    pub env_id: Option<String>,
    pub workflow_execution_id: String,
    pub state_execution_instance_id: String,
    pub command_name: String,
    pub command_type: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// A running activity with no id assigned yet.
    pub fn running(
        app_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
        state_execution_instance_id: impl Into<String>,
        command_name: impl Into<String>,
        command_type: impl Into<String>,
    ) -> Self {
        Self {
            uuid: String::new(),
            app_id: app_id.into(),
            env_id: None,
            workflow_execution_id: workflow_execution_id.into(),
            state_execution_instance_id: state_execution_instance_id.into(),
            command_name: command_name.into(),
            command_type: command_type.into(),
            status: ExecutionStatus::Running,
            created_at: Utc::now(),
        }
    }

    pub fn with_env_id(mut self, env_id: Option<String>) -> Self {
        self.env_id = env_id;
        self
    }
}

#[async_trait]
pub trait ActivityService: Send + Sync {
    /// Persist `activity`, assigning an id when it has none.
    async fn save(&self, activity: Activity) -> EngineResult<Activity>;

    async fn update_status(&self, activity_id: &str, app_id: &str, status: ExecutionStatus) -> EngineResult<()>;
}

#[derive(Default)]
pub struct InMemoryActivityService {
    activities: Mutex<HashMap<String, Activity>>,
}

impl InMemoryActivityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, activity_id: &str) -> Option<Activity> {
        self.activities.lock().await.get(activity_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.activities.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.activities.lock().await.is_empty()
    }
}

#[async_trait]
impl ActivityService for InMemoryActivityService {
    async fn save(&self, mut activity: Activity) -> EngineResult<Activity> {
        if activity.uuid.is_empty() {
            activity.uuid = Uuid::new_v4().to_string();
        }
        self.activities
            .lock()
            .await
            .insert(activity.uuid.clone(), activity.clone());
        Ok(activity)
    }

    async fn update_status(&self, activity_id: &str, app_id: &str, status: ExecutionStatus) -> EngineResult<()> {
        let mut activities = self.activities.lock().await;
        let activity = activities
            .get_mut(activity_id)
            .filter(|a| a.app_id == app_id)
            .ok_or_else(|| EngineError::NotFound(format!("No activity with id: {} found", activity_id)))?;
        activity.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_assigns_id_and_updates_status() {
        let service = InMemoryActivityService::new();
        let saved = service
            .save(Activity::running("app-1", "wf-1", "se-1", "AMI Service Setup", "AMI"))
            .await
            .unwrap();
        assert!(!saved.uuid.is_empty());
        assert_eq!(saved.status, ExecutionStatus::Running);

        service
            .update_status(&saved.uuid, "app-1", ExecutionStatus::Failed)
            .await
            .unwrap();
        assert_eq!(service.get(&saved.uuid).await.unwrap().status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_update_unknown_activity() {
        let service = InMemoryActivityService::new();
        let err = service
            .update_status("missing", "app-1", ExecutionStatus::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No activity with id: missing found");
    }
}
