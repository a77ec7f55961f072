//! NATS JetStream transport for delegate tasks.
//!
//! Tasks are published as [`DelegateTaskNotification`]s on the task
//! subject. Delegates report back on the response subject with a
//! [`DelegateResponseEnvelope`] keyed by the task's wait id.

use std::sync::Arc;

use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::response::ResponseData;
use super::service::DelegateService;
use super::task::DelegateTask;
use crate::error::{EngineError, EngineResult};

/// Default NATS subject for delegate task notifications.
pub const DEFAULT_TASK_SUBJECT: &str = "conveyor.delegate.tasks";

/// Default NATS subject delegates report results on.
pub const DEFAULT_RESPONSE_SUBJECT: &str = "conveyor.delegate.responses";

/// Default JetStream stream name.
pub const DEFAULT_STREAM: &str = "conveyor_delegate_tasks";

/// Message published for every queued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateTaskNotification {
    pub task_id: String,
    /// Protocol version; `2` requests selection-log tracking.
    pub version: u8,
    pub task: DelegateTask,
}

/// Result message published by a delegate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateResponseEnvelope {
    pub correlation_id: String,
    pub response: ResponseData,
}

impl DelegateResponseEnvelope {
    pub fn decode(payload: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Delegate service publishing tasks to JetStream.
#[derive(Clone)]
pub struct NatsDelegateService {
    js: Context,
    subject: String,
}

impl NatsDelegateService {
    /// Create a service from a connected client, creating the stream if needed.
    pub async fn new(
        client: Arc<async_nats::Client>,
        subject: Option<&str>,
        stream_name: Option<&str>,
    ) -> EngineResult<Self> {
        let subject = subject.unwrap_or(DEFAULT_TASK_SUBJECT).to_string();
        let stream = stream_name.unwrap_or(DEFAULT_STREAM);

        let js = jetstream::new((*client).clone());
        Self::ensure_stream(&js, stream, &subject).await?;

        Ok(Self { js, subject })
    }

    async fn ensure_stream(js: &Context, stream: &str, subject: &str) -> EngineResult<()> {
        match js.get_stream(stream).await {
            Ok(_) => {
                tracing::debug!(stream = %stream, "Using existing NATS stream");
                Ok(())
            }
            Err(_) => {
                let config = jetstream::stream::Config {
                    name: stream.to_string(),
                    subjects: vec![subject.to_string()],
                    max_age: std::time::Duration::from_secs(24 * 3600),
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                };

                js.create_stream(config)
                    .await
                    .map_err(|e| EngineError::Nats(e.to_string()))?;

                tracing::info!(stream = %stream, subject = %subject, "Created NATS stream");
                Ok(())
            }
        }
    }

    async fn publish(&self, notification: DelegateTaskNotification) -> EngineResult<String> {
        let payload = serde_json::to_vec(&notification)?;

        self.js
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| EngineError::Delegate(e.to_string()))?
            .await
            .map_err(|e| EngineError::Delegate(e.to_string()))?;

        tracing::debug!(
            task_id = %notification.task_id,
            task_type = %notification.task.task_type,
            wait_id = %notification.task.wait_id,
            version = notification.version,
            "Published delegate task"
        );

        Ok(notification.task_id)
    }
}

#[async_trait]
impl DelegateService for NatsDelegateService {
    async fn queue_task(&self, task: DelegateTask) -> EngineResult<String> {
        self.publish(DelegateTaskNotification {
            task_id: task.uuid.clone(),
            version: 1,
            task,
        })
        .await
    }

    async fn queue_task_v2(&self, mut task: DelegateTask) -> EngineResult<String> {
        task.selection_logs_tracking_enabled = true;
        self.publish(DelegateTaskNotification {
            task_id: task.uuid.clone(),
            version: 2,
            task,
        })
        .await
    }
}

/// Subscribe to delegate results, yielding decoded envelopes. Messages
/// that fail to decode are logged and skipped.
pub async fn subscribe_responses(
    client: &async_nats::Client,
    subject: Option<&str>,
) -> EngineResult<impl Stream<Item = DelegateResponseEnvelope>> {
    let subject = subject.unwrap_or(DEFAULT_RESPONSE_SUBJECT).to_string();
    let subscriber = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| EngineError::Nats(e.to_string()))?;

    tracing::info!(subject = %subject, "Subscribed to delegate responses");

    Ok(subscriber.filter_map(|message| async move {
        match DelegateResponseEnvelope::decode(&message.payload) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(subject = %message.subject, error = %e, "Discarding undecodable delegate response");
                None
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{CommandExecutionStatus, DelegateTaskResponse};

    #[test]
    fn test_notification_serialization() {
        let task = DelegateTask::builder("acc-1", "ECS_COMMAND_TASK")
            .wait_id("act-7")
            .build();
        let notification = DelegateTaskNotification {
            task_id: task.uuid.clone(),
            version: 2,
            task,
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(json["task"]["waitId"], "act-7");
        assert_eq!(json["task"]["taskType"], "ECS_COMMAND_TASK");
    }

    #[test]
    fn test_envelope_decode() {
        let envelope = DelegateResponseEnvelope {
            correlation_id: "act-7".to_string(),
            response: ResponseData::Delegate(DelegateTaskResponse::new(CommandExecutionStatus::Success)),
        };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert_eq!(DelegateResponseEnvelope::decode(&bytes).unwrap(), envelope);
        assert!(DelegateResponseEnvelope::decode(b"not json").is_err());
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_TASK_SUBJECT, "conveyor.delegate.tasks");
        assert_eq!(DEFAULT_STREAM, "conveyor_delegate_tasks");
    }
}
