//! Plumbing shared by every provider family: metadata lookups, sweeping
//! outputs, activity bookkeeping and delegate dispatch.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use conveyor_engine::collaborators::{
    Activity, EngineServices, FeatureName, InfrastructureMapping, SettingAttribute,
};
use conveyor_engine::context::ExecutionContext;
use conveyor_engine::delegate::{queue_and_record, DelegateTaskBuilder, ResponseData, SetupAbstractions};
use conveyor_engine::failure::classify_delegate_response;
use conveyor_engine::result_ext::{OptionResultExt, ResultExt};
use conveyor_engine::state::{require_response, AsyncResponses, ExecutionResponse, ExecutionStatus};
use conveyor_engine::sweeping::{find_sweeping_output, SweepingOutputScope};
use conveyor_engine::{EngineError, EngineResult};

/// Message of a rollback state that finds nothing to undo.
pub const NO_ROLLBACK_CONTEXT: &str = "No context found for rollback. Skipping.";

/// A queued delegate task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Activity id, also the correlation id.
    pub activity_id: String,
    pub delegate_task_id: String,
}

/// Classified outcome of a resumed state.
#[derive(Debug)]
pub struct Completion<'a> {
    pub response: ExecutionResponse,
    /// Raw delegate results in dispatch order.
    pub results: Vec<&'a ResponseData>,
}

pub struct StateHelper {
    services: EngineServices,
    /// Activity ids dispatched per state execution.
    in_flight: Mutex<HashMap<String, Vec<String>>>,
}

impl StateHelper {
    pub fn new(services: EngineServices) -> Self {
        Self {
            services,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Infrastructure mapping of the current phase.
    pub async fn infrastructure_mapping(&self, ctx: &ExecutionContext) -> EngineResult<InfrastructureMapping> {
        let id = ctx
            .phase_element()
            .and_then(|p| p.infra_mapping_id.clone())
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "State '{}' runs in a phase without an infrastructure mapping",
                    ctx.state_name()
                ))
            })?;
        self.services
            .metadata_service
            .infrastructure_mapping(ctx.app_id(), &id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("No infrastructure mapping with id: {} found", id)))
    }

    pub async fn aws_setting(&self, id: &str) -> EngineResult<SettingAttribute> {
        self.services
            .metadata_service
            .setting(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("No Aws setting with id: {} found", id)))
    }

    pub fn setup_abstractions(&self, ctx: &ExecutionContext) -> SetupAbstractions {
        let params = ctx.standard_params();
        SetupAbstractions {
            app_id: ctx.app_id().to_string(),
            env_id: ctx.env_id().map(str::to_string),
            env_type: params.map(|p| p.env_type.clone()).filter(|t| !t.is_empty()),
            infrastructure_mapping_id: ctx.phase_element().and_then(|p| p.infra_mapping_id.clone()),
            service_id: ctx.service_element().map(|s| s.uuid.clone()),
        }
    }

    /// Save `value` as a workflow-scoped sweeping output.
    pub async fn save_output<T: Serialize>(&self, ctx: &ExecutionContext, name: &str, value: &T) -> EngineResult<()> {
        let instance = ctx
            .prepare_sweeping_output_builder(SweepingOutputScope::Workflow)
            .name(name)
            .value_of(value)?
            .build()?;
        self.services.sweeping_output_service.save(instance).await?;
        Ok(())
    }

    pub async fn find_output<T: DeserializeOwned>(&self, ctx: &ExecutionContext, name: &str) -> EngineResult<Option<T>> {
        let inquiry = ctx.prepare_sweeping_output_inquiry().name(name);
        find_sweeping_output(self.services.sweeping_output_service.as_ref(), &inquiry).await
    }

    /// Every workflow-scoped output whose name starts with `prefix`, oldest first.
    pub async fn find_outputs_with_prefix<T: DeserializeOwned>(
        &self,
        ctx: &ExecutionContext,
        prefix: &str,
    ) -> EngineResult<Vec<T>> {
        let inquiry = ctx.prepare_sweeping_output_inquiry().name(prefix);
        self.services
            .sweeping_output_service
            .find_many_with_name_prefix(&inquiry, SweepingOutputScope::Workflow)
            .await?
            .iter()
            .map(|instance| instance.value_as())
            .collect()
    }

    /// Create a running activity, queue `task` against it and remember it
    /// for resume and abort.
    pub async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        command_name: &str,
        command_type: &str,
        task: DelegateTaskBuilder,
    ) -> EngineResult<Dispatched> {
        let activity = Activity::running(
            ctx.app_id(),
            ctx.workflow_execution_id(),
            ctx.state_execution_instance_id(),
            command_name,
            command_type,
        )
        .with_env_id(ctx.env_id().map(str::to_string));
        let activity = self.services.activity_service.save(activity).await?;

        let selection_logs = self
            .services
            .feature_flag_service
            .is_enabled(FeatureName::DelegateSelectionLogs, ctx.account_id())
            .await;
        let task = task
            .wait_id(&activity.uuid)
            .setup_abstractions(self.setup_abstractions(ctx))
            .selection_logs_tracking_enabled(selection_logs)
            .build();

        let queued = queue_and_record(
            self.services.delegate_service.as_ref(),
            self.services.state_execution_service.as_ref(),
            ctx.state_execution_instance_id(),
            task,
            selection_logs,
        )
        .await;
        let delegate_task_id = match queued {
            Ok(id) => id,
            Err(e) => {
                self.set_activity_status(ctx, &activity.uuid, ExecutionStatus::Failed)
                    .await;
                return Err(e);
            }
        };

        info!(
            state = %ctx.state_name(),
            activity_id = %activity.uuid,
            delegate_task_id = %delegate_task_id,
            "Dispatched {}",
            command_name
        );

        self.in_flight
            .lock()
            .await
            .entry(ctx.state_execution_instance_id().to_string())
            .or_default()
            .push(activity.uuid.clone());

        Ok(Dispatched {
            activity_id: activity.uuid,
            delegate_task_id,
        })
    }

    /// Classify every response the state waited for and close its
    /// activities. The first non-positive result wins.
    pub async fn complete<'a>(
        &self,
        ctx: &ExecutionContext,
        responses: &'a AsyncResponses,
        task_type: &str,
    ) -> EngineResult<Completion<'a>> {
        let activity_ids = self.take_in_flight(ctx).await.ok_or_else(|| {
            EngineError::invalid_request(format!(
                "No dispatched activity recorded for state execution {}",
                ctx.state_execution_instance_id()
            ))
        })?;

        let results = activity_ids
            .iter()
            .map(|id| require_response(responses, id))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut outcome: Option<ExecutionResponse> = None;
        for (activity_id, result) in activity_ids.iter().zip(&results) {
            let classified = classify_delegate_response(result, task_type);
            self.set_activity_status(ctx, activity_id, classified.execution_status)
                .await;
            let keep = match &outcome {
                None => true,
                Some(current) => {
                    current.execution_status.is_positive() && !classified.execution_status.is_positive()
                }
            };
            if keep {
                outcome = Some(classified);
            }
        }

        let response = outcome.ok_or_else(|| {
            EngineError::invalid_request(format!(
                "State execution {} dispatched no tasks",
                ctx.state_execution_instance_id()
            ))
        })?;
        Ok(Completion { response, results })
    }

    /// Fail the activities of an abandoned state execution.
    pub async fn abort(&self, ctx: &ExecutionContext) {
        let activity_ids = self
            .take_in_flight(ctx)
            .await
            .log_none(format!(
                "aborting state execution {} with nothing in flight",
                ctx.state_execution_instance_id()
            ))
            .unwrap_or_default();
        self.fail_activities(ctx, &activity_ids).await;
    }

    /// Fail and forget whatever this state execution queued so far, after a
    /// later dispatch of the same batch failed.
    pub async fn abandon(&self, ctx: &ExecutionContext) {
        let activity_ids = self.take_in_flight(ctx).await.unwrap_or_default();
        self.fail_activities(ctx, &activity_ids).await;
    }

    async fn take_in_flight(&self, ctx: &ExecutionContext) -> Option<Vec<String>> {
        self.in_flight
            .lock()
            .await
            .remove(ctx.state_execution_instance_id())
    }

    async fn fail_activities(&self, ctx: &ExecutionContext, activity_ids: &[String]) {
        for activity_id in activity_ids {
            warn!(state = %ctx.state_name(), activity_id = %activity_id, "Failing activity");
            self.set_activity_status(ctx, activity_id, ExecutionStatus::Failed)
                .await;
        }
    }

    async fn set_activity_status(&self, ctx: &ExecutionContext, activity_id: &str, status: ExecutionStatus) {
        self.services
            .activity_service
            .update_status(activity_id, ctx.app_id(), status)
            .await
            .log_and_discard(format!("updating activity {} to {}", activity_id, status));
    }
}

/// Async response waiting on every dispatched command.
pub fn waiting_on(dispatched: &[Dispatched], data: Value) -> ExecutionResponse {
    let mut builder = ExecutionResponse::builder()
        .status(ExecutionStatus::Running)
        .is_async(true)
        .correlation_ids(dispatched.iter().map(|d| d.activity_id.clone()).collect())
        .state_execution_data(data);
    if let Some(first) = dispatched.first() {
        builder = builder.delegate_task_id(first.delegate_task_id.clone());
    }
    builder.build()
}
