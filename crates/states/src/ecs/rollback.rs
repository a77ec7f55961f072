//! ECS service rollback.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use conveyor_engine::context::ExecutionContext;
use conveyor_engine::failure::failure_response_from_error;
use conveyor_engine::state::{resolve_timeout_millis, AsyncResponses, ExecutionResponse, State};
use conveyor_engine::EngineResult;

use super::elements::{
    EcsServiceDeployElement, EcsServiceSetupElement, ECS_DEPLOY_OUTPUT_NAME, ECS_SETUP_OUTPUT_NAME,
};
use super::helper::{EcsStateHelper, ECS_TASK_TYPE};
use crate::helper::{waiting_on, NO_ROLLBACK_CONTEXT};

pub const ECS_SERVICE_ROLLBACK: &str = "ECS_SERVICE_ROLLBACK";

pub const NO_SETUP_FOR_ROLLBACK: &str = "Setup context not found for rollback. Skipping.";

pub struct EcsServiceRollbackState {
    name: String,
    helper: Arc<EcsStateHelper>,
    pub rollback_all_phases: bool,
    pub timeout_expression: Option<String>,
}

impl EcsServiceRollbackState {
    pub fn new(name: impl Into<String>, helper: Arc<EcsStateHelper>) -> Self {
        Self {
            name: name.into(),
            helper,
            rollback_all_phases: false,
            timeout_expression: None,
        }
    }

    pub fn rollback_all_phases_at_once(mut self) -> Self {
        self.rollback_all_phases = true;
        self
    }

    async fn deploy_elements(&self, ctx: &ExecutionContext) -> EngineResult<Vec<EcsServiceDeployElement>> {
        if self.rollback_all_phases {
            let mut elements: Vec<EcsServiceDeployElement> = self
                .helper
                .common
                .find_outputs_with_prefix(ctx, ECS_DEPLOY_OUTPUT_NAME)
                .await?;
            elements.reverse();
            return Ok(elements);
        }
        let element = self
            .helper
            .common
            .find_output(ctx, &EcsStateHelper::deploy_output_name(ctx))
            .await?;
        Ok(element.into_iter().collect())
    }

    /// The all-phases pass runs without a service, so it takes the newest
    /// setup recorded for any service.
    async fn setup_element(&self, ctx: &ExecutionContext) -> EngineResult<Option<EcsServiceSetupElement>> {
        if self.rollback_all_phases {
            let setups: Vec<EcsServiceSetupElement> = self
                .helper
                .common
                .find_outputs_with_prefix(ctx, ECS_SETUP_OUTPUT_NAME)
                .await?;
            return Ok(setups.into_iter().last());
        }
        self.helper.setup_element(ctx).await
    }

    async fn dispatch_rollback(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let elements = self.deploy_elements(ctx).await?;
        if elements.is_empty() {
            info!(state = %self.name, "Nothing to roll back");
            return Ok(ExecutionResponse::skipped(NO_ROLLBACK_CONTEXT));
        }
        let Some(setup) = self.setup_element(ctx).await? else {
            info!(state = %self.name, "Deploy recorded without setup, skipping rollback");
            return Ok(ExecutionResponse::skipped(NO_SETUP_FOR_ROLLBACK));
        };

        let timeout = self
            .timeout_millis(ctx)
            .unwrap_or(setup.service_steady_state_timeout_millis);

        // Every setting resolves before the first task is queued.
        let mut planned = Vec::with_capacity(elements.len());
        for element in &elements {
            let setting = self
                .helper
                .common
                .aws_setting(&element.compute_provider_setting_id)
                .await?;
            let (new_instance_data, old_instance_data) = element.rollback_instance_data();
            let parameters = json!({
                "commandType": "RESIZE",
                "rollback": true,
                "clusterName": element.cluster_name,
                "region": element.region,
                "newInstanceData": new_instance_data,
                "oldInstanceData": old_instance_data,
            });
            planned.push((setting, parameters));
        }

        let mut dispatched = Vec::with_capacity(planned.len());
        for (setting, parameters) in planned {
            let queued = self
                .helper
                .dispatch_with(
                    ctx,
                    "Rollback ECS Service",
                    ECS_SERVICE_ROLLBACK,
                    &setting,
                    parameters,
                    timeout,
                )
                .await;
            match queued {
                Ok(d) => dispatched.push(d),
                Err(e) => {
                    warn!(
                        state = %self.name,
                        queued = dispatched.len(),
                        error = %e,
                        "Rollback dispatch failed part way, failing queued rollbacks"
                    );
                    self.helper.common.abandon(ctx).await;
                    return Err(e);
                }
            }
        }

        info!(state = %self.name, deploys = elements.len(), "Rolling back ECS deploys");
        Ok(waiting_on(&dispatched, serde_json::to_value(&elements)?))
    }
}

#[async_trait]
impl State for EcsServiceRollbackState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        ECS_SERVICE_ROLLBACK
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        match self.dispatch_rollback(ctx).await {
            Ok(response) => Ok(response),
            Err(e) => failure_response_from_error(e),
        }
    }

    async fn handle_async_response(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        let completion = self
            .helper
            .common
            .complete(ctx, responses, ECS_TASK_TYPE)
            .await?;
        Ok(completion.response)
    }

    async fn handle_abort_event(&self, ctx: &mut ExecutionContext) {
        self.helper.common.abort(ctx).await;
    }

    fn timeout_millis(&self, ctx: &ExecutionContext) -> Option<u64> {
        resolve_timeout_millis(self.timeout_expression.as_deref(), ctx, None)
    }
}
