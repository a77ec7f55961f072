//! AMI service rollback: restores the auto scaling group counts a deploy
//! replaced.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use conveyor_engine::context::ExecutionContext;
use conveyor_engine::failure::failure_response_from_error;
use conveyor_engine::state::{resolve_timeout_millis, AsyncResponses, ExecutionResponse, State};
use conveyor_engine::EngineResult;

use super::elements::{AmiServiceDeployElement, AMI_DEPLOY_OUTPUT_NAME};
use super::helper::{AwsAmiHelper, AMI_TASK_TYPE};
use crate::helper::{waiting_on, NO_ROLLBACK_CONTEXT};

pub const AMI_SERVICE_ROLLBACK: &str = "AWS_AMI_SERVICE_ROLLBACK";

pub struct AmiServiceRollbackState {
    name: String,
    helper: Arc<AwsAmiHelper>,
    /// Undo every phase's deploy in one pass.
    pub rollback_all_phases: bool,
    pub timeout_expression: Option<String>,
}

impl AmiServiceRollbackState {
    pub fn new(name: impl Into<String>, helper: Arc<AwsAmiHelper>) -> Self {
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

    /// Deploys to undo, most recent first.
    async fn deploy_elements(&self, ctx: &ExecutionContext) -> EngineResult<Vec<AmiServiceDeployElement>> {
        if self.rollback_all_phases {
            let mut elements: Vec<AmiServiceDeployElement> = self
                .helper
                .common
                .find_outputs_with_prefix(ctx, AMI_DEPLOY_OUTPUT_NAME)
                .await?;
            elements.reverse();
            Ok(elements)
        } else {
            let element = self.helper.deploy_element(ctx).await?;
            Ok(element.into_iter().collect())
        }
    }

    async fn dispatch_rollback(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let elements = self.deploy_elements(ctx).await?;
        if elements.is_empty() {
            info!(state = %self.name, "Nothing to roll back");
            return Ok(ExecutionResponse::skipped(NO_ROLLBACK_CONTEXT));
        }

        // Every setting resolves before the first task is queued.
        let mut planned = Vec::with_capacity(elements.len());
        for element in &elements {
            let inverse = element.inverse();
            let setting = self
                .helper
                .common
                .aws_setting(&inverse.compute_provider_setting_id)
                .await?;
            planned.push((inverse, setting));
        }

        let mut dispatched = Vec::with_capacity(planned.len());
        for (inverse, setting) in &planned {
            let timeout = self
                .timeout_millis(ctx)
                .unwrap_or(inverse.auto_scaling_steady_state_timeout_millis);
            let queued = self
                .helper
                .dispatch_with(
                    ctx,
                    "Rollback AutoScaling Group",
                    AMI_SERVICE_ROLLBACK,
                    setting,
                    inverse.resize_parameters("ROLLBACK"),
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
        let restored: Vec<_> = planned.into_iter().map(|(inverse, _)| inverse).collect();

        info!(state = %self.name, groups = restored.len(), "Rolling back AMI deploys");
        Ok(waiting_on(&dispatched, serde_json::to_value(&restored)?))
    }
}

#[async_trait]
impl State for AmiServiceRollbackState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        AMI_SERVICE_ROLLBACK
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
            .complete(ctx, responses, AMI_TASK_TYPE)
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
