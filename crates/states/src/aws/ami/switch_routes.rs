//! Blue/green route switch between the old and new auto scaling groups.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use conveyor_engine::context::ExecutionContext;
use conveyor_engine::failure::failure_response_from_error;
use conveyor_engine::state::{resolve_timeout_millis, AsyncResponses, ExecutionResponse, State};
use conveyor_engine::EngineResult;

use super::helper::{AwsAmiHelper, AMI_TASK_TYPE};
use crate::helper::{waiting_on, NO_ROLLBACK_CONTEXT};

pub const AMI_SWITCH_ROUTES: &str = "AWS_AMI_SWITCH_ROUTES";
pub const AMI_ROLLBACK_SWITCH_ROUTES: &str = "AWS_AMI_ROLLBACK_SWITCH_ROUTES";

pub struct AmiSwitchRoutesState {
    name: String,
    helper: Arc<AwsAmiHelper>,
    /// Route traffic back to the old group.
    pub rollback: bool,
    pub downsize_old_asg: bool,
    pub timeout_expression: Option<String>,
}

impl AmiSwitchRoutesState {
    pub fn new(name: impl Into<String>, helper: Arc<AwsAmiHelper>) -> Self {
        Self {
            name: name.into(),
            helper,
            rollback: false,
            downsize_old_asg: true,
            timeout_expression: None,
        }
    }

    pub fn rollback(name: impl Into<String>, helper: Arc<AwsAmiHelper>) -> Self {
        Self {
            rollback: true,
            ..Self::new(name, helper)
        }
    }

    pub fn with_downsize_old_asg(mut self, downsize: bool) -> Self {
        self.downsize_old_asg = downsize;
        self
    }

    async fn dispatch_switch(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let Some(setup) = self.helper.setup_element(ctx).await? else {
            if self.rollback {
                info!(state = %self.name, "Nothing to roll back");
                return Ok(ExecutionResponse::skipped(NO_ROLLBACK_CONTEXT));
            }
            return Ok(ExecutionResponse::failed(
                "AMI service setup context not found. Add an AMI Service Setup step before switching routes.",
            ));
        };

        let (request_type, command_name) = if self.rollback {
            ("ROLLBACK_SWITCH_ROUTES", "Rollback Switch AutoScaling Group Route")
        } else {
            ("SWITCH_ROUTES", "Switch AutoScaling Group Route")
        };
        let parameters = json!({
            "requestType": request_type,
            "region": setup.region,
            "oldAsgName": setup.old_auto_scaling_group_name.clone().unwrap_or_default(),
            "newAsgName": setup.new_auto_scaling_group_name,
            "downscaleOldAsg": self.downsize_old_asg,
            "rollback": self.rollback,
            "maxInstances": setup.max_instances,
        });
        let timeout = self
            .timeout_millis(ctx)
            .unwrap_or(setup.auto_scaling_steady_state_timeout_millis);

        info!(
            state = %self.name,
            old_asg = ?setup.old_auto_scaling_group_name,
            new_asg = %setup.new_auto_scaling_group_name,
            rollback = self.rollback,
            "Switching AMI routes"
        );
        let dispatched = self
            .helper
            .dispatch(
                ctx,
                command_name,
                self.state_type(),
                &setup.compute_provider_setting_id,
                parameters.clone(),
                timeout,
            )
            .await?;

        Ok(waiting_on(&[dispatched], parameters))
    }
}

#[async_trait]
impl State for AmiSwitchRoutesState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        if self.rollback {
            AMI_ROLLBACK_SWITCH_ROUTES
        } else {
            AMI_SWITCH_ROUTES
        }
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        match self.dispatch_switch(ctx).await {
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
