//! AMI service deploy: resizes the new auto scaling group up and the old
//! one down, recording the counts it replaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use conveyor_engine::context::ExecutionContext;
use conveyor_engine::failure::failure_response_from_error;
use conveyor_engine::state::{resolve_timeout_millis, AsyncResponses, ExecutionResponse, State};
use conveyor_engine::EngineResult;

use super::elements::AmiServiceDeployElement;
use super::helper::{AwsAmiHelper, AMI_TASK_TYPE};
use crate::helper::waiting_on;
use crate::instances::{desired_instances, parse_instance_count, validate_instance_count, InstanceUnitType};

pub const AMI_SERVICE_DEPLOY: &str = "AWS_AMI_SERVICE_DEPLOY";

pub struct AmiServiceDeployState {
    name: String,
    helper: Arc<AwsAmiHelper>,
    pub instance_count: String,
    pub instance_unit_type: InstanceUnitType,
    pub timeout_expression: Option<String>,
}

impl AmiServiceDeployState {
    pub fn new(name: impl Into<String>, helper: Arc<AwsAmiHelper>, instance_count: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            helper,
            instance_count: instance_count.into(),
            instance_unit_type: InstanceUnitType::Count,
            timeout_expression: None,
        }
    }

    pub fn with_unit_type(mut self, unit: InstanceUnitType) -> Self {
        self.instance_unit_type = unit;
        self
    }

    pub fn with_timeout_expression(mut self, expression: impl Into<String>) -> Self {
        self.timeout_expression = Some(expression.into());
        self
    }

    async fn dispatch_resize(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let Some(setup) = self.helper.setup_element(ctx).await? else {
            warn!(state = %self.name, "No AMI setup found for deploy");
            return Ok(ExecutionResponse::failed(
                "AMI service setup context not found. Add an AMI Service Setup step before AMI Service Deploy.",
            ));
        };

        let rendered = ctx.render_expression(&self.instance_count)?;
        let count = match parse_instance_count(&rendered, self.instance_unit_type) {
            Ok(count) => count,
            Err(e) => return Ok(ExecutionResponse::failed(e.to_string())),
        };
        let desired = desired_instances(count, self.instance_unit_type, setup.max_instances);

        // A repeated deploy in the phase starts from the counts the last one left.
        let (old_asg_previous_count, new_asg_previous_count) = match self.helper.deploy_element(ctx).await? {
            Some(previous) => (previous.old_asg_desired_count, previous.new_asg_desired_count),
            None => (setup.old_asg_running_count, 0),
        };

        let element = AmiServiceDeployElement {
            old_asg_name: setup.old_auto_scaling_group_name.clone(),
            old_asg_previous_count,
            old_asg_desired_count: setup.old_asg_running_count.saturating_sub(desired),
            new_asg_name: setup.new_auto_scaling_group_name.clone(),
            new_asg_previous_count,
            new_asg_desired_count: desired,
            region: setup.region.clone(),
            compute_provider_setting_id: setup.compute_provider_setting_id.clone(),
            auto_scaling_steady_state_timeout_millis: setup.auto_scaling_steady_state_timeout_millis,
        };
        self.helper
            .common
            .save_output(ctx, &AwsAmiHelper::deploy_output_name(ctx), &element)
            .await?;

        info!(
            state = %self.name,
            new_asg = %element.new_asg_name,
            desired = desired,
            "Resizing AMI auto scaling groups"
        );

        let timeout = self
            .timeout_millis(ctx)
            .unwrap_or(setup.auto_scaling_steady_state_timeout_millis);
        let dispatched = self
            .helper
            .dispatch(
                ctx,
                "Resize AutoScaling Group",
                AMI_SERVICE_DEPLOY,
                &element.compute_provider_setting_id,
                element.resize_parameters("DEPLOY"),
                timeout,
            )
            .await?;

        Ok(waiting_on(&[dispatched], serde_json::to_value(&element)?))
    }
}

#[async_trait]
impl State for AmiServiceDeployState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        AMI_SERVICE_DEPLOY
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        match self.dispatch_resize(ctx).await {
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

    fn validate_fields(&self) -> BTreeMap<String, String> {
        validate_instance_count(&self.instance_count, self.instance_unit_type)
    }
}
