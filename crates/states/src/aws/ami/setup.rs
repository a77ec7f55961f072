//! AMI service setup: creates the auto scaling group of the new version.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use conveyor_engine::context::ExecutionContext;
use conveyor_engine::delegate::DEFAULT_ASYNC_CALL_TIMEOUT;
use conveyor_engine::failure::failure_response_from_error;
use conveyor_engine::state::{resolve_timeout_millis, AsyncResponses, ExecutionResponse, ExecutionStatus, State};
use conveyor_engine::EngineResult;

use super::elements::{AmiServiceSetupElement, AmiSetupOutput};
use super::helper::{AwsAmiHelper, AMI_TASK_TYPE};
use crate::helper::waiting_on;

pub const AMI_SERVICE_SETUP: &str = "AWS_AMI_SERVICE_SETUP";

const DEFAULT_ASG_NAME_PREFIX: &str = "${app.name}__${service.name}__${env.name}";

pub struct AmiServiceSetupState {
    name: String,
    helper: Arc<AwsAmiHelper>,
    pub asg_name_prefix: Option<String>,
    pub min_instances: u32,
    pub max_instances: u32,
    pub desired_instances: u32,
    pub timeout_expression: Option<String>,
}

impl AmiServiceSetupState {
    pub fn new(name: impl Into<String>, helper: Arc<AwsAmiHelper>) -> Self {
        Self {
            name: name.into(),
            helper,
            asg_name_prefix: None,
            min_instances: 0,
            max_instances: 10,
            desired_instances: 6,
            timeout_expression: None,
        }
    }

    pub fn with_instances(mut self, min: u32, max: u32, desired: u32) -> Self {
        self.min_instances = min;
        self.max_instances = max;
        self.desired_instances = desired;
        self
    }

    pub fn with_asg_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.asg_name_prefix = Some(prefix.into());
        self
    }

    pub fn with_timeout_expression(mut self, expression: impl Into<String>) -> Self {
        self.timeout_expression = Some(expression.into());
        self
    }

    async fn dispatch_setup(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let infra = self.helper.common.infrastructure_mapping(ctx).await?;
        let prefix = match ctx.render_optional(self.asg_name_prefix.as_deref())? {
            Some(prefix) => prefix,
            None => ctx.render_expression(DEFAULT_ASG_NAME_PREFIX)?,
        };
        let timeout = self.timeout_millis(ctx).unwrap_or(DEFAULT_ASYNC_CALL_TIMEOUT);

        let parameters = json!({
            "requestType": "SETUP",
            "region": infra.region,
            "infraMappingId": infra.uuid,
            "newAsgNamePrefix": prefix,
            "minInstances": self.min_instances,
            "maxInstances": self.max_instances,
            "desiredInstances": self.desired_instances,
            "autoScalingSteadyStateTimeoutMillis": timeout,
        });
        let dispatched = self
            .helper
            .dispatch(
                ctx,
                "AMI Service Setup",
                AMI_SERVICE_SETUP,
                &infra.compute_provider_setting_id,
                parameters,
                timeout,
            )
            .await?;

        Ok(waiting_on(
            &[dispatched],
            json!({
                "asgNamePrefix": prefix,
                "region": infra.region,
                "computeProviderSettingId": infra.compute_provider_setting_id,
                "timeoutMillis": timeout,
            }),
        ))
    }

    async fn record_setup(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        let completion = self
            .helper
            .common
            .complete(ctx, responses, AMI_TASK_TYPE)
            .await?;
        let mut response = completion.response;
        if response.execution_status != ExecutionStatus::Success {
            return Ok(response);
        }

        let output = completion
            .results
            .first()
            .and_then(|r| r.as_delegate())
            .map(|d| d.output.clone())
            .unwrap_or_default();
        let output: AmiSetupOutput = serde_json::from_value(output)?;

        let infra = self.helper.common.infrastructure_mapping(ctx).await?;
        let element = AmiServiceSetupElement {
            old_auto_scaling_group_name: output.old_auto_scaling_group_name,
            new_auto_scaling_group_name: output.new_auto_scaling_group_name,
            old_asg_running_count: output.old_asg_running_count,
            min_instances: self.min_instances,
            max_instances: self.max_instances,
            desired_instances: self.desired_instances,
            auto_scaling_steady_state_timeout_millis: self
                .timeout_millis(ctx)
                .unwrap_or(DEFAULT_ASYNC_CALL_TIMEOUT),
            region: infra.region,
            compute_provider_setting_id: infra.compute_provider_setting_id,
        };
        self.helper
            .common
            .save_output(ctx, &AwsAmiHelper::setup_output_name(ctx), &element)
            .await?;

        info!(
            state = %self.name,
            new_asg = %element.new_auto_scaling_group_name,
            old_asg = ?element.old_auto_scaling_group_name,
            "AMI setup recorded"
        );
        response.state_execution_data = Some(serde_json::to_value(&element)?);
        Ok(response)
    }
}

#[async_trait]
impl State for AmiServiceSetupState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        AMI_SERVICE_SETUP
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        match self.dispatch_setup(ctx).await {
            Ok(response) => Ok(response),
            Err(e) => failure_response_from_error(e),
        }
    }

    async fn handle_async_response(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        match self.record_setup(ctx, responses).await {
            Ok(response) => Ok(response),
            Err(e) => failure_response_from_error(e),
        }
    }

    async fn handle_abort_event(&self, ctx: &mut ExecutionContext) {
        self.helper.common.abort(ctx).await;
    }

    fn timeout_millis(&self, ctx: &ExecutionContext) -> Option<u64> {
        resolve_timeout_millis(self.timeout_expression.as_deref(), ctx, None)
    }

    fn validate_fields(&self) -> BTreeMap<String, String> {
        let mut problems = BTreeMap::new();
        if self.max_instances == 0 {
            problems.insert("maxInstances".to_string(), "Max instances must be greater than 0".to_string());
        }
        if self.desired_instances > self.max_instances {
            problems.insert(
                "desiredInstances".to_string(),
                "Desired instances cannot exceed max instances".to_string(),
            );
        }
        if self.min_instances > self.desired_instances {
            problems.insert(
                "minInstances".to_string(),
                "Min instances cannot exceed desired instances".to_string(),
            );
        }
        problems
    }
}
