//! ECS service setup: registers the task definition and creates the service
//! of the new version at zero tasks.

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

use super::elements::{EcsServiceSetupElement, EcsSetupOutput};
use super::helper::{EcsStateHelper, ECS_TASK_TYPE};
use crate::helper::waiting_on;

pub const ECS_SERVICE_SETUP: &str = "ECS_SERVICE_SETUP";

const DEFAULT_SERVICE_NAME_PREFIX: &str = "${app.name}__${service.name}__${env.name}";

pub struct EcsServiceSetupState {
    name: String,
    helper: Arc<EcsStateHelper>,
    pub service_name_prefix: Option<String>,
    pub max_instances: u32,
    pub timeout_expression: Option<String>,
}

impl EcsServiceSetupState {
    pub fn new(name: impl Into<String>, helper: Arc<EcsStateHelper>) -> Self {
        Self {
            name: name.into(),
            helper,
            service_name_prefix: None,
            max_instances: 10,
            timeout_expression: None,
        }
    }

    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instances = max;
        self
    }

    pub fn with_service_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.service_name_prefix = Some(prefix.into());
        self
    }

    async fn dispatch_setup(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        // Fails early when the phase has no service to key the output on.
        EcsStateHelper::setup_output_name(ctx)?;
        let (infra, cluster) = self.helper.cluster_mapping(ctx).await?;
        let prefix = match ctx.render_optional(self.service_name_prefix.as_deref())? {
            Some(prefix) => prefix,
            None => ctx.render_expression(DEFAULT_SERVICE_NAME_PREFIX)?,
        };
        let timeout = self.timeout_millis(ctx).unwrap_or(DEFAULT_ASYNC_CALL_TIMEOUT);

        let parameters = json!({
            "commandType": "SETUP",
            "clusterName": cluster,
            "region": infra.region,
            "serviceNamePrefix": prefix,
            "maxInstances": self.max_instances,
            "serviceSteadyStateTimeoutMillis": timeout,
        });
        let dispatched = self
            .helper
            .dispatch(
                ctx,
                "Setup ECS Service",
                ECS_SERVICE_SETUP,
                &infra.compute_provider_setting_id,
                parameters.clone(),
                timeout,
            )
            .await?;
        Ok(waiting_on(&[dispatched], parameters))
    }

    async fn record_setup(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        let completion = self
            .helper
            .common
            .complete(ctx, responses, ECS_TASK_TYPE)
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
        let output: EcsSetupOutput = serde_json::from_value(output)?;
        let (infra, cluster) = self.helper.cluster_mapping(ctx).await?;

        let element = EcsServiceSetupElement {
            new_service_name: output.new_service_name,
            previous_service_name: output.previous_service_name,
            previous_desired_count: output.previous_desired_count,
            max_instances: self.max_instances,
            cluster_name: cluster,
            region: infra.region,
            compute_provider_setting_id: infra.compute_provider_setting_id,
            service_steady_state_timeout_millis: self
                .timeout_millis(ctx)
                .unwrap_or(DEFAULT_ASYNC_CALL_TIMEOUT),
        };
        self.helper
            .common
            .save_output(ctx, &EcsStateHelper::setup_output_name(ctx)?, &element)
            .await?;

        info!(
            state = %self.name,
            service = %element.new_service_name,
            previous = ?element.previous_service_name,
            "ECS setup recorded"
        );
        response.state_execution_data = Some(serde_json::to_value(&element)?);
        Ok(response)
    }
}

#[async_trait]
impl State for EcsServiceSetupState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        ECS_SERVICE_SETUP
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
        problems
    }
}
