//! ECS service deploy: scales the new service up and the previous one down.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use conveyor_engine::context::{ContextElement, ExecutionContext, InstanceElement};
use conveyor_engine::failure::failure_response_from_error;
use conveyor_engine::state::{resolve_timeout_millis, AsyncResponses, ExecutionResponse, ExecutionStatus, State};
use conveyor_engine::EngineResult;

use super::elements::{ContainerServiceData, EcsDeployOutput, EcsServiceDeployElement};
use super::helper::{EcsStateHelper, ECS_TASK_TYPE};
use crate::helper::waiting_on;
use crate::instances::{desired_instances, parse_instance_count, validate_instance_count, InstanceUnitType};

pub const ECS_SERVICE_DEPLOY: &str = "ECS_SERVICE_DEPLOY";

pub struct EcsServiceDeployState {
    name: String,
    helper: Arc<EcsStateHelper>,
    pub instance_count: String,
    pub instance_unit_type: InstanceUnitType,
    pub timeout_expression: Option<String>,
}

impl EcsServiceDeployState {
    pub fn new(name: impl Into<String>, helper: Arc<EcsStateHelper>, instance_count: impl Into<String>) -> Self {
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

    async fn dispatch_resize(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let Some(setup) = self.helper.setup_element(ctx).await? else {
            warn!(state = %self.name, "No ECS setup found for deploy");
            return Ok(ExecutionResponse::failed(
                "ECS service setup context not found. Add an ECS Service Setup step before ECS Service Deploy.",
            ));
        };

        let rendered = ctx.render_expression(&self.instance_count)?;
        let count = match parse_instance_count(&rendered, self.instance_unit_type) {
            Ok(count) => count,
            Err(e) => return Ok(ExecutionResponse::failed(e.to_string())),
        };
        let desired = desired_instances(count, self.instance_unit_type, setup.max_instances);

        let new_instance_data = vec![ContainerServiceData {
            name: setup.new_service_name.clone(),
            previous_count: 0,
            desired_count: desired,
        }];
        let old_instance_data = setup
            .previous_service_name
            .iter()
            .map(|name| ContainerServiceData {
                name: name.clone(),
                previous_count: setup.previous_desired_count,
                desired_count: setup.previous_desired_count.saturating_sub(desired),
            })
            .collect();
        let element = EcsServiceDeployElement {
            cluster_name: setup.cluster_name.clone(),
            region: setup.region.clone(),
            compute_provider_setting_id: setup.compute_provider_setting_id.clone(),
            new_instance_data,
            old_instance_data,
        };
        self.helper
            .common
            .save_output(ctx, &EcsStateHelper::deploy_output_name(ctx), &element)
            .await?;

        info!(state = %self.name, service = %setup.new_service_name, desired = desired, "Resizing ECS services");

        let parameters = json!({
            "commandType": "RESIZE",
            "clusterName": element.cluster_name,
            "region": element.region,
            "newInstanceData": element.new_instance_data,
            "oldInstanceData": element.old_instance_data,
        });
        let timeout = self
            .timeout_millis(ctx)
            .unwrap_or(setup.service_steady_state_timeout_millis);
        let dispatched = self
            .helper
            .dispatch(
                ctx,
                "Resize ECS Service",
                ECS_SERVICE_DEPLOY,
                &element.compute_provider_setting_id,
                parameters,
                timeout,
            )
            .await?;

        Ok(waiting_on(&[dispatched], serde_json::to_value(&element)?))
    }

    async fn collect_instances(
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

        for result in completion.results.iter().filter_map(|r| r.as_delegate()) {
            // A delegate that reports nothing started no tasks.
            let output: EcsDeployOutput = match &result.output {
                Value::Null => EcsDeployOutput::default(),
                other => serde_json::from_value(other.clone())?,
            };
            for task in output.instances {
                let host_name = if task.host_name.is_empty() {
                    task.task_arn.clone()
                } else {
                    task.host_name
                };
                response.context_elements.push(ContextElement::Instance(InstanceElement {
                    uuid: task.task_arn,
                    host_name,
                    display_name: None,
                }));
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl State for EcsServiceDeployState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        ECS_SERVICE_DEPLOY
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
        match self.collect_instances(ctx, responses).await {
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
        validate_instance_count(&self.instance_count, self.instance_unit_type)
    }
}
