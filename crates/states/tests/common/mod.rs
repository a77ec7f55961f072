#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use conveyor_engine::collaborators::{InMemoryServices, InfrastructureMapping, SettingAttribute};
use conveyor_engine::context::{ContextElement, ExecutionContext, PhaseElement, ServiceElement, WorkflowStandardParams};
use conveyor_engine::delegate::{CommandExecutionStatus, DelegateTask, DelegateTaskResponse, ResponseData};
use conveyor_engine::state::{AsyncResponses, ExecutionResponse};
use conveyor_engine::template::JinjaExpressionRenderer;

pub const SETTING_ID: &str = "AWS_1";
pub const INFRA_ID: &str = "infra-1";

pub async fn services() -> InMemoryServices {
    let services = InMemoryServices::new();
    services
        .metadata
        .add_setting(SettingAttribute {
            uuid: SETTING_ID.to_string(),
            name: "aws-prod".to_string(),
            category: "CLOUD_PROVIDER".to_string(),
            value: json!({ "accessKey": "AKIAEXAMPLE" }),
        })
        .await;
    services
        .metadata
        .add_infrastructure_mapping(InfrastructureMapping {
            uuid: INFRA_ID.to_string(),
            env_id: "env-1".to_string(),
            service_id: "svc-1".to_string(),
            compute_provider_setting_id: SETTING_ID.to_string(),
            region: "us-east-1".to_string(),
            cluster_name: Some("prod-cluster".to_string()),
        })
        .await;
    services
}

pub fn service() -> ServiceElement {
    ServiceElement {
        uuid: "svc-1".to_string(),
        name: "orders".to_string(),
    }
}

fn base_context() -> ExecutionContext {
    let mut ctx = ExecutionContext::new("app-1", "acc-1", "wf-exec-1", Arc::new(JinjaExpressionRenderer::new()));
    ctx.push_context_element(ContextElement::Standard(WorkflowStandardParams {
        app_id: "app-1".to_string(),
        app_name: "orders-app".to_string(),
        env_id: "env-1".to_string(),
        env_name: "prod".to_string(),
        env_type: "PROD".to_string(),
        account_id: "acc-1".to_string(),
        workflow_name: "deploy-orders".to_string(),
        artifact_ids: Vec::new(),
    }));
    ctx
}

/// Context of `phase_name` bound to state execution `state_execution_id`.
pub fn phase_context(phase_name: &str, state_execution_id: &str) -> ExecutionContext {
    phase_context_with(phase_name, state_execution_id, false)
}

pub fn rollback_context(phase_name: &str, state_execution_id: &str) -> ExecutionContext {
    phase_context_with(phase_name, state_execution_id, true)
}

fn phase_context_with(phase_name: &str, state_execution_id: &str, rollback: bool) -> ExecutionContext {
    let mut ctx = base_context();
    ctx.push_context_element(ContextElement::Phase(PhaseElement {
        uuid: format!("phase-{}", phase_name.to_lowercase().replace(' ', "-")),
        phase_name: phase_name.to_string(),
        service_element: Some(service()),
        infra_mapping_id: Some(INFRA_ID.to_string()),
        rollback,
    }));
    ctx.push_context_element(ContextElement::Service(service()));
    ctx.set_state_execution(state_execution_id, "step");
    ctx
}

pub fn success(output: Value) -> ResponseData {
    ResponseData::Delegate(DelegateTaskResponse::new(CommandExecutionStatus::Success).with_output(output))
}

/// Successful responses for every correlation id of `response`.
pub fn all_succeeded(response: &ExecutionResponse, output: Value) -> AsyncResponses {
    response
        .correlation_ids
        .iter()
        .map(|id| (id.clone(), success(output.clone())))
        .collect::<HashMap<_, _>>()
}

pub async fn queued(services: &InMemoryServices) -> Vec<DelegateTask> {
    services.delegates.queued_tasks().await
}
