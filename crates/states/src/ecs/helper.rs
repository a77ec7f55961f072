use std::sync::Arc;

use serde_json::Value;

use conveyor_engine::collaborators::{EngineServices, InfrastructureMapping, SettingAttribute};
use conveyor_engine::context::ExecutionContext;
use conveyor_engine::delegate::DelegateTask;
use conveyor_engine::{EngineError, EngineResult};

use super::elements::{EcsServiceSetupElement, ECS_DEPLOY_OUTPUT_NAME, ECS_SETUP_OUTPUT_NAME};
use crate::helper::{Dispatched, StateHelper};

/// Delegate task type of every ECS command.
pub const ECS_TASK_TYPE: &str = "ECS_COMMAND_TASK";

pub struct EcsStateHelper {
    pub(crate) common: StateHelper,
}

impl EcsStateHelper {
    pub fn new(services: EngineServices) -> Arc<Self> {
        Arc::new(Self {
            common: StateHelper::new(services),
        })
    }

    /// Setup outputs are keyed by service so every phase deploying that
    /// service finds the same one.
    pub fn setup_output_name(ctx: &ExecutionContext) -> EngineResult<String> {
        let service = ctx.service_element().ok_or_else(|| {
            EngineError::Config(format!("State '{}' runs without a service in context", ctx.state_name()))
        })?;
        Ok(format!("{}{}", ECS_SETUP_OUTPUT_NAME, service.uuid))
    }

    pub fn deploy_output_name(ctx: &ExecutionContext) -> String {
        let phase = ctx
            .phase_element()
            .map(|p| p.phase_name.trim().to_string())
            .unwrap_or_default();
        format!("{}{}", ECS_DEPLOY_OUTPUT_NAME, phase)
    }

    pub async fn setup_element(&self, ctx: &ExecutionContext) -> EngineResult<Option<EcsServiceSetupElement>> {
        self.common
            .find_output(ctx, &Self::setup_output_name(ctx)?)
            .await
    }

    /// Infrastructure mapping of the phase, which must name a cluster.
    pub async fn cluster_mapping(&self, ctx: &ExecutionContext) -> EngineResult<(InfrastructureMapping, String)> {
        let infra = self.common.infrastructure_mapping(ctx).await?;
        let cluster = infra
            .cluster_name
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                EngineError::Config(format!("Infrastructure mapping {} has no ECS cluster", infra.uuid))
            })?;
        Ok((infra, cluster))
    }

    pub async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        command_name: &str,
        command_type: &str,
        setting_id: &str,
        parameters: Value,
        timeout_millis: u64,
    ) -> EngineResult<Dispatched> {
        let setting = self.common.aws_setting(setting_id).await?;
        self.dispatch_with(ctx, command_name, command_type, &setting, parameters, timeout_millis)
            .await
    }

    /// Like `dispatch`, with the provider setting already resolved.
    pub async fn dispatch_with(
        &self,
        ctx: &ExecutionContext,
        command_name: &str,
        command_type: &str,
        setting: &SettingAttribute,
        mut parameters: Value,
        timeout_millis: u64,
    ) -> EngineResult<Dispatched> {
        if let Value::Object(map) = &mut parameters {
            map.insert("awsConfig".to_string(), setting.value.clone());
            map.insert("commandName".to_string(), Value::from(command_name));
        }
        let task = DelegateTask::builder(ctx.account_id(), ECS_TASK_TYPE)
            .parameters(parameters)
            .timeout_millis(timeout_millis)
            .description(command_name);
        self.common
            .dispatch(ctx, command_name, command_type, task)
            .await
    }
}
