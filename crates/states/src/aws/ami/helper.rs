//! Shared pieces of the AMI states.

use std::sync::Arc;

use serde_json::Value;

use conveyor_engine::collaborators::{EngineServices, SettingAttribute};
use conveyor_engine::context::ExecutionContext;
use conveyor_engine::delegate::DelegateTask;
use conveyor_engine::EngineResult;

use super::elements::{AmiServiceDeployElement, AmiServiceSetupElement, AMI_DEPLOY_OUTPUT_NAME, AMI_SETUP_OUTPUT_NAME};
use crate::helper::{Dispatched, StateHelper};

/// Delegate task type of every AMI command.
pub const AMI_TASK_TYPE: &str = "AWS_AMI_ASYNC_TASK";

pub struct AwsAmiHelper {
    pub(crate) common: StateHelper,
}

impl AwsAmiHelper {
    pub fn new(services: EngineServices) -> Arc<Self> {
        Arc::new(Self {
            common: StateHelper::new(services),
        })
    }

    pub fn setup_output_name(ctx: &ExecutionContext) -> String {
        format!("{}{}", AMI_SETUP_OUTPUT_NAME, phase_suffix(ctx))
    }

    pub fn deploy_output_name(ctx: &ExecutionContext) -> String {
        format!("{}{}", AMI_DEPLOY_OUTPUT_NAME, phase_suffix(ctx))
    }

    pub async fn setup_element(&self, ctx: &ExecutionContext) -> EngineResult<Option<AmiServiceSetupElement>> {
        self.common
            .find_output(ctx, &Self::setup_output_name(ctx))
            .await
    }

    /// Newest deploy recorded for the phase of `ctx`.
    pub async fn deploy_element(&self, ctx: &ExecutionContext) -> EngineResult<Option<AmiServiceDeployElement>> {
        self.common
            .find_output(ctx, &Self::deploy_output_name(ctx))
            .await
    }

    /// Queue one AMI command carrying `parameters` plus the provider config
    /// of `setting_id`.
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
        let task = DelegateTask::builder(ctx.account_id(), AMI_TASK_TYPE)
            .parameters(parameters)
            .timeout_millis(timeout_millis)
            .description(command_name);
        self.common
            .dispatch(ctx, command_name, command_type, task)
            .await
    }
}

fn phase_suffix(ctx: &ExecutionContext) -> String {
    ctx.phase_element()
        .map(|p| p.phase_name.trim().to_string())
        .unwrap_or_default()
}
