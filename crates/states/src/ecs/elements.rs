//! Sweeping output payloads of the ECS family.

use serde::{Deserialize, Serialize};

pub const ECS_SETUP_OUTPUT_NAME: &str = "ecsServiceSetupElement";
pub const ECS_DEPLOY_OUTPUT_NAME: &str = "ecsServiceDeployElement";

/// Desired count change of one ECS service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerServiceData {
    pub name: String,
    pub previous_count: u32,
    pub desired_count: u32,
}

impl ContainerServiceData {
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            previous_count: self.desired_count,
            desired_count: self.previous_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsServiceSetupElement {
    pub new_service_name: String,
    pub previous_service_name: Option<String>,
    #[serde(default)]
    pub previous_desired_count: u32,
    pub max_instances: u32,
    pub cluster_name: String,
    pub region: String,
    pub compute_provider_setting_id: String,
    pub service_steady_state_timeout_millis: u64,
}

/// What the setup task reports back.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EcsSetupOutput {
    pub new_service_name: String,
    pub previous_service_name: Option<String>,
    #[serde(default)]
    pub previous_desired_count: u32,
}

/// Resizes applied by an ECS deploy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsServiceDeployElement {
    pub cluster_name: String,
    pub region: String,
    pub compute_provider_setting_id: String,
    pub new_instance_data: Vec<ContainerServiceData>,
    pub old_instance_data: Vec<ContainerServiceData>,
}

impl EcsServiceDeployElement {
    /// The resizes that restore the previous counts, old services first.
    pub fn rollback_instance_data(&self) -> (Vec<ContainerServiceData>, Vec<ContainerServiceData>) {
        (
            self.new_instance_data.iter().map(ContainerServiceData::reversed).collect(),
            self.old_instance_data.iter().map(ContainerServiceData::reversed).collect(),
        )
    }
}

/// A running task the deploy reports, surfaced as an instance element.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EcsTaskInstance {
    pub task_arn: String,
    #[serde(default)]
    pub host_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EcsDeployOutput {
    #[serde(default)]
    pub instances: Vec<EcsTaskInstance>,
}
