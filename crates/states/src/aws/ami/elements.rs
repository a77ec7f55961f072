//! Sweeping output payloads of the AMI family.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const AMI_SETUP_OUTPUT_NAME: &str = "setupSweepingOutputAmi";
pub const AMI_DEPLOY_OUTPUT_NAME: &str = "deploySweepingOutputAmi";

/// Result of the AMI service setup: the auto scaling group created for the
/// new version next to the one currently serving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmiServiceSetupElement {
    pub old_auto_scaling_group_name: Option<String>,
    pub new_auto_scaling_group_name: String,
    #[serde(default)]
    pub old_asg_running_count: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    pub desired_instances: u32,
    pub auto_scaling_steady_state_timeout_millis: u64,
    pub region: String,
    pub compute_provider_setting_id: String,
}

/// What the setup task reports back.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AmiSetupOutput {
    pub old_auto_scaling_group_name: Option<String>,
    pub new_auto_scaling_group_name: String,
    #[serde(default)]
    pub old_asg_running_count: u32,
}

/// A resize applied by the AMI deploy, with the counts it replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmiServiceDeployElement {
    pub old_asg_name: Option<String>,
    pub old_asg_previous_count: u32,
    pub old_asg_desired_count: u32,
    pub new_asg_name: String,
    pub new_asg_previous_count: u32,
    pub new_asg_desired_count: u32,
    pub region: String,
    pub compute_provider_setting_id: String,
    pub auto_scaling_steady_state_timeout_millis: u64,
}

impl AmiServiceDeployElement {
    /// The resize that restores the previous counts.
    pub fn inverse(&self) -> Self {
        Self {
            old_asg_previous_count: self.old_asg_desired_count,
            old_asg_desired_count: self.old_asg_previous_count,
            new_asg_previous_count: self.new_asg_desired_count,
            new_asg_desired_count: self.new_asg_previous_count,
            ..self.clone()
        }
    }

    pub fn resize_parameters(&self, request_type: &str) -> Value {
        json!({
            "requestType": request_type,
            "region": self.region,
            "newAsgName": self.new_asg_name,
            "newAsgDesiredCount": self.new_asg_desired_count,
            "oldAsgName": self.old_asg_name,
            "oldAsgDesiredCount": self.old_asg_desired_count,
            "autoScalingSteadyStateTimeoutMillis": self.auto_scaling_steady_state_timeout_millis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_restores_counts() {
        let element = AmiServiceDeployElement {
            old_asg_name: Some("orders__1".to_string()),
            old_asg_previous_count: 4,
            old_asg_desired_count: 2,
            new_asg_name: "orders__2".to_string(),
            new_asg_previous_count: 0,
            new_asg_desired_count: 2,
            ..Default::default()
        };
        let inverse = element.inverse();
        assert_eq!(inverse.old_asg_desired_count, 4);
        assert_eq!(inverse.new_asg_desired_count, 0);
        assert_eq!(inverse.inverse(), element);
    }

    #[test]
    fn test_setup_element_wire_names() {
        let element = AmiServiceSetupElement {
            old_auto_scaling_group_name: Some("foo__1".to_string()),
            new_auto_scaling_group_name: "foo__2".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&element).unwrap();
        assert_eq!(json["oldAutoScalingGroupName"], "foo__1");
        assert_eq!(json["newAutoScalingGroupName"], "foo__2");
    }
}
