//! AWS AMI (auto scaling group) blue/green states.

mod deploy;
mod elements;
mod helper;
mod rollback;
mod setup;
mod switch_routes;

pub use deploy::{AmiServiceDeployState, AMI_SERVICE_DEPLOY};
pub use elements::{
    AmiServiceDeployElement, AmiServiceSetupElement, AMI_DEPLOY_OUTPUT_NAME, AMI_SETUP_OUTPUT_NAME,
};
pub use helper::{AwsAmiHelper, AMI_TASK_TYPE};
pub use rollback::{AmiServiceRollbackState, AMI_SERVICE_ROLLBACK};
pub use setup::{AmiServiceSetupState, AMI_SERVICE_SETUP};
pub use switch_routes::{AmiSwitchRoutesState, AMI_ROLLBACK_SWITCH_ROUTES, AMI_SWITCH_ROUTES};
