//! Amazon ECS blue/green states.

mod deploy;
mod elements;
mod helper;
mod rollback;
mod setup;

pub use deploy::{EcsServiceDeployState, ECS_SERVICE_DEPLOY};
pub use elements::{
    ContainerServiceData, EcsServiceDeployElement, EcsServiceSetupElement, ECS_DEPLOY_OUTPUT_NAME,
    ECS_SETUP_OUTPUT_NAME,
};
pub use helper::{EcsStateHelper, ECS_TASK_TYPE};
pub use rollback::{EcsServiceRollbackState, ECS_SERVICE_ROLLBACK, NO_SETUP_FOR_ROLLBACK};
pub use setup::{EcsServiceSetupState, ECS_SERVICE_SETUP};
