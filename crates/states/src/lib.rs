//! # Conveyor States
//!
//! Deployment states for the Conveyor engine: the setup, deploy and
//! rollback triad for AWS AMI auto scaling groups and Amazon ECS services.
//!
//! Each family shares a helper that owns the engine collaborators and
//! tracks the delegate tasks a state execution is waiting on. Setup states
//! publish what they created as sweeping outputs, deploy states record the
//! counts they replaced, and rollback states invert those records.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conveyor_states::aws::ami::{AmiServiceDeployState, AmiServiceSetupState, AwsAmiHelper};
//!
//! let helper = AwsAmiHelper::new(services);
//! let setup = AmiServiceSetupState::new("AMI Setup", helper.clone());
//! let deploy = AmiServiceDeployState::new("Upgrade AutoScaling Group", helper, "100")
//!     .with_unit_type(InstanceUnitType::Percentage);
//! ```

pub mod aws;
pub mod ecs;
pub mod helper;
pub mod instances;
pub mod state;

pub use helper::{Dispatched, StateHelper, NO_ROLLBACK_CONTEXT};
pub use instances::InstanceUnitType;
pub use state::DeploymentState;
