//! Narrow interfaces to services outside the engine, with in-memory
//! implementations for embedding and tests.

mod activity;
mod feature_flags;
mod metadata;

use std::sync::Arc;

pub use activity::{Activity, ActivityService, InMemoryActivityService};
pub use feature_flags::{FeatureFlagService, FeatureName, InMemoryFeatureFlagService};
pub use metadata::{InMemoryMetadataService, InfrastructureMapping, MetadataService, SettingAttribute};

use crate::delegate::{
    DelegateService, InMemoryDelegateService, InMemoryStateExecutionService, StateExecutionService,
};
use crate::sweeping::{InMemorySweepingOutputStore, SweepingOutputService};

/// Collaborators handed to states at construction.
#[derive(Clone)]
pub struct EngineServices {
    pub delegate_service: Arc<dyn DelegateService>,
    pub state_execution_service: Arc<dyn StateExecutionService>,
    pub sweeping_output_service: Arc<dyn SweepingOutputService>,
    pub activity_service: Arc<dyn ActivityService>,
    pub feature_flag_service: Arc<dyn FeatureFlagService>,
    pub metadata_service: Arc<dyn MetadataService>,
}

/// Concrete in-memory collaborators, kept typed so tests can inspect them.
#[derive(Clone, Default)]
pub struct InMemoryServices {
    pub delegates: Arc<InMemoryDelegateService>,
    pub state_executions: Arc<InMemoryStateExecutionService>,
    pub sweeping_outputs: Arc<InMemorySweepingOutputStore>,
    pub activities: Arc<InMemoryActivityService>,
    pub feature_flags: Arc<InMemoryFeatureFlagService>,
    pub metadata: Arc<InMemoryMetadataService>,
}

impl InMemoryServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine_services(&self) -> EngineServices {
        EngineServices {
            delegate_service: self.delegates.clone(),
            state_execution_service: self.state_executions.clone(),
            sweeping_output_service: self.sweeping_outputs.clone(),
            activity_service: self.activities.clone(),
            feature_flag_service: self.feature_flags.clone(),
            metadata_service: self.metadata.clone(),
        }
    }
}
