//! Closed set of deployment states, dispatched by variant.

use std::collections::BTreeMap;

use async_trait::async_trait;

use conveyor_engine::context::ExecutionContext;
use conveyor_engine::state::{AsyncResponses, ExecutionResponse, State};
use conveyor_engine::EngineResult;

use crate::aws::ami::{AmiServiceDeployState, AmiServiceRollbackState, AmiServiceSetupState, AmiSwitchRoutesState};
use crate::ecs::{EcsServiceDeployState, EcsServiceRollbackState, EcsServiceSetupState};

pub enum DeploymentState {
    AmiSetup(AmiServiceSetupState),
    AmiDeploy(AmiServiceDeployState),
    AmiRollback(AmiServiceRollbackState),
    AmiSwitchRoutes(AmiSwitchRoutesState),
    EcsSetup(EcsServiceSetupState),
    EcsDeploy(EcsServiceDeployState),
    EcsRollback(EcsServiceRollbackState),
}

macro_rules! each_state {
    ($self:ident, $s:ident => $body:expr) => {
        match $self {
            DeploymentState::AmiSetup($s) => $body,
            DeploymentState::AmiDeploy($s) => $body,
            DeploymentState::AmiRollback($s) => $body,
            DeploymentState::AmiSwitchRoutes($s) => $body,
            DeploymentState::EcsSetup($s) => $body,
            DeploymentState::EcsDeploy($s) => $body,
            DeploymentState::EcsRollback($s) => $body,
        }
    };
}

impl DeploymentState {
    /// Whether this state undoes an earlier one.
    pub fn is_rollback(&self) -> bool {
        match self {
            Self::AmiRollback(_) | Self::EcsRollback(_) => true,
            Self::AmiSwitchRoutes(s) => s.rollback,
            _ => false,
        }
    }
}

#[async_trait]
impl State for DeploymentState {
    fn name(&self) -> &str {
        each_state!(self, s => s.name())
    }

    fn state_type(&self) -> &str {
        each_state!(self, s => s.state_type())
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        each_state!(self, s => s.execute(ctx).await)
    }

    async fn handle_async_response(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        each_state!(self, s => s.handle_async_response(ctx, responses).await)
    }

    async fn handle_abort_event(&self, ctx: &mut ExecutionContext) {
        each_state!(self, s => s.handle_abort_event(ctx).await)
    }

    fn timeout_millis(&self, ctx: &ExecutionContext) -> Option<u64> {
        each_state!(self, s => s.timeout_millis(ctx))
    }

    fn validate_fields(&self) -> BTreeMap<String, String> {
        each_state!(self, s => s.validate_fields())
    }
}

impl From<AmiServiceSetupState> for DeploymentState {
    fn from(s: AmiServiceSetupState) -> Self {
        Self::AmiSetup(s)
    }
}

impl From<AmiServiceDeployState> for DeploymentState {
    fn from(s: AmiServiceDeployState) -> Self {
        Self::AmiDeploy(s)
    }
}

impl From<AmiServiceRollbackState> for DeploymentState {
    fn from(s: AmiServiceRollbackState) -> Self {
        Self::AmiRollback(s)
    }
}

impl From<AmiSwitchRoutesState> for DeploymentState {
    fn from(s: AmiSwitchRoutesState) -> Self {
        Self::AmiSwitchRoutes(s)
    }
}

impl From<EcsServiceSetupState> for DeploymentState {
    fn from(s: EcsServiceSetupState) -> Self {
        Self::EcsSetup(s)
    }
}

impl From<EcsServiceDeployState> for DeploymentState {
    fn from(s: EcsServiceDeployState) -> Self {
        Self::EcsDeploy(s)
    }
}

impl From<EcsServiceRollbackState> for DeploymentState {
    fn from(s: EcsServiceRollbackState) -> Self {
        Self::EcsRollback(s)
    }
}
