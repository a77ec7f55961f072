//! Workflow definitions, execution snapshots and the state machine executor.

mod definition;
mod execution;
mod executor;

pub use definition::{
    validation_message, PhaseDefinition, RollbackStrategy, WorkflowDefinition, ROLLBACK_ALL_PHASES,
};
pub use execution::{StateExecutionInstance, StatePhase, WorkflowExecution};
pub use executor::{DeliveryOutcome, StateMachineExecutor, WorkflowRequest};
