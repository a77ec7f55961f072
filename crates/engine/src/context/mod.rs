//! Context elements, the element stack and the per-phase execution context.

mod element;
mod execution;
mod stack;

pub use element::{
    ArtifactElement, ContextElement, ContextElementType, InstanceElement, ParamElement,
    PhaseElement, ServiceElement, WorkflowStandardParams,
};
pub use execution::ExecutionContext;
pub use stack::ContextElementStack;
