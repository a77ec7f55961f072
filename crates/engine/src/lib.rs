//! Conveyor Engine Library
//!
//! The execution core of the Conveyor deployment orchestrator:
//!
//! - **Context**: typed context elements stacked per phase, with expression rendering
//! - **Sweeping outputs**: scope-qualified values shared across phases and rollback passes
//! - **Delegates**: task dispatch to the remote fabric and correlation of its responses
//! - **States**: the execution contract every deployment step implements
//! - **State machine**: runs workflows, suspends on async work, resumes, expires and rolls back
//! - **Failures**: classification of delegate results and failure strategy advice
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`context`]: Context elements and the execution context
//! - [`delegate`]: Delegate tasks, responses, wait-notify and the NATS transport
//! - [`error`]: Engine error types
//! - [`machine`]: Workflow definitions and the executor
//! - [`sweeping`]: Sweeping output store (in-memory and Postgres)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conveyor_engine::{
//!     collaborators::InMemoryFeatureFlagService,
//!     config::EngineConfig,
//!     machine::{StateMachineExecutor, WorkflowDefinition, WorkflowRequest},
//!     template::JinjaExpressionRenderer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::load()?;
//!     conveyor_engine::telemetry::init_tracing(config.log_json);
//!     let sweep = config.expiry_sweep_interval();
//!     let executor = Arc::new(StateMachineExecutor::new(
//!         config,
//!         Arc::new(InMemoryFeatureFlagService::new()),
//!         Arc::new(JinjaExpressionRenderer::new()),
//!     ));
//!     executor.spawn_expiry_sweeper(sweep);
//!     // ... build a WorkflowDefinition and call executor.start(..)
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod failure;
pub mod machine;
pub mod result_ext;
pub mod state;
pub mod sweeping;
pub mod telemetry;
pub mod template;

pub use error::{EngineError, EngineResult};
pub use machine::{StateMachineExecutor, WorkflowDefinition, WorkflowRequest};
pub use state::{ExecutionResponse, ExecutionStatus, FailureType, State};
