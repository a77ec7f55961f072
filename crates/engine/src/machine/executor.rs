//! Drives workflows through their states.
//!
//! Each workflow runs its states in sequence. A state that returns an
//! async response suspends the workflow until the wait-notify engine has
//! every correlation id it registered; the batch is then handed to
//! `handle_async_response` and the plan continues. Failed states consult
//! the workflow's failure strategies, which may retry the state, ignore
//! the failure, run the rollback plan or end the workflow.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::definition::{
    validation_message, PhaseDefinition, RollbackStrategy, WorkflowDefinition, ROLLBACK_ALL_PHASES,
};
use super::execution::{StateExecutionInstance, StatePhase, WorkflowExecution};
use crate::collaborators::{FeatureFlagService, FeatureName};
use crate::config::EngineConfig;
use crate::context::{ContextElement, ExecutionContext, PhaseElement, WorkflowStandardParams};
use crate::delegate::{DelegateResponseEnvelope, NotifyOutcome, ResponseData, WaitNotifyEngine};
use crate::error::{EngineError, EngineResult};
use crate::failure::{advise, FailureAdvice};
use crate::state::{AsyncResponses, ExecutionResponse, ExecutionStatus, FailureType, State};
use crate::template::ExpressionRenderer;

/// Input to [`StateMachineExecutor::start`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowRequest {
    pub params: WorkflowStandardParams,
    pub variables: BTreeMap<String, serde_json::Value>,
    pub pipeline_execution_id: Option<String>,
}

impl WorkflowRequest {
    pub fn new(params: WorkflowStandardParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_pipeline_execution_id(mut self, id: impl Into<String>) -> Self {
        self.pipeline_execution_id = Some(id.into());
        self
    }
}

/// Result of [`StateMachineExecutor::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Recorded; the owning state still waits for other ids.
    Pending,
    /// No state has claimed the id yet; the response is held for it.
    Buffered,
    /// The id belonged to a wait that already finished.
    Unclaimed,
    /// The owning state was resumed.
    Resumed { execution_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Forward,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    stage: Stage,
    pass: usize,
    state: usize,
}

impl Cursor {
    fn pass_key(&self) -> (Stage, usize) {
        (self.stage, self.pass)
    }
}

#[derive(Debug)]
struct Suspension {
    state_execution_id: String,
    deadline: DateTime<Utc>,
}

struct RunningWorkflow {
    definition: Arc<WorkflowDefinition>,
    request: WorkflowRequest,
    execution: WorkflowExecution,
    cursor: Cursor,
    /// Phase index per rollback pass; `None` is the all-phases-at-once pass.
    rollback_passes: Vec<Option<usize>>,
    context: Option<((Stage, usize), ExecutionContext)>,
    suspension: Option<Suspension>,
    /// Responses that completed the current state's batch while it was
    /// still registering.
    ready: Option<AsyncResponses>,
    next_retry_count: u32,
}

impl RunningWorkflow {
    fn pass_states(&self, stage: Stage, pass: usize) -> Option<&[Arc<dyn State>]> {
        match stage {
            Stage::Forward => self.definition.phases.get(pass).map(|p| p.states.as_slice()),
            Stage::Rollback => match *self.rollback_passes.get(pass)? {
                Some(phase) => self
                    .definition
                    .phases
                    .get(phase)
                    .map(|p| p.rollback_states.as_slice()),
                None => match &self.definition.rollback_strategy {
                    RollbackStrategy::AllPhasesAtOnce(states) => Some(states.as_slice()),
                    RollbackStrategy::PerPhase => Some(&[][..]),
                },
            },
        }
    }

    fn pass_phase(&self) -> Option<&PhaseDefinition> {
        match self.cursor.stage {
            Stage::Forward => self.definition.phases.get(self.cursor.pass),
            Stage::Rollback => self
                .rollback_passes
                .get(self.cursor.pass)
                .copied()
                .flatten()
                .and_then(|phase| self.definition.phases.get(phase)),
        }
    }

    /// State under the cursor, skipping exhausted passes.
    fn current_state(&mut self) -> Option<Arc<dyn State>> {
        loop {
            let states = self.pass_states(self.cursor.stage, self.cursor.pass)?;
            if let Some(state) = states.get(self.cursor.state) {
                return Some(state.clone());
            }
            self.cursor.pass += 1;
            self.cursor.state = 0;
            self.next_retry_count = 0;
        }
    }

    fn advance_state(&mut self) {
        self.cursor.state += 1;
        self.next_retry_count = 0;
    }

    fn current_instance_mut(&mut self) -> Option<&mut StateExecutionInstance> {
        self.execution.state_executions.last_mut()
    }

    fn begin_rollback(&mut self) -> bool {
        let passes: Vec<Option<usize>> = match &self.definition.rollback_strategy {
            RollbackStrategy::AllPhasesAtOnce(states) if !states.is_empty() => vec![None],
            RollbackStrategy::AllPhasesAtOnce(_) => Vec::new(),
            RollbackStrategy::PerPhase => (0..=self.cursor.pass)
                .rev()
                .filter(|&i| {
                    self.definition
                        .phases
                        .get(i)
                        .is_some_and(|p| !p.rollback_states.is_empty())
                })
                .map(Some)
                .collect(),
        };
        self.execution.rollback_triggered = true;
        if passes.is_empty() {
            return false;
        }
        self.rollback_passes = passes;
        self.cursor = Cursor {
            stage: Stage::Rollback,
            pass: 0,
            state: 0,
        };
        self.next_retry_count = 0;
        true
    }

    fn finish(&mut self, status: ExecutionStatus, message: Option<String>) {
        self.execution.status = status;
        if message.is_some() {
            self.execution.error_message = message;
        }
        self.execution.ended_at = Some(Utc::now());
        self.suspension = None;
        self.ready = None;
    }
}

/// Runs workflow definitions and routes delegate results back to them.
pub struct StateMachineExecutor {
    config: EngineConfig,
    wait_notify: Arc<WaitNotifyEngine>,
    feature_flags: Arc<dyn FeatureFlagService>,
    renderer: Arc<dyn ExpressionRenderer>,
    workflows: Mutex<HashMap<String, Arc<Mutex<RunningWorkflow>>>>,
    /// Suspended state execution id to workflow execution id.
    waiting: Mutex<HashMap<String, String>>,
}

impl StateMachineExecutor {
    pub fn new(
        config: EngineConfig,
        feature_flags: Arc<dyn FeatureFlagService>,
        renderer: Arc<dyn ExpressionRenderer>,
    ) -> Self {
        Self {
            config,
            wait_notify: Arc::new(WaitNotifyEngine::new()),
            feature_flags,
            renderer,
            workflows: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
        }
    }

    pub fn wait_notify(&self) -> &Arc<WaitNotifyEngine> {
        &self.wait_notify
    }

    /// Validate and start `definition`. Runs until the first suspension or
    /// the end of the plan and returns the workflow execution id.
    pub async fn start(
        &self,
        definition: Arc<WorkflowDefinition>,
        request: WorkflowRequest,
    ) -> EngineResult<String> {
        if request.params.app_id.is_empty() {
            return Err(EngineError::invalid_request("Workflow request has no app id"));
        }

        let execution_id = Uuid::new_v4().to_string();
        let execution = WorkflowExecution {
            execution_id: execution_id.clone(),
            workflow_name: definition.name.clone(),
            app_id: request.params.app_id.clone(),
            account_id: request.params.account_id.clone(),
            status: ExecutionStatus::Running,
            error_message: None,
            rollback_triggered: false,
            state_executions: Vec::new(),
            created_at: Utc::now(),
            ended_at: None,
        };

        let problems = definition.validate();
        let mut workflow = RunningWorkflow {
            definition,
            request,
            execution,
            cursor: Cursor {
                stage: Stage::Forward,
                pass: 0,
                state: 0,
            },
            rollback_passes: Vec::new(),
            context: None,
            suspension: None,
            ready: None,
            next_retry_count: 0,
        };

        if !problems.is_empty() {
            let message = validation_message(&problems);
            warn!(execution_id = %execution_id, message = %message, "Workflow failed validation");
            workflow.finish(ExecutionStatus::Failed, Some(message));
        }

        let handle = Arc::new(Mutex::new(workflow));
        self.workflows
            .lock()
            .await
            .insert(execution_id.clone(), handle.clone());

        if problems.is_empty() {
            info!(execution_id = %execution_id, "Starting workflow");
            let mut workflow = handle.lock().await;
            self.run(&mut workflow).await;
        }

        Ok(execution_id)
    }

    /// Route one delegate result to its waiting state.
    pub async fn deliver(
        &self,
        correlation_id: &str,
        response: ResponseData,
    ) -> EngineResult<DeliveryOutcome> {
        let (state_execution_id, responses) = match self.wait_notify.notify(correlation_id, response).await {
            NotifyOutcome::Pending => return Ok(DeliveryOutcome::Pending),
            NotifyOutcome::Buffered => return Ok(DeliveryOutcome::Buffered),
            NotifyOutcome::Unclaimed => return Ok(DeliveryOutcome::Unclaimed),
            NotifyOutcome::Ready {
                state_execution_id,
                responses,
            } => (state_execution_id, responses),
        };

        let execution_id = self
            .waiting
            .lock()
            .await
            .remove(&state_execution_id)
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "State execution {} completed its wait but has no workflow",
                    state_execution_id
                ))
            })?;

        let handle = self.handle(&execution_id).await?;
        let mut workflow = handle.lock().await;
        match &workflow.suspension {
            Some(s) if s.state_execution_id == state_execution_id => {}
            _ => {
                warn!(
                    execution_id = %execution_id,
                    state_execution_id = %state_execution_id,
                    "Responses arrived for a state that is no longer suspended"
                );
                return Ok(DeliveryOutcome::Unclaimed);
            }
        }
        workflow.suspension = None;

        self.resume(&mut workflow, responses).await;
        self.run(&mut workflow).await;

        Ok(DeliveryOutcome::Resumed { execution_id })
    }

    /// Deliver every envelope from `responses` until the stream ends.
    pub async fn run_response_loop(&self, responses: impl Stream<Item = DelegateResponseEnvelope>) {
        futures::pin_mut!(responses);
        while let Some(envelope) = responses.next().await {
            match self
                .deliver(&envelope.correlation_id, envelope.response)
                .await
            {
                Ok(outcome) => {
                    debug!(correlation_id = %envelope.correlation_id, outcome = ?outcome, "Delegate response delivered")
                }
                Err(e) => {
                    error!(correlation_id = %envelope.correlation_id, error = %e, "Failed to deliver delegate response")
                }
            }
        }
    }

    /// Time out every suspended state whose deadline is at or before `now`.
    /// Returns the expired state execution ids.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<String> {
        let purged = self
            .wait_notify
            .purge(shift_back(now, self.config.response_retention_secs))
            .await;
        if purged > 0 {
            debug!(purged = purged, "Dropped stale correlation entries");
        }

        let handles: Vec<_> = self.workflows.lock().await.values().cloned().collect();
        let mut expired = Vec::new();

        for handle in handles {
            let mut workflow = handle.lock().await;
            let state_execution_id = match &workflow.suspension {
                Some(s) if s.deadline <= now => s.state_execution_id.clone(),
                _ => continue,
            };
            workflow.suspension = None;
            self.release_waiter(&state_execution_id).await;

            if let Some(state) = workflow.current_state() {
                let (key, mut ctx) = self.take_context(&mut workflow);
                state.handle_abort_event(&mut ctx).await;
                workflow.context = Some((key, ctx));

                warn!(
                    execution_id = %workflow.execution.execution_id,
                    state = %state.name(),
                    state_execution_id = %state_execution_id,
                    "State expired waiting for delegate responses"
                );
                if let Some(instance) = workflow.current_instance_mut() {
                    instance.status = ExecutionStatus::Failed;
                    instance.failure_types.insert(FailureType::Timeout);
                    instance.error_message = Some(format!(
                        "State '{}' timed out waiting for delegate responses",
                        state.name()
                    ));
                    instance.ended_at = Some(now);
                }
            }

            self.handle_failure(&mut workflow).await;
            self.run(&mut workflow).await;
            expired.push(state_execution_id);
        }

        expired
    }

    /// Abort a workflow. The outstanding state, if any, gets its advisory
    /// abort callback.
    pub async fn abort(&self, execution_id: &str) -> EngineResult<()> {
        let handle = self.handle(execution_id).await?;
        let mut workflow = handle.lock().await;
        if workflow.execution.status.is_final() {
            return Ok(());
        }

        if let Some(suspension) = workflow.suspension.take() {
            self.release_waiter(&suspension.state_execution_id).await;
            if let Some(state) = workflow.current_state() {
                let (key, mut ctx) = self.take_context(&mut workflow);
                state.handle_abort_event(&mut ctx).await;
                workflow.context = Some((key, ctx));
            }
            if let Some(instance) = workflow.current_instance_mut() {
                instance.status = ExecutionStatus::Aborted;
                instance.ended_at = Some(Utc::now());
            }
        }

        info!(execution_id = %execution_id, "Workflow aborted");
        workflow.finish(ExecutionStatus::Aborted, Some("Workflow aborted".to_string()));
        Ok(())
    }

    /// Spawn a task calling [`expire_overdue`](Self::expire_overdue) every `interval`.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let expired = executor.expire_overdue(Utc::now()).await;
                if !expired.is_empty() {
                    info!(count = expired.len(), "Expired overdue states");
                }
            }
        })
    }

    /// Snapshot of a workflow execution.
    pub async fn execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        let handle = self.workflows.lock().await.get(execution_id).cloned()?;
        let workflow = handle.lock().await;
        Some(workflow.execution.clone())
    }

    async fn handle(&self, execution_id: &str) -> EngineResult<Arc<Mutex<RunningWorkflow>>> {
        self.workflows
            .lock()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("No workflow execution with id: {} found", execution_id)))
    }

    async fn release_waiter(&self, state_execution_id: &str) {
        self.wait_notify.cancel(state_execution_id).await;
        self.waiting.lock().await.remove(state_execution_id);
    }

    async fn run(&self, workflow: &mut RunningWorkflow) {
        loop {
            if workflow.execution.status.is_final() {
                return;
            }
            if let Some(responses) = workflow.ready.take() {
                self.resume(workflow, responses).await;
                continue;
            }
            if workflow.suspension.is_some() {
                return;
            }
            match workflow.current_state() {
                Some(state) => self.execute_state(workflow, state).await,
                None => {
                    self.complete(workflow);
                    return;
                }
            }
        }
    }

    fn complete(&self, workflow: &mut RunningWorkflow) {
        match workflow.cursor.stage {
            Stage::Forward => {
                info!(execution_id = %workflow.execution.execution_id, "Workflow succeeded");
                workflow.finish(ExecutionStatus::Success, None);
            }
            Stage::Rollback => {
                info!(execution_id = %workflow.execution.execution_id, "Workflow rolled back");
                workflow.finish(ExecutionStatus::Failed, None);
            }
        }
    }

    /// Context for the current pass, built fresh when the pass changed.
    fn take_context(&self, workflow: &mut RunningWorkflow) -> ((Stage, usize), ExecutionContext) {
        let key = workflow.cursor.pass_key();
        match workflow.context.take() {
            Some((k, ctx)) if k == key => (key, ctx),
            _ => (key, self.fresh_context(workflow)),
        }
    }

    fn fresh_context(&self, workflow: &RunningWorkflow) -> ExecutionContext {
        let params = &workflow.request.params;
        let mut ctx = ExecutionContext::new(
            &params.app_id,
            &params.account_id,
            &workflow.execution.execution_id,
            self.renderer.clone(),
        )
        .with_variables(workflow.request.variables.clone());
        if let Some(pipeline) = &workflow.request.pipeline_execution_id {
            ctx = ctx.with_pipeline_execution_id(pipeline);
        }

        ctx.push_context_element(ContextElement::Standard(params.clone()));
        let rollback = workflow.cursor.stage == Stage::Rollback;
        match workflow.pass_phase() {
            Some(phase) => {
                ctx.push_context_element(ContextElement::Phase(PhaseElement {
                    uuid: phase.uuid.clone(),
                    phase_name: phase.name.clone(),
                    service_element: phase.service.clone(),
                    infra_mapping_id: phase.infra_mapping_id.clone(),
                    rollback,
                }));
                if let Some(service) = &phase.service {
                    ctx.push_context_element(ContextElement::Service(service.clone()));
                }
            }
            None if rollback => {
                ctx.push_context_element(ContextElement::Phase(PhaseElement {
                    uuid: workflow.execution.execution_id.clone(),
                    phase_name: ROLLBACK_ALL_PHASES.to_string(),
                    rollback: true,
                    ..Default::default()
                }));
            }
            None => {}
        }
        ctx
    }

    async fn execute_state(&self, workflow: &mut RunningWorkflow, state: Arc<dyn State>) {
        let (key, mut ctx) = self.take_context(workflow);

        let instance = StateExecutionInstance {
            uuid: Uuid::new_v4().to_string(),
            state_name: state.name().to_string(),
            state_type: state.state_type().to_string(),
            phase_name: ctx.phase_element().map(|p| p.phase_name.clone()),
            rollback: workflow.cursor.stage == Stage::Rollback,
            status: ExecutionStatus::Running,
            phase: StatePhase::Executing,
            expires_at: None,
            retry_count: workflow.next_retry_count,
            error_message: None,
            failure_types: BTreeSet::new(),
            state_execution_data: None,
            delegate_task_id: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        ctx.set_state_execution(&instance.uuid, state.name());

        info!(
            execution_id = %workflow.execution.execution_id,
            state = %state.name(),
            state_type = %state.state_type(),
            state_execution_id = %instance.uuid,
            retry_count = instance.retry_count,
            "Executing state"
        );
        workflow.execution.state_executions.push(instance);

        match state.execute(&mut ctx).await {
            Ok(response) => self.apply_response(workflow, state.as_ref(), &mut ctx, response).await,
            Err(e) => self.fail_on_contract_violation(workflow, state.as_ref(), &ctx, e),
        }

        workflow.context = Some((key, ctx));
    }

    async fn resume(&self, workflow: &mut RunningWorkflow, responses: AsyncResponses) {
        let Some(state) = workflow.current_state() else {
            return;
        };
        let (key, mut ctx) = self.take_context(workflow);

        let notify_error = responses.values().find_map(|r| match r {
            ResponseData::ErrorNotify(notify) => Some(notify.error_message.clone()),
            ResponseData::Delegate(_) => None,
        });

        if let Some(message) = notify_error {
            warn!(
                execution_id = %workflow.execution.execution_id,
                state = %state.name(),
                error = %message,
                "Delegate fabric reported an error"
            );
            if let Some(instance) = workflow.current_instance_mut() {
                instance.status = ExecutionStatus::Error;
                instance.error_message = Some(message);
                instance.failure_types.insert(FailureType::DelegateProvisioning);
                instance.ended_at = Some(Utc::now());
            }
            workflow.context = Some((key, ctx));
            self.handle_failure(workflow).await;
            return;
        }

        if let Some(instance) = workflow.current_instance_mut() {
            instance.phase = StatePhase::Resumed;
        }
        debug!(
            execution_id = %workflow.execution.execution_id,
            state = %state.name(),
            responses = responses.len(),
            "Resuming state"
        );

        match state.handle_async_response(&mut ctx, &responses).await {
            Ok(response) => self.apply_response(workflow, state.as_ref(), &mut ctx, response).await,
            Err(e) => self.fail_on_contract_violation(workflow, state.as_ref(), &ctx, e),
        }

        workflow.context = Some((key, ctx));
    }

    async fn apply_response(
        &self,
        workflow: &mut RunningWorkflow,
        state: &dyn State,
        ctx: &mut ExecutionContext,
        response: ExecutionResponse,
    ) {
        if response.is_async {
            self.suspend(workflow, state, ctx, response).await;
            return;
        }

        for element in &response.context_elements {
            ctx.push_context_element(element.clone());
        }

        let mut status = response.execution_status;
        let mut error_message = response.error_message;
        if !status.is_final() {
            status = ExecutionStatus::Error;
            error_message = Some(format!(
                "State '{}' returned non-terminal status {} synchronously",
                state.name(),
                response.execution_status
            ));
        }

        info!(
            execution_id = %workflow.execution.execution_id,
            state = %state.name(),
            status = %status,
            "State finished"
        );

        if let Some(instance) = workflow.current_instance_mut() {
            instance.status = status;
            instance.error_message = error_message.clone();
            instance.failure_types.extend(response.failure_types);
            if response.state_execution_data.is_some() {
                instance.state_execution_data = response.state_execution_data;
            }
            if response.delegate_task_id.is_some() {
                instance.delegate_task_id = response.delegate_task_id;
            }
            instance.ended_at = Some(Utc::now());
        }

        if status.is_positive() {
            workflow.advance_state();
        } else if status == ExecutionStatus::Aborted {
            workflow.finish(ExecutionStatus::Aborted, error_message);
        } else {
            self.handle_failure(workflow).await;
        }
    }

    async fn suspend(
        &self,
        workflow: &mut RunningWorkflow,
        state: &dyn State,
        ctx: &ExecutionContext,
        response: ExecutionResponse,
    ) {
        let state_execution_id = ctx.state_execution_instance_id().to_string();

        let registration = if response.correlation_ids.is_empty() {
            Err(EngineError::invalid_request(format!(
                "State '{}' returned an async response without correlation ids",
                state.name()
            )))
        } else {
            // Known before the wait exists, so a batch completed by a
            // concurrent delivery always finds its workflow.
            self.waiting.lock().await.insert(
                state_execution_id.clone(),
                workflow.execution.execution_id.clone(),
            );
            self.wait_notify
                .wait_for_all(&state_execution_id, &response.correlation_ids)
                .await
        };

        let registered = match registration {
            Ok(outcome) => outcome,
            Err(e) => {
                self.waiting.lock().await.remove(&state_execution_id);
                error!(
                    execution_id = %workflow.execution.execution_id,
                    state = %state.name(),
                    error = %e,
                    "State is misconfigured for async execution"
                );
                if let Some(instance) = workflow.current_instance_mut() {
                    instance.status = ExecutionStatus::Error;
                    instance.error_message = Some(e.to_string());
                    instance.ended_at = Some(Utc::now());
                }
                self.handle_failure(workflow).await;
                return;
            }
        };

        let timeout = state
            .timeout_millis(ctx)
            .unwrap_or(self.config.default_state_timeout_millis);
        let deadline = deadline_after(Utc::now(), timeout);

        if let Some(instance) = workflow.current_instance_mut() {
            instance.status = ExecutionStatus::Running;
            instance.phase = StatePhase::Dispatched {
                correlation_ids: response.correlation_ids.clone(),
            };
            instance.expires_at = Some(deadline);
            if response.state_execution_data.is_some() {
                instance.state_execution_data = response.state_execution_data;
            }
            if response.delegate_task_id.is_some() {
                instance.delegate_task_id = response.delegate_task_id;
            }
        }

        if let NotifyOutcome::Ready { responses, .. } = registered {
            self.waiting.lock().await.remove(&state_execution_id);
            info!(
                execution_id = %workflow.execution.execution_id,
                state = %state.name(),
                "Delegate responses arrived before the state suspended"
            );
            workflow.ready = Some(responses);
            return;
        }

        info!(
            execution_id = %workflow.execution.execution_id,
            state = %state.name(),
            correlation_ids = ?response.correlation_ids,
            timeout_millis = timeout,
            "State suspended"
        );
        workflow.suspension = Some(Suspension {
            state_execution_id,
            deadline,
        });
    }

    fn fail_on_contract_violation(
        &self,
        workflow: &mut RunningWorkflow,
        state: &dyn State,
        ctx: &ExecutionContext,
        err: EngineError,
    ) {
        let err = err.in_state(state.name(), ctx.phase_element().map(|p| p.phase_name.clone()));
        error!(
            execution_id = %workflow.execution.execution_id,
            state = %state.name(),
            error = %err,
            "State raised a contract violation"
        );
        let message = err.to_string();
        if let Some(instance) = workflow.current_instance_mut() {
            instance.status = ExecutionStatus::Error;
            instance.error_message = Some(message.clone());
            instance.ended_at = Some(Utc::now());
        }
        workflow.finish(ExecutionStatus::Failed, Some(message));
    }

    async fn handle_failure(&self, workflow: &mut RunningWorkflow) {
        let Some(instance) = workflow.execution.state_executions.last() else {
            return;
        };
        let state_name = instance.state_name.clone();
        let failure_types = instance.failure_types.clone();
        let retry_count = instance.retry_count;
        let message = instance
            .error_message
            .clone()
            .unwrap_or_else(|| format!("State '{}' failed", state_name));

        if workflow.cursor.stage == Stage::Rollback {
            error!(
                execution_id = %workflow.execution.execution_id,
                state = %state_name,
                "Rollback state failed"
            );
            workflow.finish(
                ExecutionStatus::Failed,
                Some(format!("Rollback state '{}' failed: {}", state_name, message)),
            );
            return;
        }

        let timeout_support = self
            .feature_flags
            .is_enabled(FeatureName::TimeoutFailureSupport, &workflow.execution.account_id)
            .await;
        let advice = advise(
            &workflow.definition.failure_strategies,
            &failure_types,
            retry_count,
            timeout_support,
        );

        info!(
            execution_id = %workflow.execution.execution_id,
            state = %state_name,
            advice = ?advice,
            "Failure strategy applied"
        );

        match advice {
            FailureAdvice::Retry { attempt } => workflow.next_retry_count = attempt,
            FailureAdvice::Ignore => workflow.advance_state(),
            FailureAdvice::Rollback => {
                workflow.execution.error_message = Some(message);
                if !workflow.begin_rollback() {
                    workflow.finish(ExecutionStatus::Failed, None);
                }
            }
            FailureAdvice::Abort => workflow.finish(ExecutionStatus::Aborted, Some(message)),
            FailureAdvice::Fail => workflow.finish(ExecutionStatus::Failed, Some(message)),
        }
    }
}

/// `now` plus `timeout_millis`, saturating at the latest representable instant.
fn deadline_after(now: DateTime<Utc>, timeout_millis: u64) -> DateTime<Utc> {
    i64::try_from(timeout_millis)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn shift_back(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
