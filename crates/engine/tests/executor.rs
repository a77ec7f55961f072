//! End-to-end behaviour of the state machine executor with scripted states.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use conveyor_engine::collaborators::{FeatureName, InMemoryFeatureFlagService};
use conveyor_engine::config::EngineConfig;
use conveyor_engine::context::{
    ContextElement, ContextElementType, ExecutionContext, InstanceElement, WorkflowStandardParams,
};
use conveyor_engine::delegate::{
    CommandExecutionStatus, DelegateMetaInfo, DelegateResponseEnvelope, DelegateTaskResponse,
    NotifyOutcome, ResponseData, WaitNotifyEngine,
};
use conveyor_engine::failure::{classify_delegate_response, FailureAction, FailureStrategy};
use conveyor_engine::machine::{
    DeliveryOutcome, PhaseDefinition, StateMachineExecutor, StatePhase, WorkflowDefinition,
    WorkflowRequest, ROLLBACK_ALL_PHASES,
};
use conveyor_engine::state::{
    require_response, AsyncResponses, ExecutionResponse, ExecutionStatus, FailureType, State,
};
use conveyor_engine::template::JinjaExpressionRenderer;
use conveyor_engine::{EngineError, EngineResult};

type Journal = Arc<Mutex<Vec<String>>>;

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn record(journal: &Journal, name: &str, ctx: &ExecutionContext) {
    let phase = ctx
        .phase_element()
        .map(|p| p.phase_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let suffix = if ctx.is_rollback() { " (rollback)" } else { "" };
    journal
        .lock()
        .unwrap()
        .push(format!("{}@{}{}", name, phase, suffix));
}

/// Returns queued responses in order, then succeeds.
struct Scripted {
    name: String,
    script: Mutex<VecDeque<ExecutionResponse>>,
    journal: Journal,
}

impl Scripted {
    fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Self::with_script(name, journal, Vec::new())
    }

    fn with_script(name: &str, journal: &Journal, script: Vec<ExecutionResponse>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            journal: journal.clone(),
        })
    }
}

#[async_trait]
impl State for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        "SCRIPTED"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        record(&self.journal, &self.name, ctx);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ExecutionResponse::success))
    }
}

/// Dispatches one delegate task per execution.
struct Dispatching {
    name: String,
    timeout_millis: Option<u64>,
    correlation_ids: Journal,
    resumes: AtomicUsize,
    aborts: AtomicUsize,
}

impl Dispatching {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            timeout_millis: None,
            correlation_ids: journal(),
            resumes: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        })
    }

    fn with_timeout(name: &str, timeout_millis: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            timeout_millis: Some(timeout_millis),
            correlation_ids: journal(),
            resumes: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        })
    }

    fn last_correlation_id(&self) -> String {
        self.correlation_ids.lock().unwrap().last().cloned().unwrap()
    }
}

fn task_id(ctx: &ExecutionContext) -> String {
    format!("{}-task", ctx.state_execution_instance_id())
}

#[async_trait]
impl State for Dispatching {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        "ECS_SERVICE_DEPLOY"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let id = task_id(ctx);
        self.correlation_ids.lock().unwrap().push(id.clone());
        Ok(ExecutionResponse::builder()
            .status(ExecutionStatus::Running)
            .is_async(true)
            .correlation_id(id.clone())
            .delegate_task_id(format!("delegate-{}", id))
            .build())
    }

    async fn handle_async_response(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        let response = require_response(responses, &task_id(ctx))?;
        Ok(classify_delegate_response(response, "ECS_COMMAND"))
    }

    async fn handle_abort_event(&self, _ctx: &mut ExecutionContext) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn timeout_millis(&self, _ctx: &ExecutionContext) -> Option<u64> {
        self.timeout_millis
    }
}

/// Its delegate answers before `execute` hands back the correlation id.
struct AnsweredEarly {
    wait_notify: Arc<WaitNotifyEngine>,
    outcomes: Mutex<Vec<NotifyOutcome>>,
}

#[async_trait]
impl State for AnsweredEarly {
    fn name(&self) -> &str {
        "Deploy"
    }

    fn state_type(&self) -> &str {
        "ECS_SERVICE_DEPLOY"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let id = task_id(ctx);
        let outcome = self.wait_notify.notify(&id, delegate_success()).await;
        self.outcomes.lock().unwrap().push(outcome);
        Ok(ExecutionResponse::async_on(vec![id]))
    }

    async fn handle_async_response(
        &self,
        ctx: &mut ExecutionContext,
        responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        let response = require_response(responses, &task_id(ctx))?;
        Ok(classify_delegate_response(response, "ECS_COMMAND"))
    }
}

/// Raises a contract violation.
struct Broken;

#[async_trait]
impl State for Broken {
    fn name(&self) -> &str {
        "Broken Step"
    }

    fn state_type(&self) -> &str {
        "BROKEN"
    }

    async fn execute(&self, _ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        Err(EngineError::invalid_request("activity id is missing"))
    }
}

/// Fails field validation.
struct Incomplete;

#[async_trait]
impl State for Incomplete {
    fn name(&self) -> &str {
        "Deploy Service"
    }

    fn state_type(&self) -> &str {
        "AWS_AMI_SERVICE_DEPLOY"
    }

    async fn execute(&self, _ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        Ok(ExecutionResponse::success())
    }

    fn validate_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "instanceCount".to_string(),
            "Instance count must be greater than 0".to_string(),
        )])
    }
}

/// Pushes an instance element onto its context.
struct InstanceWriter;

#[async_trait]
impl State for InstanceWriter {
    fn name(&self) -> &str {
        "Provision"
    }

    fn state_type(&self) -> &str {
        "PROVISION"
    }

    async fn execute(&self, _ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        Ok(ExecutionResponse::builder()
            .status(ExecutionStatus::Success)
            .context_element(ContextElement::Instance(InstanceElement {
                uuid: "i-1".to_string(),
                host_name: "ip-10-0-0-1".to_string(),
                display_name: None,
            }))
            .build())
    }
}

/// Records whether an instance element is visible.
struct InstanceReader {
    name: String,
    seen: Arc<Mutex<Vec<bool>>>,
}

#[async_trait]
impl State for InstanceReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> &str {
        "VERIFY"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse> {
        let visible = ctx
            .get_context_element(ContextElementType::Instance, None)
            .is_some();
        self.seen.lock().unwrap().push(visible);
        Ok(ExecutionResponse::success())
    }
}

fn executor_with_flags(flags: Arc<InMemoryFeatureFlagService>) -> StateMachineExecutor {
    StateMachineExecutor::new(
        EngineConfig::default(),
        flags,
        Arc::new(JinjaExpressionRenderer::new()),
    )
}

fn executor() -> StateMachineExecutor {
    executor_with_flags(Arc::new(InMemoryFeatureFlagService::new()))
}

fn request() -> WorkflowRequest {
    WorkflowRequest::new(WorkflowStandardParams {
        app_id: "app-1".to_string(),
        app_name: "orders".to_string(),
        env_id: "env-1".to_string(),
        env_name: "prod".to_string(),
        env_type: "PROD".to_string(),
        account_id: "acc-1".to_string(),
        workflow_name: "deploy-orders".to_string(),
        artifact_ids: Vec::new(),
    })
}

fn delegate_success() -> ResponseData {
    ResponseData::Delegate(
        DelegateTaskResponse::new(CommandExecutionStatus::Success).with_meta_info(DelegateMetaInfo {
            id: "delegate-7".to_string(),
            host_name: "runner-7".to_string(),
        }),
    )
}

fn delegate_timeout() -> ResponseData {
    ResponseData::Delegate(DelegateTaskResponse::failure("deadline exceeded").with_timeout_failure(true))
}

#[tokio::test]
async fn test_sync_states_run_to_success() {
    let log = journal();
    let definition = WorkflowDefinition::new("deploy-orders").phase(
        PhaseDefinition::new("ph-1", "Phase 1")
            .state(Scripted::new("Setup", &log))
            .state(Scripted::new("Deploy", &log)),
    );

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.state_executions.len(), 2);
    assert!(execution
        .state_executions
        .iter()
        .all(|s| s.status == ExecutionStatus::Success && s.phase_name.as_deref() == Some("Phase 1")));
    assert_eq!(entries(&log), vec!["Setup@Phase 1", "Deploy@Phase 1"]);
}

#[tokio::test]
async fn test_async_state_suspends_and_resumes() {
    let log = journal();
    let deploy = Dispatching::new("Deploy");
    let definition = WorkflowDefinition::new("deploy-orders").phase(
        PhaseDefinition::new("ph-1", "Phase 1")
            .state(deploy.clone())
            .state(Scripted::new("Verify", &log)),
    );

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();

    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    let instance = execution.state_execution("Deploy").unwrap();
    let correlation_id = deploy.last_correlation_id();
    assert_eq!(instance.correlation_ids(), &[correlation_id.clone()]);
    assert!(instance.expires_at.is_some());
    assert!(entries(&log).is_empty());

    let outcome = executor
        .deliver(&correlation_id, delegate_success())
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Resumed { execution_id: id.clone() });

    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    let instance = execution.state_execution("Deploy").unwrap();
    assert_eq!(instance.phase, StatePhase::Resumed);
    assert_eq!(
        instance.delegate_task_id.as_deref(),
        Some(format!("delegate-{}", correlation_id).as_str())
    );
    let data = instance.state_execution_data.as_ref().unwrap();
    assert_eq!(data["delegateMetaInfo"]["hostName"], json!("runner-7"));
    assert_eq!(deploy.resumes.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["Verify@Phase 1"]);
}

#[tokio::test]
async fn test_unregistered_correlation_id_is_buffered() {
    let executor = executor();
    let outcome = executor
        .deliver("nobody-waits-yet", delegate_success())
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Buffered);
}

#[tokio::test]
async fn test_response_before_suspension_resumes_state() {
    let log = journal();
    let executor = executor();
    let deploy = Arc::new(AnsweredEarly {
        wait_notify: executor.wait_notify().clone(),
        outcomes: Mutex::new(Vec::new()),
    });
    let definition = WorkflowDefinition::new("deploy-orders").phase(
        PhaseDefinition::new("ph-1", "Phase 1")
            .state(deploy.clone())
            .state(Scripted::new("Verify", &log)),
    );

    let id = executor.start(Arc::new(definition), request()).await.unwrap();

    assert_eq!(*deploy.outcomes.lock().unwrap(), vec![NotifyOutcome::Buffered]);
    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    let instance = execution.state_execution("Deploy").unwrap();
    assert_eq!(instance.status, ExecutionStatus::Success);
    assert_eq!(instance.phase, StatePhase::Resumed);
    assert_eq!(entries(&log), vec!["Verify@Phase 1"]);
}

#[tokio::test]
async fn test_unbounded_timeout_never_expires() {
    let deploy = Dispatching::with_timeout("Deploy", u64::MAX);
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(deploy.clone()));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();

    let execution = executor.execution(&id).await.unwrap();
    let instance = execution.state_execution("Deploy").unwrap();
    assert_eq!(instance.expires_at, Some(DateTime::<Utc>::MAX_UTC));
    assert!(executor
        .expire_overdue(Utc::now() + Duration::days(365))
        .await
        .is_empty());

    let outcome = executor
        .deliver(&deploy.last_correlation_id(), delegate_success())
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Resumed { execution_id: id.clone() });
    assert_eq!(
        executor.execution(&id).await.unwrap().status,
        ExecutionStatus::Success
    );
}

#[tokio::test]
async fn test_error_notify_fails_without_resuming() {
    let deploy = Dispatching::new("Deploy");
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(deploy.clone()));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    executor
        .deliver(
            &deploy.last_correlation_id(),
            ResponseData::error_notify("No eligible delegates"),
        )
        .await
        .unwrap();

    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let instance = execution.state_execution("Deploy").unwrap();
    assert_eq!(instance.status, ExecutionStatus::Error);
    assert_eq!(instance.error_message.as_deref(), Some("No eligible delegates"));
    assert!(instance.failure_types.contains(&FailureType::DelegateProvisioning));
    assert_eq!(deploy.resumes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overdue_state_expires_with_timeout() {
    let deploy = Dispatching::with_timeout("Deploy", 1_000);
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(deploy.clone()));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();

    assert!(executor.expire_overdue(Utc::now()).await.is_empty());

    let expired = executor
        .expire_overdue(Utc::now() + Duration::seconds(5))
        .await;
    assert_eq!(expired.len(), 1);
    assert_eq!(deploy.aborts.load(Ordering::SeqCst), 1);

    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let instance = execution.state_execution("Deploy").unwrap();
    assert_eq!(instance.status, ExecutionStatus::Failed);
    assert!(instance.failure_types.contains(&FailureType::Timeout));

    let late = executor
        .deliver(&deploy.last_correlation_id(), delegate_success())
        .await
        .unwrap();
    assert_eq!(late, DeliveryOutcome::Unclaimed);
}

#[tokio::test]
async fn test_timeout_strategy_needs_feature_flag() {
    let definition = || {
        Arc::new(
            WorkflowDefinition::new("deploy-orders")
                .phase(PhaseDefinition::new("ph-1", "Phase 1").state(Dispatching::new("Deploy")))
                .failure_strategy(FailureStrategy::new(FailureAction::Ignore).on(FailureType::Timeout)),
        )
    };

    async fn run(executor: &StateMachineExecutor, definition: Arc<WorkflowDefinition>) -> ExecutionStatus {
        let id = executor.start(definition, request()).await.unwrap();
        let execution = executor.execution(&id).await.unwrap();
        let correlation_id = execution.state_execution("Deploy").unwrap().correlation_ids()[0].clone();
        executor.deliver(&correlation_id, delegate_timeout()).await.unwrap();
        executor.execution(&id).await.unwrap().status
    }

    let without_flag = executor();
    assert_eq!(run(&without_flag, definition()).await, ExecutionStatus::Failed);

    let flags = Arc::new(InMemoryFeatureFlagService::new());
    flags
        .enable_for_account(FeatureName::TimeoutFailureSupport, "acc-1")
        .await;
    let with_flag = executor_with_flags(flags);
    assert_eq!(run(&with_flag, definition()).await, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_abort_cancels_outstanding_state() {
    let deploy = Dispatching::new("Deploy");
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(deploy.clone()));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    executor.abort(&id).await.unwrap();

    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Aborted);
    assert_eq!(
        execution.state_execution("Deploy").unwrap().status,
        ExecutionStatus::Aborted
    );
    assert_eq!(deploy.aborts.load(Ordering::SeqCst), 1);

    let late = executor
        .deliver(&deploy.last_correlation_id(), delegate_success())
        .await
        .unwrap();
    assert_eq!(late, DeliveryOutcome::Unclaimed);

    let missing = executor.abort("no-such-execution").await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_validation_failure_names_fields() {
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(Arc::new(Incomplete)));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.state_executions.is_empty());
    let message = execution.error_message.unwrap();
    assert!(message.contains("Deploy Service"));
    assert!(message.contains("instanceCount"));
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let log = journal();
    let flaky = Scripted::with_script(
        "Deploy",
        &log,
        vec![
            ExecutionResponse::failed("first"),
            ExecutionResponse::failed("second"),
        ],
    );
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(flaky))
        .failure_strategy(FailureStrategy::new(FailureAction::RetryThenFail).with_retry_count(2));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    let runs = execution.state_executions_named("Deploy");
    assert_eq!(runs.len(), 3);
    assert_eq!(
        runs.iter().map(|r| r.retry_count).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(runs[0].status, ExecutionStatus::Failed);
    assert_eq!(runs[2].status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_retries_exhausted_fail_workflow() {
    let log = journal();
    let failing = Scripted::with_script(
        "Deploy",
        &log,
        vec![
            ExecutionResponse::failed("one"),
            ExecutionResponse::failed("two"),
        ],
    );
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(failing))
        .failure_strategy(FailureStrategy::new(FailureAction::RetryThenFail).with_retry_count(1));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_message.as_deref(), Some("two"));
    assert_eq!(execution.state_executions_named("Deploy").len(), 2);
}

#[tokio::test]
async fn test_ignore_strategy_continues() {
    let log = journal();
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(
            PhaseDefinition::new("ph-1", "Phase 1")
                .state(Scripted::with_script(
                    "Verify",
                    &log,
                    vec![ExecutionResponse::failed("verification flaked")],
                ))
                .state(Scripted::new("Notify", &log)),
        )
        .failure_strategy(FailureStrategy::new(FailureAction::Ignore));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(entries(&log), vec!["Verify@Phase 1", "Notify@Phase 1"]);
}

#[tokio::test]
async fn test_per_phase_rollback_runs_started_phases_in_reverse() {
    let log = journal();
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(
            PhaseDefinition::new("ph-1", "Phase 1")
                .state(Scripted::new("Deploy 1", &log))
                .rollback_state(Scripted::new("Rollback 1", &log)),
        )
        .phase(
            PhaseDefinition::new("ph-2", "Phase 2")
                .state(Scripted::with_script(
                    "Deploy 2",
                    &log,
                    vec![ExecutionResponse::failed("capacity exhausted")],
                ))
                .rollback_state(Scripted::new("Rollback 2", &log)),
        )
        .phase(
            PhaseDefinition::new("ph-3", "Phase 3")
                .state(Scripted::new("Deploy 3", &log))
                .rollback_state(Scripted::new("Rollback 3", &log)),
        )
        .failure_strategy(FailureStrategy::new(FailureAction::Rollback));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.rollback_triggered);
    assert_eq!(execution.error_message.as_deref(), Some("capacity exhausted"));
    assert_eq!(
        entries(&log),
        vec![
            "Deploy 1@Phase 1",
            "Deploy 2@Phase 2",
            "Rollback 2@Phase 2 (rollback)",
            "Rollback 1@Phase 1 (rollback)",
        ]
    );
    assert!(execution.state_execution("Rollback 1").unwrap().rollback);
}

#[tokio::test]
async fn test_rollback_all_phases_at_once() {
    let log = journal();
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(Scripted::new("Deploy 1", &log)))
        .phase(PhaseDefinition::new("ph-2", "Phase 2").state(Scripted::with_script(
            "Deploy 2",
            &log,
            vec![ExecutionResponse::failed("health check failed")],
        )))
        .rollback_all_phases_at_once(vec![Scripted::new("Rollback Everything", &log) as Arc<dyn State>])
        .failure_strategy(FailureStrategy::new(FailureAction::Rollback));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        entries(&log).last().cloned(),
        Some(format!("Rollback Everything@{} (rollback)", ROLLBACK_ALL_PHASES))
    );
}

#[tokio::test]
async fn test_contract_violation_fails_without_retry() {
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(Arc::new(Broken)))
        .failure_strategy(FailureStrategy::new(FailureAction::RetryThenFail).with_retry_count(3));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(!execution.rollback_triggered);
    assert_eq!(execution.state_executions.len(), 1);
    assert_eq!(execution.state_executions[0].status, ExecutionStatus::Error);
    assert_eq!(
        execution.error_message.as_deref(),
        Some("State 'Broken Step' failed in phase 'Phase 1': Invalid request: activity id is missing")
    );
}

#[tokio::test]
async fn test_async_without_correlation_ids_is_error() {
    let log = journal();
    let definition = WorkflowDefinition::new("deploy-orders").phase(
        PhaseDefinition::new("ph-1", "Phase 1").state(Scripted::with_script(
            "Deploy",
            &log,
            vec![ExecutionResponse::async_on(Vec::new())],
        )),
    );

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();
    let execution = executor.execution(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let instance = execution.state_execution("Deploy").unwrap();
    assert_eq!(instance.status, ExecutionStatus::Error);
    assert!(instance
        .error_message
        .as_deref()
        .unwrap()
        .contains("without correlation ids"));
}

#[tokio::test]
async fn test_each_phase_gets_a_fresh_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(
            PhaseDefinition::new("ph-1", "Phase 1")
                .state(Arc::new(InstanceWriter))
                .state(Arc::new(InstanceReader {
                    name: "Same Phase".to_string(),
                    seen: seen.clone(),
                })),
        )
        .phase(PhaseDefinition::new("ph-2", "Phase 2").state(Arc::new(InstanceReader {
            name: "Next Phase".to_string(),
            seen: seen.clone(),
        })));

    let executor = executor();
    executor.start(Arc::new(definition), request()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn test_response_loop_delivers_envelopes() {
    let deploy = Dispatching::new("Deploy");
    let definition = WorkflowDefinition::new("deploy-orders")
        .phase(PhaseDefinition::new("ph-1", "Phase 1").state(deploy.clone()));

    let executor = executor();
    let id = executor.start(Arc::new(definition), request()).await.unwrap();

    let envelopes = vec![
        DelegateResponseEnvelope {
            correlation_id: "stray".to_string(),
            response: delegate_success(),
        },
        DelegateResponseEnvelope {
            correlation_id: deploy.last_correlation_id(),
            response: delegate_success(),
        },
    ];
    executor
        .run_response_loop(futures::stream::iter(envelopes))
        .await;

    let execution = executor.execution(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
}
