//! Per-phase execution handle passed to every state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::element::{ContextElement, ContextElementType, PhaseElement, ServiceElement, WorkflowStandardParams};
use super::stack::ContextElementStack;
use crate::error::EngineResult;
use crate::sweeping::{SweepingOutputBuilder, SweepingOutputInquiry, SweepingOutputScope};
use crate::template::ExpressionRenderer;

/// Everything a state can see about the workflow it runs in.
///
/// A fresh context is built for every phase and every rollback pass, so
/// data that must outlive a phase travels through sweeping outputs.
#[derive(Clone)]
pub struct ExecutionContext {
    app_id: String,
    account_id: String,
    workflow_execution_id: String,
    pipeline_execution_id: Option<String>,
    state_execution_instance_id: String,
    state_name: String,
    stack: ContextElementStack,
    variables: BTreeMap<String, Value>,
    renderer: Arc<dyn ExpressionRenderer>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("app_id", &self.app_id)
            .field("account_id", &self.account_id)
            .field("workflow_execution_id", &self.workflow_execution_id)
            .field("pipeline_execution_id", &self.pipeline_execution_id)
            .field("state_execution_instance_id", &self.state_execution_instance_id)
            .field("state_name", &self.state_name)
            .field("elements", &self.stack.len())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(
        app_id: impl Into<String>,
        account_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
        renderer: Arc<dyn ExpressionRenderer>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            account_id: account_id.into(),
            workflow_execution_id: workflow_execution_id.into(),
            pipeline_execution_id: None,
            state_execution_instance_id: String::new(),
            state_name: String::new(),
            stack: ContextElementStack::new(),
            variables: BTreeMap::new(),
            renderer,
        }
    }

    pub fn with_pipeline_execution_id(mut self, id: impl Into<String>) -> Self {
        self.pipeline_execution_id = Some(id.into());
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Bind the context to the state execution instance about to run.
    pub fn set_state_execution(&mut self, id: impl Into<String>, state_name: impl Into<String>) {
        self.state_execution_instance_id = id.into();
        self.state_name = state_name.into();
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn workflow_execution_id(&self) -> &str {
        &self.workflow_execution_id
    }

    pub fn pipeline_execution_id(&self) -> Option<&str> {
        self.pipeline_execution_id.as_deref()
    }

    pub fn state_execution_instance_id(&self) -> &str {
        &self.state_execution_instance_id
    }

    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn element_stack(&self) -> &ContextElementStack {
        &self.stack
    }

    pub fn push_context_element(&mut self, element: ContextElement) {
        self.stack.push(element);
    }

    pub fn get_context_element(
        &self,
        element_type: ContextElementType,
        key: Option<&str>,
    ) -> Option<&ContextElement> {
        self.stack.get(element_type, key)
    }

    pub fn get_context_element_list(&self, element_type: ContextElementType) -> Vec<&ContextElement> {
        self.stack.get_list(element_type)
    }

    pub fn standard_params(&self) -> Option<&WorkflowStandardParams> {
        self.stack.standard_params()
    }

    pub fn phase_element(&self) -> Option<&PhaseElement> {
        self.stack.phase_element()
    }

    pub fn service_element(&self) -> Option<&ServiceElement> {
        self.stack.service_element()
    }

    pub fn env_id(&self) -> Option<&str> {
        self.standard_params().map(|p| p.env_id.as_str())
    }

    /// True when the context belongs to a rollback pass.
    pub fn is_rollback(&self) -> bool {
        self.phase_element().map(|p| p.rollback).unwrap_or(false)
    }

    /// Workflow execution id + phase uuid + phase name.
    pub fn phase_execution_id(&self) -> Option<String> {
        self.phase_element().map(|phase| {
            format!(
                "{}{}{}",
                self.workflow_execution_id, phase.uuid, phase.phase_name
            )
        })
    }

    /// Render `${...}` expressions in `expression`.
    pub fn render_expression(&self, expression: &str) -> EngineResult<String> {
        self.renderer.render(expression, &self.render_variables())
    }

    /// Render an optional field, treating blank values as unset.
    pub fn render_optional(&self, expression: Option<&str>) -> EngineResult<Option<String>> {
        match expression.map(str::trim).filter(|e| !e.is_empty()) {
            Some(expression) => self.render_expression(expression).map(Some),
            None => Ok(None),
        }
    }

    pub fn prepare_sweeping_output_builder(&self, scope: SweepingOutputScope) -> SweepingOutputBuilder {
        SweepingOutputBuilder::new(
            scope,
            &self.app_id,
            self.pipeline_execution_id.clone(),
            &self.workflow_execution_id,
            self.phase_execution_id(),
            non_empty(&self.state_execution_instance_id),
        )
    }

    pub fn prepare_sweeping_output_inquiry(&self) -> SweepingOutputInquiry {
        SweepingOutputInquiry::new(
            &self.app_id,
            self.pipeline_execution_id.clone(),
            &self.workflow_execution_id,
            self.phase_execution_id(),
            non_empty(&self.state_execution_instance_id),
        )
        .on_demand_rollback(self.is_rollback())
    }

    fn render_variables(&self) -> Value {
        let mut root: Map<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let standard = self.standard_params();
        root.insert(
            "app".to_string(),
            json!({
                "uuid": self.app_id,
                "name": standard.map(|p| p.app_name.as_str()).unwrap_or_default(),
            }),
        );
        if let Some(params) = standard {
            root.insert(
                "env".to_string(),
                json!({
                    "uuid": params.env_id,
                    "name": params.env_name,
                    "environmentType": params.env_type,
                }),
            );
        }
        if let Some(service) = self.service_element() {
            root.insert(
                "service".to_string(),
                json!({ "uuid": service.uuid, "name": service.name }),
            );
        }
        if let Some(phase) = self.phase_element() {
            root.insert(
                "phase".to_string(),
                json!({ "uuid": phase.uuid, "name": phase.phase_name }),
            );
        }
        root.insert(
            "workflow".to_string(),
            json!({
                "executionId": self.workflow_execution_id,
                "pipelineExecutionId": self.pipeline_execution_id,
                "name": standard.map(|p| p.workflow_name.as_str()).unwrap_or_default(),
                "variables": self.variables,
            }),
        );

        Value::Object(root)
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[test]
    fn test_phase_execution_id() {
        let mut ctx = test_context();
        assert!(ctx.phase_execution_id().is_none());
        ctx.push_context_element(ContextElement::Phase(PhaseElement {
            uuid: "ph-1".to_string(),
            phase_name: "Phase 1".to_string(),
            ..Default::default()
        }));
        assert_eq!(ctx.phase_execution_id().as_deref(), Some("wf-exec-1ph-1Phase 1"));
    }

    #[test]
    fn test_render_expression_uses_elements() {
        let mut ctx = test_context();
        ctx.set_variable("asgName", json!("orders__2"));
        assert_eq!(ctx.render_expression("${app.name}").unwrap(), "orders-app");
        assert_eq!(ctx.render_expression("${env.name}").unwrap(), "prod");
        assert_eq!(
            ctx.render_expression("${workflow.variables.asgName}").unwrap(),
            "orders__2"
        );
        assert_eq!(ctx.render_expression("${asgName}").unwrap(), "orders__2");
    }

    #[test]
    fn test_render_optional_blank_is_none() {
        let ctx = test_context();
        assert_eq!(ctx.render_optional(Some("   ")).unwrap(), None);
        assert_eq!(ctx.render_optional(None).unwrap(), None);
        assert!(ctx.render_optional(Some("${nope}")).is_err());
    }

    #[test]
    fn test_inquiry_carries_context_ids() {
        let mut ctx = test_context();
        ctx.set_state_execution("se-1", "AMI Deploy");
        let inquiry = ctx.prepare_sweeping_output_inquiry().name("setup");
        assert_eq!(inquiry.ids.workflow_execution_id, "wf-exec-1");
        assert_eq!(inquiry.ids.state_execution_id.as_deref(), Some("se-1"));
        assert_eq!(inquiry.name, "setup");
    }
}
