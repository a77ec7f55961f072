//! Sweeping output records, builders and inquiries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Visibility of a sweeping output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepingOutputScope {
    /// Pipeline execution; falls back to the workflow execution outside a pipeline.
    #[default]
    Pipeline,
    Workflow,
    Phase,
    State,
}

impl SweepingOutputScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "PIPELINE",
            Self::Workflow => "WORKFLOW",
            Self::Phase => "PHASE",
            Self::State => "STATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PIPELINE" => Some(Self::Pipeline),
            "WORKFLOW" => Some(Self::Workflow),
            "PHASE" => Some(Self::Phase),
            "STATE" => Some(Self::State),
            _ => None,
        }
    }
}

impl std::fmt::Display for SweepingOutputScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ids a sweeping output can be scoped by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeIds {
    pub pipeline_execution_id: Option<String>,
    pub workflow_execution_id: String,
    pub phase_execution_id: Option<String>,
    pub state_execution_id: Option<String>,
}

impl ScopeIds {
    /// The id identifying `scope`, if recorded.
    pub fn id_for(&self, scope: SweepingOutputScope) -> Option<&str> {
        match scope {
            SweepingOutputScope::Pipeline => self
                .pipeline_execution_id
                .as_deref()
                .or(Some(self.workflow_execution_id.as_str())),
            SweepingOutputScope::Workflow => Some(self.workflow_execution_id.as_str()),
            SweepingOutputScope::Phase => self.phase_execution_id.as_deref(),
            SweepingOutputScope::State => self.state_execution_id.as_deref(),
        }
        .filter(|id| !id.is_empty())
    }
}

/// An immutable, named output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepingOutputInstance {
    pub uuid: String,
    pub app_id: String,
    pub name: String,
    pub scope: SweepingOutputScope,
    #[serde(flatten)]
    pub ids: ScopeIds,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SweepingOutputInstance {
    /// The id of the instance's own scope.
    pub fn scope_id(&self) -> Option<&str> {
        self.ids.id_for(self.scope)
    }

    /// Whether this instance answers `inquiry`: same name, and the id for
    /// the instance's own scope equals the inquiry's id for that scope.
    pub fn matches(&self, inquiry: &SweepingOutputInquiry) -> bool {
        if self.name != inquiry.name || self.app_id != inquiry.app_id {
            return false;
        }
        match (self.scope_id(), inquiry.ids.id_for(self.scope)) {
            (Some(own), Some(asked)) => own == asked,
            _ => false,
        }
    }

    /// Whether this instance is among the prefix matches for `inquiry` in `scope`.
    pub fn matches_prefix(&self, inquiry: &SweepingOutputInquiry, scope: SweepingOutputScope) -> bool {
        if !self.name.starts_with(&inquiry.name) || self.app_id != inquiry.app_id {
            return false;
        }
        match (self.ids.id_for(scope), inquiry.ids.id_for(scope)) {
            (Some(own), Some(asked)) => own == asked,
            _ => false,
        }
    }

    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> EngineResult<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// Builder pre-populated with the ids of the context it was prepared from.
#[derive(Debug, Clone)]
pub struct SweepingOutputBuilder {
    scope: SweepingOutputScope,
    app_id: String,
    ids: ScopeIds,
    name: Option<String>,
    value: serde_json::Value,
}

impl SweepingOutputBuilder {
    pub fn new(
        scope: SweepingOutputScope,
        app_id: &str,
        pipeline_execution_id: Option<String>,
        workflow_execution_id: &str,
        phase_execution_id: Option<String>,
        state_execution_id: Option<String>,
    ) -> Self {
        Self {
            scope,
            app_id: app_id.to_string(),
            ids: ScopeIds {
                pipeline_execution_id,
                workflow_execution_id: workflow_execution_id.to_string(),
                phase_execution_id,
                state_execution_id,
            },
            name: None,
            value: serde_json::Value::Null,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn value(mut self, value: serde_json::Value) -> Self {
        self.value = value;
        self
    }

    pub fn value_of<T: Serialize>(self, value: &T) -> EngineResult<Self> {
        Ok(self.value(serde_json::to_value(value)?))
    }

    pub fn build(self) -> EngineResult<SweepingOutputInstance> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| EngineError::invalid_request("Sweeping output name is required"))?;

        if self.ids.id_for(self.scope).is_none() {
            return Err(EngineError::invalid_request(format!(
                "Sweeping output '{}' has no id for scope {}",
                name, self.scope
            )));
        }

        Ok(SweepingOutputInstance {
            uuid: Uuid::new_v4().to_string(),
            app_id: self.app_id,
            name,
            scope: self.scope,
            ids: self.ids,
            value: self.value,
            created_at: Utc::now(),
        })
    }
}

/// Lookup built by a reader that has no reference to the writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepingOutputInquiry {
    pub app_id: String,
    pub name: String,
    pub ids: ScopeIds,
    pub is_on_demand_rollback: bool,
}

impl SweepingOutputInquiry {
    pub fn new(
        app_id: &str,
        pipeline_execution_id: Option<String>,
        workflow_execution_id: &str,
        phase_execution_id: Option<String>,
        state_execution_id: Option<String>,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            name: String::new(),
            ids: ScopeIds {
                pipeline_execution_id,
                workflow_execution_id: workflow_execution_id.to_string(),
                phase_execution_id,
                state_execution_id,
            },
            is_on_demand_rollback: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_demand_rollback(mut self, on_demand: bool) -> Self {
        self.is_on_demand_rollback = on_demand;
        self
    }
}
