//! Typed context elements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lookup key family of a context element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextElementType {
    Standard,
    Service,
    Phase,
    Instance,
    Artifact,
    Param,
}

impl std::fmt::Display for ContextElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Service => write!(f, "service"),
            Self::Phase => write!(f, "phase"),
            Self::Instance => write!(f, "instance"),
            Self::Artifact => write!(f, "artifact"),
            Self::Param => write!(f, "param"),
        }
    }
}

/// Workflow-wide parameters seeded into every phase context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStandardParams {
    pub app_id: String,
    pub app_name: String,
    pub env_id: String,
    pub env_name: String,
    pub env_type: String,
    pub account_id: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub artifact_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceElement {
    pub uuid: String,
    pub name: String,
}

/// Metadata of the phase a state runs in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseElement {
    pub uuid: String,
    pub phase_name: String,
    pub service_element: Option<ServiceElement>,
    pub infra_mapping_id: Option<String>,
    /// Set on the context of a rollback pass.
    #[serde(default)]
    pub rollback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceElement {
    pub uuid: String,
    pub host_name: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactElement {
    pub uuid: String,
    pub name: String,
    pub build_no: Option<String>,
    #[serde(default)]
    pub service_ids: Vec<String>,
}

/// Named bag of parameters contributed by a phase, e.g. artifacts it produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamElement {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactElement>,
}

/// A unit of data pushed onto the [`ContextElementStack`](super::ContextElementStack).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "element", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextElement {
    Standard(WorkflowStandardParams),
    Service(ServiceElement),
    Phase(PhaseElement),
    Instance(InstanceElement),
    Artifact(ArtifactElement),
    Param(ParamElement),
}

impl ContextElement {
    pub fn element_type(&self) -> ContextElementType {
        match self {
            Self::Standard(_) => ContextElementType::Standard,
            Self::Service(_) => ContextElementType::Service,
            Self::Phase(_) => ContextElementType::Phase,
            Self::Instance(_) => ContextElementType::Instance,
            Self::Artifact(_) => ContextElementType::Artifact,
            Self::Param(_) => ContextElementType::Param,
        }
    }

    /// Lookup key within the element's type, if it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Standard(_) => None,
            Self::Service(s) => Some(&s.name),
            Self::Phase(p) => Some(&p.phase_name),
            Self::Instance(i) => Some(&i.host_name),
            Self::Artifact(a) => Some(&a.name),
            Self::Param(p) => Some(&p.name),
        }
    }
}
