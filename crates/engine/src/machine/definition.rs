//! Workflow plans: phases, their states and the rollback strategy.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::ServiceElement;
use crate::failure::FailureStrategy;
use crate::state::State;

/// Phase name pushed onto the context of an all-phases-at-once rollback pass.
pub const ROLLBACK_ALL_PHASES: &str = "Rollback All Phases";

/// One deployment phase: forward states and the states that compensate them.
#[derive(Clone)]
pub struct PhaseDefinition {
    pub uuid: String,
    pub name: String,
    pub service: Option<ServiceElement>,
    pub infra_mapping_id: Option<String>,
    pub states: Vec<Arc<dyn State>>,
    pub rollback_states: Vec<Arc<dyn State>>,
}

impl std::fmt::Debug for PhaseDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseDefinition")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("states", &state_names(&self.states))
            .field("rollback_states", &state_names(&self.rollback_states))
            .finish()
    }
}

impl PhaseDefinition {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            service: None,
            infra_mapping_id: None,
            states: Vec::new(),
            rollback_states: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: ServiceElement) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_infra_mapping_id(mut self, id: impl Into<String>) -> Self {
        self.infra_mapping_id = Some(id.into());
        self
    }

    pub fn state(mut self, state: Arc<dyn State>) -> Self {
        self.states.push(state);
        self
    }

    pub fn rollback_state(mut self, state: Arc<dyn State>) -> Self {
        self.rollback_states.push(state);
        self
    }
}

/// How compensation runs after a failure.
#[derive(Clone, Default)]
pub enum RollbackStrategy {
    /// Each started phase runs its own rollback states, last phase first.
    #[default]
    PerPhase,
    /// One pass of workflow-level rollback states undoes every phase.
    AllPhasesAtOnce(Vec<Arc<dyn State>>),
}

impl std::fmt::Debug for RollbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerPhase => write!(f, "PerPhase"),
            Self::AllPhasesAtOnce(states) => f
                .debug_tuple("AllPhasesAtOnce")
                .field(&state_names(states))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowDefinition {
    pub name: String,
    pub phases: Vec<PhaseDefinition>,
    pub rollback_strategy: RollbackStrategy,
    pub failure_strategies: Vec<FailureStrategy>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn phase(mut self, phase: PhaseDefinition) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn rollback_all_phases_at_once(mut self, states: Vec<Arc<dyn State>>) -> Self {
        self.rollback_strategy = RollbackStrategy::AllPhasesAtOnce(states);
        self
    }

    pub fn failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategies.push(strategy);
        self
    }

    fn all_states(&self) -> impl Iterator<Item = &Arc<dyn State>> {
        let workflow_rollback: &[Arc<dyn State>] = match &self.rollback_strategy {
            RollbackStrategy::PerPhase => &[],
            RollbackStrategy::AllPhasesAtOnce(states) => states,
        };
        self.phases
            .iter()
            .flat_map(|p| p.states.iter().chain(p.rollback_states.iter()))
            .chain(workflow_rollback.iter())
    }

    /// Field problems of every state, keyed by state name. Empty when the
    /// workflow is runnable.
    pub fn validate(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.all_states()
            .filter_map(|state| {
                let problems = state.validate_fields();
                (!problems.is_empty()).then(|| (state.name().to_string(), problems))
            })
            .collect()
    }
}

/// Render validation problems as a single message naming every field.
pub fn validation_message(problems: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    let parts: Vec<String> = problems
        .iter()
        .map(|(state, fields)| {
            let names: Vec<&str> = fields.keys().map(String::as_str).collect();
            format!("{} [{}]", state, names.join(", "))
        })
        .collect();
    format!("Some steps are found to be invalid/incomplete: {}", parts.join("; "))
}

fn state_names(states: &[Arc<dyn State>]) -> Vec<String> {
    states.iter().map(|s| s.name().to_string()).collect()
}
