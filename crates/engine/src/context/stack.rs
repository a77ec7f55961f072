//! Ordered, typed storage of context elements.

use std::collections::HashMap;

use super::element::{ContextElement, ContextElementType, PhaseElement, ServiceElement, WorkflowStandardParams};

/// Stack of context elements grouped by type.
///
/// Pushing an element makes it the most recent match for its type; older
/// elements stay reachable through [`get_list`](Self::get_list).
#[derive(Debug, Clone, Default)]
pub struct ContextElementStack {
    elements: HashMap<ContextElementType, Vec<ContextElement>>,
}

impl ContextElementStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: ContextElement) {
        tracing::trace!(element_type = %element.element_type(), name = ?element.name(), "Pushing context element");
        self.elements
            .entry(element.element_type())
            .or_default()
            .push(element);
    }

    /// Most recently pushed element of `element_type`, optionally narrowed
    /// to the one named `key`.
    pub fn get(&self, element_type: ContextElementType, key: Option<&str>) -> Option<&ContextElement> {
        let list = self.elements.get(&element_type)?;
        match key {
            None => list.last(),
            Some(key) => list.iter().rev().find(|e| e.name() == Some(key)),
        }
    }

    /// All elements of `element_type`, oldest first.
    pub fn get_list(&self, element_type: ContextElementType) -> Vec<&ContextElement> {
        self.elements
            .get(&element_type)
            .map(|list| list.iter().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.elements.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn standard_params(&self) -> Option<&WorkflowStandardParams> {
        match self.get(ContextElementType::Standard, None)? {
            ContextElement::Standard(params) => Some(params),
            _ => None,
        }
    }

    pub fn phase_element(&self) -> Option<&PhaseElement> {
        match self.get(ContextElementType::Phase, None)? {
            ContextElement::Phase(phase) => Some(phase),
            _ => None,
        }
    }

    /// The pushed service element, or the one carried by the phase element.
    pub fn service_element(&self) -> Option<&ServiceElement> {
        match self.get(ContextElementType::Service, None) {
            Some(ContextElement::Service(service)) => Some(service),
            _ => self.phase_element()?.service_element.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::element::InstanceElement;

    fn instance(host: &str) -> ContextElement {
        ContextElement::Instance(InstanceElement {
            uuid: format!("uuid-{}", host),
            host_name: host.to_string(),
            display_name: None,
        })
    }

    #[test]
    fn test_push_shadows_without_erasing() {
        let mut stack = ContextElementStack::new();
        stack.push(instance("host-a"));
        stack.push(instance("host-b"));

        assert_eq!(stack.get(ContextElementType::Instance, None).unwrap().name(), Some("host-b"));
        assert_eq!(
            stack.get(ContextElementType::Instance, Some("host-a")).unwrap().name(),
            Some("host-a")
        );

        let names: Vec<_> = stack
            .get_list(ContextElementType::Instance)
            .iter()
            .filter_map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["host-a", "host-b"]);
    }

    #[test]
    fn test_absent_lookup_is_none() {
        let stack = ContextElementStack::new();
        assert!(stack.get(ContextElementType::Phase, None).is_none());
        assert!(stack.get_list(ContextElementType::Artifact).is_empty());
        assert!(stack.standard_params().is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_keyed_lookup_returns_most_recent_of_name() {
        let mut stack = ContextElementStack::new();
        let second = InstanceElement {
            uuid: "second".to_string(),
            host_name: "host-a".to_string(),
            display_name: None,
        };
        stack.push(instance("host-a"));
        stack.push(instance("host-b"));
        stack.push(ContextElement::Instance(second));

        match stack.get(ContextElementType::Instance, Some("host-a")) {
            Some(ContextElement::Instance(found)) => assert_eq!(found.uuid, "second"),
            other => panic!("unexpected element: {:?}", other),
        }
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn test_service_element_falls_back_to_phase() {
        let mut stack = ContextElementStack::new();
        stack.push(ContextElement::Phase(PhaseElement {
            uuid: "phase-1".to_string(),
            phase_name: "Phase 1".to_string(),
            service_element: Some(ServiceElement {
                uuid: "svc-1".to_string(),
                name: "orders".to_string(),
            }),
            ..Default::default()
        }));
        assert_eq!(stack.service_element().unwrap().name, "orders");
    }
}
