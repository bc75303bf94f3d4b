//! Pure dependency questions over the catalog and the set of currently
//! enabled services. No host access, no side effects; the orchestrator and
//! the entitlement checks both lean on these.

use crate::domain::models::{
    DependenciesResult, ServiceDescriptor, ServiceWithDependencies, ServiceWithReason,
};
use crate::services::registry::Registry;

/// Enabled services that conflict with `candidate`. Incompatibility edges are
/// declared one-directionally in the catalog but hold both ways, so this
/// checks the candidate's list and every enabled service's list.
pub fn blocking_incompatible_services(
    registry: &Registry,
    candidate: &ServiceDescriptor,
    enabled: &[String],
) -> Vec<ServiceWithReason> {
    let mut blocking = Vec::new();
    for inc in &candidate.incompatible {
        if enabled.iter().any(|e| e == &inc.name) {
            blocking.push(inc.clone());
        }
    }
    for name in enabled {
        let Some(other) = registry.get(name) else {
            continue;
        };
        if blocking.iter().any(|b| b.name == other.name) {
            continue;
        }
        if let Some(back_edge) = other
            .incompatible
            .iter()
            .find(|inc| inc.name == candidate.name)
        {
            blocking.push(ServiceWithReason {
                name: other.name.clone(),
                reason: back_edge.reason.clone(),
            });
        }
    }
    blocking.sort_by(|a, b| a.name.cmp(&b.name));
    blocking
}

/// Required services of `candidate` that are not currently enabled.
pub fn missing_required_services(
    candidate: &ServiceDescriptor,
    enabled: &[String],
) -> Vec<ServiceWithReason> {
    candidate
        .requires
        .iter()
        .filter(|req| !enabled.iter().any(|e| e == &req.name))
        .cloned()
        .collect()
}

/// Enabled services that require `name` and therefore block disabling it.
pub fn blocking_dependents(registry: &Registry, name: &str, enabled: &[String]) -> Vec<String> {
    registry
        .dependents_of(name)
        .iter()
        .filter(|dep| enabled.iter().any(|e| &e == dep))
        .cloned()
        .collect()
}

/// Full dump of the static graph for the dependencies endpoint. Services in
/// catalog order; the incompatibility lists are the declared edges only, the
/// symmetric closure is a runtime concern.
pub fn dependencies_dump(registry: &Registry) -> DependenciesResult {
    DependenciesResult {
        services: registry
            .services()
            .iter()
            .map(|svc| ServiceWithDependencies {
                name: svc.name.clone(),
                incompatible_with: svc.incompatible.clone(),
                depends_on: svc.requires.clone(),
            })
            .collect(),
    }
}
