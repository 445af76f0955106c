//! Which graph nodes may be built once and reused by every session.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::graph::{CachePolicy, Component, DependencyGraph, NodeId, Satisfaction};
use crate::registry::ComponentRegistry;

/// Whether a component, taken on its own, may be shared across sessions.
///
/// Fixed instances and null satisfactions always can; placeholders and
/// components built fresh for every dependent never can. Everything else is
/// shareable when its type (or, for providers, the provider registration) is
/// declared shareable or singleton-scoped.
pub fn is_shareable(registry: &ComponentRegistry, component: &Component) -> bool {
    let shareable = match component.satisfaction() {
        Satisfaction::Instance(_) | Satisfaction::Null(_) => true,
        Satisfaction::Placeholder(_) => false,
        _ if component.policy() == CachePolicy::NewInstance => false,
        Satisfaction::Provider { provider, output } => {
            let flags = registry.flags(*output);
            flags.shareable
                || flags.singleton
                || registry
                    .component(*provider)
                    .and_then(|def| def.provider.as_ref())
                    .is_some_and(|def| def.shareable)
        }
        other => {
            let flags = registry.flags(other.erased_type());
            flags.shareable || flags.singleton
        }
    };
    trace!(component = %component.satisfaction(), shareable, "classified component");
    shareable
}

/// The nodes of `graph` that may be shared, in dependency order.
///
/// A node qualifies when it is shareable on its own and every dependency it
/// keeps after the build (every non-transient edge) leads to a node that
/// qualifies too. Transient edges are build-time only and do not count. The
/// synthetic root never qualifies.
pub fn shareable_nodes(registry: &ComponentRegistry, graph: &DependencyGraph) -> Vec<NodeId> {
    let mut shared = HashSet::new();
    let mut ordered = Vec::new();
    for id in graph.sorted_nodes() {
        let node = graph.node(id);
        if node.label().is_root() || !is_shareable(registry, node.label()) {
            continue;
        }
        let closed = node
            .edges()
            .iter()
            .filter(|edge| !edge.desire().is_transient())
            .all(|edge| shared.contains(&edge.tail()));
        if closed {
            shared.insert(id);
            ordered.push(id);
        } else {
            trace!(component = %node.label().satisfaction(), "depends on an unshareable component");
        }
    }
    debug!(shareable = ordered.len(), nodes = graph.node_count(), "classified shareable nodes");
    ordered
}
