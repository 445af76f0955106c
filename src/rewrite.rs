//! Graph passes run while building an artifact: baking shareable nodes into
//! fixed instances, and checking which placeholders remain.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, error};

use crate::error::{InstantiationError, RewriteError};
use crate::graph::{Component, DependencyGraph, Edge, GraphBuilder, Instance, NodeId, Satisfaction};
use crate::instantiate::NodeInstantiator;
use crate::key::TypeKey;
use crate::lifecycle::LifecycleManager;
use crate::registry::ComponentRegistry;
use crate::shareable::shareable_nodes;

/// Builds every shareable node of `graph` and returns a copy in which each of
/// them is an [`Instance`] with no dependencies.
///
/// Disposal hooks of the baked values that stay in the graph go to
/// `lifecycle`. Everything else built along the way is needed only for the
/// build and is disposed before this returns, whether it succeeds or not.
/// Running the pass on its own output changes nothing.
pub fn bake_shareable(
    registry: &ComponentRegistry,
    graph: &DependencyGraph,
    lifecycle: &mut LifecycleManager,
) -> Result<DependencyGraph, InstantiationError> {
    let shared = shareable_nodes(registry, graph);
    let shared_set: HashSet<NodeId> = shared.iter().copied().collect();

    // Dependencies of baked nodes are dropped unless something else keeps them.
    let order = graph.sorted_nodes();
    let mut live = HashSet::from([graph.root()]);
    for id in order.iter().rev() {
        if live.contains(id) && !shared_set.contains(id) {
            live.extend(graph.node(*id).edges().iter().map(|edge| edge.tail()));
        }
    }
    // Baked values stay in the graph and hold on to their non-transient
    // dependencies; only their disposal outlives the build.
    let mut kept: HashSet<NodeId> = shared_set.intersection(&live).copied().collect();
    for id in order.iter().rev() {
        if kept.contains(id) {
            let held = graph.node(*id).edges().iter().filter(|edge| !edge.desire().is_transient());
            kept.extend(held.map(|edge| edge.tail()).collect::<Vec<_>>());
        }
    }

    let mut scratch = LifecycleManager::new();
    let mut memo = HashMap::new();
    let mut baked = HashMap::new();
    let built = {
        let mut instantiator =
            NodeInstantiator::new(registry, graph, &mut memo, &mut scratch).retaining(&kept, lifecycle);
        shared.iter().try_for_each(|id| -> Result<(), InstantiationError> {
            let label = graph.node(*id).label();
            if label.satisfaction().has_instance() || !live.contains(id) {
                return Ok(());
            }
            if let Some(value) = instantiator.instantiate(*id)? {
                let key = label.satisfaction().erased_type();
                baked.insert(*id, Instance::from_erased(key, value));
            }
            Ok(())
        })
    };
    debug!(released = scratch.len(), retained = kept.len(), "releasing build-only components");
    scratch.close();
    built?;

    let mut builder = GraphBuilder::new();
    let mut mapped: HashMap<NodeId, NodeId> = HashMap::new();
    for id in order.into_iter().filter(|id| live.contains(id)) {
        let node = graph.node(id);
        let new_id = match baked.remove(&id) {
            Some(instance) => builder.intern(
                Component::new(Satisfaction::Instance(instance), node.label().policy()),
                Vec::new(),
            ),
            None => {
                let edges = node
                    .edges()
                    .iter()
                    .map(|edge| Edge::new(edge.dependency().clone(), mapped[&edge.tail()]))
                    .collect();
                builder.intern(node.label().clone(), edges)
            }
        };
        mapped.insert(id, new_id);
    }
    let rewritten = builder.finish(mapped[&graph.root()]);
    debug!(
        before = graph.node_count(),
        after = rewritten.node_count(),
        "baked shareable components into graph"
    );
    Ok(rewritten)
}

/// Fails with the first placeholder in `graph` whose type is not in `allowed`.
/// Every unexpected placeholder is logged.
pub fn validate_placeholders(graph: &DependencyGraph, allowed: &BTreeSet<TypeKey>) -> Result<(), RewriteError> {
    let mut first = None;
    for id in graph.placeholder_nodes() {
        let key = graph.node(id).label().satisfaction().erased_type();
        if !allowed.contains(&key) {
            error!(placeholder = %key, "unexpected placeholder in graph");
            first.get_or_insert(key);
        }
    }
    match first {
        Some(key) => Err(RewriteError::UnexpectedPlaceholder { key }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Desire;
    use crate::key::key_of;
    use crate::settings::SolverSettings;
    use crate::solver::{DependencySolver, SolveDirection};
    use crate::traits::Dispose;
    use crate::Configuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static BUILT: AtomicUsize = AtomicUsize::new(0);
    static DISPOSED: AtomicUsize = AtomicUsize::new(0);

    struct Scratch;
    impl Dispose for Scratch {
        fn dispose(&self) {
            DISPOSED.fetch_add(1, Ordering::SeqCst);
        }
    }
    struct Model;
    struct Root;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register::<Scratch, _>(|_| Ok(Scratch)).disposable();
        registry
            .register::<Model, _>(|ctx| {
                ctx.get::<Scratch>()?;
                BUILT.fetch_add(1, Ordering::SeqCst);
                Ok(Model)
            })
            .transient_arg::<Scratch>()
            .shareable();
        registry.register::<Root, _>(|_| Ok(Root)).arg::<Model>();
        registry
    }

    fn resolve(registry: &ComponentRegistry) -> DependencyGraph {
        DependencySolver::new(registry, [&Configuration::new()], SolveDirection::Solve, SolverSettings::default())
            .resolve(&[Desire::root(key_of::<Root>(), None)])
            .unwrap()
    }

    #[test]
    fn baking_replaces_shareable_subtrees_and_is_idempotent() {
        let registry = registry();
        let graph = resolve(&registry);
        let mut lifecycle = LifecycleManager::new();

        let baked = bake_shareable(&registry, &graph, &mut lifecycle).unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        // Root stays, Model becomes an instance and Scratch is gone.
        assert_eq!(baked.node_count(), 2);
        // Scratch was only needed to build Model.
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_empty());

        let again = bake_shareable(&registry, &baked, &mut lifecycle).unwrap();
        assert_eq!(again, baked);
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_values_held_by_the_graph_stay_registered() {
        struct Pool(Arc<AtomicUsize>);
        impl Dispose for Pool {
            fn dispose(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        struct Temp(Arc<AtomicUsize>);
        impl Dispose for Temp {
            fn dispose(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        struct Ranker;

        let pools = Arc::new(AtomicUsize::new(0));
        let temps = Arc::new(AtomicUsize::new(0));
        let mut registry = ComponentRegistry::new();
        let counter = pools.clone();
        registry
            .register::<Pool, _>(move |_| Ok(Pool(counter.clone())))
            .disposable()
            .shareable();
        let counter = temps.clone();
        registry
            .register::<Temp, _>(move |_| Ok(Temp(counter.clone())))
            .disposable();
        registry
            .register::<Ranker, _>(|ctx| {
                ctx.get::<Pool>()?;
                ctx.get::<Temp>()?;
                Ok(Ranker)
            })
            .arg::<Pool>()
            .transient_arg::<Temp>()
            .shareable();
        registry.register::<Root, _>(|_| Ok(Root)).arg::<Ranker>();

        let graph = resolve(&registry);
        let mut lifecycle = LifecycleManager::new();
        let baked = bake_shareable(&registry, &graph, &mut lifecycle).unwrap();
        assert_eq!(baked.node_count(), 2);
        assert_eq!(temps.load(Ordering::SeqCst), 1);
        assert_eq!(pools.load(Ordering::SeqCst), 0);
        assert_eq!(lifecycle.len(), 1);

        lifecycle.close();
        assert_eq!(pools.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unexpected_placeholders_are_rejected() {
        let registry = registry();
        let mut config = Configuration::new();
        config.bind::<Model>().to_placeholder();
        let graph = DependencySolver::new(&registry, [&config], SolveDirection::Solve, SolverSettings::default())
            .resolve(&[Desire::root(key_of::<Root>(), None)])
            .unwrap();

        let err = validate_placeholders(&graph, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, RewriteError::UnexpectedPlaceholder { key } if key == key_of::<Model>()));
        assert!(validate_placeholders(&graph, &[key_of::<Model>()].into_iter().collect()).is_ok());
    }

    #[test]
    fn fixed_instances_are_left_alone() {
        let registry = registry();
        let mut config = Configuration::new();
        config.bind::<Model>().to_instance(Arc::new(Model));
        let graph = DependencySolver::new(&registry, [&config], SolveDirection::Solve, SolverSettings::default())
            .resolve(&[Desire::root(key_of::<Root>(), None)])
            .unwrap();
        let mut lifecycle = LifecycleManager::new();
        assert_eq!(bake_shareable(&registry, &graph, &mut lifecycle).unwrap(), graph);
    }
}
