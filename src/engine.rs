//! Building artifacts from layered configurations.
//!
//! An [`EngineBuilder`] resolves the roots of every configuration into one
//! graph, builds and bakes in everything that may be shared, then cuts out the
//! components of excluded configurations, leaving placeholders for them. The
//! resulting [`Artifact`] is immutable and cheap to clone across threads;
//! [`Session`]s are opened from it to build the rest on demand.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::binding::Configuration;
use crate::error::{ArtifactError, GraftResult, ResolutionError, RewriteError, SessionError};
use crate::graph::{DependencyGraph, Desire, NodeId};
use crate::key::TypeKey;
use crate::lifecycle::LifecycleManager;
use crate::persist;
use crate::registry::ComponentRegistry;
use crate::rewrite::{bake_shareable, validate_placeholders};
use crate::session::Session;
use crate::settings::SolverSettings;
use crate::shareable::shareable_nodes;
use crate::solver::{DependencySolver, SolveDirection};

/// Whether a configuration's components end up in the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Bound components are built into the artifact.
    #[default]
    Included,
    /// Bindings only make resolution succeed; their components are replaced
    /// by placeholders and must be supplied to each session.
    Excluded,
}

/// Outcome of [`EngineBuilder::simulate`]: the resolved graph and the nodes a
/// build would bake in. Nothing is instantiated.
#[derive(Debug, Clone)]
pub struct Simulation {
    graph: DependencyGraph,
    shareable: Vec<NodeId>,
}

impl Simulation {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn shareable(&self) -> &[NodeId] {
        &self.shareable
    }
}

/// Accumulates configurations and builds artifacts from them.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{ComponentRegistry, Configuration, EngineBuilder};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct Resource;
/// struct Hello;
/// impl Greeter for Hello {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// let mut registry = ComponentRegistry::new();
/// registry.register::<Resource, _>(|_| Ok(Resource));
/// registry
///     .register::<Hello, _>(|ctx| {
///         ctx.get::<Resource>()?;
///         Ok(Hello)
///     })
///     .transient_arg::<Resource>()
///     .shareable()
///     .provides::<dyn Greeter>(|hello| hello);
///
/// let mut config = Configuration::new();
/// config.bind::<dyn Greeter>().to::<Hello>();
/// config.add_root::<dyn Greeter>();
///
/// let mut builder = EngineBuilder::new(registry);
/// builder.add_configuration(config);
/// let artifact = builder.build().unwrap();
///
/// let first = artifact.open_session().unwrap();
/// let second = artifact.open_session().unwrap();
/// let a = first.get::<dyn Greeter>().unwrap();
/// let b = second.get::<dyn Greeter>().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(a.greet(), "hello");
/// first.close();
/// second.close();
/// ```
pub struct EngineBuilder {
    registry: Arc<ComponentRegistry>,
    configurations: Vec<(Configuration, Disposition)>,
    settings: SolverSettings,
}

impl EngineBuilder {
    pub fn new(registry: impl Into<Arc<ComponentRegistry>>) -> Self {
        EngineBuilder {
            registry: registry.into(),
            configurations: Vec::new(),
            settings: SolverSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Adds a configuration layer whose components are built in. Later layers
    /// take precedence over earlier ones.
    pub fn add_configuration(&mut self, config: Configuration) -> &mut Self {
        self.add_configuration_with(config, Disposition::Included)
    }

    pub fn add_configuration_with(&mut self, config: Configuration, disposition: Disposition) -> &mut Self {
        self.configurations.push((config, disposition));
        self
    }

    /// Resolves every root of every layer into a graph, without building.
    pub fn resolve_graph(&self) -> Result<DependencyGraph, ResolutionError> {
        self.resolve_with(&Configuration::new())
    }

    /// Resolves and classifies the graph, reporting which nodes a build
    /// would bake in.
    pub fn simulate(&self) -> Result<Simulation, ResolutionError> {
        let graph = self.resolve_graph()?;
        let shareable = shareable_nodes(&self.registry, &graph);
        Ok(Simulation { graph, shareable })
    }

    pub fn build(&self) -> GraftResult<Artifact> {
        self.build_with_resources(&Configuration::new())
    }

    /// Builds an artifact. `resources` binds externally supplied components:
    /// they take part in resolution as the last layer, but like excluded
    /// layers they are left as placeholders in the artifact.
    ///
    /// When building a shared component fails, everything already acquired
    /// during the build is disposed before the error is returned.
    pub fn build_with_resources(&self, resources: &Configuration) -> GraftResult<Artifact> {
        let graph = self.resolve_with(resources)?;

        let mut lifecycle = LifecycleManager::new();
        let baked = match bake_shareable(&self.registry, &graph, &mut lifecycle) {
            Ok(baked) => baked,
            Err(e) => {
                debug!(pending = lifecycle.len(), "build failed, releasing acquired components");
                lifecycle.close();
                return Err(e.into());
            }
        };

        let excluded = self
            .configurations
            .iter()
            .filter(|(_, disposition)| *disposition == Disposition::Excluded)
            .map(|(config, _)| config)
            .chain(std::iter::once(resources));
        let unsolver = DependencySolver::new(&self.registry, excluded, SolveDirection::Unsolve, self.settings);
        debug!(excluded = unsolver.bound_keys().len(), "excluding components from artifact");
        let rewritten = unsolver.rewrite(&baked).map_err(RewriteError::from)?;
        validate_placeholders(&rewritten, &unsolver.bound_keys())?;

        let artifact = Artifact::new(rewritten, self.registry.clone(), self.settings, lifecycle);
        debug!(
            nodes = artifact.graph().node_count(),
            instantiable = artifact.is_instantiable(),
            "built artifact"
        );
        Ok(artifact)
    }

    /// Resolves with `resources` as the last layer and returns a session over
    /// the whole graph, without baking or excluding anything.
    pub fn build_session(&self, resources: &Configuration) -> GraftResult<Session> {
        let graph = self.resolve_with(resources)?;
        if let Some(id) = graph.placeholder_nodes().first() {
            let key = graph.node(*id).label().satisfaction().erased_type();
            return Err(RewriteError::UnresolvedPlaceholder { key }.into());
        }
        Ok(Session::new(Arc::new(graph), self.registry.clone()))
    }

    fn resolve_with(&self, resources: &Configuration) -> Result<DependencyGraph, ResolutionError> {
        let layers: Vec<&Configuration> = self
            .configurations
            .iter()
            .map(|(config, _)| config)
            .chain(std::iter::once(resources))
            .collect();
        let roots: BTreeSet<TypeKey> = layers.iter().flat_map(|config| config.roots()).collect();
        let desires: Vec<Desire> = roots.into_iter().map(|key| Desire::root(key, None)).collect();
        debug!(layers = layers.len(), roots = desires.len(), "resolving component graph");
        DependencySolver::new(&self.registry, layers, SolveDirection::Solve, self.settings).resolve(&desires)
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("configurations", &self.configurations.len())
            .field("settings", &self.settings)
            .finish()
    }
}

struct ArtifactInner {
    graph: Arc<DependencyGraph>,
    registry: Arc<ComponentRegistry>,
    settings: SolverSettings,
    // Disposal of values acquired while building; runs when the last clone
    // is dropped or on close.
    lifecycle: Mutex<LifecycleManager>,
}

/// A built component graph with its shared components baked in.
///
/// Cloning is cheap and clones share the baked values.
#[derive(Clone)]
pub struct Artifact {
    inner: Arc<ArtifactInner>,
}

impl Artifact {
    fn new(
        graph: DependencyGraph,
        registry: Arc<ComponentRegistry>,
        settings: SolverSettings,
        lifecycle: LifecycleManager,
    ) -> Self {
        Artifact {
            inner: Arc::new(ArtifactInner {
                graph: Arc::new(graph),
                registry,
                settings,
                lifecycle: Mutex::new(lifecycle),
            }),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    /// Settings used when sessions substitute placeholders.
    pub fn settings(&self) -> SolverSettings {
        self.inner.settings
    }

    /// True when no placeholders remain, so sessions need no resources.
    pub fn is_instantiable(&self) -> bool {
        self.inner.graph.placeholder_nodes().is_empty()
    }

    /// Types that must be supplied to every session.
    pub fn placeholder_keys(&self) -> Vec<TypeKey> {
        let graph = &self.inner.graph;
        let keys: BTreeSet<TypeKey> = graph
            .placeholder_nodes()
            .into_iter()
            .map(|id| graph.node(id).label().satisfaction().erased_type())
            .collect();
        keys.into_iter().collect()
    }

    /// Opens a session, substituting the placeholders with the bindings of
    /// `resources`. Fails if a placeholder is left without a substitute.
    pub fn create_session(&self, resources: &Configuration) -> Result<Session, RewriteError> {
        let inner = &self.inner;
        let graph = if resources.rules().is_empty() {
            inner.graph.clone()
        } else {
            let solver = DependencySolver::new(&inner.registry, [resources], SolveDirection::Solve, inner.settings);
            Arc::new(solver.rewrite(&inner.graph)?)
        };
        if let Some(id) = graph.placeholder_nodes().first() {
            let key = graph.node(*id).label().satisfaction().erased_type();
            return Err(RewriteError::UnresolvedPlaceholder { key });
        }
        Ok(Session::new(graph, inner.registry.clone()))
    }

    /// Opens a session on an artifact that needs no resources.
    pub fn open_session(&self) -> Result<Session, RewriteError> {
        self.create_session(&Configuration::new())
    }

    /// Runs `f` with a fresh session and closes it afterwards, whatever `f`
    /// returns.
    pub fn with_session<R>(
        &self,
        resources: &Configuration,
        f: impl FnOnce(&Session) -> Result<R, SessionError>,
    ) -> GraftResult<R> {
        let session = self.create_session(resources)?;
        let result = f(&session);
        session.close();
        Ok(result?)
    }

    /// Disposes the values acquired while building. Baked instances stay in
    /// the graph, so only call this once no session uses them.
    pub fn close(&self) {
        self.inner.lifecycle.lock().close();
    }

    /// Writes the graph as JSON. Every baked instance needs a registered
    /// codec.
    pub fn write<W: Write>(&self, writer: W) -> Result<(), ArtifactError> {
        persist::write_graph(&self.inner.registry, &self.inner.graph, self.inner.settings, writer)
    }

    /// Reads an artifact written by [`write`](Self::write). Types are looked
    /// up by name in `registry`; the solver settings come from the document.
    pub fn read<R: Read>(registry: impl Into<Arc<ComponentRegistry>>, reader: R) -> Result<Artifact, ArtifactError> {
        let registry = registry.into();
        let (graph, settings) = persist::read_graph(&registry, reader)?;
        Ok(Artifact::new(graph, registry, settings, LifecycleManager::new()))
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("nodes", &self.inner.graph.node_count())
            .field("placeholders", &self.placeholder_keys())
            .field("pending_disposals", &self.inner.lifecycle.lock().len())
            .finish()
    }
}
