//! Sessions: on-demand construction of the components an artifact left
//! unbuilt.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::graph::{unerase, AnyArc, DependencyGraph, NodeId};
use crate::instantiate::{convert_to, NodeInstantiator};
use crate::key::{key_of, Qualifier, TypeKey};
use crate::lifecycle::LifecycleManager;
use crate::registry::ComponentRegistry;

/// Builds components from a finished graph on request.
///
/// Within a session every memoized component is built at most once. Baked
/// components are the same values in every session of an artifact. A session
/// is used from one thread; open one per thread or per unit of work.
///
/// Closing disposes what the session built. A session dropped without being
/// closed logs a warning and closes itself.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{ComponentRegistry, Configuration, EngineBuilder, SessionError};
///
/// struct Clock;
/// struct Scheduler;
///
/// let mut registry = ComponentRegistry::new();
/// registry.register::<Clock, _>(|_| Ok(Clock));
/// registry.register::<Scheduler, _>(|ctx| {
///     ctx.get::<Clock>()?;
///     Ok(Scheduler)
/// })
/// .arg::<Clock>();
///
/// let mut config = Configuration::new();
/// config.add_root::<Scheduler>();
/// let mut builder = EngineBuilder::new(registry);
/// builder.add_configuration(config);
///
/// let session = builder.build().unwrap().open_session().unwrap();
/// assert!(session.get::<Scheduler>().is_ok());
/// // Reachable dependencies can be requested too.
/// assert!(session.get::<Clock>().is_ok());
/// assert!(matches!(session.get::<String>(), Err(SessionError::NoResolution { .. })));
/// session.close();
/// ```
pub struct Session {
    graph: Arc<DependencyGraph>,
    registry: Arc<ComponentRegistry>,
    memo: RefCell<HashMap<NodeId, AnyArc>>,
    lifecycle: RefCell<LifecycleManager>,
    closed: Cell<bool>,
}

impl Session {
    pub(crate) fn new(graph: Arc<DependencyGraph>, registry: Arc<ComponentRegistry>) -> Self {
        Session {
            graph,
            registry,
            memo: RefCell::new(HashMap::new()),
            lifecycle: RefCell::new(LifecycleManager::new()),
            closed: Cell::new(false),
        }
    }

    /// The graph this session builds from.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Fetches the unqualified component of type `T`, which may be a trait
    /// object type.
    pub fn get<T: ?Sized + 'static>(&self) -> Result<Arc<T>, SessionError> {
        self.required(None)
    }

    pub fn get_qualified<T: ?Sized + 'static>(&self, qualifier: impl Into<Qualifier>) -> Result<Arc<T>, SessionError> {
        self.required(Some(&qualifier.into()))
    }

    /// Like [`get`](Self::get), but `Ok(None)` when nothing in the graph
    /// matches or the match resolved to nothing.
    pub fn try_get<T: ?Sized + 'static>(&self) -> Result<Option<Arc<T>>, SessionError> {
        match self.fetch::<T>(None) {
            Err(SessionError::NoResolution { .. }) => Ok(None),
            other => other,
        }
    }

    /// Disposes everything this session built, most recent first. Further
    /// requests fail with [`SessionError::Closed`].
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let mut lifecycle = self.lifecycle.borrow_mut();
        debug!(disposals = lifecycle.len(), "closing session");
        lifecycle.close();
        self.memo.borrow_mut().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn required<T: ?Sized + 'static>(&self, qualifier: Option<&Qualifier>) -> Result<Arc<T>, SessionError> {
        self.fetch::<T>(qualifier)?.ok_or_else(|| SessionError::NoResolution {
            key: key_of::<T>(),
            qualifier: qualifier.cloned(),
        })
    }

    fn fetch<T: ?Sized + 'static>(&self, qualifier: Option<&Qualifier>) -> Result<Option<Arc<T>>, SessionError> {
        if self.closed.get() {
            return Err(SessionError::Closed);
        }
        let key = key_of::<T>();
        let id = self.find(key, qualifier).ok_or_else(|| SessionError::NoResolution {
            key,
            qualifier: qualifier.cloned(),
        })?;

        let value = {
            let mut memo = self.memo.borrow_mut();
            let mut lifecycle = self.lifecycle.borrow_mut();
            NodeInstantiator::new(&self.registry, &self.graph, &mut memo, &mut lifecycle).instantiate(id)?
        };
        let Some(value) = value else {
            return Ok(None);
        };
        convert_to(&self.registry, &self.graph, id, value, key)
            .and_then(|converted| unerase::<T>(&converted))
            .map(Some)
            .ok_or(SessionError::TypeMismatch { key })
    }

    /// The node serving requests for `key`: a root dependency asking for
    /// exactly this, otherwise the first compatible node breadth-first.
    fn find(&self, key: TypeKey, qualifier: Option<&Qualifier>) -> Option<NodeId> {
        let graph = &self.graph;
        let root = graph.node(graph.root());
        if let Some(edge) = root
            .edges()
            .iter()
            .find(|e| e.desire().key() == key && e.desire().qualifier() == qualifier)
        {
            return Some(edge.tail());
        }
        graph
            .breadth_first_edges()
            .into_iter()
            .find(|e| {
                let provided = graph.node(e.tail()).label().satisfaction().erased_type();
                e.desire().qualifier() == qualifier && self.registry.is_assignable(provided, key)
            })
            .map(|e| e.tail())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.get() {
            warn!("session dropped without being closed");
            self.close();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("nodes", &self.graph.node_count())
            .field("built", &self.memo.borrow().len())
            .field("closed", &self.closed.get())
            .finish()
    }
}
