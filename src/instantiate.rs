//! Building values for graph nodes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::error::{InjectError, InstantiationError};
use crate::graph::{unerase, AnyArc, CachePolicy, DependencyGraph, Desire, InjectionPoint, NodeId, Satisfaction};
use crate::key::{key_of, Qualifier, TypeKey};
use crate::lifecycle::LifecycleManager;
use crate::parameter::Parameter;
use crate::registry::ComponentRegistry;

/// The dependencies of one component, already built, handed to its
/// constructor.
///
/// Every value was built from the component's declared injection points, so a
/// lookup for something that was not declared fails with
/// [`InjectError::Undeclared`].
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{ComponentRegistry, Parameter};
/// use std::sync::Arc;
///
/// struct Iterations;
/// impl Parameter for Iterations {
///     type Value = usize;
///     const NAME: &'static str = "iterations";
///     fn default_value() -> Option<usize> { Some(10) }
/// }
///
/// struct Data;
/// struct Trainer { data: Option<Arc<Data>>, iterations: usize }
///
/// let mut registry = ComponentRegistry::new();
/// registry
///     .register::<Trainer, _>(|ctx| {
///         Ok(Trainer {
///             data: ctx.get_optional::<Data>()?,
///             iterations: ctx.param::<Iterations>()?,
///         })
///     })
///     .optional_arg::<Data>()
///     .param::<Iterations>();
/// ```
pub struct InjectionContext<'a> {
    component: TypeKey,
    deps: &'a [(Desire, Option<AnyArc>)],
}

impl<'a> InjectionContext<'a> {
    pub(crate) fn new(component: TypeKey, deps: &'a [(Desire, Option<AnyArc>)]) -> Self {
        InjectionContext { component, deps }
    }

    /// The component being constructed.
    pub fn component(&self) -> TypeKey {
        self.component
    }

    /// Fetches the unqualified dependency of type `T`.
    pub fn get<T: ?Sized + 'static>(&self) -> Result<Arc<T>, InjectError> {
        self.required(self.find::<T>(None)?)
    }

    pub fn get_qualified<T: ?Sized + 'static>(&self, qualifier: impl Into<Qualifier>) -> Result<Arc<T>, InjectError> {
        let qualifier = qualifier.into();
        self.required(self.find::<T>(Some(&qualifier))?)
    }

    /// Fetches an optional dependency; `None` when it resolved to nothing.
    pub fn get_optional<T: ?Sized + 'static>(&self) -> Result<Option<Arc<T>>, InjectError> {
        self.find::<T>(None)
    }

    /// Fetches the constructor argument at `index`.
    pub fn arg<T: ?Sized + 'static>(&self, index: usize) -> Result<Arc<T>, InjectError> {
        self.required(self.find_at::<T>(|p| *p == InjectionPoint::Constructor(index))?)
    }

    /// Fetches the dependency declared for a named setter.
    pub fn setter<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>, InjectError> {
        self.required(self.find_at::<T>(|p| matches!(p, InjectionPoint::Setter(n, _) if n == name))?)
    }

    /// Fetches the dependency declared for a named field.
    pub fn field<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>, InjectError> {
        self.required(self.find_at::<T>(|p| matches!(p, InjectionPoint::Field(n) if n == name))?)
    }

    /// Fetches the value of parameter `P`.
    pub fn param<P: Parameter>(&self) -> Result<P::Value, InjectError> {
        let value = self.get_qualified::<P::Value>(P::qualifier())?;
        Ok((*value).clone())
    }

    fn find<T: ?Sized + 'static>(&self, qualifier: Option<&Qualifier>) -> Result<Option<Arc<T>>, InjectError> {
        let key = key_of::<T>();
        let slot = self
            .deps
            .iter()
            .find(|(d, _)| d.key() == key && d.qualifier() == qualifier)
            .ok_or_else(|| InjectError::Undeclared {
                component: self.component,
                key,
                qualifier: qualifier.cloned(),
            })?;
        self.downcast(key, &slot.1)
    }

    fn find_at<T: ?Sized + 'static>(&self, at: impl Fn(&InjectionPoint) -> bool) -> Result<Option<Arc<T>>, InjectError> {
        let key = key_of::<T>();
        let slot = self
            .deps
            .iter()
            .find(|(d, _)| d.key() == key && at(d.point()))
            .ok_or(InjectError::Undeclared {
                component: self.component,
                key,
                qualifier: None,
            })?;
        self.downcast(key, &slot.1)
    }

    fn downcast<T: ?Sized + 'static>(&self, key: TypeKey, value: &Option<AnyArc>) -> Result<Option<Arc<T>>, InjectError> {
        match value {
            None => Ok(None),
            Some(v) => unerase::<T>(v).map(Some).ok_or(InjectError::TypeMismatch {
                component: self.component,
                key,
            }),
        }
    }

    fn required<T: ?Sized + 'static>(&self, value: Option<Arc<T>>) -> Result<Arc<T>, InjectError> {
        value.ok_or(InjectError::Absent {
            component: self.component,
            key: key_of::<T>(),
        })
    }
}

/// Builds node values on demand, sharing one memo table and one lifecycle
/// across every node of a pass.
pub(crate) struct NodeInstantiator<'a> {
    registry: &'a ComponentRegistry,
    graph: &'a DependencyGraph,
    memo: &'a mut HashMap<NodeId, AnyArc>,
    lifecycle: &'a mut LifecycleManager,
    // Nodes whose disposal goes to a second, longer-lived lifecycle.
    retained: Option<(&'a HashSet<NodeId>, &'a mut LifecycleManager)>,
}

impl<'a> NodeInstantiator<'a> {
    pub(crate) fn new(
        registry: &'a ComponentRegistry,
        graph: &'a DependencyGraph,
        memo: &'a mut HashMap<NodeId, AnyArc>,
        lifecycle: &'a mut LifecycleManager,
    ) -> Self {
        NodeInstantiator {
            registry,
            graph,
            memo,
            lifecycle,
            retained: None,
        }
    }

    /// Sends the disposal hooks of `nodes` to `lifecycle` instead.
    pub(crate) fn retaining(mut self, nodes: &'a HashSet<NodeId>, lifecycle: &'a mut LifecycleManager) -> Self {
        self.retained = Some((nodes, lifecycle));
        self
    }

    /// Returns the value of a node, building it and its dependencies if
    /// needed. Null nodes have no value.
    pub(crate) fn instantiate(&mut self, id: NodeId) -> Result<Option<AnyArc>, InstantiationError> {
        if let Some(value) = self.memo.get(&id) {
            return Ok(Some(value.clone()));
        }
        let graph = self.graph;
        let label = graph.node(id).label();
        let value = match label.satisfaction() {
            Satisfaction::Null(_) => return Ok(None),
            Satisfaction::Placeholder(key) => return Err(InstantiationError::Placeholder { key: *key }),
            Satisfaction::Instance(instance) => return Ok(Some(instance.value().clone())),
            Satisfaction::Class(key) => self.construct(id, *key)?,
            Satisfaction::Provider { provider, output } => {
                let provider_value = self.construct(id, *provider)?;
                let def = self
                    .registry
                    .component(*provider)
                    .and_then(|d| d.provider.as_ref())
                    .ok_or(InstantiationError::MissingConstructor { key: *provider })?;
                (def.provide)(&provider_value).map_err(|source| InstantiationError::ConstructorFailed {
                    component: output.to_string(),
                    source,
                })?
            }
            Satisfaction::ProviderFn(f) => f.call().map_err(|source| InstantiationError::ConstructorFailed {
                component: f.output().to_string(),
                source,
            })?,
        };

        let erased = label.satisfaction().erased_type();
        if let Some(hook) = self.registry.component(erased).and_then(|d| d.dispose.as_ref()) {
            if let Some(dispose) = hook(&value) {
                match &mut self.retained {
                    Some((nodes, kept)) if nodes.contains(&id) => kept.register(dispose),
                    _ => self.lifecycle.register(dispose),
                }
            }
        }
        if label.policy() == CachePolicy::Memoize {
            self.memo.insert(id, value.clone());
        }
        Ok(Some(value))
    }

    fn construct(&mut self, id: NodeId, key: TypeKey) -> Result<AnyArc, InstantiationError> {
        let def = self
            .registry
            .component(key)
            .ok_or(InstantiationError::MissingConstructor { key })?;
        let deps = self.dependencies(id, key)?;
        trace!(component = %key, dependencies = deps.len(), "constructing component");
        (def.ctor)(&InjectionContext::new(key, &deps)).map_err(|source| InstantiationError::ConstructorFailed {
            component: key.to_string(),
            source,
        })
    }

    fn dependencies(&mut self, id: NodeId, component: TypeKey) -> Result<Vec<(Desire, Option<AnyArc>)>, InstantiationError> {
        let graph = self.graph;
        let mut deps = Vec::with_capacity(graph.node(id).edges().len());
        for edge in graph.node(id).edges() {
            let desire = edge.desire();
            let from = graph.node(edge.tail()).label().satisfaction().erased_type();
            let value = match self.instantiate(edge.tail())? {
                None => None,
                Some(v) => Some(self.registry.convert(v, from, desire.key()).ok_or_else(|| {
                    InstantiationError::TypeMismatch {
                        component: component.to_string(),
                        from,
                        to: desire.key(),
                    }
                })?),
            };
            deps.push((desire.clone(), value));
        }
        Ok(deps)
    }
}

/// Converts a node's value to the type a caller asked for.
pub(crate) fn convert_to(
    registry: &ComponentRegistry,
    graph: &DependencyGraph,
    id: NodeId,
    value: AnyArc,
    to: TypeKey,
) -> Option<AnyArc> {
    let from = graph.node(id).label().satisfaction().erased_type();
    registry.convert(value, from, to)
}
