//! The component graph: node labels, dependency edges and the interned DAG.
//!
//! Nodes live in an arena. A node is only ever added after all of the nodes
//! its edges point to, so every edge points to a lower index and arena order
//! is a topological order (dependencies first). Structurally identical nodes
//! (same label, same outgoing edges) are interned into one.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::binding::Tier;
use crate::error::BoxError;
use crate::key::{key_of, Qualifier, TypeKey};

/// Type-erased component value. Values of type `T` are stored as an erased
/// `Arc<T>` so that sized components and trait objects share one encoding.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

pub(crate) fn erase<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> AnyArc {
    Arc::new(value)
}

pub(crate) fn unerase<T: ?Sized + 'static>(value: &AnyArc) -> Option<Arc<T>> {
    (**value).downcast_ref::<Arc<T>>().cloned()
}

fn addr(value: &AnyArc) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// Marker type for the synthetic root of every graph.
pub struct GraphRoot;

/// Whether a node's value may be reused by every dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Build once per build pass or session and share.
    #[default]
    Memoize,
    /// Build a fresh value for every dependent; never shareable.
    NewInstance,
}

/// A fixed, pre-built component value.
///
/// Instances compare by identity, not by value.
#[derive(Clone)]
pub struct Instance {
    key: TypeKey,
    value: AnyArc,
    addr: usize,
}

impl Instance {
    /// Wraps a value. `T` may be a trait object.
    pub fn new<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        let addr = Arc::as_ptr(&value) as *const () as usize;
        Instance {
            key: key_of::<T>(),
            value: erase(value),
            addr,
        }
    }

    pub(crate) fn from_erased(key: TypeKey, value: AnyArc) -> Self {
        let addr = addr(&value);
        Instance { key, value, addr }
    }

    /// The type the value is stored as.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Returns the value if it is stored as `T`.
    pub fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        unerase(&self.value)
    }

    pub(crate) fn value(&self) -> &AnyArc {
        &self.value
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.addr == other.addr
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.addr.hash(state);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.key, self.addr)
    }
}

type ProvideClosure = dyn Fn() -> Result<AnyArc, BoxError> + Send + Sync;

/// A closure bound as the provider of a value. Compares by identity.
#[derive(Clone)]
pub struct ProviderFn {
    output: TypeKey,
    f: Arc<ProvideClosure>,
}

impl ProviderFn {
    pub(crate) fn new<T, F>(f: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        ProviderFn {
            output: key_of::<T>(),
            f: Arc::new(move || f().map(erase)),
        }
    }

    /// The type of value produced.
    pub fn output(&self) -> TypeKey {
        self.output
    }

    pub(crate) fn call(&self) -> Result<AnyArc, BoxError> {
        (self.f)()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }
}

impl PartialEq for ProviderFn {
    fn eq(&self, other: &Self) -> bool {
        self.output == other.output && self.addr() == other.addr()
    }
}

impl Eq for ProviderFn {}

impl Hash for ProviderFn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.output.hash(state);
        self.addr().hash(state);
    }
}

impl fmt::Debug for ProviderFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn() -> {}", self.output)
    }
}

/// How the value of a node is produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Satisfaction {
    /// Construct the registered component type.
    Class(TypeKey),
    /// Construct the registered provider and ask it for its output.
    Provider { provider: TypeKey, output: TypeKey },
    /// Call a bound closure.
    ProviderFn(ProviderFn),
    /// Use a fixed value.
    Instance(Instance),
    /// A value to be supplied later.
    Placeholder(TypeKey),
    /// No value; injected as `None`.
    Null(TypeKey),
}

impl Satisfaction {
    /// The type of the value this satisfaction produces.
    pub fn erased_type(&self) -> TypeKey {
        match self {
            Satisfaction::Class(k) | Satisfaction::Placeholder(k) | Satisfaction::Null(k) => *k,
            Satisfaction::Provider { output, .. } => *output,
            Satisfaction::ProviderFn(p) => p.output(),
            Satisfaction::Instance(i) => i.key(),
        }
    }

    pub fn has_instance(&self) -> bool {
        matches!(self, Satisfaction::Instance(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Satisfaction::Placeholder(_))
    }
}

impl fmt::Display for Satisfaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Satisfaction::Class(k) => write!(f, "{}", k),
            Satisfaction::Provider { provider, output } => write!(f, "{} via {}", output, provider),
            Satisfaction::ProviderFn(p) => write!(f, "{:?}", p),
            Satisfaction::Instance(i) => write!(f, "instance of {}", i.key()),
            Satisfaction::Placeholder(k) => write!(f, "placeholder for {}", k),
            Satisfaction::Null(k) => write!(f, "null {}", k),
        }
    }
}

/// A node label: a satisfaction plus its cache policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Component {
    satisfaction: Satisfaction,
    policy: CachePolicy,
}

impl Component {
    pub fn new(satisfaction: Satisfaction, policy: CachePolicy) -> Self {
        Component {
            satisfaction,
            policy,
        }
    }

    pub(crate) fn root() -> Self {
        Component::new(Satisfaction::Null(key_of::<GraphRoot>()), CachePolicy::Memoize)
    }

    pub fn satisfaction(&self) -> &Satisfaction {
        &self.satisfaction
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn is_root(&self) -> bool {
        self == &Component::root()
    }
}

/// Where on a component a dependency is injected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionPoint {
    /// Positional constructor argument.
    Constructor(usize),
    /// Argument of a named setter.
    Setter(Cow<'static, str>, usize),
    /// Named field.
    Field(Cow<'static, str>),
    /// A root request with no owning component.
    Synthetic,
}

impl InjectionPoint {
    fn rank(&self) -> (u8, &str, usize) {
        match self {
            InjectionPoint::Constructor(i) => (0, "", *i),
            InjectionPoint::Setter(name, i) => (1, name, *i),
            InjectionPoint::Field(name) => (2, name, 0),
            InjectionPoint::Synthetic => (5, "", 0),
        }
    }
}

/// A request for a possibly-qualified type from one injection point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Desire {
    key: TypeKey,
    qualifier: Option<Qualifier>,
    point: InjectionPoint,
    transient: bool,
    optional: bool,
}

impl Desire {
    pub fn new(key: TypeKey, point: InjectionPoint) -> Self {
        Desire {
            key,
            qualifier: None,
            point,
            transient: false,
            optional: false,
        }
    }

    /// A top-level request made on behalf of the graph root.
    pub fn root(key: TypeKey, qualifier: Option<Qualifier>) -> Self {
        Desire {
            qualifier,
            ..Desire::new(key, InjectionPoint::Synthetic)
        }
    }

    pub fn with_qualifier(mut self, qualifier: Option<Qualifier>) -> Self {
        self.qualifier = qualifier;
        self
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    pub fn point(&self) -> &InjectionPoint {
        &self.point
    }

    /// Whether the dependency is only needed while building its owner.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Canonical edge order: constructor, setters, fields, synthetic.
    pub(crate) fn order_key(&self) -> (u8, &str, usize, &'static str, Option<&str>) {
        let (kind, name, index) = self.point.rank();
        (kind, name, index, self.key.name(), self.qualifier.as_ref().map(|q| q.name()))
    }
}

impl fmt::Display for Desire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{} {}", q, self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Identifies the binding rule that resolved a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRef {
    pub tier: Tier,
    pub layer: usize,
    pub index: usize,
}

/// Edge label: the original desire plus the rule that resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    desire: Desire,
    rule: Option<RuleRef>,
}

impl Dependency {
    pub fn new(desire: Desire, rule: Option<RuleRef>) -> Self {
        Dependency { desire, rule }
    }

    pub fn desire(&self) -> &Desire {
        &self.desire
    }

    /// `None` when the dependency was resolved implicitly.
    pub fn rule(&self) -> Option<RuleRef> {
        self.rule
    }
}

/// Index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    dependency: Dependency,
    tail: NodeId,
}

impl Edge {
    pub fn new(dependency: Dependency, tail: NodeId) -> Self {
        Edge { dependency, tail }
    }

    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    pub fn desire(&self) -> &Desire {
        &self.dependency.desire
    }

    /// The node the edge points to.
    pub fn tail(&self) -> NodeId {
        self.tail
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    label: Component,
    edges: Vec<Edge>,
}

impl Node {
    pub fn label(&self) -> &Component {
        &self.label
    }

    /// Outgoing edges in canonical order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
}

/// A resolved, acyclic component graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl DependencyGraph {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes reachable from the root, dependencies before dependents.
    /// The root itself comes last.
    pub fn sorted_nodes(&self) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        seen[self.root.0] = true;
        while let Some(id) = stack.pop() {
            for edge in &self.nodes[id.0].edges {
                if !seen[edge.tail.0] {
                    seen[edge.tail.0] = true;
                    stack.push(edge.tail);
                }
            }
        }
        // Edges always point to lower indices, so index order is topological.
        seen.iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Edges in breadth-first order from the root, each node expanded once.
    pub fn breadth_first_edges(&self) -> Vec<&Edge> {
        let mut out = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([self.root]);
        seen[self.root.0] = true;
        while let Some(id) = queue.pop_front() {
            for edge in &self.nodes[id.0].edges {
                out.push(edge);
                if !seen[edge.tail.0] {
                    seen[edge.tail.0] = true;
                    queue.push_back(edge.tail);
                }
            }
        }
        out
    }

    /// Reachable placeholder nodes.
    pub fn placeholder_nodes(&self) -> Vec<NodeId> {
        self.sorted_nodes()
            .into_iter()
            .filter(|id| self.node(*id).label.satisfaction.is_placeholder())
            .collect()
    }
}

/// Interning arena used by every pass that produces a graph.
#[derive(Default)]
pub(crate) struct GraphBuilder {
    nodes: Vec<Node>,
    index: HashMap<Node, NodeId>,
}

impl GraphBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or returns the existing node with the same label and edges.
    pub(crate) fn intern(&mut self, label: Component, mut edges: Vec<Edge>) -> NodeId {
        edges.sort_by(|a, b| a.desire().order_key().cmp(&b.desire().order_key()));
        debug_assert!(edges.iter().all(|e| e.tail.0 < self.nodes.len()));
        let node = Node { label, edges };
        if let Some(id) = self.index.get(&node) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node.clone());
        self.index.insert(node, id);
        id
    }

    pub(crate) fn finish(self, root: NodeId) -> DependencyGraph {
        DependencyGraph {
            nodes: self.nodes,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;
    struct Branch;

    fn class<T: 'static>() -> Component {
        Component::new(Satisfaction::Class(key_of::<T>()), CachePolicy::Memoize)
    }

    fn edge(key: TypeKey, point: InjectionPoint, tail: NodeId) -> Edge {
        Edge::new(Dependency::new(Desire::new(key, point), None), tail)
    }

    #[test]
    fn identical_nodes_are_interned() {
        let mut b = GraphBuilder::new();
        let a = b.intern(class::<Leaf>(), vec![]);
        let again = b.intern(class::<Leaf>(), vec![]);
        assert_eq!(a, again);

        let other = b.intern(
            Component::new(Satisfaction::Class(key_of::<Leaf>()), CachePolicy::NewInstance),
            vec![],
        );
        assert_ne!(a, other);
    }

    #[test]
    fn edges_are_sorted_canonically() {
        let mut b = GraphBuilder::new();
        let leaf = b.intern(class::<Leaf>(), vec![]);
        let branch = b.intern(
            class::<Branch>(),
            vec![
                edge(key_of::<u8>(), InjectionPoint::Field("z".into()), leaf),
                edge(key_of::<u16>(), InjectionPoint::Setter("set_a".into(), 0), leaf),
                edge(key_of::<u32>(), InjectionPoint::Constructor(1), leaf),
                edge(key_of::<u64>(), InjectionPoint::Constructor(0), leaf),
            ],
        );
        let graph = b.finish(branch);
        let keys: Vec<_> = graph
            .node(branch)
            .edges()
            .iter()
            .map(|e| e.desire().key())
            .collect();
        assert_eq!(
            keys,
            vec![key_of::<u64>(), key_of::<u32>(), key_of::<u16>(), key_of::<u8>()]
        );
    }

    #[test]
    fn traversal_orders() {
        let mut b = GraphBuilder::new();
        let leaf = b.intern(class::<Leaf>(), vec![]);
        let _orphan = b.intern(class::<u8>(), vec![]);
        let branch = b.intern(
            class::<Branch>(),
            vec![edge(key_of::<Leaf>(), InjectionPoint::Constructor(0), leaf)],
        );
        let root = b.intern(
            Component::root(),
            vec![edge(key_of::<Branch>(), InjectionPoint::Synthetic, branch)],
        );
        let graph = b.finish(root);

        assert_eq!(graph.sorted_nodes(), vec![leaf, branch, root]);
        let tails: Vec<_> = graph.breadth_first_edges().iter().map(|e| e.tail()).collect();
        assert_eq!(tails, vec![branch, leaf]);
        assert!(graph.placeholder_nodes().is_empty());
    }

    #[test]
    fn instances_compare_by_identity() {
        let a = Arc::new(5u32);
        let i1 = Instance::new(a.clone());
        let i2 = Instance::new(Arc::new(5u32));
        assert_ne!(i1, i2);
        assert_eq!(i1, Instance::new(a));
        assert_eq!(i1, i1.clone());
        assert_eq!(*i1.get::<u32>().unwrap(), 5);
        assert!(i1.get::<u64>().is_none());
    }
}
