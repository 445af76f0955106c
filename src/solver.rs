//! Dependency solver: turns root desires and layered rules into a graph, and
//! rewrites existing graphs with another rule set.
//!
//! Rules are consulted tier by tier (explicit, intermediate, super). Within a
//! tier the most recently added layer is consulted first, and within a layer
//! the rule with the most specific matching context wins, later rules winning
//! ties. When no rule matches, the solver falls back to implicit resolution:
//! parameter defaults, the registered constructor of the type itself, then a
//! declared default implementation.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, trace};

use crate::binding::{BindRule, Configuration, ContextFrame, Tier};
use crate::error::ResolutionError;
use crate::graph::{
    CachePolicy, Component, Dependency, DependencyGraph, Desire, Edge, GraphBuilder, NodeId, RuleRef, Satisfaction,
};
use crate::key::{Qualifier, TypeKey};
use crate::registry::{ComponentRegistry, DefaultImpl};
use crate::settings::SolverSettings;

/// What the rule set produces for the desires it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveDirection {
    /// Rules resolve to their bound satisfactions.
    Solve,
    /// Rules resolve to placeholders for the type they bind.
    Unsolve,
}

struct TieredRule {
    rule: BindRule,
    source: RuleRef,
    slot: usize,
}

struct Resolved {
    satisfaction: Satisfaction,
    policy: CachePolicy,
    rule: Option<RuleRef>,
}

/// Resolves desires against a fixed stack of configuration layers.
pub struct DependencySolver<'r> {
    registry: &'r ComponentRegistry,
    // tier -> layers, most recent first -> rules
    tiers: Vec<Vec<Vec<TieredRule>>>,
    settings: SolverSettings,
    // Unsolve only: the same layers in the solve direction, telling which
    // existing satisfactions the rules account for.
    solved: Option<Box<DependencySolver<'r>>>,
}

impl<'r> DependencySolver<'r> {
    /// Builds the rule functions for `layers`, given oldest first.
    pub fn new<'c>(
        registry: &'r ComponentRegistry,
        layers: impl IntoIterator<Item = &'c Configuration>,
        direction: SolveDirection,
        settings: SolverSettings,
    ) -> Self {
        let layers: Vec<&Configuration> = layers.into_iter().collect();
        let mut tiers: Vec<Vec<Vec<TieredRule>>> = Tier::ALL.iter().map(|_| Vec::new()).collect();
        let mut slot = 0;

        for (layer, config) in layers.iter().enumerate().rev() {
            let mut generated: [Vec<TieredRule>; 3] = Default::default();
            for (index, rule) in config.rules().iter().enumerate() {
                for (tier, derived) in expand(registry, rule) {
                    let derived = match direction {
                        SolveDirection::Solve => derived,
                        SolveDirection::Unsolve => {
                            let key = derived.key();
                            derived.derive(key, Satisfaction::Placeholder(key), true)
                        }
                    };
                    generated[tier as usize].push(TieredRule {
                        rule: derived,
                        source: RuleRef { tier, layer, index },
                        slot,
                    });
                    slot += 1;
                }
            }
            for (tier, rules) in generated.into_iter().enumerate() {
                tiers[tier].push(rules);
            }
        }

        let solved = match direction {
            SolveDirection::Solve => None,
            SolveDirection::Unsolve => Some(Box::new(DependencySolver::new(
                registry,
                layers.iter().copied(),
                SolveDirection::Solve,
                settings,
            ))),
        };

        DependencySolver {
            registry,
            tiers,
            settings,
            solved,
        }
    }

    /// Every type some rule of this solver binds.
    pub fn bound_keys(&self) -> BTreeSet<TypeKey> {
        self.tiers
            .iter()
            .flatten()
            .flatten()
            .map(|r| r.rule.key())
            .collect()
    }

    /// Resolves the given root desires into a fresh graph.
    pub fn resolve(&self, roots: &[Desire]) -> Result<DependencyGraph, ResolutionError> {
        let mut builder = GraphBuilder::new();
        let mut path = Vec::new();
        let mut edges = Vec::with_capacity(roots.len());
        for desire in roots {
            edges.push(self.resolve_desire(desire, &mut path, &mut builder)?);
        }
        let root = builder.intern(Component::root(), edges);
        let graph = builder.finish(root);
        debug!(roots = roots.len(), nodes = graph.node_count(), "resolved component graph");
        Ok(graph)
    }

    /// Rewrites `graph` top-down: every edge whose desire is matched by a rule
    /// of this solver, and whose current satisfaction differs from the rule's,
    /// is re-resolved; everything else is kept.
    ///
    /// An unsolving rewrite only replaces satisfactions its own layers would
    /// have produced, or instances baked from them. Edges resolved by other
    /// layers are kept even when the desire matches a rule.
    pub fn rewrite(&self, graph: &DependencyGraph) -> Result<DependencyGraph, ResolutionError> {
        let mut builder = GraphBuilder::new();
        let mut memo = HashMap::new();
        let mut path = Vec::new();
        let root = graph.node(graph.root());
        let mut edges = Vec::with_capacity(root.edges().len());
        for edge in root.edges() {
            edges.push(self.rewrite_edge(graph, edge, &mut path, &mut builder, &mut memo)?);
        }
        let root = builder.intern(root.label().clone(), edges);
        let rewritten = builder.finish(root);
        debug!(
            before = graph.node_count(),
            after = rewritten.node_count(),
            "rewrote component graph"
        );
        Ok(rewritten)
    }

    fn resolve_desire(
        &self,
        desire: &Desire,
        path: &mut Vec<ContextFrame>,
        builder: &mut GraphBuilder,
    ) -> Result<Edge, ResolutionError> {
        if path.len() >= self.settings.max_depth {
            let mut trail: Vec<String> = path.iter().map(ToString::to_string).collect();
            trail.push(desire.to_string());
            return Err(ResolutionError::DepthExceeded {
                limit: self.settings.max_depth,
                path: trail,
            });
        }

        let resolved = match self.select(desire, path, true)? {
            Some(resolved) => resolved,
            None if desire.is_optional() => Resolved {
                satisfaction: Satisfaction::Null(desire.key()),
                policy: self.settings.default_policy,
                rule: None,
            },
            None => {
                return Err(ResolutionError::NoResolution {
                    key: desire.key(),
                    qualifier: desire.qualifier().cloned(),
                    context: describe(path),
                })
            }
        };
        let rule = resolved.rule;
        let tail = self.build_node(desire, resolved.satisfaction, resolved.policy, path, builder)?;
        Ok(Edge::new(Dependency::new(desire.clone(), rule), tail))
    }

    fn build_node(
        &self,
        desire: &Desire,
        satisfaction: Satisfaction,
        policy: CachePolicy,
        path: &mut Vec<ContextFrame>,
        builder: &mut GraphBuilder,
    ) -> Result<NodeId, ResolutionError> {
        let target = satisfaction.erased_type();
        let declared: &[Desire] = match &satisfaction {
            Satisfaction::Class(key) => &self
                .registry
                .component(*key)
                .ok_or(ResolutionError::MissingConstructor { key: *key })?
                .desires,
            Satisfaction::Provider { provider, .. } => &self
                .registry
                .component(*provider)
                .filter(|def| def.provider.is_some())
                .ok_or(ResolutionError::MissingConstructor { key: *provider })?
                .desires,
            _ => &[],
        };
        if !self.registry.is_assignable(target, desire.key()) {
            return Err(ResolutionError::IncompatibleBinding {
                requested: desire.key(),
                target,
            });
        }

        let mut children: Vec<&Desire> = declared.iter().collect();
        children.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        path.push(ContextFrame {
            key: target,
            qualifier: desire.qualifier().cloned(),
        });
        let mut edges = Vec::with_capacity(children.len());
        for child in children {
            edges.push(self.resolve_desire(child, path, builder)?);
        }
        path.pop();

        Ok(builder.intern(Component::new(satisfaction, policy), edges))
    }

    fn rewrite_edge(
        &self,
        graph: &DependencyGraph,
        edge: &Edge,
        path: &mut Vec<ContextFrame>,
        builder: &mut GraphBuilder,
        memo: &mut HashMap<(NodeId, Vec<ContextFrame>), NodeId>,
    ) -> Result<Edge, ResolutionError> {
        let desire = edge.desire();
        let current = graph.node(edge.tail()).label().satisfaction();
        if let Some(resolved) = self.select(desire, path, false)? {
            if resolved.satisfaction != *current && self.accounts_for(desire, path, current)? {
                trace!(desire = %desire, from = %current, to = %resolved.satisfaction, "rewriting dependency");
                let rule = resolved.rule;
                let tail = self.build_node(desire, resolved.satisfaction, resolved.policy, path, builder)?;
                return Ok(Edge::new(Dependency::new(desire.clone(), rule), tail));
            }
        }
        let tail = self.rewrite_node(graph, edge.tail(), desire.qualifier(), path, builder, memo)?;
        Ok(Edge::new(edge.dependency().clone(), tail))
    }

    /// Whether the rules would have produced `current` for `desire`. Always
    /// true when solving.
    fn accounts_for(
        &self,
        desire: &Desire,
        path: &[ContextFrame],
        current: &Satisfaction,
    ) -> Result<bool, ResolutionError> {
        let Some(solved) = &self.solved else {
            return Ok(true);
        };
        Ok(match solved.select(desire, path, false)? {
            None => false,
            Some(resolved) => match current {
                Satisfaction::Instance(instance) => {
                    resolved.satisfaction == *current || resolved.satisfaction.erased_type() == instance.key()
                }
                _ => resolved.satisfaction == *current,
            },
        })
    }

    fn rewrite_node(
        &self,
        graph: &DependencyGraph,
        id: NodeId,
        qualifier: Option<&Qualifier>,
        path: &mut Vec<ContextFrame>,
        builder: &mut GraphBuilder,
        memo: &mut HashMap<(NodeId, Vec<ContextFrame>), NodeId>,
    ) -> Result<NodeId, ResolutionError> {
        let node = graph.node(id);
        path.push(ContextFrame {
            key: node.label().satisfaction().erased_type(),
            qualifier: qualifier.cloned(),
        });
        let memo_key = (id, path.clone());
        if let Some(done) = memo.get(&memo_key) {
            path.pop();
            return Ok(*done);
        }
        let mut edges = Vec::with_capacity(node.edges().len());
        for edge in node.edges() {
            edges.push(self.rewrite_edge(graph, edge, path, builder, memo)?);
        }
        path.pop();
        let rewritten = builder.intern(node.label().clone(), edges);
        memo.insert(memo_key, rewritten);
        Ok(rewritten)
    }

    /// Follows the rule chain for `desire`. With `implicit` unset only rules
    /// are consulted, and `None` means no rule matched.
    fn select(
        &self,
        desire: &Desire,
        path: &[ContextFrame],
        implicit: bool,
    ) -> Result<Option<Resolved>, ResolutionError> {
        let qualifier = desire.qualifier();
        let mut current = desire.key();
        let mut applied = HashSet::new();
        let mut defaults_seen = HashSet::new();
        let mut policy = None;
        let mut first_rule = None;

        loop {
            if let Some(found) = self.lookup(current, qualifier, path, &applied) {
                applied.insert(found.slot);
                first_rule.get_or_insert(found.source);
                if let Some(p) = found.rule.policy() {
                    policy = Some(p);
                }
                trace!(desire = %desire, rule = %found.rule, "applying binding rule");
                match found.rule.target() {
                    Satisfaction::Class(next) if !found.rule.is_terminal() => {
                        current = *next;
                        continue;
                    }
                    target => return Ok(Some(self.resolved(target.clone(), policy, first_rule))),
                }
            }

            if !implicit {
                return Ok(first_rule.map(|rule| self.resolved(Satisfaction::Class(current), policy, Some(rule))));
            }

            if let Some(default) = qualifier.and_then(|q| self.registry.parameter_default(current, q)) {
                let satisfaction = Satisfaction::Instance(default.clone());
                return Ok(Some(self.resolved(satisfaction, policy, first_rule)));
            }
            if self.registry.contains(current) {
                return Ok(Some(self.resolved(Satisfaction::Class(current), policy, first_rule)));
            }
            match self.registry.default_implementation(current) {
                Some(DefaultImpl::Class(next)) if defaults_seen.insert(next) => {
                    current = next;
                    continue;
                }
                Some(DefaultImpl::Provider { provider, output }) => {
                    let satisfaction = Satisfaction::Provider { provider, output };
                    return Ok(Some(self.resolved(satisfaction, policy, first_rule)));
                }
                _ => {}
            }

            return match first_rule {
                // A chain of bindings ended on a type nothing can build.
                Some(_) => Err(ResolutionError::MissingConstructor { key: current }),
                None => Ok(None),
            };
        }
    }

    fn resolved(&self, satisfaction: Satisfaction, policy: Option<CachePolicy>, rule: Option<RuleRef>) -> Resolved {
        Resolved {
            satisfaction,
            policy: policy.unwrap_or(self.settings.default_policy),
            rule,
        }
    }

    fn lookup(
        &self,
        key: TypeKey,
        qualifier: Option<&Qualifier>,
        path: &[ContextFrame],
        applied: &HashSet<usize>,
    ) -> Option<&TieredRule> {
        for tier in &self.tiers {
            for layer in tier {
                let best = layer
                    .iter()
                    .filter(|r| r.rule.key() == key && !applied.contains(&r.slot))
                    .filter(|r| r.rule.qualifier().matches(qualifier))
                    .filter_map(|r| {
                        let score = r.rule.context().matches(path, self.registry)?;
                        Some(((score, r.rule.qualifier().rank()), r))
                    })
                    // max_by keeps the last of equal elements: later rules win ties.
                    .max_by(|a, b| a.0.cmp(&b.0));
                if let Some((_, rule)) = best {
                    return Some(rule);
                }
            }
        }
        None
    }
}

/// The explicit rule plus the rules generated from it, by tier.
fn expand(registry: &ComponentRegistry, rule: &BindRule) -> Vec<(Tier, BindRule)> {
    let mut out = vec![(Tier::Explicit, rule.clone())];
    let (target, terminal) = match rule.target() {
        Satisfaction::Class(key) => (*key, false),
        Satisfaction::Instance(instance) => (instance.key(), true),
        _ => return out,
    };
    if target != rule.key() {
        out.push((Tier::Intermediate, rule.derive(target, rule.target().clone(), true)));
    }
    for iface in registry.interfaces_of(target) {
        if iface != rule.key() {
            out.push((Tier::Super, rule.derive(iface, rule.target().clone(), terminal)));
        }
    }
    out
}

fn describe(path: &[ContextFrame]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
    }
}
