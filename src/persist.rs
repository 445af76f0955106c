//! Artifact persistence as JSON.
//!
//! Nodes are written in dependency order, so every edge refers to a node
//! written before it. Types are recorded by name and looked up in the
//! registry on read; baked instances are written through the codec
//! registered for their type.

use std::collections::HashMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ArtifactError;
use crate::graph::{
    CachePolicy, Component, Dependency, DependencyGraph, Desire, Edge, GraphBuilder, InjectionPoint, Instance, NodeId,
    RuleRef, Satisfaction,
};
use crate::key::{Qualifier, TypeKey};
use crate::registry::ComponentRegistry;
use crate::settings::SolverSettings;

/// Version written into every artifact.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactRepr {
    version: u32,
    // Applied when sessions rewrite placeholders.
    #[serde(default)]
    settings: SolverSettings,
    root: usize,
    nodes: Vec<NodeRepr>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRepr {
    satisfaction: SatisfactionRepr,
    policy: CachePolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    edges: Vec<EdgeRepr>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum SatisfactionRepr {
    Class { r#type: String },
    Provider { provider: String, output: String },
    Instance { r#type: String, value: serde_json::Value },
    Placeholder { r#type: String },
    Null { r#type: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRepr {
    r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qualifier: Option<String>,
    point: InjectionPoint,
    #[serde(default)]
    transient: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rule: Option<RuleRef>,
    tail: usize,
}

/// Writes the reachable part of `graph` with the settings it was solved
/// under.
pub(crate) fn write_graph<W: Write>(
    registry: &ComponentRegistry,
    graph: &DependencyGraph,
    settings: SolverSettings,
    writer: W,
) -> Result<(), ArtifactError> {
    let order = graph.sorted_nodes();
    let index: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut nodes = Vec::with_capacity(order.len());
    for id in &order {
        let node = graph.node(*id);
        let edges = node
            .edges()
            .iter()
            .map(|edge| {
                let desire = edge.desire();
                EdgeRepr {
                    r#type: desire.key().name().to_string(),
                    qualifier: desire.qualifier().map(|q| q.name().to_string()),
                    point: desire.point().clone(),
                    transient: desire.is_transient(),
                    optional: desire.is_optional(),
                    rule: edge.dependency().rule(),
                    tail: index[&edge.tail()],
                }
            })
            .collect();
        nodes.push(NodeRepr {
            satisfaction: encode(registry, node.label().satisfaction())?,
            policy: node.label().policy(),
            edges,
        });
    }
    let repr = ArtifactRepr {
        version: FORMAT_VERSION,
        settings,
        root: index[&graph.root()],
        nodes,
    };
    serde_json::to_writer(writer, &repr)?;
    debug!(nodes = repr.nodes.len(), "wrote artifact");
    Ok(())
}

/// Reads a graph written by [`write_graph`]. Documents without settings get
/// the defaults.
pub(crate) fn read_graph<R: Read>(
    registry: &ComponentRegistry,
    reader: R,
) -> Result<(DependencyGraph, SolverSettings), ArtifactError> {
    let repr: ArtifactRepr = serde_json::from_reader(reader)?;
    if repr.version != FORMAT_VERSION {
        return Err(ArtifactError::UnsupportedVersion(repr.version));
    }
    if repr.root >= repr.nodes.len() {
        return Err(ArtifactError::Malformed(format!(
            "root {} out of {} nodes",
            repr.root,
            repr.nodes.len()
        )));
    }

    let mut builder = GraphBuilder::new();
    let mut ids = Vec::with_capacity(repr.nodes.len());
    for (position, node) in repr.nodes.into_iter().enumerate() {
        let satisfaction = decode(registry, node.satisfaction)?;
        let mut edges = Vec::with_capacity(node.edges.len());
        for edge in node.edges {
            let tail = *ids.get(edge.tail).ok_or_else(|| {
                ArtifactError::Malformed(format!("node {position} depends on later node {}", edge.tail))
            })?;
            let desire = Desire::new(lookup(registry, &edge.r#type)?, edge.point)
                .with_qualifier(edge.qualifier.map(Qualifier::owned))
                .transient(edge.transient)
                .optional(edge.optional);
            edges.push(Edge::new(Dependency::new(desire, edge.rule), tail));
        }
        ids.push(builder.intern(Component::new(satisfaction, node.policy), edges));
    }
    let graph = builder.finish(ids[repr.root]);
    debug!(nodes = graph.node_count(), max_depth = repr.settings.max_depth, "read artifact");
    Ok((graph, repr.settings))
}

fn encode(registry: &ComponentRegistry, satisfaction: &Satisfaction) -> Result<SatisfactionRepr, ArtifactError> {
    let name = |key: &TypeKey| key.name().to_string();
    Ok(match satisfaction {
        Satisfaction::Class(key) => SatisfactionRepr::Class { r#type: name(key) },
        Satisfaction::Provider { provider, output } => SatisfactionRepr::Provider {
            provider: name(provider),
            output: name(output),
        },
        Satisfaction::Instance(instance) => {
            let key = instance.key();
            let value = registry
                .codec_for(key)
                .and_then(|codec| (codec.encode)(instance.value()))
                .ok_or(ArtifactError::NotSerializable { key })??;
            SatisfactionRepr::Instance { r#type: name(&key), value }
        }
        Satisfaction::ProviderFn(f) => return Err(ArtifactError::NotSerializable { key: f.output() }),
        Satisfaction::Placeholder(key) => SatisfactionRepr::Placeholder { r#type: name(key) },
        Satisfaction::Null(key) => SatisfactionRepr::Null { r#type: name(key) },
    })
}

fn decode(registry: &ComponentRegistry, repr: SatisfactionRepr) -> Result<Satisfaction, ArtifactError> {
    Ok(match repr {
        SatisfactionRepr::Class { r#type } => Satisfaction::Class(lookup(registry, &r#type)?),
        SatisfactionRepr::Provider { provider, output } => Satisfaction::Provider {
            provider: lookup(registry, &provider)?,
            output: lookup(registry, &output)?,
        },
        SatisfactionRepr::Instance { r#type, value } => {
            let key = lookup(registry, &r#type)?;
            let codec = registry.codec_for(key).ok_or(ArtifactError::NotSerializable { key })?;
            Satisfaction::Instance(Instance::from_erased(key, (codec.decode)(value)?))
        }
        SatisfactionRepr::Placeholder { r#type } => Satisfaction::Placeholder(lookup(registry, &r#type)?),
        SatisfactionRepr::Null { r#type } => Satisfaction::Null(lookup(registry, &r#type)?),
    })
}

fn lookup(registry: &ComponentRegistry, name: &str) -> Result<TypeKey, ArtifactError> {
    registry
        .key_named(name)
        .ok_or_else(|| ArtifactError::UnknownType { name: name.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::key_of;
    use crate::solver::{DependencySolver, SolveDirection};
    use crate::Configuration;
    use std::sync::Arc;

    struct Model;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .register::<Model, _>(|ctx| {
                ctx.get_qualified::<f64>("rate")?;
                Ok(Model)
            })
            .arg_qualified::<f64>("rate")
            .optional_arg::<String>();
        registry
    }

    fn graph(registry: &ComponentRegistry) -> DependencyGraph {
        let mut config = Configuration::new();
        config.bind_qualified::<f64>("rate").to_instance(Arc::new(0.5));
        DependencySolver::new(registry, [&config], SolveDirection::Solve, SolverSettings::default())
            .resolve(&[Desire::root(key_of::<Model>(), None)])
            .unwrap()
    }

    #[test]
    fn graphs_survive_a_write_read_cycle() {
        let registry = registry();
        let graph = graph(&registry);
        let mut buffer = Vec::new();
        let settings = SolverSettings::default().with_max_depth(12);
        write_graph(&registry, &graph, settings, &mut buffer).unwrap();

        let (read, read_settings) = read_graph(&registry, buffer.as_slice()).unwrap();
        assert_eq!(read_settings, settings);
        assert_eq!(read.node_count(), graph.node_count());
        let model = read.node(read.root()).edges()[0].tail();
        let edges = read.node(model).edges();
        assert_eq!(edges.len(), 2);
        let rate = edges[0].tail();
        match read.node(rate).label().satisfaction() {
            Satisfaction::Instance(instance) => assert_eq!(*instance.get::<f64>().unwrap(), 0.5),
            other => panic!("unexpected satisfaction {other}"),
        }
        assert!(edges[0].dependency().rule().is_some());
        assert!(edges[1].desire().is_optional());
        assert!(matches!(read.node(edges[1].tail()).label().satisfaction(), Satisfaction::Null(_)));
    }

    #[test]
    fn instances_without_codec_are_rejected() {
        struct Opaque;
        let registry = registry();
        let mut builder = GraphBuilder::new();
        let value = Component::new(Satisfaction::Instance(Instance::new(Arc::new(Opaque))), CachePolicy::Memoize);
        let leaf = builder.intern(value, Vec::new());
        let root = builder.intern(
            Component::root(),
            vec![Edge::new(Dependency::new(Desire::root(key_of::<Opaque>(), None), None), leaf)],
        );
        let graph = builder.finish(root);
        let err = write_graph(&registry, &graph, SolverSettings::default(), Vec::new()).unwrap_err();
        assert!(matches!(err, ArtifactError::NotSerializable { .. }));
    }

    #[test]
    fn bad_documents_are_rejected() {
        let registry = registry();
        let version = r#"{"version":9,"root":0,"nodes":[]}"#;
        assert!(matches!(
            read_graph(&registry, version.as_bytes()),
            Err(ArtifactError::UnsupportedVersion(9))
        ));

        let unknown = r#"{"version":1,"root":0,"nodes":[{"satisfaction":{"kind":"class","type":"nowhere::Thing"},"policy":"memoize"}]}"#;
        assert!(matches!(
            read_graph(&registry, unknown.as_bytes()),
            Err(ArtifactError::UnknownType { .. })
        ));

        let bare = r#"{"version":1,"root":0,"nodes":[{"satisfaction":{"kind":"class","type":"f64"},"policy":"memoize"}]}"#;
        let (_, settings) = read_graph(&registry, bare.as_bytes()).unwrap();
        assert_eq!(settings, SolverSettings::default());

        let forward = format!(
            r#"{{"version":1,"root":0,"nodes":[{{"satisfaction":{{"kind":"class","type":"{}"}},"policy":"memoize","edges":[{{"type":"f64","point":{{"constructor":0}},"tail":3}}]}}]}}"#,
            key_of::<Model>().name()
        );
        assert!(matches!(
            read_graph(&registry, forward.as_bytes()),
            Err(ArtifactError::Malformed(_))
        ));
    }
}
