use ferrous_graft::{
    Artifact, ArtifactError, CachePolicy, ComponentRegistry, Configuration, Disposition, EngineBuilder, Parameter,
    Satisfaction, SolverSettings, ARTIFACT_FORMAT_VERSION,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Retries;

impl Parameter for Retries {
    type Value = u32;
    const NAME: &'static str = "retries";

    fn default_value() -> Option<u32> {
        Some(3)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Catalog {
    name: String,
    retries: u32,
}

struct Handler {
    catalog: Arc<Catalog>,
}

fn registry(built: Arc<AtomicUsize>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry
        .register::<Catalog, _>(move |ctx| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Catalog {
                name: "products".to_string(),
                retries: ctx.param::<Retries>()?,
            })
        })
        .param::<Retries>()
        .shareable()
        .serializable();
    registry
        .register::<Handler, _>(|ctx| Ok(Handler { catalog: ctx.get()? }))
        .arg::<Catalog>();
    registry
}

fn build(built: Arc<AtomicUsize>) -> Artifact {
    let mut config = Configuration::new();
    config.set::<Retries>().to(5).unwrap();
    config.add_root::<Handler>();
    let mut builder = EngineBuilder::new(registry(built));
    builder.add_configuration(config);
    builder.build().unwrap()
}

#[test]
fn baked_artifacts_are_read_back_without_rebuilding() {
    let built = Arc::new(AtomicUsize::new(0));
    let artifact = build(built.clone());
    assert_eq!(built.load(Ordering::SeqCst), 1);

    let mut buffer = Vec::new();
    artifact.write(&mut buffer).unwrap();
    let document: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(document["version"], ARTIFACT_FORMAT_VERSION);

    let rebuilt = Arc::new(AtomicUsize::new(0));
    let read = Artifact::read(registry(rebuilt.clone()), buffer.as_slice()).unwrap();
    assert_eq!(read.graph().node_count(), artifact.graph().node_count());
    assert!(read.is_instantiable());

    let handler = read.with_session(&Configuration::new(), |session| session.get::<Handler>()).unwrap();
    assert_eq!(
        *handler.catalog,
        Catalog {
            name: "products".to_string(),
            retries: 5,
        }
    );
    assert_eq!(rebuilt.load(Ordering::SeqCst), 0);
}

#[test]
fn solver_settings_are_read_back() {
    let settings = SolverSettings::default()
        .with_max_depth(8)
        .with_default_policy(CachePolicy::NewInstance);
    let mut config = Configuration::new();
    config.add_root::<Handler>();
    let mut builder = EngineBuilder::new(registry(Arc::default())).with_settings(settings);
    builder.add_configuration(config);
    let artifact = builder.build().unwrap();
    assert_eq!(artifact.settings(), settings);

    let mut buffer = Vec::new();
    artifact.write(&mut buffer).unwrap();
    let read = Artifact::read(registry(Arc::default()), buffer.as_slice()).unwrap();
    assert_eq!(read.settings(), settings);
}

#[test]
fn placeholders_survive_persistence() {
    trait Clock: Send + Sync {
        fn now(&self) -> u64;
    }
    struct Fixed(u64);
    impl Clock for Fixed {
        fn now(&self) -> u64 {
            self.0
        }
    }
    struct Stamp {
        at: u64,
    }

    let mut registry = ComponentRegistry::new();
    registry.interface::<dyn Clock>();
    registry
        .register::<Stamp, _>(|ctx| Ok(Stamp { at: ctx.get::<dyn Clock>()?.now() }))
        .arg::<dyn Clock>();
    let registry = Arc::new(registry);

    let mut config = Configuration::new();
    config.add_root::<Stamp>();
    let mut request = Configuration::new();
    request.bind::<dyn Clock>().to_placeholder();
    let mut builder = EngineBuilder::new(registry.clone());
    builder
        .add_configuration(config)
        .add_configuration_with(request, Disposition::Excluded);
    let artifact = builder.build().unwrap();

    let mut buffer = Vec::new();
    artifact.write(&mut buffer).unwrap();
    let read = Artifact::read(registry, buffer.as_slice()).unwrap();
    let placeholders = read.graph().placeholder_nodes();
    assert_eq!(placeholders.len(), 1);
    assert!(matches!(
        read.graph().node(placeholders[0]).label().satisfaction(),
        Satisfaction::Placeholder(_)
    ));

    let mut resources = Configuration::new();
    resources.bind::<dyn Clock>().to_instance(Arc::new(Fixed(1_700_000_000)));
    let at = read
        .with_session(&resources, |session| Ok(session.get::<Stamp>()?.at))
        .unwrap();
    assert_eq!(at, 1_700_000_000);
}

#[test]
fn provider_functions_cannot_be_persisted() {
    struct Token(&'static str);
    let mut config = Configuration::new();
    config.bind::<Token>().to_provider_fn(|| Ok(Arc::new(Token("secret"))));
    config.add_root::<Token>();
    let mut builder = EngineBuilder::new(ComponentRegistry::new());
    builder.add_configuration(config);
    let artifact = builder.build().unwrap();

    let token = artifact.with_session(&Configuration::new(), |session| Ok(session.get::<Token>()?.0));
    assert_eq!(token.unwrap(), "secret");

    let err = artifact.write(Vec::new()).unwrap_err();
    assert!(matches!(err, ArtifactError::NotSerializable { .. }));
}
