use ferrous_graft::{ComponentRegistry, Configuration, Dispose, EngineBuilder, GraftError, InstantiationError};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Connection {
    log: Log,
}

impl Dispose for Connection {
    fn dispose(&self) {
        self.log.lock().unwrap().push("connection");
    }
}

struct Cursor {
    log: Log,
}

impl Dispose for Cursor {
    fn dispose(&self) {
        self.log.lock().unwrap().push("cursor");
    }
}

struct Report;

fn registry(log: &Log) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    let connection_log = log.clone();
    registry
        .register::<Connection, _>(move |_| Ok(Connection { log: connection_log.clone() }))
        .disposable();
    let cursor_log = log.clone();
    registry
        .register::<Cursor, _>(move |ctx| {
            ctx.get::<Connection>()?;
            Ok(Cursor { log: cursor_log.clone() })
        })
        .arg::<Connection>()
        .disposable();
    registry
        .register::<Report, _>(|ctx| {
            ctx.get::<Cursor>()?;
            Ok(Report)
        })
        .arg::<Cursor>();
    registry
}

fn builder(registry: ComponentRegistry) -> EngineBuilder {
    let mut config = Configuration::new();
    config.add_root::<Report>();
    let mut builder = EngineBuilder::new(registry);
    builder.add_configuration(config);
    builder
}

#[test]
fn session_close_disposes_in_reverse_build_order() {
    let log: Log = Arc::default();
    let artifact = builder(registry(&log)).build().unwrap();

    let session = artifact.open_session().unwrap();
    session.get::<Report>().unwrap();
    assert!(log.lock().unwrap().is_empty());
    session.close();
    assert_eq!(*log.lock().unwrap(), vec!["cursor", "connection"]);

    session.close();
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn dropping_a_session_disposes_it() {
    init_tracing();
    let log: Log = Arc::default();
    let artifact = builder(registry(&log)).build().unwrap();
    {
        let session = artifact.open_session().unwrap();
        session.get::<Cursor>().unwrap();
    }
    assert_eq!(*log.lock().unwrap(), vec!["cursor", "connection"]);
}

#[test]
fn each_session_owns_what_it_built() {
    let log: Log = Arc::default();
    let artifact = builder(registry(&log)).build().unwrap();
    let first = artifact.open_session().unwrap();
    let second = artifact.open_session().unwrap();
    let a = first.get::<Cursor>().unwrap();
    let b = second.get::<Cursor>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    first.close();
    assert_eq!(log.lock().unwrap().len(), 2);
    second.close();
    assert_eq!(log.lock().unwrap().len(), 4);
}

#[test]
fn baked_components_are_disposed_with_the_artifact() {
    let log: Log = Arc::default();
    let mut registry = registry(&log);
    let connection_log = log.clone();
    registry
        .register::<Connection, _>(move |_| Ok(Connection { log: connection_log.clone() }))
        .disposable()
        .shareable();

    let artifact = builder(registry).build().unwrap();
    let session = artifact.open_session().unwrap();
    session.get::<Report>().unwrap();
    session.close();
    assert_eq!(*log.lock().unwrap(), vec!["cursor"]);

    let clone = artifact.clone();
    drop(artifact);
    assert_eq!(log.lock().unwrap().len(), 1);
    drop(clone);
    assert_eq!(*log.lock().unwrap(), vec!["cursor", "connection"]);
}

#[test]
fn failed_build_releases_what_it_acquired() {
    struct Broken;
    init_tracing();
    let log: Log = Arc::default();
    let mut registry = registry(&log);
    registry
        .register::<Connection, _>({
            let log = log.clone();
            move |_| Ok(Connection { log: log.clone() })
        })
        .disposable()
        .shareable();
    registry
        .register::<Broken, _>(|ctx| {
            ctx.get::<Connection>()?;
            Err("backing file is missing".into())
        })
        .transient_arg::<Connection>()
        .shareable();
    registry
        .register::<Report, _>(|ctx| {
            ctx.get::<Broken>()?;
            Ok(Report)
        })
        .arg::<Broken>();

    let err = builder(registry).build().unwrap_err();
    match err {
        GraftError::Instantiation(InstantiationError::ConstructorFailed { component, source }) => {
            assert!(component.contains("Broken"));
            assert_eq!(source.to_string(), "backing file is missing");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*log.lock().unwrap(), vec!["connection"]);
}

#[test]
fn values_only_needed_while_building_are_released_by_build() {
    struct Index;
    let log: Log = Arc::default();
    let mut registry = registry(&log);
    registry
        .register::<Index, _>(|ctx| {
            ctx.get::<Cursor>()?;
            Ok(Index)
        })
        .transient_arg::<Cursor>()
        .shareable();
    registry
        .register::<Report, _>(|ctx| {
            ctx.get::<Index>()?;
            Ok(Report)
        })
        .arg::<Index>();

    let artifact = builder(registry).build().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["cursor", "connection"]);

    let session = artifact.open_session().unwrap();
    session.get::<Report>().unwrap();
    session.close();
    drop(artifact);
    assert_eq!(log.lock().unwrap().len(), 2);
}
