//! # ferrous-graft
//!
//! Layered component-graph resolution for Rust, with build-once,
//! session-many object construction.
//!
//! ## Features
//!
//! - **Declarative bindings**: layered configurations bind capabilities to
//!   implementations, instances, providers or placeholders, optionally scoped
//!   to where in the graph the dependency is requested
//! - **Static graphs**: every configuration resolves to one acyclic,
//!   deterministic component graph before anything is built
//! - **Bake-in**: components declared shareable are built once, at build
//!   time, and reused by every session
//! - **Exclusion**: per-request resources stay out of the artifact as
//!   placeholders and are supplied when a session is opened
//! - **Persistence**: artifacts can be written and read back as JSON
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_graft::{ComponentRegistry, Configuration, EngineBuilder, Parameter};
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct Repeat;
//! impl Parameter for Repeat {
//!     type Value = usize;
//!     const NAME: &'static str = "repeat";
//!     fn default_value() -> Option<usize> {
//!         Some(1)
//!     }
//! }
//!
//! struct Hello {
//!     repeat: usize,
//! }
//!
//! impl Greeter for Hello {
//!     fn greet(&self) -> String {
//!         "hello ".repeat(self.repeat).trim_end().to_string()
//!     }
//! }
//!
//! // Declare how components are built.
//! let mut registry = ComponentRegistry::new();
//! registry
//!     .register::<Hello, _>(|ctx| Ok(Hello { repeat: ctx.param::<Repeat>()? }))
//!     .param::<Repeat>()
//!     .shareable()
//!     .provides::<dyn Greeter>(|hello| hello);
//!
//! // Bind capabilities and parameters.
//! let mut config = Configuration::new();
//! config.bind::<dyn Greeter>().to::<Hello>();
//! config.set::<Repeat>().to(2).unwrap();
//! config.add_root::<dyn Greeter>();
//!
//! // Build once, then open sessions as needed.
//! let mut builder = EngineBuilder::new(registry);
//! builder.add_configuration(config);
//! let artifact = builder.build().unwrap();
//!
//! let session = artifact.open_session().unwrap();
//! assert_eq!(session.get::<dyn Greeter>().unwrap().greet(), "hello hello");
//! session.close();
//! ```
//!
//! ## Pipeline
//!
//! 1. [`DependencySolver`] resolves the roots of every [`Configuration`] into
//!    a [`DependencyGraph`].
//! 2. [`shareable_nodes`] finds the nodes whose values may outlive a session;
//!    [`bake_shareable`] builds them and replaces them with instances.
//! 3. Bindings of [`Disposition::Excluded`] configurations are rewritten into
//!    placeholders, and [`validate_placeholders`] checks nothing else was
//!    left unresolved.
//! 4. [`Artifact::create_session`] substitutes the placeholders and returns a
//!    [`Session`] that builds the remaining components on demand.

pub mod binding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod instantiate;
pub mod key;
pub mod lifecycle;
pub mod parameter;
pub mod registry;
pub mod rewrite;
pub mod session;
pub mod settings;
pub mod shareable;
pub mod solver;
pub mod traits;

#[cfg(feature = "config")]
pub mod config;

mod persist;

pub use binding::{
    BindRule, Binding, ConfigContext, Configuration, ContextFrame, ContextPattern, ParameterBinding, PatternElement,
    Tier,
};
pub use engine::{Artifact, Disposition, EngineBuilder, Simulation};
pub use error::{
    ArtifactError, BoxError, ConfigError, GraftError, GraftResult, InjectError, InstantiationError, ResolutionError,
    RewriteError, SessionError,
};
pub use graph::{
    CachePolicy, Component, Dependency, DependencyGraph, Desire, Edge, GraphRoot, InjectionPoint, Instance, Node,
    NodeId, ProviderFn, RuleRef, Satisfaction,
};
pub use instantiate::InjectionContext;
pub use key::{key_of, Qualifier, QualifierMatcher, TypeKey};
pub use lifecycle::LifecycleManager;
pub use parameter::{FromLiteral, Literal, Parameter};
pub use persist::FORMAT_VERSION as ARTIFACT_FORMAT_VERSION;
pub use registry::{ComponentBuilder, ComponentFlags, ComponentRegistry, InterfaceBuilder};
pub use rewrite::{bake_shareable, validate_placeholders};
pub use session::Session;
pub use settings::{SolverSettings, DEFAULT_MAX_DEPTH};
pub use shareable::{is_shareable, shareable_nodes};
pub use solver::{DependencySolver, SolveDirection};
pub use traits::{Dispose, Provider};
