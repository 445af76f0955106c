//! Error types for graph resolution, building and sessions.

use thiserror::Error;

use crate::key::{Qualifier, TypeKey};
use crate::parameter::Literal;

/// Boxed error returned by component constructors and providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn describe_qualifier(q: &Option<Qualifier>) -> String {
    match q {
        Some(q) => format!(" {}", q),
        None => String::new(),
    }
}

/// Failure to turn bindings and roots into a component graph.
///
/// Resolution errors are configuration errors: the same configuration always
/// fails the same way, so they are never retried.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// No binding and no implicit construction for a required desire.
    #[error("no resolution available for {key}{} (context: {context})", describe_qualifier(.qualifier))]
    NoResolution {
        key: TypeKey,
        qualifier: Option<Qualifier>,
        context: String,
    },
    /// Resolution went deeper than the configured limit; usually a cycle.
    #[error("maximum resolution depth {limit} exceeded: {}", .path.join(" -> "))]
    DepthExceeded { limit: usize, path: Vec<String> },
    /// A binding targets a type that cannot stand in for the requested one.
    #[error("binding for {requested} targets incompatible type {target}")]
    IncompatibleBinding { requested: TypeKey, target: TypeKey },
    /// A satisfaction names a type with no registered constructor.
    #[error("type {key} is not registered as a constructible component")]
    MissingConstructor { key: TypeKey },
}

/// Failure during one of the graph rewrite passes.
#[derive(Debug, Clone, Error)]
pub enum RewriteError {
    /// The rewriting rule set itself could not be applied.
    #[error("resolution error while rewriting graph: {0}")]
    Resolution(#[from] ResolutionError),
    /// A placeholder remained that no excluded configuration accounts for.
    #[error("placeholder {key} not removed")]
    UnexpectedPlaceholder { key: TypeKey },
    /// A session was created without a substitute for an excluded component.
    #[error("no substitute supplied for placeholder {key}")]
    UnresolvedPlaceholder { key: TypeKey },
}

/// Failure while constructing the value of a graph node.
#[derive(Debug, Error)]
pub enum InstantiationError {
    /// A constructor or provider returned an error.
    #[error("cannot instantiate {component}: {source}")]
    ConstructorFailed {
        component: String,
        #[source]
        source: BoxError,
    },
    /// A placeholder node was reached; it must be substituted first.
    #[error("cannot instantiate placeholder for {key}")]
    Placeholder { key: TypeKey },
    /// No constructor registered for a node's type.
    #[error("no constructor registered for {key}")]
    MissingConstructor { key: TypeKey },
    /// A dependency value could not be converted to the desired type.
    #[error("value of {from} cannot be injected as {to} into {component}")]
    TypeMismatch {
        component: String,
        from: TypeKey,
        to: TypeKey,
    },
}

/// Failure of a constructor to fetch one of its declared dependencies.
///
/// Constructors see this through [`InjectionContext`](crate::InjectionContext)
/// and usually propagate it with `?`.
#[derive(Debug, Clone, Error)]
pub enum InjectError {
    /// The component did not declare an injection point for this request.
    #[error("{component} declares no injection point for {key}{}", describe_qualifier(.qualifier))]
    Undeclared {
        component: TypeKey,
        key: TypeKey,
        qualifier: Option<Qualifier>,
    },
    /// An optional dependency was absent and requested as required.
    #[error("optional dependency {key} of {component} is absent")]
    Absent { component: TypeKey, key: TypeKey },
    /// The stored value has a different type than requested.
    #[error("dependency {key} of {component} has an unexpected type")]
    TypeMismatch { component: TypeKey, key: TypeKey },
}

/// Failure to fetch a component from a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No node in the graph satisfies the request.
    #[error("no resolution available for {key}{}", describe_qualifier(.qualifier))]
    NoResolution {
        key: TypeKey,
        qualifier: Option<Qualifier>,
    },
    /// A matching node exists but could not be built.
    #[error(transparent)]
    Instantiation(#[from] InstantiationError),
    /// The value found is not of the requested Rust type.
    #[error("component for {key} has an unexpected type")]
    TypeMismatch { key: TypeKey },
    /// The session has already been closed.
    #[error("session is closed")]
    Closed,
}

/// Failure reading or writing a build artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    /// A node carries a value with no registered codec.
    #[error("component {key} has no registered codec and cannot be persisted")]
    NotSerializable { key: TypeKey },
    /// The artifact names a type missing from the registry it is read with.
    #[error("artifact references unknown type {name}")]
    UnknownType { name: String },
    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u32),
    /// The node table is inconsistent (forward reference or bad root).
    #[error("malformed artifact: {0}")]
    Malformed(String),
}

/// Failure to bind or read a configuration literal.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("cannot convert {found:?} to {expected}")]
    LiteralMismatch { expected: &'static str, found: Literal },
    #[error("configuration source {source_name} failed: {message}")]
    Source { source_name: String, message: String },
}

/// Umbrella error for top-level operations.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{GraftError, ResolutionError, key_of};
///
/// let err: GraftError = ResolutionError::DepthExceeded {
///     limit: 100,
///     path: vec!["A".into(), "B".into()],
/// }
/// .into();
/// assert!(matches!(err, GraftError::Resolution(_)));
/// assert!(err.to_string().contains("A -> B"));
///
/// let missing = ResolutionError::NoResolution {
///     key: key_of::<u32>(),
///     qualifier: None,
///     context: "<root>".into(),
/// };
/// assert!(missing.to_string().starts_with("no resolution available for u32"));
/// ```
#[derive(Debug, Error)]
pub enum GraftError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Instantiation(#[from] InstantiationError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for top-level operations.
pub type GraftResult<T> = Result<T, GraftError>;
