//! Provider trait for components that build another component's value.

use std::sync::Arc;

use crate::error::BoxError;

/// A component whose job is to produce a value of another type.
///
/// Providers are resolved like any other component: their own injection
/// points are declared when they are registered with
/// [`ComponentRegistry::provider`](crate::ComponentRegistry::provider). The
/// graph node for a provider binding has the provider's dependencies as its
/// edges and the provider's output as its value.
///
/// # Examples
///
/// ```
/// use ferrous_graft::{BoxError, ComponentRegistry, Provider};
/// use std::sync::Arc;
///
/// struct Model { weights: Vec<f64> }
///
/// struct ModelTrainer { epochs: usize }
///
/// impl Provider for ModelTrainer {
///     type Output = Model;
///
///     fn provide(&self) -> Result<Arc<Model>, BoxError> {
///         Ok(Arc::new(Model { weights: vec![0.0; self.epochs] }))
///     }
/// }
///
/// let mut registry = ComponentRegistry::new();
/// registry
///     .provider::<ModelTrainer, _>(|_| Ok(ModelTrainer { epochs: 10 }))
///     .shareable_output();
/// ```
pub trait Provider: Send + Sync + 'static {
    /// The type of value produced.
    type Output: ?Sized + Send + Sync + 'static;

    /// Build the value.
    fn provide(&self) -> Result<Arc<Self::Output>, BoxError>;
}
