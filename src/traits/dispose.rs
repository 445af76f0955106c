//! Disposal trait for resource cleanup.

/// Trait for components that hold resources needing explicit release.
///
/// Register the capability with
/// [`ComponentBuilder::disposable`](crate::ComponentBuilder::disposable).
/// Every value built for such a component is then registered with the
/// lifecycle of the pass that built it: the build itself for shareable
/// components, or the session for everything else. Hooks run in LIFO order
/// when the owner is closed.
///
/// # Examples
///
/// ```
/// use ferrous_graft::{ComponentRegistry, Dispose};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Connection {
///     open: AtomicBool,
/// }
///
/// impl Dispose for Connection {
///     fn dispose(&self) {
///         self.open.store(false, Ordering::SeqCst);
///     }
/// }
///
/// let mut registry = ComponentRegistry::new();
/// registry
///     .register::<Connection, _>(|_| Ok(Connection { open: AtomicBool::new(true) }))
///     .disposable();
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Release the resources held by this component.
    fn dispose(&self);
}
