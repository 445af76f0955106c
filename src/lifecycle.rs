//! Release of disposable resources acquired while building values.

use std::fmt;

/// Collects disposal hooks for the values built by one pass (a build or a
/// session) and runs them in LIFO order when closed.
///
/// Closing is idempotent. Dropping an unclosed manager closes it.
#[derive(Default)]
pub struct LifecycleManager {
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook to run on close.
    pub fn register(&mut self, hook: Box<dyn FnOnce() + Send>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every pending hook, most recently registered first.
    pub fn close(&mut self) {
        while let Some(hook) = self.hooks.pop() {
            hook();
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("pending", &self.hooks.len())
            .finish()
    }
}
