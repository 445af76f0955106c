//! Capabilities implemented by component authors.

mod dispose;
mod provider;

pub use dispose::Dispose;
pub use provider::Provider;
