//! Type keys and qualifiers identifying components in the graph.

use std::any::TypeId;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key identifying a component type.
///
/// Keys carry the `TypeId` for identity and the `type_name` for diagnostics,
/// persistence and deterministic ordering. Trait objects are valid keys, so a
/// key can stand for either a concrete component (`Database`) or a capability
/// (`dyn Greeter`).
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{key_of, TypeKey};
///
/// trait Greeter: Send + Sync {}
///
/// let concrete = key_of::<String>();
/// let capability = TypeKey::of::<dyn Greeter>();
///
/// assert_eq!(concrete.name(), "alloc::string::String");
/// assert_ne!(concrete, capability);
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Creates the key for `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The full type name, as reported by `std::any::type_name`.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// Identity is the TypeId only; the name is diagnostic.
impl PartialEq for TypeKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// Names first so that iteration order is stable across runs.
impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Helper for creating type keys.
#[inline]
pub fn key_of<T: ?Sized + 'static>() -> TypeKey {
    TypeKey::of::<T>()
}

/// A qualifier distinguishing several desires for the same type.
///
/// Qualifiers play the role of names: two injection points asking for `f64`
/// can be told apart as `"learning-rate"` and `"regularization"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier(Cow<'static, str>);

impl Qualifier {
    /// Creates a qualifier from a static name.
    pub const fn new(name: &'static str) -> Self {
        Qualifier(Cow::Borrowed(name))
    }

    /// Creates a qualifier from an owned name (used when reading artifacts).
    pub fn owned(name: String) -> Self {
        Qualifier(Cow::Owned(name))
    }

    /// The qualifier name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Qualifier {
    fn from(name: &'static str) -> Self {
        Qualifier::new(name)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Predicate over the qualifier of a desire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QualifierMatcher {
    /// Matches only unqualified desires.
    Default,
    /// Matches any qualifier, including none.
    Any,
    /// Matches exactly one qualifier.
    Exact(Qualifier),
}

impl QualifierMatcher {
    /// Tests a desire's qualifier against this matcher.
    pub fn matches(&self, qualifier: Option<&Qualifier>) -> bool {
        match self {
            QualifierMatcher::Default => qualifier.is_none(),
            QualifierMatcher::Any => true,
            QualifierMatcher::Exact(q) => qualifier == Some(q),
        }
    }

    /// Exact matchers are more specific than default ones, which beat `Any`.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            QualifierMatcher::Exact(_) => 2,
            QualifierMatcher::Default => 1,
            QualifierMatcher::Any => 0,
        }
    }
}

impl From<Qualifier> for QualifierMatcher {
    fn from(q: Qualifier) -> Self {
        QualifierMatcher::Exact(q)
    }
}

impl fmt::Display for QualifierMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualifierMatcher::Default => f.write_str("<default>"),
            QualifierMatcher::Any => f.write_str("<any>"),
            QualifierMatcher::Exact(q) => write!(f, "{}", q),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Capability {}

    #[test]
    fn keys_compare_by_type_id() {
        assert_eq!(key_of::<u32>(), TypeKey::of::<u32>());
        assert_ne!(key_of::<u32>(), key_of::<u64>());
        assert_ne!(key_of::<dyn Capability>(), key_of::<u32>());
    }

    #[test]
    fn keys_order_by_name() {
        let mut keys = vec![key_of::<u64>(), key_of::<String>(), key_of::<bool>()];
        keys.sort();
        let names: Vec<_> = keys.iter().map(|k| k.name()).collect();
        assert_eq!(names, vec!["alloc::string::String", "bool", "u64"]);
    }

    #[test]
    fn qualifier_matching() {
        let rate = Qualifier::new("rate");
        assert!(QualifierMatcher::Default.matches(None));
        assert!(!QualifierMatcher::Default.matches(Some(&rate)));
        assert!(QualifierMatcher::Any.matches(Some(&rate)));
        assert!(QualifierMatcher::Any.matches(None));
        assert!(QualifierMatcher::Exact(rate.clone()).matches(Some(&rate)));
        assert!(!QualifierMatcher::Exact(rate).matches(None));
    }

    #[test]
    fn owned_and_borrowed_qualifiers_are_equal() {
        assert_eq!(Qualifier::new("k"), Qualifier::owned("k".to_string()));
    }
}
