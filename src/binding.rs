//! Binding model: layered, context-scoped rules mapping desires to satisfactions.
//!
//! A [`Configuration`] is one layer of rules plus the root types it asks for.
//! Rules are written with a small builder:
//!
//! ```rust
//! use ferrous_graft::Configuration;
//! use std::sync::Arc;
//!
//! trait Scorer: Send + Sync {}
//! struct ItemScorer;
//! impl Scorer for ItemScorer {}
//! struct Baseline;
//! impl Scorer for Baseline {}
//! struct Normalizer;
//!
//! let mut config = Configuration::new();
//! config.bind::<dyn Scorer>().to::<ItemScorer>();
//! config.within::<Normalizer>().bind::<dyn Scorer>().to::<Baseline>();
//! config.bind_qualified::<f64>("damping").to_instance(Arc::new(0.85));
//! config.add_root::<dyn Scorer>();
//! assert_eq!(config.rules().len(), 3);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, ConfigError};
use crate::graph::{CachePolicy, Instance, ProviderFn, Satisfaction};
use crate::key::{key_of, Qualifier, QualifierMatcher, TypeKey};
use crate::parameter::{FromLiteral, Literal, Parameter};
use crate::registry::ComponentRegistry;
use crate::traits::Provider;

/// Priority tier of a binding rule. Earlier tiers are consulted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Rules exactly as written.
    Explicit,
    /// Rules generated for the bound implementation type itself.
    Intermediate,
    /// Rules generated for the other capabilities the implementation provides.
    Super,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Explicit, Tier::Intermediate, Tier::Super];
}

/// One enclosing component on the path to a desire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextFrame {
    pub key: TypeKey,
    pub qualifier: Option<Qualifier>,
}

impl fmt::Display for ContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{} {}", q, self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Element of a [`ContextPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternElement {
    /// Zero or more frames of any type.
    Any,
    /// Exactly one frame whose type is assignable to `key`.
    Type {
        key: TypeKey,
        qualifier: QualifierMatcher,
    },
}

/// How well a context pattern matched. Larger is more specific.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ContextScore {
    anchors: usize,
    // Latest positions first, so a match closer to the desire ranks higher.
    positions: Vec<usize>,
}

/// A pattern over context paths, anchored at both ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextPattern {
    elements: Vec<PatternElement>,
}

impl ContextPattern {
    /// Matches every context.
    pub fn any() -> Self {
        ContextPattern {
            elements: vec![PatternElement::Any],
        }
    }

    pub fn elements(&self) -> &[PatternElement] {
        &self.elements
    }

    fn append(&self, tail: impl IntoIterator<Item = PatternElement>) -> Self {
        let mut elements = self.elements.clone();
        elements.extend(tail);
        ContextPattern { elements }
    }

    fn within(&self, key: TypeKey, qualifier: QualifierMatcher) -> Self {
        self.append([PatternElement::Type { key, qualifier }, PatternElement::Any])
    }

    fn at(&self, key: TypeKey, qualifier: QualifierMatcher) -> Self {
        // `at` pins the innermost frame, so a trailing wildcard is dropped.
        let mut base = self.clone();
        if base.elements.last() == Some(&PatternElement::Any) {
            base.elements.pop();
        }
        base.append([PatternElement::Any, PatternElement::Type { key, qualifier }])
            .collapse()
    }

    fn collapse(mut self) -> Self {
        self.elements
            .dedup_by(|a, b| *a == PatternElement::Any && *b == PatternElement::Any);
        self
    }

    pub(crate) fn matches(
        &self,
        path: &[ContextFrame],
        registry: &ComponentRegistry,
    ) -> Option<ContextScore> {
        let mut positions = match_from(&self.elements, path, 0, registry)?;
        positions.reverse();
        Some(ContextScore {
            anchors: positions.len(),
            positions,
        })
    }
}

fn match_from(
    elements: &[PatternElement],
    frames: &[ContextFrame],
    offset: usize,
    registry: &ComponentRegistry,
) -> Option<Vec<usize>> {
    match elements.split_first() {
        None => frames.is_empty().then(Vec::new),
        Some((PatternElement::Any, rest)) => (0..=frames.len())
            .rev()
            .find_map(|skip| match_from(rest, &frames[skip..], offset + skip, registry)),
        Some((PatternElement::Type { key, qualifier }, rest)) => {
            let frame = frames.first()?;
            if !registry.is_assignable(frame.key, *key) || !qualifier.matches(frame.qualifier.as_ref()) {
                return None;
            }
            let mut tail = match_from(rest, &frames[1..], offset + 1, registry)?;
            tail.insert(0, offset);
            Some(tail)
        }
    }
}

impl fmt::Display for ContextPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .elements
            .iter()
            .map(|e| match e {
                PatternElement::Any => "*".to_string(),
                PatternElement::Type { key, qualifier } => match qualifier {
                    QualifierMatcher::Any => key.to_string(),
                    q => format!("{} {}", q, key),
                },
            })
            .collect();
        f.write_str(&parts.join(" / "))
    }
}

/// A single binding: in `context`, a desire for `key` matching `qualifier`
/// is satisfied by `target`.
#[derive(Debug, Clone)]
pub struct BindRule {
    context: ContextPattern,
    key: TypeKey,
    qualifier: QualifierMatcher,
    target: Satisfaction,
    policy: Option<CachePolicy>,
    terminal: bool,
}

impl BindRule {
    pub fn context(&self) -> &ContextPattern {
        &self.context
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn qualifier(&self) -> &QualifierMatcher {
        &self.qualifier
    }

    pub fn target(&self) -> &Satisfaction {
        &self.target
    }

    pub fn policy(&self) -> Option<CachePolicy> {
        self.policy
    }

    /// Terminal rules end a resolution chain; non-terminal class bindings
    /// continue with the rules for the target type.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Copy of this rule with another key and target, in the same context.
    pub(crate) fn derive(&self, key: TypeKey, target: Satisfaction, terminal: bool) -> BindRule {
        BindRule {
            context: self.context.clone(),
            key,
            qualifier: self.qualifier.clone(),
            target,
            policy: self.policy,
            terminal,
        }
    }
}

impl fmt::Display for BindRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {} -> {}", self.context, self.qualifier, self.key, self.target)
    }
}

/// One layer of binding rules and root requests.
///
/// Cloning (or [`copy`](Configuration::copy)) yields an independent layer, so
/// a base configuration can serve as a template.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    rules: Vec<BindRule>,
    roots: BTreeSet<TypeKey>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a binding for unqualified desires of `T`.
    pub fn bind<T: ?Sized + 'static>(&mut self) -> Binding<'_, T> {
        Binding::new(self, ContextPattern::any(), QualifierMatcher::Default)
    }

    /// Starts a binding for desires of `T` with the given qualifier.
    pub fn bind_qualified<T: ?Sized + 'static>(&mut self, qualifier: impl Into<Qualifier>) -> Binding<'_, T> {
        Binding::new(self, ContextPattern::any(), QualifierMatcher::Exact(qualifier.into()))
    }

    /// Starts a binding for desires of `T` with any qualifier.
    pub fn bind_any<T: ?Sized + 'static>(&mut self) -> Binding<'_, T> {
        Binding::new(self, ContextPattern::any(), QualifierMatcher::Any)
    }

    /// Binds the value of parameter `P`.
    pub fn set<P: Parameter>(&mut self) -> ParameterBinding<'_, P> {
        ParameterBinding::new(self, ContextPattern::any())
    }

    /// Scopes subsequent rules to desires anywhere beneath a `T`.
    pub fn within<T: ?Sized + 'static>(&mut self) -> ConfigContext<'_> {
        let context = ContextPattern::any().within(key_of::<T>(), QualifierMatcher::Any);
        ConfigContext { config: self, context }
    }

    pub fn within_qualified<T: ?Sized + 'static>(&mut self, qualifier: impl Into<Qualifier>) -> ConfigContext<'_> {
        let context = ContextPattern::any().within(key_of::<T>(), QualifierMatcher::Exact(qualifier.into()));
        ConfigContext { config: self, context }
    }

    /// Scopes subsequent rules to desires made directly by a `T`.
    pub fn at<T: ?Sized + 'static>(&mut self) -> ConfigContext<'_> {
        let context = ContextPattern::any().at(key_of::<T>(), QualifierMatcher::Any);
        ConfigContext { config: self, context }
    }

    pub fn at_qualified<T: ?Sized + 'static>(&mut self, qualifier: impl Into<Qualifier>) -> ConfigContext<'_> {
        let context = ContextPattern::any().at(key_of::<T>(), QualifierMatcher::Exact(qualifier.into()));
        ConfigContext { config: self, context }
    }

    /// Binds `T` to a fixed value.
    pub fn add_component<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.bind::<T>().to_instance(value);
    }

    /// Binds `T` to its own registered constructor; the generated rules make
    /// it satisfy every capability `T` provides.
    pub fn add_component_type<T: ?Sized + 'static>(&mut self) {
        self.bind::<T>().to::<T>();
    }

    /// Requests that `T` be resolved and kept as an entry point.
    pub fn add_root<T: ?Sized + 'static>(&mut self) {
        self.roots.insert(key_of::<T>());
    }

    pub fn clear_roots(&mut self) {
        self.roots.clear();
    }

    pub fn roots(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.roots.iter().copied()
    }

    pub fn rules(&self) -> &[BindRule] {
        &self.rules
    }

    /// An independent copy of this layer.
    pub fn copy(&self) -> Configuration {
        self.clone()
    }

    fn push(&mut self, rule: BindRule) {
        self.rules.push(rule);
    }
}

/// A scoped view of a [`Configuration`]; rules bound through it only apply
/// in the matching context.
pub struct ConfigContext<'c> {
    config: &'c mut Configuration,
    context: ContextPattern,
}

impl<'c> ConfigContext<'c> {
    pub fn bind<T: ?Sized + 'static>(&mut self) -> Binding<'_, T> {
        Binding::new(self.config, self.context.clone(), QualifierMatcher::Default)
    }

    pub fn bind_qualified<T: ?Sized + 'static>(&mut self, qualifier: impl Into<Qualifier>) -> Binding<'_, T> {
        Binding::new(self.config, self.context.clone(), QualifierMatcher::Exact(qualifier.into()))
    }

    pub fn bind_any<T: ?Sized + 'static>(&mut self) -> Binding<'_, T> {
        Binding::new(self.config, self.context.clone(), QualifierMatcher::Any)
    }

    pub fn set<P: Parameter>(&mut self) -> ParameterBinding<'_, P> {
        ParameterBinding::new(self.config, self.context.clone())
    }

    pub fn within<T: ?Sized + 'static>(&mut self) -> ConfigContext<'_> {
        let context = self.context.within(key_of::<T>(), QualifierMatcher::Any);
        ConfigContext { config: self.config, context }
    }

    pub fn within_qualified<T: ?Sized + 'static>(&mut self, qualifier: impl Into<Qualifier>) -> ConfigContext<'_> {
        let context = self.context.within(key_of::<T>(), QualifierMatcher::Exact(qualifier.into()));
        ConfigContext { config: self.config, context }
    }

    pub fn at<T: ?Sized + 'static>(&mut self) -> ConfigContext<'_> {
        let context = self.context.at(key_of::<T>(), QualifierMatcher::Any);
        ConfigContext { config: self.config, context }
    }

    pub fn at_qualified<T: ?Sized + 'static>(&mut self, qualifier: impl Into<Qualifier>) -> ConfigContext<'_> {
        let context = self.context.at(key_of::<T>(), QualifierMatcher::Exact(qualifier.into()));
        ConfigContext { config: self.config, context }
    }

    pub fn context(&self) -> &ContextPattern {
        &self.context
    }
}

/// Builder for one rule. The rule is added by the terminating `to*` call.
#[must_use = "a binding does nothing until one of its `to` methods is called"]
pub struct Binding<'c, T: ?Sized> {
    config: &'c mut Configuration,
    context: ContextPattern,
    qualifier: QualifierMatcher,
    policy: Option<CachePolicy>,
    _marker: PhantomData<fn(&T)>,
}

impl<'c, T: ?Sized + 'static> Binding<'c, T> {
    fn new(config: &'c mut Configuration, context: ContextPattern, qualifier: QualifierMatcher) -> Self {
        Binding {
            config,
            context,
            qualifier,
            policy: None,
            _marker: PhantomData,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = QualifierMatcher::Exact(qualifier.into());
        self
    }

    pub fn any_qualifier(mut self) -> Self {
        self.qualifier = QualifierMatcher::Any;
        self
    }

    /// Every dependent gets its own value; the node is never shared.
    pub fn new_instance(mut self) -> Self {
        self.policy = Some(CachePolicy::NewInstance);
        self
    }

    pub fn memoize(mut self) -> Self {
        self.policy = Some(CachePolicy::Memoize);
        self
    }

    /// Satisfies the desire by constructing `U`, which must provide `T`.
    pub fn to<U: ?Sized + 'static>(self) {
        self.finish(Satisfaction::Class(key_of::<U>()), false);
    }

    /// Satisfies the desire with the output of provider `P`.
    pub fn to_provider<P: Provider>(self) {
        let target = Satisfaction::Provider {
            provider: key_of::<P>(),
            output: key_of::<P::Output>(),
        };
        self.finish(target, true);
    }

    /// Marks the desire as supplied later, at session creation.
    pub fn to_placeholder(self) {
        self.finish(Satisfaction::Placeholder(key_of::<T>()), true);
    }

    /// Satisfies the desire with no value.
    pub fn to_null(self) {
        self.finish(Satisfaction::Null(key_of::<T>()), true);
    }

    fn finish(self, target: Satisfaction, terminal: bool) {
        let rule = BindRule {
            context: self.context,
            key: key_of::<T>(),
            qualifier: self.qualifier,
            target,
            policy: self.policy,
            terminal,
        };
        self.config.push(rule);
    }
}

impl<'c, T: ?Sized + Send + Sync + 'static> Binding<'c, T> {
    /// Satisfies the desire with a fixed value.
    pub fn to_instance(self, value: Arc<T>) {
        self.finish(Satisfaction::Instance(Instance::new(value)), true);
    }

    /// Satisfies the desire by calling `f`.
    pub fn to_provider_fn<F>(self, f: F)
    where
        F: Fn() -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.finish(Satisfaction::ProviderFn(ProviderFn::new(f)), true);
    }
}

/// Builder binding the value of a [`Parameter`].
#[must_use = "a parameter binding does nothing until a value is supplied"]
pub struct ParameterBinding<'c, P: Parameter> {
    config: &'c mut Configuration,
    context: ContextPattern,
    _marker: PhantomData<fn() -> P>,
}

impl<'c, P: Parameter> ParameterBinding<'c, P> {
    fn new(config: &'c mut Configuration, context: ContextPattern) -> Self {
        ParameterBinding {
            config,
            context,
            _marker: PhantomData,
        }
    }

    /// Binds the parameter to a literal, coercing it to the value type.
    ///
    /// ```rust
    /// use ferrous_graft::{Configuration, Parameter};
    /// use std::path::PathBuf;
    ///
    /// struct ModelFile;
    /// impl Parameter for ModelFile {
    ///     type Value = PathBuf;
    ///     const NAME: &'static str = "model-file";
    /// }
    ///
    /// let mut config = Configuration::new();
    /// config.set::<ModelFile>().to("/var/lib/model.bin").unwrap();
    /// assert!(config.set::<ModelFile>().to(3).is_err());
    /// ```
    pub fn to(self, value: impl Into<Literal>) -> Result<(), ConfigError> {
        let value = P::Value::from_literal(&value.into())?;
        self.to_value(value);
        Ok(())
    }

    pub fn to_value(self, value: P::Value) {
        let rule = BindRule {
            context: self.context,
            key: key_of::<P::Value>(),
            qualifier: QualifierMatcher::Exact(P::qualifier()),
            target: Satisfaction::Instance(Instance::new(Arc::new(value))),
            policy: None,
            terminal: true,
        };
        self.config.push(rule);
    }

    /// Binds the parameter from the first source that defines `P::NAME`.
    /// Returns whether a value was found.
    #[cfg(feature = "config")]
    pub fn from_source(self, provider: &crate::config::ConfigProvider) -> Result<bool, ConfigError> {
        match provider.get(P::NAME) {
            Some(literal) => self.to(literal).map(|_| true),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Capability: Send + Sync {}
    struct Outer;
    struct Inner;
    struct Impl;
    impl Capability for Impl {}

    fn frame<T: 'static>() -> ContextFrame {
        ContextFrame {
            key: key_of::<T>(),
            qualifier: None,
        }
    }

    #[test]
    fn any_pattern_matches_every_path() {
        let registry = ComponentRegistry::new();
        let pattern = ContextPattern::any();
        assert!(pattern.matches(&[], &registry).is_some());
        assert!(pattern.matches(&[frame::<Outer>(), frame::<Inner>()], &registry).is_some());
    }

    #[test]
    fn within_and_at_differ() {
        let registry = ComponentRegistry::new();
        let within = ContextPattern::any().within(key_of::<Outer>(), QualifierMatcher::Any);
        let at = ContextPattern::any().at(key_of::<Outer>(), QualifierMatcher::Any);
        let direct = [frame::<Outer>()];
        let nested = [frame::<Outer>(), frame::<Inner>()];

        assert!(within.matches(&direct, &registry).is_some());
        assert!(within.matches(&nested, &registry).is_some());
        assert!(at.matches(&direct, &registry).is_some());
        assert!(at.matches(&nested, &registry).is_none());
        assert!(within.matches(&[], &registry).is_none());
    }

    #[test]
    fn closer_matches_score_higher() {
        let registry = ComponentRegistry::new();
        let within = ContextPattern::any().within(key_of::<Outer>(), QualifierMatcher::Any);
        let far = within
            .matches(&[frame::<Outer>(), frame::<Inner>(), frame::<Inner>()], &registry)
            .unwrap();
        let near = within
            .matches(&[frame::<Inner>(), frame::<Outer>(), frame::<Inner>()], &registry)
            .unwrap();
        let broad = ContextPattern::any().matches(&[frame::<Outer>()], &registry).unwrap();
        assert!(near > far);
        assert!(far > broad);
    }

    #[test]
    fn context_frames_match_by_capability() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Impl, _>(|_| Ok(Impl)).provides::<dyn Capability>(|i| i);
        let within = ContextPattern::any().within(key_of::<dyn Capability>(), QualifierMatcher::Any);
        assert!(within.matches(&[frame::<Impl>()], &registry).is_some());
    }

    #[test]
    fn copies_are_independent() {
        let mut base = Configuration::new();
        base.bind::<dyn Capability>().to::<Impl>();
        base.add_root::<dyn Capability>();

        let mut derived = base.copy();
        derived.bind::<Inner>().to::<Inner>();
        derived.clear_roots();

        assert_eq!(base.rules().len(), 1);
        assert_eq!(base.roots().count(), 1);
        assert_eq!(derived.rules().len(), 2);
        assert_eq!(derived.roots().count(), 0);
    }

    #[test]
    fn nested_contexts_accumulate() {
        let mut config = Configuration::new();
        config
            .within::<Outer>()
            .at::<Inner>()
            .bind::<dyn Capability>()
            .new_instance()
            .to::<Impl>();
        let rule = &config.rules()[0];
        assert_eq!(rule.context().to_string(), format!("* / {} / * / {}", key_of::<Outer>(), key_of::<Inner>()));
        assert_eq!(rule.policy(), Some(CachePolicy::NewInstance));
        assert!(!rule.is_terminal());
    }

    #[test]
    fn parameters_bind_qualified_instances() {
        struct Rate;
        impl Parameter for Rate {
            type Value = f64;
            const NAME: &'static str = "rate";
        }
        let mut config = Configuration::new();
        config.set::<Rate>().to(2).unwrap();
        let rule = &config.rules()[0];
        assert_eq!(rule.key(), key_of::<f64>());
        assert_eq!(rule.qualifier(), &QualifierMatcher::Exact(Qualifier::new("rate")));
        match rule.target() {
            Satisfaction::Instance(i) => assert_eq!(*i.get::<f64>().unwrap(), 2.0),
            other => panic!("unexpected target {other:?}"),
        }
    }
}
