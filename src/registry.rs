//! Capability registry: how each component type is constructed and what it
//! declares.
//!
//! Resolution never inspects types at runtime. Everything the solver and the
//! instantiator need to know about a type (its constructor, its injection
//! points, whether its values may be shared, which capabilities it provides,
//! how to persist it) is declared here up front.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BoxError;
use crate::graph::{erase, unerase, AnyArc, Desire, GraphRoot, InjectionPoint, Instance};
use crate::instantiate::InjectionContext;
use crate::key::{key_of, Qualifier, TypeKey};
use crate::parameter::Parameter;
use crate::traits::{Dispose, Provider};

pub(crate) type Ctor = Arc<dyn for<'a> Fn(&InjectionContext<'a>) -> Result<AnyArc, BoxError> + Send + Sync>;
type Upcast = Arc<dyn Fn(&AnyArc) -> Option<AnyArc> + Send + Sync>;
type Provide = Arc<dyn Fn(&AnyArc) -> Result<AnyArc, BoxError> + Send + Sync>;
pub(crate) type DisposeHook = Arc<dyn Fn(&AnyArc) -> Option<Box<dyn FnOnce() + Send>> + Send + Sync>;
type Encode = Arc<dyn Fn(&AnyArc) -> Option<serde_json::Result<serde_json::Value>> + Send + Sync>;
type Decode = Arc<dyn Fn(serde_json::Value) -> serde_json::Result<AnyArc> + Send + Sync>;

/// Sharing metadata declared for a type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentFlags {
    /// Values may be reused across sessions.
    pub shareable: bool,
    /// The type is singleton-scoped; treated as shareable.
    pub singleton: bool,
}

impl ComponentFlags {
    fn merge(self, other: ComponentFlags) -> ComponentFlags {
        ComponentFlags {
            shareable: self.shareable || other.shareable,
            singleton: self.singleton || other.singleton,
        }
    }
}

pub(crate) struct ProviderDef {
    pub(crate) output: TypeKey,
    pub(crate) provide: Provide,
    /// The provided values may be shared even if the output type is not
    /// declared shareable.
    pub(crate) shareable: bool,
}

pub(crate) struct ComponentDef {
    pub(crate) key: TypeKey,
    pub(crate) desires: Vec<Desire>,
    pub(crate) ctor: Ctor,
    pub(crate) flags: ComponentFlags,
    pub(crate) provider: Option<ProviderDef>,
    pub(crate) dispose: Option<DisposeHook>,
}

/// Implicit satisfaction for a type nobody binds explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefaultImpl {
    Class(TypeKey),
    Provider { provider: TypeKey, output: TypeKey },
}

pub(crate) struct Codec {
    pub(crate) encode: Encode,
    pub(crate) decode: Decode,
}

/// Table of constructible components and their declared capabilities.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{ComponentRegistry, key_of};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct Resource;
/// struct Hello;
///
/// impl Greeter for Hello {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// let mut registry = ComponentRegistry::new();
/// registry.register::<Resource, _>(|_| Ok(Resource));
/// registry
///     .register::<Hello, _>(|ctx| {
///         let _resource: Arc<Resource> = ctx.get()?;
///         Ok(Hello)
///     })
///     .transient_arg::<Resource>()
///     .shareable()
///     .provides::<dyn Greeter>(|hello| hello);
///
/// assert!(registry.is_assignable(key_of::<Hello>(), key_of::<dyn Greeter>()));
/// ```
pub struct ComponentRegistry {
    components: HashMap<TypeKey, ComponentDef>,
    upcasts: HashMap<(TypeKey, TypeKey), Upcast>,
    interfaces: HashMap<TypeKey, BTreeSet<TypeKey>>,
    interface_flags: HashMap<TypeKey, ComponentFlags>,
    defaults: HashMap<TypeKey, DefaultImpl>,
    parameter_defaults: HashMap<(TypeKey, Qualifier), Instance>,
    codecs: HashMap<TypeKey, Codec>,
    names: HashMap<&'static str, TypeKey>,
}

impl ComponentRegistry {
    /// Creates a registry with codecs for the common literal types.
    pub fn new() -> Self {
        let mut registry = ComponentRegistry {
            components: HashMap::new(),
            upcasts: HashMap::new(),
            interfaces: HashMap::new(),
            interface_flags: HashMap::new(),
            defaults: HashMap::new(),
            parameter_defaults: HashMap::new(),
            codecs: HashMap::new(),
            names: HashMap::new(),
        };
        registry.note(key_of::<GraphRoot>());
        registry
            .codec::<bool>()
            .codec::<i32>()
            .codec::<i64>()
            .codec::<u32>()
            .codec::<u64>()
            .codec::<usize>()
            .codec::<f32>()
            .codec::<f64>()
            .codec::<String>()
            .codec::<PathBuf>();
        registry
    }

    /// Registers a constructible component. Dependencies are declared on the
    /// returned builder and fetched inside `ctor` through the
    /// [`InjectionContext`]. Registering a type again replaces it.
    pub fn register<T, F>(&mut self, ctor: F) -> ComponentBuilder<'_, T>
    where
        T: Send + Sync + 'static,
        F: for<'a> Fn(&InjectionContext<'a>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let key = key_of::<T>();
        self.note(key);
        let def = ComponentDef {
            key,
            desires: Vec::new(),
            ctor: Arc::new(move |ctx: &InjectionContext<'_>| ctor(ctx).map(|value| erase(Arc::new(value)))),
            flags: ComponentFlags::default(),
            provider: None,
            dispose: None,
        };
        ComponentBuilder {
            registry: self,
            def: Some(def),
            _marker: PhantomData,
        }
    }

    /// Registers a provider component. Binding a desire with
    /// [`Binding::to_provider`](crate::Binding::to_provider) builds the
    /// provider and uses its output.
    pub fn provider<P, F>(&mut self, ctor: F) -> ComponentBuilder<'_, P>
    where
        P: Provider,
        F: for<'a> Fn(&InjectionContext<'a>) -> Result<P, BoxError> + Send + Sync + 'static,
    {
        let output = key_of::<P::Output>();
        self.note(output);
        let provide: Provide = Arc::new(|value: &AnyArc| {
            let provider = unerase::<P>(value).ok_or_else(|| BoxError::from("provider value has unexpected type"))?;
            provider.provide().map(erase)
        });
        let mut builder = self.register::<P, F>(ctor);
        if let Some(def) = builder.def.as_mut() {
            def.provider = Some(ProviderDef {
                output,
                provide,
                shareable: false,
            });
        }
        builder
    }

    /// Declares metadata for a capability (usually a trait object type).
    pub fn interface<I: ?Sized + 'static>(&mut self) -> InterfaceBuilder<'_, I> {
        let key = key_of::<I>();
        self.note(key);
        InterfaceBuilder {
            registry: self,
            key,
            _marker: PhantomData,
        }
    }

    /// Registers a persistence codec for fixed values of `T`.
    pub fn codec<T>(&mut self) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let key = key_of::<T>();
        self.note(key);
        let encode: Encode = Arc::new(|value: &AnyArc| unerase::<T>(value).map(|v| serde_json::to_value(&*v)));
        let decode: Decode = Arc::new(|json: serde_json::Value| serde_json::from_value::<T>(json).map(|v| erase(Arc::new(v))));
        self.codecs.insert(key, Codec { encode, decode });
        self
    }

    /// Whether `key` has a registered constructor.
    pub fn contains(&self, key: TypeKey) -> bool {
        self.components.contains_key(&key)
    }

    /// Whether values of `from` can be injected where `to` is desired.
    pub fn is_assignable(&self, from: TypeKey, to: TypeKey) -> bool {
        from == to || self.upcasts.contains_key(&(from, to))
    }

    /// Capabilities declared for `key`, in name order.
    pub fn interfaces_of(&self, key: TypeKey) -> impl Iterator<Item = TypeKey> + '_ {
        self.interfaces.get(&key).into_iter().flatten().copied()
    }

    /// Sharing flags of `key`, combining its own and its capability declarations.
    pub fn flags(&self, key: TypeKey) -> ComponentFlags {
        let own = self.components.get(&key).map(|d| d.flags).unwrap_or_default();
        own.merge(self.interface_flags.get(&key).copied().unwrap_or_default())
    }

    pub(crate) fn component(&self, key: TypeKey) -> Option<&ComponentDef> {
        self.components.get(&key)
    }

    pub(crate) fn default_implementation(&self, key: TypeKey) -> Option<DefaultImpl> {
        self.defaults.get(&key).copied()
    }

    pub(crate) fn parameter_default(&self, key: TypeKey, qualifier: &Qualifier) -> Option<&Instance> {
        self.parameter_defaults.get(&(key, qualifier.clone()))
    }

    /// Converts a value stored as `from` into one stored as `to`.
    pub(crate) fn convert(&self, value: AnyArc, from: TypeKey, to: TypeKey) -> Option<AnyArc> {
        if from == to {
            return Some(value);
        }
        self.upcasts.get(&(from, to)).and_then(|cast| cast(&value))
    }

    pub(crate) fn codec_for(&self, key: TypeKey) -> Option<&Codec> {
        self.codecs.get(&key)
    }

    pub(crate) fn key_named(&self, name: &str) -> Option<TypeKey> {
        self.names.get(name).copied()
    }

    fn note(&mut self, key: TypeKey) {
        self.names.insert(key.name(), key);
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut components: Vec<_> = self.components.keys().collect();
        components.sort();
        f.debug_struct("ComponentRegistry")
            .field("components", &components)
            .field("upcasts", &self.upcasts.len())
            .field("codecs", &self.codecs.len())
            .finish()
    }
}

/// Declares the injection points and capabilities of a component.
///
/// The definition is stored in the registry when the builder is dropped.
pub struct ComponentBuilder<'r, T> {
    registry: &'r mut ComponentRegistry,
    def: Option<ComponentDef>,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T: Send + Sync + 'static> ComponentBuilder<'r, T> {
    fn push(mut self, desire: Desire) -> Self {
        self.registry.note(desire.key());
        if let Some(def) = self.def.as_mut() {
            def.desires.push(desire);
        }
        self
    }

    fn next_arg(&self) -> usize {
        self.def
            .as_ref()
            .map(|d| {
                d.desires
                    .iter()
                    .filter(|x| matches!(x.point(), InjectionPoint::Constructor(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    fn flags(mut self, f: impl FnOnce(&mut ComponentFlags)) -> Self {
        if let Some(def) = self.def.as_mut() {
            f(&mut def.flags);
        }
        self
    }

    /// Declares the next constructor argument.
    pub fn arg<D: ?Sized + 'static>(self) -> Self {
        let point = InjectionPoint::Constructor(self.next_arg());
        self.push(Desire::new(key_of::<D>(), point))
    }

    pub fn arg_qualified<D: ?Sized + 'static>(self, qualifier: impl Into<Qualifier>) -> Self {
        let point = InjectionPoint::Constructor(self.next_arg());
        self.push(Desire::new(key_of::<D>(), point).with_qualifier(Some(qualifier.into())))
    }

    /// Declares a constructor argument needed only while building; it does
    /// not prevent the component from being shared.
    pub fn transient_arg<D: ?Sized + 'static>(self) -> Self {
        let point = InjectionPoint::Constructor(self.next_arg());
        self.push(Desire::new(key_of::<D>(), point).transient(true))
    }

    /// Declares a constructor argument that may resolve to nothing.
    pub fn optional_arg<D: ?Sized + 'static>(self) -> Self {
        let point = InjectionPoint::Constructor(self.next_arg());
        self.push(Desire::new(key_of::<D>(), point).optional(true))
    }

    /// Declares a constructor argument bound to parameter `P`.
    pub fn param<P: Parameter>(mut self) -> Self {
        let value_key = key_of::<P::Value>();
        self.registry.codec::<P::Value>();
        if let Some(default) = P::default_value() {
            self.registry
                .parameter_defaults
                .insert((value_key, P::qualifier()), Instance::new(Arc::new(default)));
        }
        let point = InjectionPoint::Constructor(self.next_arg());
        self.push(Desire::new(value_key, point).with_qualifier(Some(P::qualifier())))
    }

    /// Declares a dependency injected through a named setter.
    pub fn setter<D: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.push(Desire::new(key_of::<D>(), InjectionPoint::Setter(name.into(), 0)))
    }

    /// Declares a dependency injected into a named field.
    pub fn field<D: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.push(Desire::new(key_of::<D>(), InjectionPoint::Field(name.into())))
    }

    /// Declares an arbitrary desire.
    pub fn desire(self, desire: Desire) -> Self {
        self.push(desire)
    }

    /// Values may be reused across sessions.
    pub fn shareable(self) -> Self {
        self.flags(|f| f.shareable = true)
    }

    pub fn singleton(self) -> Self {
        self.flags(|f| f.singleton = true)
    }

    /// Declares that `T` provides capability `I`; `cast` performs the
    /// unsizing conversion, usually `|t| t`.
    pub fn provides<I: ?Sized + Send + Sync + 'static>(
        self,
        cast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    ) -> Self {
        let from = key_of::<T>();
        let to = key_of::<I>();
        self.registry.note(to);
        let upcast: Upcast = Arc::new(move |value: &AnyArc| unerase::<T>(value).map(|v| erase(cast(v))));
        self.registry.upcasts.insert((from, to), upcast);
        self.registry.interfaces.entry(from).or_default().insert(to);
        self
    }
}

impl<'r, T: Dispose> ComponentBuilder<'r, T> {
    /// Registers every built value with the owning lifecycle.
    pub fn disposable(mut self) -> Self {
        let hook: DisposeHook = Arc::new(|value: &AnyArc| {
            unerase::<T>(value).map(|v| Box::new(move || v.dispose()) as Box<dyn FnOnce() + Send>)
        });
        if let Some(def) = self.def.as_mut() {
            def.dispose = Some(hook);
        }
        self
    }
}

impl<'r, T> ComponentBuilder<'r, T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Baked values of `T` can be written into artifacts.
    pub fn serializable(self) -> Self {
        self.registry.codec::<T>();
        self
    }
}

impl<'r, P: Provider> ComponentBuilder<'r, P> {
    /// The provided values may be reused across sessions.
    pub fn shareable_output(mut self) -> Self {
        if let Some(provider) = self.def.as_mut().and_then(|d| d.provider.as_mut()) {
            provider.shareable = true;
        }
        self
    }
}

impl<'r, T> Drop for ComponentBuilder<'r, T> {
    fn drop(&mut self) {
        if let Some(def) = self.def.take() {
            self.registry.components.insert(def.key, def);
        }
    }
}

/// Declares metadata for a capability type.
pub struct InterfaceBuilder<'r, I: ?Sized> {
    registry: &'r mut ComponentRegistry,
    key: TypeKey,
    _marker: PhantomData<fn(&I)>,
}

impl<'r, I: ?Sized + 'static> InterfaceBuilder<'r, I> {
    /// Constructs `T` for desires of `I` that no rule binds.
    pub fn implemented_by<T: ?Sized + 'static>(self) -> Self {
        let target = key_of::<T>();
        self.registry.note(target);
        self.registry.defaults.insert(self.key, DefaultImpl::Class(target));
        self
    }

    /// Uses provider `P` for desires of `I` that no rule binds.
    pub fn provided_by<P: Provider>(self) -> Self {
        let def = DefaultImpl::Provider {
            provider: key_of::<P>(),
            output: key_of::<P::Output>(),
        };
        self.registry.defaults.insert(self.key, def);
        self
    }

    /// Every value of this capability may be reused across sessions.
    pub fn shareable(self) -> Self {
        self.registry.interface_flags.entry(self.key).or_default().shareable = true;
        self
    }

    pub fn singleton(self) -> Self {
        self.registry.interface_flags.entry(self.key).or_default().singleton = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Speaker: Send + Sync {
        fn word(&self) -> &'static str;
    }

    struct Dog;
    impl Speaker for Dog {
        fn word(&self) -> &'static str {
            "woof"
        }
    }

    #[test]
    fn builder_stores_definition_on_drop() {
        let mut registry = ComponentRegistry::new();
        registry
            .register::<Dog, _>(|_| Ok(Dog))
            .arg::<u32>()
            .arg_qualified::<f64>("weight")
            .setter::<String>("set_name")
            .shareable();

        let def = registry.component(key_of::<Dog>()).unwrap();
        let points: Vec<_> = def.desires.iter().map(|d| d.point().clone()).collect();
        assert_eq!(
            points,
            vec![
                InjectionPoint::Constructor(0),
                InjectionPoint::Constructor(1),
                InjectionPoint::Setter("set_name".into(), 0),
            ]
        );
        assert!(registry.flags(key_of::<Dog>()).shareable);
    }

    #[test]
    fn upcasts_convert_values() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Dog, _>(|_| Ok(Dog)).provides::<dyn Speaker>(|d| d);

        let value = erase(Arc::new(Dog));
        let converted = registry
            .convert(value, key_of::<Dog>(), key_of::<dyn Speaker>())
            .unwrap();
        let speaker = unerase::<dyn Speaker>(&converted).unwrap();
        assert_eq!(speaker.word(), "woof");
        assert!(!registry.is_assignable(key_of::<dyn Speaker>(), key_of::<Dog>()));
        assert_eq!(registry.interfaces_of(key_of::<Dog>()).collect::<Vec<_>>(), vec![key_of::<dyn Speaker>()]);
    }

    #[test]
    fn interface_metadata() {
        let mut registry = ComponentRegistry::new();
        registry.interface::<dyn Speaker>().implemented_by::<Dog>().shareable();
        assert_eq!(
            registry.default_implementation(key_of::<dyn Speaker>()),
            Some(DefaultImpl::Class(key_of::<Dog>()))
        );
        assert!(registry.flags(key_of::<dyn Speaker>()).shareable);
        assert!(!registry.flags(key_of::<Dog>()).shareable);
    }

    #[test]
    fn names_resolve_to_keys() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Dog, _>(|_| Ok(Dog));
        assert_eq!(registry.key_named(key_of::<Dog>().name()), Some(key_of::<Dog>()));
        assert_eq!(registry.key_named("f64"), Some(key_of::<f64>()));
        assert_eq!(registry.key_named("no::such::Type"), None);
    }

    #[test]
    fn codecs_round_trip_values() {
        let registry = ComponentRegistry::new();
        let codec = registry.codec_for(key_of::<f64>()).unwrap();
        let json = (codec.encode)(&erase(Arc::new(0.5f64))).unwrap().unwrap();
        let back = (codec.decode)(json).unwrap();
        assert_eq!(*unerase::<f64>(&back).unwrap(), 0.5);
    }
}
