//! Layered literal sources for parameter bindings.
//!
//! A [`ConfigProvider`] consults its sources in priority order and caches what
//! it finds. Parameter bindings read from it through
//! [`ParameterBinding::from_source`](crate::ParameterBinding::from_source).

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::parameter::Literal;

/// A place configuration literals come from.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Looks up a literal by parameter name.
    fn get(&self, key: &str) -> Option<Literal>;

    /// Lists every key the source defines.
    fn keys(&self) -> Vec<String>;
}

/// Reads literals from environment variables.
///
/// A key is upper-cased with `-` and `.` turned into `_`, and prefixed with
/// `PREFIX_` when a prefix is set: `learning-rate` is read from
/// `LEARNING_RATE`, or from `APP_LEARNING_RATE` with prefix `app`.
#[derive(Debug, Default)]
pub struct EnvironmentConfigSource {
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable(&self, key: &str) -> String {
        let key = key.to_uppercase().replace(['-', '.'], "_");
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_uppercase(), key),
            None => key,
        }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn get(&self, key: &str) -> Option<Literal> {
        env::var(self.variable(key)).ok().map(|raw| Literal::parse(&raw))
    }

    fn keys(&self) -> Vec<String> {
        let prefix = self.prefix.as_ref().map(|p| format!("{}_", p.to_uppercase()));
        env::vars()
            .filter_map(|(name, _)| match &prefix {
                Some(prefix) => name.strip_prefix(prefix.as_str()).map(str::to_lowercase),
                None => Some(name.to_lowercase()),
            })
            .collect()
    }
}

/// Reads literals from a flat JSON object in a file.
///
/// The file is loaded on first use; [`reload`](Self::reload) reads it again.
#[derive(Debug)]
pub struct JsonConfigSource {
    path: PathBuf,
    values: RwLock<Option<HashMap<String, Literal>>>,
}

impl JsonConfigSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: RwLock::new(None),
        }
    }

    /// Reads and parses the file, replacing any previously loaded values.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.failure(e))?;
        let parsed: HashMap<String, Literal> = serde_json::from_str(&content).map_err(|e| self.failure(e))?;
        debug!(path = %self.path.display(), keys = parsed.len(), "loaded configuration file");
        *self.values.write() = Some(parsed);
        Ok(())
    }

    fn failure(&self, error: impl fmt::Display) -> ConfigError {
        ConfigError::Source {
            source_name: self.path.display().to_string(),
            message: error.to_string(),
        }
    }

    fn ensure_loaded(&self) {
        if self.values.read().is_some() {
            return;
        }
        if let Err(error) = self.reload() {
            warn!(%error, "configuration file unavailable");
            // Remember the failure so the file is not read on every lookup.
            *self.values.write() = Some(HashMap::new());
        }
    }
}

impl ConfigSource for JsonConfigSource {
    fn get(&self, key: &str) -> Option<Literal> {
        self.ensure_loaded();
        self.values.read().as_ref()?.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.ensure_loaded();
        self.values
            .read()
            .as_ref()
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Ordered set of configuration sources with a lookup cache.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::config::{ConfigProvider, ConfigSource};
/// use ferrous_graft::Literal;
///
/// #[derive(Debug)]
/// struct Fixed;
///
/// impl ConfigSource for Fixed {
///     fn get(&self, key: &str) -> Option<Literal> {
///         (key == "iterations").then(|| Literal::Int(40))
///     }
///     fn keys(&self) -> Vec<String> {
///         vec!["iterations".into()]
///     }
/// }
///
/// let mut provider = ConfigProvider::new();
/// provider.add_source(Box::new(Fixed));
/// assert_eq!(provider.get("iterations"), Some(Literal::Int(40)));
/// assert_eq!(provider.get("missing"), None);
/// ```
pub struct ConfigProvider {
    sources: Vec<Box<dyn ConfigSource>>,
    cache: RwLock<HashMap<String, Literal>>,
}

impl ConfigProvider {
    /// Creates a provider with no sources.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a source. Sources added first take priority.
    pub fn add_source(&mut self, source: Box<dyn ConfigSource>) {
        self.sources.push(source);
        self.invalidate_cache();
    }

    /// Looks `key` up in each source in priority order.
    pub fn get(&self, key: &str) -> Option<Literal> {
        if let Some(value) = self.cache.read().get(key) {
            return Some(value.clone());
        }
        let value = self.sources.iter().find_map(|source| source.get(key))?;
        self.cache.write().insert(key.to_string(), value.clone());
        Some(value)
    }

    /// Forgets cached lookups so the next ones consult the sources again.
    pub fn invalidate_cache(&self) {
        self.cache.write().clear();
    }

    /// Every key defined by any source, sorted and deduplicated.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.iter().flat_map(|source| source.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

impl Default for ConfigProvider {
    /// A provider reading only the environment.
    fn default() -> Self {
        let mut provider = Self::new();
        provider.add_source(Box::new(EnvironmentConfigSource::new()));
        provider
    }
}

impl fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("sources", &self.sources)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug)]
    struct MockSource(&'static [(&'static str, i64)]);

    impl ConfigSource for MockSource {
        fn get(&self, key: &str) -> Option<Literal> {
            self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| Literal::Int(*v))
        }

        fn keys(&self) -> Vec<String> {
            self.0.iter().map(|(k, _)| k.to_string()).collect()
        }
    }

    #[test]
    #[serial]
    fn environment_keys_are_normalized() {
        env::set_var("LEARNING_RATE", "0.25");
        env::set_var("GRAFTTEST_MODEL_PATH", "/tmp/model.bin");

        assert_eq!(EnvironmentConfigSource::new().get("learning-rate"), Some(Literal::Float(0.25)));
        let prefixed = EnvironmentConfigSource::with_prefix("grafttest");
        assert_eq!(
            prefixed.get("model.path"),
            Some(Literal::Str("/tmp/model.bin".to_string()))
        );
        assert!(prefixed.keys().contains(&"model_path".to_string()));

        env::remove_var("LEARNING_RATE");
        env::remove_var("GRAFTTEST_MODEL_PATH");
    }

    #[test]
    fn earlier_sources_take_priority() {
        let mut provider = ConfigProvider::new();
        provider.add_source(Box::new(MockSource(&[("iterations", 10)])));
        provider.add_source(Box::new(MockSource(&[("iterations", 99), ("seed", 3)])));

        assert_eq!(provider.get("iterations"), Some(Literal::Int(10)));
        assert_eq!(provider.get("seed"), Some(Literal::Int(3)));
        assert_eq!(provider.all_keys(), vec!["iterations".to_string(), "seed".to_string()]);
    }

    #[test]
    fn json_file_is_loaded_lazily_and_reloaded() {
        let path = env::temp_dir().join(format!("graft-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"iterations": 5, "name": "ridge"}"#).unwrap();

        let source = JsonConfigSource::new(&path);
        assert_eq!(source.get("iterations"), Some(Literal::Int(5)));
        assert_eq!(source.get("name"), Some(Literal::Str("ridge".into())));

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"iterations": 6}"#).unwrap();
        drop(file);
        source.reload().unwrap();
        assert_eq!(source.get("iterations"), Some(Literal::Int(6)));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_json_file_is_reported_on_reload() {
        let source = JsonConfigSource::new("/nonexistent/graft/config.json");
        assert_eq!(source.get("anything"), None);
        assert!(matches!(source.reload(), Err(ConfigError::Source { .. })));
    }
}
