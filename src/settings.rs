//! Solver limits and defaults.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::CachePolicy;
use crate::parameter::{FromLiteral, Literal};

/// Resolution depth used when nothing else is configured.
pub const DEFAULT_MAX_DEPTH: usize = 100;

const MAX_DEPTH_VAR: &str = "GRAFT_MAX_DEPTH";
const DEFAULT_POLICY_VAR: &str = "GRAFT_DEFAULT_POLICY";

/// Knobs for the dependency solver.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::{CachePolicy, SolverSettings};
///
/// let settings = SolverSettings::default().with_max_depth(12);
/// assert_eq!(settings.max_depth, 12);
/// assert_eq!(settings.default_policy, CachePolicy::Memoize);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Longest dependency chain followed before giving up.
    pub max_depth: usize,
    /// Cache policy for satisfactions no rule assigns one to.
    pub default_policy: CachePolicy,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_depth: DEFAULT_MAX_DEPTH,
            default_policy: CachePolicy::Memoize,
        }
    }
}

impl SolverSettings {
    /// Reads `GRAFT_MAX_DEPTH` and `GRAFT_DEFAULT_POLICY`, falling back to the
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = SolverSettings::default();
        if let Ok(raw) = env::var(MAX_DEPTH_VAR) {
            settings.max_depth = usize::from_literal(&Literal::parse(&raw))?;
        }
        if let Ok(raw) = env::var(DEFAULT_POLICY_VAR) {
            settings.default_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "memoize" => CachePolicy::Memoize,
                "new-instance" | "new_instance" => CachePolicy::NewInstance,
                _ => {
                    return Err(ConfigError::Source {
                        source_name: DEFAULT_POLICY_VAR.to_string(),
                        message: format!("unknown cache policy {raw:?}"),
                    })
                }
            };
        }
        Ok(settings)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_default_policy(mut self, policy: CachePolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        env::remove_var(MAX_DEPTH_VAR);
        env::remove_var(DEFAULT_POLICY_VAR);
    }

    #[test]
    #[serial]
    fn unset_environment_gives_defaults() {
        clear();
        assert_eq!(SolverSettings::from_env().unwrap(), SolverSettings::default());
    }

    #[test]
    #[serial]
    fn reads_depth_and_policy() {
        clear();
        env::set_var(MAX_DEPTH_VAR, "7");
        env::set_var(DEFAULT_POLICY_VAR, "new-instance");
        let settings = SolverSettings::from_env().unwrap();
        clear();
        assert_eq!(settings.max_depth, 7);
        assert_eq!(settings.default_policy, CachePolicy::NewInstance);
    }

    #[test]
    #[serial]
    fn rejects_bad_values() {
        clear();
        env::set_var(MAX_DEPTH_VAR, "deep");
        assert!(SolverSettings::from_env().is_err());
        clear();
        env::set_var(DEFAULT_POLICY_VAR, "sometimes");
        assert!(SolverSettings::from_env().is_err());
        clear();
    }

    #[test]
    fn deserializes_partial_json() {
        let settings: SolverSettings = serde_json::from_str(r#"{"default_policy":"new-instance"}"#).unwrap();
        assert_eq!(settings.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(settings.default_policy, CachePolicy::NewInstance);
    }
}
