//! Value parameters: qualified configuration literals such as hyperparameters.
//!
//! A parameter is a marker type naming one configuration value. Components ask
//! for it with [`ComponentBuilder::param`](crate::ComponentBuilder::param), and
//! configurations bind it with [`Configuration::set`](crate::Configuration::set).
//! Under the hood a parameter is just a qualified desire for its value type,
//! so `LearningRate` becomes a desire for `f64` qualified `@learning-rate`.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::key::Qualifier;

/// Marker trait for a named configuration value.
///
/// # Examples
///
/// ```rust
/// use ferrous_graft::Parameter;
///
/// struct LearningRate;
///
/// impl Parameter for LearningRate {
///     type Value = f64;
///     const NAME: &'static str = "learning-rate";
///
///     fn default_value() -> Option<f64> {
///         Some(0.01)
///     }
/// }
///
/// assert_eq!(LearningRate::qualifier().name(), "learning-rate");
/// ```
pub trait Parameter: 'static {
    /// The literal type carried by the parameter.
    type Value: FromLiteral + Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Qualifier name under which the value is bound.
    const NAME: &'static str;

    /// Value used when no configuration binds the parameter.
    fn default_value() -> Option<Self::Value> {
        None
    }

    /// The qualifier standing for this parameter.
    fn qualifier() -> Qualifier {
        Qualifier::new(Self::NAME)
    }
}

/// An untyped configuration literal, as found in configuration files or the
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// Parses a raw string the way environment values are read: integers,
    /// then floats, then booleans, falling back to a string.
    pub fn parse(raw: &str) -> Literal {
        if let Ok(i) = raw.parse::<i64>() {
            Literal::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Literal::Float(f)
        } else if let Ok(b) = raw.parse::<bool>() {
            Literal::Bool(b)
        } else {
            Literal::Str(raw.to_string())
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<u32> for Literal {
    fn from(v: u32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Str(v)
    }
}

/// Coercion from a [`Literal`] into a typed parameter value.
pub trait FromLiteral: Sized {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError>;
}

fn mismatch<T>(literal: &Literal) -> ConfigError {
    ConfigError::LiteralMismatch {
        expected: std::any::type_name::<T>(),
        found: literal.clone(),
    }
}

impl FromLiteral for f64 {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        match literal {
            Literal::Float(f) => Ok(*f),
            Literal::Int(i) => Ok(*i as f64),
            Literal::Str(s) => s.trim().parse().map_err(|_| mismatch::<f64>(literal)),
            Literal::Bool(_) => Err(mismatch::<f64>(literal)),
        }
    }
}

impl FromLiteral for i64 {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        match literal {
            Literal::Int(i) => Ok(*i),
            Literal::Str(s) => s.trim().parse().map_err(|_| mismatch::<i64>(literal)),
            _ => Err(mismatch::<i64>(literal)),
        }
    }
}

impl FromLiteral for i32 {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        let wide = i64::from_literal(literal).map_err(|_| mismatch::<i32>(literal))?;
        i32::try_from(wide).map_err(|_| mismatch::<i32>(literal))
    }
}

impl FromLiteral for u32 {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        let wide = i64::from_literal(literal).map_err(|_| mismatch::<u32>(literal))?;
        u32::try_from(wide).map_err(|_| mismatch::<u32>(literal))
    }
}

impl FromLiteral for usize {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        let wide = i64::from_literal(literal).map_err(|_| mismatch::<usize>(literal))?;
        usize::try_from(wide).map_err(|_| mismatch::<usize>(literal))
    }
}

impl FromLiteral for bool {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        match literal {
            Literal::Bool(b) => Ok(*b),
            Literal::Str(s) => s.trim().parse().map_err(|_| mismatch::<bool>(literal)),
            _ => Err(mismatch::<bool>(literal)),
        }
    }
}

impl FromLiteral for String {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        match literal {
            Literal::Str(s) => Ok(s.clone()),
            _ => Err(mismatch::<String>(literal)),
        }
    }
}

// Path parameters are written as plain strings in configuration.
impl FromLiteral for PathBuf {
    fn from_literal(literal: &Literal) -> Result<Self, ConfigError> {
        match literal {
            Literal::Str(s) => Ok(PathBuf::from(s)),
            _ => Err(mismatch::<PathBuf>(literal)),
        }
    }
}
