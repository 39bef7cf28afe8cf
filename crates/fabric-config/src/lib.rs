//! Typed, TOML-backed configuration with hot-update support.
//!
//! A component describes its settings as a struct implementing [`Config`].
//! [`ConfigManager`] owns the live value and hands out cheap snapshots, so
//! readers on the message path never take a lock.

pub mod manager;

use thiserror::Error;

pub use manager::ConfigManager;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A key was present but held a value of the wrong TOML type.
    #[error("type mismatch for `{field}`: expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("value {value} of `{field}` out of range (min {min:?}, max {max:?})")]
    OutOfRange {
        field: String,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A configuration section.
pub trait Config: Sized + Send + Sync + 'static {
    /// Build from a TOML table. Missing keys keep their defaults.
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>;

    /// Copy the hot-updatable fields of `other` into `self`.
    fn hot_update(&mut self, other: &Self);

    /// Render back to TOML text.
    fn render(&self) -> String;

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Read an optional boolean key from a TOML table.
pub fn get_bool(value: &toml::Value, key: &str) -> Result<Option<bool>, ConfigError> {
    match value.get(key) {
        None => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| ConfigError::TypeMismatch {
            field: key.into(),
            expected: "boolean".into(),
        }),
    }
}

/// Read an optional integer key from a TOML table.
pub fn get_integer(value: &toml::Value, key: &str) -> Result<Option<i64>, ConfigError> {
    match value.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_integer()
            .map(Some)
            .ok_or_else(|| ConfigError::TypeMismatch {
                field: key.into(),
                expected: "integer".into(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_bool() {
        let value: toml::Value = "flag = true\nnum = 3".parse().unwrap();
        assert_eq!(get_bool(&value, "flag").unwrap(), Some(true));
        assert_eq!(get_bool(&value, "missing").unwrap(), None);
        assert!(matches!(
            get_bool(&value, "num"),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_get_integer() {
        let value: toml::Value = "num = 3\nname = \"x\"".parse().unwrap();
        assert_eq!(get_integer(&value, "num").unwrap(), Some(3));
        let err = get_integer(&value, "name").unwrap_err();
        assert_eq!(err.to_string(), "type mismatch for `name`: expected integer");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = ConfigError::OutOfRange {
            field: "depth".into(),
            value: "0".into(),
            min: Some("1".into()),
            max: None,
        };
        assert!(err.to_string().contains("depth"));
        assert!(err.to_string().contains("out of range"));
    }
}
