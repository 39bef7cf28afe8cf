use fabric_config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Settings for active-message handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMessageConfig {
    /// Record per-handler call durations and report them at shutdown.
    /// Hot-updatable.
    #[serde(default)]
    pub profile_handlers: bool,
}

impl Config for ActiveMessageConfig {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        Ok(value.clone().try_into()?)
    }

    fn hot_update(&mut self, other: &Self) {
        self.profile_handlers = other.profile_handlers;
    }

    fn render(&self) -> String {
        format!("profile_handlers = {}\n", self.profile_handlers)
    }
}
