use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{Config, ConfigError};

/// Owns the live value of a configuration section.
///
/// Readers call [`get`](Self::get) for a lock-free snapshot; writers replace
/// the whole value atomically.
pub struct ConfigManager<T: Config> {
    config: ArcSwap<T>,
    path: Option<PathBuf>,
}

impl<T: Config> ConfigManager<T> {
    pub fn new(config: T) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    /// Load and validate a section from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = read_file::<T>(path)?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self) -> arc_swap::Guard<Arc<T>> {
        self.config.load()
    }

    /// Replace the whole value after validating it.
    pub fn update(&self, new_config: T) -> Result<(), ConfigError> {
        new_config.validate()?;
        self.config.store(Arc::new(new_config));
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl<T: Config + Clone> ConfigManager<T> {
    /// Re-read the backing file and apply only its hot-updatable fields.
    ///
    /// A manager built with [`new`](Self::new) has no file and is left as is.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let fresh = read_file::<T>(path)?;
        let mut current = (*self.config.load_full()).clone();
        current.hot_update(&fresh);
        self.config.store(Arc::new(current));
        tracing::info!(path = %path.display(), "config reloaded");
        Ok(())
    }

    pub fn snapshot(&self) -> T {
        (*self.config.load_full()).clone()
    }
}

impl<T: Config + Default> Default for ConfigManager<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

fn read_file<T: Config>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let value: toml::Value = content.parse()?;
    let config = T::from_toml(&value)?;
    config.validate()?;
    Ok(config)
}
