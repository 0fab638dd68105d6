//! Configuration management for fontdepot

pub mod schema;

pub use schema::Config;

use crate::error::{FontDepotError, FontDepotResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fontdepot")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file is missing.
    ///
    /// Relative paths are resolved against the config file's directory, or
    /// against the working directory when running on defaults.
    pub async fn load(&self) -> FontDepotResult<Config> {
        let (mut config, base) = if self.config_path.exists() {
            let config = self.load_from_file(&self.config_path).await?;
            let base = self
                .config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (config, base)
        } else {
            debug!("Config file not found, using defaults");
            let cwd = std::env::current_dir()
                .map_err(|e| FontDepotError::io("getting current directory", e))?;
            (Config::default(), cwd)
        };

        config.paths.resolve_against(&base);
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> FontDepotResult<Config> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            FontDepotError::io(format!("reading config from {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| FontDepotError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> FontDepotResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            FontDepotError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> FontDepotResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FontDepotError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure the cache and metadata directories exist
    pub async fn ensure_data_dirs(config: &Config) -> FontDepotResult<()> {
        let dirs = [&config.paths.cache_dir, &config.paths.meta_dir];

        for dir in dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                FontDepotError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }

        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
