//! Configuration schema for fontdepot
//!
//! Configuration is stored at `~/.config/fontdepot/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Font, cache and metadata directories
    pub paths: PathsConfig,

    /// URL settings used when rendering CSS and listings
    pub server: ServerConfig,

    /// Subset cache and build pool settings
    pub cache: CacheConfig,

    /// CSS rendering defaults
    pub css: CssConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append one JSON line per build attempt to the journal
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            journal: true,
        }
    }
}

/// On-disk layout. Relative paths resolve against the config file directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Source fonts (never written)
    pub font_dir: PathBuf,

    /// Built `<key>.woff2` files
    pub cache_dir: PathBuf,

    /// `<key>.json` provenance records
    pub meta_dir: PathBuf,

    /// Build journal (JSON lines)
    pub journal_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            font_dir: PathBuf::from("fonts"),
            cache_dir: PathBuf::from("data/cache"),
            meta_dir: PathBuf::from("data/meta"),
            journal_file: PathBuf::from("data/journal.log"),
        }
    }
}

impl PathsConfig {
    /// Make every relative path absolute against `base`
    pub fn resolve_against(&mut self, base: &Path) {
        for path in [
            &mut self.font_dir,
            &mut self.cache_dir,
            &mut self.meta_dir,
            &mut self.journal_file,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Public URL settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the serving layer
    pub address: String,

    /// Absolute URL prefix used in `src:` and listing URLs
    pub base_url: String,

    /// Path segment under which subset files are served
    pub subset_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            base_url: "http://127.0.0.1:8080".to_string(),
            subset_path: "/s".to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Concurrent subset builds (0 = half the available cores)
    pub workers: usize,

    /// A build running longer than this is a failure
    pub build_timeout_secs: u64,

    /// How long a request waits for another worker's build lock
    pub lock_timeout_secs: u64,

    /// `cache gc` removes entries older than N days (0 = stale only)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            build_timeout_secs: 120,
            lock_timeout_secs: 300,
            gc_days: 30,
        }
    }
}

impl CacheConfig {
    /// Worker pool size with the `0 = auto` rule applied
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cores / 2).max(1)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// CSS rendering defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CssConfig {
    /// `font-display` value when the request has none
    pub default_display: String,
}

impl Default for CssConfig {
    fn default() -> Self {
        Self {
            default_display: "swap".to_string(),
        }
    }
}
