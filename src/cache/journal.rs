//! Build journal
//!
//! Appends one JSON line per build attempt to `paths.journal_file`, so
//! operators can see what was built, by which process, and why a build
//! failed. Writing the journal never affects the build itself.

use crate::config::schema::Config;
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Event names written to the journal
pub mod events {
    pub const BUILD_OK: &str = "build.ok";
    pub const BUILD_FAILED: &str = "build.failed";
    pub const CACHE_REMOVED: &str = "cache.removed";
}

/// File-based journal that appends JSON lines
#[derive(Debug, Clone)]
pub struct BuildJournal {
    enabled: bool,
    path: PathBuf,
}

impl BuildJournal {
    /// Create a journal from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.journal,
            path: config.paths.journal_file.clone(),
        }
    }

    /// Journal at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    /// A journal that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Record an event as a JSON line
    ///
    /// IO and serialization failures are logged and dropped.
    pub async fn record(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "pid": std::process::id(),
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize journal event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write build journal: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
