//! Cross-process build locks
//!
//! Provides a trait for named, exclusive locks so the coordinator does not
//! care how mutual exclusion between worker processes is achieved. The
//! default backend uses OS advisory file locks, which the kernel releases
//! when the holder dies.

use crate::error::{FontDepotError, FontDepotResult};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held lock; released on drop
pub struct LockGuard {
    name: String,
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Abstract named-lock interface
///
/// Implementations must make `acquire` exclusive across every process that
/// shares the same cache directory.
#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Wait up to `timeout` for exclusive ownership of `name`
    async fn acquire(&self, name: &str, timeout: Duration) -> FontDepotResult<LockGuard>;
}

/// Advisory `flock`-style locks on `<dir>/<name>.lock`
#[derive(Debug, Clone)]
pub struct FileLockProvider {
    dir: PathBuf,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lock directory under a cache directory
    pub fn for_cache_dir(cache_dir: &Path) -> Self {
        Self::new(cache_dir.join(".locks"))
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }

    fn open(&self, name: &str) -> FontDepotResult<File> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            FontDepotError::cache_io(format!("creating lock directory {}", self.dir.display()), e)
        })?;
        let path = self.lock_path(name);
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| FontDepotError::cache_io(format!("opening lock {}", path.display()), e))
    }

    /// Single non-blocking attempt; `Ok(None)` while someone else holds it
    pub fn try_acquire(&self, name: &str) -> FontDepotResult<Option<LockGuard>> {
        let file = self.open(name)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockGuard::new(name, HeldFile(file)))),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(FontDepotError::cache_io(format!("locking {}", name), e)),
        }
    }

    /// [`try_acquire`](Self::try_acquire) on a blocking thread
    pub async fn try_acquire_async(&self, name: &str) -> FontDepotResult<Option<LockGuard>> {
        let provider = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || provider.try_acquire(&name))
            .await
            .map_err(|e| FontDepotError::Internal(format!("lock attempt failed: {}", e)))?
    }
}

#[async_trait]
impl NamedLock for FileLockProvider {
    async fn acquire(&self, name: &str, timeout: Duration) -> FontDepotResult<LockGuard> {
        let started = Instant::now();
        let mut logged = false;

        loop {
            if let Some(guard) = self.try_acquire_async(name).await? {
                debug!("Acquired build lock {}", name);
                return Ok(guard);
            }
            if !logged {
                debug!("Build lock {} is held elsewhere, waiting", name);
                logged = true;
            }
            if started.elapsed() >= timeout {
                warn!("Gave up on build lock {} after {:?}", name, timeout);
                return Err(FontDepotError::LockTimeout {
                    name: name.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

struct HeldFile(File);

impl Drop for HeldFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}
