//! Build coordination
//!
//! Makes sure each cache key is built at most once at a time, both inside
//! this process (callers for the same key share one build) and across
//! processes sharing the cache directory (a named lock per key). Builds run
//! on blocking workers bounded by a semaphore and a timeout, and are
//! detached from the caller: a dropped request never cancels a build.

use crate::cache::journal::{events, BuildJournal};
use crate::cache::key::{sha256_hex, CacheKey};
use crate::cache::{CacheEntry, CacheStore, NamedLock, Provenance};
use crate::config::schema::CacheConfig;
use crate::error::{FontDepotError, FontDepotResult};
use crate::registry::FontFile;
use crate::subset::{BuildInput, BuiltSubset, SubsetBuild, SubsetCatalog, SubsetSpec, UnicodeRanges};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// One subset of one font, ready to be built
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub font: FontFile,
    pub subset: SubsetSpec,
    pub ranges: UnicodeRanges,
    pub key: CacheKey,
}

impl BuildRequest {
    pub fn new(font: FontFile, subset: SubsetSpec, catalog: &SubsetCatalog) -> FontDepotResult<Self> {
        let ranges = subset.ranges(catalog)?;
        let key = CacheKey::derive(&font.checksum, subset.label(), &ranges);
        Ok(Self {
            font,
            subset,
            ranges,
            key,
        })
    }

    fn provenance(&self, built: &BuiltSubset) -> Provenance {
        Provenance {
            family: self.font.family.clone(),
            style: self.font.style.to_string(),
            weight: self.font.weight,
            subset: self.subset.label().to_string(),
            unicode_range: self.ranges.to_string(),
            source_file: self.font.filename.clone(),
            source_checksum: self.font.checksum.clone(),
            glyph_count: built.glyph_count,
            codepoint_count: built.codepoint_count,
        }
    }
}

/// Worker pool and timeout settings
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub workers: usize,
    pub build_timeout: Duration,
    pub lock_timeout: Duration,
}

impl From<&CacheConfig> for CoordinatorOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            workers: config.effective_workers(),
            build_timeout: config.build_timeout(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

type Outcome = Option<Result<CacheEntry, Arc<FontDepotError>>>;

struct Inner {
    store: CacheStore,
    locks: Arc<dyn NamedLock>,
    builder: Arc<dyn SubsetBuild>,
    journal: BuildJournal,
    permits: Arc<Semaphore>,
    options: CoordinatorOptions,
    inflight: Mutex<HashMap<CacheKey, watch::Receiver<Outcome>>>,
}

/// Single-flight, cross-process build scheduler
#[derive(Clone)]
pub struct BuildCoordinator {
    inner: Arc<Inner>,
}

impl BuildCoordinator {
    pub fn new(
        store: CacheStore,
        locks: Arc<dyn NamedLock>,
        builder: Arc<dyn SubsetBuild>,
        journal: BuildJournal,
        options: CoordinatorOptions,
    ) -> Self {
        let workers = options.workers.max(1);
        debug!("Build pool: {} workers", workers);
        Self {
            inner: Arc::new(Inner {
                store,
                locks,
                builder,
                journal,
                permits: Arc::new(Semaphore::new(workers)),
                options,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Return the published entry for `request`, building it if needed.
    ///
    /// With `force`, the cache is ignored and the subset is rebuilt under
    /// the key's lock, replacing the published entry.
    pub async fn get_or_build(
        &self,
        request: BuildRequest,
        force: bool,
    ) -> FontDepotResult<CacheEntry> {
        if !force {
            if let Some(entry) = self.inner.store.get(&request.key).await? {
                debug!("Cache hit {} ({})", request.key.short(), request.subset.label());
                return Ok(entry);
            }
        }

        let mut rx = self.join_or_lead(request, force);
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FontDepotError::Internal("build task ended without a result".into()))?
            .clone();

        match outcome {
            Some(Ok(entry)) => Ok(entry),
            Some(Err(e)) => Err(FontDepotError::Shared(e)),
            None => Err(FontDepotError::Internal("build finished without a result".into())),
        }
    }

    /// Number of builds currently in flight in this process
    pub fn in_flight(&self) -> usize {
        self.inflight().len()
    }

    fn inflight(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, watch::Receiver<Outcome>>> {
        self.inner.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn join_or_lead(&self, request: BuildRequest, force: bool) -> watch::Receiver<Outcome> {
        let mut inflight = self.inflight();
        if !force {
            if let Some(rx) = inflight.get(&request.key) {
                debug!("Joining in-flight build {}", request.key.short());
                return rx.clone();
            }
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(request.key.clone(), rx.clone());
        drop(inflight);

        let inner = Arc::clone(&self.inner);
        let own = rx.clone();
        tokio::spawn(async move {
            let key = request.key.clone();
            let result = run_build(&inner, request, force).await.map_err(Arc::new);

            {
                let mut inflight = inner.inflight.lock().unwrap_or_else(|e| e.into_inner());
                if inflight.get(&key).is_some_and(|current| current.same_channel(&own)) {
                    inflight.remove(&key);
                }
            }
            let _ = tx.send(Some(result));
        });

        rx
    }
}

async fn run_build(
    inner: &Inner,
    request: BuildRequest,
    force: bool,
) -> FontDepotResult<CacheEntry> {
    let key = request.key.clone();
    let lock = inner
        .locks
        .acquire(key.as_str(), inner.options.lock_timeout)
        .await?;

    if !force {
        if let Some(entry) = inner.store.get(&key).await? {
            debug!("{} was published by another worker", key.short());
            return Ok(entry);
        }
    }

    let permit = Arc::clone(&inner.permits)
        .acquire_owned()
        .await
        .map_err(|_| FontDepotError::Internal("build pool closed".into()))?;

    let started = Instant::now();
    let builder = Arc::clone(&inner.builder);
    let job = request.clone();
    // The worker owns the lock so a build that outlives its timeout still
    // keeps other processes off the key until it finishes.
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let result = read_source(&job.font).and_then(|font| {
            builder.build(BuildInput {
                path: &job.font.path,
                family: &job.font.family,
                subset: job.subset.label(),
                font: &font,
                ranges: &job.ranges,
            })
        });
        (lock, result)
    });

    let (lock, built) = match tokio::time::timeout(inner.options.build_timeout, handle).await {
        Ok(Ok((lock, result))) => (Some(lock), result),
        Ok(Err(join)) if join.is_panic() => (
            None,
            Err(FontDepotError::BuildPanicked {
                key: key.to_string(),
            }),
        ),
        Ok(Err(join)) => (
            None,
            Err(FontDepotError::Internal(format!("build task failed: {}", join))),
        ),
        Err(_) => (
            None,
            Err(FontDepotError::BuildTimeout {
                key: key.to_string(),
                secs: inner.options.build_timeout.as_secs(),
            }),
        ),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let built = match built {
        Ok(built) => built,
        Err(e) => {
            warn!(
                "Build of {} {} failed: {}",
                request.font.filename,
                request.subset.label(),
                e
            );
            inner
                .journal
                .record(
                    events::BUILD_FAILED,
                    &serde_json::json!({
                        "key": key,
                        "family": request.font.family,
                        "subset": request.subset.label(),
                        "error": e.to_string(),
                        "duration_ms": duration_ms,
                    }),
                )
                .await;
            return Err(e);
        }
    };

    let entry = inner
        .store
        .put(&key, &built.woff2, request.provenance(&built))
        .await?;
    drop(lock);

    info!(
        "Built {} {} {} -> {} ({} bytes, {} glyphs, {}ms)",
        request.font.family,
        request.font.weight,
        request.subset.label(),
        key.short(),
        entry.size,
        built.glyph_count,
        duration_ms
    );
    inner
        .journal
        .record(
            events::BUILD_OK,
            &serde_json::json!({
                "key": key,
                "family": request.font.family,
                "subset": request.subset.label(),
                "bytes": entry.size,
                "duration_ms": duration_ms,
                "forced": force,
            }),
        )
        .await;

    Ok(entry)
}

/// Read the source font, insisting it is still the file that was registered
fn read_source(font: &FontFile) -> FontDepotResult<Vec<u8>> {
    let bytes = match std::fs::read(&font.path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FontDepotError::SourceChanged(font.path.clone()));
        }
        Err(e) => {
            return Err(FontDepotError::io(format!("reading {}", font.path.display()), e));
        }
    };
    if sha256_hex(&bytes) != font.checksum {
        return Err(FontDepotError::SourceChanged(font.path.clone()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileLockProvider;
    use crate::registry::FontRegistry;
    use crate::subset::SubsetBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Real builder that counts invocations and can be slowed down
    struct Counting {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl Counting {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SubsetBuild for Counting {
        fn build(&self, input: BuildInput<'_>) -> FontDepotResult<BuiltSubset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(FontDepotError::Encode("induced failure".into()));
            }
            SubsetBuilder::new().build(input)
        }
    }

    struct Fixture {
        dir: TempDir,
        registry: FontRegistry,
        locks: Arc<FileLockProvider>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let fonts = dir.path().join("fonts");
            std::fs::create_dir(&fonts).unwrap();
            crate::testing::write_example_family(&fonts).unwrap();
            let registry = FontRegistry::new(&fonts);
            registry.refresh().await.unwrap();
            let locks = Arc::new(FileLockProvider::for_cache_dir(&dir.path().join("cache")));
            Self {
                dir,
                registry,
                locks,
            }
        }

        fn store(&self) -> CacheStore {
            CacheStore::new(self.dir.path().join("cache"), self.dir.path().join("meta"))
        }

        fn coordinator(&self, builder: Arc<dyn SubsetBuild>, build_timeout: Duration) -> BuildCoordinator {
            BuildCoordinator::new(
                self.store(),
                self.locks.clone(),
                builder,
                BuildJournal::at(self.dir.path().join("journal.log")),
                CoordinatorOptions {
                    workers: 2,
                    build_timeout,
                    lock_timeout: Duration::from_secs(10),
                },
            )
        }

        fn request(&self, subset: &'static str) -> BuildRequest {
            let font = self
                .registry
                .closest_variant("Example", 400, crate::registry::FontStyle::Normal)
                .unwrap();
            BuildRequest::new(font, SubsetSpec::Named(subset), SubsetCatalog::standard()).unwrap()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_build() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::from_millis(200));
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                let request = fixture.request("latin");
                tokio::spawn(async move { coordinator.get_or_build(request, false).await })
            })
            .collect();

        let mut entries = Vec::new();
        for task in tasks {
            entries.push(task.await.unwrap().unwrap());
        }

        assert_eq!(builder.calls(), 1);
        assert!(entries.iter().all(|e| e == &entries[0]));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cache_hit_skips_builder() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::ZERO);
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));

        let first = coordinator.get_or_build(fixture.request("latin"), false).await.unwrap();
        let bytes = coordinator.store().read_bytes(&first.key).await.unwrap();
        let second = coordinator.get_or_build(fixture.request("latin"), false).await.unwrap();

        assert_eq!(builder.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(coordinator.store().read_bytes(&second.key).await.unwrap(), bytes);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn force_rebuilds_identical_bytes() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::ZERO);
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));

        let first = coordinator.get_or_build(fixture.request("latin"), false).await.unwrap();
        let forced = coordinator.get_or_build(fixture.request("latin"), true).await.unwrap();

        assert_eq!(builder.calls(), 2);
        assert_eq!(first.key, forced.key);
        assert_eq!(first.sha256, forced.sha256);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let fixture = Fixture::new().await;
        let builder = Counting::failing();
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let request = fixture.request("latin");
                tokio::spawn(async move { coordinator.get_or_build(request, false).await })
            })
            .collect();
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("induced failure"));
        }
        assert_eq!(builder.calls(), 1);

        let request = fixture.request("latin");
        assert!(coordinator.store().get(&request.key).await.unwrap().is_none());

        // The next request retries
        assert!(coordinator.get_or_build(request, false).await.is_err());
        assert_eq!(builder.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_build_times_out() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::from_millis(500));
        let coordinator = fixture.coordinator(builder, Duration::from_millis(50));

        let err = coordinator
            .get_or_build(fixture.request("latin"), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FontDepotError::Shared(ref inner) if matches!(**inner, FontDepotError::BuildTimeout { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_build_keeps_the_key_locked() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::from_millis(400));
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_millis(50));
        let request = fixture.request("latin");

        assert!(coordinator.get_or_build(request.clone(), false).await.is_err());
        assert!(fixture.locks.try_acquire(request.key.as_str()).unwrap().is_none());

        let mut released = None;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            released = fixture.locks.try_acquire(request.key.as_str()).unwrap();
            if released.is_some() {
                break;
            }
        }
        assert!(released.is_some());
        assert_eq!(builder.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_caller_does_not_cancel_build() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::from_millis(300));
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));
        let request = fixture.request("latin");

        let caller = {
            let coordinator = coordinator.clone();
            let request = request.clone();
            tokio::spawn(async move { coordinator.get_or_build(request, false).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        let mut published = None;
        for _ in 0..100 {
            published = coordinator.store().get(&request.key).await.unwrap();
            if published.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let published = published.expect("build finished after its caller left");
        assert_eq!(builder.calls(), 1);

        let entry = coordinator.get_or_build(request, false).await.unwrap();
        assert_eq!(entry, published);
        assert_eq!(builder.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deleted_source_is_reported_as_changed() {
        let fixture = Fixture::new().await;
        let builder = Counting::new(Duration::ZERO);
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));
        let request = fixture.request("latin");
        std::fs::remove_file(&request.font.path).unwrap();

        let err = coordinator.get_or_build(request, false).await.unwrap_err();
        assert!(matches!(err.root(), FontDepotError::SourceChanged(_)));
        assert_eq!(builder.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waits_for_another_process_and_reuses_its_output() {
        let fixture = Fixture::new().await;
        let request = fixture.request("latin");

        // Another worker holds the key's lock while it builds
        let held = fixture.locks.try_acquire(request.key.as_str()).unwrap().unwrap();

        let builder = Counting::new(Duration::ZERO);
        let coordinator = fixture.coordinator(builder.clone(), Duration::from_secs(30));
        let waiting = {
            let coordinator = coordinator.clone();
            let request = request.clone();
            tokio::spawn(async move { coordinator.get_or_build(request, false).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let other = Counting::new(Duration::ZERO);
        let font = std::fs::read(&request.font.path).unwrap();
        let built = other
            .build(BuildInput {
                path: &request.font.path,
                family: "Example",
                subset: "latin",
                font: &font,
                ranges: &request.ranges,
            })
            .unwrap();
        let published = fixture
            .store()
            .put(&request.key, &built.woff2, request.provenance(&built))
            .await
            .unwrap();
        drop(held);

        let entry = waiting.await.unwrap().unwrap();
        assert_eq!(entry, published);
        assert_eq!(builder.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn successful_builds_are_journaled() {
        let fixture = Fixture::new().await;
        let coordinator = fixture.coordinator(Counting::new(Duration::ZERO), Duration::from_secs(30));
        coordinator.get_or_build(fixture.request("cyrillic"), false).await.unwrap();

        let journal = std::fs::read_to_string(fixture.dir.path().join("journal.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(journal.trim()).unwrap();
        assert_eq!(line["event"], "build.ok");
        assert_eq!(line["data"]["subset"], "cyrillic");
    }
}
