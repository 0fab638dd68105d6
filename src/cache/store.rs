//! On-disk subset cache
//!
//! Layout:
//!
//! | Path | Contents |
//! |------|----------|
//! | `<cache_dir>/<key>.woff2` | Built subset, served as-is |
//! | `<cache_dir>/.tmp/` | In-flight writes, renamed into place |
//! | `<meta_dir>/<key>.json` | [`CacheEntry`] provenance record |
//!
//! The font is published before its metadata, and both are published by
//! rename, so a reader that finds metadata always finds complete bytes.
//!
//! Removal takes the same per-key lock as a build and skips keys that are
//! busy. Temp files are only swept once they are older than
//! [`TEMP_FILE_GRACE`], since a live writer in another process owns them.

use crate::cache::journal::{events, BuildJournal};
use crate::cache::key::{sha256_hex, CacheKey};
use crate::cache::lock::{FileLockProvider, LockGuard};
use crate::error::{FontDepotError, FontDepotResult};
use crate::subset::BUILDER_VERSION;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TMP_DIR: &str = ".tmp";

/// Age after which a temp file is treated as left behind by a crashed write
pub const TEMP_FILE_GRACE: Duration = Duration::from_secs(15 * 60);

/// Where a cached subset came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub family: String,
    pub style: String,
    pub weight: u16,
    /// Catalog name or `custom`
    pub subset: String,
    /// CSS `unicode-range` value the subset was built for
    pub unicode_range: String,
    pub source_file: String,
    pub source_checksum: String,
    pub glyph_count: usize,
    pub codepoint_count: usize,
}

/// Metadata record for one published subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    #[serde(flatten)]
    pub provenance: Provenance,
    /// Bytes of the `.woff2` file
    pub size: u64,
    /// SHA-256 of the `.woff2` file
    pub sha256: String,
    pub builder_version: u32,
    pub built_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry was built by this builder from a source font that
    /// is still registered
    pub fn is_fresh(&self, live_checksums: &HashSet<String>) -> bool {
        self.builder_version == BUILDER_VERSION
            && live_checksums.contains(&self.provenance.source_checksum)
    }
}

/// What `gc` should remove
#[derive(Debug, Clone, Default)]
pub struct GcPolicy {
    /// Remove entries built longer ago than this
    pub older_than_days: Option<u32>,
    /// Source checksums still present in the font directory; entries for
    /// anything else are stale
    pub live_checksums: HashSet<String>,
    /// Report without deleting
    pub dry_run: bool,
}

/// Result of a `gc` pass
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub removed: Vec<CacheEntry>,
    pub freed_bytes: u64,
    /// Leftover temp files and font files without metadata
    pub orphans: usize,
    /// Entries left alone because a build held their lock
    pub busy: usize,
}

/// Subset cache rooted at a cache and a metadata directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
    meta_dir: PathBuf,
    locks: FileLockProvider,
    journal: BuildJournal,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>, meta_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            locks: FileLockProvider::for_cache_dir(&cache_dir),
            cache_dir,
            meta_dir: meta_dir.into(),
            journal: BuildJournal::disabled(),
        }
    }

    /// Record removals in `journal`
    pub fn with_journal(mut self, journal: BuildJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub fn font_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    pub fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.meta_dir.join(format!("{}.json", key))
    }

    /// Look up a published entry. Missing or unreadable metadata, or a
    /// missing font file, is a miss.
    pub async fn get(&self, key: &CacheKey) -> FontDepotResult<Option<CacheEntry>> {
        let meta_path = self.meta_path(key);
        let content = match fs::read_to_string(&meta_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FontDepotError::cache_io(
                    format!("reading {}", meta_path.display()),
                    e,
                ))
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring corrupt cache metadata {}: {}", meta_path.display(), e);
                return Ok(None);
            }
        };

        if &entry.key != key || !fs::try_exists(self.font_path(key)).await.unwrap_or(false) {
            debug!("Cache metadata for {} has no matching font file", key.short());
            return Ok(None);
        }

        Ok(Some(entry))
    }

    /// Publish `bytes` under `key`, replacing any previous entry
    pub async fn put(
        &self,
        key: &CacheKey,
        bytes: &[u8],
        provenance: Provenance,
    ) -> FontDepotResult<CacheEntry> {
        let entry = CacheEntry {
            key: key.clone(),
            provenance,
            size: bytes.len() as u64,
            sha256: sha256_hex(bytes),
            builder_version: BUILDER_VERSION,
            built_at: Utc::now(),
        };

        write_atomic(&self.font_path(key), bytes).await?;
        let meta = serde_json::to_vec_pretty(&entry)?;
        write_atomic(&self.meta_path(key), &meta).await?;

        debug!("Published {} ({} bytes)", key.file_name(), entry.size);
        Ok(entry)
    }

    /// Raw bytes of a published subset
    pub async fn read_bytes(&self, key: &CacheKey) -> FontDepotResult<Vec<u8>> {
        let path = self.font_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(FontDepotError::FingerprintNotFound(key.to_string()))
            }
            Err(e) => Err(FontDepotError::cache_io(format!("reading {}", path.display()), e)),
        }
    }

    /// Remove an entry; metadata first so it is never left pointing at
    /// nothing. Missing files are not an error.
    pub async fn forget(&self, key: &CacheKey) -> FontDepotResult<()> {
        for path in [self.meta_path(key), self.font_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(FontDepotError::cache_io(
                        format!("removing {}", path.display()),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Every readable entry, sorted by family then subset
    pub async fn list(&self) -> FontDepotResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.meta_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(FontDepotError::cache_io(
                    format!("listing {}", self.meta_dir.display()),
                    e,
                ))
            }
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| FontDepotError::cache_io("listing cache metadata", e))?
        {
            let name = item.file_name();
            let Some(key) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(CacheKey::parse)
            else {
                continue;
            };
            if let Some(entry) = self.get(&key).await? {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| {
            let family_a = a.provenance.family.to_lowercase();
            let family_b = b.provenance.family.to_lowercase();
            family_a
                .cmp(&family_b)
                .then(a.provenance.weight.cmp(&b.provenance.weight))
                .then(a.provenance.style.cmp(&b.provenance.style))
                .then(a.provenance.subset.cmp(&b.provenance.subset))
                .then(a.key.cmp(&b.key))
        });
        Ok(entries)
    }

    /// Remove stale and old entries plus leftovers from interrupted writes
    pub async fn gc(&self, policy: &GcPolicy) -> FontDepotResult<GcReport> {
        let mut report = GcReport::default();
        let cutoff = policy
            .older_than_days
            .filter(|days| *days > 0)
            .map(|days| Utc::now() - ChronoDuration::days(i64::from(days)));

        let entries = self.list().await?;
        let mut referenced: HashSet<String> = HashSet::new();

        for entry in entries {
            referenced.insert(entry.key.file_name());
            let stale = !entry.is_fresh(&policy.live_checksums);
            let old = cutoff.is_some_and(|cutoff| entry.built_at < cutoff);
            if !stale && !old {
                continue;
            }

            debug!(
                "Collecting {} ({} {}): {}",
                entry.key.short(),
                entry.provenance.family,
                entry.provenance.subset,
                if stale { "stale" } else { "old" }
            );
            if !policy.dry_run {
                let Some(_guard) = self.lock_idle(&entry.key).await? else {
                    report.busy += 1;
                    continue;
                };
                self.forget(&entry.key).await?;
                self.journal
                    .record(
                        events::CACHE_REMOVED,
                        &serde_json::json!({
                            "key": entry.key,
                            "family": entry.provenance.family,
                            "subset": entry.provenance.subset,
                            "reason": if stale { "stale" } else { "old" },
                        }),
                    )
                    .await;
            }
            report.freed_bytes += entry.size;
            report.removed.push(entry);
        }

        report.orphans = self.sweep_orphans(&referenced, policy.dry_run).await?;

        if !policy.dry_run && !report.removed.is_empty() {
            info!(
                "Removed {} cached subsets ({} bytes)",
                report.removed.len(),
                report.freed_bytes
            );
        }
        Ok(report)
    }

    /// Remove every entry that no build is working on; returns how many
    /// were removed
    pub async fn clear(&self) -> FontDepotResult<usize> {
        let entries = self.list().await?;
        let mut removed = 0;
        for entry in &entries {
            let Some(_guard) = self.lock_idle(&entry.key).await? else {
                continue;
            };
            self.forget(&entry.key).await?;
            removed += 1;
        }
        self.sweep_orphans(&HashSet::new(), false).await?;
        info!("Cleared {} cached subsets", removed);
        Ok(removed)
    }

    /// The key's build lock, or `None` while a build holds it
    async fn lock_idle(&self, key: &CacheKey) -> FontDepotResult<Option<LockGuard>> {
        let guard = self.locks.try_acquire_async(key.as_str()).await?;
        if guard.is_none() {
            debug!("Skipping {}: a build holds its lock", key.short());
        }
        Ok(guard)
    }

    /// Delete abandoned temp files and `.woff2` files that no metadata
    /// refers to
    async fn sweep_orphans(&self, kept: &HashSet<String>, dry_run: bool) -> FontDepotResult<usize> {
        let mut orphans = 0;

        for dir in [self.cache_dir.join(TMP_DIR), self.meta_dir.join(TMP_DIR)] {
            for path in files_in(&dir, |_| true).await? {
                if !older_than(&path, TEMP_FILE_GRACE).await {
                    continue;
                }
                orphans += 1;
                if !dry_run {
                    remove_quietly(&path).await;
                }
            }
        }

        let unreferenced = files_in(&self.cache_dir, |name| {
            name.ends_with(".woff2") && !kept.contains(name)
        })
        .await?;
        for path in unreferenced {
            let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(CacheKey::parse)
            else {
                continue;
            };
            let _guard = if dry_run {
                None
            } else {
                match self.lock_idle(&key).await? {
                    Some(guard) => Some(guard),
                    None => continue,
                }
            };
            // Published after the listing
            if fs::try_exists(self.meta_path(&key)).await.unwrap_or(false) {
                continue;
            }
            orphans += 1;
            if !dry_run {
                remove_quietly(&path).await;
            }
        }

        Ok(orphans)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Whether `path` was last modified at least `age` ago
async fn older_than(path: &Path, age: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|elapsed| elapsed >= age)
}

/// Files directly inside `dir` whose name passes `keep`
async fn files_in(dir: &Path, keep: impl Fn(&str) -> bool) -> FontDepotResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(FontDepotError::cache_io(format!("listing {}", dir.display()), e)),
    };
    while let Some(item) = entries
        .next_entry()
        .await
        .map_err(|e| FontDepotError::cache_io(format!("listing {}", dir.display()), e))?
    {
        let is_file = item.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && item.file_name().to_str().is_some_and(&keep) {
            out.push(item.path());
        }
    }
    Ok(out)
}

/// Write to `<parent>/.tmp/<name>.<uuid>.tmp`, fsync, rename over `dest`
async fn write_atomic(dest: &Path, bytes: &[u8]) -> FontDepotResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| FontDepotError::Internal(format!("{} has no parent", dest.display())))?;
    let tmp_dir = parent.join(TMP_DIR);
    fs::create_dir_all(&tmp_dir)
        .await
        .map_err(|e| FontDepotError::cache_io(format!("creating {}", tmp_dir.display()), e))?;

    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    let tmp = tmp_dir.join(format!("{}.{}.tmp", name, Uuid::new_v4()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, dest).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(FontDepotError::cache_io(
            format!("publishing {}", dest.display()),
            e,
        ));
    }

    // Persist the rename itself
    if let Ok(dir) = fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subset::UnicodeRanges;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::new(dir.path().join("cache"), dir.path().join("meta"))
    }

    fn key(label: &str) -> CacheKey {
        CacheKey::derive("checksum", label, &UnicodeRanges::parse("U+0041").unwrap())
    }

    fn provenance(subset: &str, checksum: &str) -> Provenance {
        Provenance {
            family: "Example".to_string(),
            style: "normal".to_string(),
            weight: 400,
            subset: subset.to_string(),
            unicode_range: "U+0041".to_string(),
            source_file: "Example-Regular.ttf".to_string(),
            source_checksum: checksum.to_string(),
            glyph_count: 2,
            codepoint_count: 1,
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key("latin");

        assert!(store.get(&key).await.unwrap().is_none());

        let entry = store
            .put(&key, b"woff2 bytes", provenance("latin", "c1"))
            .await
            .unwrap();
        assert_eq!(entry.size, 11);
        assert_eq!(entry.sha256, sha256_hex(b"woff2 bytes"));

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert_eq!(store.read_bytes(&key).await.unwrap(), b"woff2 bytes");
    }

    #[tokio::test]
    async fn put_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .put(&key("latin"), b"abc", provenance("latin", "c1"))
            .await
            .unwrap();

        let leftovers = files_in(&store.cache_dir().join(TMP_DIR), |_| true)
            .await
            .unwrap();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn metadata_without_font_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key("latin");
        store.put(&key, b"abc", provenance("latin", "c1")).await.unwrap();

        std::fs::remove_file(store.font_path(&key)).unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_metadata_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key("latin");
        store.put(&key, b"abc", provenance("latin", "c1")).await.unwrap();

        std::fs::write(store.meta_path(&key), "{ not json").unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_key_read_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).read_bytes(&key("latin")).await.unwrap_err();
        assert!(matches!(err, FontDepotError::FingerprintNotFound(_)));
    }

    #[tokio::test]
    async fn forget_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key("latin");
        store.put(&key, b"abc", provenance("latin", "c1")).await.unwrap();

        store.forget(&key).await.unwrap();
        store.forget(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gc_removes_stale_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let live = key("latin");
        let stale = key("cyrillic");
        store.put(&live, b"a", provenance("latin", "c1")).await.unwrap();
        store.put(&stale, b"bb", provenance("cyrillic", "gone")).await.unwrap();

        let policy = GcPolicy {
            live_checksums: HashSet::from(["c1".to_string()]),
            ..GcPolicy::default()
        };

        let preview = store
            .gc(&GcPolicy {
                dry_run: true,
                ..policy.clone()
            })
            .await
            .unwrap();
        assert_eq!(preview.removed.len(), 1);
        assert!(store.get(&stale).await.unwrap().is_some());

        let report = store.gc(&policy).await.unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.freed_bytes, 2);
        assert!(store.get(&stale).await.unwrap().is_none());
        assert!(store.get(&live).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put(&key("a"), b"a", provenance("a", "c1")).await.unwrap();
        store.put(&key("b"), b"b", provenance("b", "c1")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn freshness_tracks_source_checksum() {
        let entry = CacheEntry {
            key: key("latin"),
            provenance: provenance("latin", "c1"),
            size: 1,
            sha256: String::new(),
            builder_version: BUILDER_VERSION,
            built_at: Utc::now(),
        };
        assert!(entry.is_fresh(&HashSet::from(["c1".to_string()])));
        assert!(!entry.is_fresh(&HashSet::from(["c2".to_string()])));

        let older = CacheEntry {
            builder_version: BUILDER_VERSION - 1,
            ..entry
        };
        assert!(!older.is_fresh(&HashSet::from(["c1".to_string()])));
    }

    fn backdate(path: &Path) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(2 * 60 * 60))
            .unwrap();
    }

    #[tokio::test]
    async fn gc_spares_recent_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let tmp_dir = store.cache_dir().join(TMP_DIR);
        std::fs::create_dir_all(&tmp_dir).unwrap();
        let writing = tmp_dir.join("abc.woff2.1234.tmp");
        std::fs::write(&writing, b"partial").unwrap();

        let report = store.gc(&GcPolicy::default()).await.unwrap();
        assert_eq!(report.orphans, 0);
        assert!(writing.exists());

        backdate(&writing);
        let report = store.gc(&GcPolicy::default()).await.unwrap();
        assert_eq!(report.orphans, 1);
        assert!(!writing.exists());
    }

    #[tokio::test]
    async fn gc_skips_entries_a_build_holds() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key("latin");
        store.put(&key, b"abc", provenance("latin", "gone")).await.unwrap();

        let locks = FileLockProvider::for_cache_dir(store.cache_dir());
        let held = locks.try_acquire(key.as_str()).unwrap().unwrap();
        let report = store.gc(&GcPolicy::default()).await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.busy, 1);
        assert!(store.get(&key).await.unwrap().is_some());

        drop(held);
        let report = store.gc(&GcPolicy::default()).await.unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gc_leaves_font_being_published() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key("latin");
        std::fs::create_dir_all(store.cache_dir()).unwrap();
        // Font renamed into place, metadata not yet
        std::fs::write(store.font_path(&key), b"abc").unwrap();

        let locks = FileLockProvider::for_cache_dir(store.cache_dir());
        let held = locks.try_acquire(key.as_str()).unwrap().unwrap();
        let report = store.gc(&GcPolicy::default()).await.unwrap();
        assert_eq!(report.orphans, 0);
        assert!(store.font_path(&key).exists());

        drop(held);
        let report = store.gc(&GcPolicy::default()).await.unwrap();
        assert_eq!(report.orphans, 1);
        assert!(!store.font_path(&key).exists());
    }

    #[tokio::test]
    async fn clear_skips_entries_a_build_holds() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put(&key("a"), b"a", provenance("a", "c1")).await.unwrap();
        store.put(&key("b"), b"b", provenance("b", "c1")).await.unwrap();

        let locks = FileLockProvider::for_cache_dir(store.cache_dir());
        let _held = locks.try_acquire(key("a").as_str()).unwrap().unwrap();
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.get(&key("a")).await.unwrap().is_some());
    }
}
