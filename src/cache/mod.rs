//! Persistent subset cache
//!
//! Provides content-addressed storage for built subsets, keyed by a hash of
//! everything that determines the output bytes.
//!
//! # Consistency Model
//!
//! - Cache keys derived from the source checksum, the code-point ranges and
//!   the builder/catalog versions
//! - Entries are immutable once published; a forced rebuild replaces them
//!   atomically
//! - A changed source font yields a different key; old entries become stale
//!   and are collected by `cache gc`
//! - Builds of one key are serialized across processes by a lock file
//!
//! # Entry States
//!
//! | State | Files | Description |
//! |-------|-------|-------------|
//! | Miss | none | Never built, or metadata missing |
//! | Building | `.locks/<key>.lock` held | A worker is producing it |
//! | Published | `<key>.woff2` + `<key>.json` | Served as-is |

pub mod journal;
pub mod key;
pub mod lock;
pub mod store;

pub use journal::BuildJournal;
pub use key::CacheKey;
pub use lock::{FileLockProvider, LockGuard, NamedLock};
pub use store::{CacheEntry, CacheStore, GcPolicy, GcReport, Provenance};

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
