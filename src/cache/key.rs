//! Content-addressed cache keys
//!
//! A key names one build output. Same source font + same ranges + same
//! builder = same key, so a key can be served forever once published.

use crate::subset::{UnicodeRanges, BUILDER_VERSION, CATALOG_VERSION};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 fingerprint of a subset build
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `(checksum, label, ranges)` under the current
    /// builder and catalog versions
    pub fn derive(font_checksum: &str, label: &str, ranges: &UnicodeRanges) -> Self {
        Self::derive_versioned(BUILDER_VERSION, CATALOG_VERSION, font_checksum, label, ranges)
    }

    fn derive_versioned(
        builder_version: u32,
        catalog_version: u32,
        font_checksum: &str,
        label: &str,
        ranges: &UnicodeRanges,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"fontdepot-subset");
        hasher.update(builder_version.to_be_bytes());
        hasher.update(catalog_version.to_be_bytes());
        // Length prefixes keep field boundaries unambiguous
        for field in [font_checksum.as_bytes(), label.as_bytes()] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        hasher.update((ranges.ranges().len() as u64).to_be_bytes());
        for range in ranges.ranges() {
            hasher.update(range.start.to_be_bytes());
            hasher.update(range.end.to_be_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept a user-supplied fingerprint (optionally with `.woff2`)
    pub fn parse(value: &str) -> Option<Self> {
        let hex = value.strip_suffix(".woff2").unwrap_or(value);
        let valid = hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Served file name
    pub fn file_name(&self) -> String {
        format!("{}.woff2", self.0)
    }

    /// First 12 characters, for logs and tables
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of arbitrary bytes as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
