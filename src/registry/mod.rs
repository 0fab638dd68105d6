//! Font registry
//!
//! Knows which font files exist in the font directory, what family, weight
//! and style each one is, and which characters it covers. Rescanning is
//! cheap for unchanged files: they are recognised by size and mtime and
//! are not rehashed.

pub mod names;

pub use names::{FaceInfo, FontStyle};

use crate::cache::key::sha256_hex;
use crate::error::{FontDepotError, FontDepotResult};
use crate::subset::UnicodeRanges;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

/// One registered font file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FontFile {
    pub path: PathBuf,
    /// File name relative to the font directory
    pub filename: String,
    pub family: String,
    pub style: FontStyle,
    pub weight: u16,
    /// SHA-256 of the file contents
    pub checksum: String,
    pub size: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
    /// Characters the font maps
    #[serde(skip)]
    pub coverage: UnicodeRanges,
}

impl FontFile {
    /// Whether the font maps anything in `ranges`
    pub fn covers_any(&self, ranges: &UnicodeRanges) -> bool {
        !self.coverage.intersect(ranges).is_empty()
    }
}

/// A file the scan could not register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// New or changed files
    pub added: usize,
    /// Files reused without rehashing
    pub unchanged: usize,
    pub removed: usize,
    pub skipped: Vec<SkippedFile>,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.added + self.unchanged
    }
}

/// Registry of the fonts under one directory
#[derive(Debug)]
pub struct FontRegistry {
    font_dir: PathBuf,
    fonts: RwLock<BTreeMap<PathBuf, FontFile>>,
}

impl FontRegistry {
    /// An empty registry; call [`refresh`](Self::refresh) to populate it
    pub fn new(font_dir: impl Into<PathBuf>) -> Self {
        Self {
            font_dir: font_dir.into(),
            fonts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn font_dir(&self) -> &Path {
        &self.font_dir
    }

    /// Rescan the configured font directory
    pub async fn refresh(&self) -> FontDepotResult<ScanReport> {
        let dir = self.font_dir.clone();
        self.scan(&dir).await
    }

    /// Replace the registry contents with the fonts found under `dir`.
    /// Unreadable or unparsable files are skipped and reported.
    pub async fn scan(&self, dir: &Path) -> FontDepotResult<ScanReport> {
        let mut report = ScanReport::default();
        let previous = self.read().clone();
        let mut next = BTreeMap::new();

        for path in walk(dir).await? {
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    skip(&mut report, &path, e.to_string());
                    continue;
                }
            };
            let modified = metadata.modified().ok();

            if let Some(known) = previous.get(&path) {
                if known.size == metadata.len() && known.modified == modified && modified.is_some()
                {
                    next.insert(path, known.clone());
                    report.unchanged += 1;
                    continue;
                }
            }

            match load_font(dir, &path, metadata.len(), modified).await {
                Ok(font) => {
                    debug!(
                        "Registered {} as {} {} {}",
                        font.filename, font.family, font.weight, font.style
                    );
                    next.insert(path, font);
                    report.added += 1;
                }
                Err(reason) => skip(&mut report, &path, reason),
            }
        }

        report.removed = previous.keys().filter(|p| !next.contains_key(*p)).count();
        *self.write() = next;

        info!(
            "Font scan of {}: {} fonts ({} new, {} removed, {} skipped)",
            dir.display(),
            report.total(),
            report.added,
            report.removed,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Every variant of `family` (case-insensitive), sorted by weight, style
    /// and file name
    pub fn variants(&self, family: &str) -> FontDepotResult<Vec<FontFile>> {
        let wanted = family.trim().to_lowercase();
        let mut variants: Vec<FontFile> = self
            .read()
            .values()
            .filter(|font| font.family.to_lowercase() == wanted)
            .cloned()
            .collect();

        if variants.is_empty() {
            return Err(FontDepotError::FamilyNotFound(family.to_string()));
        }
        variants.sort_by(|a, b| {
            (a.weight, a.style, &a.filename).cmp(&(b.weight, b.style, &b.filename))
        });
        Ok(variants)
    }

    /// Variant of `family` closest to `weight`, preferring `style`
    pub fn closest_variant(
        &self,
        family: &str,
        weight: u16,
        style: FontStyle,
    ) -> FontDepotResult<FontFile> {
        let variants = self.variants(family)?;
        let same_style: Vec<&FontFile> = variants.iter().filter(|f| f.style == style).collect();
        let pool: Vec<&FontFile> = if same_style.is_empty() {
            variants.iter().collect()
        } else {
            same_style
        };

        pool.into_iter()
            .min_by_key(|font| (font.weight.abs_diff(weight), font.weight))
            .cloned()
            .ok_or_else(|| FontDepotError::FamilyNotFound(family.to_string()))
    }

    pub fn get(&self, path: &Path) -> Option<FontFile> {
        self.read().get(path).cloned()
    }

    /// All fonts sorted by family (case-insensitive), weight, style
    pub fn list(&self) -> Vec<FontFile> {
        let mut fonts: Vec<FontFile> = self.read().values().cloned().collect();
        fonts.sort_by(|a, b| {
            a.family
                .to_lowercase()
                .cmp(&b.family.to_lowercase())
                .then(a.weight.cmp(&b.weight))
                .then(a.style.cmp(&b.style))
                .then(a.filename.cmp(&b.filename))
        });
        fonts
    }

    /// Distinct family names in listing order
    pub fn families(&self) -> Vec<String> {
        let mut families: Vec<String> = Vec::new();
        for font in self.list() {
            if !families.iter().any(|f| f.eq_ignore_ascii_case(&font.family)) {
                families.push(font.family);
            }
        }
        families
    }

    /// Checksums of every registered font
    pub fn live_checksums(&self) -> HashSet<String> {
        self.read().values().map(|f| f.checksum.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PathBuf, FontFile>> {
        self.fonts.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PathBuf, FontFile>> {
        self.fonts.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn skip(report: &mut ScanReport, path: &Path, reason: String) {
    warn!("Skipping {}: {}", path.display(), reason);
    report.skipped.push(SkippedFile {
        path: path.to_path_buf(),
        reason,
    });
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            FONT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Font files under `dir`, recursively, in path order. A missing directory
/// yields nothing.
async fn walk(dir: &Path) -> FontDepotResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && current == dir => {
                warn!("Font directory {} does not exist", dir.display());
                return Ok(found);
            }
            Err(e) => {
                warn!("Cannot read {}: {}", current.display(), e);
                continue;
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FontDepotError::io(format!("listing {}", current.display()), e))?
        {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if is_font_file(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Read, hash and parse one file. Errors are reasons for skipping.
async fn load_font(
    root: &Path,
    path: &Path,
    size: u64,
    modified: Option<SystemTime>,
) -> Result<FontFile, String> {
    let bytes = fs::read(path).await.map_err(|e| e.to_string())?;
    let checksum = sha256_hex(&bytes);

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let filename = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let info = tokio::task::spawn_blocking(move || {
        ttf_parser::Face::parse(&bytes, 0)
            .map(|face| FaceInfo::read(&face, &stem))
            .map_err(|e| format!("not a usable font: {}", e))
    })
    .await
    .map_err(|e| format!("parser task failed: {}", e))??;

    Ok(FontFile {
        path: path.to_path_buf(),
        filename,
        family: info.family,
        style: info.style,
        weight: info.weight,
        checksum,
        size,
        modified,
        coverage: info.coverage,
    })
}
