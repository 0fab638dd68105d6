//! Service facade
//!
//! Wires the registry, the cache and the build coordinator together and
//! answers the three public operations: CSS for a set of families, the raw
//! bytes of a cached subset, and the font listing. Also drives warm-up and
//! cache collection for the CLI.

use crate::cache::{BuildJournal, CacheEntry, CacheKey, CacheStore, FileLockProvider, GcPolicy, GcReport};
use crate::config::schema::Config;
use crate::config::ConfigManager;
use crate::coordinator::{BuildCoordinator, BuildRequest, CoordinatorOptions};
use crate::css::{CssOutput, CssRenderer, CssRequest, FaceRule, FamilyRequest, VariantRequest, WeightSpec};
use crate::error::{FontDepotError, FontDepotResult};
use crate::registry::{FontFile, FontRegistry, FontStyle, ScanReport};
use crate::subset::{SubsetBuild, SubsetBuilder, SubsetCatalog, SubsetSpec};
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One row of the font listing
#[derive(Debug, Clone, Serialize)]
pub struct FontRecord {
    pub name: String,
    pub filename: String,
    pub size: u64,
    pub size_mb: f64,
    /// CSS URL for exactly this variant
    pub url: String,
    pub weight: u16,
    pub style: FontStyle,
}

/// Listing response body
#[derive(Debug, Clone, Serialize)]
pub struct FontListing {
    pub status: &'static str,
    pub count: usize,
    pub fonts: Vec<FontRecord>,
}

/// Everything a warm-up would build
#[derive(Debug, Clone, Default)]
pub struct WarmPlan {
    pub requests: Vec<BuildRequest>,
    /// Font and subset pairs left out because the font has no glyphs there
    pub skipped: usize,
}

impl WarmPlan {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// What happened to one warm-up item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmOutcome {
    Built,
    Cached,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub built: usize,
    pub cached: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// A face rule waiting for its subset to exist
struct PlannedFace {
    request: BuildRequest,
    style: FontStyle,
    weight: u16,
}

/// Font service handle
pub struct FontService {
    config: Config,
    registry: Arc<FontRegistry>,
    coordinator: BuildCoordinator,
    renderer: CssRenderer,
}

impl FontService {
    /// Create data directories, scan the font directory and get ready to
    /// build with the WOFF2 subset builder
    pub async fn open(config: Config) -> FontDepotResult<Self> {
        Self::with_builder(config, Arc::new(SubsetBuilder::new())).await
    }

    /// Same as [`FontService::open`] with a custom builder
    pub async fn with_builder(
        config: Config,
        builder: Arc<dyn SubsetBuild>,
    ) -> FontDepotResult<Self> {
        ConfigManager::ensure_data_dirs(&config).await?;

        let journal = BuildJournal::new(&config);
        let store = CacheStore::new(&config.paths.cache_dir, &config.paths.meta_dir)
            .with_journal(journal.clone());
        let locks = Arc::new(FileLockProvider::for_cache_dir(&config.paths.cache_dir));
        let coordinator = BuildCoordinator::new(
            store,
            locks,
            builder,
            journal,
            CoordinatorOptions::from(&config.cache),
        );
        let renderer = CssRenderer::new(&config.server.base_url, &config.server.subset_path);

        let service = Self {
            registry: Arc::new(FontRegistry::new(&config.paths.font_dir)),
            config,
            coordinator,
            renderer,
        };
        service.refresh().await?;
        Ok(service)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CacheStore {
        self.coordinator.store()
    }

    /// Rescan the font directory. A missing directory empties the registry.
    pub async fn refresh(&self) -> FontDepotResult<ScanReport> {
        self.registry.refresh().await
    }

    /// Render `@font-face` CSS, building any missing subsets.
    ///
    /// Unknown families, subsets the font has no glyphs for and fonts that
    /// disappeared from disk are left out and reported as warnings. Other
    /// build and cache failures are errors.
    pub async fn css(&self, request: &CssRequest) -> FontDepotResult<CssOutput> {
        let mut warnings = Vec::new();
        let mut planned = Vec::new();

        for family in &request.families {
            match self.plan_family(family, request.subsets.as_deref(), &mut warnings) {
                Ok(faces) => planned.extend(faces),
                Err(FontDepotError::FamilyNotFound(name)) => {
                    warn!("Unknown family requested: {}", name);
                    warnings.push(format!("Unknown family: {}", name));
                }
                Err(e) => return Err(e),
            }
        }

        let entries = join_all(
            planned
                .iter()
                .map(|face| self.build(face.request.clone(), false)),
        )
        .await;

        let mut rules = Vec::with_capacity(planned.len());
        for (face, entry) in planned.iter().zip(entries) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if matches!(e.root(), FontDepotError::SourceChanged(_)) => {
                    warn!("Leaving out {}: {}", face.request.font.filename, e);
                    warnings.push(format!(
                        "{} {} {}: font file is no longer available",
                        face.request.font.family,
                        face.weight,
                        face.request.subset.label()
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };
            rules.push(FaceRule {
                label: face.request.subset.label().to_string(),
                family: face.request.font.family.clone(),
                style: face.style,
                weight: face.weight,
                display: request.display.clone(),
                url: self.renderer.url_for(&entry.key),
                unicode_range: face.request.ranges.to_string(),
            });
        }

        Ok(self.renderer.render(&rules, warnings))
    }

    /// Bytes of a cached subset by file name or fingerprint
    pub async fn subset_bytes(&self, name: &str) -> FontDepotResult<Vec<u8>> {
        let not_found = || FontDepotError::FingerprintNotFound(name.to_string());
        let key = CacheKey::parse(name).ok_or_else(not_found)?;
        let entry = self.store().get(&key).await?.ok_or_else(not_found)?;

        if !entry.is_fresh(&self.registry.live_checksums()) {
            warn!(
                "Serving stale subset {} ({} {}): source font or builder has changed",
                key.short(),
                entry.provenance.family,
                entry.provenance.subset
            );
        }
        self.store().read_bytes(&key).await
    }

    /// Registered fonts, sorted by family name
    pub fn list_fonts(&self) -> FontListing {
        let base_url = self.config.server.base_url.trim_end_matches('/');
        let fonts: Vec<FontRecord> = self
            .registry
            .list()
            .into_iter()
            .map(|font| {
                let variant = match font.style {
                    FontStyle::Normal => font.weight.to_string(),
                    FontStyle::Italic => format!("{}italic", font.weight),
                };
                FontRecord {
                    url: format!(
                        "{}/css?family={}:{}",
                        base_url,
                        font.family.replace(' ', "+"),
                        variant
                    ),
                    name: font.family,
                    filename: font.filename,
                    size: font.size,
                    size_mb: (font.size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                    weight: font.weight,
                    style: font.style,
                }
            })
            .collect();

        FontListing {
            status: "success",
            count: fonts.len(),
            fonts,
        }
    }

    /// Every catalog subset of every registered font it has glyphs for
    pub fn warm_plan(&self) -> FontDepotResult<WarmPlan> {
        let catalog = SubsetCatalog::standard();
        let mut plan = WarmPlan::default();

        for font in self.registry.list() {
            for def in catalog.iter() {
                if !font.covers_any(&def.unicode_ranges()) {
                    plan.skipped += 1;
                    continue;
                }
                plan.requests.push(BuildRequest::new(
                    font.clone(),
                    SubsetSpec::Named(def.name),
                    catalog,
                )?);
            }
        }
        Ok(plan)
    }

    /// Build everything in `plan`. Failures are counted, not returned.
    pub async fn warm<F>(&self, plan: WarmPlan, force: bool, mut on_item: F) -> WarmReport
    where
        F: FnMut(&BuildRequest, &WarmOutcome),
    {
        let mut report = WarmReport {
            skipped: plan.skipped,
            ..Default::default()
        };

        let mut pending: FuturesUnordered<_> = plan
            .requests
            .into_iter()
            .map(|request| async move {
                let outcome = self.warm_one(&request, force).await;
                (request, outcome)
            })
            .collect();

        while let Some((request, outcome)) = pending.next().await {
            match &outcome {
                WarmOutcome::Built => report.built += 1,
                WarmOutcome::Cached => report.cached += 1,
                WarmOutcome::Failed(reason) => {
                    warn!(
                        "Failed to build {} {} for {}: {}",
                        request.font.family,
                        request.subset.label(),
                        request.font.filename,
                        reason
                    );
                    report.failed += 1;
                }
            }
            on_item(&request, &outcome);
        }

        info!(
            "Warm-up: {} built, {} cached, {} failed",
            report.built, report.cached, report.failed
        );
        report
    }

    /// Remove stale entries and, with `days`, entries older than that.
    /// Without `days` the configured `cache.gc_days` applies.
    pub async fn gc(&self, days: Option<u32>, dry_run: bool) -> FontDepotResult<GcReport> {
        let policy = GcPolicy {
            older_than_days: days.or(Some(self.config.cache.gc_days)),
            live_checksums: self.registry.live_checksums(),
            dry_run,
        };
        self.store().gc(&policy).await
    }

    pub async fn cache_entries(&self) -> FontDepotResult<Vec<CacheEntry>> {
        self.store().list().await
    }

    async fn warm_one(&self, request: &BuildRequest, force: bool) -> WarmOutcome {
        if !force {
            match self.store().get(&request.key).await {
                Ok(Some(_)) => return WarmOutcome::Cached,
                Ok(None) => {}
                Err(e) => return WarmOutcome::Failed(e.to_string()),
            }
        }
        match self.build(request.clone(), force).await {
            Ok(_) => WarmOutcome::Built,
            Err(e) => WarmOutcome::Failed(e.to_string()),
        }
    }

    /// Build through the coordinator. When the source changed under us,
    /// rescan and try once more with the new identity.
    async fn build(&self, request: BuildRequest, force: bool) -> FontDepotResult<CacheEntry> {
        let err = match self.coordinator.get_or_build(request.clone(), force).await {
            Ok(entry) => return Ok(entry),
            Err(e) => e,
        };
        if !matches!(err.root(), FontDepotError::SourceChanged(_)) {
            return Err(err);
        }

        warn!("{} changed on disk, rescanning", request.font.filename);
        self.refresh().await?;
        let Some(font) = self.registry.get(&request.font.path) else {
            return Err(err);
        };
        let retry = BuildRequest::new(font, request.subset, SubsetCatalog::standard())?;
        self.coordinator.get_or_build(retry, force).await
    }

    fn plan_family(
        &self,
        family: &FamilyRequest,
        subsets: Option<&[SubsetSpec]>,
        warnings: &mut Vec<String>,
    ) -> FontDepotResult<Vec<PlannedFace>> {
        let available = self.registry.variants(&family.name)?;
        let mut planned = Vec::new();

        for variant in &family.variants {
            let faces = self.resolve_variant(&family.name, variant, &available)?;
            if faces.is_empty() {
                warnings.push(format!(
                    "{}: no variant matches {}",
                    family.name,
                    describe(variant)
                ));
                continue;
            }
            for (font, weight) in faces {
                for spec in subsets_for(&font, subsets, warnings)? {
                    let request = BuildRequest::new(font.clone(), spec, SubsetCatalog::standard())?;
                    debug!(
                        "Planned {} {} {} ({})",
                        font.family,
                        weight,
                        variant.style,
                        request.subset.label()
                    );
                    planned.push(PlannedFace {
                        request,
                        style: variant.style,
                        weight,
                    });
                }
            }
        }
        Ok(planned)
    }

    /// Fonts serving `variant` and the weight each is declared with
    fn resolve_variant(
        &self,
        family: &str,
        variant: &VariantRequest,
        available: &[FontFile],
    ) -> FontDepotResult<Vec<(FontFile, u16)>> {
        match variant.weight {
            WeightSpec::Exact(weight) => {
                let font = self.registry.closest_variant(family, weight, variant.style)?;
                Ok(vec![(font, weight)])
            }
            WeightSpec::Range(..) => Ok(available
                .iter()
                .filter(|f| f.style == variant.style && variant.weight.contains(f.weight))
                .map(|f| (f.clone(), f.weight))
                .collect()),
        }
    }
}

/// Requested subsets the font has glyphs for; all covered catalog subsets
/// when none were requested
fn subsets_for(
    font: &FontFile,
    requested: Option<&[SubsetSpec]>,
    warnings: &mut Vec<String>,
) -> FontDepotResult<Vec<SubsetSpec>> {
    let catalog = SubsetCatalog::standard();
    let Some(requested) = requested else {
        return Ok(catalog
            .iter()
            .filter(|def| font.covers_any(&def.unicode_ranges()))
            .map(|def| SubsetSpec::Named(def.name))
            .collect());
    };

    let mut specs = Vec::new();
    for spec in requested {
        if font.covers_any(&spec.ranges(catalog)?) {
            specs.push(spec.clone());
        } else {
            warnings.push(format!(
                "{} has no glyphs in {}",
                font.filename,
                spec.label()
            ));
        }
    }
    Ok(specs)
}

fn describe(variant: &VariantRequest) -> String {
    match variant.weight {
        WeightSpec::Exact(w) => format!("{} {}", w, variant.style),
        WeightSpec::Range(lo, hi) => format!("{}..{} {}", lo, hi, variant.style),
    }
}
