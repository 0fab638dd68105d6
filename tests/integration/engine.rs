//! Engine-level tests: builder, cache and coordinator working together

use fontdepot::cache::{BuildJournal, CacheStore, FileLockProvider};
use fontdepot::config::Config;
use fontdepot::coordinator::{BuildCoordinator, BuildRequest, CoordinatorOptions};
use fontdepot::css::CssRequest;
use fontdepot::error::{ErrorKind, FontDepotError, FontDepotResult};
use fontdepot::registry::{FontFile, FontRegistry, FontStyle};
use fontdepot::subset::{
    woff2, BuildInput, BuiltSubset, SubsetBuild, SubsetBuilder, SubsetCatalog, SubsetSpec,
    UnicodeRanges,
};
use fontdepot::testing::{self, glyph};
use fontdepot::FontService;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use ttf_parser::{Face, GlyphId};

/// Real builder that counts invocations
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl Counting {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SubsetBuild for Counting {
    fn build(&self, input: BuildInput<'_>) -> FontDepotResult<BuiltSubset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Long enough for concurrent callers to pile up
        std::thread::sleep(Duration::from_millis(100));
        SubsetBuilder::new().build(input)
    }
}

struct Fixture {
    dir: TempDir,
    registry: FontRegistry,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fonts = dir.path().join("fonts");
        std::fs::create_dir(&fonts).unwrap();
        testing::write_example_family(&fonts).unwrap();

        let registry = FontRegistry::new(&fonts);
        registry.refresh().await.unwrap();
        Self { dir, registry }
    }

    fn regular(&self) -> FontFile {
        self.registry
            .closest_variant("Example", 400, FontStyle::Normal)
            .unwrap()
    }

    fn request(&self, subset: &str) -> BuildRequest {
        let catalog = SubsetCatalog::standard();
        let def = catalog.get(subset).unwrap();
        BuildRequest::new(self.regular(), SubsetSpec::Named(def.name), catalog).unwrap()
    }

    fn store(&self) -> CacheStore {
        CacheStore::new(self.dir.path().join("cache"), self.dir.path().join("meta"))
    }

    /// A coordinator with its own lock provider, as a second process would have
    fn coordinator(&self, builder: Arc<dyn SubsetBuild>) -> BuildCoordinator {
        BuildCoordinator::new(
            self.store(),
            Arc::new(FileLockProvider::for_cache_dir(&self.dir.path().join("cache"))),
            builder,
            BuildJournal::disabled(),
            CoordinatorOptions {
                workers: 2,
                build_timeout: Duration::from_secs(30),
                lock_timeout: Duration::from_secs(30),
            },
        )
    }
}

fn build_direct(font: &FontFile, ranges: &UnicodeRanges, subset: &str) -> FontDepotResult<BuiltSubset> {
    let bytes = std::fs::read(&font.path).unwrap();
    SubsetBuilder::new().build(BuildInput {
        path: &font.path,
        family: &font.family,
        subset,
        font: &bytes,
        ranges,
    })
}

fn has_outline(face: &Face<'_>, gid: u16) -> bool {
    face.glyph_bounding_box(GlyphId(gid)).is_some()
}

#[tokio::test]
async fn builds_are_deterministic() {
    let fixture = Fixture::new().await;
    let font = fixture.regular();
    let latin = SubsetCatalog::standard().get("latin").unwrap().unicode_ranges();

    let first = build_direct(&font, &latin, "latin").unwrap();
    let second = build_direct(&font, &latin, "latin").unwrap();
    assert_eq!(first.woff2, second.woff2);

    let request = fixture.request("latin");
    let again = BuildRequest::new(font, request.subset.clone(), SubsetCatalog::standard()).unwrap();
    assert_eq!(request.key, again.key);
}

#[tokio::test]
async fn closure_keeps_components_and_ligatures() {
    let fixture = Fixture::new().await;
    let font = fixture.regular();

    // Ä, f and i only
    let ranges = UnicodeRanges::from_codepoints([0x00C4, 0x66, 0x69]);
    let built = build_direct(&font, &ranges, "custom").unwrap();
    let sfnt = woff2::decode(&built.woff2).unwrap();
    let face = Face::parse(&sfnt, 0).unwrap();

    assert_eq!(face.number_of_glyphs(), testing::GLYPH_COUNT);
    assert_eq!(face.glyph_index('Ä'), Some(GlyphId(glyph::A_DIERESIS)));
    assert_eq!(face.glyph_index('B'), None);
    assert_eq!(face.glyph_index('А'), None);

    // Composite components
    assert!(has_outline(&face, glyph::A));
    assert!(has_outline(&face, glyph::DIERESIS));
    // Ligature reachable from f + i
    assert!(has_outline(&face, glyph::F_I));
    // Everything else is emptied
    assert!(!has_outline(&face, glyph::B));
    assert!(!has_outline(&face, glyph::CYRILLIC_A));
    assert!(!has_outline(&face, glyph::ORPHAN));
}

#[tokio::test]
async fn ligature_needs_every_component() {
    let fixture = Fixture::new().await;
    let font = fixture.regular();

    let ranges = UnicodeRanges::from_codepoints([0x66]);
    let built = build_direct(&font, &ranges, "custom").unwrap();
    let sfnt = woff2::decode(&built.woff2).unwrap();
    let face = Face::parse(&sfnt, 0).unwrap();

    assert!(has_outline(&face, glyph::F));
    assert!(!has_outline(&face, glyph::F_I));
}

#[tokio::test]
async fn empty_intersection_fails_and_publishes_nothing() {
    let fixture = Fixture::new().await;
    let coordinator = fixture.coordinator(Arc::new(SubsetBuilder::new()));

    let err = coordinator
        .get_or_build(fixture.request("greek"), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BuildFailure);
    assert!(matches!(err.root(), FontDepotError::EmptySubset { .. }));
    assert!(fixture.store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn cache_hit_returns_identical_bytes() {
    let fixture = Fixture::new().await;
    let builder = Arc::new(Counting::default());
    let coordinator = fixture.coordinator(builder.clone());

    let first = coordinator
        .get_or_build(fixture.request("latin"), false)
        .await
        .unwrap();
    let bytes = fixture.store().read_bytes(&first.key).await.unwrap();

    let second = coordinator
        .get_or_build(fixture.request("latin"), false)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(fixture.store().read_bytes(&second.key).await.unwrap(), bytes);
    assert_eq!(builder.calls(), 1);
}

#[tokio::test]
async fn forced_rebuild_replaces_entry() {
    let fixture = Fixture::new().await;
    let builder = Arc::new(Counting::default());
    let coordinator = fixture.coordinator(builder.clone());

    let first = coordinator
        .get_or_build(fixture.request("latin"), false)
        .await
        .unwrap();
    let forced = coordinator
        .get_or_build(fixture.request("latin"), true)
        .await
        .unwrap();

    assert_eq!(builder.calls(), 2);
    assert_eq!(forced.key, first.key);
    assert_eq!(forced.sha256, first.sha256);
    assert!(forced.built_at >= first.built_at);
    assert_eq!(fixture.store().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_requests_build_once() {
    let fixture = Fixture::new().await;
    let builder = Arc::new(Counting::default());
    let coordinator = fixture.coordinator(builder.clone());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = coordinator.clone();
            let request = fixture.request("latin");
            tokio::spawn(async move { coordinator.get_or_build(request, false).await })
        })
        .collect();

    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await.unwrap().unwrap().key);
    }
    keys.dedup();
    assert_eq!(keys.len(), 1);
    assert_eq!(builder.calls(), 1);
}

#[tokio::test]
async fn separate_coordinators_share_the_lock() {
    let fixture = Fixture::new().await;
    let builder = Arc::new(Counting::default());
    let first = fixture.coordinator(builder.clone());
    let second = fixture.coordinator(builder.clone());

    let (a, b) = tokio::join!(
        first.get_or_build(fixture.request("cyrillic"), false),
        second.get_or_build(fixture.request("cyrillic"), false),
    );
    assert_eq!(a.unwrap().key, b.unwrap().key);
    assert_eq!(builder.calls(), 1);
}

#[tokio::test]
async fn distinct_subsets_get_distinct_keys() {
    let fixture = Fixture::new().await;
    let coordinator = fixture.coordinator(Arc::new(SubsetBuilder::new()));

    let latin = coordinator
        .get_or_build(fixture.request("latin"), false)
        .await
        .unwrap();
    let cyrillic = coordinator
        .get_or_build(fixture.request("cyrillic"), false)
        .await
        .unwrap();
    assert_ne!(latin.key, cyrillic.key);
    assert_eq!(latin.provenance.subset, "latin");
    assert_eq!(cyrillic.provenance.source_file, "Example-Regular.ttf");
}

async fn open_service(dir: &Path) -> FontService {
    let fonts = dir.join("fonts");
    std::fs::create_dir_all(&fonts).unwrap();
    testing::write_example_family(&fonts).unwrap();

    let mut config = Config::default();
    config.paths.resolve_against(dir);
    FontService::open(config).await.unwrap()
}

#[tokio::test]
async fn example_latin_end_to_end() {
    let dir = TempDir::new().unwrap();
    let service = open_service(dir.path()).await;

    let request = CssRequest::parse(&["Example".to_string()], Some("latin"), None, None, "swap").unwrap();
    let output = service.css(&request).await.unwrap();
    assert!(output.warnings.is_empty());

    let expected_prefix = "/* latin */\n@font-face {\n  font-family: 'Example';\n  font-style: normal;\n  font-weight: 400;\n  font-display: swap;\n  src: url(http://127.0.0.1:8080/s/";
    assert!(output.css.starts_with(expected_prefix), "{}", output.css);
    assert!(output.css.ends_with("}\n"));

    let entries = service.cache_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(output.css.contains(&entry.key.file_name()));
    assert_eq!(entry.provenance.family, "Example");

    let bytes = service.subset_bytes(&entry.key.file_name()).await.unwrap();
    let sfnt = woff2::decode(&bytes).unwrap();
    let face = Face::parse(&sfnt, 0).unwrap();
    assert_eq!(face.glyph_index('A'), Some(GlyphId(glyph::A)));
    assert_eq!(face.glyph_index('А'), None);
}

#[tokio::test]
async fn css_for_italic_uses_italic_file() {
    let dir = TempDir::new().unwrap();
    let service = open_service(dir.path()).await;

    let request = CssRequest::parse(
        &["Example:ital,wght@1,400".to_string()],
        Some("latin"),
        None,
        None,
        "swap",
    )
    .unwrap();
    let output = service.css(&request).await.unwrap();
    assert!(output.css.contains("font-style: italic;"));

    let entries = service.cache_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].provenance.source_file, "Example-Italic.ttf");
}
