//! Subset builder
//!
//! Trims a source font to the glyph closure of a code-point set and encodes
//! the result as WOFF2. Glyph ids are retained, so layout tables stay valid
//! without being rewritten. TrueType outlines are cut out of `glyf`; CFF
//! outlines are replaced by empty charstrings.

use crate::error::{FontDepotError, FontDepotResult};
use crate::subset::catalog::UnicodeRanges;
use crate::subset::cff::CffOutlines;
use crate::subset::closure::{self, GlyfOutlines, GlyphClosure};
use crate::subset::sfnt::{
    be_u16, padded_len, put_u16, put_u32, search_params, write_sfnt, SfntReader, Tag,
};
use crate::subset::woff2;
use std::collections::BTreeMap;
use std::path::Path;

/// Bumped whenever the output of the same input could change; part of every
/// cache key.
pub const BUILDER_VERSION: u32 = 2;

/// Tables that describe the full glyph set and would be wrong after trimming
const DROPPED_TABLES: &[&Tag] = &[b"DSIG", b"FFTM", b"hdmx", b"LTSH", b"VDMX"];

/// Largest segment count that still fits a format 4 subtable
const MAX_FORMAT4_SEGMENTS: usize = (u16::MAX as usize - 16) / 8;

/// Everything a build needs to know about its input
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    /// Source file, for error messages
    pub path: &'a Path,
    pub family: &'a str,
    /// Subset label (`latin`, `custom`, ...)
    pub subset: &'a str,
    pub font: &'a [u8],
    pub ranges: &'a UnicodeRanges,
}

/// A finished subset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltSubset {
    pub woff2: Vec<u8>,
    /// Glyphs kept with an outline (including `.notdef`)
    pub glyph_count: usize,
    /// Characters mapped by the new cmap
    pub codepoint_count: usize,
}

/// Seam between the coordinator and the subsetting engine
pub trait SubsetBuild: Send + Sync {
    fn build(&self, input: BuildInput<'_>) -> FontDepotResult<BuiltSubset>;
}

/// The real, deterministic subsetter
#[derive(Debug, Clone, Copy, Default)]
pub struct SubsetBuilder;

impl SubsetBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Trim to an uncompressed sfnt. Exposed for verification and tests.
    pub fn subset_sfnt(
        &self,
        input: BuildInput<'_>,
    ) -> FontDepotResult<(Vec<u8>, GlyphClosure)> {
        let face = ttf_parser::Face::parse(input.font, 0).map_err(|e| FontDepotError::FontParse {
            path: input.path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let sfnt = SfntReader::parse(input.font)?;

        let closure = closure::compute(&face, &sfnt, input.ranges)?;
        if closure.mapping.is_empty() {
            return Err(FontDepotError::EmptySubset {
                family: input.family.to_string(),
                subset: input.subset.to_string(),
            });
        }

        let outlines = GlyfOutlines::load(&sfnt)?;
        let mut tables: Vec<(Tag, Vec<u8>)> = Vec::new();
        let mut long_loca = None;

        if let Some(outlines) = &outlines {
            let (glyf, loca, long) = trim_glyf(outlines, &closure);
            tables.push((*b"glyf", glyf));
            tables.push((*b"loca", loca));
            long_loca = Some(long);
        }
        let cff = CffOutlines::load(&sfnt)?;
        if let Some(cff) = &cff {
            tables.push((cff.tag(), cff.trim(&closure.glyphs)?));
        }

        for (tag, data) in sfnt.tables() {
            if DROPPED_TABLES.contains(&&tag) {
                continue;
            }
            match &tag {
                b"glyf" | b"loca" if long_loca.is_some() => {}
                b"CFF " | b"CFF2" if cff.is_some() => {}
                b"cmap" => tables.push((tag, build_cmap(&closure.mapping))),
                b"post" => {
                    if let Some(post) = trim_post(data) {
                        tables.push((tag, post));
                    }
                }
                b"hmtx" => {
                    let hhea = sfnt.require(b"hhea")?;
                    tables.push((tag, trim_hmtx(data, hhea, &closure)?));
                }
                b"head" => {
                    let mut head = data.to_vec();
                    if let Some(long) = long_loca {
                        if head.len() < 54 {
                            return Err(FontDepotError::malformed("head", "truncated"));
                        }
                        put_u16(&mut head, 50, u16::from(long));
                    }
                    tables.push((tag, head));
                }
                _ => tables.push((tag, data.to_vec())),
            }
        }

        Ok((write_sfnt(sfnt.flavor(), tables), closure))
    }
}

impl SubsetBuild for SubsetBuilder {
    fn build(&self, input: BuildInput<'_>) -> FontDepotResult<BuiltSubset> {
        let (sfnt, closure) = self.subset_sfnt(input)?;
        let woff2 = woff2::encode(&sfnt)?;
        Ok(BuiltSubset {
            woff2,
            glyph_count: closure.glyphs.len(),
            codepoint_count: closure.mapping.len(),
        })
    }
}

/// Rebuild `glyf` + `loca` keeping only closure glyphs; returns
/// `(glyf, loca, long_format)`.
fn trim_glyf(outlines: &GlyfOutlines<'_>, closure: &GlyphClosure) -> (Vec<u8>, Vec<u8>, bool) {
    let mut glyf = Vec::new();
    let mut offsets = Vec::with_capacity(outlines.num_glyphs() + 1);

    for gid in 0..outlines.num_glyphs() {
        offsets.push(glyf.len() as u32);
        if closure.glyphs.contains(&(gid as u16)) {
            glyf.extend_from_slice(outlines.glyph(gid as u16));
            glyf.resize(padded_len(glyf.len()), 0);
        }
    }
    offsets.push(glyf.len() as u32);

    let long = glyf.len() > 0x1FFFE;
    let mut loca = Vec::with_capacity(offsets.len() * if long { 4 } else { 2 });
    for offset in offsets {
        if long {
            loca.extend_from_slice(&offset.to_be_bytes());
        } else {
            loca.extend_from_slice(&((offset / 2) as u16).to_be_bytes());
        }
    }

    (glyf, loca, long)
}

/// Zero metrics of dropped glyphs. The last long metric keeps its advance
/// because every glyph after it inherits that advance.
fn trim_hmtx(hmtx: &[u8], hhea: &[u8], closure: &GlyphClosure) -> FontDepotResult<Vec<u8>> {
    let long_metrics =
        be_u16(hhea, 34).ok_or_else(|| FontDepotError::malformed("hhea", "truncated"))? as usize;
    let mut out = hmtx.to_vec();

    let lsb_count = out.len().saturating_sub(long_metrics * 4) / 2;
    if long_metrics * 4 > out.len() {
        return Err(FontDepotError::malformed("hmtx", "fewer metrics than hhea declares"));
    }

    for gid in 0..long_metrics {
        if closure.glyphs.contains(&(gid as u16)) {
            continue;
        }
        let at = gid * 4;
        if gid + 1 != long_metrics {
            put_u16(&mut out, at, 0);
        }
        put_u16(&mut out, at + 2, 0);
    }
    for i in 0..lsb_count {
        let gid = long_metrics + i;
        if !closure.glyphs.contains(&(gid as u16)) {
            put_u16(&mut out, long_metrics * 4 + i * 2, 0);
        }
    }

    Ok(out)
}

/// Version 3 `post`: same header, no glyph names
fn trim_post(post: &[u8]) -> Option<Vec<u8>> {
    let mut out = post.get(..32)?.to_vec();
    put_u32(&mut out, 0, 0x0003_0000);
    Some(out)
}

/// Runs of consecutive code points mapped to consecutive glyphs:
/// `(first_cp, last_cp, first_gid)`
fn mapping_runs(mapping: &BTreeMap<u32, u16>) -> Vec<(u32, u32, u16)> {
    let mut runs: Vec<(u32, u32, u16)> = Vec::new();
    for (&cp, &gid) in mapping {
        if let Some(last) = runs.last_mut() {
            let next = last.1 + 1;
            if cp == next && u32::from(gid) == u32::from(last.2) + (cp - last.0) {
                last.1 = cp;
                continue;
            }
        }
        runs.push((cp, cp, gid));
    }
    runs
}

/// New `cmap` with a format 4 subtable for the BMP and a format 12
/// subtable when anything lies outside it (or format 4 would overflow).
pub(crate) fn build_cmap(mapping: &BTreeMap<u32, u16>) -> Vec<u8> {
    let bmp: BTreeMap<u32, u16> = mapping
        .iter()
        .filter(|(&cp, _)| cp < 0xFFFF)
        .map(|(&cp, &gid)| (cp, gid))
        .collect();
    let bmp_runs = mapping_runs(&bmp);

    let fits_format4 = bmp_runs.len() < MAX_FORMAT4_SEGMENTS;
    let needs_format12 = !fits_format4 || bmp.len() != mapping.len();

    // (platform, encoding, subtable index)
    let mut subtables: Vec<Vec<u8>> = Vec::new();
    let mut records: Vec<(u16, u16, usize)> = Vec::new();

    if fits_format4 {
        subtables.push(format4(&bmp_runs));
        records.push((0, 3, 0));
        records.push((3, 1, 0));
    }
    if needs_format12 {
        let index = subtables.len();
        subtables.push(format12(&mapping_runs(mapping)));
        records.push((0, 4, index));
        records.push((3, 10, index));
    }
    records.sort();

    let header_len = 4 + records.len() * 8;
    let mut subtable_offsets = Vec::with_capacity(subtables.len());
    let mut offset = header_len;
    for subtable in &subtables {
        subtable_offsets.push(offset as u32);
        offset += subtable.len();
    }

    let mut out = Vec::with_capacity(offset);
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());
    for (platform, encoding, index) in &records {
        out.extend_from_slice(&platform.to_be_bytes());
        out.extend_from_slice(&encoding.to_be_bytes());
        out.extend_from_slice(&subtable_offsets[*index].to_be_bytes());
    }
    for subtable in subtables {
        out.extend_from_slice(&subtable);
    }
    out
}

fn format4(runs: &[(u32, u32, u16)]) -> Vec<u8> {
    let mut segments: Vec<(u16, u16, u16)> = runs
        .iter()
        .map(|&(start, end, gid)| {
            let delta = (gid as u16).wrapping_sub(start as u16);
            (start as u16, end as u16, delta)
        })
        .collect();
    segments.push((0xFFFF, 0xFFFF, 1));

    let seg_count = segments.len() as u16;
    let (search_range, entry_selector, range_shift) = search_params(seg_count, 2);
    let length = 16 + segments.len() * 8;

    let mut out = Vec::with_capacity(length);
    for value in [
        4,
        length as u16,
        0,
        seg_count * 2,
        search_range,
        entry_selector,
        range_shift,
    ] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    for (_, end, _) in &segments {
        out.extend_from_slice(&end.to_be_bytes());
    }
    out.extend_from_slice(&0u16.to_be_bytes());
    for (start, _, _) in &segments {
        out.extend_from_slice(&start.to_be_bytes());
    }
    for (_, _, delta) in &segments {
        out.extend_from_slice(&delta.to_be_bytes());
    }
    for _ in &segments {
        out.extend_from_slice(&0u16.to_be_bytes());
    }
    out
}

fn format12(runs: &[(u32, u32, u16)]) -> Vec<u8> {
    let length = 16 + runs.len() * 12;
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&12u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(length as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(runs.len() as u32).to_be_bytes());
    for &(start, end, gid) in runs {
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
        out.extend_from_slice(&u32::from(gid).to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, glyph};

    fn input<'a>(font: &'a [u8], ranges: &'a UnicodeRanges) -> BuildInput<'a> {
        BuildInput {
            path: Path::new("Example-Regular.ttf"),
            family: "Example",
            subset: "test",
            font,
            ranges,
        }
    }

    #[test]
    fn subset_keeps_only_requested_characters() {
        let font = testing::example_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+0041-0042").unwrap();
        let (sfnt, _) = SubsetBuilder::new().subset_sfnt(input(&font, &ranges)).unwrap();

        let face = ttf_parser::Face::parse(&sfnt, 0).unwrap();
        assert_eq!(face.glyph_index('A').map(|g| g.0), Some(glyph::A));
        assert!(face.glyph_index('C').is_none());
        assert!(face.glyph_index('\u{410}').is_none());
        // Glyph ids are retained
        assert_eq!(face.number_of_glyphs(), testing::GLYPH_COUNT);
    }

    #[test]
    fn dropped_glyphs_have_no_outline() {
        let font = testing::example_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+0041").unwrap();
        let (sfnt, _) = SubsetBuilder::new().subset_sfnt(input(&font, &ranges)).unwrap();

        let reader = SfntReader::parse(&sfnt).unwrap();
        let outlines = GlyfOutlines::load(&reader).unwrap().unwrap();
        assert!(!outlines.glyph(glyph::A).is_empty());
        assert!(outlines.glyph(glyph::B).is_empty());
        assert!(!outlines.glyph(0).is_empty());
    }

    #[test]
    fn composite_subset_renders_components() {
        let font = testing::example_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+00C4").unwrap();
        let (sfnt, _) = SubsetBuilder::new().subset_sfnt(input(&font, &ranges)).unwrap();

        let reader = SfntReader::parse(&sfnt).unwrap();
        let outlines = GlyfOutlines::load(&reader).unwrap().unwrap();
        assert!(!outlines.glyph(glyph::A).is_empty());
        assert!(!outlines.glyph(glyph::DIERESIS).is_empty());
    }

    #[test]
    fn cff_outlines_are_trimmed() {
        let font = testing::example_cff_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+0041").unwrap();
        let (sfnt, _) = SubsetBuilder::new().subset_sfnt(input(&font, &ranges)).unwrap();

        let source = SfntReader::parse(&font).unwrap();
        let reader = SfntReader::parse(&sfnt).unwrap();
        assert_eq!(reader.flavor(), crate::subset::sfnt::CFF_FLAVOR);
        assert!(reader.table(b"CFF ").unwrap().len() < source.table(b"CFF ").unwrap().len());

        let face = ttf_parser::Face::parse(&sfnt, 0).unwrap();
        assert_eq!(face.number_of_glyphs(), testing::GLYPH_COUNT);
        assert!(face.glyph_bounding_box(ttf_parser::GlyphId(glyph::A)).is_some());
        assert!(face.glyph_bounding_box(ttf_parser::GlyphId(glyph::B)).is_none());
        assert!(face.glyph_bounding_box(ttf_parser::GlyphId(glyph::CYRILLIC_A)).is_none());
    }

    #[test]
    fn cff_accent_keeps_base_and_mark() {
        let font = testing::example_cff_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+00C4").unwrap();
        let built = SubsetBuilder::new().build(input(&font, &ranges)).unwrap();
        let sfnt = woff2::decode(&built.woff2).unwrap();

        let face = ttf_parser::Face::parse(&sfnt, 0).unwrap();
        for gid in [glyph::A_DIERESIS, glyph::A, glyph::DIERESIS] {
            assert!(face.glyph_bounding_box(ttf_parser::GlyphId(gid)).is_some(), "glyph {}", gid);
        }
        assert!(face.glyph_bounding_box(ttf_parser::GlyphId(glyph::B)).is_none());
    }

    #[test]
    fn layout_and_names_survive() {
        let font = testing::example_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+0066, U+0069").unwrap();
        let (sfnt, closure) = SubsetBuilder::new().subset_sfnt(input(&font, &ranges)).unwrap();

        let reader = SfntReader::parse(&sfnt).unwrap();
        assert!(reader.table(b"GSUB").is_some());
        assert!(reader.table(b"name").is_some());
        assert!(closure.glyphs.contains(&glyph::F_I));
        assert_eq!(&reader.table(b"post").unwrap()[..4], &[0, 3, 0, 0]);
    }

    #[test]
    fn empty_intersection_fails() {
        let font = testing::example_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+0370-03FF").unwrap();
        let err = SubsetBuilder::new().build(input(&font, &ranges)).unwrap_err();
        assert!(matches!(err, FontDepotError::EmptySubset { .. }));
    }

    #[test]
    fn garbage_input_is_a_parse_error() {
        let ranges = UnicodeRanges::parse("U+0041").unwrap();
        let err = SubsetBuilder::new()
            .build(input(b"definitely not a font", &ranges))
            .unwrap_err();
        assert!(matches!(err, FontDepotError::FontParse { .. }));
    }

    #[test]
    fn build_is_deterministic() {
        let font = testing::example_font("Example", 400, false);
        let ranges = UnicodeRanges::parse("U+0000-00FF").unwrap();
        let first = SubsetBuilder::new().build(input(&font, &ranges)).unwrap();
        let second = SubsetBuilder::new().build(input(&font, &ranges)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cmap_runs_collapse() {
        let mapping: BTreeMap<u32, u16> = [(0x41, 1), (0x42, 2), (0x43, 3), (0x45, 9)].into();
        assert_eq!(mapping_runs(&mapping), vec![(0x41, 0x43, 1), (0x45, 0x45, 9)]);
    }

    #[test]
    fn supplementary_characters_get_format12() {
        let mapping: BTreeMap<u32, u16> = [(0x41, 1), (0x1F600, 2)].into();
        let cmap = build_cmap(&mapping);
        // Four encoding records: (0,3), (0,4), (3,1), (3,10)
        assert_eq!(be_u16(&cmap, 2), Some(4));
        assert_eq!(be_u16(&cmap, 4 + 3 * 8 + 2), Some(10));
    }
}
