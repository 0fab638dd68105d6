//! Glyph closure computation
//!
//! Starting from the glyphs mapped by the requested characters, adds
//! everything needed to render them: composite components from `glyf`,
//! `seac` accents from CFF charstrings and glyphs produced by GSUB
//! substitutions that the included glyphs can trigger. Iterates to a fixed
//! point.

use crate::error::{FontDepotError, FontDepotResult};
use crate::subset::catalog::UnicodeRanges;
use crate::subset::cff::CffOutlines;
use crate::subset::sfnt::{be_i16, be_u16, be_u32, SfntReader};
use std::collections::{BTreeMap, BTreeSet};

const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
const WE_HAVE_A_SCALE: u16 = 0x0008;
const MORE_COMPONENTS: u16 = 0x0020;
const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

const EXTENSION_LOOKUP: u16 = 7;
const MAX_COMPOSITE_DEPTH: usize = 16;

/// Result of the closure: code point mapping plus the full glyph set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphClosure {
    /// Code point -> glyph id, only for characters kept in the subset
    pub mapping: BTreeMap<u32, u16>,
    /// Every glyph id the subset keeps (always includes `.notdef`)
    pub glyphs: BTreeSet<u16>,
}

/// All Unicode code points the face maps to a real glyph, ascending
pub fn mapped_codepoints(face: &ttf_parser::Face<'_>) -> Vec<u32> {
    let mut points = BTreeSet::new();
    if let Some(cmap) = face.tables().cmap {
        for subtable in cmap.subtables {
            if !subtable.is_unicode() {
                continue;
            }
            subtable.codepoints(|cp| {
                if matches!(subtable.glyph_index(cp), Some(gid) if gid.0 != 0) {
                    points.insert(cp);
                }
            });
        }
    }
    points.into_iter().collect()
}

/// Compute the closure for `ranges` over an already parsed face.
///
/// Returns an empty mapping when the ranges share no characters with the
/// font; the caller decides whether that is an error.
pub fn compute(
    face: &ttf_parser::Face<'_>,
    sfnt: &SfntReader<'_>,
    ranges: &UnicodeRanges,
) -> FontDepotResult<GlyphClosure> {
    let mut mapping = BTreeMap::new();
    for cp in mapped_codepoints(face) {
        if !ranges.contains(cp) {
            continue;
        }
        let gid = char::from_u32(cp).and_then(|ch| face.glyph_index(ch));
        if let Some(gid) = gid {
            mapping.insert(cp, gid.0);
        }
    }

    let mut glyphs: BTreeSet<u16> = mapping.values().copied().collect();
    glyphs.insert(0);

    if mapping.is_empty() {
        return Ok(GlyphClosure { mapping, glyphs });
    }

    let outlines = GlyfOutlines::load(sfnt)?;
    let cff = CffOutlines::load(sfnt)?;
    let gsub = sfnt.table(b"GSUB").map(Gsub::new);
    let mut scanned = BTreeSet::new();

    loop {
        let before = glyphs.len();

        if let Some(outlines) = &outlines {
            let seeds: Vec<u16> = glyphs.iter().copied().collect();
            for gid in seeds {
                outlines.collect_components(gid, &mut glyphs, 0);
            }
        }

        if let Some(cff) = &cff {
            let seeds: Vec<u16> = glyphs.difference(&scanned).copied().collect();
            for gid in seeds {
                scanned.insert(gid);
                if let Some((base, accent)) = cff.accent_components(gid) {
                    glyphs.insert(base);
                    glyphs.insert(accent);
                }
            }
        }

        if let Some(gsub) = &gsub {
            gsub.close_over(&mut glyphs)?;
        }

        if glyphs.len() == before {
            break;
        }
    }

    let num_glyphs = face.number_of_glyphs();
    glyphs.retain(|&gid| gid < num_glyphs);

    Ok(GlyphClosure { mapping, glyphs })
}

/// Read access to `glyf` through `loca`
pub(crate) struct GlyfOutlines<'a> {
    glyf: &'a [u8],
    offsets: Vec<u32>,
}

impl<'a> GlyfOutlines<'a> {
    /// `None` for fonts with CFF outlines
    pub(crate) fn load(sfnt: &SfntReader<'a>) -> FontDepotResult<Option<Self>> {
        let (Some(glyf), Some(loca)) = (sfnt.table(b"glyf"), sfnt.table(b"loca")) else {
            return Ok(None);
        };
        let head = sfnt.require(b"head")?;
        let maxp = sfnt.require(b"maxp")?;
        let long = be_i16(head, 50).ok_or_else(|| FontDepotError::malformed("head", "truncated"))?
            != 0;
        let num_glyphs =
            be_u16(maxp, 4).ok_or_else(|| FontDepotError::malformed("maxp", "truncated"))?;

        let count = num_glyphs as usize + 1;
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let offset = if long {
                be_u32(loca, i * 4)
            } else {
                be_u16(loca, i * 2).map(|v| u32::from(v) * 2)
            };
            let offset =
                offset.ok_or_else(|| FontDepotError::malformed("loca", "fewer entries than glyphs"))?;
            if offsets.last().is_some_and(|&prev| offset < prev) || offset as usize > glyf.len() {
                return Err(FontDepotError::malformed("loca", "offsets out of order"));
            }
            offsets.push(offset);
        }

        Ok(Some(Self { glyf, offsets }))
    }

    pub(crate) fn num_glyphs(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Raw outline bytes of one glyph (empty for blank glyphs)
    pub(crate) fn glyph(&self, gid: u16) -> &'a [u8] {
        let idx = gid as usize;
        match (self.offsets.get(idx), self.offsets.get(idx + 1)) {
            (Some(&start), Some(&end)) => &self.glyf[start as usize..end as usize],
            _ => &[],
        }
    }

    fn collect_components(&self, gid: u16, needed: &mut BTreeSet<u16>, depth: usize) {
        if depth > MAX_COMPOSITE_DEPTH {
            return;
        }
        let data = self.glyph(gid);
        if data.len() < 10 || be_i16(data, 0).is_none_or(|contours| contours >= 0) {
            return;
        }

        let mut pos = 10;
        while let (Some(flags), Some(component)) = (be_u16(data, pos), be_u16(data, pos + 2)) {
            pos += 4;
            if needed.insert(component) {
                self.collect_components(component, needed, depth + 1);
            }

            pos += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
            if flags & WE_HAVE_A_SCALE != 0 {
                pos += 2;
            } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
                pos += 4;
            } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
                pos += 8;
            }

            if flags & MORE_COMPONENTS == 0 {
                break;
            }
        }
    }
}

/// Minimal GSUB walker: only what is needed to find reachable glyphs
struct Gsub<'a> {
    data: &'a [u8],
}

impl<'a> Gsub<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn close_over(&self, glyphs: &mut BTreeSet<u16>) -> FontDepotResult<()> {
        let lookup_list = self.offset16(0, 8)?;
        let count = self.u16_at(lookup_list)?;

        for i in 0..count as usize {
            let lookup = self.offset16(lookup_list, 2 + i * 2)?;
            let kind = self.u16_at(lookup)?;
            let subtables = self.u16_at(lookup + 4)?;
            for j in 0..subtables as usize {
                let mut kind = kind;
                let mut subtable = self.offset16(lookup, 6 + j * 2)?;
                if kind == EXTENSION_LOOKUP {
                    kind = self.u16_at(subtable + 2)?;
                    subtable += self.u32_at(subtable + 4)? as usize;
                }
                let added = self.apply(kind, subtable, glyphs)?;
                glyphs.extend(added);
            }
        }

        Ok(())
    }

    /// Glyphs the subtable can produce from the current set
    fn apply(&self, kind: u16, at: usize, glyphs: &BTreeSet<u16>) -> FontDepotResult<Vec<u16>> {
        let mut out = Vec::new();
        match kind {
            1 => {
                let format = self.u16_at(at)?;
                let coverage = self.offset16(at, 2)?;
                for &gid in glyphs {
                    let Some(index) = self.coverage_index(coverage, gid)? else {
                        continue;
                    };
                    match format {
                        1 => {
                            let delta = self.u16_at(at + 4)?;
                            out.push(gid.wrapping_add(delta));
                        }
                        2 => out.push(self.u16_at(at + 6 + index as usize * 2)?),
                        _ => return Err(FontDepotError::malformed("GSUB", "unknown single format")),
                    }
                }
            }
            // Multiple (2) and alternate (3) share the same layout
            2 | 3 => {
                let coverage = self.offset16(at, 2)?;
                for &gid in glyphs {
                    let Some(index) = self.coverage_index(coverage, gid)? else {
                        continue;
                    };
                    let sequence = self.offset16(at, 6 + index as usize * 2)?;
                    let n = self.u16_at(sequence)?;
                    for k in 0..n as usize {
                        out.push(self.u16_at(sequence + 2 + k * 2)?);
                    }
                }
            }
            4 => {
                let coverage = self.offset16(at, 2)?;
                for &gid in glyphs {
                    let Some(index) = self.coverage_index(coverage, gid)? else {
                        continue;
                    };
                    let set = self.offset16(at, 6 + index as usize * 2)?;
                    let ligatures = self.u16_at(set)?;
                    for k in 0..ligatures as usize {
                        let ligature = self.offset16(set, 2 + k * 2)?;
                        let glyph = self.u16_at(ligature)?;
                        let components = self.u16_at(ligature + 2)?;
                        let mut complete = true;
                        for m in 1..components as usize {
                            if !glyphs.contains(&self.u16_at(ligature + 2 + m * 2)?) {
                                complete = false;
                                break;
                            }
                        }
                        if complete {
                            out.push(glyph);
                        }
                    }
                }
            }
            8 => {
                let coverage = self.offset16(at, 2)?;
                let backtrack = self.u16_at(at + 4)? as usize;
                let lookahead_at = at + 6 + backtrack * 2;
                let lookahead = self.u16_at(lookahead_at)? as usize;
                let substitutes_at = lookahead_at + 2 + lookahead * 2;
                for &gid in glyphs {
                    if let Some(index) = self.coverage_index(coverage, gid)? {
                        out.push(self.u16_at(substitutes_at + 2 + index as usize * 2)?);
                    }
                }
            }
            // Contextual lookups only point at other lookups, which are all
            // visited anyway.
            _ => {}
        }
        Ok(out)
    }

    fn coverage_index(&self, at: usize, gid: u16) -> FontDepotResult<Option<u16>> {
        match self.u16_at(at)? {
            1 => {
                let count = self.u16_at(at + 2)?;
                for i in 0..count {
                    if self.u16_at(at + 4 + i as usize * 2)? == gid {
                        return Ok(Some(i));
                    }
                }
                Ok(None)
            }
            2 => {
                let count = self.u16_at(at + 2)?;
                for i in 0..count as usize {
                    let record = at + 4 + i * 6;
                    let start = self.u16_at(record)?;
                    let end = self.u16_at(record + 2)?;
                    if (start..=end).contains(&gid) {
                        let base = self.u16_at(record + 4)?;
                        return Ok(Some(base + (gid - start)));
                    }
                }
                Ok(None)
            }
            _ => Err(FontDepotError::malformed("GSUB", "unknown coverage format")),
        }
    }

    fn u16_at(&self, at: usize) -> FontDepotResult<u16> {
        be_u16(self.data, at).ok_or_else(|| FontDepotError::malformed("GSUB", "truncated"))
    }

    fn u32_at(&self, at: usize) -> FontDepotResult<u32> {
        be_u32(self.data, at).ok_or_else(|| FontDepotError::malformed("GSUB", "truncated"))
    }

    /// Follow a 16-bit offset stored at `base + field`, relative to `base`
    fn offset16(&self, base: usize, field: usize) -> FontDepotResult<usize> {
        Ok(base + self.u16_at(base + field)? as usize)
    }
}
