//! Synthetic fonts for tests
//!
//! Generates a small but complete font, with TrueType or CFF outlines, so
//! tests never depend on font files being installed. The glyph layout is
//! fixed; see [`glyph`].

use crate::subset::builder::build_cmap;
use crate::subset::cff::write_index;
use crate::subset::sfnt::{write_sfnt, Tag, CFF_FLAVOR, TRUETYPE_FLAVOR};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Glyph ids of the example font
pub mod glyph {
    pub const NOTDEF: u16 = 0;
    /// `A`..=`Z` occupy 1..=26
    pub const A: u16 = 1;
    pub const B: u16 = 2;
    pub const DIERESIS: u16 = 27;
    /// Composite of `A` + dieresis (a `seac` in the CFF font)
    pub const A_DIERESIS: u16 = 28;
    pub const F: u16 = 29;
    pub const I: u16 = 30;
    /// Unmapped, reachable only through the `f` + `i` ligature
    pub const F_I: u16 = 31;
    /// `А`..=`Г` occupy 32..=35
    pub const CYRILLIC_A: u16 = 32;
    /// Unmapped and unreferenced
    pub const ORPHAN: u16 = 36;
}

pub const GLYPH_COUNT: u16 = 37;

const UNITS_PER_EM: u16 = 1000;
const ADVANCE: u16 = 600;

fn character_map() -> BTreeMap<u32, u16> {
    let mut map = BTreeMap::new();
    for (i, cp) in (0x41..=0x5A).enumerate() {
        map.insert(cp, glyph::A + i as u16);
    }
    map.insert(0x0308, glyph::DIERESIS);
    map.insert(0x00C4, glyph::A_DIERESIS);
    map.insert(0x66, glyph::F);
    map.insert(0x69, glyph::I);
    for (i, cp) in (0x0410..=0x0413).enumerate() {
        map.insert(cp, glyph::CYRILLIC_A + i as u16);
    }
    map
}

struct Bytes(Vec<u8>);

impl Bytes {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn u16(mut self, value: u16) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn i16(self, value: i16) -> Self {
        self.u16(value as u16)
    }

    fn u32(mut self, value: u32) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.0.extend_from_slice(bytes);
        self
    }

    fn zeros(mut self, count: usize) -> Self {
        self.0.resize(self.0.len() + count, 0);
        self
    }

    fn done(self) -> Vec<u8> {
        self.0
    }
}

/// One-contour triangle; `width` varies so glyphs differ
fn triangle(width: i16) -> Vec<u8> {
    Bytes::new()
        .i16(1)
        .i16(0)
        .i16(0)
        .i16(width)
        .i16(700)
        .u16(2) // endPtsOfContours
        .u16(0) // instructionLength
        .raw(&[0x01, 0x01, 0x01])
        .i16(0)
        .i16(width / 2)
        .i16(width / 2)
        .i16(0)
        .i16(700)
        .i16(-700)
        .done()
}

fn dieresis_composite() -> Vec<u8> {
    // ARG_1_AND_2_ARE_WORDS | ARGS_ARE_XY_VALUES, MORE_COMPONENTS on the first
    Bytes::new()
        .i16(-1)
        .i16(0)
        .i16(0)
        .i16(500)
        .i16(900)
        .u16(0x0001 | 0x0002 | 0x0020)
        .u16(glyph::A)
        .i16(0)
        .i16(0)
        .u16(0x0001 | 0x0002)
        .u16(glyph::DIERESIS)
        .i16(0)
        .i16(200)
        .done()
}

fn glyf_and_loca() -> (Vec<u8>, Vec<u8>) {
    let mut glyf = Vec::new();
    let mut loca = Bytes::new();
    for gid in 0..GLYPH_COUNT {
        loca = loca.u32(glyf.len() as u32);
        let outline = match gid {
            glyph::A_DIERESIS => dieresis_composite(),
            _ => triangle(300 + gid as i16 * 10),
        };
        glyf.extend_from_slice(&outline);
        glyf.resize((glyf.len() + 3) & !3, 0);
    }
    loca = loca.u32(glyf.len() as u32);
    (glyf, loca.done())
}

fn head(weight: u16, italic: bool) -> Vec<u8> {
    let mac_style = u16::from(weight >= 700) | (u16::from(italic) << 1);
    Bytes::new()
        .u32(0x0001_0000)
        .u32(0x0001_0000)
        .u32(0) // checkSumAdjustment
        .u32(0x5F0F_3CF5)
        .u16(0x000B)
        .u16(UNITS_PER_EM)
        .zeros(16) // created, modified
        .i16(0)
        .i16(0)
        .i16(1000)
        .i16(1000)
        .u16(mac_style)
        .u16(8)
        .i16(2)
        .i16(1) // long loca
        .i16(0)
        .done()
}

fn hhea() -> Vec<u8> {
    Bytes::new()
        .u32(0x0001_0000)
        .i16(800)
        .i16(-200)
        .i16(0)
        .u16(ADVANCE)
        .i16(0)
        .i16(0)
        .i16(1000)
        .i16(1)
        .i16(0)
        .i16(0)
        .zeros(8)
        .i16(0)
        .u16(GLYPH_COUNT)
        .done()
}

/// Version 0.5 `maxp`, as CFF fonts carry it
fn maxp_cff() -> Vec<u8> {
    Bytes::new().u32(0x0000_5000).u16(GLYPH_COUNT).done()
}

fn maxp() -> Vec<u8> {
    Bytes::new()
        .u32(0x0001_0000)
        .u16(GLYPH_COUNT)
        .u16(3) // maxPoints
        .u16(1) // maxContours
        .u16(6) // maxCompositePoints
        .u16(2) // maxCompositeContours
        .u16(2) // maxZones
        .zeros(12)
        .u16(2) // maxComponentElements
        .u16(1) // maxComponentDepth
        .done()
}

fn hmtx() -> Vec<u8> {
    let mut out = Bytes::new();
    for _ in 0..GLYPH_COUNT {
        out = out.u16(ADVANCE).i16(0);
    }
    out.done()
}

fn os2(weight: u16, italic: bool) -> Vec<u8> {
    let fs_selection = if italic { 0x0001 } else if weight >= 700 { 0x0020 } else { 0x0040 };
    Bytes::new()
        .u16(0)
        .i16(ADVANCE as i16)
        .u16(weight)
        .u16(5)
        .u16(0)
        .zeros(20) // sub/superscript and strikeout metrics
        .i16(0)
        .zeros(10) // panose
        .zeros(16) // ulUnicodeRange
        .raw(b"NONE")
        .u16(fs_selection)
        .u16(0x41)
        .u16(0x0413)
        .i16(800)
        .i16(-200)
        .i16(0)
        .u16(800)
        .u16(200)
        .done()
}

fn name(family: &str, subfamily: &str) -> Vec<u8> {
    let full = format!("{} {}", family, subfamily);
    let strings: Vec<(u16, Vec<u8>)> = [(1, family), (2, subfamily), (4, full.as_str())]
        .into_iter()
        .map(|(id, text)| {
            let encoded: Vec<u8> = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
            (id, encoded)
        })
        .collect();

    let mut out = Bytes::new()
        .u16(0)
        .u16(strings.len() as u16)
        .u16(6 + 12 * strings.len() as u16);
    let mut offset = 0u16;
    for (id, text) in &strings {
        out = out
            .u16(3)
            .u16(1)
            .u16(0x0409)
            .u16(*id)
            .u16(text.len() as u16)
            .u16(offset);
        offset += text.len() as u16;
    }
    for (_, text) in &strings {
        out = out.raw(text);
    }
    out.done()
}

fn post() -> Vec<u8> {
    Bytes::new()
        .u32(0x0003_0000)
        .u32(0)
        .i16(-100)
        .i16(50)
        .zeros(20)
        .done()
}

/// `f` + `i` -> `fi` ligature, nothing else
fn gsub() -> Vec<u8> {
    Bytes::new()
        // header: version 1.0, script/feature/lookup list offsets
        .u16(1)
        .u16(0)
        .u16(10)
        .u16(12)
        .u16(14)
        .u16(0) // ScriptList: no scripts
        .u16(0) // FeatureList: no features
        .u16(1) // LookupList at 14
        .u16(4)
        .u16(4) // Lookup at 18: ligature substitution
        .u16(0)
        .u16(1)
        .u16(8)
        .u16(1) // LigatureSubst at 26
        .u16(8)
        .u16(1)
        .u16(14)
        .u16(1) // Coverage at 34
        .u16(1)
        .u16(glyph::F)
        .u16(1) // LigatureSet at 40
        .u16(4)
        .u16(glyph::F_I) // Ligature at 44
        .u16(2)
        .u16(glyph::I)
        .done()
}

/// Standard encoding codes of `A` and `dieresis`
const SEAC_BASE_CODE: i32 = 65;
const SEAC_ACCENT_CODE: i32 = 200;

/// Charset SIDs; `A`..`Z`, `dieresis`, `f`, `i` and `fi` use their standard
/// strings so `seac` can find them
fn charset_sid(gid: u16) -> u16 {
    match gid {
        glyph::A..=26 => 34 + (gid - glyph::A),
        glyph::DIERESIS => 131,
        glyph::F => 71,
        glyph::I => 74,
        glyph::F_I => 109,
        _ => 150 + gid,
    }
}

/// Type 2 charstring number
fn cs_int(value: i32) -> Vec<u8> {
    match value {
        -107..=107 => vec![(value + 139) as u8],
        108..=1131 => {
            let v = value - 108;
            vec![(v / 256 + 247) as u8, (v % 256) as u8]
        }
        -1131..=-108 => {
            let v = -value - 108;
            vec![(v / 256 + 251) as u8, (v % 256) as u8]
        }
        _ => {
            let mut out = vec![28];
            out.extend_from_slice(&(value as i16).to_be_bytes());
            out
        }
    }
}

fn charstring(parts: &[&[i32]], ops: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for (operands, op) in parts.iter().zip(ops) {
        for &value in *operands {
            out.extend(cs_int(value));
        }
        out.push(*op);
    }
    out
}

/// Triangle whose second edge lives in local subr 0; the start point
/// varies so glyphs differ
fn cff_triangle(gid: u16) -> Vec<u8> {
    charstring(
        &[&[i32::from(gid) * 10, 0], &[100, 700], &[-107], &[]],
        &[21, 5, 10, 14],
    )
}

fn cff_table(family: &str) -> Vec<u8> {
    let charstrings: Vec<Vec<u8>> = (0..GLYPH_COUNT)
        .map(|gid| match gid {
            glyph::A_DIERESIS => charstring(&[&[0, 200, SEAC_BASE_CODE, SEAC_ACCENT_CODE]], &[14]),
            _ => cff_triangle(gid),
        })
        .collect();
    let subrs = write_index(&[charstring(&[&[100, -700], &[]], &[5, 11])], false);

    let mut charset = Bytes::new().raw(&[0]);
    for gid in 1..GLYPH_COUNT {
        charset = charset.u16(charset_sid(gid));
    }
    let charset = charset.done();
    let charstrings = write_index(&charstrings, false);
    // Subrs right after the six-byte Private DICT
    let private = Bytes::new().raw(&[29]).u32(6).raw(&[19]).done();

    let top_dict = |charset_at: u32, charstrings_at: u32, private_at: u32| {
        Bytes::new()
            .raw(&[29])
            .u32(charset_at)
            .raw(&[15, 29])
            .u32(charstrings_at)
            .raw(&[17, 29])
            .u32(private.len() as u32)
            .raw(&[29])
            .u32(private_at)
            .raw(&[18])
            .done()
    };

    let header = [1u8, 0, 4, 4];
    let names = write_index(&[family.replace(' ', "")], false);
    let empty = write_index::<Vec<u8>>(&[], false);
    let top_len = write_index(&[top_dict(0, 0, 0)], false).len();

    let charset_at = header.len() + names.len() + top_len + empty.len() * 2;
    let charstrings_at = charset_at + charset.len();
    let private_at = charstrings_at + charstrings.len();
    let top = top_dict(charset_at as u32, charstrings_at as u32, private_at as u32);

    Bytes::new()
        .raw(&header)
        .raw(&names)
        .raw(&write_index(&[top], false))
        .raw(&empty) // String INDEX
        .raw(&empty) // Global Subr INDEX
        .raw(&charset)
        .raw(&charstrings)
        .raw(&private)
        .raw(&subrs)
        .done()
}

fn subfamily(weight: u16, italic: bool) -> &'static str {
    match (weight >= 700, italic) {
        (false, false) => "Regular",
        (true, false) => "Bold",
        (false, true) => "Italic",
        (true, true) => "Bold Italic",
    }
}

/// Tables shared by both outline flavours
fn common_tables(family: &str, weight: u16, italic: bool) -> Vec<(Tag, Vec<u8>)> {
    vec![
        (*b"GSUB", gsub()),
        (*b"OS/2", os2(weight, italic)),
        (*b"cmap", build_cmap(&character_map())),
        (*b"head", head(weight, italic)),
        (*b"hhea", hhea()),
        (*b"hmtx", hmtx()),
        (*b"name", name(family, subfamily(weight, italic))),
        (*b"post", post()),
    ]
}

/// A complete TrueType font named `family` with the given weight and style
pub fn example_font(family: &str, weight: u16, italic: bool) -> Vec<u8> {
    let (glyf, loca) = glyf_and_loca();
    let mut tables = common_tables(family, weight, italic);
    tables.push((*b"glyf", glyf));
    tables.push((*b"loca", loca));
    tables.push((*b"maxp", maxp()));
    write_sfnt(TRUETYPE_FLAVOR, tables)
}

/// The same font with CFF outlines
pub fn example_cff_font(family: &str, weight: u16, italic: bool) -> Vec<u8> {
    let mut tables = common_tables(family, weight, italic);
    tables.push((*b"CFF ", cff_table(family)));
    tables.push((*b"maxp", maxp_cff()));
    write_sfnt(CFF_FLAVOR, tables)
}

/// Write `Example-Regular.ttf`, `Example-Bold.ttf` and `Example-Italic.ttf`
/// into `dir`, returning their paths.
pub fn write_example_family(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let variants = [
        ("Example-Regular.ttf", 400, false),
        ("Example-Bold.ttf", 700, false),
        ("Example-Italic.ttf", 400, true),
    ];
    let mut paths = Vec::with_capacity(variants.len());
    for (file, weight, italic) in variants {
        let path = dir.join(file);
        std::fs::write(&path, example_font("Example", weight, italic))?;
        paths.push(path);
    }
    Ok(paths)
}
