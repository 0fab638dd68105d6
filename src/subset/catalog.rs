//! Static subset catalog and `unicode-range` handling
//!
//! The catalog mirrors the script partitions used by the public web-font
//! CSS API, so `unicode-range` values in generated CSS match what browsers
//! already expect from it.

use crate::error::{FontDepotError, FontDepotResult};
use std::fmt;

/// Bumped whenever a catalog range changes; part of every cache key.
pub const CATALOG_VERSION: u32 = 1;

/// Inclusive code-point range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodepointRange {
    pub start: u32,
    pub end: u32,
}

impl CodepointRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for CodepointRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "U+{:04X}", self.start)
        } else {
            write!(f, "U+{:04X}-{:04X}", self.start, self.end)
        }
    }
}

const fn r(start: u32, end: u32) -> CodepointRange {
    CodepointRange::new(start, end)
}

const fn c(cp: u32) -> CodepointRange {
    CodepointRange::new(cp, cp)
}

/// A named catalog entry
#[derive(Debug)]
pub struct SubsetDef {
    pub name: &'static str,
    pub ranges: &'static [CodepointRange],
}

impl SubsetDef {
    /// Normalized (sorted, merged) copy of the ranges
    pub fn unicode_ranges(&self) -> UnicodeRanges {
        UnicodeRanges::from_ranges(self.ranges.to_vec())
    }
}

const LATIN: &[CodepointRange] = &[
    r(0x0000, 0x00FF),
    c(0x0131),
    r(0x0152, 0x0153),
    r(0x02BB, 0x02BC),
    c(0x02C6),
    c(0x02DA),
    c(0x02DC),
    c(0x0304),
    c(0x0308),
    c(0x0329),
    r(0x2000, 0x206F),
    c(0x20AC),
    c(0x2122),
    c(0x2191),
    c(0x2193),
    c(0x2212),
    c(0x2215),
    c(0xFEFF),
    c(0xFFFD),
];

const LATIN_EXT: &[CodepointRange] = &[
    r(0x0100, 0x02BA),
    r(0x02BD, 0x02C5),
    r(0x02C7, 0x02CC),
    r(0x02CE, 0x02D7),
    r(0x02DD, 0x02FF),
    c(0x0304),
    c(0x0308),
    c(0x0329),
    r(0x1D00, 0x1DBF),
    r(0x1E00, 0x1E9F),
    r(0x1EF2, 0x1EFF),
    c(0x2020),
    r(0x20A0, 0x20AB),
    r(0x20AD, 0x20C0),
    c(0x2113),
    r(0x2C60, 0x2C7F),
    r(0xA720, 0xA7FF),
];

const CYRILLIC: &[CodepointRange] = &[
    c(0x0301),
    r(0x0400, 0x045F),
    r(0x0490, 0x0491),
    r(0x04B0, 0x04B1),
    c(0x2116),
];

const CYRILLIC_EXT: &[CodepointRange] = &[
    r(0x0460, 0x052F),
    r(0x1C80, 0x1C8A),
    c(0x20B4),
    r(0x2DE0, 0x2DFF),
    r(0xA640, 0xA69F),
    r(0xFE2E, 0xFE2F),
];

const GREEK: &[CodepointRange] = &[
    r(0x0370, 0x0377),
    r(0x037A, 0x037F),
    r(0x0384, 0x038A),
    c(0x038C),
    r(0x038E, 0x03A1),
    r(0x03A3, 0x03FF),
];

const GREEK_EXT: &[CodepointRange] = &[r(0x1F00, 0x1FFF)];

const VIETNAMESE: &[CodepointRange] = &[
    r(0x0102, 0x0103),
    r(0x0110, 0x0111),
    r(0x0128, 0x0129),
    r(0x0168, 0x0169),
    r(0x01A0, 0x01A1),
    r(0x01AF, 0x01B0),
    r(0x0300, 0x0301),
    r(0x0303, 0x0304),
    r(0x0308, 0x0309),
    c(0x0323),
    c(0x0329),
    r(0x1EA0, 0x1EF9),
    c(0x20AB),
];

const MATH: &[CodepointRange] = &[
    r(0x0302, 0x0303),
    c(0x0305),
    r(0x0307, 0x0308),
    c(0x0310),
    c(0x0312),
    c(0x0315),
    c(0x031A),
    r(0x0326, 0x0327),
    c(0x032C),
    r(0x032F, 0x0330),
    r(0x0332, 0x0333),
    c(0x0338),
    c(0x033A),
    c(0x0346),
    c(0x034D),
    r(0x0391, 0x03A1),
    r(0x03A3, 0x03A9),
    r(0x03B1, 0x03C9),
    c(0x03D1),
    r(0x03D5, 0x03D6),
    r(0x03F0, 0x03F1),
    r(0x03F4, 0x03F5),
    r(0x2016, 0x2017),
    r(0x2034, 0x2038),
    c(0x203C),
    c(0x2040),
    c(0x2043),
    c(0x2047),
    c(0x2050),
    c(0x2057),
    c(0x205F),
    r(0x2070, 0x2071),
    r(0x2074, 0x208E),
    r(0x2090, 0x209C),
    r(0x20D0, 0x20DC),
    c(0x20E1),
    r(0x20E5, 0x20EF),
    r(0x2100, 0x2112),
    r(0x2114, 0x2115),
    r(0x2117, 0x2121),
    r(0x2123, 0x214F),
    c(0x2190),
    c(0x2192),
    r(0x2194, 0x21AE),
    r(0x21B0, 0x21E5),
    r(0x21F1, 0x21F2),
    r(0x21F4, 0x2211),
    r(0x2213, 0x2214),
    r(0x2216, 0x22FF),
    r(0x2308, 0x230B),
    c(0x2310),
    c(0x2319),
    r(0x231C, 0x2321),
    r(0x2336, 0x237A),
    c(0x237C),
    c(0x2395),
    r(0x239B, 0x23B7),
    c(0x23D0),
    r(0x23DC, 0x23E1),
    r(0x2474, 0x2475),
    c(0x25AF),
    c(0x25B3),
    c(0x25B7),
    c(0x25BD),
    c(0x25C1),
    c(0x25CA),
    c(0x25CC),
    c(0x25FB),
    r(0x266D, 0x266F),
    r(0x27C0, 0x27FF),
    r(0x2900, 0x2AFF),
    r(0x2B0E, 0x2B11),
    r(0x2B30, 0x2B4C),
    c(0x2BFE),
    c(0x3030),
    c(0xFF5B),
    c(0xFF5D),
    r(0x1D400, 0x1D7FF),
    r(0x1EE00, 0x1EEFF),
];

const SYMBOLS: &[CodepointRange] = &[
    r(0x0001, 0x000C),
    r(0x000E, 0x001F),
    r(0x007F, 0x009F),
    r(0x20DD, 0x20E0),
    r(0x20E2, 0x20E4),
    r(0x2150, 0x218F),
    c(0x2190),
    c(0x2192),
    r(0x2194, 0x2199),
    c(0x21AF),
    r(0x21E6, 0x21F0),
    c(0x21F3),
    r(0x2218, 0x2219),
    c(0x2299),
    r(0x22C4, 0x22C6),
    r(0x2300, 0x243F),
    r(0x2440, 0x244A),
    r(0x2460, 0x24FF),
    r(0x25A0, 0x27BF),
    r(0x2800, 0x28FF),
    r(0x2921, 0x2922),
    c(0x2981),
    c(0x29BF),
    c(0x29EB),
    r(0x2B00, 0x2BFF),
    r(0x4DC0, 0x4DFF),
    r(0xFFF9, 0xFFFB),
    r(0x10140, 0x1018E),
    r(0x10190, 0x1019C),
    r(0x1F000, 0x1F0FF),
    r(0x1F100, 0x1F1AD),
    r(0x1F1E6, 0x1F1FF),
    r(0x1F700, 0x1F7FF),
    r(0x1F800, 0x1F80B),
    r(0x1FB00, 0x1FBFF),
];

static STANDARD: SubsetCatalog = SubsetCatalog {
    entries: &[
        SubsetDef { name: "cyrillic-ext", ranges: CYRILLIC_EXT },
        SubsetDef { name: "cyrillic", ranges: CYRILLIC },
        SubsetDef { name: "greek-ext", ranges: GREEK_EXT },
        SubsetDef { name: "greek", ranges: GREEK },
        SubsetDef { name: "math", ranges: MATH },
        SubsetDef { name: "symbols", ranges: SYMBOLS },
        SubsetDef { name: "vietnamese", ranges: VIETNAMESE },
        SubsetDef { name: "latin-ext", ranges: LATIN_EXT },
        SubsetDef { name: "latin", ranges: LATIN },
    ],
};

/// Read-only mapping of subset names to code-point ranges.
///
/// Entry order matches the order the public API emits `@font-face` blocks
/// in, with `latin` last so it wins the cascade for overlapping points.
#[derive(Debug)]
pub struct SubsetCatalog {
    entries: &'static [SubsetDef],
}

impl SubsetCatalog {
    /// The built-in catalog
    pub fn standard() -> &'static SubsetCatalog {
        &STANDARD
    }

    /// Exact lookup; unknown names are an error, never a fallback
    pub fn get(&self, name: &str) -> FontDepotResult<&'static SubsetDef> {
        self.entries
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| FontDepotError::SubsetNotFound(name.to_string()))
    }

    /// All entries in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &'static SubsetDef> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|def| def.name).collect()
    }
}

/// What a request asks to subset: a catalog entry or a custom range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsetSpec {
    Named(&'static str),
    Custom(UnicodeRanges),
}

impl SubsetSpec {
    /// Label used in CSS comments, metadata and the cache key
    pub fn label(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Custom(_) => "custom",
        }
    }

    /// Resolve to concrete ranges
    pub fn ranges(&self, catalog: &SubsetCatalog) -> FontDepotResult<UnicodeRanges> {
        match self {
            Self::Named(name) => Ok(catalog.get(name)?.unicode_ranges()),
            Self::Custom(ranges) => Ok(ranges.clone()),
        }
    }
}

/// Sorted, non-overlapping, merged set of code-point ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UnicodeRanges(Vec<CodepointRange>);

impl UnicodeRanges {
    /// Normalize arbitrary ranges (sort + merge overlapping/adjacent)
    pub fn from_ranges(mut ranges: Vec<CodepointRange>) -> Self {
        ranges.sort();
        let mut merged: Vec<CodepointRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = merged.last_mut() {
                if range.start <= last.end.saturating_add(1) {
                    last.end = last.end.max(range.end);
                    continue;
                }
            }
            merged.push(range);
        }
        Self(merged)
    }

    /// Build from individual code points
    pub fn from_codepoints(points: impl IntoIterator<Item = u32>) -> Self {
        Self::from_ranges(points.into_iter().map(c).collect())
    }

    /// Parse a CSS `unicode-range` value such as `U+0000-00FF, U+0131, U+4??`
    pub fn parse(value: &str) -> FontDepotResult<Self> {
        let mut ranges = Vec::new();

        for part in value.split(',').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            ranges.push(parse_part(part).map_err(|reason| {
                FontDepotError::InvalidUnicodeRange {
                    range: part.to_string(),
                    reason,
                }
            })?);
        }

        if ranges.is_empty() {
            return Err(FontDepotError::InvalidUnicodeRange {
                range: value.to_string(),
                reason: "no ranges given".to_string(),
            });
        }

        Ok(Self::from_ranges(ranges))
    }

    pub fn ranges(&self) -> &[CodepointRange] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, cp: u32) -> bool {
        self.0
            .binary_search_by(|range| {
                if range.end < cp {
                    std::cmp::Ordering::Less
                } else if range.start > cp {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Number of code points covered
    pub fn len(&self) -> u64 {
        self.0
            .iter()
            .map(|range| u64::from(range.end - range.start) + 1)
            .sum()
    }

    /// Intersection with another range set
    pub fn intersect(&self, other: &UnicodeRanges) -> UnicodeRanges {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::new();
        while i < self.0.len() && j < other.0.len() {
            let a = self.0[i];
            let b = other.0[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start <= end {
                out.push(CodepointRange::new(start, end));
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        UnicodeRanges(out)
    }
}

impl fmt::Display for UnicodeRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

fn parse_hex(digits: &str) -> Result<u32, String> {
    if digits.is_empty() || digits.len() > 6 {
        return Err(format!("'{}' is not a 1-6 digit hex value", digits));
    }
    let value = u32::from_str_radix(digits, 16)
        .map_err(|_| format!("'{}' is not hexadecimal", digits))?;
    if value > 0x10FFFF {
        return Err(format!("U+{:X} is beyond U+10FFFF", value));
    }
    Ok(value)
}

fn parse_part(part: &str) -> Result<CodepointRange, String> {
    let body = part
        .strip_prefix("U+")
        .or_else(|| part.strip_prefix("u+"))
        .unwrap_or(part);

    if body.contains('?') {
        let trimmed = body.trim_end_matches('?');
        if trimmed.contains('?') || body.contains('-') {
            return Err("wildcards must be trailing and cannot be combined with '-'".to_string());
        }
        let start = parse_hex(&body.replace('?', "0"))?;
        let end = parse_hex(&body.replace('?', "F"))?;
        return Ok(CodepointRange::new(start, end));
    }

    match body.split_once('-') {
        Some((start, end)) => {
            let end = end.trim();
            let end = end
                .strip_prefix("U+")
                .or_else(|| end.strip_prefix("u+"))
                .unwrap_or(end);
            let start = parse_hex(start.trim())?;
            let end = parse_hex(end)?;
            if start > end {
                return Err(format!("start U+{:X} is after end U+{:X}", start, end));
            }
            Ok(CodepointRange::new(start, end))
        }
        None => {
            let cp = parse_hex(body)?;
            Ok(CodepointRange::new(cp, cp))
        }
    }
}
