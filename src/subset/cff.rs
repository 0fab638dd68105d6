//! CFF and CFF2 outlines
//!
//! Trimming keeps the glyph order and swaps every charstring outside the
//! closure for an empty one. The table is then laid out again from its
//! parts; all rewritten offsets use the five-byte integer form, so a first
//! pass with zero offsets fixes every position.
//!
//! Subroutines are kept as they are. Outlines that only live in a subr
//! reachable from dropped glyphs stay in the file.

use crate::error::{FontDepotError, FontDepotResult};
use crate::subset::sfnt::{be_u16, be_u32, put_u16, SfntReader, Tag};
use std::collections::{BTreeSet, HashMap};

const OP_CHARSET: u16 = 15;
const OP_ENCODING: u16 = 16;
const OP_CHARSTRINGS: u16 = 17;
const OP_PRIVATE: u16 = 18;
const OP_SUBRS: u16 = 19;
const OP_VSTORE: u16 = 24;
const OP_ROS: u16 = 0x0C1E;
const OP_FDARRAY: u16 = 0x0C24;
const OP_FDSELECT: u16 = 0x0C25;

const ENDCHAR: u8 = 14;
const MAX_SUBR_DEPTH: usize = 10;

/// Charset offsets below this are predefined charsets
const PREDEFINED_CHARSETS: usize = 3;
/// Encoding offsets below this are predefined encodings
const PREDEFINED_ENCODINGS: usize = 2;
/// Last SID of the ISOAdobe charset
const ISO_ADOBE_LAST_SID: u16 = 228;

/// Standard encoding above ASCII: `(code, SID)`
const STANDARD_ENCODING_HIGH: &[(i32, u16)] = &[
    (161, 96), (162, 97), (163, 98), (164, 99), (165, 100), (166, 101), (167, 102),
    (168, 103), (169, 104), (170, 105), (171, 106), (172, 107), (173, 108), (174, 109),
    (175, 110), (177, 111), (178, 112), (179, 113), (180, 114), (182, 115), (183, 116),
    (184, 117), (185, 118), (186, 119), (187, 120), (188, 121), (189, 122), (191, 123),
    (193, 124), (194, 125), (195, 126), (196, 127), (197, 128), (198, 129), (199, 130),
    (200, 131), (202, 132), (203, 133), (205, 134), (206, 135), (207, 136), (208, 137),
    (225, 138), (227, 139), (232, 140), (233, 141), (234, 142), (235, 143), (241, 144),
    (245, 145), (248, 146), (249, 147), (250, 148), (251, 149),
];

fn standard_encoding_sid(code: i32) -> Option<u16> {
    match code {
        32..=126 => Some((code - 31) as u16),
        _ => STANDARD_ENCODING_HIGH
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, sid)| *sid),
    }
}

fn malformed(reason: &str) -> FontDepotError {
    FontDepotError::malformed("CFF", reason)
}

fn truncated() -> FontDepotError {
    malformed("truncated")
}

fn slice(data: &[u8], at: usize, len: usize) -> FontDepotResult<&[u8]> {
    at.checked_add(len)
        .and_then(|end| data.get(at..end))
        .ok_or_else(truncated)
}

/// A parsed INDEX with the number of bytes it spans
#[derive(Debug, Clone)]
struct Index<'a> {
    items: Vec<&'a [u8]>,
    raw: &'a [u8],
}

/// Read an INDEX; CFF2 uses 32-bit counts
fn read_index(data: &[u8], at: usize, wide: bool) -> FontDepotResult<Index<'_>> {
    let (count, mut pos) = if wide {
        (be_u32(data, at).ok_or_else(truncated)? as usize, at + 4)
    } else {
        (be_u16(data, at).ok_or_else(truncated)? as usize, at + 2)
    };
    if count == 0 {
        return Ok(Index {
            items: Vec::new(),
            raw: slice(data, at, pos - at)?,
        });
    }

    let off_size = *data.get(pos).ok_or_else(truncated)? as usize;
    if !(1..=4).contains(&off_size) {
        return Err(malformed("bad INDEX offset size"));
    }
    pos += 1;
    let offsets_len = (count + 1)
        .checked_mul(off_size)
        .ok_or_else(truncated)?;
    let offset_bytes = slice(data, pos, offsets_len)?;
    let offsets: Vec<usize> = offset_bytes
        .chunks_exact(off_size)
        .map(|chunk| chunk.iter().fold(0usize, |acc, &b| acc << 8 | b as usize))
        .collect();

    // Offsets are 1-based from the byte before the data
    let base = pos + offsets_len - 1;
    let mut items = Vec::with_capacity(count);
    for pair in offsets.windows(2) {
        if pair[0] == 0 || pair[0] > pair[1] {
            return Err(malformed("INDEX offsets out of order"));
        }
        items.push(slice(data, base + pair[0], pair[1] - pair[0])?);
    }
    let end = base + offsets[count];
    Ok(Index {
        items,
        raw: slice(data, at, end - at)?,
    })
}

fn offset_size(max: usize) -> usize {
    match max {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Serialize an INDEX
pub(crate) fn write_index<T: AsRef<[u8]>>(items: &[T], wide: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if wide {
        out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    } else {
        out.extend_from_slice(&(items.len() as u16).to_be_bytes());
    }
    if items.is_empty() {
        return out;
    }

    let total: usize = items.iter().map(|item| item.as_ref().len()).sum();
    let off_size = offset_size(total + 1);
    out.push(off_size as u8);
    let mut offset = 1usize;
    out.extend_from_slice(&(offset as u32).to_be_bytes()[4 - off_size..]);
    for item in items {
        offset += item.as_ref().len();
        out.extend_from_slice(&(offset as u32).to_be_bytes()[4 - off_size..]);
    }
    for item in items {
        out.extend_from_slice(item.as_ref());
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Operand<'a> {
    raw: &'a [u8],
    /// `None` for real numbers
    value: Option<i64>,
}

#[derive(Debug, Clone)]
struct DictEntry<'a> {
    op: u16,
    operands: Vec<Operand<'a>>,
}

fn parse_dict(data: &[u8]) -> FontDepotResult<Vec<DictEntry<'_>>> {
    let mut entries = Vec::new();
    let mut operands = Vec::new();
    let mut pos = 0;

    while let Some(&b0) = data.get(pos) {
        let start = pos;
        let value = match b0 {
            0..=27 => {
                let op = if b0 == 12 {
                    let b1 = *data.get(pos + 1).ok_or_else(truncated)?;
                    pos += 2;
                    0x0C00 | u16::from(b1)
                } else {
                    pos += 1;
                    u16::from(b0)
                };
                entries.push(DictEntry {
                    op,
                    operands: std::mem::take(&mut operands),
                });
                continue;
            }
            28 => {
                pos += 3;
                Some(i64::from(be_u16(data, start + 1).ok_or_else(truncated)? as i16))
            }
            29 => {
                pos += 5;
                Some(i64::from(be_u32(data, start + 1).ok_or_else(truncated)? as i32))
            }
            30 => {
                pos += 1;
                loop {
                    let nibbles = *data.get(pos).ok_or_else(truncated)?;
                    pos += 1;
                    if nibbles & 0x0F == 0x0F || nibbles >> 4 == 0x0F {
                        break;
                    }
                }
                None
            }
            32..=246 => {
                pos += 1;
                Some(i64::from(b0) - 139)
            }
            247..=254 => {
                let b1 = i64::from(*data.get(pos + 1).ok_or_else(truncated)?);
                pos += 2;
                if b0 <= 250 {
                    Some((i64::from(b0) - 247) * 256 + b1 + 108)
                } else {
                    Some(-(i64::from(b0) - 251) * 256 - b1 - 108)
                }
            }
            _ => return Err(malformed("reserved DICT byte")),
        };
        operands.push(Operand {
            raw: slice(data, start, pos - start)?,
            value,
        });
    }

    Ok(entries)
}

/// Integer operands of `op`, which must all be non-negative
fn dict_offsets(entries: &[DictEntry<'_>], op: u16) -> FontDepotResult<Option<Vec<usize>>> {
    let Some(entry) = entries.iter().find(|e| e.op == op) else {
        return Ok(None);
    };
    entry
        .operands
        .iter()
        .map(|operand| {
            operand
                .value
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| malformed("offset operand is not an integer"))
        })
        .collect::<FontDepotResult<Vec<_>>>()
        .map(Some)
}

fn first_offset(entries: &[DictEntry<'_>], op: u16) -> FontDepotResult<Option<usize>> {
    Ok(dict_offsets(entries, op)?.and_then(|v| v.first().copied()))
}

/// Write a DICT, replacing the operands of every operator in `patch` with
/// five-byte integers
fn write_dict(entries: &[DictEntry<'_>], patch: &HashMap<u16, Vec<usize>>) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        match patch.get(&entry.op) {
            Some(values) => {
                for &value in values {
                    out.push(29);
                    out.extend_from_slice(&(value as u32).to_be_bytes());
                }
            }
            None => {
                for operand in &entry.operands {
                    out.extend_from_slice(operand.raw);
                }
            }
        }
        if entry.op > 0xFF {
            out.push(12);
        }
        out.push(entry.op as u8);
    }
    out
}

/// A Private DICT followed by its local subrs, ready to place anywhere
#[derive(Debug, Clone)]
struct PrivateBlock {
    dict_len: usize,
    bytes: Vec<u8>,
}

fn private_block(
    data: &[u8],
    size: usize,
    offset: usize,
    wide: bool,
) -> FontDepotResult<(PrivateBlock, Option<Index<'_>>)> {
    let entries = parse_dict(slice(data, offset, size)?)?;
    let subrs = match first_offset(&entries, OP_SUBRS)? {
        Some(relative) => Some(read_index(data, offset + relative, wide)?),
        None => None,
    };

    let mut patch = HashMap::new();
    if subrs.is_some() {
        patch.insert(OP_SUBRS, vec![0]);
    }
    let dict_len = write_dict(&entries, &patch).len();
    if subrs.is_some() {
        patch.insert(OP_SUBRS, vec![dict_len]);
    }

    let mut bytes = write_dict(&entries, &patch);
    if let Some(subrs) = &subrs {
        bytes.extend_from_slice(subrs.raw);
    }
    Ok((PrivateBlock { dict_len, bytes }, subrs))
}

/// `(size, offset)` operands of a Private entry
fn private_operands(entries: &[DictEntry<'_>]) -> FontDepotResult<Option<(usize, usize)>> {
    match dict_offsets(entries, OP_PRIVATE)? {
        Some(v) if v.len() == 2 => Ok(Some((v[0], v[1]))),
        Some(_) => Err(malformed("Private needs size and offset")),
        None => Ok(None),
    }
}

/// Length and per-glyph SIDs of a custom charset
fn read_charset(data: &[u8], at: usize, num_glyphs: usize) -> FontDepotResult<(usize, Vec<u16>)> {
    let format = *data.get(at).ok_or_else(truncated)?;
    let mut sids = vec![0u16];
    let mut pos = at + 1;

    match format {
        0 => {
            for _ in 1..num_glyphs {
                sids.push(be_u16(data, pos).ok_or_else(truncated)?);
                pos += 2;
            }
        }
        1 | 2 => {
            while sids.len() < num_glyphs {
                let first = be_u16(data, pos).ok_or_else(truncated)?;
                let left = if format == 1 {
                    u16::from(*data.get(pos + 2).ok_or_else(truncated)?)
                } else {
                    be_u16(data, pos + 2).ok_or_else(truncated)?
                };
                pos += if format == 1 { 3 } else { 4 };
                for sid in first..=first.saturating_add(left) {
                    sids.push(sid);
                }
            }
            sids.truncate(num_glyphs);
        }
        _ => return Err(malformed("unknown charset format")),
    }

    Ok((pos - at, sids))
}

fn encoding_len(data: &[u8], at: usize) -> FontDepotResult<usize> {
    let format = *data.get(at).ok_or_else(truncated)?;
    let count = *data.get(at + 1).ok_or_else(truncated)? as usize;
    let mut len = match format & 0x7F {
        0 => 2 + count,
        1 => 2 + count * 2,
        _ => return Err(malformed("unknown encoding format")),
    };
    if format & 0x80 != 0 {
        let supplements = *data.get(at + len).ok_or_else(truncated)? as usize;
        len += 1 + supplements * 3;
    }
    Ok(len)
}

fn fdselect_len(data: &[u8], at: usize, num_glyphs: usize) -> FontDepotResult<usize> {
    match data.get(at).ok_or_else(truncated)? {
        0 => Ok(1 + num_glyphs),
        3 => Ok(5 + be_u16(data, at + 1).ok_or_else(truncated)? as usize * 3),
        4 => Ok(9 + be_u32(data, at + 1).ok_or_else(truncated)? as usize * 6),
        _ => Err(malformed("unknown FDSelect format")),
    }
}

fn subr_bias(count: usize) -> i64 {
    if count < 1240 {
        107
    } else if count < 33900 {
        1131
    } else {
        32768
    }
}

/// Blocks that follow the fixed prefix of the table
struct Parts<'a> {
    charset: Option<&'a [u8]>,
    encoding: Option<&'a [u8]>,
    fdselect: Option<&'a [u8]>,
    vstore: Option<&'a [u8]>,
    font_dicts: Vec<Vec<DictEntry<'a>>>,
    top_private: Option<PrivateBlock>,
    fd_privates: Vec<Option<PrivateBlock>>,
}

/// Where each block landed in the output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Placement {
    charset: usize,
    encoding: usize,
    fdselect: usize,
    charstrings: usize,
    vstore: usize,
    fdarray: usize,
    top_private: usize,
    fd_privates: Vec<usize>,
}

/// Read access to a `CFF ` or `CFF2` table
pub(crate) struct CffOutlines<'a> {
    tag: Tag,
    data: &'a [u8],
    cff2: bool,
    /// Bytes before the Top DICT (CFF2) or the whole header (CFF)
    header: &'a [u8],
    name_index: &'a [u8],
    string_index: &'a [u8],
    top: Vec<DictEntry<'a>>,
    global_subrs: Index<'a>,
    charstrings: Index<'a>,
    /// Only for name-keyed CFF, where `seac` can appear
    local_subrs: Option<Index<'a>>,
    sid_to_gid: HashMap<u16, u16>,
}

impl<'a> CffOutlines<'a> {
    /// `None` for fonts with TrueType outlines
    pub(crate) fn load(sfnt: &SfntReader<'a>) -> FontDepotResult<Option<Self>> {
        if let Some(data) = sfnt.table(b"CFF ") {
            return Self::parse_cff(data).map(Some);
        }
        if let Some(data) = sfnt.table(b"CFF2") {
            return Self::parse_cff2(data).map(Some);
        }
        Ok(None)
    }

    fn parse_cff(data: &'a [u8]) -> FontDepotResult<Self> {
        let header_len = *data.get(2).ok_or_else(truncated)? as usize;
        let header = slice(data, 0, header_len)?;
        let names = read_index(data, header_len, false)?;
        let top_dicts = read_index(data, header_len + names.raw.len(), false)?;
        let strings_at = header_len + names.raw.len() + top_dicts.raw.len();
        let strings = read_index(data, strings_at, false)?;
        let global_subrs = read_index(data, strings_at + strings.raw.len(), false)?;

        let top_data = match top_dicts.items.as_slice() {
            [only] => *only,
            _ => return Err(malformed("expected exactly one Top DICT")),
        };
        let top = parse_dict(top_data)?;
        let charstrings = Self::charstrings(data, &top, false)?;
        let is_cid = top.iter().any(|e| e.op == OP_ROS);

        let mut sid_to_gid = HashMap::new();
        let mut local_subrs = None;
        if !is_cid {
            match first_offset(&top, OP_CHARSET)?.unwrap_or(0) {
                0 => {
                    let last = ISO_ADOBE_LAST_SID.min(charstrings.items.len().saturating_sub(1) as u16);
                    sid_to_gid.extend((0..=last).map(|gid| (gid, gid)));
                }
                offset if offset >= PREDEFINED_CHARSETS => {
                    let (_, sids) = read_charset(data, offset, charstrings.items.len())?;
                    for (gid, sid) in sids.into_iter().enumerate() {
                        sid_to_gid.entry(sid).or_insert(gid as u16);
                    }
                }
                // Expert charsets never carry standard-encoded accents
                _ => {}
            }
            if let Some((size, offset)) = private_operands(&top)? {
                local_subrs = private_block(data, size, offset, false)?.1;
            }
        }

        Ok(Self {
            tag: *b"CFF ",
            data,
            cff2: false,
            header,
            name_index: names.raw,
            string_index: strings.raw,
            top,
            global_subrs,
            charstrings,
            local_subrs,
            sid_to_gid,
        })
    }

    fn parse_cff2(data: &'a [u8]) -> FontDepotResult<Self> {
        let header_len = *data.get(2).ok_or_else(truncated)? as usize;
        if header_len < 5 {
            return Err(malformed("CFF2 header too short"));
        }
        let top_len = be_u16(data, 3).ok_or_else(truncated)? as usize;
        let top = parse_dict(slice(data, header_len, top_len)?)?;
        let global_subrs = read_index(data, header_len + top_len, true)?;
        let charstrings = Self::charstrings(data, &top, true)?;

        Ok(Self {
            tag: *b"CFF2",
            data,
            cff2: true,
            header: slice(data, 0, header_len)?,
            name_index: &[],
            string_index: &[],
            top,
            global_subrs,
            charstrings,
            local_subrs: None,
            sid_to_gid: HashMap::new(),
        })
    }

    fn charstrings(data: &'a [u8], top: &[DictEntry<'a>], wide: bool) -> FontDepotResult<Index<'a>> {
        let offset = first_offset(top, OP_CHARSTRINGS)?
            .ok_or_else(|| malformed("Top DICT has no CharStrings"))?;
        read_index(data, offset, wide)
    }

    pub(crate) fn tag(&self) -> Tag {
        self.tag
    }

    /// Base and accent glyphs of a `seac`-style `endchar`
    pub(crate) fn accent_components(&self, gid: u16) -> Option<(u16, u16)> {
        if self.sid_to_gid.is_empty() {
            return None;
        }
        let charstring = self.charstrings.items.get(gid as usize)?;
        let mut scan = CharstringScan {
            cff: self,
            stack: Vec::new(),
            stems: 0,
        };
        let Flow::End(Some((base, accent))) = scan.run(charstring, 0)? else {
            return None;
        };
        let glyph = |code| {
            standard_encoding_sid(code).and_then(|sid| self.sid_to_gid.get(&sid).copied())
        };
        Some((glyph(base)?, glyph(accent)?))
    }

    /// The table with every glyph outside `keep` reduced to an empty
    /// charstring
    pub(crate) fn trim(&self, keep: &BTreeSet<u16>) -> FontDepotResult<Vec<u8>> {
        let empty: &[u8] = if self.cff2 { &[] } else { &[ENDCHAR] };
        let charstrings: Vec<&[u8]> = self
            .charstrings
            .items
            .iter()
            .enumerate()
            .map(|(gid, cs)| if keep.contains(&(gid as u16)) { *cs } else { empty })
            .collect();
        let charstrings = write_index(&charstrings, self.cff2);

        let parts = self.parts()?;
        let (first, placement) = self.assemble(&parts, &charstrings, &Placement::default());
        let (out, settled) = self.assemble(&parts, &charstrings, &placement);
        if settled != placement || out.len() != first.len() {
            return Err(FontDepotError::Internal("CFF layout did not settle".into()));
        }
        Ok(out)
    }

    fn parts(&self) -> FontDepotResult<Parts<'a>> {
        let num_glyphs = self.charstrings.items.len();
        let data = self.data;

        let charset = match first_offset(&self.top, OP_CHARSET)? {
            Some(at) if !self.cff2 && at >= PREDEFINED_CHARSETS => {
                let (len, _) = read_charset(data, at, num_glyphs)?;
                Some(slice(data, at, len)?)
            }
            _ => None,
        };
        let encoding = match first_offset(&self.top, OP_ENCODING)? {
            Some(at) if !self.cff2 && at >= PREDEFINED_ENCODINGS => {
                Some(slice(data, at, encoding_len(data, at)?)?)
            }
            _ => None,
        };
        let fdselect = match first_offset(&self.top, OP_FDSELECT)? {
            Some(at) => Some(slice(data, at, fdselect_len(data, at, num_glyphs)?)?),
            None => None,
        };
        let vstore = match first_offset(&self.top, OP_VSTORE)? {
            Some(at) => {
                let len = be_u16(data, at).ok_or_else(truncated)? as usize;
                Some(slice(data, at, 2 + len)?)
            }
            None => None,
        };

        let mut font_dicts = Vec::new();
        let mut fd_privates = Vec::new();
        if let Some(at) = first_offset(&self.top, OP_FDARRAY)? {
            for dict in read_index(data, at, self.cff2)?.items {
                let entries = parse_dict(dict)?;
                let private = match private_operands(&entries)? {
                    Some((size, offset)) => Some(private_block(data, size, offset, self.cff2)?.0),
                    None => None,
                };
                font_dicts.push(entries);
                fd_privates.push(private);
            }
        }

        let top_private = match private_operands(&self.top)? {
            Some((size, offset)) if !self.cff2 => Some(private_block(data, size, offset, false)?.0),
            _ => None,
        };

        Ok(Parts {
            charset,
            encoding,
            fdselect,
            vstore,
            font_dicts,
            top_private,
            fd_privates,
        })
    }

    /// Lay the table out with offsets taken from `at`, and report where
    /// each block actually landed
    fn assemble(&self, parts: &Parts<'_>, charstrings: &[u8], at: &Placement) -> (Vec<u8>, Placement) {
        let mut patch = HashMap::new();
        patch.insert(OP_CHARSTRINGS, vec![at.charstrings]);
        if parts.charset.is_some() {
            patch.insert(OP_CHARSET, vec![at.charset]);
        }
        if parts.encoding.is_some() {
            patch.insert(OP_ENCODING, vec![at.encoding]);
        }
        if parts.fdselect.is_some() {
            patch.insert(OP_FDSELECT, vec![at.fdselect]);
        }
        if parts.vstore.is_some() {
            patch.insert(OP_VSTORE, vec![at.vstore]);
        }
        if !parts.font_dicts.is_empty() {
            patch.insert(OP_FDARRAY, vec![at.fdarray]);
        }
        if let Some(private) = &parts.top_private {
            patch.insert(OP_PRIVATE, vec![private.dict_len, at.top_private]);
        }
        let top = write_dict(&self.top, &patch);

        let mut out = Vec::new();
        if self.cff2 {
            out.extend_from_slice(self.header);
            put_u16(&mut out, 3, top.len() as u16);
            out.extend_from_slice(&top);
        } else {
            out.extend_from_slice(self.header);
            out.extend_from_slice(self.name_index);
            out.extend_from_slice(&write_index(&[top], false));
            out.extend_from_slice(self.string_index);
        }
        out.extend_from_slice(self.global_subrs.raw);

        let mut placed = Placement::default();
        if let Some(charset) = parts.charset {
            placed.charset = out.len();
            out.extend_from_slice(charset);
        }
        if let Some(encoding) = parts.encoding {
            placed.encoding = out.len();
            out.extend_from_slice(encoding);
        }
        if let Some(fdselect) = parts.fdselect {
            placed.fdselect = out.len();
            out.extend_from_slice(fdselect);
        }
        placed.charstrings = out.len();
        out.extend_from_slice(charstrings);
        if let Some(vstore) = parts.vstore {
            placed.vstore = out.len();
            out.extend_from_slice(vstore);
        }

        if !parts.font_dicts.is_empty() {
            placed.fdarray = out.len();
            let dicts: Vec<Vec<u8>> = parts
                .font_dicts
                .iter()
                .zip(&parts.fd_privates)
                .enumerate()
                .map(|(i, (entries, private))| {
                    let mut patch = HashMap::new();
                    if let Some(private) = private {
                        let offset = at.fd_privates.get(i).copied().unwrap_or(0);
                        patch.insert(OP_PRIVATE, vec![private.dict_len, offset]);
                    }
                    write_dict(entries, &patch)
                })
                .collect();
            out.extend_from_slice(&write_index(&dicts, self.cff2));
        }

        if let Some(private) = &parts.top_private {
            placed.top_private = out.len();
            out.extend_from_slice(&private.bytes);
        }
        for private in &parts.fd_privates {
            placed.fd_privates.push(out.len());
            if let Some(private) = private {
                out.extend_from_slice(&private.bytes);
            }
        }

        (out, placed)
    }
}

enum Flow {
    Continue,
    Return,
    /// `endchar`, with the base and accent codes when it is a `seac`
    End(Option<(i32, i32)>),
}

/// Just enough of a Type 2 interpreter to find `seac` accents: tracks the
/// operand stack and stem count and follows subroutine calls
struct CharstringScan<'c, 'a> {
    cff: &'c CffOutlines<'a>,
    stack: Vec<i32>,
    stems: usize,
}

impl CharstringScan<'_, '_> {
    /// `None` when the charstring is malformed
    fn run(&mut self, code: &[u8], depth: usize) -> Option<Flow> {
        if depth > MAX_SUBR_DEPTH {
            return None;
        }
        let mut pos = 0;
        while let Some(&b0) = code.get(pos) {
            pos += 1;
            match b0 {
                28 => {
                    self.stack.push(i32::from(be_u16(code, pos)? as i16));
                    pos += 2;
                }
                32..=246 => self.stack.push(i32::from(b0) - 139),
                247..=254 => {
                    let b1 = i32::from(*code.get(pos)?);
                    pos += 1;
                    let value = if b0 <= 250 {
                        (i32::from(b0) - 247) * 256 + b1 + 108
                    } else {
                        -(i32::from(b0) - 251) * 256 - b1 - 108
                    };
                    self.stack.push(value);
                }
                255 => {
                    self.stack.push((be_u32(code, pos)? as i32) >> 16);
                    pos += 4;
                }
                // hstem, vstem, hstemhm, vstemhm
                1 | 3 | 18 | 23 => {
                    self.stems += self.stack.len() / 2;
                    self.stack.clear();
                }
                // hintmask, cntrmask (with an implicit vstem)
                19 | 20 => {
                    self.stems += self.stack.len() / 2;
                    self.stack.clear();
                    pos += self.stems.div_ceil(8);
                }
                10 | 29 => {
                    let index = i64::from(self.stack.pop()?);
                    let subrs = if b0 == 10 {
                        self.cff.local_subrs.as_ref()?
                    } else {
                        &self.cff.global_subrs
                    };
                    let biased = usize::try_from(index + subr_bias(subrs.items.len())).ok()?;
                    let subr = *subrs.items.get(biased)?;
                    match self.run(subr, depth + 1)? {
                        Flow::Continue | Flow::Return => {}
                        end => return Some(end),
                    }
                }
                11 => return Some(Flow::Return),
                ENDCHAR => {
                    let n = self.stack.len();
                    let seac = (n >= 4).then(|| (self.stack[n - 2], self.stack[n - 1]));
                    return Some(Flow::End(seac));
                }
                12 => {
                    pos += 1;
                    self.stack.clear();
                }
                _ => self.stack.clear(),
            }
        }
        Some(Flow::Continue)
    }
}
