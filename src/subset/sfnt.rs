//! SFNT container reading and writing
//!
//! Just enough of the OpenType table directory to pull tables out of a
//! source font and to assemble a new one with valid checksums.

use crate::error::{FontDepotError, FontDepotResult};

/// Four-byte table tag
pub type Tag = [u8; 4];

pub const TRUETYPE_FLAVOR: u32 = 0x0001_0000;
pub const CFF_FLAVOR: u32 = u32::from_be_bytes(*b"OTTO");
const TTC_TAG: &[u8; 4] = b"ttcf";
const CHECKSUM_MAGIC: u32 = 0xB1B0_AFBA;

pub fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn be_i16(data: &[u8], offset: usize) -> Option<i16> {
    be_u16(data, offset).map(|v| v as i16)
}

pub fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Render a tag for messages (`b"OS/2"` -> `OS/2`)
pub fn tag_name(tag: &Tag) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

/// Parsed table directory of one font face, borrowing the source bytes
#[derive(Debug)]
pub struct SfntReader<'a> {
    flavor: u32,
    tables: Vec<(Tag, &'a [u8])>,
}

impl<'a> SfntReader<'a> {
    /// Parse a bare sfnt, or the first face of a collection
    pub fn parse(data: &'a [u8]) -> FontDepotResult<Self> {
        let header_offset = if data.get(0..4) == Some(TTC_TAG.as_slice()) {
            be_u32(data, 12)
                .ok_or_else(|| FontDepotError::malformed("ttcf", "truncated header"))?
                as usize
        } else {
            0
        };

        let flavor = be_u32(data, header_offset)
            .ok_or_else(|| FontDepotError::malformed("sfnt", "truncated header"))?;
        let num_tables = be_u16(data, header_offset + 4)
            .ok_or_else(|| FontDepotError::malformed("sfnt", "truncated header"))?
            as usize;

        let mut tables = Vec::with_capacity(num_tables);
        for i in 0..num_tables {
            let record = header_offset + 12 + i * 16;
            let tag: Tag = data
                .get(record..record + 4)
                .and_then(|t| t.try_into().ok())
                .ok_or_else(|| FontDepotError::malformed("sfnt", "truncated table directory"))?;
            let (offset, length) = match (be_u32(data, record + 8), be_u32(data, record + 12)) {
                (Some(offset), Some(length)) => (offset as usize, length as usize),
                _ => return Err(FontDepotError::malformed("sfnt", "truncated table record")),
            };
            let body = offset
                .checked_add(length)
                .and_then(|end| data.get(offset..end))
                .ok_or_else(|| {
                    FontDepotError::malformed(&tag_name(&tag), "table extends past end of file")
                })?;
            tables.push((tag, body));
        }

        Ok(Self { flavor, tables })
    }

    pub fn flavor(&self) -> u32 {
        self.flavor
    }

    pub fn table(&self, tag: &Tag) -> Option<&'a [u8]> {
        self.tables
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, body)| *body)
    }

    /// Table that must exist for the operation at hand
    pub fn require(&self, tag: &Tag) -> FontDepotResult<&'a [u8]> {
        self.table(tag)
            .ok_or_else(|| FontDepotError::malformed(&tag_name(tag), "table missing"))
    }

    pub fn tables(&self) -> impl Iterator<Item = (Tag, &'a [u8])> + '_ {
        self.tables.iter().copied()
    }
}

/// OpenType table checksum (sum of big-endian u32 words, zero padded)
pub fn table_checksum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for word in &mut chunks {
        sum = sum.wrapping_add(u32::from_be_bytes([word[0], word[1], word[2], word[3]]));
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut last = [0u8; 4];
        last[..rest.len()].copy_from_slice(rest);
        sum = sum.wrapping_add(u32::from_be_bytes(last));
    }
    sum
}

/// Search-range triple for a binary-searchable array of `count` entries
pub fn search_params(count: u16, entry_size: u16) -> (u16, u16, u16) {
    if count == 0 {
        return (0, 0, 0);
    }
    let entry_selector = 15 - count.leading_zeros() as u16;
    let search_range = (1u16 << entry_selector) * entry_size;
    let range_shift = (count * entry_size).saturating_sub(search_range);
    (search_range, entry_selector, range_shift)
}

/// Assemble an sfnt. Tables are sorted by tag and `head.checkSumAdjustment`
/// is recomputed, so the output only depends on the table contents.
pub fn write_sfnt(flavor: u32, mut tables: Vec<(Tag, Vec<u8>)>) -> Vec<u8> {
    tables.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some((_, head)) = tables.iter_mut().find(|(tag, _)| tag == b"head") {
        if head.len() >= 12 {
            put_u32(head, 8, 0);
        }
    }

    let num_tables = tables.len() as u16;
    let (search_range, entry_selector, range_shift) = search_params(num_tables, 16);

    let mut out = Vec::new();
    out.extend_from_slice(&flavor.to_be_bytes());
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());

    let mut offset = 12 + tables.len() * 16;
    let mut head_offset = None;
    for (tag, data) in &tables {
        if tag == b"head" {
            head_offset = Some(offset);
        }
        out.extend_from_slice(tag);
        out.extend_from_slice(&table_checksum(data).to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        offset += padded_len(data.len());
    }

    for (_, data) in &tables {
        out.extend_from_slice(data);
        out.resize(padded_len(out.len()), 0);
    }

    if let Some(head_offset) = head_offset {
        if head_offset + 12 <= out.len() {
            let adjustment = CHECKSUM_MAGIC.wrapping_sub(table_checksum(&out));
            put_u32(&mut out, head_offset + 8, adjustment);
        }
    }

    out
}

pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_pads_tail() {
        assert_eq!(table_checksum(&[0, 0, 0, 1, 0, 0, 0, 2]), 3);
        assert_eq!(table_checksum(&[1]), 0x0100_0000);
    }

    #[test]
    fn search_params_match_opentype_example() {
        // 9 tables: searchRange 128, entrySelector 3, rangeShift 16
        assert_eq!(search_params(9, 16), (128, 3, 16));
        assert_eq!(search_params(1, 16), (16, 0, 0));
    }

    #[test]
    fn write_then_read_tables() {
        let head = vec![0u8; 54];
        let bytes = write_sfnt(
            TRUETYPE_FLAVOR,
            vec![(*b"zzzz", vec![1, 2, 3]), (*b"head", head)],
        );
        let reader = SfntReader::parse(&bytes).unwrap();
        assert_eq!(reader.flavor(), TRUETYPE_FLAVOR);
        assert_eq!(reader.table(b"zzzz"), Some(&[1u8, 2, 3][..]));
        assert!(reader.table(b"glyf").is_none());

        // Whole-file checksum lands on the magic value once adjusted
        assert_eq!(table_checksum(&bytes), CHECKSUM_MAGIC);
    }

    #[test]
    fn truncated_directory_is_malformed() {
        let mut bytes = write_sfnt(TRUETYPE_FLAVOR, vec![(*b"abcd", vec![0; 8])]);
        bytes.truncate(20);
        assert!(matches!(
            SfntReader::parse(&bytes),
            Err(FontDepotError::MalformedTable { .. })
        ));
    }
}
