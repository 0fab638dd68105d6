//! WOFF2 container
//!
//! Tables are stored with null transforms (including `glyf`/`loca`) and
//! compressed as one brotli stream. The decoder exists to verify cached
//! output and for tests; it only accepts what the encoder produces plus
//! other null-transform files.

use crate::error::{FontDepotError, FontDepotResult};
use crate::subset::sfnt::{be_u16, be_u32, padded_len, write_sfnt, SfntReader, Tag};
use std::io::{Read, Write};

const SIGNATURE: u32 = 0x774F_4632;
const HEADER_LEN: usize = 48;
const EXPLICIT_TAG: u8 = 63;
const NULL_GLYF_TRANSFORM: u8 = 3 << 6;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 11;
const BROTLI_WINDOW: u32 = 22;

/// Tags with a one-byte encoding in the table directory
const KNOWN_TAGS: [&Tag; 63] = [
    b"cmap", b"head", b"hhea", b"hmtx", b"maxp", b"name", b"OS/2", b"post", b"cvt ", b"fpgm",
    b"glyf", b"loca", b"prep", b"CFF ", b"VORG", b"EBDT", b"EBLC", b"gasp", b"hdmx", b"kern",
    b"LTSH", b"PCLT", b"VDMX", b"vhea", b"vmtx", b"BASE", b"GDEF", b"GPOS", b"GSUB", b"EBSC",
    b"JSTF", b"MATH", b"CBDT", b"CBLC", b"COLR", b"CPAL", b"SVG ", b"sbix", b"acnt", b"avar",
    b"bdat", b"bloc", b"bsln", b"cvar", b"fdsc", b"feat", b"fmtx", b"fvar", b"gvar", b"hsty",
    b"just", b"lcar", b"mort", b"morx", b"opbd", b"prop", b"trak", b"Zapf", b"Silf", b"Glat",
    b"Gloc", b"Feat", b"Sill",
];

fn known_tag_index(tag: &Tag) -> Option<u8> {
    KNOWN_TAGS.iter().position(|known| *known == tag).map(|i| i as u8)
}

fn write_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut bytes = [0u8; 5];
    let mut len = 0;
    loop {
        bytes[len] = (value & 0x7F) as u8;
        len += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..len).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(bytes[i] | continuation);
    }
}

fn read_base128(data: &[u8], pos: &mut usize) -> FontDepotResult<u32> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| FontDepotError::malformed("woff2", "truncated directory"))?;
        *pos += 1;
        if i == 0 && byte == 0x80 {
            return Err(FontDepotError::malformed("woff2", "base128 leading zero"));
        }
        if value & 0xFE00_0000 != 0 {
            return Err(FontDepotError::malformed("woff2", "base128 overflow"));
        }
        value = (value << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FontDepotError::malformed("woff2", "base128 too long"))
}

/// Tag order in the directory: sorted, with `loca` right after `glyf`
fn directory_order(mut tables: Vec<(Tag, &[u8])>) -> Vec<(Tag, &[u8])> {
    tables.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some(loca_at) = tables.iter().position(|(tag, _)| tag == b"loca") {
        let loca = tables.remove(loca_at);
        let glyf_at = tables.iter().position(|(tag, _)| tag == b"glyf");
        match glyf_at {
            Some(glyf_at) => tables.insert(glyf_at + 1, loca),
            None => tables.insert(loca_at, loca),
        }
    }
    tables
}

/// Encode an sfnt as WOFF2
pub fn encode(sfnt: &[u8]) -> FontDepotResult<Vec<u8>> {
    let reader = SfntReader::parse(sfnt)?;
    let tables = directory_order(reader.tables().collect());

    let mut directory = Vec::new();
    let mut stream = Vec::new();
    let mut total_sfnt_size = 12 + 16 * tables.len();

    for (tag, data) in &tables {
        let flags = match known_tag_index(tag) {
            Some(index) if tag == b"glyf" || tag == b"loca" => index | NULL_GLYF_TRANSFORM,
            Some(index) => index,
            None => EXPLICIT_TAG,
        };
        directory.push(flags);
        if flags & 0x3F == EXPLICIT_TAG {
            directory.extend_from_slice(tag);
        }
        write_base128(&mut directory, data.len() as u32);

        stream.extend_from_slice(data);
        total_sfnt_size += padded_len(data.len());
    }

    let mut compressor = brotli::CompressorWriter::new(
        Vec::new(),
        BROTLI_BUFFER,
        BROTLI_QUALITY,
        BROTLI_WINDOW,
    );
    compressor
        .write_all(&stream)
        .map_err(|e| FontDepotError::Encode(e.to_string()))?;
    let compressed = compressor.into_inner();

    let length = padded_len(HEADER_LEN + directory.len() + compressed.len());

    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&SIGNATURE.to_be_bytes());
    out.extend_from_slice(&reader.flavor().to_be_bytes());
    out.extend_from_slice(&(length as u32).to_be_bytes());
    out.extend_from_slice(&(tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(total_sfnt_size as u32).to_be_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    // No extended metadata or private data
    out.extend_from_slice(&[0u8; 20]);

    out.extend_from_slice(&directory);
    out.extend_from_slice(&compressed);
    out.resize(length, 0);

    Ok(out)
}

/// Decode a null-transform WOFF2 file back into an sfnt
pub fn decode(data: &[u8]) -> FontDepotResult<Vec<u8>> {
    let truncated = || FontDepotError::malformed("woff2", "truncated header");

    if be_u32(data, 0).ok_or_else(truncated)? != SIGNATURE {
        return Err(FontDepotError::malformed("woff2", "bad signature"));
    }
    let flavor = be_u32(data, 4).ok_or_else(truncated)?;
    let num_tables = be_u16(data, 12).ok_or_else(truncated)? as usize;
    let compressed_len = be_u32(data, 20).ok_or_else(truncated)? as usize;

    let mut pos = HEADER_LEN;
    let mut entries: Vec<(Tag, usize)> = Vec::with_capacity(num_tables);
    for _ in 0..num_tables {
        let flags = *data.get(pos).ok_or_else(truncated)?;
        pos += 1;
        let index = flags & 0x3F;
        let tag: Tag = if index == EXPLICIT_TAG {
            let tag = data
                .get(pos..pos + 4)
                .and_then(|t| t.try_into().ok())
                .ok_or_else(truncated)?;
            pos += 4;
            tag
        } else {
            *KNOWN_TAGS[index as usize]
        };

        let transform = flags >> 6;
        let is_glyf = &tag == b"glyf" || &tag == b"loca";
        if (is_glyf && transform != 3) || (!is_glyf && transform != 0) {
            return Err(FontDepotError::malformed(
                "woff2",
                "transformed tables are not supported",
            ));
        }

        let length = read_base128(data, &mut pos)? as usize;
        entries.push((tag, length));
    }

    let compressed = data
        .get(pos..pos + compressed_len)
        .ok_or_else(|| FontDepotError::malformed("woff2", "truncated data"))?;
    let mut stream = Vec::new();
    brotli::Decompressor::new(compressed, BROTLI_BUFFER)
        .read_to_end(&mut stream)
        .map_err(|e| FontDepotError::malformed("woff2", format!("brotli: {}", e)))?;

    let mut offset = 0;
    let mut tables = Vec::with_capacity(entries.len());
    for (tag, length) in entries {
        let body = stream
            .get(offset..offset + length)
            .ok_or_else(|| FontDepotError::malformed("woff2", "stream shorter than directory"))?;
        tables.push((tag, body.to_vec()));
        offset += length;
    }

    Ok(write_sfnt(flavor, tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subset::sfnt::TRUETYPE_FLAVOR;

    fn sample_sfnt() -> Vec<u8> {
        write_sfnt(
            TRUETYPE_FLAVOR,
            vec![
                (*b"head", vec![0u8; 54]),
                (*b"loca", vec![0, 0, 0, 4]),
                (*b"glyf", vec![0, 1, 2, 3]),
                (*b"Zzzz", b"private table".to_vec()),
            ],
        )
    }

    #[test]
    fn header_fields() {
        let sfnt = sample_sfnt();
        let woff2 = encode(&sfnt).unwrap();
        assert_eq!(&woff2[..4], b"wOF2");
        assert_eq!(be_u32(&woff2, 8), Some(woff2.len() as u32));
        assert_eq!(be_u16(&woff2, 12), Some(4));
        assert_eq!(be_u32(&woff2, 16), Some(sfnt.len() as u32));
        assert_eq!(woff2.len() % 4, 0);
    }

    #[test]
    fn loca_follows_glyf() {
        let sfnt = sample_sfnt();
        let reader = SfntReader::parse(&sfnt).unwrap();
        let order: Vec<Tag> = directory_order(reader.tables().collect())
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();
        assert_eq!(order, vec![*b"Zzzz", *b"glyf", *b"loca", *b"head"]);
    }

    #[test]
    fn decode_restores_sfnt() {
        let sfnt = sample_sfnt();
        let decoded = decode(&encode(&sfnt).unwrap()).unwrap();
        assert_eq!(decoded, sfnt);
    }

    #[test]
    fn base128_encoding() {
        let mut out = Vec::new();
        write_base128(&mut out, 63);
        write_base128(&mut out, 300);
        assert_eq!(out, vec![63, 0x82, 0x2C]);

        let mut pos = 0;
        assert_eq!(read_base128(&out, &mut pos).unwrap(), 63);
        assert_eq!(read_base128(&out, &mut pos).unwrap(), 300);
    }

    #[test]
    fn rejects_non_woff2() {
        assert!(decode(b"wOFF and some more bytes to be long enough").is_err());
    }
}
