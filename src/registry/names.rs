//! Family and style extraction from font tables

use crate::subset::closure::mapped_codepoints;
use crate::subset::UnicodeRanges;
use serde::{Deserialize, Serialize};
use std::fmt;
use ttf_parser::{name_id, Face, PlatformId};

const ENGLISH_US: u16 = 0x0409;

/// CSS `font-style`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    Normal,
    Italic,
}

impl FontStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Italic => "italic",
        }
    }
}

impl fmt::Display for FontStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the registry needs from a parsed face
#[derive(Debug, Clone)]
pub struct FaceInfo {
    pub family: String,
    pub style: FontStyle,
    pub weight: u16,
    pub coverage: UnicodeRanges,
}

impl FaceInfo {
    /// Read names and style, falling back to `stem` as the family and
    /// 400/normal when the tables do not say.
    pub fn read(face: &Face<'_>, stem: &str) -> Self {
        let family = family_name(face).unwrap_or_else(|| stem.to_string());

        let has_os2 = face.tables().os2.is_some();
        let italic = if has_os2 {
            face.is_italic() || face.is_oblique()
        } else {
            stem.to_lowercase().contains("italic")
        };
        let weight = if has_os2 {
            face.weight().to_number().clamp(100, 900)
        } else {
            400
        };

        Self {
            family,
            style: if italic { FontStyle::Italic } else { FontStyle::Normal },
            weight,
            coverage: UnicodeRanges::from_codepoints(mapped_codepoints(face)),
        }
    }
}

/// Typographic family (id 16) if present, else family (id 1). English
/// Windows records win over other languages.
fn family_name(face: &Face<'_>) -> Option<String> {
    for id in [name_id::TYPOGRAPHIC_FAMILY, name_id::FAMILY] {
        let mut fallback = None;
        for name in face.names() {
            if name.name_id != id {
                continue;
            }
            let Some(text) = name.to_string().map(|s| s.trim().to_string()) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            if name.platform_id == PlatformId::Windows && name.language_id == ENGLISH_US {
                return Some(text);
            }
            fallback.get_or_insert(text);
        }
        if fallback.is_some() {
            return fallback;
        }
    }
    None
}
