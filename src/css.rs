//! `@font-face` CSS
//!
//! Parses the family/subset/display parameters of a CSS request (both the
//! `css` and `css2` family syntaxes) and renders one `@font-face` block per
//! variant and subset, in the same shape the public web-font API emits.

use crate::cache::CacheKey;
use crate::error::{FontDepotError, FontDepotResult};
use crate::registry::FontStyle;
use crate::subset::{SubsetCatalog, SubsetSpec, UnicodeRanges};
use std::fmt;

const DEFAULT_WEIGHT: u16 = 400;

/// Requested weight: one value, or a `css2` range such as `100..900`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSpec {
    Exact(u16),
    Range(u16, u16),
}

impl WeightSpec {
    pub fn contains(&self, weight: u16) -> bool {
        match *self {
            Self::Exact(w) => w == weight,
            Self::Range(lo, hi) => (lo..=hi).contains(&weight),
        }
    }

    /// Weight to aim for when nothing matches exactly
    pub fn target(&self) -> u16 {
        match *self {
            Self::Exact(w) => w,
            Self::Range(lo, _) => lo,
        }
    }
}

/// One requested variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantRequest {
    pub weight: WeightSpec,
    pub style: FontStyle,
}

impl VariantRequest {
    pub const fn regular() -> Self {
        Self {
            weight: WeightSpec::Exact(DEFAULT_WEIGHT),
            style: FontStyle::Normal,
        }
    }
}

/// One requested family with its variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyRequest {
    pub name: String,
    pub variants: Vec<VariantRequest>,
}

impl FamilyRequest {
    /// Parse `Name`, `Name:700,700italic` or `Name:ital,wght@0,400;1,700`.
    /// `+` in the name stands for a space.
    pub fn parse(selector: &str) -> FontDepotResult<Self> {
        let (name, variants) = match selector.split_once(':') {
            Some((name, variants)) => (name, Some(variants)),
            None => (selector, None),
        };

        let name = name.replace('+', " ").trim().to_string();
        if name.is_empty() {
            return Err(invalid(selector, "empty family name"));
        }

        let mut parsed = match variants.map(str::trim) {
            None | Some("") => vec![VariantRequest::regular()],
            Some(v) if v.contains('@') => parse_axis_tuples(selector, v)?,
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(|token| parse_legacy_variant(selector, token))
                .collect::<FontDepotResult<Vec<_>>>()?,
        };
        let mut seen = Vec::with_capacity(parsed.len());
        parsed.retain(|variant| {
            let first = !seen.contains(variant);
            seen.push(*variant);
            first
        });
        if parsed.is_empty() {
            parsed.push(VariantRequest::regular());
        }

        Ok(Self {
            name,
            variants: parsed,
        })
    }
}

fn invalid(selector: &str, reason: impl Into<String>) -> FontDepotError {
    FontDepotError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

fn parse_weight(selector: &str, value: &str) -> FontDepotResult<u16> {
    let weight: u16 = value
        .trim()
        .parse()
        .map_err(|_| invalid(selector, format!("'{}' is not a weight", value)))?;
    if !(1..=1000).contains(&weight) {
        return Err(invalid(selector, format!("weight {} is outside 1..1000", weight)));
    }
    Ok(weight)
}

/// `css` syntax tokens: `400`, `italic`, `700italic`, `700i`, `bold`, `regular`
fn parse_legacy_variant(selector: &str, token: &str) -> FontDepotResult<VariantRequest> {
    let lower = token.to_ascii_lowercase();
    let (weight_part, style) = if let Some(rest) = lower.strip_suffix("italic") {
        (rest.to_string(), FontStyle::Italic)
    } else if let Some(rest) = lower.strip_suffix('i').filter(|r| !r.is_empty()) {
        (rest.to_string(), FontStyle::Italic)
    } else if lower == "i" {
        (String::new(), FontStyle::Italic)
    } else {
        (lower.clone(), FontStyle::Normal)
    };

    let weight = match weight_part.as_str() {
        "" | "regular" => DEFAULT_WEIGHT,
        "bold" | "b" => 700,
        digits => parse_weight(selector, digits)?,
    };

    Ok(VariantRequest {
        weight: WeightSpec::Exact(weight),
        style,
    })
}

/// `css2` syntax: `wght@400;700`, `ital@0;1`, `ital,wght@0,400;1,100..900`
fn parse_axis_tuples(selector: &str, axes_part: &str) -> FontDepotResult<Vec<VariantRequest>> {
    let (axes, tuples) = axes_part
        .split_once('@')
        .ok_or_else(|| invalid(selector, "missing '@'"))?;
    let axes: Vec<&str> = axes.split(',').map(str::trim).collect();
    for axis in &axes {
        if *axis != "ital" && *axis != "wght" {
            return Err(invalid(selector, format!("unsupported axis '{}'", axis)));
        }
    }

    let mut variants = Vec::new();
    for tuple in tuples.split(';').map(str::trim).filter(|t| !t.is_empty()) {
        let values: Vec<&str> = tuple.split(',').map(str::trim).collect();
        if values.len() != axes.len() {
            return Err(invalid(
                selector,
                format!("'{}' does not match axes {}", tuple, axes.join(",")),
            ));
        }

        let mut variant = VariantRequest::regular();
        for (axis, value) in axes.iter().zip(values) {
            match *axis {
                "ital" => {
                    variant.style = match value {
                        "0" => FontStyle::Normal,
                        "1" => FontStyle::Italic,
                        _ => return Err(invalid(selector, format!("ital must be 0 or 1, got '{}'", value))),
                    }
                }
                _ => {
                    variant.weight = match value.split_once("..") {
                        Some((lo, hi)) => {
                            let (lo, hi) = (parse_weight(selector, lo)?, parse_weight(selector, hi)?);
                            if lo > hi {
                                return Err(invalid(selector, format!("empty weight range '{}'", value)));
                            }
                            WeightSpec::Range(lo, hi)
                        }
                        None => WeightSpec::Exact(parse_weight(selector, value)?),
                    }
                }
            }
        }
        variants.push(variant);
    }
    Ok(variants)
}

/// A parsed CSS request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssRequest {
    pub families: Vec<FamilyRequest>,
    /// `None` means every catalog subset the font covers
    pub subsets: Option<Vec<SubsetSpec>>,
    pub display: String,
}

impl CssRequest {
    /// Build from request parameters. Each `families` item may itself hold
    /// several `|`-separated families.
    pub fn parse(
        families: &[String],
        subset: Option<&str>,
        unicode_range: Option<&str>,
        display: Option<&str>,
        default_display: &str,
    ) -> FontDepotResult<Self> {
        let families = families
            .iter()
            .flat_map(|item| item.split('|'))
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(FamilyRequest::parse)
            .collect::<FontDepotResult<Vec<_>>>()?;
        if families.is_empty() {
            return Err(invalid("", "no family given"));
        }

        let subsets = match (unicode_range, subset) {
            (Some(range), _) => Some(vec![SubsetSpec::Custom(UnicodeRanges::parse(range)?)]),
            (None, Some(names)) => {
                let catalog = SubsetCatalog::standard();
                let specs = names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|name| catalog.get(name).map(|def| SubsetSpec::Named(def.name)))
                    .collect::<FontDepotResult<Vec<_>>>()?;
                (!specs.is_empty()).then_some(specs)
            }
            (None, None) => None,
        };

        let display = display.unwrap_or(default_display).trim().to_string();
        if display.is_empty() || !display.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            return Err(invalid(&display, "display must be a CSS keyword"));
        }

        Ok(Self {
            families,
            subsets,
            display,
        })
    }
}

/// One `@font-face` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceRule {
    /// Shown in the leading comment (`latin`, `custom`, ...)
    pub label: String,
    pub family: String,
    pub style: FontStyle,
    pub weight: u16,
    pub display: String,
    pub url: String,
    pub unicode_range: String,
}

impl fmt::Display for FaceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/* {} */", self.label)?;
        writeln!(f, "@font-face {{")?;
        writeln!(f, "  font-family: '{}';", quoted_body(&self.family))?;
        writeln!(f, "  font-style: {};", self.style)?;
        writeln!(f, "  font-weight: {};", self.weight)?;
        writeln!(f, "  font-display: {};", self.display)?;
        writeln!(f, "  src: url({}) format('woff2');", self.url)?;
        writeln!(f, "  unicode-range: {};", self.unicode_range)?;
        writeln!(f, "}}")
    }
}

/// Body of a single-quoted CSS string
fn quoted_body(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\a "),
            ch => out.push(ch),
        }
    }
    out
}

/// Rendered stylesheet plus what had to be left out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CssOutput {
    pub css: String,
    pub warnings: Vec<String>,
}

/// Turns face rules into a stylesheet with absolute subset URLs
#[derive(Debug, Clone)]
pub struct CssRenderer {
    base_url: String,
    subset_path: String,
}

impl CssRenderer {
    pub fn new(base_url: &str, subset_path: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            subset_path: subset_path.trim_matches('/').to_string(),
        }
    }

    /// Absolute URL of a cached subset
    pub fn url_for(&self, key: &CacheKey) -> String {
        if self.subset_path.is_empty() {
            format!("{}/{}", self.base_url, key.file_name())
        } else {
            format!("{}/{}/{}", self.base_url, self.subset_path, key.file_name())
        }
    }

    /// Blocks in the given order, separated by nothing; each ends with `}\n`
    pub fn render(&self, rules: &[FaceRule], warnings: Vec<String>) -> CssOutput {
        let css = rules.iter().map(ToString::to_string).collect::<String>();
        CssOutput { css, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(weight: u16, style: FontStyle) -> VariantRequest {
        VariantRequest {
            weight: WeightSpec::Exact(weight),
            style,
        }
    }

    #[test]
    fn plain_family_defaults_to_regular() {
        let family = FamilyRequest::parse("Open+Sans").unwrap();
        assert_eq!(family.name, "Open Sans");
        assert_eq!(family.variants, vec![VariantRequest::regular()]);
    }

    #[test]
    fn legacy_variants() {
        let family = FamilyRequest::parse("Example:400,700,italic,700italic,bold").unwrap();
        assert_eq!(
            family.variants,
            vec![
                exact(400, FontStyle::Normal),
                exact(700, FontStyle::Normal),
                exact(400, FontStyle::Italic),
                exact(700, FontStyle::Italic),
            ]
        );
    }

    #[test]
    fn css2_axis_tuples() {
        let family = FamilyRequest::parse("Example:ital,wght@0,400;1,700").unwrap();
        assert_eq!(
            family.variants,
            vec![exact(400, FontStyle::Normal), exact(700, FontStyle::Italic)]
        );

        let ranged = FamilyRequest::parse("Example:wght@100..900").unwrap();
        assert_eq!(ranged.variants[0].weight, WeightSpec::Range(100, 900));
    }

    #[test]
    fn bad_selectors_are_rejected() {
        for selector in ["", ":400", "Example:heavy", "Example:wdth@100", "Example:ital,wght@0", "Example:2000"] {
            assert!(
                matches!(FamilyRequest::parse(selector), Err(FontDepotError::InvalidSelector { .. })),
                "{} should be rejected",
                selector
            );
        }
    }

    #[test]
    fn request_splits_families_and_subsets() {
        let request = CssRequest::parse(
            &["Example|Other:700".to_string()],
            Some("latin, cyrillic"),
            None,
            None,
            "swap",
        )
        .unwrap();
        assert_eq!(request.families.len(), 2);
        assert_eq!(
            request.subsets,
            Some(vec![SubsetSpec::Named("latin"), SubsetSpec::Named("cyrillic")])
        );
        assert_eq!(request.display, "swap");
    }

    #[test]
    fn unknown_subset_is_not_found() {
        let err = CssRequest::parse(&["Example".to_string()], Some("klingon"), None, None, "swap")
            .unwrap_err();
        assert!(matches!(err, FontDepotError::SubsetNotFound(_)));
    }

    #[test]
    fn unicode_range_overrides_subsets() {
        let request = CssRequest::parse(
            &["Example".to_string()],
            Some("latin"),
            Some("U+0041-005A"),
            Some("block"),
            "swap",
        )
        .unwrap();
        let subsets = request.subsets.unwrap();
        assert_eq!(subsets.len(), 1);
        assert_eq!(subsets[0].label(), "custom");
        assert_eq!(request.display, "block");
    }

    #[test]
    fn display_must_be_a_keyword() {
        let err = CssRequest::parse(&["Example".to_string()], None, None, Some("swap;}"), "swap")
            .unwrap_err();
        assert!(matches!(err, FontDepotError::InvalidSelector { .. }));
    }

    #[test]
    fn face_rule_layout() {
        let renderer = CssRenderer::new("http://localhost:8080/", "/s/");
        let key = CacheKey::parse(&"a".repeat(64)).unwrap();
        let rule = FaceRule {
            label: "latin".to_string(),
            family: "Example".to_string(),
            style: FontStyle::Normal,
            weight: 400,
            display: "swap".to_string(),
            url: renderer.url_for(&key),
            unicode_range: "U+0000-00FF, U+0131".to_string(),
        };

        let output = renderer.render(&[rule], Vec::new());
        let expected = format!(
            "/* latin */\n@font-face {{\n  font-family: 'Example';\n  font-style: normal;\n  font-weight: 400;\n  font-display: swap;\n  src: url(http://localhost:8080/s/{}.woff2) format('woff2');\n  unicode-range: U+0000-00FF, U+0131;\n}}\n",
            "a".repeat(64)
        );
        assert_eq!(output.css, expected);
    }

    #[test]
    fn family_name_is_escaped() {
        assert_eq!(quoted_body("Example"), "Example");
        assert_eq!(quoted_body("O'Neil"), "O\\'Neil");
        assert_eq!(quoted_body("Back\\slash'"), "Back\\\\slash\\'");
        assert_eq!(quoted_body("Two\nLines"), "Two\\a Lines");

        let rule = FaceRule {
            label: "latin".to_string(),
            family: "Evil\\'; } body { color: red".to_string(),
            style: FontStyle::Normal,
            weight: 400,
            display: "swap".to_string(),
            url: "http://localhost/s/x.woff2".to_string(),
            unicode_range: "U+0041".to_string(),
        };
        assert!(rule
            .to_string()
            .contains("font-family: 'Evil\\\\\\'; } body { color: red';"));
    }
}
