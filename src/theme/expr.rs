//! Theme value expressions
//!
//! A property value is literal text with zero or more embedded references:
//!
//! ```text
//! thin {colors.border}
//! {colors.primary|lighten:0.2}
//! {colors.accent|darken:10% ?? #336699}
//! ```
//!
//! A reference is a dotted path into the palette/font table, followed by
//! `|modifier:amount` steps and an optional `?? default` literal.

use crate::error::{SheetError, SheetResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierKind {
    Lighten,
    Darken,
    Saturate,
    Desaturate,
}

impl ModifierKind {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lighten" => Some(ModifierKind::Lighten),
            "darken" => Some(ModifierKind::Darken),
            "saturate" => Some(ModifierKind::Saturate),
            "desaturate" => Some(ModifierKind::Desaturate),
            _ => None,
        }
    }
}

impl fmt::Display for ModifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModifierKind::Lighten => "lighten",
            ModifierKind::Darken => "darken",
            ModifierKind::Saturate => "saturate",
            ModifierKind::Desaturate => "desaturate",
        };
        write!(f, "{name}")
    }
}

/// One modifier step; `amount` is a fraction in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modifier {
    pub kind: ModifierKind,
    pub amount: f64,
}

/// A reference into the theme's lookup tables
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub path: Vec<String>,
    pub modifiers: Vec<Modifier>,
    pub default: Option<String>,
}

impl Reference {
    /// Dotted key, e.g. `colors.primary`
    pub fn key(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    PaletteRef(Reference),
}

/// Parsed property value
#[derive(Debug, Clone, PartialEq)]
pub struct ValueExpr {
    pub segments: Vec<Segment>,
}

impl ValueExpr {
    pub fn parse(text: &str) -> SheetResult<Self> {
        let mut segments = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            match rest.find(['{', '}']) {
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    break;
                }
                Some(pos) if rest.as_bytes()[pos] == b'}' => {
                    return Err(invalid(text, "unmatched '}'"));
                }
                Some(pos) => {
                    if pos > 0 {
                        segments.push(Segment::Literal(rest[..pos].to_string()));
                    }
                    let after = &rest[pos + 1..];
                    let close = after
                        .find('}')
                        .ok_or_else(|| invalid(text, "unterminated '{'"))?;
                    let inner = &after[..close];
                    if inner.contains('{') {
                        return Err(invalid(text, "references cannot be nested"));
                    }
                    segments.push(Segment::PaletteRef(parse_reference(text, inner)?));
                    rest = &after[close + 1..];
                }
            }
        }

        Ok(Self { segments })
    }

    /// True when the value contains no references
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::PaletteRef(r) => Some(r),
            Segment::Literal(_) => None,
        })
    }
}

fn parse_reference(full: &str, inner: &str) -> SheetResult<Reference> {
    let (body, default) = match inner.split_once("??") {
        Some((body, default)) => (body, Some(default.trim().to_string())),
        None => (inner, None),
    };

    let mut parts = body.split('|');
    let path_text = parts.next().unwrap_or_default().trim();
    let path: Vec<String> = path_text.split('.').map(|p| p.trim().to_string()).collect();
    if path.len() < 2 {
        return Err(invalid(full, "reference path needs a table and a key, e.g. colors.primary"));
    }
    if path
        .iter()
        .any(|p| p.is_empty() || !p.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'))
    {
        return Err(invalid(full, &format!("invalid reference path '{path_text}'")));
    }

    let mut modifiers = Vec::new();
    for step in parts {
        let (name, amount) = step
            .split_once(':')
            .ok_or_else(|| invalid(full, &format!("modifier '{}' needs an amount", step.trim())))?;
        let kind = ModifierKind::parse(name)
            .ok_or_else(|| invalid(full, &format!("unknown modifier '{}'", name.trim())))?;
        modifiers.push(Modifier {
            kind,
            amount: parse_amount(full, amount)?,
        });
    }

    Ok(Reference {
        path,
        modifiers,
        default,
    })
}

/// `0.2` or `20%`, both meaning a fifth
fn parse_amount(full: &str, text: &str) -> SheetResult<f64> {
    let text = text.trim();
    let value = match text.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().map(|v| v / 100.0),
        None => text.parse::<f64>(),
    }
    .map_err(|_| invalid(full, &format!("invalid modifier amount '{text}'")))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(full, &format!("modifier amount '{text}' must be between 0 and 1")));
    }
    Ok(value)
}

fn invalid(text: &str, reason: &str) -> SheetError {
    SheetError::Parse(format!("invalid theme value '{text}': {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_literal() {
        let expr = ValueExpr::parse("#FFFFFF").unwrap();
        assert!(expr.is_literal());
        assert_eq!(expr.segments, vec![Segment::Literal("#FFFFFF".into())]);
    }

    #[test]
    fn test_reference_with_modifiers_and_default() {
        let expr = ValueExpr::parse("{colors.primary|lighten:0.2|desaturate:10% ?? #336699}").unwrap();
        let r = expr.references().next().unwrap();
        assert_eq!(r.key(), "colors.primary");
        assert_eq!(r.modifiers.len(), 2);
        assert_eq!(r.modifiers[0].kind, ModifierKind::Lighten);
        assert!((r.modifiers[1].amount - 0.1).abs() < 1e-12);
        assert_eq!(r.default.as_deref(), Some("#336699"));
    }

    #[test]
    fn test_mixed_literal_and_reference() {
        let expr = ValueExpr::parse("medium dashed {colors.border}").unwrap();
        assert_eq!(expr.segments.len(), 2);
        assert_eq!(expr.segments[0], Segment::Literal("medium dashed ".into()));
    }

    #[test]
    fn test_rejects_malformed_references() {
        assert!(ValueExpr::parse("{colors.primary").is_err());
        assert!(ValueExpr::parse("colors}").is_err());
        assert!(ValueExpr::parse("{primary}").is_err());
        assert!(ValueExpr::parse("{colors.primary|glow:0.2}").is_err());
        assert!(ValueExpr::parse("{colors.primary|lighten}").is_err());
        assert!(ValueExpr::parse("{colors.primary|lighten:1.5}").is_err());
    }
}
