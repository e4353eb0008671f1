//! RGB colors and the HSL modifiers applied by theme references

use crate::theme::expr::{Modifier, ModifierKind};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

const NAMED_COLORS: &[(&str, Color)] = &[
    ("black", Color::rgb(0x00, 0x00, 0x00)),
    ("white", Color::rgb(0xFF, 0xFF, 0xFF)),
    ("red", Color::rgb(0xFF, 0x00, 0x00)),
    ("green", Color::rgb(0x00, 0x80, 0x00)),
    ("blue", Color::rgb(0x00, 0x00, 0xFF)),
    ("yellow", Color::rgb(0xFF, 0xFF, 0x00)),
    ("orange", Color::rgb(0xFF, 0xA5, 0x00)),
    ("navy", Color::rgb(0x00, 0x00, 0x80)),
    ("gray", Color::rgb(0x80, 0x80, 0x80)),
    ("grey", Color::rgb(0x80, 0x80, 0x80)),
    ("silver", Color::rgb(0xC0, 0xC0, 0xC0)),
];

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`, `#RGB` or a basic color name
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix('#') {
            return Self::parse_hex(hex);
        }
        NAMED_COLORS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(text))
            .map(|(_, c)| *c)
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match hex.len() {
            6 => Some(Self::rgb(
                u8::from_str_radix(&hex[0..2], 16).ok()?,
                u8::from_str_radix(&hex[2..4], 16).ok()?,
                u8::from_str_radix(&hex[4..6], 16).ok()?,
            )),
            3 => {
                let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).map(|d| d * 17);
                Some(Self::rgb(digit(0).ok()?, digit(1).ok()?, digit(2).ok()?))
            }
            _ => None,
        }
    }

    /// Lowercase `#rrggbb`, the form ODF expects
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Packed `0xRRGGBB`
    pub fn to_rgb_u32(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    /// Apply a lighten/darken/saturate/desaturate modifier in HSL space
    pub fn apply(self, modifier: &Modifier) -> Self {
        let (h, s, l) = self.to_hsl();
        let amount = modifier.amount;
        let (s, l) = match modifier.kind {
            ModifierKind::Lighten => (s, (l + amount).clamp(0.0, 1.0)),
            ModifierKind::Darken => (s, (l - amount).clamp(0.0, 1.0)),
            ModifierKind::Saturate => ((s + amount).clamp(0.0, 1.0), l),
            ModifierKind::Desaturate => ((s - amount).clamp(0.0, 1.0), l),
        };
        Self::from_hsl(h, s, l)
    }

    fn to_hsl(self) -> (f64, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        if max == min {
            return (0.0, 0.0, l);
        }
        let d = max - min;
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };
        let h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        (h / 6.0, s, l)
    }

    fn from_hsl(h: f64, s: f64, l: f64) -> Self {
        if s == 0.0 {
            let v = to_channel(l);
            return Self::rgb(v, v, v);
        }
        let q = if l < 0.5 {
            l * (1.0 + s)
        } else {
            l + s - l * s
        };
        let p = 2.0 * l - q;
        Self::rgb(
            to_channel(hue_to_rgb(p, q, h + 1.0 / 3.0)),
            to_channel(hue_to_rgb(p, q, h)),
            to_channel(hue_to_rgb(p, q, h - 1.0 / 3.0)),
        )
    }
}

fn hue_to_rgb(p: f64, q: f64, t: f64) -> f64 {
    let t = if t < 0.0 {
        t + 1.0
    } else if t > 1.0 {
        t - 1.0
    } else {
        t
    };
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn to_channel(v: f64) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modifier(kind: ModifierKind, amount: f64) -> Modifier {
        Modifier { kind, amount }
    }

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(Color::parse("#1F4E79"), Some(Color::rgb(0x1F, 0x4E, 0x79)));
        assert_eq!(Color::parse("#fff"), Some(Color::rgb(255, 255, 255)));
        assert_eq!(Color::parse("Navy"), Some(Color::rgb(0, 0, 0x80)));
        assert_eq!(Color::parse("#12345"), None);
        assert_eq!(Color::parse("#GGGGGG"), None);
        assert_eq!(Color::parse("chartreuse-ish"), None);
    }

    #[test]
    fn test_to_hex_is_lowercase() {
        assert_eq!(Color::rgb(0xAB, 0xCD, 0xEF).to_hex(), "#abcdef");
        assert_eq!(Color::rgb(0xAB, 0xCD, 0xEF).to_rgb_u32(), 0xABCDEF);
    }

    #[test]
    fn test_lighten_and_darken_extremes() {
        let gray = Color::rgb(0x80, 0x80, 0x80);
        assert_eq!(gray.apply(&modifier(ModifierKind::Lighten, 1.0)), Color::rgb(255, 255, 255));
        assert_eq!(gray.apply(&modifier(ModifierKind::Darken, 1.0)), Color::rgb(0, 0, 0));
    }

    #[test]
    fn test_lighten_moves_towards_white() {
        let primary = Color::rgb(0x1F, 0x4E, 0x79);
        let lighter = primary.apply(&modifier(ModifierKind::Lighten, 0.2));
        assert!(lighter.r > primary.r && lighter.g > primary.g && lighter.b > primary.b);
    }

    #[test]
    fn test_hsl_round_trip_is_stable() {
        let c = Color::rgb(0x33, 0x99, 0x66);
        assert_eq!(c.apply(&modifier(ModifierKind::Lighten, 0.0)), c);
    }

    #[test]
    fn test_desaturate_fully_gives_gray() {
        let c = Color::rgb(0xFF, 0x00, 0x00);
        let gray = c.apply(&modifier(ModifierKind::Desaturate, 1.0));
        assert_eq!(gray.r, gray.g);
        assert_eq!(gray.g, gray.b);
    }
}
