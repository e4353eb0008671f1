//! Fully resolved, typed style records
//!
//! A [`ResolvedStyle`] is what a renderer sees: no inheritance, no palette
//! references, every property parsed into a typed value.

use super::{Color, PropertyMap};
use crate::error::{SheetError, SheetResult};
use regex::Regex;

pub const THIN_PT: f64 = 0.75;
pub const MEDIUM_PT: f64 = 1.5;
pub const THICK_PT: f64 = 2.5;

const SIDES: [&str; 4] = ["top", "bottom", "left", "right"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontStyle {
    /// `None` keeps the document default family
    pub family: Option<String>,
    pub size_pt: Option<f64>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: Option<Color>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
    Double,
}

impl LineStyle {
    pub fn as_odf(self) -> &'static str {
        match self {
            LineStyle::Solid => "solid",
            LineStyle::Dashed => "dashed",
            LineStyle::Dotted => "dotted",
            LineStyle::Double => "double",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderLine {
    pub style: LineStyle,
    pub width_pt: f64,
    pub color: Color,
}

impl BorderLine {
    /// ODF `fo:border-*` value, e.g. `0.75pt solid #000000`
    pub fn to_odf(&self) -> String {
        format!(
            "{}pt {} {}",
            trim_float(self.width_pt),
            self.style.as_odf(),
            self.color.to_hex()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Borders {
    pub top: Option<BorderLine>,
    pub bottom: Option<BorderLine>,
    pub left: Option<BorderLine>,
    pub right: Option<BorderLine>,
}

impl Borders {
    pub fn is_empty(&self) -> bool {
        self.top.is_none() && self.bottom.is_none() && self.left.is_none() && self.right.is_none()
    }

    fn side_mut(&mut self, side: &str) -> Option<&mut Option<BorderLine>> {
        match side {
            "top" => Some(&mut self.top),
            "bottom" => Some(&mut self.bottom),
            "left" => Some(&mut self.left),
            "right" => Some(&mut self.right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalAlign {
    Top,
    Middle,
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Alignment {
    pub horizontal: Option<HorizontalAlign>,
    pub vertical: Option<VerticalAlign>,
    pub wrap: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NumberFormat {
    Number { decimals: u8, grouping: bool },
    Percent { decimals: u8 },
    Currency { symbol: String, decimals: u8, grouping: bool },
    /// Date pattern built from `yyyy`, `yy`, `mm`, `dd` and literal separators
    Date(String),
    Text,
}

impl NumberFormat {
    /// Excel format code, e.g. `#,##0.00`
    pub fn excel_code(&self) -> String {
        let digits = |decimals: u8, grouping: bool| {
            let mut code = String::from(if grouping { "#,##0" } else { "0" });
            if decimals > 0 {
                code.push('.');
                code.push_str(&"0".repeat(decimals as usize));
            }
            code
        };
        match self {
            NumberFormat::Number { decimals, grouping } => digits(*decimals, *grouping),
            NumberFormat::Percent { decimals } => format!("{}%", digits(*decimals, false)),
            NumberFormat::Currency {
                symbol,
                decimals,
                grouping,
            } => format!("{symbol}{}", digits(*decimals, *grouping)),
            NumberFormat::Date(pattern) => pattern.clone(),
            NumberFormat::Text => "@".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub locked: bool,
    pub hidden: bool,
}

impl Default for Protection {
    fn default() -> Self {
        Self {
            locked: true,
            hidden: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedStyle {
    pub font: FontStyle,
    pub fill: Option<Color>,
    pub border: Borders,
    pub alignment: Alignment,
    pub number_format: Option<NumberFormat>,
    pub protection: Protection,
}

impl ResolvedStyle {
    /// Parse a flat, reference-free property map
    ///
    /// `context` names the style for error messages.
    pub fn from_properties(properties: &PropertyMap, context: &str) -> SheetResult<Self> {
        let mut style = ResolvedStyle::default();

        for (key, value) in properties {
            let value = value.trim();
            match key.as_str() {
                "font.family" => style.font.family = Some(value.to_string()),
                "font.size" => style.font.size_pt = Some(parse_points(key, value)?),
                "font.weight" => style.font.bold = parse_weight(key, value)?,
                "font.bold" => style.font.bold = parse_bool(key, value)?,
                "font.italic" => style.font.italic = parse_bool(key, value)?,
                "font.style" => {
                    style.font.italic = match value.to_ascii_lowercase().as_str() {
                        "italic" | "oblique" => true,
                        "normal" => false,
                        _ => return Err(invalid(key, value, "expected italic or normal")),
                    }
                }
                "font.underline" => {
                    style.font.underline = match value.to_ascii_lowercase().as_str() {
                        "single" => true,
                        "none" => false,
                        _ => parse_bool(key, value)?,
                    }
                }
                "font.color" => style.font.color = Some(parse_color(key, value)?),
                "fill" | "fill.color" => {
                    style.fill = if value.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        Some(parse_color(key, value)?)
                    }
                }
                "alignment.horizontal" => {
                    style.alignment.horizontal = Some(match value.to_ascii_lowercase().as_str() {
                        "left" | "start" => HorizontalAlign::Left,
                        "center" | "centre" => HorizontalAlign::Center,
                        "right" | "end" => HorizontalAlign::Right,
                        "justify" => HorizontalAlign::Justify,
                        _ => return Err(invalid(key, value, "expected left, center, right or justify")),
                    })
                }
                "alignment.vertical" => {
                    style.alignment.vertical = Some(match value.to_ascii_lowercase().as_str() {
                        "top" => VerticalAlign::Top,
                        "middle" | "center" => VerticalAlign::Middle,
                        "bottom" => VerticalAlign::Bottom,
                        _ => return Err(invalid(key, value, "expected top, middle or bottom")),
                    })
                }
                "alignment.wrap" => style.alignment.wrap = parse_bool(key, value)?,
                "number_format" => style.number_format = parse_number_format(key, value)?,
                "protection.locked" => style.protection.locked = parse_bool(key, value)?,
                "protection.hidden" => style.protection.hidden = parse_bool(key, value)?,
                other => {
                    let side = other.strip_prefix("border.");
                    match side.and_then(|s| style.border.side_mut(s)) {
                        Some(slot) => *slot = parse_border(key, value)?,
                        None => {
                            return Err(SheetError::UnknownProperty {
                                property: other.to_string(),
                                context: context.to_string(),
                            })
                        }
                    }
                }
            }
        }

        Ok(style)
    }
}

/// Merge `source` into `target`, expanding shorthands as they are applied
///
/// `border: thin` sets all four sides and `fill: <color>` sets `fill.color`,
/// so a later shorthand replaces earlier per-side values.
pub fn apply_properties(target: &mut PropertyMap, source: &PropertyMap) {
    for (key, value) in source {
        match key.as_str() {
            "border" | "border.all" => {
                for side in SIDES {
                    target.insert(format!("border.{side}"), value.clone());
                }
            }
            "fill" => {
                target.insert("fill.color".to_string(), value.clone());
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn invalid(property: &str, value: &str, reason: &str) -> SheetError {
    SheetError::InvalidStyleValue {
        property: property.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn parse_bool(property: &str, value: &str) -> SheetResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(property, value, "expected true or false")),
    }
}

fn parse_color(property: &str, value: &str) -> SheetResult<Color> {
    Color::parse(value).ok_or_else(|| invalid(property, value, "expected #RRGGBB, #RGB or a color name"))
}

fn parse_points(property: &str, value: &str) -> SheetResult<f64> {
    let number = value.strip_suffix("pt").unwrap_or(value).trim();
    match number.parse::<f64>() {
        Ok(pt) if pt > 0.0 && pt.is_finite() => Ok(pt),
        _ => Err(invalid(property, value, "expected a positive size in points")),
    }
}

fn parse_weight(property: &str, value: &str) -> SheetResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "bold" | "bolder" => Ok(true),
        "normal" | "regular" | "lighter" => Ok(false),
        numeric => match numeric.parse::<u16>() {
            Ok(w) if (100..=900).contains(&w) => Ok(w >= 600),
            _ => Err(invalid(property, value, "expected bold, normal or 100-900")),
        },
    }
}

fn parse_border(property: &str, value: &str) -> SheetResult<Option<BorderLine>> {
    if value.eq_ignore_ascii_case("none") || value.is_empty() {
        return Ok(None);
    }

    let mut line = BorderLine {
        style: LineStyle::Solid,
        width_pt: THIN_PT,
        color: Color::rgb(0, 0, 0),
    };
    for token in value.split_whitespace() {
        match token.to_ascii_lowercase().as_str() {
            "hairline" => line.width_pt = 0.5,
            "thin" => line.width_pt = THIN_PT,
            "medium" => line.width_pt = MEDIUM_PT,
            "thick" => line.width_pt = THICK_PT,
            "solid" => line.style = LineStyle::Solid,
            "dashed" => line.style = LineStyle::Dashed,
            "dotted" => line.style = LineStyle::Dotted,
            "double" => line.style = LineStyle::Double,
            other if other.ends_with("pt") => line.width_pt = parse_points(property, other)?,
            _ => {
                line.color = Color::parse(token).ok_or_else(|| {
                    invalid(property, value, &format!("unrecognized border token '{token}'"))
                })?
            }
        }
    }
    Ok(Some(line))
}

/// Excel-style format code to a typed format; `General` means none
fn parse_number_format(property: &str, value: &str) -> SheetResult<Option<NumberFormat>> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| SheetError::Parse(format!("Regex error: {e}")))
    };

    if value.is_empty() || value.eq_ignore_ascii_case("general") {
        return Ok(None);
    }
    if value == "@" || value.eq_ignore_ascii_case("text") {
        return Ok(Some(NumberFormat::Text));
    }

    let decimals = |group: Option<regex::Match<'_>>| {
        group.map_or(0, |m| (m.as_str().len() - 1).min(u8::MAX as usize) as u8)
    };

    let number = compile(r"^(#,##)?0(\.0+)?$")?;
    if let Some(caps) = number.captures(value) {
        return Ok(Some(NumberFormat::Number {
            decimals: decimals(caps.get(2)),
            grouping: caps.get(1).is_some(),
        }));
    }

    let percent = compile(r"^0(\.0+)?%$")?;
    if let Some(caps) = percent.captures(value) {
        return Ok(Some(NumberFormat::Percent {
            decimals: decimals(caps.get(1)),
        }));
    }

    let currency = compile(r"^([$€£¥])\s?(#,##)?0(\.0+)?$")?;
    if let Some(caps) = currency.captures(value) {
        return Ok(Some(NumberFormat::Currency {
            symbol: caps[1].to_string(),
            decimals: decimals(caps.get(3)),
            grouping: caps.get(2).is_some(),
        }));
    }

    let date = compile(r"^(?i)(yyyy|yy|mm|dd)([-/. ](yyyy|yy|mm|dd)){1,2}$")?;
    if date.is_match(value) {
        return Ok(Some(NumberFormat::Date(value.to_ascii_lowercase())));
    }

    Err(invalid(
        property,
        value,
        "expected General, @, 0.00, #,##0, 0%, $#,##0.00 or a yyyy-mm-dd style date",
    ))
}

pub(crate) fn trim_float(v: f64) -> String {
    let s = format!("{v:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
