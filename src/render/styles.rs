//! ODF style records for a resolved document
//!
//! Every entry of the document's [`StyleTable`](crate::theme::StyleTable)
//! becomes an automatic cell style `ce<n>` in `content.xml`; styles used by
//! conditional formats are also emitted as common styles `cf<n>` in
//! `styles.xml`, since conditions can only apply named styles.

use super::xml::{
    self, XmlWriter, NS_FO, NS_NUMBER, NS_OFFICE, NS_STYLE, NS_SVG, NS_TABLE, NS_TEXT,
    ODF_VERSION,
};
use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use crate::theme::resolved::trim_float;
use crate::theme::{
    HorizontalAlign, NumberFormat, ResolvedStyle, StyleId, VerticalAlign,
};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Convert `2.5cm`, `12mm`, `1in`, `14pt` or `20px` to points
pub fn length_in_points(text: &str) -> SheetResult<f64> {
    let pattern = Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(cm|mm|in|pt|pc|px)\s*$")
        .map_err(|e| SheetError::Parse(format!("Regex error: {e}")))?;
    let caps = pattern.captures(text).ok_or_else(|| SheetError::InvalidStyleValue {
        property: "length".to_string(),
        value: text.to_string(),
        reason: "expected a number with a unit (cm, mm, in, pt, pc, px)".to_string(),
    })?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|_| SheetError::Parse(format!("Invalid length '{text}'")))?;
    let factor = match &caps[2] {
        "cm" => 72.0 / 2.54,
        "mm" => 72.0 / 25.4,
        "in" => 72.0,
        "pc" => 12.0,
        "px" => 0.75,
        _ => 1.0,
    };
    Ok(value * factor)
}

pub(crate) fn cell_style_name(id: StyleId) -> String {
    format!("ce{}", id.index() + 1)
}

pub(crate) fn conditional_style_name(id: StyleId) -> String {
    format!("cf{}", id.index() + 1)
}

/// Names of every automatic style `content.xml` needs
pub(crate) struct StyleCatalog<'d> {
    doc: &'d Document,
    data_styles: Vec<NumberFormat>,
    data_style_index: HashMap<NumberFormat, usize>,
    column_widths: Vec<String>,
    row_heights: Vec<String>,
    conditional: BTreeSet<StyleId>,
    fonts: BTreeSet<String>,
}

impl<'d> StyleCatalog<'d> {
    pub fn collect(doc: &'d Document) -> Self {
        let mut catalog = Self {
            doc,
            data_styles: Vec::new(),
            data_style_index: HashMap::new(),
            column_widths: Vec::new(),
            row_heights: Vec::new(),
            conditional: BTreeSet::new(),
            fonts: BTreeSet::new(),
        };

        if let Some(font) = doc.default_font() {
            catalog.fonts.insert(font.to_string());
        }
        for (_, style) in doc.styles().iter() {
            if let Some(format) = &style.number_format {
                if !catalog.data_style_index.contains_key(format) {
                    catalog
                        .data_style_index
                        .insert(format.clone(), catalog.data_styles.len());
                    catalog.data_styles.push(format.clone());
                }
            }
            if let Some(family) = &style.font.family {
                catalog.fonts.insert(family.clone());
            }
        }

        for sheet in &doc.workbook().sheets {
            for width in sheet.columns.iter().filter_map(|c| c.width.as_ref()) {
                if !catalog.column_widths.contains(width) {
                    catalog.column_widths.push(width.clone());
                }
            }
            for height in sheet.rows.iter().filter_map(|r| r.height.as_ref()) {
                if !catalog.row_heights.contains(height) {
                    catalog.row_heights.push(height.clone());
                }
            }
            catalog
                .conditional
                .extend(sheet.conditional_formats.iter().filter_map(|f| f.resolved_style()));
        }
        catalog
    }

    pub fn column_style_name(&self, width: &str) -> Option<String> {
        self.column_widths
            .iter()
            .position(|w| w == width)
            .map(|i| format!("co{}", i + 1))
    }

    pub fn row_style_name(&self, height: &str) -> Option<String> {
        self.row_heights
            .iter()
            .position(|h| h == height)
            .map(|i| format!("ro{}", i + 1))
    }

    fn data_style_name(&self, format: &NumberFormat) -> Option<String> {
        self.data_style_index
            .get(format)
            .map(|i| format!("N{}", i + 1))
    }

    pub fn write_font_faces(&self, w: &mut XmlWriter) -> SheetResult<()> {
        xml::start(w, "office:font-face-decls", &[])?;
        for font in &self.fonts {
            let family = if font.contains(' ') {
                format!("'{font}'")
            } else {
                font.clone()
            };
            xml::empty(
                w,
                "style:font-face",
                &[("style:name", font.as_str()), ("svg:font-family", family.as_str())],
            )?;
        }
        xml::end(w, "office:font-face-decls")
    }

    /// `office:automatic-styles` of `content.xml`
    pub fn write_automatic_styles(&self, w: &mut XmlWriter) -> SheetResult<()> {
        xml::start(w, "office:automatic-styles", &[])?;

        for (i, format) in self.data_styles.iter().enumerate() {
            write_data_style(w, &format!("N{}", i + 1), format)?;
        }

        for (i, width) in self.column_widths.iter().enumerate() {
            let name = format!("co{}", i + 1);
            xml::start(
                w,
                "style:style",
                &[("style:name", name.as_str()), ("style:family", "table-column")],
            )?;
            xml::empty(
                w,
                "style:table-column-properties",
                &[("fo:break-before", "auto"), ("style:column-width", width.as_str())],
            )?;
            xml::end(w, "style:style")?;
        }

        for (i, height) in self.row_heights.iter().enumerate() {
            let name = format!("ro{}", i + 1);
            xml::start(
                w,
                "style:style",
                &[("style:name", name.as_str()), ("style:family", "table-row")],
            )?;
            xml::empty(
                w,
                "style:table-row-properties",
                &[
                    ("style:row-height", height.as_str()),
                    ("style:use-optimal-row-height", "false"),
                    ("fo:break-before", "auto"),
                ],
            )?;
            xml::end(w, "style:style")?;
        }

        xml::start(
            w,
            "style:style",
            &[("style:name", "ta1"), ("style:family", "table")],
        )?;
        xml::empty(
            w,
            "style:table-properties",
            &[("table:display", "true"), ("style:writing-mode", "lr-tb")],
        )?;
        xml::end(w, "style:style")?;

        for (id, style) in self.doc.styles().iter() {
            let data_style = style
                .number_format
                .as_ref()
                .and_then(|f| self.data_style_name(f));
            write_cell_style(w, &cell_style_name(id), style, data_style.as_deref())?;
        }

        xml::end(w, "office:automatic-styles")
    }

    /// Complete `styles.xml`: defaults plus conditional-format styles
    pub fn styles_xml(&self) -> SheetResult<Vec<u8>> {
        let mut w = xml::new_writer();
        xml::declaration(&mut w)?;
        xml::start(
            &mut w,
            "office:document-styles",
            &[
                NS_OFFICE,
                NS_STYLE,
                NS_TEXT,
                NS_TABLE,
                NS_FO,
                NS_SVG,
                NS_NUMBER,
                ("office:version", ODF_VERSION),
            ],
        )?;
        self.write_font_faces(&mut w)?;

        xml::start(&mut w, "office:styles", &[])?;
        xml::start(&mut w, "style:default-style", &[("style:family", "table-cell")])?;
        match self.doc.default_font() {
            Some(font) => xml::empty(&mut w, "style:text-properties", &[("style:font-name", font)])?,
            None => xml::empty(&mut w, "style:text-properties", &[])?,
        }
        xml::end(&mut w, "style:default-style")?;
        xml::empty(
            &mut w,
            "style:style",
            &[("style:name", "Default"), ("style:family", "table-cell")],
        )?;
        for &id in &self.conditional {
            if let Some(style) = self.doc.styles().get(id) {
                // Automatic data styles live in content.xml and are not
                // visible from here, so conditional styles carry no format
                write_cell_style(&mut w, &conditional_style_name(id), style, None)?;
            }
        }
        xml::end(&mut w, "office:styles")?;

        xml::empty(&mut w, "office:automatic-styles", &[])?;
        xml::empty(&mut w, "office:master-styles", &[])?;
        xml::end(&mut w, "office:document-styles")?;
        Ok(w.into_inner())
    }
}

fn write_cell_style(
    w: &mut XmlWriter,
    name: &str,
    style: &ResolvedStyle,
    data_style: Option<&str>,
) -> SheetResult<()> {
    let mut attrs = vec![
        ("style:name", name),
        ("style:family", "table-cell"),
        ("style:parent-style-name", "Default"),
    ];
    if let Some(data_style) = data_style {
        attrs.push(("style:data-style-name", data_style));
    }
    xml::start(w, "style:style", &attrs)?;

    // table-cell-properties
    let fill = style.fill.map(|c| c.to_hex());
    let borders: Vec<(&str, String)> = [
        ("fo:border-top", style.border.top),
        ("fo:border-bottom", style.border.bottom),
        ("fo:border-left", style.border.left),
        ("fo:border-right", style.border.right),
    ]
    .into_iter()
    .filter_map(|(attr, line)| line.map(|l| (attr, l.to_odf())))
    .collect();
    let protect = match (style.protection.locked, style.protection.hidden) {
        (true, false) => None,
        (true, true) => Some("hidden-and-protected"),
        (false, true) => Some("formula-hidden"),
        (false, false) => Some("none"),
    };
    let vertical = style.alignment.vertical.map(|v| match v {
        VerticalAlign::Top => "top",
        VerticalAlign::Middle => "middle",
        VerticalAlign::Bottom => "bottom",
    });

    let mut cell_attrs: Vec<(&str, &str)> = Vec::new();
    if let Some(fill) = &fill {
        cell_attrs.push(("fo:background-color", fill.as_str()));
    }
    for (attr, value) in &borders {
        cell_attrs.push((*attr, value.as_str()));
    }
    if style.alignment.wrap {
        cell_attrs.push(("fo:wrap-option", "wrap"));
    }
    if let Some(vertical) = vertical {
        cell_attrs.push(("style:vertical-align", vertical));
    }
    if style.alignment.horizontal.is_some() {
        cell_attrs.push(("style:text-align-source", "fix"));
    }
    if let Some(protect) = protect {
        cell_attrs.push(("style:cell-protect", protect));
    }
    if !cell_attrs.is_empty() {
        xml::empty(w, "style:table-cell-properties", &cell_attrs)?;
    }

    if let Some(horizontal) = style.alignment.horizontal {
        let align = match horizontal {
            HorizontalAlign::Left => "start",
            HorizontalAlign::Center => "center",
            HorizontalAlign::Right => "end",
            HorizontalAlign::Justify => "justify",
        };
        xml::empty(w, "style:paragraph-properties", &[("fo:text-align", align)])?;
    }

    // text-properties
    let font = &style.font;
    let size = font.size_pt.map(|pt| format!("{}pt", trim_float(pt)));
    let color = font.color.map(|c| c.to_hex());
    let mut text_attrs: Vec<(&str, &str)> = Vec::new();
    if let Some(family) = &font.family {
        text_attrs.push(("style:font-name", family.as_str()));
    }
    if let Some(size) = &size {
        text_attrs.push(("fo:font-size", size.as_str()));
    }
    if font.bold {
        text_attrs.push(("fo:font-weight", "bold"));
    }
    if font.italic {
        text_attrs.push(("fo:font-style", "italic"));
    }
    if font.underline {
        text_attrs.push(("style:text-underline-style", "solid"));
        text_attrs.push(("style:text-underline-width", "auto"));
        text_attrs.push(("style:text-underline-color", "font-color"));
    }
    if let Some(color) = &color {
        text_attrs.push(("fo:color", color.as_str()));
    }
    if !text_attrs.is_empty() {
        xml::empty(w, "style:text-properties", &text_attrs)?;
    }

    xml::end(w, "style:style")
}

fn write_data_style(w: &mut XmlWriter, name: &str, format: &NumberFormat) -> SheetResult<()> {
    let number = |w: &mut XmlWriter, decimals: u8, grouping: bool| -> SheetResult<()> {
        let places = decimals.to_string();
        let mut attrs = vec![
            ("number:decimal-places", places.as_str()),
            ("number:min-decimal-places", places.as_str()),
            ("number:min-integer-digits", "1"),
        ];
        if grouping {
            attrs.push(("number:grouping", "true"));
        }
        xml::empty(w, "number:number", &attrs)
    };

    match format {
        NumberFormat::Number { decimals, grouping } => {
            xml::start(w, "number:number-style", &[("style:name", name)])?;
            number(w, *decimals, *grouping)?;
            xml::end(w, "number:number-style")
        }
        NumberFormat::Percent { decimals } => {
            xml::start(w, "number:percentage-style", &[("style:name", name)])?;
            number(w, *decimals, false)?;
            xml::text_element(w, "number:text", &[], "%")?;
            xml::end(w, "number:percentage-style")
        }
        NumberFormat::Currency {
            symbol,
            decimals,
            grouping,
        } => {
            xml::start(w, "number:currency-style", &[("style:name", name)])?;
            xml::text_element(w, "number:currency-symbol", &[], symbol)?;
            number(w, *decimals, *grouping)?;
            xml::end(w, "number:currency-style")
        }
        NumberFormat::Date(pattern) => {
            xml::start(w, "number:date-style", &[("style:name", name)])?;
            for token in date_tokens(pattern) {
                match token {
                    DateToken::Year(long) => xml::empty(w, "number:year", &[("number:style", style_len(long))])?,
                    DateToken::Month(long) => xml::empty(w, "number:month", &[("number:style", style_len(long))])?,
                    DateToken::Day(long) => xml::empty(w, "number:day", &[("number:style", style_len(long))])?,
                    DateToken::Literal(text) => xml::text_element(w, "number:text", &[], &text)?,
                }
            }
            xml::end(w, "number:date-style")
        }
        NumberFormat::Text => {
            xml::start(w, "number:text-style", &[("style:name", name)])?;
            xml::empty(w, "number:text-content", &[])?;
            xml::end(w, "number:text-style")
        }
    }
}

fn style_len(long: bool) -> &'static str {
    if long {
        "long"
    } else {
        "short"
    }
}

#[derive(Debug, PartialEq)]
enum DateToken {
    Year(bool),
    Month(bool),
    Day(bool),
    Literal(String),
}

/// `yyyy-mm-dd` into date parts and separators
fn date_tokens(pattern: &str) -> Vec<DateToken> {
    let mut tokens = Vec::new();
    let mut rest = pattern;
    while !rest.is_empty() {
        let (token, len) = if rest.starts_with("yyyy") {
            (DateToken::Year(true), 4)
        } else if rest.starts_with("yy") {
            (DateToken::Year(false), 2)
        } else if rest.starts_with("mm") {
            (DateToken::Month(true), 2)
        } else if rest.starts_with("dd") {
            (DateToken::Day(true), 2)
        } else {
            let c = rest.chars().next().map_or(1, char::len_utf8);
            match tokens.last_mut() {
                Some(DateToken::Literal(text)) => text.push_str(&rest[..c]),
                _ => tokens.push(DateToken::Literal(rest[..c].to_string())),
            }
            rest = &rest[c..];
            continue;
        };
        tokens.push(token);
        rest = &rest[len..];
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_length_in_points() {
        assert_eq!(length_in_points("1in").unwrap(), 72.0);
        assert_eq!(length_in_points("14pt").unwrap(), 14.0);
        assert!((length_in_points("2.54cm").unwrap() - 72.0).abs() < 1e-9);
        assert!(length_in_points("wide").is_err());
        assert!(length_in_points("3").is_err());
    }

    #[test]
    fn test_date_tokens() {
        assert_eq!(
            date_tokens("dd.mm.yyyy"),
            vec![
                DateToken::Day(true),
                DateToken::Literal(".".into()),
                DateToken::Month(true),
                DateToken::Literal(".".into()),
                DateToken::Year(true),
            ]
        );
    }

    #[test]
    fn test_cell_style_xml() {
        let mut style = ResolvedStyle::default();
        style.font.bold = true;
        style.fill = crate::theme::Color::parse("#1F4E79");
        style.alignment.horizontal = Some(HorizontalAlign::Center);
        let mut w = xml::new_writer();
        write_cell_style(&mut w, "ce1", &style, Some("N1")).unwrap();
        let out = String::from_utf8(w.into_inner()).unwrap();
        assert!(out.contains(r#"style:data-style-name="N1""#));
        assert!(out.contains(r##"fo:background-color="#1f4e79""##));
        assert!(out.contains(r#"fo:text-align="center""#));
        assert!(out.contains(r#"fo:font-weight="bold""#));
        assert!(!out.contains("cell-protect"));
    }
}
