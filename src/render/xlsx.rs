//! Excel export through rust_xlsxwriter
//!
//! The same built document as the ODS writer, mapped onto XLSX features.
//! rust_xlsxwriter keeps the whole workbook in memory until `save`, so this
//! path is not row-windowed.

use super::styles::length_in_points;
use super::{OutputFormat, RenderStats};
use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use crate::model::reference::quote_sheet_name;
use crate::model::{
    column_to_letters, CellContent, CellRef, CellValue, Condition, NamedRangeScope, RangeRef,
    Sheet, ValidationRule,
};
use crate::theme::{
    BorderLine, HorizontalAlign, LineStyle, ResolvedStyle, StyleId, StyleTable, VerticalAlign,
};
use chrono::{Datelike, NaiveDateTime, Timelike};
use rust_xlsxwriter::{
    Color as XlsxColor, ConditionalFormatCell, ConditionalFormatCellRule,
    ConditionalFormatFormula, DataValidation, DataValidationRule, DocProperties, Format,
    FormatAlign, FormatBorder, FormatUnderline, Formula, Note, Workbook, Worksheet,
};
use std::path::Path;
use tracing::{debug, info};

/// Days from 0001-01-01 to Excel's day zero (1899-12-30)
const EXCEL_EPOCH_DAYS_FROM_CE: i32 = 693_594;
/// Points per character of column width at the default font
const POINTS_PER_CHAR: f64 = 5.25;
const DEFAULT_DATE_FORMAT: &str = "yyyy-mm-dd";
const DEFAULT_DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

pub(crate) fn write_xlsx(doc: &Document, path: &Path) -> SheetResult<RenderStats> {
    let mut workbook = Workbook::new();
    let formats = FormatTable::new(doc.styles(), doc.default_font());

    workbook.set_properties(&properties(doc));

    let mut rows = 0u64;
    for sheet in &doc.workbook().sheets {
        let ws = workbook.add_worksheet();
        write_sheet(ws, sheet, &formats)?;
        rows += u64::from(sheet.row_count());
    }

    for named in doc.workbook().all_named_ranges() {
        let sheet = named.range.sheet.as_deref().unwrap_or_default();
        let name = match &named.scope {
            NamedRangeScope::Workbook => named.name.clone(),
            NamedRangeScope::Sheet(scope) => {
                format!("{}!{}", quote_sheet_name(scope), named.name)
            }
        };
        let target = format!("={}!{}", quote_sheet_name(sheet), absolute(&named.range));
        workbook.define_name(name, &target)?;
    }

    workbook.save(path)?;
    info!(path = %path.display(), rows, "XLSX workbook written");

    Ok(RenderStats {
        format: OutputFormat::Xlsx,
        sheets: doc.workbook().sheets.len(),
        rows,
        entries: 0,
        uncompressed_bytes: 0,
        bytes_written: 0,
        peak_buffered_rows: usize::try_from(rows).unwrap_or(usize::MAX),
    })
}

fn properties(doc: &Document) -> DocProperties {
    let props = &doc.workbook().properties;
    let mut out = DocProperties::new();
    if let Some(title) = &props.title {
        out = out.set_title(title);
    }
    if let Some(subject) = &props.subject {
        out = out.set_subject(subject);
    }
    if let Some(author) = &props.author {
        out = out.set_author(author);
    }
    if let Some(description) = &props.description {
        out = out.set_comment(description);
    }
    if !props.keywords.is_empty() {
        out = out.set_keywords(props.keywords.join(", "));
    }
    out
}

fn write_sheet(ws: &mut Worksheet, sheet: &Sheet, formats: &FormatTable) -> SheetResult<()> {
    ws.set_name(&sheet.name)?;
    debug!(sheet = %sheet.name, "writing worksheet");

    for (idx, column) in sheet.columns.iter().enumerate() {
        let col = col16(idx as u32)?;
        if let Some(width) = &column.width {
            ws.set_column_width(col, length_in_points(width)? / POINTS_PER_CHAR)?;
        }
        if let Some(id) = column.resolved_style() {
            ws.set_column_format(col, formats.get(id))?;
        }
    }

    for row in &sheet.rows {
        if let Some(height) = &row.height {
            ws.set_row_height(row.index, length_in_points(height)?)?;
        }
        if let Some(id) = row.resolved_style() {
            ws.set_row_format(row.index, formats.get(id))?;
        }
    }

    for merge in &sheet.merges {
        let range = &merge.range;
        let anchor = sheet.cell(range.start);
        let format = anchor
            .and_then(|c| c.resolved_style())
            .map(|id| formats.get(id).clone())
            .unwrap_or_else(Format::new);
        ws.merge_range(
            range.start.row,
            col16(range.start.col)?,
            range.end.row,
            col16(range.end.col)?,
            "",
            &format,
        )?;
    }

    for row in &sheet.rows {
        for (&col, cell) in &row.cells {
            let at = CellRef::new(row.index, col);
            let c = col16(col)?;
            let base = cell
                .resolved_style()
                .map(|id| formats.get(id).clone())
                .unwrap_or_else(Format::new);
            let has_number_format = cell
                .resolved_style()
                .and_then(|id| formats.styles.get(id))
                .is_some_and(|s| s.number_format.is_some());

            match &cell.content {
                CellContent::Formula(formula) => {
                    ws.write_formula_with_format(at.row, c, Formula::new(formula.as_str()), &base)?;
                }
                CellContent::Value(value) => match value {
                    CellValue::Empty => {
                        if cell.resolved_style().is_some() {
                            ws.write_blank(at.row, c, &base)?;
                        }
                    }
                    CellValue::Text(text) => {
                        ws.write_string_with_format(at.row, c, text, &base)?;
                    }
                    CellValue::Number(n) => {
                        ws.write_number_with_format(at.row, c, *n, &base)?;
                    }
                    CellValue::Boolean(b) => {
                        ws.write_boolean_with_format(at.row, c, *b, &base)?;
                    }
                    CellValue::Date(d) => {
                        let format = date_format(base, has_number_format, DEFAULT_DATE_FORMAT);
                        let serial = f64::from(d.num_days_from_ce() - EXCEL_EPOCH_DAYS_FROM_CE);
                        ws.write_number_with_format(at.row, c, serial, &format)?;
                    }
                    CellValue::DateTime(dt) => {
                        let format = date_format(base, has_number_format, DEFAULT_DATETIME_FORMAT);
                        ws.write_number_with_format(at.row, c, excel_serial(dt), &format)?;
                    }
                },
            }

            if let Some(comment) = &cell.comment {
                let note = Note::new(comment.as_str()).add_author_prefix(false);
                ws.insert_note(at.row, c, &note)?;
            }
        }
    }

    for validation in &sheet.validations {
        let rule = match &validation.rule {
            ValidationRule::List(values) => {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                DataValidation::new().allow_list_strings(&values)?
            }
            ValidationRule::WholeNumber { min, max } => DataValidation::new()
                .allow_whole_number(DataValidationRule::Between(clamp_i32(*min), clamp_i32(*max))),
            ValidationRule::Decimal { min, max } => DataValidation::new()
                .allow_decimal_number(DataValidationRule::Between(*min, *max)),
        }
        .ignore_blank(validation.allow_empty);
        let r = &validation.range;
        ws.add_data_validation(r.start.row, col16(r.start.col)?, r.end.row, col16(r.end.col)?, &rule)?;
    }

    for conditional in &sheet.conditional_formats {
        let Some(id) = conditional.resolved_style() else {
            continue;
        };
        let format = formats.get(id).clone();
        let r = &conditional.range;
        let (r1, c1, r2, c2) = (r.start.row, col16(r.start.col)?, r.end.row, col16(r.end.col)?);
        let rule = match &conditional.condition {
            Condition::GreaterThan(v) => Some(ConditionalFormatCellRule::GreaterThan(*v)),
            Condition::LessThan(v) => Some(ConditionalFormatCellRule::LessThan(*v)),
            Condition::Equal(v) => Some(ConditionalFormatCellRule::EqualTo(*v)),
            Condition::Between(a, b) => Some(ConditionalFormatCellRule::Between(*a, *b)),
            Condition::Formula(_) => None,
        };
        match (rule, &conditional.condition) {
            (Some(rule), _) => {
                let cf = ConditionalFormatCell::new().set_rule(rule).set_format(format);
                ws.add_conditional_format(r1, c1, r2, c2, &cf)?;
            }
            (None, Condition::Formula(expr)) => {
                let cf = ConditionalFormatFormula::new()
                    .set_rule(expr.as_str())
                    .set_format(format);
                ws.add_conditional_format(r1, c1, r2, c2, &cf)?;
            }
            (None, _) => {}
        }
    }

    if let Some(freeze) = sheet.freeze {
        if freeze.rows > 0 || freeze.columns > 0 {
            ws.set_freeze_panes(freeze.rows, col16(freeze.columns)?)?;
        }
    }
    if sheet.protected {
        ws.protect();
    }
    Ok(())
}

/// One `Format` per resolved style, indexed by `StyleId`
struct FormatTable<'s> {
    styles: &'s StyleTable,
    formats: Vec<Format>,
    fallback: Format,
}

impl<'s> FormatTable<'s> {
    fn new(styles: &'s StyleTable, default_font: Option<&str>) -> Self {
        let formats = styles
            .iter()
            .map(|(_, style)| to_format(style, default_font))
            .collect();
        Self {
            styles,
            formats,
            fallback: Format::new(),
        }
    }

    fn get(&self, id: StyleId) -> &Format {
        self.formats.get(id.index()).unwrap_or(&self.fallback)
    }
}

fn to_format(style: &ResolvedStyle, default_font: Option<&str>) -> Format {
    let mut f = Format::new();
    let font = &style.font;
    if font.bold {
        f = f.set_bold();
    }
    if font.italic {
        f = f.set_italic();
    }
    if font.underline {
        f = f.set_underline(FormatUnderline::Single);
    }
    if let Some(family) = font.family.as_deref().or(default_font) {
        f = f.set_font_name(family);
    }
    if let Some(size) = font.size_pt {
        f = f.set_font_size(size);
    }
    if let Some(color) = font.color {
        f = f.set_font_color(XlsxColor::RGB(color.to_rgb_u32()));
    }
    if let Some(fill) = style.fill {
        f = f.set_background_color(XlsxColor::RGB(fill.to_rgb_u32()));
    }

    if let Some(line) = &style.border.top {
        f = f
            .set_border_top(border(line))
            .set_border_top_color(XlsxColor::RGB(line.color.to_rgb_u32()));
    }
    if let Some(line) = &style.border.bottom {
        f = f
            .set_border_bottom(border(line))
            .set_border_bottom_color(XlsxColor::RGB(line.color.to_rgb_u32()));
    }
    if let Some(line) = &style.border.left {
        f = f
            .set_border_left(border(line))
            .set_border_left_color(XlsxColor::RGB(line.color.to_rgb_u32()));
    }
    if let Some(line) = &style.border.right {
        f = f
            .set_border_right(border(line))
            .set_border_right_color(XlsxColor::RGB(line.color.to_rgb_u32()));
    }

    if let Some(h) = style.alignment.horizontal {
        f = f.set_align(match h {
            HorizontalAlign::Left => FormatAlign::Left,
            HorizontalAlign::Center => FormatAlign::Center,
            HorizontalAlign::Right => FormatAlign::Right,
            HorizontalAlign::Justify => FormatAlign::Justify,
        });
    }
    if let Some(v) = style.alignment.vertical {
        f = f.set_align(match v {
            VerticalAlign::Top => FormatAlign::Top,
            VerticalAlign::Middle => FormatAlign::VerticalCenter,
            VerticalAlign::Bottom => FormatAlign::Bottom,
        });
    }
    if style.alignment.wrap {
        f = f.set_text_wrap();
    }

    if let Some(number) = &style.number_format {
        f = f.set_num_format(number.excel_code());
    }
    if !style.protection.locked {
        f = f.set_unlocked();
    }
    if style.protection.hidden {
        f = f.set_hidden();
    }
    f
}

fn border(line: &BorderLine) -> FormatBorder {
    match line.style {
        LineStyle::Solid if line.width_pt < 1.0 => FormatBorder::Thin,
        LineStyle::Solid if line.width_pt < 2.0 => FormatBorder::Medium,
        LineStyle::Solid => FormatBorder::Thick,
        LineStyle::Dashed if line.width_pt < 1.0 => FormatBorder::Dashed,
        LineStyle::Dashed => FormatBorder::MediumDashed,
        LineStyle::Dotted => FormatBorder::Dotted,
        LineStyle::Double => FormatBorder::Double,
    }
}

fn date_format(base: Format, has_number_format: bool, default: &str) -> Format {
    if has_number_format {
        base
    } else {
        base.set_num_format(default)
    }
}

fn excel_serial(dt: &NaiveDateTime) -> f64 {
    let days = f64::from(dt.date().num_days_from_ce() - EXCEL_EPOCH_DAYS_FROM_CE);
    days + f64::from(dt.time().num_seconds_from_midnight()) / 86_400.0
}

/// `$A$1:$B$2` without a sheet prefix
fn absolute(range: &RangeRef) -> String {
    let cell = |at: CellRef| format!("${}${}", column_to_letters(at.col), at.row + 1);
    if range.is_single_cell() {
        cell(range.start)
    } else {
        format!("{}:{}", cell(range.start), cell(range.end))
    }
}

fn col16(col: u32) -> SheetResult<u16> {
    u16::try_from(col).map_err(|_| {
        SheetError::InvalidDocument(format!("column {col} is beyond the XLSX column limit"))
    })
}

fn clamp_i32(n: i64) -> i32 {
    n.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_excel_serial() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(excel_serial(&dt), 45292.5);
    }

    #[test]
    fn test_absolute_range() {
        assert_eq!(absolute(&RangeRef::parse("B5:B6").unwrap()), "$B$5:$B$6");
        assert_eq!(absolute(&RangeRef::parse("C3").unwrap()), "$C$3");
    }

    #[test]
    fn test_border_mapping() {
        let color = crate::theme::Color::parse("#000000").unwrap();
        let thin = BorderLine {
            style: LineStyle::Solid,
            width_pt: 0.75,
            color,
        };
        let thick = BorderLine {
            width_pt: 2.5,
            ..thin
        };
        assert_eq!(border(&thin), FormatBorder::Thin);
        assert_eq!(border(&thick), FormatBorder::Thick);
    }
}
