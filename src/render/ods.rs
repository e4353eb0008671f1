//! Streaming OpenDocument spreadsheet writer
//!
//! Small parts (`meta.xml`, `settings.xml`, `styles.xml`) are built in memory.
//! `content.xml` is written row by row through a scratch buffer that is
//! flushed into the archive every `row_window` rows, so memory use does not
//! grow with the number of rows.

use super::package::{PackageWriter, ODS_MIMETYPE};
use super::styles::{cell_style_name, conditional_style_name, StyleCatalog};
use super::xml::{
    self, XmlWriter, NS_CALCEXT, NS_CONFIG, NS_DC, NS_FO, NS_META, NS_NUMBER, NS_OF, NS_OFFICE,
    NS_STYLE, NS_SVG, NS_TABLE, NS_TEXT, ODF_VERSION,
};
use super::{OutputFormat, RenderStats};
use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use crate::formula::to_openformula;
use crate::model::reference::quote_sheet_name;
use crate::model::workbook::format_number;
use crate::model::{
    column_to_letters, Cell, CellContent, CellRef, CellValue, Condition, DataValidation,
    MergedRegion, RangeRef, Row, Sheet, ValidationRule,
};
use std::io::{Seek, Write};
use tracing::{debug, info};

const PARTS: [&str; 4] = ["content.xml", "styles.xml", "meta.xml", "settings.xml"];

pub(crate) fn write_ods<W: Write + Seek>(doc: &Document, out: W) -> SheetResult<(W, RenderStats)> {
    let limits = *doc.limits();
    let catalog = StyleCatalog::collect(doc);

    let mut pkg = PackageWriter::new(out, limits);
    pkg.write_mimetype(ODS_MIMETYPE)?;
    pkg.write_manifest(ODS_MIMETYPE, &PARTS)?;
    pkg.add_entry("meta.xml", &meta_xml(doc)?)?;
    pkg.add_entry("settings.xml", &settings_xml(doc)?)?;
    pkg.add_entry("styles.xml", &catalog.styles_xml()?)?;

    let mut content = ContentWriter {
        pkg: &mut pkg,
        doc,
        catalog: &catalog,
        buf: xml::new_writer(),
        buffered_rows: 0,
        window: limits.row_window.max(1),
    };
    content.write()?;

    let (out, ctx) = pkg.finish()?;
    info!(
        sheets = doc.workbook().sheets.len(),
        rows = ctx.rows_written,
        bytes = ctx.total_bytes,
        "ODS package written"
    );
    let stats = RenderStats {
        format: OutputFormat::Ods,
        sheets: doc.workbook().sheets.len(),
        rows: ctx.rows_written,
        entries: ctx.entries,
        uncompressed_bytes: ctx.total_bytes,
        bytes_written: 0,
        peak_buffered_rows: ctx.peak_buffered_rows,
    };
    Ok((out, stats))
}

//==============================================================================
// content.xml
//==============================================================================

struct ContentWriter<'a, W: Write + Seek> {
    pkg: &'a mut PackageWriter<W>,
    doc: &'a Document,
    catalog: &'a StyleCatalog<'a>,
    /// Pending XML not yet handed to the archive
    buf: XmlWriter,
    buffered_rows: usize,
    window: usize,
}

impl<W: Write + Seek> ContentWriter<'_, W> {
    fn write(&mut self) -> SheetResult<()> {
        self.pkg.start_entry("content.xml")?;
        let w = &mut self.buf;
        xml::declaration(w)?;
        xml::start(
            w,
            "office:document-content",
            &[
                NS_OFFICE,
                NS_STYLE,
                NS_TEXT,
                NS_TABLE,
                NS_FO,
                NS_SVG,
                NS_NUMBER,
                NS_OF,
                NS_CALCEXT,
                ("office:version", ODF_VERSION),
            ],
        )?;
        self.catalog.write_font_faces(w)?;
        self.catalog.write_automatic_styles(w)?;
        xml::start(w, "office:body", &[])?;
        xml::start(w, "office:spreadsheet", &[])?;
        let validation_names = self.write_validations()?;
        self.flush()?;

        let doc = self.doc;
        for (idx, sheet) in doc.workbook().sheets.iter().enumerate() {
            self.write_table(sheet, &validation_names[idx])?;
        }

        self.write_named_expressions()?;
        let w = &mut self.buf;
        xml::end(w, "office:spreadsheet")?;
        xml::end(w, "office:body")?;
        xml::end(w, "office:document-content")?;
        self.flush()
    }

    fn flush(&mut self) -> SheetResult<()> {
        let bytes = std::mem::take(self.buf.get_mut());
        if !bytes.is_empty() {
            self.pkg.write(&bytes)?;
        }
        self.buffered_rows = 0;
        Ok(())
    }

    fn row_done(&mut self) -> SheetResult<()> {
        self.buffered_rows += 1;
        let ctx = self.pkg.context_mut();
        ctx.rows_written += 1;
        ctx.peak_buffered_rows = ctx.peak_buffered_rows.max(self.buffered_rows);
        if self.buffered_rows >= self.window {
            self.flush()?;
        }
        Ok(())
    }

    /// `table:content-validations` for every sheet; returns names per sheet
    fn write_validations(&mut self) -> SheetResult<Vec<Vec<String>>> {
        let sheets = &self.doc.workbook().sheets;
        let mut names: Vec<Vec<String>> = Vec::with_capacity(sheets.len());
        let mut counter = 0;
        let any = sheets.iter().any(|s| !s.validations.is_empty());
        if any {
            xml::start(&mut self.buf, "table:content-validations", &[])?;
        }
        for sheet in sheets {
            let mut sheet_names = Vec::new();
            for validation in &sheet.validations {
                counter += 1;
                let name = format!("val{counter}");
                let condition = validation_condition(&validation.rule);
                let base = odf_cell(&sheet.name, validation.range.start, false);
                let mut attrs = vec![
                    ("table:name", name.as_str()),
                    ("table:condition", condition.as_str()),
                    (
                        "table:allow-empty-cell",
                        if validation.allow_empty { "true" } else { "false" },
                    ),
                    ("table:base-cell-address", base.as_str()),
                ];
                if matches!(validation.rule, ValidationRule::List(_)) {
                    attrs.push(("table:display-list", "unsorted"));
                }
                xml::empty(&mut self.buf, "table:content-validation", &attrs)?;
                sheet_names.push(name);
            }
            names.push(sheet_names);
        }
        if any {
            xml::end(&mut self.buf, "table:content-validations")?;
        }
        Ok(names)
    }

    fn write_table(&mut self, sheet: &Sheet, validations: &[String]) -> SheetResult<()> {
        {
            let ctx = self.pkg.context_mut();
            ctx.sheet = Some(sheet.name.clone());
            ctx.row = None;
        }
        debug!(sheet = %sheet.name, rows = sheet.rows.len(), "writing table");

        let mut attrs = vec![("table:name", sheet.name.as_str()), ("table:style-name", "ta1")];
        if sheet.protected {
            attrs.push(("table:protected", "true"));
        }
        xml::start(&mut self.buf, "table:table", &attrs)?;
        self.write_columns(sheet)?;

        let mut regions = ActiveRegions::new(sheet, validations);
        let mut depth: u8 = 0;
        for row in &sheet.rows {
            self.pkg.context_mut().row = Some(row.index);
            regions.advance(row.index);
            let level = row.outline_level.unwrap_or(0);
            while depth < level {
                xml::start(&mut self.buf, "table:table-row-group", &[])?;
                depth += 1;
            }
            while depth > level {
                xml::end(&mut self.buf, "table:table-row-group")?;
                depth -= 1;
            }
            self.write_row(sheet, row, &regions)?;
            self.row_done()?;
        }
        while depth > 0 {
            xml::end(&mut self.buf, "table:table-row-group")?;
            depth -= 1;
        }

        self.write_conditional_formats(sheet)?;
        xml::end(&mut self.buf, "table:table")?;
        self.pkg.context_mut().row = None;
        Ok(())
    }

    fn write_columns(&mut self, sheet: &Sheet) -> SheetResult<()> {
        for column in &sheet.columns {
            let style = column
                .width
                .as_deref()
                .and_then(|w| self.catalog.column_style_name(w));
            let default_cell = column.resolved_style().map(cell_style_name);
            let mut attrs = Vec::new();
            if let Some(style) = &style {
                attrs.push(("table:style-name", style.as_str()));
            }
            if let Some(default_cell) = &default_cell {
                attrs.push(("table:default-cell-style-name", default_cell.as_str()));
            }
            xml::empty(&mut self.buf, "table:table-column", &attrs)?;
        }
        let declared = sheet.columns.len() as u32;
        let extent = sheet.column_extent().max(1);
        if extent > declared {
            let repeat = (extent - declared).to_string();
            let attrs: &[(&str, &str)] = if extent - declared > 1 {
                &[("table:number-columns-repeated", repeat.as_str())]
            } else {
                &[]
            };
            xml::empty(&mut self.buf, "table:table-column", attrs)?;
        }
        Ok(())
    }

    fn write_row(&mut self, sheet: &Sheet, row: &Row, regions: &ActiveRegions<'_>) -> SheetResult<()> {
        let style = row
            .height
            .as_deref()
            .and_then(|h| self.catalog.row_style_name(h));
        let default_cell = row.resolved_style().map(cell_style_name);
        let mut attrs = Vec::new();
        if let Some(style) = &style {
            attrs.push(("table:style-name", style.as_str()));
        }
        if let Some(default_cell) = &default_cell {
            attrs.push(("table:default-cell-style-name", default_cell.as_str()));
        }
        xml::start(&mut self.buf, "table:table-row", &attrs)?;

        let extent = regions.extent(row);
        if extent == 0 {
            xml::empty(&mut self.buf, "table:table-cell", &[])?;
        }
        let mut col = 0;
        while col < extent {
            let at = CellRef::new(row.index, col);
            if regions.is_covered(at) {
                let run = run_length(col, extent, |c| regions.is_covered(CellRef::new(row.index, c)));
                write_repeated(&mut self.buf, "table:covered-table-cell", run, None)?;
                col += run;
                continue;
            }
            if let Some(cell) = row.cells.get(&col) {
                let merge = regions.anchored_at(at);
                self.write_cell(sheet, at, cell, merge, regions.validation_at(at))?;
                col += 1;
                continue;
            }
            let validation = regions.validation_at(at);
            let run = run_length(col, extent, |c| {
                let next = CellRef::new(row.index, c);
                !row.cells.contains_key(&c)
                    && !regions.is_covered(next)
                    && regions.validation_at(next) == validation
            });
            write_repeated(&mut self.buf, "table:table-cell", run, validation)?;
            col += run;
        }

        xml::end(&mut self.buf, "table:table-row")
    }

    fn write_cell(
        &mut self,
        sheet: &Sheet,
        at: CellRef,
        cell: &Cell,
        merge: Option<&MergedRegion>,
        validation: Option<&str>,
    ) -> SheetResult<()> {
        let mut attrs: Vec<(&str, String)> = Vec::new();
        if let Some(id) = cell.resolved_style() {
            attrs.push(("table:style-name", cell_style_name(id)));
        }
        if let Some(merge) = merge {
            attrs.push(("table:number-columns-spanned", merge.range.columns().to_string()));
            attrs.push(("table:number-rows-spanned", merge.range.rows().to_string()));
        }
        if let Some(validation) = validation {
            attrs.push(("table:content-validation-name", validation.to_string()));
        }

        let display = match &cell.content {
            CellContent::Formula(formula) => {
                attrs.push(("table:formula", to_openformula(formula)?));
                None
            }
            CellContent::Value(value) => value_attributes(value, &mut attrs).map_err(|reason| {
                SheetError::InvalidDocument(format!("{}!{}: {reason}", sheet.name, at.to_a1()))
            })?,
        };

        let attrs: Vec<(&str, &str)> = attrs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        if display.is_none() && cell.comment.is_none() {
            return xml::empty(&mut self.buf, "table:table-cell", &attrs);
        }
        xml::start(&mut self.buf, "table:table-cell", &attrs)?;
        if let Some(comment) = &cell.comment {
            xml::start(&mut self.buf, "office:annotation", &[])?;
            xml::paragraphs(&mut self.buf, comment)?;
            xml::end(&mut self.buf, "office:annotation")?;
        }
        if let Some(display) = &display {
            xml::paragraphs(&mut self.buf, display)?;
        }
        xml::end(&mut self.buf, "table:table-cell")
    }

    fn write_conditional_formats(&mut self, sheet: &Sheet) -> SheetResult<()> {
        let formats: Vec<_> = sheet
            .conditional_formats
            .iter()
            .filter_map(|f| f.resolved_style().map(|id| (f, id)))
            .collect();
        if formats.is_empty() {
            return Ok(());
        }
        xml::start(&mut self.buf, "calcext:conditional-formats", &[])?;
        for (format, id) in formats {
            let target = odf_range(&sheet.name, &format.range, false);
            xml::start(
                &mut self.buf,
                "calcext:conditional-format",
                &[("calcext:target-range-address", target.as_str())],
            )?;
            let style = conditional_style_name(id);
            let value = condition_value(&format.condition);
            let base = odf_cell(&sheet.name, format.range.start, false);
            xml::empty(
                &mut self.buf,
                "calcext:condition",
                &[
                    ("calcext:apply-style-name", style.as_str()),
                    ("calcext:value", value.as_str()),
                    ("calcext:base-cell-address", base.as_str()),
                ],
            )?;
            xml::end(&mut self.buf, "calcext:conditional-format")?;
        }
        xml::end(&mut self.buf, "calcext:conditional-formats")
    }

    /// The single `table:named-expressions` container, after all tables
    fn write_named_expressions(&mut self) -> SheetResult<()> {
        let names: Vec<_> = self.doc.workbook().all_named_ranges().collect();
        if names.is_empty() {
            return xml::empty(&mut self.buf, "table:named-expressions", &[]);
        }
        xml::start(&mut self.buf, "table:named-expressions", &[])?;
        for named in names {
            let sheet = named.range.sheet.as_deref().unwrap_or_default();
            let base = odf_cell(sheet, named.range.start, true);
            let range = odf_range(sheet, &named.range, true);
            xml::empty(
                &mut self.buf,
                "table:named-range",
                &[
                    ("table:name", named.name.as_str()),
                    ("table:base-cell-address", base.as_str()),
                    ("table:cell-range-address", range.as_str()),
                ],
            )?;
        }
        xml::end(&mut self.buf, "table:named-expressions")
    }
}

/// Merges and validations overlapping the row being written
///
/// Rows arrive in ascending index order, so regions are admitted once the
/// cursor reaches their first row and retired after their last one.
struct ActiveRegions<'s> {
    merges: Vec<&'s MergedRegion>,
    /// (declaration order, validation, name)
    validations: Vec<(usize, &'s DataValidation, &'s str)>,
    next_merge: usize,
    next_validation: usize,
    live_merges: Vec<&'s MergedRegion>,
    live_validations: Vec<(usize, &'s DataValidation, &'s str)>,
}

impl<'s> ActiveRegions<'s> {
    fn new(sheet: &'s Sheet, names: &'s [String]) -> Self {
        let mut merges: Vec<&MergedRegion> = sheet.merges.iter().collect();
        merges.sort_by_key(|m| m.range.start.row);
        let mut validations: Vec<_> = sheet
            .validations
            .iter()
            .zip(names)
            .enumerate()
            .map(|(i, (v, name))| (i, v, name.as_str()))
            .collect();
        validations.sort_by_key(|(_, v, _)| v.range.start.row);
        Self {
            merges,
            validations,
            next_merge: 0,
            next_validation: 0,
            live_merges: Vec::new(),
            live_validations: Vec::new(),
        }
    }

    fn advance(&mut self, row: u32) {
        while let Some(&m) = self.merges.get(self.next_merge) {
            if m.range.start.row > row {
                break;
            }
            self.live_merges.push(m);
            self.next_merge += 1;
        }
        self.live_merges.retain(|m| m.range.end.row >= row);

        let before = self.live_validations.len();
        while let Some(&v) = self.validations.get(self.next_validation) {
            if v.1.range.start.row > row {
                break;
            }
            self.live_validations.push(v);
            self.next_validation += 1;
        }
        self.live_validations.retain(|(_, v, _)| v.range.end.row >= row);
        if self.live_validations.len() != before {
            // first declared validation wins where several overlap
            self.live_validations.sort_by_key(|(i, _, _)| *i);
        }
    }

    /// One past the last column the row must describe: its cells, merges
    /// reaching into it and validations covering it
    fn extent(&self, row: &Row) -> u32 {
        let from_merges = self.live_merges.iter().map(|m| m.range.end.col + 1);
        let from_validations = self.live_validations.iter().map(|(_, v, _)| v.range.end.col + 1);
        from_merges.chain(from_validations).fold(row.extent(), u32::max)
    }

    fn is_covered(&self, at: CellRef) -> bool {
        self.live_merges.iter().any(|m| m.covers(at))
    }

    fn anchored_at(&self, at: CellRef) -> Option<&'s MergedRegion> {
        self.live_merges.iter().copied().find(|m| m.anchor() == at)
    }

    fn validation_at(&self, at: CellRef) -> Option<&'s str> {
        self.live_validations
            .iter()
            .find(|(_, v, _)| v.range.contains(at))
            .map(|&(_, _, name)| name)
    }
}

fn run_length(start: u32, extent: u32, same: impl Fn(u32) -> bool) -> u32 {
    let mut n = 1;
    while start + n < extent && same(start + n) {
        n += 1;
    }
    n
}

fn write_repeated(
    w: &mut XmlWriter,
    element: &str,
    count: u32,
    validation: Option<&str>,
) -> SheetResult<()> {
    let repeat = count.to_string();
    let mut attrs = Vec::new();
    if count > 1 {
        attrs.push(("table:number-columns-repeated", repeat.as_str()));
    }
    if let Some(validation) = validation {
        attrs.push(("table:content-validation-name", validation));
    }
    xml::empty(w, element, &attrs)
}

/// Push value attributes and return the display text, if any
fn value_attributes(
    value: &CellValue,
    attrs: &mut Vec<(&'static str, String)>,
) -> Result<Option<String>, String> {
    fn typed(attrs: &mut Vec<(&'static str, String)>, kind: &str) {
        attrs.push(("office:value-type", kind.to_string()));
        attrs.push(("calcext:value-type", kind.to_string()));
    }
    let display = match value {
        CellValue::Empty => return Ok(None),
        CellValue::Text(text) => {
            typed(attrs, "string");
            text.clone()
        }
        CellValue::Number(n) => {
            if !n.is_finite() {
                return Err(format!("number {n} cannot be stored"));
            }
            typed(attrs, "float");
            attrs.push(("office:value", n.to_string()));
            format_number(*n)
        }
        CellValue::Boolean(b) => {
            typed(attrs, "boolean");
            attrs.push(("office:boolean-value", b.to_string()));
            value.to_string()
        }
        CellValue::Date(d) => {
            typed(attrs, "date");
            attrs.push(("office:date-value", d.format("%Y-%m-%d").to_string()));
            value.to_string()
        }
        CellValue::DateTime(dt) => {
            typed(attrs, "date");
            attrs.push(("office:date-value", dt.format("%Y-%m-%dT%H:%M:%S").to_string()));
            value.to_string()
        }
    };
    Ok(Some(display))
}

fn validation_condition(rule: &ValidationRule) -> String {
    match rule {
        ValidationRule::List(values) => {
            let items: Vec<String> = values
                .iter()
                .map(|v| format!("\"{}\"", v.replace('"', "\"\"")))
                .collect();
            format!("of:cell-content-is-in-list({})", items.join(";"))
        }
        ValidationRule::WholeNumber { min, max } => format!(
            "of:cell-content-is-whole-number() and cell-content-is-between({min};{max})"
        ),
        ValidationRule::Decimal { min, max } => format!(
            "of:cell-content-is-decimal-number() and cell-content-is-between({};{})",
            format_number(*min),
            format_number(*max)
        ),
    }
}

fn condition_value(condition: &Condition) -> String {
    match condition {
        Condition::GreaterThan(v) => format!(">{}", format_number(*v)),
        Condition::LessThan(v) => format!("<{}", format_number(*v)),
        Condition::Equal(v) => format!("={}", format_number(*v)),
        Condition::Between(a, b) => {
            format!("between({},{})", format_number(*a), format_number(*b))
        }
        Condition::Formula(f) => format!("formula-is({})", f.trim_start_matches('=')),
    }
}

/// `Sheet1.B2`, or `$Sheet1.$B$2` when absolute
fn odf_cell(sheet: &str, at: CellRef, absolute: bool) -> String {
    let sheet = quote_sheet_name(sheet);
    let col = column_to_letters(at.col);
    let row = at.row + 1;
    if absolute {
        format!("${sheet}.${col}${row}")
    } else {
        format!("{sheet}.{col}{row}")
    }
}

/// `$Sheet1.$A$1:.$B$2` (absolute) or `Sheet1.A1:Sheet1.B2`
fn odf_range(sheet: &str, range: &RangeRef, absolute: bool) -> String {
    let start = odf_cell(sheet, range.start, absolute);
    if range.is_single_cell() {
        return start;
    }
    if absolute {
        format!(
            "{start}:.${}${}",
            column_to_letters(range.end.col),
            range.end.row + 1
        )
    } else {
        format!("{start}:{}", odf_cell(sheet, range.end, false))
    }
}

//==============================================================================
// meta.xml / settings.xml
//==============================================================================

fn meta_xml(doc: &Document) -> SheetResult<Vec<u8>> {
    let props = &doc.workbook().properties;
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let generator = format!("sheetforge/{}", env!("CARGO_PKG_VERSION"));

    let mut w = xml::new_writer();
    xml::declaration(&mut w)?;
    xml::start(
        &mut w,
        "office:document-meta",
        &[NS_OFFICE, NS_META, NS_DC, ("office:version", ODF_VERSION)],
    )?;
    xml::start(&mut w, "office:meta", &[])?;
    xml::text_element(&mut w, "meta:generator", &[], &generator)?;
    if let Some(title) = &props.title {
        xml::text_element(&mut w, "dc:title", &[], title)?;
    }
    if let Some(subject) = &props.subject {
        xml::text_element(&mut w, "dc:subject", &[], subject)?;
    }
    if let Some(description) = &props.description {
        xml::text_element(&mut w, "dc:description", &[], description)?;
    }
    if let Some(author) = &props.author {
        xml::text_element(&mut w, "meta:initial-creator", &[], author)?;
        xml::text_element(&mut w, "dc:creator", &[], author)?;
    }
    for keyword in &props.keywords {
        xml::text_element(&mut w, "meta:keyword", &[], keyword)?;
    }
    xml::text_element(&mut w, "meta:creation-date", &[], &now)?;
    xml::text_element(&mut w, "dc:date", &[], &now)?;

    let sheets = &doc.workbook().sheets;
    let tables = sheets.len().to_string();
    let cells = sheets
        .iter()
        .flat_map(|s| s.rows.iter())
        .map(|r| r.cells.len())
        .sum::<usize>()
        .to_string();
    xml::empty(
        &mut w,
        "meta:document-statistic",
        &[("meta:table-count", tables.as_str()), ("meta:cell-count", cells.as_str())],
    )?;
    xml::end(&mut w, "office:meta")?;
    xml::end(&mut w, "office:document-meta")?;
    Ok(w.into_inner())
}

/// View settings; only frozen panes are recorded
fn settings_xml(doc: &Document) -> SheetResult<Vec<u8>> {
    let mut w = xml::new_writer();
    xml::declaration(&mut w)?;
    xml::start(
        &mut w,
        "office:document-settings",
        &[NS_OFFICE, NS_CONFIG, ("office:version", ODF_VERSION)],
    )?;
    xml::start(&mut w, "office:settings", &[])?;
    xml::start(
        &mut w,
        "config:config-item-set",
        &[("config:name", "ooo:view-settings")],
    )?;
    xml::start(
        &mut w,
        "config:config-item-map-indexed",
        &[("config:name", "Views")],
    )?;
    xml::start(&mut w, "config:config-item-map-entry", &[])?;
    config_item(&mut w, "ViewId", "string", "view1")?;
    if let Some(first) = doc.workbook().sheets.first() {
        config_item(&mut w, "ActiveTable", "string", &first.name)?;
    }
    xml::start(
        &mut w,
        "config:config-item-map-named",
        &[("config:name", "Tables")],
    )?;
    for sheet in &doc.workbook().sheets {
        let Some(freeze) = sheet.freeze.filter(|f| f.rows > 0 || f.columns > 0) else {
            continue;
        };
        xml::start(
            &mut w,
            "config:config-item-map-entry",
            &[("config:name", sheet.name.as_str())],
        )?;
        let cols = freeze.columns.to_string();
        let rows = freeze.rows.to_string();
        let split = |n: u32| if n > 0 { "2" } else { "0" };
        config_item(&mut w, "HorizontalSplitMode", "short", split(freeze.columns))?;
        config_item(&mut w, "VerticalSplitMode", "short", split(freeze.rows))?;
        config_item(&mut w, "HorizontalSplitPosition", "int", &cols)?;
        config_item(&mut w, "VerticalSplitPosition", "int", &rows)?;
        config_item(&mut w, "ActiveSplitRange", "short", "2")?;
        config_item(&mut w, "PositionLeft", "int", "0")?;
        config_item(&mut w, "PositionRight", "int", &cols)?;
        config_item(&mut w, "PositionTop", "int", "0")?;
        config_item(&mut w, "PositionBottom", "int", &rows)?;
        xml::end(&mut w, "config:config-item-map-entry")?;
    }
    xml::end(&mut w, "config:config-item-map-named")?;
    xml::end(&mut w, "config:config-item-map-entry")?;
    xml::end(&mut w, "config:config-item-map-indexed")?;
    xml::end(&mut w, "config:config-item-set")?;
    xml::end(&mut w, "office:settings")?;
    xml::end(&mut w, "office:document-settings")?;
    Ok(w.into_inner())
}

fn config_item(w: &mut XmlWriter, name: &str, kind: &str, value: &str) -> SheetResult<()> {
    xml::text_element(
        w,
        "config:config-item",
        &[("config:name", name), ("config:type", kind)],
        value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_odf_addresses() {
        let range = RangeRef::parse("A1:B2").unwrap();
        assert_eq!(odf_range("Data", &range, true), "$Data.$A$1:.$B$2");
        assert_eq!(odf_range("My Sheet", &range, false), "'My Sheet'.A1:'My Sheet'.B2");
        assert_eq!(odf_cell("Data", CellRef::new(4, 1), true), "$Data.$B$5");
    }

    #[test]
    fn test_validation_conditions() {
        assert_eq!(
            validation_condition(&ValidationRule::List(vec!["Open".into(), "Say \"hi\"".into()])),
            "of:cell-content-is-in-list(\"Open\";\"Say \"\"hi\"\"\")"
        );
        assert_eq!(
            validation_condition(&ValidationRule::WholeNumber { min: 1, max: 10 }),
            "of:cell-content-is-whole-number() and cell-content-is-between(1;10)"
        );
    }

    #[test]
    fn test_condition_values() {
        assert_eq!(condition_value(&Condition::GreaterThan(100.0)), ">100");
        assert_eq!(condition_value(&Condition::Between(1.5, 2.0)), "between(1.5,2)");
        assert_eq!(condition_value(&Condition::Formula("=B2>C2".into())), "formula-is(B2>C2)");
    }

    #[test]
    fn test_active_regions_follow_the_row_cursor() {
        let mut sheet = Sheet::new("S");
        sheet.merges.push(MergedRegion::new(RangeRef::parse("B2:C3").unwrap()));
        sheet.merges.push(MergedRegion::new(RangeRef::parse("A6:B6").unwrap()));
        for range in ["A3:A5", "A1:D4"] {
            sheet.validations.push(DataValidation {
                range: RangeRef::parse(range).unwrap(),
                rule: ValidationRule::List(vec!["x".into()]),
                allow_empty: true,
            });
        }
        let names = vec!["val1".to_string(), "val2".to_string()];
        let mut regions = ActiveRegions::new(&sheet, &names);

        regions.advance(0);
        assert_eq!(regions.extent(&Row::new(0)), 4);
        assert_eq!(regions.validation_at(CellRef::new(0, 0)), Some("val2"));
        assert!(regions.live_merges.is_empty());

        regions.advance(1);
        assert!(regions.anchored_at(CellRef::new(1, 1)).is_some());
        assert!(regions.is_covered(CellRef::new(1, 2)));

        regions.advance(2);
        assert!(regions.is_covered(CellRef::new(2, 1)));
        assert_eq!(regions.validation_at(CellRef::new(2, 0)), Some("val1"));

        regions.advance(4);
        assert!(regions.live_merges.is_empty());
        assert_eq!(regions.extent(&Row::new(4)), 1);

        regions.advance(5);
        assert!(regions.anchored_at(CellRef::new(5, 0)).is_some());
        assert!(regions.live_validations.is_empty());
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let mut attrs = Vec::new();
        assert!(value_attributes(&CellValue::Number(f64::NAN), &mut attrs).is_err());
        let display = value_attributes(&CellValue::Number(2.5), &mut attrs).unwrap();
        assert_eq!(display.as_deref(), Some("2.5"));
    }
}
