//! Hardened ODS reader
//!
//! Reads packages produced by the writer (and plain ODS files from other
//! tools) back into a [`Workbook`]. The archive is inspected against
//! [`ResourceLimits`] before anything is inflated, every entry read is
//! bounded, DOCTYPE declarations are refused, and repeated rows or cells are
//! only expanded up to fixed caps.

use super::package::{inspect_archive, read_entry_limited, ODS_MIMETYPE};
use crate::config::ResourceLimits;
use crate::error::{SheetError, SheetResult};
use crate::formula::from_openformula;
use crate::model::{
    Cell, CellContent, CellRef, CellValue, DocumentProperties, MergedRegion, NamedRange,
    NamedRangeScope, RangeRef, Row, Sheet, Workbook,
};
use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

pub use crate::model::reference::{MAX_COLUMNS, MAX_ROWS};

/// Cap on materialized cells across the whole document
pub const MAX_CELLS: u64 = 10_000_000;

const MIMETYPE_MAX_BYTES: u64 = 1024;

/// Read an ODS file from disk
pub fn read_document(path: &Path, limits: &ResourceLimits) -> SheetResult<Workbook> {
    let file = File::open(path).map_err(|e| SheetError::io_at(path, e))?;
    read_workbook(BufReader::new(file), limits)
}

/// Read an ODS package from any seekable source
pub fn read_workbook<R: Read + Seek>(source: R, limits: &ResourceLimits) -> SheetResult<Workbook> {
    let mut archive = ZipArchive::new(source)?;
    let summary = inspect_archive(&mut archive, limits)?;
    debug!(entries = summary.entries, "archive accepted");

    let mimetype = read_entry_limited(&mut archive, "mimetype", MIMETYPE_MAX_BYTES, limits)?;
    if mimetype != ODS_MIMETYPE.as_bytes() {
        return Err(SheetError::InvalidDocument(format!(
            "mimetype is '{}', expected '{ODS_MIMETYPE}'",
            String::from_utf8_lossy(&mimetype)
        )));
    }

    let mut budget = limits.max_uncompressed_bytes;
    let content = read_entry_limited(&mut archive, "content.xml", budget, limits)?;
    budget = budget.saturating_sub(content.len() as u64);
    let mut workbook = ContentParser::default().parse(&content)?;

    if archive.index_for_name("meta.xml").is_some() {
        let meta = read_entry_limited(&mut archive, "meta.xml", budget, limits)?;
        workbook.properties = parse_meta(&meta)?;
    }

    debug!(
        sheets = workbook.sheets.len(),
        names = workbook.named_ranges.len(),
        "document read"
    );
    Ok(workbook)
}

fn reject_doctype() -> SheetError {
    SheetError::UnsafeXml("DOCTYPE declarations are not allowed".to_string())
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> SheetResult<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == name {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_u32(e: &BytesStart<'_>, name: &[u8]) -> SheetResult<Option<u32>> {
    match attr(e, name)? {
        Some(text) => text.trim().parse::<u32>().map(Some).map_err(|_| {
            SheetError::InvalidDocument(format!(
                "attribute {} has non-numeric value '{text}'",
                String::from_utf8_lossy(name)
            ))
        }),
        None => Ok(None),
    }
}

//==============================================================================
// content.xml
//==============================================================================

/// Attributes of a `table:table-cell` seen so far
#[derive(Debug, Default)]
struct PendingCell {
    value_type: Option<String>,
    value: Option<String>,
    boolean: Option<String>,
    date: Option<String>,
    formula: Option<String>,
    repeat: u32,
    col_span: u32,
    row_span: u32,
    paragraphs: Vec<String>,
    annotation: Vec<String>,
}

#[derive(Debug, Default)]
struct PendingRow {
    repeat: u32,
    col: u32,
    cells: Vec<(u32, Cell)>,
    /// (column, columns spanned, rows spanned)
    spans: Vec<(u32, u32, u32)>,
}

#[derive(Default)]
struct ContentParser {
    workbook: Workbook,
    sheet: Option<Sheet>,
    /// Empty rows not yet materialized; dropped if nothing follows them
    deferred_rows: u32,
    row: Option<PendingRow>,
    cell: Option<PendingCell>,
    group_depth: u8,
    in_annotation: bool,
    in_covered: bool,
    paragraph: Option<String>,
    cells_materialized: u64,
}

impl ContentParser {
    fn parse(mut self, bytes: &[u8]) -> SheetResult<Workbook> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::DocType(_) => return Err(reject_doctype()),
                Event::Start(e) => self.start(&e, false)?,
                Event::Empty(e) => {
                    self.start(&e, true)?;
                    self.end(e.name().as_ref())?;
                }
                Event::End(e) => self.end(e.name().as_ref())?,
                Event::Text(t) => self.text(&t.unescape()?),
                Event::CData(t) => self.text(&String::from_utf8_lossy(&t)),
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(self.workbook)
    }

    fn start(&mut self, e: &BytesStart<'_>, empty: bool) -> SheetResult<()> {
        match e.name().as_ref() {
            b"table:table" => {
                let name = attr(e, b"table:name")?.unwrap_or_else(|| {
                    format!("Sheet{}", self.workbook.sheets.len() + 1)
                });
                let mut sheet = Sheet::new(name);
                sheet.protected = attr(e, b"table:protected")?.as_deref() == Some("true");
                self.sheet = Some(sheet);
                self.deferred_rows = 0;
                self.group_depth = 0;
            }
            b"table:table-row-group" => {
                self.group_depth = self.group_depth.saturating_add(1);
            }
            b"table:table-row" => {
                self.row = Some(PendingRow {
                    repeat: attr_u32(e, b"table:number-rows-repeated")?.unwrap_or(1).max(1),
                    ..PendingRow::default()
                });
            }
            b"table:table-cell" => {
                self.cell = Some(PendingCell {
                    value_type: attr(e, b"office:value-type")?,
                    value: attr(e, b"office:value")?,
                    boolean: attr(e, b"office:boolean-value")?,
                    date: attr(e, b"office:date-value")?,
                    formula: attr(e, b"table:formula")?,
                    repeat: attr_u32(e, b"table:number-columns-repeated")?.unwrap_or(1).max(1),
                    col_span: attr_u32(e, b"table:number-columns-spanned")?.unwrap_or(1),
                    row_span: attr_u32(e, b"table:number-rows-spanned")?.unwrap_or(1),
                    ..PendingCell::default()
                });
            }
            b"table:covered-table-cell" => {
                let repeat = attr_u32(e, b"table:number-columns-repeated")?.unwrap_or(1).max(1);
                if let Some(row) = &mut self.row {
                    row.col = row.col.saturating_add(repeat);
                }
                self.in_covered = !empty;
            }
            b"office:annotation" => self.in_annotation = true,
            b"text:p" | b"text:h" if self.cell.is_some() && !self.in_covered => {
                self.paragraph = Some(String::new());
            }
            b"text:s" => {
                let count = attr_u32(e, b"text:c")?.unwrap_or(1).min(1024);
                self.text(&" ".repeat(count as usize));
            }
            b"text:tab" => self.text("\t"),
            b"text:line-break" => self.text("\n"),
            b"table:named-range" => self.named_range(e)?,
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) -> SheetResult<()> {
        match name {
            b"table:table" => {
                if let Some(sheet) = self.sheet.take() {
                    self.workbook.sheets.push(sheet);
                }
            }
            b"table:table-row-group" => self.group_depth = self.group_depth.saturating_sub(1),
            b"table:table-row" => {
                if let Some(row) = self.row.take() {
                    self.commit_row(row)?;
                }
            }
            b"table:table-cell" => {
                if let Some(cell) = self.cell.take() {
                    self.commit_cell(cell)?;
                }
            }
            b"table:covered-table-cell" => self.in_covered = false,
            b"office:annotation" => self.in_annotation = false,
            b"text:p" | b"text:h" => {
                if let (Some(text), Some(cell)) = (self.paragraph.take(), self.cell.as_mut()) {
                    if self.in_annotation {
                        cell.annotation.push(text);
                    } else {
                        cell.paragraphs.push(text);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(paragraph) = &mut self.paragraph {
            paragraph.push_str(text);
        }
    }

    fn commit_cell(&mut self, pending: PendingCell) -> SheetResult<()> {
        let Some(row) = self.row.as_mut() else {
            return Ok(());
        };
        let start = row.col;
        row.col = row.col.saturating_add(pending.repeat);

        let content = cell_content(&pending)?;
        let comment = (!pending.annotation.is_empty()).then(|| pending.annotation.join("\n"));
        let spanned = pending.col_span > 1 || pending.row_span > 1;
        if content.is_blank() && comment.is_none() && !spanned {
            return Ok(());
        }
        if row.col > MAX_COLUMNS {
            return Err(SheetError::ResourceLimit {
                limit: "column count",
                actual: u64::from(row.col),
                max: u64::from(MAX_COLUMNS),
                entry: Some("content.xml".to_string()),
            });
        }
        if spanned {
            let col_span = pending.col_span.max(1);
            let end = u64::from(start) + u64::from(col_span);
            if end > u64::from(MAX_COLUMNS) {
                return Err(SheetError::ResourceLimit {
                    limit: "column count",
                    actual: end,
                    max: u64::from(MAX_COLUMNS),
                    entry: Some("content.xml (merged cell)".to_string()),
                });
            }
            row.spans.push((start, col_span, pending.row_span.max(1)));
        }
        if content.is_blank() && comment.is_none() {
            return Ok(());
        }
        for col in start..row.col {
            let mut cell = Cell::new(content.clone());
            cell.comment = comment.clone();
            row.cells.push((col, cell));
        }
        Ok(())
    }

    fn commit_row(&mut self, pending: PendingRow) -> SheetResult<()> {
        let Some(sheet) = self.sheet.as_mut() else {
            return Ok(());
        };
        if pending.cells.is_empty() && pending.spans.is_empty() {
            self.deferred_rows = self.deferred_rows.saturating_add(pending.repeat);
            return Ok(());
        }

        let first = sheet.row_count();
        let total = u64::from(first) + u64::from(self.deferred_rows) + u64::from(pending.repeat);
        if total > u64::from(MAX_ROWS) {
            return Err(SheetError::ResourceLimit {
                limit: "row count",
                actual: total,
                max: u64::from(MAX_ROWS),
                entry: Some(format!("content.xml (sheet '{}')", sheet.name)),
            });
        }
        let added = u64::from(pending.repeat) * pending.cells.len() as u64;
        self.cells_materialized = self.cells_materialized.saturating_add(added);
        if self.cells_materialized > MAX_CELLS {
            return Err(SheetError::ResourceLimit {
                limit: "cell count",
                actual: self.cells_materialized,
                max: MAX_CELLS,
                entry: Some(format!("content.xml (sheet '{}')", sheet.name)),
            });
        }

        for _ in 0..self.deferred_rows {
            let index = sheet.row_count();
            sheet.rows.push(Row::new(index));
        }
        self.deferred_rows = 0;

        let row_index = sheet.row_count();
        if let Some(rows) = pending.spans.iter().map(|&(_, _, rows)| rows).max() {
            let end = u64::from(row_index) + u64::from(rows);
            if end > u64::from(MAX_ROWS) {
                return Err(SheetError::ResourceLimit {
                    limit: "row count",
                    actual: end,
                    max: u64::from(MAX_ROWS),
                    entry: Some(format!("content.xml (sheet '{}', merged cell)", sheet.name)),
                });
            }
        }
        for (col, cols, rows) in &pending.spans {
            let start = CellRef::new(row_index, *col);
            let end = CellRef::new(row_index + rows - 1, col + cols - 1);
            sheet.merges.push(MergedRegion::new(RangeRef::new(start, end)));
        }
        for _ in 0..pending.repeat {
            let mut row = Row::new(sheet.row_count());
            if self.group_depth > 0 {
                row.outline_level = Some(self.group_depth);
            }
            row.cells = pending.cells.iter().cloned().collect();
            sheet.rows.push(row);
        }
        Ok(())
    }

    fn named_range(&mut self, e: &BytesStart<'_>) -> SheetResult<()> {
        let (Some(name), Some(address)) = (
            attr(e, b"table:name")?,
            attr(e, b"table:cell-range-address")?,
        ) else {
            return Ok(());
        };
        match parse_odf_range(&address) {
            Some(range) => self.workbook.named_ranges.push(NamedRange {
                name,
                range,
                scope: NamedRangeScope::Workbook,
            }),
            None => warn!(name = %name, address = %address, "skipping unreadable named range"),
        }
        Ok(())
    }
}

fn cell_content(cell: &PendingCell) -> SheetResult<CellContent> {
    if let Some(formula) = &cell.formula {
        return Ok(CellContent::Formula(from_openformula(formula)?));
    }
    let text = cell.paragraphs.join("\n");
    let bad = |what: &str, raw: &str| {
        SheetError::InvalidDocument(format!("cannot read {what} value '{raw}'"))
    };
    let value = match cell.value_type.as_deref() {
        Some("float" | "percentage" | "currency") => {
            let raw = cell.value.as_deref().unwrap_or_default();
            CellValue::Number(raw.trim().parse().map_err(|_| bad("numeric", raw))?)
        }
        Some("boolean") => CellValue::Boolean(cell.boolean.as_deref() == Some("true")),
        Some("date") => {
            let raw = cell.date.as_deref().unwrap_or_default();
            parse_date(raw).ok_or_else(|| bad("date", raw))?
        }
        Some(_) => CellValue::Text(text),
        None if text.is_empty() => CellValue::Empty,
        None => CellValue::Text(text),
    };
    Ok(CellContent::Value(value))
}

fn parse_date(raw: &str) -> Option<CellValue> {
    if raw.contains('T') {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(CellValue::DateTime)
    } else {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(CellValue::Date)
    }
}

/// Parse `$Data.$B$5:.$B$6`, `'My Sheet'.A1:'My Sheet'.B2` and similar
fn parse_odf_range(address: &str) -> Option<RangeRef> {
    let (start, end) = split_outside_quotes(address, ':')
        .map_or((address, None), |(a, b)| (a, Some(b)));
    let (sheet, start) = parse_odf_cell(start)?;
    let sheet = sheet?;
    let end = match end {
        Some(end) => parse_odf_cell(end)?.1,
        None => start,
    };
    Some(RangeRef::new(start, end).with_sheet(sheet))
}

fn parse_odf_cell(text: &str) -> Option<(Option<String>, CellRef)> {
    let text = text.trim().trim_start_matches('$');
    let (sheet, cell) = match rsplit_outside_quotes(text, '.') {
        Some((sheet, cell)) => (Some(sheet), cell),
        None => (None, text),
    };
    let sheet = sheet.filter(|s| !s.is_empty()).map(|s| {
        let s = s.trim_start_matches('$');
        match s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            Some(inner) => inner.replace("''", "'"),
            None => s.to_string(),
        }
    });
    let cell = CellRef::parse(&cell.replace('$', "")).ok()?;
    Some((sheet, cell))
}

fn split_outside_quotes(text: &str, sep: char) -> Option<(&str, &str)> {
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            c if c == sep && !quoted => return Some((&text[..i], &text[i + 1..])),
            _ => {}
        }
    }
    None
}

fn rsplit_outside_quotes(text: &str, sep: char) -> Option<(&str, &str)> {
    let mut quoted = false;
    let mut found = None;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            c if c == sep && !quoted => found = Some(i),
            _ => {}
        }
    }
    found.map(|i| (&text[..i], &text[i + 1..]))
}

//==============================================================================
// meta.xml
//==============================================================================

fn parse_meta(bytes: &[u8]) -> SheetResult<DocumentProperties> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut props = DocumentProperties::default();
    let mut current: Option<Vec<u8>> = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::DocType(_) => return Err(reject_doctype()),
            Event::Start(e) => current = Some(e.name().as_ref().to_vec()),
            Event::End(_) => current = None,
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                match current.as_deref() {
                    Some(b"dc:title") => props.title = Some(text),
                    Some(b"dc:subject") => props.subject = Some(text),
                    Some(b"dc:description") => props.description = Some(text),
                    Some(b"meta:initial-creator") => props.author = Some(text),
                    Some(b"dc:creator") if props.author.is_none() => props.author = Some(text),
                    Some(b"meta:keyword") => props.keywords.push(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(body: &str) -> SheetResult<Workbook> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content><office:body><office:spreadsheet>{body}</office:spreadsheet></office:body></office:document-content>"#
        );
        ContentParser::default().parse(xml.as_bytes())
    }

    #[test]
    fn test_doctype_rejected() {
        let xml = r#"<?xml version="1.0"?><!DOCTYPE x [<!ENTITY a "aaaa">]><x>&a;</x>"#;
        let err = ContentParser::default().parse(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, SheetError::UnsafeXml(_)));
    }

    #[test]
    fn test_trailing_repeated_rows_not_expanded() {
        let wb = parse(
            r#"<table:table table:name="Data">
<table:table-row><table:table-cell office:value-type="float" office:value="1"><text:p>1</text:p></table:table-cell></table:table-row>
<table:table-row table:number-rows-repeated="1048575"><table:table-cell table:number-columns-repeated="1024"/></table:table-row>
</table:table>"#,
        )
        .unwrap();
        assert_eq!(wb.sheets[0].row_count(), 1);
    }

    #[test]
    fn test_repeated_rows_past_cap_fail() {
        let err = parse(
            r#"<table:table table:name="Data">
<table:table-row table:number-rows-repeated="2000000"><table:table-cell office:value-type="string"><text:p>x</text:p></table:table-cell></table:table-row>
</table:table>"#,
        )
        .unwrap_err();
        assert!(matches!(err, SheetError::ResourceLimit { limit: "row count", .. }));
    }

    #[test]
    fn test_cells_spans_and_comments() {
        let wb = parse(
            r#"<table:table table:name="Data" table:protected="true">
<table:table-row>
  <table:table-cell table:number-columns-spanned="2" office:value-type="string"><office:annotation><text:p>note</text:p></office:annotation><text:p>Title</text:p><text:p>second</text:p></table:table-cell>
  <table:covered-table-cell/>
  <table:table-cell table:formula="of:=[.A2]*2"/>
</table:table-row>
</table:table>"#,
        )
        .unwrap();
        let sheet = &wb.sheets[0];
        assert!(sheet.protected);
        let a1 = sheet.cell(CellRef::new(0, 0)).unwrap();
        assert_eq!(a1.content, CellContent::Value(CellValue::Text("Title\nsecond".into())));
        assert_eq!(a1.comment.as_deref(), Some("note"));
        assert_eq!(sheet.merges[0].range.to_a1(), "A1:B1");
        let c1 = sheet.cell(CellRef::new(0, 2)).unwrap();
        assert_eq!(c1.content.formula(), Some("=A2*2"));
    }

    #[test]
    fn test_row_span_overflow_rejected() {
        let err = parse(
            r#"<table:table table:name="Data">
<table:table-row><table:table-cell office:value-type="string"><text:p>a</text:p></table:table-cell></table:table-row>
<table:table-row><table:table-cell table:number-rows-spanned="4294967295" office:value-type="string"><text:p>b</text:p></table:table-cell></table:table-row>
</table:table>"#,
        )
        .unwrap_err();
        assert!(matches!(err, SheetError::ResourceLimit { limit: "row count", .. }));
    }

    #[test]
    fn test_column_span_past_last_column_rejected() {
        for span in ["4000000000", "16385"] {
            let body = format!(
                r#"<table:table table:name="Data">
<table:table-row><table:table-cell table:number-columns-spanned="{span}" office:value-type="string"><text:p>x</text:p></table:table-cell></table:table-row>
</table:table>"#
            );
            let err = parse(&body).unwrap_err();
            assert!(
                matches!(err, SheetError::ResourceLimit { limit: "column count", .. }),
                "span {span}: {err}"
            );
        }
        let wb = parse(
            r#"<table:table table:name="Data">
<table:table-row><table:table-cell table:number-columns-spanned="16384" office:value-type="string"><text:p>x</text:p></table:table-cell></table:table-row>
</table:table>"#,
        )
        .unwrap();
        assert_eq!(wb.sheets[0].merges[0].range.to_a1(), "A1:XFD1");
    }

    #[test]
    fn test_named_range_addresses() {
        let range = parse_odf_range("$Data.$B$5:.$B$6").unwrap();
        assert_eq!(range.sheet.as_deref(), Some("Data"));
        assert_eq!(range.to_a1(), "B5:B6");
        let quoted = parse_odf_range("'It''s'.A1:'It''s'.C3").unwrap();
        assert_eq!(quoted.sheet.as_deref(), Some("It's"));
        assert!(parse_odf_range("B5").is_none());
    }
}
