use crate::model::reference::{CellRef, RangeRef};
use crate::model::style::StyleReference;
use crate::theme::StyleId;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

//==============================================================================
// Cell values
//==============================================================================

/// Literal cell value
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "Empty",
            CellValue::Text(_) => "Text",
            CellValue::Number(_) => "Number",
            CellValue::Boolean(_) => "Boolean",
            CellValue::Date(_) => "Date",
            CellValue::DateTime(_) => "DateTime",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Number(n) => write!(f, "{}", format_number(*n)),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// Format a number without a trailing `.0` for integral values
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Number(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Number(f64::from(v))
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Number(v as f64)
    }
}

impl From<u32> for CellValue {
    fn from(v: u32) -> Self {
        CellValue::Number(f64::from(v))
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Boolean(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(v: NaiveDate) -> Self {
        CellValue::Date(v)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(v: NaiveDateTime) -> Self {
        CellValue::DateTime(v)
    }
}

/// What a cell holds: a literal value or a formula, never both
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Value(CellValue),
    /// Formula text in A1 notation, including the leading `=`
    Formula(String),
}

impl CellContent {
    pub fn formula(&self) -> Option<&str> {
        match self {
            CellContent::Formula(f) => Some(f),
            CellContent::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&CellValue> {
        match self {
            CellContent::Value(v) => Some(v),
            CellContent::Formula(_) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellContent::Value(CellValue::Empty))
    }
}

//==============================================================================
// Cells, rows, columns
//==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub content: CellContent,
    pub style: Option<StyleReference>,
    pub comment: Option<String>,
    pub(crate) resolved: Option<StyleId>,
}

impl Cell {
    pub fn new(content: CellContent) -> Self {
        Self {
            content,
            style: None,
            comment: None,
            resolved: None,
        }
    }

    pub fn value(value: impl Into<CellValue>) -> Self {
        Self::new(CellContent::Value(value.into()))
    }

    pub fn formula(text: impl Into<String>) -> Self {
        Self::new(CellContent::Formula(text.into()))
    }

    /// Style chosen during resolution (cell, row or column style)
    pub fn resolved_style(&self) -> Option<StyleId> {
        self.resolved
    }

    /// Blank, unstyled and without a comment
    pub fn is_inert(&self) -> bool {
        self.content.is_blank() && self.style.is_none() && self.comment.is_none()
    }
}

/// One row of a sheet; cells are sparse and keyed by 0-based column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub index: u32,
    pub cells: BTreeMap<u32, Cell>,
    /// Row height with unit, e.g. `0.8cm`
    pub height: Option<String>,
    pub style: Option<StyleReference>,
    pub outline_level: Option<u8>,
    pub(crate) resolved: Option<StyleId>,
}

impl Row {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// One past the last populated column
    pub fn extent(&self) -> u32 {
        self.cells.keys().next_back().map_or(0, |c| c + 1)
    }

    pub fn resolved_style(&self) -> Option<StyleId> {
        self.resolved
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    /// Column width with unit, e.g. `2.5cm`
    pub width: Option<String>,
    pub style: Option<StyleReference>,
    pub(crate) resolved: Option<StyleId>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: None,
            style: None,
            resolved: None,
        }
    }

    #[must_use]
    pub fn width(mut self, width: impl Into<String>) -> Self {
        self.width = Some(width.into());
        self
    }

    #[must_use]
    pub fn style(mut self, style: impl Into<StyleReference>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn resolved_style(&self) -> Option<StyleId> {
        self.resolved
    }
}

//==============================================================================
// Sheet-level structures
//==============================================================================

/// Rectangular span rendered as one logical cell anchored at its top-left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRegion {
    pub range: RangeRef,
}

impl MergedRegion {
    pub fn new(range: RangeRef) -> Self {
        Self { range }
    }

    pub fn anchor(&self) -> CellRef {
        self.range.start
    }

    /// True for every covered cell except the anchor
    pub fn covers(&self, cell: CellRef) -> bool {
        cell != self.anchor() && self.range.contains(cell)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamedRangeScope {
    Workbook,
    Sheet(String),
}

impl fmt::Display for NamedRangeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamedRangeScope::Workbook => write!(f, "workbook scope"),
            NamedRangeScope::Sheet(name) => write!(f, "sheet '{name}' scope"),
        }
    }
}

/// A named alias for a range; `range.sheet` is always set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRange {
    pub name: String,
    pub range: RangeRef,
    pub scope: NamedRangeScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FreezePane {
    #[serde(default)]
    pub rows: u32,
    #[serde(default)]
    pub columns: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
    /// Value must be one of the listed strings
    List(Vec<String>),
    WholeNumber { min: i64, max: i64 },
    Decimal { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataValidation {
    pub range: RangeRef,
    pub rule: ValidationRule,
    pub allow_empty: bool,
}

/// Condition of a conditional-format rule, evaluated against the cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    GreaterThan(f64),
    LessThan(f64),
    Equal(f64),
    Between(f64, f64),
    /// Free-form formula condition, e.g. `=B2>C2`
    Formula(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalFormat {
    pub range: RangeRef,
    pub condition: Condition,
    pub style: StyleReference,
    pub(crate) resolved: Option<StyleId>,
}

impl ConditionalFormat {
    pub fn resolved_style(&self) -> Option<StyleId> {
        self.resolved
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Row>,
    pub merges: Vec<MergedRegion>,
    /// Sheet-scoped named ranges
    pub named_ranges: Vec<NamedRange>,
    pub freeze: Option<FreezePane>,
    pub protected: bool,
    pub validations: Vec<DataValidation>,
    pub conditional_formats: Vec<ConditionalFormat>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            merges: Vec::new(),
            named_ranges: Vec::new(),
            freeze: None,
            protected: false,
            validations: Vec::new(),
            conditional_formats: Vec::new(),
        }
    }

    pub fn row_count(&self) -> u32 {
        self.rows.len() as u32
    }

    /// Number of columns in use: declared columns, populated cells and merges
    pub fn column_extent(&self) -> u32 {
        let from_rows = self.rows.iter().map(Row::extent).max().unwrap_or(0);
        let from_merges = self
            .merges
            .iter()
            .map(|m| m.range.end.col + 1)
            .max()
            .unwrap_or(0);
        (self.columns.len() as u32).max(from_rows).max(from_merges)
    }

    pub fn cell(&self, at: CellRef) -> Option<&Cell> {
        self.rows.get(at.row as usize)?.cells.get(&at.col)
    }

    /// True if `at` is a non-anchor cell of some merged region
    pub fn is_covered(&self, at: CellRef) -> bool {
        self.merges.iter().any(|m| m.covers(at))
    }

    /// Iterate over formula cells as (position, formula text)
    pub fn formula_cells(&self) -> impl Iterator<Item = (CellRef, &str)> + '_ {
        self.rows.iter().flat_map(|row| {
            row.cells.iter().filter_map(move |(&col, cell)| {
                cell.content
                    .formula()
                    .map(|f| (CellRef::new(row.index, col), f))
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DocumentProperties {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
    pub properties: DocumentProperties,
    /// Workbook-scoped named ranges
    pub named_ranges: Vec<NamedRange>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name == name)
    }

    /// Workbook-scoped names first, then each sheet's names in sheet order
    pub fn all_named_ranges(&self) -> impl Iterator<Item = &NamedRange> + '_ {
        self.named_ranges
            .iter()
            .chain(self.sheets.iter().flat_map(|s| s.named_ranges.iter()))
    }

    /// Look a name up the way a formula on `sheet` sees it: sheet scope first
    pub fn lookup_name(&self, sheet: &str, name: &str) -> Option<&NamedRange> {
        self.sheet(sheet)
            .and_then(|s| s.named_ranges.iter().find(|n| n.name.eq_ignore_ascii_case(name)))
            .or_else(|| {
                self.named_ranges
                    .iter()
                    .find(|n| n.name.eq_ignore_ascii_case(name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_trims_integral_values() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.25), "0.25");
    }

    #[test]
    fn test_sheet_column_extent_counts_merges() {
        let mut sheet = Sheet::new("S");
        let mut row = Row::new(0);
        row.cells.insert(1, Cell::value(1.0));
        sheet.rows.push(row);
        assert_eq!(sheet.column_extent(), 2);
        sheet
            .merges
            .push(MergedRegion::new(RangeRef::parse("A1:D1").unwrap()));
        assert_eq!(sheet.column_extent(), 4);
    }

    #[test]
    fn test_merge_covers_excludes_anchor() {
        let merge = MergedRegion::new(RangeRef::parse("A1:B2").unwrap());
        assert!(!merge.covers(CellRef::new(0, 0)));
        assert!(merge.covers(CellRef::new(1, 1)));
        assert!(!merge.covers(CellRef::new(2, 0)));
    }

    #[test]
    fn test_lookup_name_prefers_sheet_scope() {
        let mut wb = Workbook::new();
        let mut sheet = Sheet::new("Data");
        sheet.named_ranges.push(NamedRange {
            name: "total".into(),
            range: RangeRef::parse("Data!B5").unwrap(),
            scope: NamedRangeScope::Sheet("Data".into()),
        });
        wb.sheets.push(sheet);
        wb.sheets.push(Sheet::new("Other"));
        wb.named_ranges.push(NamedRange {
            name: "total".into(),
            range: RangeRef::parse("Other!A1").unwrap(),
            scope: NamedRangeScope::Workbook,
        });

        let from_data = wb.lookup_name("Data", "TOTAL").unwrap();
        assert_eq!(from_data.range.to_string(), "Data!B5");
        let from_other = wb.lookup_name("Other", "total").unwrap();
        assert_eq!(from_other.range.to_string(), "Other!A1");
    }
}
