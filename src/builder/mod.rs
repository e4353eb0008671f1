//! Fluent workbook construction
//!
//! [`WorkbookBuilder`] is an explicit state machine:
//!
//! ```text
//! NoSheetSelected --sheet()--> SheetActive --row()--> RowActive
//!        ^                         ^  |                  |  |
//!        |                         |  +----sheet()-------+  +--cell()/row()
//! ```
//!
//! Structural mistakes fail at the offending call; cross-cutting checks
//! (empty sheets, merge extents, styles, formula cycles) run in `build()`.
//!
//! ```no_run
//! use sheetforge::builder::WorkbookBuilder;
//!
//! let mut builder = WorkbookBuilder::new();
//! builder
//!     .sheet("Summary")?
//!     .column("Item")?
//!     .column("Amount")?
//!     .header_row(None)?
//!     .row()?
//!     .cell("Rent")?
//!     .cell(1200.0)?
//!     .row()?
//!     .cell("Total")?
//!     .cell("=SUM(B2:B2)")?;
//! builder.save(std::path::Path::new("summary.ods"))?;
//! # Ok::<(), sheetforge::error::SheetError>(())
//! ```

mod finalize;
mod spec;

pub use spec::{CellSpec, RowSpec};

use crate::config::Config;
use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use crate::model::{
    Cell, CellContent, CellRef, CellValue, ColumnSpec, Condition, ConditionalFormat,
    DataValidation, DocumentProperties, FreezePane, MergedRegion, NamedRange, NamedRangeScope,
    RangeRef, Row, Sheet, StyleReference, ValidationRule, Workbook,
};
use crate::model::reference::{MAX_COLUMNS, MAX_ROWS};
use crate::render::{self, RenderStats};
use crate::theme::Theme;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

const INVALID_SHEET_CHARS: &[char] = &['[', ']', '*', '?', ':', '/', '\\'];

/// Where the builder currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderState {
    NoSheetSelected,
    SheetActive { sheet: String },
    RowActive { sheet: String, row: u32 },
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderState::NoSheetSelected => write!(f, "NoSheetSelected"),
            BuilderState::SheetActive { sheet } => write!(f, "SheetActive('{sheet}')"),
            BuilderState::RowActive { sheet, row } => {
                write!(f, "RowActive('{sheet}', row {})", row + 1)
            }
        }
    }
}

#[derive(Debug)]
pub struct WorkbookBuilder {
    workbook: Workbook,
    state: BuilderState,
    /// Next column to try in the active row
    cursor: u32,
    theme: Option<Theme>,
    variant: Option<String>,
    config: Config,
}

impl Default for WorkbookBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::from_workbook(Workbook::new())
    }

    /// Continue editing an existing workbook, e.g. one read back from disk
    pub fn from_workbook(workbook: Workbook) -> Self {
        Self {
            workbook,
            state: BuilderState::NoSheetSelected,
            cursor: 0,
            theme: None,
            variant: None,
            config: Config::default(),
        }
    }

    /// Theme used to resolve style references; must already be flattened
    #[must_use]
    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    /// Theme variant applied at build time
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> &BuilderState {
        &self.state
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn properties(&mut self, properties: DocumentProperties) -> &mut Self {
        self.workbook.properties = properties;
        self
    }

    //--------------------------------------------------------------------------
    // State transitions
    //--------------------------------------------------------------------------

    /// Create or re-select a sheet
    pub fn sheet(&mut self, name: &str) -> SheetResult<&mut Self> {
        validate_sheet_name(name)?;
        match self
            .workbook
            .sheets
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
        {
            Some(existing) if existing.name == name => {
                debug!(sheet = name, "re-selected sheet");
            }
            Some(existing) => {
                return Err(SheetError::DuplicateSheet {
                    name: name.to_string(),
                    existing: existing.name.clone(),
                })
            }
            None => {
                debug!(sheet = name, "created sheet");
                self.workbook.sheets.push(Sheet::new(name));
            }
        }
        self.state = BuilderState::SheetActive {
            sheet: name.to_string(),
        };
        Ok(self)
    }

    /// Append an empty row and make it active
    pub fn row(&mut self) -> SheetResult<&mut Self> {
        self.row_with(RowSpec::default())
    }

    pub fn row_with(&mut self, spec: RowSpec) -> SheetResult<&mut Self> {
        let (sheet_name, sheet) = self.active_sheet("row")?;
        let index = sheet.row_count();
        check_row_capacity(&sheet_name, index, 1)?;
        let mut row = Row::new(index);
        row.height = spec.height;
        row.style = spec.style;
        row.outline_level = spec.outline_level;
        sheet.rows.push(row);
        self.state = BuilderState::RowActive {
            sheet: sheet_name,
            row: index,
        };
        self.cursor = 0;
        Ok(self)
    }

    //--------------------------------------------------------------------------
    // Sheet content
    //--------------------------------------------------------------------------

    pub fn column(&mut self, column: impl Into<ColumnSpec>) -> SheetResult<&mut Self> {
        let (_, sheet) = self.active_sheet("column")?;
        sheet.columns.push(column.into());
        Ok(self)
    }

    /// Append a row holding every declared column name
    pub fn header_row(&mut self, style: Option<StyleReference>) -> SheetResult<&mut Self> {
        let (sheet_name, sheet) = self.active_sheet("header_row")?;
        if sheet.columns.is_empty() {
            return Err(SheetError::NoColumnsDefined { sheet: sheet_name });
        }
        let names: Vec<String> = sheet.columns.iter().map(|c| c.name.clone()).collect();
        self.row()?;
        for name in names {
            let mut spec = CellSpec::text(name);
            spec.style = style.clone();
            self.cell(spec)?;
        }
        Ok(self)
    }

    /// Append `count` empty rows; the last one becomes active
    pub fn data_rows(&mut self, count: u32, style: Option<StyleReference>) -> SheetResult<&mut Self> {
        let (sheet_name, sheet) = self.active_sheet("data_rows")?;
        check_row_capacity(&sheet_name, sheet.row_count(), count)?;
        for _ in 0..count {
            self.row_with(RowSpec {
                style: style.clone(),
                ..RowSpec::default()
            })?;
        }
        Ok(self)
    }

    /// Place a cell at the next free column of the active row
    pub fn cell(&mut self, spec: impl Into<CellSpec>) -> SheetResult<&mut Self> {
        let spec = spec.into();
        let (sheet_name, row_idx) = match &self.state {
            BuilderState::RowActive { sheet, row } => (sheet.clone(), *row),
            state => {
                return Err(SheetError::NoRowSelected {
                    operation: "cell",
                    state: state.clone(),
                    suggestion: "Call row() to start a row before adding cells.".to_string(),
                })
            }
        };
        let cursor = self.cursor;
        let sheet = self.sheet_mut(&sheet_name)?;

        let mut col = cursor;
        while col < MAX_COLUMNS
            && (sheet.is_covered(CellRef::new(row_idx, col))
                || sheet.rows[row_idx as usize].cells.contains_key(&col))
        {
            col += 1;
        }
        let at = CellRef::new(row_idx, col);
        let location = format!("{sheet_name}!{}", at.to_a1());

        let colspan = validate_span("colspan", spec.colspan, col, MAX_COLUMNS, &location)?;
        let rowspan = validate_span("rowspan", spec.rowspan, row_idx, MAX_ROWS, &location)?;
        let content = match (spec.value, spec.formula) {
            (Some(_), Some(_)) => return Err(SheetError::ValueAndFormula { location }),
            (None, Some(formula)) => CellContent::Formula(normalize_formula(&formula)),
            (Some(value), None) => CellContent::Value(value),
            (None, None) => CellContent::Value(CellValue::Empty),
        };

        if colspan > 1 || rowspan > 1 {
            let region = RangeRef::new(
                at,
                CellRef::new(row_idx + rowspan - 1, col + colspan - 1),
            );
            if let Some(existing) = sheet.merges.iter().find(|m| m.range.intersects(&region)) {
                return Err(SheetError::MergeOverlap {
                    sheet: sheet_name,
                    range: region.to_a1(),
                    existing: existing.range.to_a1(),
                });
            }
            sheet.merges.push(MergedRegion::new(region));
        }

        let mut cell = Cell::new(content);
        cell.style = spec.style;
        cell.comment = spec.comment;
        sheet.rows[row_idx as usize].cells.insert(col, cell);
        self.cursor = col + colspan;
        Ok(self)
    }

    /// Attach a comment to the most recently placed cell of the active row
    pub fn comment(&mut self, text: impl Into<String>) -> SheetResult<&mut Self> {
        let (sheet_name, row_idx) = match &self.state {
            BuilderState::RowActive { sheet, row } => (sheet.clone(), *row),
            state => {
                return Err(SheetError::NoRowSelected {
                    operation: "comment",
                    state: state.clone(),
                    suggestion: "Call row() and cell() before comment().".to_string(),
                })
            }
        };
        let sheet = self.sheet_mut(&sheet_name)?;
        let row = &mut sheet.rows[row_idx as usize];
        let cell = row
            .cells
            .values_mut()
            .next_back()
            .ok_or_else(|| SheetError::NoRowSelected {
                operation: "comment",
                state: BuilderState::RowActive {
                    sheet: sheet_name.clone(),
                    row: row_idx,
                },
                suggestion: "The active row has no cells yet; add one with cell() first.".to_string(),
            })?;
        cell.comment = Some(text.into());
        Ok(self)
    }

    pub fn freeze(&mut self, rows: u32, columns: u32) -> SheetResult<&mut Self> {
        let (_, sheet) = self.active_sheet("freeze")?;
        sheet.freeze = Some(FreezePane { rows, columns });
        Ok(self)
    }

    /// Mark the active sheet as protected; locked cells become read-only
    pub fn protect(&mut self) -> SheetResult<&mut Self> {
        let (_, sheet) = self.active_sheet("protect")?;
        sheet.protected = true;
        Ok(self)
    }

    /// Register a named range
    ///
    /// With `scope == None` the active sheet is the scope; without an active
    /// sheet that is an [`SheetError::AmbiguousScope`] rather than a silent
    /// workbook default.
    pub fn named_range(
        &mut self,
        name: &str,
        range: &str,
        scope: Option<NamedRangeScope>,
    ) -> SheetResult<&mut Self> {
        validate_range_name(name)?;
        let active = self.active_sheet_name();
        let scope = match (scope, active) {
            (Some(scope), _) => scope,
            (None, Some(sheet)) => NamedRangeScope::Sheet(sheet),
            (None, None) => {
                return Err(SheetError::AmbiguousScope {
                    name: name.to_string(),
                })
            }
        };

        let mut target = RangeRef::parse(range)?;
        if target.sheet.is_none() {
            let default_sheet = match (&scope, self.active_sheet_name()) {
                (NamedRangeScope::Sheet(s), _) => Some(s.clone()),
                (NamedRangeScope::Workbook, active) => active,
            };
            target.sheet = Some(default_sheet.ok_or_else(|| SheetError::InvalidReference {
                reference: range.to_string(),
                reason: "a workbook-scoped range needs a sheet prefix when no sheet is active"
                    .to_string(),
            })?);
        }
        let target_sheet = target.sheet.clone().unwrap_or_default();
        if self.workbook.sheet(&target_sheet).is_none() {
            return Err(SheetError::UnknownSheet(target_sheet));
        }

        let named = NamedRange {
            name: name.to_string(),
            range: target,
            scope: scope.clone(),
        };
        let bucket = match &scope {
            NamedRangeScope::Workbook => &mut self.workbook.named_ranges,
            NamedRangeScope::Sheet(sheet) => &mut self.sheet_mut(sheet)?.named_ranges,
        };
        if bucket.iter().any(|n| n.name.eq_ignore_ascii_case(name)) {
            return Err(SheetError::DuplicateNamedRange {
                name: name.to_string(),
                scope: scope.to_string(),
            });
        }
        bucket.push(named);
        Ok(self)
    }

    /// Merge a rectangle of the active sheet into one cell anchored top-left
    pub fn merge(&mut self, range: &str, style: Option<StyleReference>) -> SheetResult<&mut Self> {
        let (sheet_name, sheet) = self.active_sheet("merge")?;
        let region = RangeRef::parse(range)?;
        if let Some(prefix) = &region.sheet {
            if *prefix != sheet_name {
                return Err(SheetError::InvalidReference {
                    reference: range.to_string(),
                    reason: format!("merge targets sheet '{prefix}' but the active sheet is '{sheet_name}'"),
                });
            }
        }
        let region = RangeRef::new(region.start, region.end);

        let rows = sheet.row_count();
        let columns = sheet.column_extent();
        if region.end.row >= rows || region.end.col >= columns {
            return Err(SheetError::MergeOutOfBounds {
                sheet: sheet_name,
                range: region.to_a1(),
                rows,
                columns,
            });
        }
        if let Some(existing) = sheet.merges.iter().find(|m| m.range.intersects(&region)) {
            return Err(SheetError::MergeOverlap {
                sheet: sheet_name,
                range: region.to_a1(),
                existing: existing.range.to_a1(),
            });
        }

        let merged = MergedRegion::new(region.clone());
        for at in region.cells() {
            if !merged.covers(at) {
                continue;
            }
            if let Some(cell) = sheet.cell(at) {
                if !cell.is_inert() {
                    return Err(SheetError::MergeCoversContent {
                        sheet: sheet_name,
                        range: region.to_a1(),
                        cell: at.to_a1(),
                    });
                }
            }
        }
        for at in region.cells() {
            if merged.covers(at) {
                sheet.rows[at.row as usize].cells.remove(&at.col);
            }
        }
        if let Some(style) = style {
            let anchor = region.start;
            sheet.rows[anchor.row as usize]
                .cells
                .entry(anchor.col)
                .or_insert_with(|| Cell::value(CellValue::Empty))
                .style = Some(style);
        }
        sheet.merges.push(merged);
        Ok(self)
    }

    pub fn validation(&mut self, range: &str, rule: ValidationRule) -> SheetResult<&mut Self> {
        let (_, sheet) = self.active_sheet("validation")?;
        let range = RangeRef::parse(range)?;
        if let ValidationRule::WholeNumber { min, max } = rule {
            if min > max {
                return Err(SheetError::InvalidReference {
                    reference: range.to_a1(),
                    reason: format!("validation minimum {min} exceeds maximum {max}"),
                });
            }
        }
        sheet.validations.push(DataValidation {
            range: RangeRef::new(range.start, range.end),
            rule,
            allow_empty: true,
        });
        Ok(self)
    }

    pub fn conditional_format(
        &mut self,
        range: &str,
        condition: Condition,
        style: impl Into<StyleReference>,
    ) -> SheetResult<&mut Self> {
        let (_, sheet) = self.active_sheet("conditional_format")?;
        let range = RangeRef::parse(range)?;
        sheet.conditional_formats.push(ConditionalFormat {
            range: RangeRef::new(range.start, range.end),
            condition,
            style: style.into(),
            resolved: None,
        });
        Ok(self)
    }

    //--------------------------------------------------------------------------
    // Finalization
    //--------------------------------------------------------------------------

    /// Validate, resolve styles and check formulas
    pub fn build(self) -> SheetResult<Document> {
        info!(sheets = self.workbook.sheets.len(), "building workbook");
        finalize::finalize(self.workbook, self.theme, self.variant.as_deref(), self.config, &self.state)
    }

    /// Build and write atomically to `path`; the extension picks the format
    ///
    /// Path problems are reported before anything is built or written.
    pub fn save(self, path: &Path) -> SheetResult<RenderStats> {
        let format = render::preflight(path)?;
        let document = self.build()?;
        document.render_to(path, format)
    }

    //--------------------------------------------------------------------------
    // Helpers
    //--------------------------------------------------------------------------

    fn active_sheet_name(&self) -> Option<String> {
        match &self.state {
            BuilderState::NoSheetSelected => None,
            BuilderState::SheetActive { sheet } | BuilderState::RowActive { sheet, .. } => {
                Some(sheet.clone())
            }
        }
    }

    fn active_sheet(&mut self, operation: &'static str) -> SheetResult<(String, &mut Sheet)> {
        let name = self.active_sheet_name().ok_or_else(|| SheetError::NoSheetSelected {
            operation,
            state: self.state.clone(),
            suggestion: format!("Call sheet(name) before {operation}()."),
        })?;
        let sheet = self.sheet_mut(&name)?;
        Ok((name, sheet))
    }

    fn sheet_mut(&mut self, name: &str) -> SheetResult<&mut Sheet> {
        self.workbook
            .sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| SheetError::UnknownSheet(name.to_string()))
    }
}

fn validate_sheet_name(name: &str) -> SheetResult<()> {
    let invalid = |reason: &str| SheetError::InvalidSheetName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if let Some(c) = name.chars().find(|c| INVALID_SHEET_CHARS.contains(c)) {
        return Err(invalid(&format!("character '{c}' is not allowed")));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(invalid("name cannot start or end with an apostrophe"));
    }
    Ok(())
}

fn validate_range_name(name: &str) -> SheetResult<()> {
    let invalid = |reason: &str| SheetError::InvalidReference {
        reference: name.to_string(),
        reason: reason.to_string(),
    };
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return Err(invalid("range names must start with a letter or underscore")),
    }
    if !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Err(invalid("range names may only contain letters, digits, '_' and '.'"));
    }
    if CellRef::parse(name).is_ok() {
        return Err(invalid("range names cannot look like a cell reference"));
    }
    if name.eq_ignore_ascii_case("true") || name.eq_ignore_ascii_case("false") {
        return Err(invalid("TRUE and FALSE are reserved"));
    }
    Ok(())
}

fn check_row_capacity(sheet: &str, existing: u32, adding: u32) -> SheetResult<()> {
    let total = u64::from(existing) + u64::from(adding);
    if total > u64::from(MAX_ROWS) {
        return Err(SheetError::ResourceLimit {
            limit: "row count",
            actual: total,
            max: u64::from(MAX_ROWS),
            entry: Some(format!("sheet '{sheet}'")),
        });
    }
    Ok(())
}

/// A span must be at least 1 and end inside the sheet (`start + span <= max`)
fn validate_span(
    field: &'static str,
    span: Option<u32>,
    start: u32,
    max: u32,
    location: &str,
) -> SheetResult<u32> {
    let span = span.unwrap_or(1);
    let reason = if span == 0 {
        "spans must be at least 1".to_string()
    } else if start.checked_add(span).map_or(true, |end| end > max) {
        format!("span runs past the sheet limit of {max}")
    } else {
        return Ok(span);
    };
    Err(SheetError::InvalidSpan {
        field,
        value: span,
        location: location.to_string(),
        reason,
    })
}

fn normalize_formula(formula: &str) -> String {
    let trimmed = formula.trim();
    if trimmed.starts_with('=') {
        trimmed.to_string()
    } else {
        format!("={trimmed}")
    }
}
