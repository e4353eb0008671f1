//! In-memory document model: workbook, sheets, rows, cells and their
//! raw style references

pub mod reference;
pub mod style;
pub mod workbook;

pub use reference::{column_to_letters, letters_to_column, CellRef, RangeRef};
pub use style::StyleReference;
pub use workbook::{
    Cell, CellContent, CellValue, ColumnSpec, Condition, ConditionalFormat, DataValidation,
    DocumentProperties, FreezePane, MergedRegion, NamedRange, NamedRangeScope, Row, Sheet,
    ValidationRule, Workbook,
};
