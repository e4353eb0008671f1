use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::builder::BuilderState;

pub type SheetResult<T> = Result<T, SheetError>;

/// Which inheritance chain a cycle or depth error was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// `extends` between whole themes
    Theme,
    /// `extends` between style definitions
    Style,
    /// Palette/font references that refer back to themselves
    Reference,
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleKind::Theme => write!(f, "theme"),
            CycleKind::Style => write!(f, "style"),
            CycleKind::Reference => write!(f, "reference"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at '{}': {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    //--------------------------------------------------------------------------
    // Builder / structural errors
    //--------------------------------------------------------------------------
    #[error("{operation}() requires an active sheet, but the builder is in state {state}. {suggestion}")]
    NoSheetSelected {
        operation: &'static str,
        state: BuilderState,
        suggestion: String,
    },

    #[error("{operation}() requires an active row, but the builder is in state {state}. {suggestion}")]
    NoRowSelected {
        operation: &'static str,
        state: BuilderState,
        suggestion: String,
    },

    #[error("Sheet '{sheet}' has no rows; add at least one row before building")]
    EmptySheet { sheet: String },

    #[error("Sheet '{name}' collides with existing sheet '{existing}' (sheet names are compared case-insensitively)")]
    DuplicateSheet { name: String, existing: String },

    #[error("Invalid sheet name '{name}': {reason}")]
    InvalidSheetName { name: String, reason: String },

    #[error("Invalid {field} {value} at {location}: {reason}")]
    InvalidSpan {
        field: &'static str,
        value: u32,
        location: String,
        reason: String,
    },

    #[error("Cell at {location} has both a value and a formula; a cell holds exactly one of them")]
    ValueAndFormula { location: String },

    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Named range '{name}' is already defined in {scope}")]
    DuplicateNamedRange { name: String, scope: String },

    #[error("Named range '{name}' has no scope: no sheet is active and no explicit scope was given. Call sheet() first or pass a scope")]
    AmbiguousScope { name: String },

    #[error("Merge {range} on sheet '{sheet}' overlaps existing merged region {existing}")]
    MergeOverlap {
        sheet: String,
        range: String,
        existing: String,
    },

    #[error("Merge {range} on sheet '{sheet}' is outside the populated extent ({rows} rows x {columns} columns)")]
    MergeOutOfBounds {
        sheet: String,
        range: String,
        rows: u32,
        columns: u32,
    },

    #[error("Merge {range} on sheet '{sheet}' covers non-empty cell {cell}; only the anchor cell may hold content or style")]
    MergeCoversContent {
        sheet: String,
        range: String,
        cell: String,
    },

    #[error("Sheet '{sheet}' has no columns defined; call column() before header_row()")]
    NoColumnsDefined { sheet: String },

    #[error("Unknown sheet '{0}'")]
    UnknownSheet(String),

    //--------------------------------------------------------------------------
    // Style resolution errors
    //--------------------------------------------------------------------------
    #[error("Circular {kind} inheritance: {}", .path.join(" → "))]
    StyleCycle { kind: CycleKind, path: Vec<String> },

    #[error("Style '{style}' (used at {location}) is not defined in the theme")]
    StyleNotFound { style: String, location: String },

    #[error("Trait '{name}' included by style '{style}' is not defined in the theme")]
    TraitNotFound { name: String, style: String },

    #[error("Theme '{0}' not found")]
    ThemeNotFound(String),

    #[error("Theme variant '{0}' not found")]
    VariantNotFound(String),

    #[error("Unresolved reference '{{{key}}}' in {context} and no default was given")]
    UnresolvedReference { key: String, context: String },

    #[error("{kind} inheritance chain starting at '{name}' exceeds the maximum depth of {max}")]
    InheritanceTooDeep {
        kind: CycleKind,
        name: String,
        max: usize,
    },

    #[error("Invalid value '{value}' for style property '{property}': {reason}")]
    InvalidStyleValue {
        property: String,
        value: String,
        reason: String,
    },

    #[error("Unknown style property '{property}' in {context}")]
    UnknownProperty { property: String, context: String },

    //--------------------------------------------------------------------------
    // Formula errors
    //--------------------------------------------------------------------------
    #[error("Circular reference detected: {}", format_cycles(.cycles))]
    CircularReference { cycles: Vec<Vec<String>> },

    #[error("Formula at {cell}: {message}")]
    FormulaReference { cell: String, message: String },

    //--------------------------------------------------------------------------
    // Renderer errors
    //--------------------------------------------------------------------------
    #[error("Resource limit exceeded: {limit} is {actual}, maximum is {max}{}", .entry.as_ref().map(|e| format!(" (entry '{e}')")).unwrap_or_default())]
    ResourceLimit {
        limit: &'static str,
        actual: u64,
        max: u64,
        entry: Option<String>,
    },

    #[error("Unsafe XML rejected: {0}")]
    UnsafeXml(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid output path '{}': {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Excel export error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

impl From<quick_xml::Error> for SheetError {
    fn from(err: quick_xml::Error) -> Self {
        SheetError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SheetError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        SheetError::Xml(err.to_string())
    }
}

impl SheetError {
    /// Attach a path to a bare I/O error
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SheetError::IoAt {
            path: path.into(),
            source,
        }
    }
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let mut path = cycle.clone();
            if let Some(first) = cycle.first() {
                path.push(first.clone());
            }
            format!("[{}]", path.join(" → "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
