//! sheetforge - declarative spreadsheet compiler
//!
//! A workbook is described through [`builder::WorkbookBuilder`] (or a YAML
//! definition, see [`parser`]), styled by a [`theme::Theme`], checked for
//! formula cycles, and rendered to OpenDocument (streamed) or XLSX.
//!
//! # Pipeline
//!
//! - **Document model** ([`model`]): sheets, rows, cells, merges, named ranges
//! - **Style resolver** ([`theme`]): `extends` chains, traits, palette references
//! - **Dependency graph** ([`formula`]): reference extraction and cycle detection
//! - **Renderer** ([`render`]): atomic, resource-bounded output and read-back
//!
//! # Example
//!
//! ```no_run
//! use sheetforge::builder::WorkbookBuilder;
//! use sheetforge::theme::{StyleDefinition, Theme};
//! use std::path::Path;
//!
//! let theme = Theme::new("plain")
//!     .color("primary", "#1F4E79")
//!     .style("header", StyleDefinition::new().set("font.weight", "bold").set("fill.color", "{colors.primary}"));
//!
//! let mut builder = WorkbookBuilder::new().with_theme(theme);
//! builder
//!     .sheet("Data")?
//!     .column("Item")?
//!     .column("Amount")?
//!     .header_row(Some("header".into()))?
//!     .row()?
//!     .cell("Rent")?
//!     .cell(1200.0)?;
//! let stats = builder.save(Path::new("data.ods"))?;
//! println!("{} rows written", stats.rows);
//! # Ok::<(), sheetforge::error::SheetError>(())
//! ```

pub mod builder;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod formula;
pub mod model;
pub mod parser;
pub mod render;
pub mod theme;

// Re-export commonly used types
pub use builder::{CellSpec, RowSpec, WorkbookBuilder};
pub use config::{Config, ResourceLimits};
pub use document::Document;
pub use error::{SheetError, SheetResult};
pub use model::{CellRef, CellValue, RangeRef, Workbook};
pub use render::{read_document, OutputFormat, RenderStats};
pub use theme::{Theme, ThemeSet};
