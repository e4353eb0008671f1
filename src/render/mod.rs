//! Rendering a built [`Document`] to disk
//!
//! Output is always written to a temporary file next to the destination,
//! checked, and then renamed over it. A failed render leaves any existing
//! file at the destination untouched and no partial file behind.

pub mod package;
pub mod reader;
pub mod styles;

mod ods;
mod xlsx;
mod xml;

pub use package::{inspect_archive, verify_package, ArchiveSummary, ODS_MIMETYPE};
pub use reader::{read_document, read_workbook};

use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use serde::Serialize;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Ods,
    Xlsx,
}

impl OutputFormat {
    /// Pick the format from the file extension (case-insensitive)
    pub fn from_path(path: &Path) -> SheetResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ods") => Ok(OutputFormat::Ods),
            Some("xlsx") => Ok(OutputFormat::Xlsx),
            other => Err(SheetError::InvalidPath {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported extension {}; expected .ods or .xlsx",
                    other.map_or_else(|| "(none)".to_string(), |e| format!("'.{e}'"))
                ),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Ods => write!(f, "ODS"),
            OutputFormat::Xlsx => write!(f, "XLSX"),
        }
    }
}

/// What a render produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub format: OutputFormat,
    pub sheets: usize,
    pub rows: u64,
    /// Archive entries written (ODS only)
    pub entries: usize,
    /// Inflated bytes across all entries (ODS only)
    pub uncompressed_bytes: u64,
    /// Size of the final file on disk
    pub bytes_written: u64,
    /// Most rows held in memory at once
    pub peak_buffered_rows: usize,
}

/// Check an output path before any work is done
///
/// The extension must name a supported format, the path must not be a
/// directory, and its parent directory must already exist.
pub fn preflight(path: &Path) -> SheetResult<OutputFormat> {
    let format = OutputFormat::from_path(path)?;
    if path.is_dir() {
        return Err(SheetError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is a directory".to_string(),
        });
    }
    let parent = parent_dir(path);
    if !parent.is_dir() {
        return Err(SheetError::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("directory '{}' does not exist", parent.display()),
        });
    }
    Ok(format)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Render `doc` to `path` through a temporary file in the same directory
#[instrument(skip(doc), fields(path = %path.display()))]
pub fn render_to_path(doc: &Document, path: &Path, format: OutputFormat) -> SheetResult<RenderStats> {
    let parent = parent_dir(path);
    let temp = NamedTempFile::new_in(&parent).map_err(|e| SheetError::io_at(&parent, e))?;
    debug!(temp = %temp.path().display(), %format, "rendering to temporary file");

    let mut stats = match format {
        OutputFormat::Ods => {
            let file = temp
                .as_file()
                .try_clone()
                .map_err(|e| SheetError::io_at(temp.path(), e))?;
            let (mut out, stats) = ods::write_ods(doc, BufWriter::new(file))?;
            out.flush().map_err(|e| SheetError::io_at(temp.path(), e))?;
            stats
        }
        OutputFormat::Xlsx => xlsx::write_xlsx(doc, temp.path())?,
    };

    temp.as_file()
        .sync_all()
        .map_err(|e| SheetError::io_at(temp.path(), e))?;
    let summary = verify_package(temp.path(), doc.limits())?;
    if format == OutputFormat::Xlsx {
        stats.entries = summary.entries;
        stats.uncompressed_bytes = summary.uncompressed_bytes;
    }
    stats.bytes_written = std::fs::metadata(temp.path())
        .map_err(|e| SheetError::io_at(temp.path(), e))?
        .len();

    temp.persist(path)
        .map_err(|e| SheetError::io_at(path, e.error))?;
    info!(
        %format,
        rows = stats.rows,
        bytes = stats.bytes_written,
        "document rendered"
    );
    Ok(stats)
}
