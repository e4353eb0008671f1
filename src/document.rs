//! A built, validated document ready for rendering

use crate::config::ResourceLimits;
use crate::error::SheetResult;
use crate::model::Workbook;
use crate::render::{self, OutputFormat, RenderStats};
use crate::theme::StyleTable;
use std::path::Path;

/// Immutable result of `WorkbookBuilder::build()`
///
/// Every style reference has been resolved into [`StyleTable`] and the
/// formula graph is known to be acyclic.
#[derive(Debug, Clone)]
pub struct Document {
    workbook: Workbook,
    styles: StyleTable,
    default_font: Option<String>,
    limits: ResourceLimits,
}

impl Document {
    pub(crate) fn new(
        workbook: Workbook,
        styles: StyleTable,
        default_font: Option<String>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            workbook,
            styles,
            default_font,
            limits,
        }
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn styles(&self) -> &StyleTable {
        &self.styles
    }

    /// Family of the theme's `body` font, used as the document default
    pub fn default_font(&self) -> Option<&str> {
        self.default_font.as_deref()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Override the limits carried over from the builder's config
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Total number of rows across all sheets
    pub fn row_count(&self) -> u64 {
        self.workbook
            .sheets
            .iter()
            .map(|s| u64::from(s.row_count()))
            .sum()
    }

    /// Render atomically to `path`; the extension picks the format
    pub fn save(&self, path: &Path) -> SheetResult<RenderStats> {
        let format = render::preflight(path)?;
        self.render_to(path, format)
    }

    pub fn render_to(&self, path: &Path, format: OutputFormat) -> SheetResult<RenderStats> {
        render::render_to_path(self, path, format)
    }
}
