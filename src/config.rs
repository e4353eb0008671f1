//! Numeric knobs for the resolver and the renderer
//!
//! Every field has a default, so an empty (or absent) config file is valid:
//!
//! ```yaml
//! limits:
//!   max_uncompressed_bytes: 536870912
//!   max_compression_ratio: 200
//!   ratio_grace_bytes: 1048576
//!   max_entries: 1024
//!   row_window: 64
//! resolver:
//!   max_inheritance_depth: 5
//! ```

use crate::error::{SheetError, SheetResult};
use serde::Deserialize;
use std::path::Path;

/// Default cap on inflated bytes across a whole package (512 MiB)
pub const DEFAULT_MAX_UNCOMPRESSED_BYTES: u64 = 512 * 1024 * 1024;
/// Default cap on uncompressed/compressed size for a single entry
pub const DEFAULT_MAX_COMPRESSION_RATIO: u64 = 200;
/// Entries smaller than this are not ratio-checked (1 MiB)
pub const DEFAULT_RATIO_GRACE_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 1024;
pub const DEFAULT_ROW_WINDOW: usize = 64;
pub const DEFAULT_MAX_INHERITANCE_DEPTH: usize = 5;

/// Resource bounds shared by the writer and the hardened reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// Maximum inflated bytes across all entries
    pub max_uncompressed_bytes: u64,
    /// Maximum uncompressed/compressed ratio of any single entry
    pub max_compression_ratio: u64,
    /// Entries below this inflated size skip the ratio check
    pub ratio_grace_bytes: u64,
    /// Maximum number of entries in the archive
    pub max_entries: usize,
    /// Rows buffered by the renderer before flushing to the archive
    pub row_window: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_uncompressed_bytes: DEFAULT_MAX_UNCOMPRESSED_BYTES,
            max_compression_ratio: DEFAULT_MAX_COMPRESSION_RATIO,
            ratio_grace_bytes: DEFAULT_RATIO_GRACE_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            row_window: DEFAULT_ROW_WINDOW,
        }
    }
}

/// Style/theme resolution knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Longest allowed `extends` chain, for styles and for themes
    pub max_inheritance_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_inheritance_depth: DEFAULT_MAX_INHERITANCE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub limits: ResourceLimits,
    pub resolver: ResolverConfig,
}

impl Config {
    /// Load and validate a YAML config file
    pub fn from_file(path: &Path) -> SheetResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SheetError::io_at(path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> SheetResult<Self> {
        // An empty document deserializes to null, which means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SheetResult<()> {
        let limits = &self.limits;
        if limits.max_uncompressed_bytes == 0 {
            return Err(SheetError::Config(
                "limits.max_uncompressed_bytes must be greater than 0".to_string(),
            ));
        }
        if limits.max_compression_ratio < 2 {
            return Err(SheetError::Config(
                "limits.max_compression_ratio must be at least 2".to_string(),
            ));
        }
        if limits.max_entries < 6 {
            // mimetype, manifest, meta, settings, styles, content
            return Err(SheetError::Config(
                "limits.max_entries must allow at least 6 entries".to_string(),
            ));
        }
        if limits.row_window == 0 {
            return Err(SheetError::Config(
                "limits.row_window must be greater than 0".to_string(),
            ));
        }
        if self.resolver.max_inheritance_depth == 0 {
            return Err(SheetError::Config(
                "resolver.max_inheritance_depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
