//! Zip container writing and verification under [`ResourceLimits`]
//!
//! The writer counts every byte handed to an entry and refuses to go past
//! the configured budget, so an oversized document fails while it is being
//! rendered rather than after the fact. [`inspect_archive`] applies the same
//! limits to an existing archive using only its central directory.

use super::xml::{self, NS_MANIFEST, ODF_VERSION};
use crate::config::ResourceLimits;
use crate::error::{SheetError, SheetResult};
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, trace, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ODS_MIMETYPE: &str = "application/vnd.oasis.opendocument.spreadsheet";

/// Where the writer currently is, for progress logging and error context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamContext {
    pub entry: Option<String>,
    pub sheet: Option<String>,
    pub row: Option<u32>,
    /// Bytes written to the current entry
    pub entry_bytes: u64,
    /// Bytes written across all entries
    pub total_bytes: u64,
    pub entries: usize,
    pub rows_written: u64,
    pub peak_buffered_rows: usize,
}

impl StreamContext {
    /// `content.xml (sheet 'Data', row 812)`
    fn location(&self) -> String {
        let entry = self.entry.as_deref().unwrap_or("<none>");
        match (&self.sheet, self.row) {
            (Some(sheet), Some(row)) => format!("{entry} (sheet '{sheet}', row {})", row + 1),
            (Some(sheet), None) => format!("{entry} (sheet '{sheet}')"),
            _ => entry.to_string(),
        }
    }
}

pub struct PackageWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    limits: ResourceLimits,
    ctx: StreamContext,
}

impl<W: Write + Seek> PackageWriter<W> {
    pub fn new(inner: W, limits: ResourceLimits) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            limits,
            ctx: StreamContext::default(),
        }
    }

    pub fn context(&self) -> &StreamContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut StreamContext {
        &mut self.ctx
    }

    /// `mimetype` must be the first entry and must not be compressed
    pub fn write_mimetype(&mut self, mimetype: &str) -> SheetResult<()> {
        if self.ctx.entries != 0 {
            return Err(SheetError::InvalidDocument(
                "mimetype must be the first entry of the package".to_string(),
            ));
        }
        self.open_entry("mimetype", CompressionMethod::Stored)?;
        self.write(mimetype.as_bytes())
    }

    /// `META-INF/manifest.xml` listing the root and every given part
    pub fn write_manifest(&mut self, mimetype: &str, parts: &[&str]) -> SheetResult<()> {
        let mut w = xml::new_writer();
        xml::declaration(&mut w)?;
        xml::start(
            &mut w,
            "manifest:manifest",
            &[NS_MANIFEST, ("manifest:version", ODF_VERSION)],
        )?;
        xml::empty(
            &mut w,
            "manifest:file-entry",
            &[
                ("manifest:full-path", "/"),
                ("manifest:version", ODF_VERSION),
                ("manifest:media-type", mimetype),
            ],
        )?;
        for part in parts {
            xml::empty(
                &mut w,
                "manifest:file-entry",
                &[("manifest:full-path", part), ("manifest:media-type", "text/xml")],
            )?;
        }
        xml::end(&mut w, "manifest:manifest")?;
        self.add_entry("META-INF/manifest.xml", &w.into_inner())
    }

    /// Whole entry in one call
    pub fn add_entry(&mut self, name: &str, content: &[u8]) -> SheetResult<()> {
        self.start_entry(name)?;
        self.write(content)
    }

    /// Begin a deflated entry; subsequent [`write`](Self::write) calls fill it
    pub fn start_entry(&mut self, name: &str) -> SheetResult<()> {
        self.open_entry(name, CompressionMethod::Deflated)
    }

    fn open_entry(&mut self, name: &str, method: CompressionMethod) -> SheetResult<()> {
        if self.ctx.entries >= self.limits.max_entries {
            return Err(SheetError::ResourceLimit {
                limit: "entry count",
                actual: self.ctx.entries as u64 + 1,
                max: self.limits.max_entries as u64,
                entry: Some(name.to_string()),
            });
        }
        if let Some(previous) = &self.ctx.entry {
            trace!(entry = %previous, bytes = self.ctx.entry_bytes, "finished entry");
        }
        let options = SimpleFileOptions::default().compression_method(method);
        self.zip.start_file(name, options)?;
        self.ctx.entry = Some(name.to_string());
        self.ctx.entry_bytes = 0;
        self.ctx.entries += 1;
        Ok(())
    }

    /// Append to the current entry, enforcing the uncompressed budget
    pub fn write(&mut self, bytes: &[u8]) -> SheetResult<()> {
        let len = bytes.len() as u64;
        let total = self.ctx.total_bytes + len;
        if total > self.limits.max_uncompressed_bytes {
            let location = self.ctx.location();
            warn!(%location, total, "uncompressed size limit reached");
            return Err(SheetError::ResourceLimit {
                limit: "uncompressed size",
                actual: total,
                max: self.limits.max_uncompressed_bytes,
                entry: Some(location),
            });
        }
        self.zip.write_all(bytes)?;
        self.ctx.entry_bytes += len;
        self.ctx.total_bytes = total;
        Ok(())
    }

    /// Close the archive and hand back the underlying writer
    pub fn finish(self) -> SheetResult<(W, StreamContext)> {
        let inner = self.zip.finish()?;
        debug!(
            entries = self.ctx.entries,
            bytes = self.ctx.total_bytes,
            "package finished"
        );
        Ok((inner, self.ctx))
    }
}

/// Declared sizes of an archive, as read from its central directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

/// Check entry count, per-entry compression ratio and total inflated size
///
/// Nothing is inflated; the sizes come from the central directory. Entries
/// below `ratio_grace_bytes` skip the ratio check.
pub fn inspect_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    limits: &ResourceLimits,
) -> SheetResult<ArchiveSummary> {
    if archive.len() > limits.max_entries {
        return Err(SheetError::ResourceLimit {
            limit: "entry count",
            actual: archive.len() as u64,
            max: limits.max_entries as u64,
            entry: None,
        });
    }

    let mut summary = ArchiveSummary {
        entries: archive.len(),
        ..ArchiveSummary::default()
    };
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        let size = file.size();
        let compressed = file.compressed_size();
        check_ratio(file.name(), size, compressed, limits)?;
        summary.uncompressed_bytes = summary.uncompressed_bytes.saturating_add(size);
        summary.compressed_bytes = summary.compressed_bytes.saturating_add(compressed);
        if summary.uncompressed_bytes > limits.max_uncompressed_bytes {
            return Err(SheetError::ResourceLimit {
                limit: "uncompressed size",
                actual: summary.uncompressed_bytes,
                max: limits.max_uncompressed_bytes,
                entry: Some(file.name().to_string()),
            });
        }
    }
    Ok(summary)
}

pub(crate) fn check_ratio(
    name: &str,
    size: u64,
    compressed: u64,
    limits: &ResourceLimits,
) -> SheetResult<()> {
    if size <= limits.ratio_grace_bytes {
        return Ok(());
    }
    let ratio = size / compressed.max(1);
    if ratio > limits.max_compression_ratio {
        return Err(SheetError::ResourceLimit {
            limit: "compression ratio",
            actual: ratio,
            max: limits.max_compression_ratio,
            entry: Some(name.to_string()),
        });
    }
    Ok(())
}

/// Re-open a freshly written package and check it against `limits`
pub fn verify_package(path: &Path, limits: &ResourceLimits) -> SheetResult<ArchiveSummary> {
    let file = File::open(path).map_err(|e| SheetError::io_at(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let summary = inspect_archive(&mut archive, limits)?;
    debug!(
        entries = summary.entries,
        uncompressed = summary.uncompressed_bytes,
        compressed = summary.compressed_bytes,
        "package verified"
    );
    Ok(summary)
}

/// Inflate one entry, stopping as soon as it exceeds `max_bytes`
///
/// The declared size is not trusted: the read itself is bounded, and the
/// ratio is re-checked against the bytes actually produced.
pub fn read_entry_limited<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    max_bytes: u64,
    limits: &ResourceLimits,
) -> SheetResult<Vec<u8>> {
    let file = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => {
            SheetError::InvalidDocument(format!("missing package entry '{name}'"))
        }
        other => SheetError::Zip(other),
    })?;
    let compressed = file.compressed_size();
    let mut out = Vec::new();
    file.take(max_bytes.saturating_add(1)).read_to_end(&mut out)?;
    let size = out.len() as u64;
    if size > max_bytes {
        return Err(SheetError::ResourceLimit {
            limit: "uncompressed size",
            actual: size,
            max: max_bytes,
            entry: Some(name.to_string()),
        });
    }
    check_ratio(name, size, compressed, limits)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn small_limits() -> ResourceLimits {
        ResourceLimits {
            max_uncompressed_bytes: 64,
            ..ResourceLimits::default()
        }
    }

    #[test]
    fn test_mimetype_is_first_and_stored() {
        let mut pkg = PackageWriter::new(Cursor::new(Vec::new()), ResourceLimits::default());
        pkg.write_mimetype(ODS_MIMETYPE).unwrap();
        pkg.add_entry("content.xml", b"<x/>").unwrap();
        let (cursor, ctx) = pkg.finish().unwrap();
        assert_eq!(ctx.entries, 2);

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_write_past_budget_fails_with_location() {
        let mut pkg = PackageWriter::new(Cursor::new(Vec::new()), small_limits());
        pkg.start_entry("content.xml").unwrap();
        pkg.context_mut().sheet = Some("Data".into());
        pkg.context_mut().row = Some(4);
        pkg.write(&[b'a'; 60]).unwrap();
        match pkg.write(&[b'b'; 10]) {
            Err(SheetError::ResourceLimit { limit, actual, max, entry }) => {
                assert_eq!(limit, "uncompressed size");
                assert_eq!(actual, 70);
                assert_eq!(max, 64);
                assert_eq!(entry.as_deref(), Some("content.xml (sheet 'Data', row 5)"));
            }
            other => panic!("expected ResourceLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_count_limit() {
        let limits = ResourceLimits {
            max_entries: 2,
            ..ResourceLimits::default()
        };
        let mut pkg = PackageWriter::new(Cursor::new(Vec::new()), limits);
        pkg.add_entry("a.xml", b"a").unwrap();
        pkg.add_entry("b.xml", b"b").unwrap();
        assert!(matches!(
            pkg.add_entry("c.xml", b"c"),
            Err(SheetError::ResourceLimit { limit: "entry count", .. })
        ));
    }

    #[test]
    fn test_inspect_rejects_high_ratio() {
        let mut pkg = PackageWriter::new(Cursor::new(Vec::new()), ResourceLimits::default());
        pkg.add_entry("bomb.xml", &vec![0u8; 2 * 1024 * 1024]).unwrap();
        let (cursor, _) = pkg.finish().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let limits = ResourceLimits {
            max_compression_ratio: 10,
            ..ResourceLimits::default()
        };
        match inspect_archive(&mut archive, &limits) {
            Err(SheetError::ResourceLimit { limit, entry, .. }) => {
                assert_eq!(limit, "compression ratio");
                assert_eq!(entry.as_deref(), Some("bomb.xml"));
            }
            other => panic!("expected ResourceLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_read_entry_limited_stops_early() {
        let mut pkg = PackageWriter::new(Cursor::new(Vec::new()), ResourceLimits::default());
        pkg.add_entry("big.xml", &[b'x'; 4096]).unwrap();
        let (cursor, _) = pkg.finish().unwrap();
        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let limits = ResourceLimits::default();
        assert!(read_entry_limited(&mut archive, "big.xml", 1024, &limits).is_err());
        assert_eq!(
            read_entry_limited(&mut archive, "big.xml", 8192, &limits).unwrap().len(),
            4096
        );
        assert!(matches!(
            read_entry_limited(&mut archive, "nope.xml", 10, &limits),
            Err(SheetError::InvalidDocument(_))
        ));
    }
}
