//! Streaming renderer, atomic output and the hardened reader

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use sheetforge::builder::{CellSpec, WorkbookBuilder};
use sheetforge::config::{Config, ResourceLimits};
use sheetforge::model::{
    CellContent, CellRef, CellValue, Condition, DocumentProperties, NamedRangeScope,
    ValidationRule,
};
use sheetforge::render::{inspect_archive, read_workbook, verify_package, OutputFormat};
use sheetforge::theme::{StyleDefinition, Theme};
use sheetforge::{read_document, Document, SheetError};
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn theme() -> Theme {
    Theme::new("report")
        .color("primary", "#1F4E79")
        .style(
            "header",
            StyleDefinition::new()
                .set("font.weight", "bold")
                .set("fill", "{colors.primary|lighten:0.5}"),
        )
        .style("money", StyleDefinition::new().set("number_format", "#,##0.00"))
        .style("alert", StyleDefinition::new().set("font.color", "#C00000"))
}

fn report() -> Document {
    let mut builder = WorkbookBuilder::new().with_theme(theme());
    builder.properties(DocumentProperties {
        title: Some("Quarterly report".to_string()),
        ..DocumentProperties::default()
    });
    builder
        .sheet("Data")
        .unwrap()
        .column("Item")
        .unwrap()
        .column("Amount")
        .unwrap()
        .column("Due")
        .unwrap()
        .header_row(Some("header".into()))
        .unwrap()
        .freeze(1, 0)
        .unwrap()
        .row()
        .unwrap()
        .cell("Rent")
        .unwrap()
        .cell(CellSpec::value(1200.5).style("money").comment("monthly"))
        .unwrap()
        .cell(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        .unwrap()
        .row()
        .unwrap()
        .cell("Paid")
        .unwrap()
        .cell(true)
        .unwrap()
        .row()
        .unwrap()
        .cell("Total")
        .unwrap()
        .cell(CellSpec::formula("=SUM(B2:B2)").style("money"))
        .unwrap()
        .row()
        .unwrap()
        .cell(CellSpec::text("Notes").colspan(3))
        .unwrap()
        .named_range("Amounts", "B2:B3", None)
        .unwrap()
        .validation("C2:C3", ValidationRule::List(vec!["open".into(), "closed".into()]))
        .unwrap()
        .conditional_format("B2:B4", Condition::GreaterThan(1000.0), "alert")
        .unwrap();
    builder.sheet("Summary").unwrap().row().unwrap().cell("=Data!B4").unwrap();
    builder
        .named_range("GrandTotal", "Data!B4", Some(NamedRangeScope::Workbook))
        .unwrap();
    builder.build().unwrap()
}

fn entry_text(path: &Path, name: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut text = String::new();
    archive.by_name(name).unwrap().read_to_string(&mut text).unwrap();
    text
}

fn big_document(rows: u32, limits: ResourceLimits) -> Document {
    let mut builder = WorkbookBuilder::new().with_config(Config {
        limits,
        ..Config::default()
    });
    builder.sheet("Big").unwrap();
    for r in 1..=rows {
        builder
            .row()
            .unwrap()
            .cell(format!("Item {r}"))
            .unwrap()
            .cell(r)
            .unwrap()
            .cell(format!("=B{r}*2"))
            .unwrap();
    }
    builder.build().unwrap()
}

fn zip_bytes(entries: &[(&str, Vec<u8>, CompressionMethod)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content, method) in entries {
        zip.start_file(*name, SimpleFileOptions::default().compression_method(*method))
            .unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

const MIMETYPE: &[u8] = b"application/vnd.oasis.opendocument.spreadsheet";

// ═══════════════════════════════════════════════════════════════════════════
// PACKAGE STRUCTURE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_package_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.ods");
    let stats = report().save(&path).unwrap();
    assert_eq!(stats.format, OutputFormat::Ods);
    assert_eq!(stats.sheets, 2);
    assert_eq!(stats.rows, 6);
    assert_eq!(stats.bytes_written, fs::metadata(&path).unwrap().len());

    let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let first = archive.by_index(0).unwrap();
    assert_eq!(first.name(), "mimetype");
    assert_eq!(first.compression(), CompressionMethod::Stored);
    drop(first);
    for part in ["META-INF/manifest.xml", "content.xml", "styles.xml", "meta.xml", "settings.xml"] {
        assert!(archive.by_name(part).is_ok(), "missing {part}");
    }
}

#[test]
fn test_named_ranges_in_one_container_after_tables() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("names.ods");
    report().save(&path).unwrap();
    let content = entry_text(&path, "content.xml");

    assert_eq!(content.matches("<table:named-expressions").count(), 1);
    assert_eq!(content.matches("<table:named-range ").count(), 2);
    let container = content.find("<table:named-expressions").unwrap();
    let last_table = content.rfind("</table:table>").unwrap();
    let spreadsheet_end = content.find("</office:spreadsheet>").unwrap();
    assert!(last_table < container && container < spreadsheet_end);
    assert!(content.contains(r#"table:name="Amounts""#));
    assert!(content.contains(r#"table:cell-range-address="$Data.$B$2:.$B$3""#));
}

#[test]
fn test_empty_named_expressions_container_still_emitted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.ods");
    let mut builder = WorkbookBuilder::new();
    builder.sheet("S").unwrap().row().unwrap().cell(1).unwrap();
    builder.save(&path).unwrap();
    let content = entry_text(&path, "content.xml");
    assert_eq!(content.matches("<table:named-expressions").count(), 1);
    assert_eq!(content.matches("<table:named-range ").count(), 0);
}

#[test]
fn test_merged_cells_written_as_anchor_and_covered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("merge.ods");
    let mut builder = WorkbookBuilder::new();
    builder
        .sheet("S")
        .unwrap()
        .row()
        .unwrap()
        .cell(CellSpec::text("Block").colspan(2).rowspan(2))
        .unwrap()
        .cell("right")
        .unwrap()
        .row()
        .unwrap()
        .cell("below-right")
        .unwrap();
    builder.save(&path).unwrap();
    let content = entry_text(&path, "content.xml");
    assert!(content.contains(r#"table:number-columns-spanned="2""#));
    assert!(content.contains(r#"table:number-rows-spanned="2""#));
    assert!(content.contains("<table:covered-table-cell"));
    assert_eq!(content.matches("Block").count(), 1);

    let wb = read_document(&path, &ResourceLimits::default()).unwrap();
    let sheet = &wb.sheets[0];
    assert_eq!(sheet.merges[0].range.to_a1(), "A1:B2");
    assert_eq!(
        sheet.cell(CellRef::new(1, 2)).unwrap().content,
        CellContent::Value(CellValue::Text("below-right".into()))
    );
    assert!(sheet.cell(CellRef::new(1, 1)).is_none());
}

#[test]
fn test_styles_and_settings_parts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("styled.ods");
    report().save(&path).unwrap();

    let content = entry_text(&path, "content.xml");
    assert!(content.contains("fo:font-weight=\"bold\""));
    assert!(content.contains("table:content-validation"));
    assert!(content.contains("calcext:conditional-format"));
    assert!(content.contains("of:=SUM([.B2:.B2])"));

    let settings = entry_text(&path, "settings.xml");
    assert!(settings.contains("Data"));
    assert!(settings.contains("VerticalSplitPosition"));

    let meta = entry_text(&path, "meta.xml");
    assert!(meta.contains("Quarterly report"));
    assert!(meta.contains("sheetforge/"));
}

// ═══════════════════════════════════════════════════════════════════════════
// BOUNDED MEMORY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_hundred_thousand_rows_stay_within_row_window() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.ods");
    let limits = ResourceLimits::default();
    let doc = big_document(100_000, limits);

    let stats = doc.save(&path).unwrap();
    assert_eq!(stats.rows, 100_000);
    assert!(stats.peak_buffered_rows > 0);
    assert!(stats.peak_buffered_rows <= limits.row_window);

    let summary = verify_package(&path, &limits).unwrap();
    assert_eq!(summary.entries, stats.entries);
}

#[test]
fn test_custom_row_window_respected() {
    let dir = TempDir::new().unwrap();
    let limits = ResourceLimits {
        row_window: 8,
        ..ResourceLimits::default()
    };
    let stats = big_document(500, limits)
        .save(&dir.path().join("w.ods"))
        .unwrap();
    assert_eq!(stats.peak_buffered_rows, 8);
}

// ═══════════════════════════════════════════════════════════════════════════
// ATOMICITY AND LIMITS ON WRITE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_failed_render_keeps_previous_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.ods");
    fs::write(&path, b"previous contents").unwrap();

    let limits = ResourceLimits {
        max_uncompressed_bytes: 16 * 1024,
        ..ResourceLimits::default()
    };
    let err = big_document(5_000, limits).save(&path).unwrap_err();
    match err {
        SheetError::ResourceLimit { limit, entry, .. } => {
            assert_eq!(limit, "uncompressed size");
            assert!(entry.unwrap().contains("content.xml"));
        }
        other => panic!("expected ResourceLimit, got {other:?}"),
    }

    assert_eq!(fs::read(&path).unwrap(), b"previous contents");
    // No temporary file left behind
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_failed_render_leaves_destination_absent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("never.ods");
    let limits = ResourceLimits {
        max_uncompressed_bytes: 4 * 1024,
        ..ResourceLimits::default()
    };
    assert!(big_document(1_000, limits).save(&path).is_err());
    assert!(!path.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_written_package_passes_reader_limits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ok.ods");
    let limits = ResourceLimits {
        max_uncompressed_bytes: 8 * 1024 * 1024,
        ..ResourceLimits::default()
    };
    let doc = big_document(5_000, ResourceLimits::default()).with_limits(limits);
    doc.save(&path).unwrap();

    let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
    inspect_archive(&mut archive, &limits).unwrap();
    let wb = read_document(&path, &limits).unwrap();
    assert_eq!(wb.sheets[0].row_count(), 5_000);
}

#[test]
fn test_unsupported_extension_and_missing_directory() {
    let dir = TempDir::new().unwrap();
    let doc = report();
    assert!(matches!(
        doc.save(&dir.path().join("out.pdf")),
        Err(SheetError::InvalidPath { .. })
    ));
    assert!(matches!(
        doc.save(&dir.path().join("nope").join("out.ods")),
        Err(SheetError::InvalidPath { .. })
    ));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// READING BACK
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_round_trip_through_reader() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rt.ods");
    report().save(&path).unwrap();

    let wb = read_document(&path, &ResourceLimits::default()).unwrap();
    assert_eq!(wb.properties.title.as_deref(), Some("Quarterly report"));
    assert_eq!(
        wb.sheets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["Data", "Summary"]
    );

    let data = &wb.sheets[0];
    let at = |r, c| data.cell(CellRef::new(r, c)).map(|cell| cell.content.clone());
    assert_eq!(at(0, 1), Some(CellContent::Value(CellValue::Text("Amount".into()))));
    assert_eq!(at(1, 1), Some(CellContent::Value(CellValue::Number(1200.5))));
    assert_eq!(
        at(1, 2),
        Some(CellContent::Value(CellValue::Date(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        )))
    );
    assert_eq!(at(2, 1), Some(CellContent::Value(CellValue::Boolean(true))));
    assert_eq!(at(3, 1), Some(CellContent::Formula("=SUM(B2:B2)".into())));
    assert_eq!(
        data.cell(CellRef::new(1, 1)).unwrap().comment.as_deref(),
        Some("monthly")
    );
    assert_eq!(data.merges[0].range.to_a1(), "A5:C5");

    let summary = &wb.sheets[1];
    assert_eq!(
        summary.cell(CellRef::new(0, 0)).unwrap().content.formula(),
        Some("=Data!B4")
    );

    let mut names: Vec<_> = wb
        .named_ranges
        .iter()
        .map(|n| (n.name.clone(), n.range.to_string()))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            ("Amounts".to_string(), "Data!B2:B3".to_string()),
            ("GrandTotal".to_string(), "Data!B4".to_string()),
        ]
    );
}

#[test]
fn test_read_back_workbook_can_be_rebuilt() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.ods");
    let second = dir.path().join("second.ods");
    report().save(&first).unwrap();

    let wb = read_document(&first, &ResourceLimits::default()).unwrap();
    let mut builder = WorkbookBuilder::from_workbook(wb);
    builder.sheet("Summary").unwrap().row().unwrap().cell("added").unwrap();
    let stats = builder.save(&second).unwrap();
    assert_eq!(stats.sheets, 2);
    let again = read_document(&second, &ResourceLimits::default()).unwrap();
    assert_eq!(again.sheets[1].row_count(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// HOSTILE INPUT
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_zip_bomb_rejected_before_inflating() {
    let bytes = zip_bytes(&[
        ("mimetype", MIMETYPE.to_vec(), CompressionMethod::Stored),
        ("content.xml", vec![b' '; 8 * 1024 * 1024], CompressionMethod::Deflated),
    ]);
    let err = read_workbook(Cursor::new(bytes), &ResourceLimits::default()).unwrap_err();
    match err {
        SheetError::ResourceLimit { limit, entry, .. } => {
            assert_eq!(limit, "compression ratio");
            assert_eq!(entry.as_deref(), Some("content.xml"));
        }
        other => panic!("expected ResourceLimit, got {other:?}"),
    }
}

#[test]
fn test_total_size_limit_on_read() {
    let bytes = zip_bytes(&[
        ("mimetype", MIMETYPE.to_vec(), CompressionMethod::Stored),
        ("content.xml", vec![b'x'; 64 * 1024], CompressionMethod::Stored),
    ]);
    let limits = ResourceLimits {
        max_uncompressed_bytes: 32 * 1024,
        ..ResourceLimits::default()
    };
    let err = read_workbook(Cursor::new(bytes), &limits).unwrap_err();
    assert!(matches!(
        err,
        SheetError::ResourceLimit {
            limit: "uncompressed size",
            ..
        }
    ));
}

#[test]
fn test_entry_count_limit_on_read() {
    let mut entries = vec![("mimetype".to_string(), MIMETYPE.to_vec())];
    for i in 0..40 {
        entries.push((format!("junk/{i}.xml"), b"<x/>".to_vec()));
    }
    let borrowed: Vec<_> = entries
        .iter()
        .map(|(n, c)| (n.as_str(), c.clone(), CompressionMethod::Stored))
        .collect();
    let limits = ResourceLimits {
        max_entries: 32,
        ..ResourceLimits::default()
    };
    let err = read_workbook(Cursor::new(zip_bytes(&borrowed)), &limits).unwrap_err();
    assert!(matches!(
        err,
        SheetError::ResourceLimit {
            limit: "entry count",
            actual: 41,
            max: 32,
            ..
        }
    ));
}

#[test]
fn test_doctype_in_content_rejected() {
    let content = br#"<?xml version="1.0"?>
<!DOCTYPE lolz [<!ENTITY lol "lol"><!ENTITY lol2 "&lol;&lol;&lol;">]>
<office:document-content><office:body><office:spreadsheet>&lol2;</office:spreadsheet></office:body></office:document-content>"#;
    let bytes = zip_bytes(&[
        ("mimetype", MIMETYPE.to_vec(), CompressionMethod::Stored),
        ("content.xml", content.to_vec(), CompressionMethod::Deflated),
    ]);
    let err = read_workbook(Cursor::new(bytes), &ResourceLimits::default()).unwrap_err();
    assert!(matches!(err, SheetError::UnsafeXml(_)));
}

fn package_with_rows(rows: &str) -> Vec<u8> {
    let content = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content><office:body><office:spreadsheet><table:table table:name="Data">{rows}</table:table></office:spreadsheet></office:body></office:document-content>"#
    );
    zip_bytes(&[
        ("mimetype", MIMETYPE.to_vec(), CompressionMethod::Stored),
        ("content.xml", content.into_bytes(), CompressionMethod::Deflated),
    ])
}

#[test]
fn test_hostile_merge_spans_rejected() {
    let first = r#"<table:table-row><table:table-cell office:value-type="string"><text:p>a</text:p></table:table-cell></table:table-row>"#;
    let cases = [
        (r#"table:number-rows-spanned="4294967295""#, "row count"),
        (r#"table:number-rows-spanned="1048576""#, "row count"),
        (r#"table:number-columns-spanned="4000000000""#, "column count"),
        (r#"table:number-columns-spanned="16385""#, "column count"),
    ];
    for (attribute, expected) in cases {
        let rows = format!(
            r#"{first}<table:table-row><table:table-cell {attribute} office:value-type="string"><text:p>b</text:p></table:table-cell></table:table-row>"#
        );
        let err = read_workbook(Cursor::new(package_with_rows(&rows)), &ResourceLimits::default())
            .unwrap_err();
        match err {
            SheetError::ResourceLimit { limit, .. } => assert_eq!(limit, expected, "{attribute}"),
            other => panic!("{attribute}: expected ResourceLimit, got {other}"),
        }
    }
}

#[test]
fn test_wrong_mimetype_rejected() {
    let bytes = zip_bytes(&[
        ("mimetype", b"application/zip".to_vec(), CompressionMethod::Stored),
        ("content.xml", b"<x/>".to_vec(), CompressionMethod::Stored),
    ]);
    let err = read_workbook(Cursor::new(bytes), &ResourceLimits::default()).unwrap_err();
    assert!(matches!(err, SheetError::InvalidDocument(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// XLSX
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_xlsx_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.xlsx");
    let stats = report().save(&path).unwrap();
    assert_eq!(stats.format, OutputFormat::Xlsx);
    assert_eq!(stats.sheets, 2);
    assert!(stats.entries > 0);

    let workbook = entry_text(&path, "xl/workbook.xml");
    assert!(workbook.contains("Data"));
    assert!(workbook.contains("Summary"));
    assert!(workbook.contains("GrandTotal"));
    assert!(workbook.contains("Amounts"));

    let sheet = entry_text(&path, "xl/worksheets/sheet1.xml");
    assert!(sheet.contains("SUM(B2:B2)"));
    assert!(sheet.contains("A5:C5"));
    assert!(sheet.contains("dataValidation"));
    assert!(sheet.contains("conditionalFormatting"));
}

#[test]
fn test_xlsx_failure_keeps_previous_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.xlsx");
    fs::write(&path, b"old").unwrap();
    let limits = ResourceLimits {
        max_uncompressed_bytes: 1024,
        ..ResourceLimits::default()
    };
    let doc = report().with_limits(limits);
    assert!(matches!(
        doc.save(&path),
        Err(SheetError::ResourceLimit { .. })
    ));
    assert_eq!(fs::read(&path).unwrap(), b"old");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}
