use crate::builder::WorkbookBuilder;
use crate::config::Config;
use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use crate::model::Workbook;
use crate::parser::{self, Definition};
use crate::render::{self, inspect_archive, ArchiveSummary, RenderStats};
use crate::theme::ThemeSet;
use colored::Colorize;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Options shared by `build` and `check`
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Theme file; overrides the definition's `theme`
    pub theme: Option<PathBuf>,
    /// Variant; overrides the definition's `variant`
    pub variant: Option<String>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

fn load_config(path: Option<&Path>) -> SheetResult<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

/// Parse a definition and attach theme, variant and config
fn prepare(definition: &Path, options: &BuildOptions) -> SheetResult<WorkbookBuilder> {
    let config = load_config(options.config.as_deref())?;
    let Definition {
        theme,
        variant,
        builder,
    } = parser::parse_definition(definition)?;

    let mut builder = builder.with_config(config);
    if let Some(theme_path) = options.theme.clone().or(theme) {
        if options.verbose {
            println!("   Theme: {}", theme_path.display());
        }
        let theme = ThemeSet::load_flattened(&theme_path, config.resolver.max_inheritance_depth)?;
        builder = builder.with_theme(theme);
    }
    if let Some(variant) = options.variant.clone().or(variant) {
        if options.verbose {
            println!("   Variant: {}", variant.bright_yellow());
        }
        builder = builder.with_variant(variant);
    }
    Ok(builder)
}

fn print_document_summary(doc: &Document) {
    for sheet in &doc.workbook().sheets {
        let formulas = sheet.formula_cells().count();
        println!(
            "   📊 {} ({} rows, {} formulas, {} merges)",
            sheet.name.bright_blue().bold(),
            sheet.row_count(),
            formulas,
            sheet.merges.len()
        );
    }
    println!("   🎨 {} resolved styles", doc.styles().len());
}

/// Execute the build command
pub fn build(
    definition: PathBuf,
    output: Option<PathBuf>,
    options: BuildOptions,
) -> SheetResult<RenderStats> {
    let output = output.unwrap_or_else(|| definition.with_extension("ods"));
    println!("{}", "🔥 sheetforge - Building workbook".bold().green());
    println!("   Definition: {}", definition.display());
    println!("   Output:     {}\n", output.display());

    let format = render::preflight(&output)?;
    let doc = prepare(&definition, &options)?.build()?;
    if options.verbose {
        print_document_summary(&doc);
        println!();
    }

    let stats = doc.render_to(&output, format)?;
    println!("{}", format!("✅ {format} written").bold().green());
    println!(
        "   {} sheets, {} rows, {} bytes",
        stats.sheets, stats.rows, stats.bytes_written
    );
    if options.verbose {
        println!(
            "   {} entries, {} bytes uncompressed, peak {} buffered rows",
            stats.entries, stats.uncompressed_bytes, stats.peak_buffered_rows
        );
    }
    Ok(stats)
}

/// Execute the check command: full validation, nothing written
pub fn check(definition: PathBuf, options: BuildOptions) -> SheetResult<()> {
    println!("{}", "✅ Checking workbook definition".bold().green());
    println!("   File: {}\n", definition.display());

    let doc = match prepare(&definition, &options).and_then(WorkbookBuilder::build) {
        Ok(doc) => doc,
        Err(e) => {
            println!("{}", format!("❌ {e}").bold().red());
            return Err(e);
        }
    };
    print_document_summary(&doc);
    println!("\n{}", "✅ Definition is valid".bold().green());
    Ok(())
}

#[derive(Debug, Serialize)]
struct SheetReport {
    name: String,
    rows: u32,
    cells: usize,
    formulas: usize,
    merges: usize,
    protected: bool,
}

#[derive(Debug, Serialize)]
struct NameReport {
    name: String,
    range: String,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    path: String,
    entries: usize,
    uncompressed_bytes: u64,
    compressed_bytes: u64,
    title: Option<String>,
    sheets: Vec<SheetReport>,
    named_ranges: Vec<NameReport>,
}

impl InspectReport {
    fn new(path: &Path, summary: &ArchiveSummary, workbook: &Workbook) -> Self {
        Self {
            path: path.display().to_string(),
            entries: summary.entries,
            uncompressed_bytes: summary.uncompressed_bytes,
            compressed_bytes: summary.compressed_bytes,
            title: workbook.properties.title.clone(),
            sheets: workbook
                .sheets
                .iter()
                .map(|s| SheetReport {
                    name: s.name.clone(),
                    rows: s.row_count(),
                    cells: s.rows.iter().map(|r| r.cells.len()).sum(),
                    formulas: s.formula_cells().count(),
                    merges: s.merges.len(),
                    protected: s.protected,
                })
                .collect(),
            named_ranges: workbook
                .all_named_ranges()
                .map(|n| NameReport {
                    name: n.name.clone(),
                    range: n.range.to_string(),
                })
                .collect(),
        }
    }
}

/// Execute the inspect command: hardened read-back of an ODS file
pub fn inspect(document: PathBuf, json: bool, config: Option<PathBuf>) -> SheetResult<()> {
    let config = load_config(config.as_deref())?;
    let limits = config.limits;

    let file = File::open(&document).map_err(|e| SheetError::io_at(&document, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let summary = inspect_archive(&mut archive, &limits)?;
    let workbook = render::read_document(&document, &limits)?;
    let report = InspectReport::new(&document, &summary, &workbook);

    if json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| SheetError::Parse(format!("JSON output failed: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    println!("{}", "🔍 sheetforge - Inspecting document".bold().green());
    println!("   File: {}", document.display());
    if let Some(title) = &report.title {
        println!("   Title: {}", title.bold());
    }
    println!(
        "   {} entries, {} bytes compressed, {} bytes uncompressed\n",
        report.entries, report.compressed_bytes, report.uncompressed_bytes
    );
    for sheet in &report.sheets {
        let lock = if sheet.protected { " 🔒" } else { "" };
        println!(
            "   📊 {}{} ({} rows, {} cells, {} formulas, {} merges)",
            sheet.name.bright_blue().bold(),
            lock,
            sheet.rows,
            sheet.cells,
            sheet.formulas,
            sheet.merges
        );
    }
    if !report.named_ranges.is_empty() {
        println!("\n   📐 Named ranges:");
        for name in &report.named_ranges {
            println!("      {} = {}", name.name.bright_blue(), name.range);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DEFINITION: &str = r#"
sheets:
  - name: Data
    columns: [Item, Amount]
    header: true
    rows:
      - [Rent, 1200]
      - [Total, "=SUM(B2:B2)"]
    named_ranges:
      - { name: Rent, range: B2 }
"#;

    #[test]
    fn test_build_then_inspect() {
        let dir = TempDir::new().unwrap();
        let definition = dir.path().join("budget.yaml");
        fs::write(&definition, DEFINITION).unwrap();

        let stats = build(definition.clone(), None, BuildOptions::default()).unwrap();
        assert_eq!(stats.rows, 3);
        let output = dir.path().join("budget.ods");
        assert!(output.exists());

        inspect(output, true, None).unwrap();
    }

    #[test]
    fn test_check_reports_cycle() {
        let dir = TempDir::new().unwrap();
        let definition = dir.path().join("cycle.yaml");
        fs::write(
            &definition,
            "sheets:\n  - name: S\n    rows:\n      - [\"=B1\", \"=A1\"]\n",
        )
        .unwrap();
        let err = check(definition, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, SheetError::CircularReference { .. }));
    }

    #[test]
    fn test_missing_theme_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let definition = dir.path().join("d.yaml");
        fs::write(&definition, DEFINITION).unwrap();
        let options = BuildOptions {
            theme: Some(dir.path().join("nope.yaml")),
            ..BuildOptions::default()
        };
        let err = check(definition, options).unwrap_err();
        assert!(matches!(err, SheetError::IoAt { .. }));
    }
}
