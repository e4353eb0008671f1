//! Build-time validation and style resolution

use super::BuilderState;
use crate::config::Config;
use crate::document::Document;
use crate::error::{SheetError, SheetResult};
use crate::formula::validate_formulas;
use crate::render::styles::length_in_points;
use crate::model::{column_to_letters, CellRef, Sheet, Workbook};
use crate::theme::{ResolutionContext, Theme};
use std::collections::HashMap;
use tracing::{debug, info};

pub(super) fn finalize(
    mut workbook: Workbook,
    theme: Option<Theme>,
    variant: Option<&str>,
    config: Config,
    state: &BuilderState,
) -> SheetResult<Document> {
    config.validate()?;
    check_structure(&workbook, state)?;
    check_named_ranges(&workbook)?;

    let theme = prepare_theme(theme, variant)?;
    let depth = config.resolver.max_inheritance_depth;
    let mut ctx = ResolutionContext::new(&theme, depth);
    ctx.check_all_styles()?;
    for sheet in &mut workbook.sheets {
        resolve_sheet(&mut ctx, sheet)?;
    }
    let styles = ctx.finish();

    let graph = validate_formulas(&workbook)?;
    info!(
        sheets = workbook.sheets.len(),
        styles = styles.len(),
        formula_nodes = graph.node_count(),
        "workbook built"
    );

    Ok(Document::new(
        workbook,
        styles,
        theme.fonts.get("body").map(|f| f.family.clone()),
        config.limits,
    ))
}

fn check_structure(workbook: &Workbook, state: &BuilderState) -> SheetResult<()> {
    if workbook.sheets.is_empty() {
        return Err(SheetError::NoSheetSelected {
            operation: "build",
            state: state.clone(),
            suggestion: "Add at least one sheet with sheet(name) before building.".to_string(),
        });
    }
    for sheet in &workbook.sheets {
        if sheet.rows.is_empty() {
            return Err(SheetError::EmptySheet {
                sheet: sheet.name.clone(),
            });
        }
        check_merges(sheet)?;
        let widths = sheet.columns.iter().filter_map(|c| c.width.as_deref());
        let heights = sheet.rows.iter().filter_map(|r| r.height.as_deref());
        for length in widths.chain(heights) {
            length_in_points(length)?;
        }
    }
    Ok(())
}

/// Row spans created by `cell()` are only bounds-checked here, once every
/// row exists; a colspan widens the populated extent itself
fn check_merges(sheet: &Sheet) -> SheetResult<()> {
    let rows = sheet.row_count();
    for (i, merge) in sheet.merges.iter().enumerate() {
        let range = &merge.range;
        if range.end.row >= rows {
            return Err(SheetError::MergeOutOfBounds {
                sheet: sheet.name.clone(),
                range: range.to_a1(),
                rows,
                columns: sheet.column_extent(),
            });
        }
        if let Some(other) = sheet.merges[..i].iter().find(|m| m.range.intersects(range)) {
            return Err(SheetError::MergeOverlap {
                sheet: sheet.name.clone(),
                range: range.to_a1(),
                existing: other.range.to_a1(),
            });
        }
        for at in range.cells() {
            if !merge.covers(at) {
                continue;
            }
            if sheet.cell(at).is_some_and(|c| !c.is_inert()) {
                return Err(SheetError::MergeCoversContent {
                    sheet: sheet.name.clone(),
                    range: range.to_a1(),
                    cell: at.to_a1(),
                });
            }
        }
    }
    Ok(())
}

/// All names land in one `named-expressions` container, which has no notion
/// of scope, so names must be unique across every scope
fn check_named_ranges(workbook: &Workbook) -> SheetResult<()> {
    let mut seen: HashMap<String, String> = HashMap::new();
    for named in workbook.all_named_ranges() {
        let key = named.name.to_ascii_lowercase();
        if let Some(first) = seen.get(&key) {
            return Err(SheetError::DuplicateNamedRange {
                name: named.name.clone(),
                scope: format!("{} (already declared in {first})", named.scope),
            });
        }
        seen.insert(key, named.scope.to_string());
    }
    Ok(())
}

fn prepare_theme(theme: Option<Theme>, variant: Option<&str>) -> SheetResult<Theme> {
    let theme = theme.unwrap_or_else(|| Theme::new("default"));
    if let Some(parent) = &theme.extends {
        // Theme-level inheritance is flattened by ThemeSet before this point
        return Err(SheetError::ThemeNotFound(parent.clone()));
    }
    match variant {
        Some(variant) => {
            debug!(theme = %theme.name, variant, "applying theme variant");
            theme.with_variant(variant)
        }
        None => Ok(theme),
    }
}

/// Resolve column, row, cell and conditional-format styles; cells without a
/// style of their own inherit the row style, then the column style
fn resolve_sheet(ctx: &mut ResolutionContext<'_>, sheet: &mut Sheet) -> SheetResult<()> {
    let name = sheet.name.clone();
    for (col, column) in sheet.columns.iter_mut().enumerate() {
        if let Some(style) = &column.style {
            let location = format!("{name}!column {}", column_to_letters(col as u32));
            column.resolved = Some(ctx.resolve(style, &location)?);
        }
    }
    let column_styles: Vec<_> = sheet.columns.iter().map(|c| c.resolved).collect();

    for row in &mut sheet.rows {
        if let Some(style) = &row.style {
            row.resolved = Some(ctx.resolve(style, &format!("{name}!row {}", row.index + 1))?);
        }
        let row_style = row.resolved;
        for (&col, cell) in &mut row.cells {
            cell.resolved = match &cell.style {
                Some(style) if !style.is_empty() => {
                    let location = format!("{name}!{}", CellRef::new(row.index, col).to_a1());
                    Some(ctx.resolve(style, &location)?)
                }
                _ => row_style.or_else(|| column_styles.get(col as usize).copied().flatten()),
            };
        }
    }

    for format in &mut sheet.conditional_formats {
        let location = format!("{name}!{} (conditional format)", format.range.to_a1());
        format.resolved = Some(ctx.resolve(&format.style, &location)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{CellSpec, RowSpec, WorkbookBuilder};
    use crate::model::NamedRangeScope;
    use crate::theme::StyleDefinition;

    fn theme() -> Theme {
        Theme::new("t")
            .color("primary", "#112233")
            .style("header", StyleDefinition::new().set("font.weight", "bold"))
            .style("money", StyleDefinition::new().set("number_format", "#,##0.00"))
    }

    #[test]
    fn test_build_without_sheets() {
        let err = WorkbookBuilder::new().build().unwrap_err();
        assert!(matches!(err, SheetError::NoSheetSelected { operation: "build", .. }));
    }

    #[test]
    fn test_empty_sheet_named_in_error() {
        let mut builder = WorkbookBuilder::new();
        builder.sheet("Full").unwrap().row().unwrap().cell(1).unwrap();
        builder.sheet("Empty").unwrap();
        match builder.build() {
            Err(SheetError::EmptySheet { sheet }) => assert_eq!(sheet, "Empty"),
            other => panic!("expected EmptySheet, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_rowspan_past_last_row_rejected() {
        let mut builder = WorkbookBuilder::new();
        builder
            .sheet("S")
            .unwrap()
            .row()
            .unwrap()
            .cell(CellSpec::text("tall").rowspan(3))
            .unwrap();
        assert!(matches!(builder.build(), Err(SheetError::MergeOutOfBounds { .. })));
    }

    #[test]
    fn test_cell_style_beats_row_and_column() {
        let mut builder = WorkbookBuilder::new().with_theme(theme());
        builder
            .sheet("S")
            .unwrap()
            .column(crate::model::ColumnSpec::new("Amount").style("money"))
            .unwrap()
            .row()
            .unwrap()
            .cell(5.0)
            .unwrap()
            .row_with(RowSpec::new().style("header"))
            .unwrap()
            .cell(6.0)
            .unwrap()
            .row_with(RowSpec::new().style("header"))
            .unwrap()
            .cell(CellSpec::value(7.0).style("money"))
            .unwrap();
        let doc = builder.build().unwrap();
        let sheet = &doc.workbook().sheets[0];
        let id = |row: usize| sheet.rows[row].cells[&0].resolved_style().unwrap();
        let money = sheet.columns[0].resolved_style().unwrap();
        assert_eq!(id(0), money);
        assert_ne!(id(1), money);
        assert_eq!(id(2), money);
    }

    #[test]
    fn test_unknown_style_fails_build() {
        let mut builder = WorkbookBuilder::new().with_theme(theme());
        builder
            .sheet("S")
            .unwrap()
            .row()
            .unwrap()
            .cell(CellSpec::value(1.0).style("missing"))
            .unwrap();
        match builder.build() {
            Err(SheetError::StyleNotFound { style, location }) => {
                assert_eq!(style, "missing");
                assert_eq!(location, "S!A1");
            }
            other => panic!("expected StyleNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_same_name_in_two_sheet_scopes_rejected() {
        let mut builder = WorkbookBuilder::new();
        builder.sheet("A").unwrap().row().unwrap().cell(1).unwrap();
        builder.named_range("total", "A1", None).unwrap();
        builder.sheet("B").unwrap().row().unwrap().cell(2).unwrap();
        builder.named_range("total", "A1", None).unwrap();
        builder
            .named_range("grand", "A!A1", Some(NamedRangeScope::Workbook))
            .unwrap();
        assert!(matches!(builder.build(), Err(SheetError::DuplicateNamedRange { .. })));
    }

    #[test]
    fn test_unflattened_theme_rejected() {
        let mut child = theme();
        child.extends = Some("base".into());
        let mut builder = WorkbookBuilder::new().with_theme(child);
        builder.sheet("S").unwrap().row().unwrap().cell(1).unwrap();
        assert!(matches!(builder.build(), Err(SheetError::ThemeNotFound(name)) if name == "base"));
    }

    #[test]
    fn test_cycle_fails_build() {
        let mut builder = WorkbookBuilder::new();
        builder
            .sheet("S")
            .unwrap()
            .row()
            .unwrap()
            .cell("=B1")
            .unwrap()
            .cell("=A1")
            .unwrap();
        assert!(matches!(builder.build(), Err(SheetError::CircularReference { .. })));
    }
}
