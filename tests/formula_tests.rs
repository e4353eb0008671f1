//! Formula dependency graph through the public builder

use pretty_assertions::assert_eq;
use sheetforge::builder::WorkbookBuilder;
use sheetforge::formula::{to_openformula, DependencyGraph};
use sheetforge::model::NamedRangeScope;
use sheetforge::SheetError;

/// One row per entry, one cell per string
fn sheet_with_rows(name: &str, rows: &[&[&str]]) -> WorkbookBuilder {
    let mut builder = WorkbookBuilder::new();
    add_sheet(&mut builder, name, rows);
    builder
}

fn add_sheet(builder: &mut WorkbookBuilder, name: &str, rows: &[&[&str]]) {
    builder.sheet(name).unwrap();
    for row in rows {
        builder.row().unwrap();
        for &cell in *row {
            builder.cell(cell).unwrap();
        }
    }
}

fn cycles_of(builder: WorkbookBuilder) -> Vec<Vec<String>> {
    match builder.build() {
        Err(SheetError::CircularReference { cycles }) => cycles,
        Err(other) => panic!("expected CircularReference, got {other}"),
        Ok(_) => panic!("expected CircularReference, build succeeded"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CYCLES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_self_reference_reported_as_single_cell_path() {
    let builder = sheet_with_rows(
        "Sheet1",
        &[&["1", "2", "3"], &["4", "5", "6"], &["7", "8", "=C3+1"]],
    );
    assert_eq!(cycles_of(builder), vec![vec!["Sheet1!C3".to_string()]]);
}

#[test]
fn test_two_cell_cycle_path() {
    let builder = sheet_with_rows("Sheet1", &[&["=B1", "=A1"]]);
    assert_eq!(
        cycles_of(builder),
        vec![vec!["Sheet1!A1".to_string(), "Sheet1!B1".to_string()]]
    );
}

#[test]
fn test_k_node_cycles_detected() {
    for k in 1..=12u32 {
        let mut builder = WorkbookBuilder::new();
        builder.sheet("S").unwrap();
        for r in 1..=k {
            let next = if r == k { 1 } else { r + 1 };
            builder.row().unwrap().cell(format!("=A{next}*2")).unwrap();
        }
        let cycles = cycles_of(builder);
        assert_eq!(cycles.len(), 1, "k = {k}");
        assert_eq!(cycles[0].len(), k as usize, "k = {k}");
        assert_eq!(cycles[0][0], "S!A1");
    }
}

#[test]
fn test_independent_cycles_all_reported() {
    let builder = sheet_with_rows("S", &[&["=A1", "=C1", "=B1", "=1+1"]]);
    let cycles = cycles_of(builder);
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0], vec!["S!A1"]);
    assert_eq!(cycles[1], vec!["S!B1", "S!C1"]);
    let msg = SheetError::CircularReference { cycles }.to_string();
    assert!(msg.contains("[S!B1 → S!C1 → S!B1]"));
}

#[test]
fn test_range_containing_its_own_cell() {
    let builder = sheet_with_rows("S", &[&["1"], &["2"], &["=SUM(A1:A3)"]]);
    assert_eq!(cycles_of(builder), vec![vec!["S!A3".to_string()]]);
}

#[test]
fn test_whole_column_reference_containing_owner() {
    let builder = sheet_with_rows("S", &[&["1", "=SUM(B:B)"], &["=SUM(A1:A1)", "2"]]);
    let cycles = cycles_of(builder);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0], vec!["S!B1"]);
}

#[test]
fn test_cross_sheet_cycle_with_quoted_name() {
    let mut builder = WorkbookBuilder::new();
    add_sheet(&mut builder, "Inputs", &[&["='Q1 Totals'!A1"]]);
    add_sheet(&mut builder, "Q1 Totals", &[&["=Inputs!A1*1.1"]]);
    let cycles = cycles_of(builder);
    assert_eq!(cycles, vec![vec!["Inputs!A1".to_string(), "Q1 Totals!A1".to_string()]]);
}

#[test]
fn test_cycle_through_named_range() {
    let mut builder = sheet_with_rows("S", &[&["=Total*2"], &["=A1+1"]]);
    builder.named_range("Total", "A2", None).unwrap();
    let cycles = cycles_of(builder);
    assert_eq!(cycles.len(), 1);
    let path = &cycles[0];
    assert_eq!(path.len(), 3);
    assert!(path.contains(&"S!A1".to_string()));
    assert!(path.contains(&"S!A2".to_string()));
}

#[test]
fn test_cycle_through_workbook_name_on_other_sheet() {
    let mut builder = WorkbookBuilder::new();
    add_sheet(&mut builder, "Rates", &[&["=Summary!A1/12"]]);
    add_sheet(&mut builder, "Summary", &[&["=MonthlyRate*12"]]);
    builder
        .named_range("MonthlyRate", "Rates!A1", Some(NamedRangeScope::Workbook))
        .unwrap();
    let cycles = cycles_of(builder);
    assert_eq!(cycles[0].len(), 3);
}

#[test]
fn test_cycle_through_sheet_qualified_name() {
    let mut builder = WorkbookBuilder::new();
    add_sheet(&mut builder, "Data", &[&["=Summary!A1+1"]]);
    builder.named_range("total", "A1", None).unwrap();
    add_sheet(&mut builder, "Summary", &[&["=Data!total*2"]]);
    let cycles = cycles_of(builder);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].len(), 3);
    assert!(cycles[0].contains(&"Data!total".to_string()));
}

// ═══════════════════════════════════════════════════════════════════════════
// ACYCLIC WORKBOOKS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_long_acyclic_chain_builds() {
    let mut builder = WorkbookBuilder::new();
    builder.sheet("S").unwrap().row().unwrap().cell(1).unwrap();
    for r in 2..=2000 {
        builder.row().unwrap().cell(format!("=A{}+1", r - 1)).unwrap();
    }
    let doc = builder.build().unwrap();
    let graph = DependencyGraph::build(doc.workbook()).unwrap();
    assert_eq!(graph.node_count(), 1999);
    assert_eq!(graph.edge_count(), 1998);
}

#[test]
fn test_references_inside_strings_ignored() {
    let builder = sheet_with_rows("S", &[&["=\"A1 is \" & B1", "10"]]);
    builder.build().unwrap();
}

#[test]
fn test_undefined_name_does_not_fail_build() {
    let builder = sheet_with_rows("S", &[&["=TaxRate*100"]]);
    builder.build().unwrap();
}

#[test]
fn test_sheet_qualified_name_builds() {
    let mut builder = WorkbookBuilder::new();
    add_sheet(&mut builder, "Data", &[&["100"]]);
    builder.named_range("total", "A1", None).unwrap();
    add_sheet(&mut builder, "Summary", &[&["=Data!total*2"]]);
    let doc = builder.build().unwrap();
    let graph = DependencyGraph::build(doc.workbook()).unwrap();
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn test_unknown_sheet_reference_fails() {
    let builder = sheet_with_rows("S", &[&["=Nowhere!A1"]]);
    match builder.build() {
        Err(SheetError::FormulaReference { cell, message }) => {
            assert_eq!(cell, "S!A1");
            assert!(message.contains("Nowhere"));
        }
        other => panic!("expected FormulaReference, got {:?}", other.err()),
    }
}

#[test]
fn test_openformula_translation() {
    assert_eq!(to_openformula("=SUM(A1:B2)").unwrap(), "of:=SUM([.A1:.B2])");
    assert_eq!(
        to_openformula("='Q1 Totals'!B3*Rate").unwrap(),
        "of:=['Q1 Totals'.B3]*Rate"
    );
}
