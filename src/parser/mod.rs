//! YAML workbook definitions
//!
//! A definition describes a whole workbook declaratively and is replayed
//! through [`WorkbookBuilder`], so it gets exactly the same validation as
//! code using the builder directly.
//!
//! ```yaml
//! theme: themes/corporate.yaml
//! properties:
//!   title: Quarterly budget
//!   author: Finance
//! sheets:
//!   - name: Budget
//!     columns:
//!       - { name: Item, width: 4cm }
//!       - { name: Amount, width: 2.5cm, style: currency }
//!     header: header
//!     rows:
//!       - [Rent, 1200]
//!       - [Salaries, 5000]
//!       - cells: [Total, "=SUM(B2:B3)"]
//!         style: total
//!     named_ranges:
//!       - { name: Expenses, range: B2:B3 }
//!     conditional_formats:
//!       - { range: B2:B3, greater_than: 2000, style: warning }
//!     freeze: { rows: 1 }
//! ```

use crate::builder::{CellSpec, RowSpec, WorkbookBuilder};
use crate::error::{SheetError, SheetResult};
use crate::model::{
    CellValue, ColumnSpec, Condition, DocumentProperties, NamedRangeScope, StyleReference,
    ValidationRule,
};
use crate::theme::source::{flatten_properties, key_str, mapping, scalar};
use chrono::{NaiveDate, NaiveDateTime};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A parsed definition: the replayed builder plus the theme it asks for
#[derive(Debug)]
pub struct Definition {
    /// Theme file, resolved relative to the definition's directory
    pub theme: Option<PathBuf>,
    pub variant: Option<String>,
    pub builder: WorkbookBuilder,
}

/// Read a workbook definition from disk
pub fn parse_definition(path: &Path) -> SheetResult<Definition> {
    let content = std::fs::read_to_string(path).map_err(|e| SheetError::io_at(path, e))?;
    let mut definition = parse_definition_str(&content)?;
    if let Some(theme) = &definition.theme {
        if theme.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            definition.theme = Some(base.join(theme));
        }
    }
    Ok(definition)
}

/// Parse a definition held in memory; theme paths are left as written
pub fn parse_definition_str(content: &str) -> SheetResult<Definition> {
    let yaml: Value = serde_yaml::from_str(content)?;
    let root = mapping(&yaml, "definition")?;

    let mut definition = Definition {
        theme: None,
        variant: None,
        builder: WorkbookBuilder::new(),
    };

    for (key, value) in root {
        match key_str(key, "definition")? {
            "theme" => definition.theme = Some(PathBuf::from(scalar(value, "theme")?)),
            "variant" => definition.variant = Some(scalar(value, "variant")?),
            "properties" => {
                definition.builder.properties(parse_properties(value)?);
            }
            "sheets" | "named_ranges" => {}
            other => {
                return Err(SheetError::Parse(format!(
                    "Unknown top-level key '{other}' (expected theme, variant, properties, sheets or named_ranges)"
                )))
            }
        }
    }

    let sheets = match root.get("sheets") {
        Some(Value::Sequence(sheets)) => sheets.as_slice(),
        Some(_) => return Err(SheetError::Parse("'sheets' must be a list".to_string())),
        None => &[],
    };
    for sheet in sheets {
        parse_sheet(&mut definition.builder, sheet)?;
    }

    if let Some(names) = root.get("named_ranges") {
        for entry in sequence(names, "named_ranges")? {
            let map = mapping(entry, "named_ranges")?;
            let name = required(map, "name", "named range")?;
            let range = required(map, "range", &format!("named range '{name}'"))?;
            definition
                .builder
                .named_range(&name, &range, Some(NamedRangeScope::Workbook))?;
        }
    }

    debug!(sheets = sheets.len(), "definition parsed");
    Ok(definition)
}

fn parse_properties(value: &Value) -> SheetResult<DocumentProperties> {
    let mut props = DocumentProperties::default();
    for (key, v) in mapping(value, "properties")? {
        match key_str(key, "properties")? {
            "title" => props.title = Some(scalar(v, "title")?),
            "subject" => props.subject = Some(scalar(v, "subject")?),
            "author" => props.author = Some(scalar(v, "author")?),
            "description" => props.description = Some(scalar(v, "description")?),
            "keywords" => {
                props.keywords = match v {
                    Value::Sequence(items) => items
                        .iter()
                        .map(|k| scalar(k, "keywords"))
                        .collect::<SheetResult<_>>()?,
                    other => scalar(other, "keywords")?
                        .split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect(),
                }
            }
            other => {
                return Err(SheetError::Parse(format!(
                    "Unknown document property '{other}'"
                )))
            }
        }
    }
    Ok(props)
}

const SHEET_KEYS: &[&str] = &[
    "name",
    "columns",
    "header",
    "rows",
    "data_rows",
    "merges",
    "named_ranges",
    "validations",
    "conditional_formats",
    "freeze",
    "protected",
];

fn parse_sheet(builder: &mut WorkbookBuilder, value: &Value) -> SheetResult<()> {
    let map = mapping(value, "sheets")?;
    let name = required(map, "name", "sheet")?;
    let context = format!("sheet '{name}'");
    for key in map.keys() {
        let key = key_str(key, &context)?;
        if !SHEET_KEYS.contains(&key) {
            return Err(SheetError::Parse(format!(
                "Unknown key '{key}' in {context} (expected one of: {})",
                SHEET_KEYS.join(", ")
            )));
        }
    }

    builder.sheet(&name)?;

    if let Some(columns) = map.get("columns") {
        for column in sequence(columns, "columns")? {
            builder.column(parse_column(column, &context)?)?;
        }
    }

    match map.get("header") {
        None | Some(Value::Bool(false)) => {}
        Some(Value::Bool(true)) => {
            builder.header_row(None)?;
        }
        Some(style) => {
            builder.header_row(Some(parse_style(style, &context)?))?;
        }
    }

    if let Some(rows) = map.get("rows") {
        for (i, row) in sequence(rows, "rows")?.iter().enumerate() {
            parse_row(builder, row, &format!("{context} rows[{i}]"))?;
        }
    }

    if let Some(data_rows) = map.get("data_rows") {
        let (count, style) = match data_rows {
            Value::Mapping(m) => (
                m.get("count").map(|v| integer(v, "data_rows.count")).transpose()?,
                m.get("style").map(|s| parse_style(s, &context)).transpose()?,
            ),
            other => (Some(integer(other, "data_rows")?), None),
        };
        let count = u32::try_from(count.unwrap_or(0))
            .map_err(|_| SheetError::Parse(format!("'data_rows' in {context} must be non-negative")))?;
        builder.data_rows(count, style)?;
    }

    if let Some(merges) = map.get("merges") {
        for merge in sequence(merges, "merges")? {
            match merge {
                Value::Mapping(m) => {
                    let range = required(m, "range", "merge")?;
                    let style = m.get("style").map(|s| parse_style(s, &context)).transpose()?;
                    builder.merge(&range, style)?;
                }
                other => {
                    builder.merge(&scalar(other, "merges")?, None)?;
                }
            }
        }
    }

    if let Some(names) = map.get("named_ranges") {
        for entry in sequence(names, "named_ranges")? {
            let m = mapping(entry, "named_ranges")?;
            let name = required(m, "name", "named range")?;
            let range = required(m, "range", &format!("named range '{name}'"))?;
            let scope = match m.get("scope").map(|s| scalar(s, "scope")).transpose()?.as_deref() {
                None | Some("sheet") => None,
                Some("workbook") => Some(NamedRangeScope::Workbook),
                Some(other) => {
                    return Err(SheetError::Parse(format!(
                        "Named range '{name}' has scope '{other}' (expected sheet or workbook)"
                    )))
                }
            };
            builder.named_range(&name, &range, scope)?;
        }
    }

    if let Some(validations) = map.get("validations") {
        for entry in sequence(validations, "validations")? {
            let m = mapping(entry, "validations")?;
            let range = required(m, "range", "validation")?;
            builder.validation(&range, parse_validation_rule(m, &range)?)?;
        }
    }

    if let Some(formats) = map.get("conditional_formats") {
        for entry in sequence(formats, "conditional_formats")? {
            let m = mapping(entry, "conditional_formats")?;
            let range = required(m, "range", "conditional format")?;
            let style = m.get("style").ok_or_else(|| {
                SheetError::Parse(format!("Conditional format on {range} needs a 'style'"))
            })?;
            let style = parse_style(style, &context)?;
            builder.conditional_format(&range, parse_condition(m, &range)?, style)?;
        }
    }

    if let Some(freeze) = map.get("freeze") {
        let m = mapping(freeze, "freeze")?;
        let get = |key: &str| -> SheetResult<u32> {
            m.get(key)
                .map(|v| integer(v, key))
                .transpose()?
                .map_or(Ok(0), |n| {
                    u32::try_from(n).map_err(|_| SheetError::Parse(format!("'freeze.{key}' must be non-negative")))
                })
        };
        builder.freeze(get("rows")?, get("columns")?)?;
    }

    if let Some(Value::Bool(true)) = map.get("protected") {
        builder.protect()?;
    }
    Ok(())
}

fn parse_column(value: &Value, context: &str) -> SheetResult<ColumnSpec> {
    match value {
        Value::Mapping(m) => {
            let mut column = ColumnSpec::new(required(m, "name", "column")?);
            if let Some(width) = m.get("width") {
                column = column.width(scalar(width, "width")?);
            }
            if let Some(style) = m.get("style") {
                column = column.style(parse_style(style, context)?);
            }
            Ok(column)
        }
        other => Ok(ColumnSpec::new(scalar(other, "columns")?)),
    }
}

fn parse_row(builder: &mut WorkbookBuilder, value: &Value, context: &str) -> SheetResult<()> {
    let (cells, spec) = match value {
        Value::Sequence(cells) => (cells.as_slice(), RowSpec::new()),
        Value::Mapping(m) => {
            let mut spec = RowSpec::new();
            if let Some(height) = m.get("height") {
                spec = spec.height(scalar(height, "height")?);
            }
            if let Some(style) = m.get("style") {
                spec = spec.style(parse_style(style, context)?);
            }
            if let Some(level) = m.get("outline") {
                let level = u8::try_from(integer(level, "outline")?).map_err(|_| {
                    SheetError::Parse(format!("'outline' in {context} must be between 0 and 255"))
                })?;
                spec = spec.outline_level(level);
            }
            let cells = match m.get("cells") {
                Some(cells) => sequence(cells, "cells")?,
                None => &[],
            };
            (cells, spec)
        }
        Value::Null => (&[][..], RowSpec::new()),
        _ => {
            return Err(SheetError::Parse(format!(
                "{context} must be a list of cells or a mapping with 'cells'"
            )))
        }
    };
    builder.row_with(spec)?;
    for cell in cells {
        builder.cell(parse_cell(cell, context)?)?;
    }
    Ok(())
}

fn parse_cell(value: &Value, context: &str) -> SheetResult<CellSpec> {
    match value {
        Value::Mapping(m) => {
            let mut spec = CellSpec::empty();
            for (key, v) in m {
                match key_str(key, context)? {
                    "value" => spec = spec.with_value(scalar_value(v, context)?),
                    "text" => spec = spec.with_value(CellValue::Text(scalar(v, "text")?)),
                    "formula" => spec = spec.with_formula(scalar(v, "formula")?),
                    "date" => spec = spec.with_value(parse_date(&scalar(v, "date")?, context)?),
                    "style" => spec = spec.style(parse_style(v, context)?),
                    "colspan" => spec = spec.colspan(span(v, "colspan")?),
                    "rowspan" => spec = spec.rowspan(span(v, "rowspan")?),
                    "comment" => spec = spec.comment(scalar(v, "comment")?),
                    other => {
                        return Err(SheetError::Parse(format!(
                            "Unknown cell key '{other}' in {context}"
                        )))
                    }
                }
            }
            Ok(spec)
        }
        Value::String(s) => Ok(CellSpec::from(s.as_str())),
        other => Ok(CellSpec::value(scalar_value(other, context)?)),
    }
}

fn scalar_value(value: &Value, context: &str) -> SheetResult<CellValue> {
    match value {
        Value::Null => Ok(CellValue::Empty),
        Value::Bool(b) => Ok(CellValue::Boolean(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(CellValue::Number)
            .ok_or_else(|| SheetError::Parse(format!("Number out of range in {context}"))),
        Value::String(s) => Ok(CellValue::Text(s.clone())),
        _ => Err(SheetError::Parse(format!(
            "Cell values in {context} must be scalars"
        ))),
    }
}

fn parse_date(text: &str, context: &str) -> SheetResult<CellValue> {
    let text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Ok(CellValue::DateTime(dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(CellValue::DateTime(dt));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(CellValue::Date)
        .map_err(|_| SheetError::Parse(format!("Invalid date '{text}' in {context} (expected YYYY-MM-DD)")))
}

/// A style name, or a mapping with `name`, `traits` and inline properties
fn parse_style(value: &Value, context: &str) -> SheetResult<StyleReference> {
    match value {
        Value::Mapping(m) => {
            let mut style = StyleReference::inline();
            for (key, v) in m {
                match key_str(key, context)? {
                    "name" => style.name = Some(scalar(v, "name")?),
                    "traits" => {
                        for t in sequence(v, "traits")? {
                            style.traits.push(scalar(t, "traits")?);
                        }
                    }
                    property => flatten_properties(property, v, &mut style.overrides, context)?,
                }
            }
            Ok(style)
        }
        other => Ok(StyleReference::named(scalar(other, "style")?)),
    }
}

fn parse_validation_rule(m: &Mapping, range: &str) -> SheetResult<ValidationRule> {
    if let Some(list) = m.get("list") {
        let values = sequence(list, "list")?
            .iter()
            .map(|v| scalar(v, "list"))
            .collect::<SheetResult<Vec<_>>>()?;
        return Ok(ValidationRule::List(values));
    }
    if let Some(bounds) = m.get("whole_number") {
        let b = mapping(bounds, "whole_number")?;
        return Ok(ValidationRule::WholeNumber {
            min: b.get("min").map(|v| integer(v, "min")).transpose()?.unwrap_or(i64::MIN),
            max: b.get("max").map(|v| integer(v, "max")).transpose()?.unwrap_or(i64::MAX),
        });
    }
    if let Some(bounds) = m.get("decimal") {
        let b = mapping(bounds, "decimal")?;
        return Ok(ValidationRule::Decimal {
            min: b.get("min").map(|v| number(v, "min")).transpose()?.unwrap_or(f64::MIN),
            max: b.get("max").map(|v| number(v, "max")).transpose()?.unwrap_or(f64::MAX),
        });
    }
    Err(SheetError::Parse(format!(
        "Validation on {range} needs one of: list, whole_number, decimal"
    )))
}

fn parse_condition(m: &Mapping, range: &str) -> SheetResult<Condition> {
    if let Some(v) = m.get("greater_than") {
        return Ok(Condition::GreaterThan(number(v, "greater_than")?));
    }
    if let Some(v) = m.get("less_than") {
        return Ok(Condition::LessThan(number(v, "less_than")?));
    }
    if let Some(v) = m.get("equal") {
        return Ok(Condition::Equal(number(v, "equal")?));
    }
    if let Some(v) = m.get("between") {
        let bounds = sequence(v, "between")?;
        if let [low, high] = bounds {
            return Ok(Condition::Between(number(low, "between")?, number(high, "between")?));
        }
        return Err(SheetError::Parse(format!(
            "'between' on {range} needs exactly two numbers"
        )));
    }
    if let Some(v) = m.get("formula") {
        return Ok(Condition::Formula(scalar(v, "formula")?));
    }
    Err(SheetError::Parse(format!(
        "Conditional format on {range} needs one of: greater_than, less_than, equal, between, formula"
    )))
}

fn required(m: &Mapping, key: &str, context: &str) -> SheetResult<String> {
    m.get(key)
        .map(|v| scalar(v, key))
        .transpose()?
        .ok_or_else(|| SheetError::Parse(format!("Missing '{key}' in {context}")))
}

fn sequence<'a>(value: &'a Value, field: &str) -> SheetResult<&'a [Value]> {
    value
        .as_sequence()
        .map(Vec::as_slice)
        .ok_or_else(|| SheetError::Parse(format!("'{field}' must be a list")))
}

fn integer(value: &Value, field: &str) -> SheetResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| SheetError::Parse(format!("'{field}' must be an integer")))
}

fn number(value: &Value, field: &str) -> SheetResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| SheetError::Parse(format!("'{field}' must be a number")))
}

fn span(value: &Value, field: &str) -> SheetResult<u32> {
    u32::try_from(integer(value, field)?)
        .map_err(|_| SheetError::Parse(format!("'{field}' must be non-negative")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellContent, CellRef};
    use pretty_assertions::assert_eq;

    const BUDGET: &str = r##"
properties:
  title: Budget
  keywords: [finance, q3]
sheets:
  - name: Budget
    columns:
      - { name: Item, width: 4cm }
      - Amount
    header: true
    rows:
      - [Rent, 1200]
      - [Salaries, 5000.5]
      - cells: [Total, "=SUM(B2:B3)"]
        height: 0.8cm
      - - { text: "=literal", comment: checked }
        - { date: 2024-03-31 }
    named_ranges:
      - { name: Expenses, range: B2:B3 }
    validations:
      - { range: C2:C5, list: [Open, Closed] }
    conditional_formats:
      - { range: B2:B3, greater_than: 2000, style: { fill: "#FFEEEE" } }
    freeze: { rows: 1 }
    protected: true
"##;

    #[test]
    fn test_budget_definition_replays_through_builder() {
        let definition = parse_definition_str(BUDGET).unwrap();
        let wb = definition.builder.workbook();
        assert_eq!(wb.properties.title.as_deref(), Some("Budget"));
        assert_eq!(wb.properties.keywords, vec!["finance", "q3"]);

        let sheet = &wb.sheets[0];
        assert_eq!(sheet.row_count(), 5);
        assert_eq!(sheet.columns[0].width.as_deref(), Some("4cm"));
        assert_eq!(
            sheet.cell(CellRef::new(3, 1)).unwrap().content,
            CellContent::Formula("=SUM(B2:B3)".into())
        );
        let literal = sheet.cell(CellRef::new(4, 0)).unwrap();
        assert_eq!(literal.content, CellContent::Value(CellValue::Text("=literal".into())));
        assert_eq!(literal.comment.as_deref(), Some("checked"));
        assert!(matches!(
            sheet.cell(CellRef::new(4, 1)).unwrap().content,
            CellContent::Value(CellValue::Date(_))
        ));
        assert_eq!(sheet.named_ranges[0].name, "Expenses");
        assert_eq!(sheet.validations.len(), 1);
        assert_eq!(
            sheet.conditional_formats[0].style.overrides.get("fill").map(String::as_str),
            Some("#FFEEEE")
        );
        assert!(sheet.protected);
    }

    #[test]
    fn test_unknown_sheet_key_rejected() {
        let err = parse_definition_str("sheets:\n  - name: A\n    colums: [x]\n").unwrap_err();
        assert!(err.to_string().contains("Unknown key 'colums'"));
    }

    #[test]
    fn test_builder_errors_surface() {
        let yaml = "sheets:\n  - name: A\n    header: true\n";
        let err = parse_definition_str(yaml).unwrap_err();
        assert!(matches!(err, SheetError::NoColumnsDefined { .. }));
    }

    #[test]
    fn test_style_mapping_flattens_overrides() {
        let value: Value = serde_yaml::from_str("{ name: body, traits: [bold], font: { size: 12pt } }").unwrap();
        let style = parse_style(&value, "test").unwrap();
        assert_eq!(style.name.as_deref(), Some("body"));
        assert_eq!(style.traits, vec!["bold"]);
        assert_eq!(style.overrides.get("font.size").map(String::as_str), Some("12pt"));
    }
}
