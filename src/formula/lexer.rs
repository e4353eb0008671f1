//! Reference extraction from A1-style formula text
//!
//! The lexer only needs to find references, so everything else (operators,
//! numbers, string literals, function names) passes through as [`Lexeme::Text`].

use crate::error::{SheetError, SheetResult};
use crate::model::{letters_to_column, CellRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// `A1` or `A1:C3`; `text` keeps the original `$` markers
    Cells {
        start: CellRef,
        end: CellRef,
        text: String,
    },
    /// Whole columns, `A:A` or `B:D`
    Columns { first: u32, last: u32 },
    /// Named range or other bare identifier
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefToken {
    /// Explicit sheet prefix, unquoted
    pub sheet: Option<String>,
    pub target: RefTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexeme<'a> {
    Text(&'a str),
    /// `,` between function arguments
    Separator,
    Reference(RefToken),
}

/// Split a formula (with or without the leading `=`) into lexemes
pub fn lex(formula: &str) -> SheetResult<Vec<Lexeme<'_>>> {
    let body = formula.strip_prefix('=').unwrap_or(formula);
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while let Some(c) = body[i..].chars().next() {
        match c {
            '"' => i = skip_string(body, i, formula)?,
            ',' => {
                push_text(&mut out, body, text_start, i);
                out.push(Lexeme::Separator);
                i += 1;
                text_start = i;
            }
            '\'' => {
                let (sheet, after) = read_quoted(body, i, formula)?;
                if !body[after..].starts_with('!') {
                    return Err(invalid(formula, "quoted sheet name must be followed by '!'"));
                }
                let (target, end) = read_target(body, after + 1, formula)?;
                push_text(&mut out, body, text_start, i);
                out.push(Lexeme::Reference(RefToken {
                    sheet: Some(sheet),
                    target,
                }));
                i = end;
                text_start = i;
            }
            c if c.is_ascii_digit() || (c == '.' && next_is_digit(body, i + 1)) => {
                i = scan_while(body, i, |c| c.is_ascii_alphanumeric() || c == '.');
            }
            c if is_ident_start(c) => {
                let end = scan_while(body, i, is_ident_char);
                let word = &body[i..end];

                if body[end..].starts_with('!') {
                    let (target, after) = read_target(body, end + 1, formula)?;
                    push_text(&mut out, body, text_start, i);
                    out.push(Lexeme::Reference(RefToken {
                        sheet: Some(word.to_string()),
                        target,
                    }));
                    i = after;
                    text_start = i;
                    continue;
                }
                if body[end..].trim_start().starts_with('(') {
                    i = end;
                    continue;
                }

                let (target, after) = if body[end..].starts_with(':') {
                    let second_end = scan_while(body, end + 1, is_ref_char);
                    match pair_target(word, Some(&body[end + 1..second_end])) {
                        Some(target) => (Some(target), second_end),
                        None => (single_target(word), end),
                    }
                } else {
                    (single_target(word), end)
                };

                if let Some(target) = target {
                    push_text(&mut out, body, text_start, i);
                    out.push(Lexeme::Reference(RefToken {
                        sheet: None,
                        target,
                    }));
                    text_start = after;
                }
                i = after;
            }
            other => i += other.len_utf8(),
        }
    }
    push_text(&mut out, body, text_start, body.len());
    Ok(out)
}

/// Only the references of a formula
pub fn references(formula: &str) -> SheetResult<Vec<RefToken>> {
    Ok(lex(formula)?
        .into_iter()
        .filter_map(|l| match l {
            Lexeme::Reference(r) => Some(r),
            _ => None,
        })
        .collect())
}

fn push_text<'a>(out: &mut Vec<Lexeme<'a>>, body: &'a str, start: usize, end: usize) {
    if end > start {
        out.push(Lexeme::Text(&body[start..end]));
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$' || c == '\\'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
}

fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '$'
}

fn next_is_digit(body: &str, at: usize) -> bool {
    body[at..].chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn scan_while(body: &str, start: usize, pred: impl Fn(char) -> bool) -> usize {
    body[start..]
        .char_indices()
        .find(|&(_, c)| !pred(c))
        .map_or(body.len(), |(off, _)| start + off)
}

/// Index just past a `"..."` literal; `""` is an escaped quote
fn skip_string(body: &str, start: usize, formula: &str) -> SheetResult<usize> {
    let mut i = start + 1;
    loop {
        match body[i..].find('"') {
            None => return Err(invalid(formula, "unterminated string literal")),
            Some(off) => {
                i += off + 1;
                if body[i..].starts_with('"') {
                    i += 1;
                } else {
                    return Ok(i);
                }
            }
        }
    }
}

/// Read a `'quoted name'` starting at `start`, returning the unescaped name
pub(crate) fn read_quoted(body: &str, start: usize, formula: &str) -> SheetResult<(String, usize)> {
    let mut name = String::new();
    let mut i = start + 1;
    loop {
        match body[i..].find('\'') {
            None => return Err(invalid(formula, "unterminated quoted sheet name")),
            Some(off) => {
                name.push_str(&body[i..i + off]);
                i += off + 1;
                if body[i..].starts_with('\'') {
                    name.push('\'');
                    i += 1;
                } else {
                    return Ok((name, i));
                }
            }
        }
    }
}

/// Target after an explicit `Sheet!` prefix
fn read_target(body: &str, start: usize, formula: &str) -> SheetResult<(RefTarget, usize)> {
    let first_end = scan_while(body, start, |c| is_ref_char(c) || c == '_' || c == '.');
    let first = &body[start..first_end];
    if first.is_empty() {
        return Err(invalid(formula, "sheet prefix without a reference"));
    }
    if body[first_end..].starts_with(':') {
        let second_end = scan_while(body, first_end + 1, is_ref_char);
        if let Some(target) = pair_target(first, Some(&body[first_end + 1..second_end])) {
            return Ok((target, second_end));
        }
    }
    // Not A1-shaped: a sheet-scoped name such as `Data!total`
    let target = pair_target(first, None)
        .or_else(|| {
            first
                .starts_with(is_ident_start)
                .then(|| single_target(first))
                .flatten()
        })
        .ok_or_else(|| {
            invalid(formula, &format!("'{first}' is not a cell, range or name reference"))
        })?;
    Ok((target, first_end))
}

fn single_target(word: &str) -> Option<RefTarget> {
    if let Some(target) = pair_target(word, None) {
        return Some(target);
    }
    let upper = word.to_ascii_uppercase();
    if upper == "TRUE" || upper == "FALSE" || word.contains('$') {
        return None;
    }
    Some(RefTarget::Name(word.to_string()))
}

fn pair_target(first: &str, second: Option<&str>) -> Option<RefTarget> {
    match second {
        None => {
            let cell = CellRef::parse(first).ok()?;
            Some(RefTarget::Cells {
                start: cell,
                end: cell,
                text: first.to_string(),
            })
        }
        Some(second) => {
            if let (Ok(a), Ok(b)) = (CellRef::parse(first), CellRef::parse(second)) {
                return Some(RefTarget::Cells {
                    start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
                    end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
                    text: format!("{first}:{second}"),
                });
            }
            let a = letters_to_column(first.trim_start_matches('$'))?;
            let b = letters_to_column(second.trim_start_matches('$'))?;
            Some(RefTarget::Columns {
                first: a.min(b),
                last: a.max(b),
            })
        }
    }
}

fn invalid(formula: &str, reason: &str) -> SheetError {
    SheetError::InvalidReference {
        reference: formula.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cells(a: &str, b: &str) -> RefTarget {
        let start = CellRef::parse(a).unwrap();
        let end = CellRef::parse(b).unwrap();
        RefTarget::Cells {
            start,
            end,
            text: if a == b { a.to_string() } else { format!("{a}:{b}") },
        }
    }

    #[test]
    fn test_plain_cells_and_ranges() {
        let refs = references("=SUM(A1:B2)+C3*2").unwrap();
        assert_eq!(
            refs,
            vec![
                RefToken { sheet: None, target: cells("A1", "B2") },
                RefToken { sheet: None, target: cells("C3", "C3") },
            ]
        );
    }

    #[test]
    fn test_function_names_and_literals_are_skipped() {
        let refs = references("=IF(LOG10(A1)>1,\"B2 is text\",TRUE)").unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target, cells("A1", "A1"));
    }

    #[test]
    fn test_sheet_prefixes() {
        let refs = references("=Data!A1+'My Sheet'!$B$2:C3").unwrap();
        assert_eq!(refs[0].sheet.as_deref(), Some("Data"));
        assert_eq!(refs[1].sheet.as_deref(), Some("My Sheet"));
        match &refs[1].target {
            RefTarget::Cells { text, .. } => assert_eq!(text, "$B$2:C3"),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_whole_columns_and_names() {
        let refs = references("=SUM(B:B)/total_revenue").unwrap();
        assert_eq!(refs[0].target, RefTarget::Columns { first: 1, last: 1 });
        assert_eq!(refs[1].target, RefTarget::Name("total_revenue".into()));
    }

    #[test]
    fn test_sheet_qualified_names() {
        let refs = references("=Data!total*'Q1 Totals'!rate_2").unwrap();
        assert_eq!(refs[0].sheet.as_deref(), Some("Data"));
        assert_eq!(refs[0].target, RefTarget::Name("total".into()));
        assert_eq!(refs[1].sheet.as_deref(), Some("Q1 Totals"));
        assert_eq!(refs[1].target, RefTarget::Name("rate_2".into()));
        assert!(lex("=Data!12").is_err());
        assert!(lex("=Data!$total").is_err());
    }

    #[test]
    fn test_separators_outside_strings_only() {
        let lexemes = lex("=CONCAT(\"a,b\",A1)").unwrap();
        let separators = lexemes.iter().filter(|l| **l == Lexeme::Separator).count();
        assert_eq!(separators, 1);
    }

    #[test]
    fn test_malformed_formulas() {
        assert!(lex("=\"open").is_err());
        assert!(lex("='Sheet A1").is_err());
        assert!(lex("=Data!").is_err());
    }
}
