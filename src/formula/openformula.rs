//! Translation between A1 formulas and OpenFormula (`of:=`) as stored in ODS

use super::lexer::{lex, read_quoted, Lexeme, RefTarget};
use crate::error::{SheetError, SheetResult};
use crate::model::reference::{quote_sheet_name, MAX_ROWS};
use crate::model::column_to_letters;

/// `=SUM(A1:B2;Data!C1)` style input to `of:=SUM([.A1:.B2];[Data.C1])`
pub fn to_openformula(formula: &str) -> SheetResult<String> {
    let mut out = String::from("of:=");
    for lexeme in lex(formula)? {
        match lexeme {
            Lexeme::Text(text) => out.push_str(text),
            Lexeme::Separator => out.push(';'),
            Lexeme::Reference(token) => {
                let sheet = token
                    .sheet
                    .as_deref()
                    .map(|s| quote_sheet_name(s).into_owned())
                    .unwrap_or_default();
                match token.target {
                    RefTarget::Cells { text, .. } => {
                        out.push('[');
                        out.push_str(&sheet);
                        out.push('.');
                        match text.split_once(':') {
                            Some((a, b)) => {
                                out.push_str(a);
                                out.push_str(":.");
                                out.push_str(b);
                            }
                            None => out.push_str(&text),
                        }
                        out.push(']');
                    }
                    RefTarget::Columns { first, last } => {
                        out.push_str(&format!(
                            "[{sheet}.{}1:.{}{MAX_ROWS}]",
                            column_to_letters(first),
                            column_to_letters(last)
                        ));
                    }
                    RefTarget::Name(name) => {
                        if !sheet.is_empty() {
                            out.push_str(&sheet);
                            out.push('.');
                        }
                        out.push_str(&name);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Inverse of [`to_openformula`]; accepts `of:` and `oooc:` namespaces
pub fn from_openformula(text: &str) -> SheetResult<String> {
    let body = text
        .strip_prefix("of:")
        .or_else(|| text.strip_prefix("oooc:"))
        .unwrap_or(text);
    let body = body.strip_prefix('=').unwrap_or(body);

    let mut out = String::from("=");
    let mut i = 0;
    while let Some(c) = body[i..].chars().next() {
        match c {
            '"' => {
                let end = string_end(body, i)
                    .ok_or_else(|| invalid(text, "unterminated string literal"))?;
                out.push_str(&body[i..end]);
                i = end;
            }
            ';' => {
                out.push(',');
                i += 1;
            }
            '[' => {
                let close = bracket_end(body, i).ok_or_else(|| invalid(text, "unterminated '['"))?;
                out.push_str(&convert_reference(&body[i + 1..close], text)?);
                i = close + 1;
            }
            other => {
                out.push(other);
                i += other.len_utf8();
            }
        }
    }
    Ok(out)
}

fn string_end(body: &str, start: usize) -> Option<usize> {
    let mut i = start + 1;
    loop {
        let off = body[i..].find('"')?;
        i += off + 1;
        if !body[i..].starts_with('"') {
            return Some(i);
        }
        i += 1;
    }
}

/// Index of the `]` closing the bracket at `start`, skipping quoted names
fn bracket_end(body: &str, start: usize) -> Option<usize> {
    let mut in_quote = false;
    for (off, c) in body[start + 1..].char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ']' if !in_quote => return Some(start + 1 + off),
            _ => {}
        }
    }
    None
}

/// `.A1:.B2`, `$Data.A1`, `'My Sheet'.A1:'My Sheet'.B2` to A1 notation
fn convert_reference(inner: &str, full: &str) -> SheetResult<String> {
    let mut parts = Vec::new();
    let mut rest = inner;
    while !rest.is_empty() {
        let (part, remaining) = split_part(rest, full)?;
        parts.push(part);
        rest = remaining;
    }

    let (sheet, first) = parts
        .first()
        .cloned()
        .ok_or_else(|| invalid(full, "empty reference"))?;
    let mut out = match sheet {
        Some(sheet) => format!("{}!{first}", quote_sheet_name(&sheet)),
        None => first,
    };
    if let Some((_, second)) = parts.get(1) {
        out.push(':');
        out.push_str(second);
    }
    if parts.len() > 2 {
        return Err(invalid(full, "too many ':' in reference"));
    }
    Ok(out)
}

type Part = (Option<String>, String);

fn split_part<'a>(text: &'a str, full: &str) -> SheetResult<(Part, &'a str)> {
    let text = text.strip_prefix('$').unwrap_or(text);
    let (sheet, after_sheet) = if text.starts_with('\'') {
        let (name, end) = read_quoted(text, 0, full)?;
        let after = text[end..]
            .strip_prefix('.')
            .ok_or_else(|| invalid(full, "quoted sheet name must be followed by '.'"))?;
        (Some(name), after)
    } else {
        let (segment, _) = text.split_once(':').unwrap_or((text, ""));
        match segment.rfind('.') {
            Some(0) => (None, &text[1..]),
            Some(dot) => (Some(text[..dot].to_string()), &text[dot + 1..]),
            None => (None, text),
        }
    };

    let (cell, rest) = match after_sheet.split_once(':') {
        Some((cell, rest)) => (cell, rest),
        None => (after_sheet, ""),
    };
    if cell.is_empty() {
        return Err(invalid(full, "missing cell in reference"));
    }
    Ok(((sheet, cell.to_string()), rest))
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

    #[test]
    fn test_to_openformula() {
        assert_eq!(to_openformula("=SUM(A1:B2)").unwrap(), "of:=SUM([.A1:.B2])");
        assert_eq!(
            to_openformula("=IF(Data!$A$1>0,'My Sheet'!B2,\"a,b\")").unwrap(),
            "of:=IF([Data.$A$1]>0;['My Sheet'.B2];\"a,b\")"
        );
        assert_eq!(to_openformula("=SUM(C:C)").unwrap(), "of:=SUM([.C1:.C1048576])");
        assert_eq!(to_openformula("=total*2").unwrap(), "of:=total*2");
    }

    #[test]
    fn test_from_openformula() {
        assert_eq!(from_openformula("of:=SUM([.A1:.B2])").unwrap(), "=SUM(A1:B2)");
        assert_eq!(
            from_openformula("of:=IF([$Data.A1]>0;['My Sheet'.B2:'My Sheet'.C3];\"x;y\")").unwrap(),
            "=IF(Data!A1>0,'My Sheet'!B2:C3,\"x;y\")"
        );
        assert_eq!(from_openformula("oooc:=[.A1]+1").unwrap(), "=A1+1");
    }

    #[test]
    fn test_unterminated_brackets_rejected() {
        assert!(from_openformula("of:=SUM([.A1").is_err());
    }
}
