//! A1-style cell and range references

use crate::error::{SheetError, SheetResult};
use std::borrow::Cow;
use std::fmt;

/// Largest 1-based row number accepted in a reference
pub const MAX_ROWS: u32 = 1_048_576;
/// Largest 1-based column number accepted in a reference (XFD)
pub const MAX_COLUMNS: u32 = 16_384;

/// Convert a 0-based column index to letters
///
/// Examples:
/// - 0 → A
/// - 25 → Z
/// - 26 → AA
pub fn column_to_letters(index: u32) -> String {
    let mut result = String::new();
    let mut idx = index;

    loop {
        let remainder = idx % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }

    result
}

/// Convert column letters (case-insensitive) to a 0-based index
pub fn letters_to_column(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut value: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        value = value * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    if value == 0 || value > MAX_COLUMNS {
        return None;
    }
    Some(value - 1)
}

/// Quote a sheet name for use in a reference when it is not a bare identifier
pub fn quote_sheet_name(name: &str) -> Cow<'_, str> {
    let bare = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if bare {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("'{}'", name.replace('\'', "''")))
    }
}

/// A single cell position (0-based row and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse `A1`, `$B$7`, `c12`
    pub fn parse(text: &str) -> SheetResult<Self> {
        let invalid = |reason: &str| SheetError::InvalidReference {
            reference: text.to_string(),
            reason: reason.to_string(),
        };

        let body: String = text.trim().chars().filter(|&c| c != '$').collect();
        let split = body
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| invalid("missing row number"))?;
        let (letters, digits) = body.split_at(split);
        let col = letters_to_column(letters).ok_or_else(|| invalid("invalid column letters"))?;
        let row: u32 = digits
            .parse()
            .map_err(|_| invalid("invalid row number"))?;
        if row == 0 || row > MAX_ROWS {
            return Err(invalid("row number out of range"));
        }
        Ok(Self { row: row - 1, col })
    }

    pub fn to_a1(self) -> String {
        format!("{}{}", column_to_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letters(self.col), self.row + 1)
    }
}

/// A rectangular range, optionally pinned to a sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeRef {
    pub sheet: Option<String>,
    pub start: CellRef,
    pub end: CellRef,
}

impl RangeRef {
    /// Build a range, normalising so `start` is the top-left corner
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            sheet: None,
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn cell(cell: CellRef) -> Self {
        Self::new(cell, cell)
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Parse `A1`, `A1:C3`, `Sheet1!A1:B2`, `'My Sheet'!A1`
    pub fn parse(text: &str) -> SheetResult<Self> {
        let text = text.trim();
        let (sheet, body) = split_sheet_prefix(text)?;
        let mut parts = body.split(':');
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            return Err(SheetError::InvalidReference {
                reference: text.to_string(),
                reason: "too many ':' separators".to_string(),
            });
        }
        let start = CellRef::parse(first).map_err(|_| SheetError::InvalidReference {
            reference: text.to_string(),
            reason: format!("'{first}' is not a cell reference"),
        })?;
        let end = match second {
            Some(s) => CellRef::parse(s).map_err(|_| SheetError::InvalidReference {
                reference: text.to_string(),
                reason: format!("'{s}' is not a cell reference"),
            })?,
            None => start,
        };
        let mut range = Self::new(start, end);
        range.sheet = sheet;
        Ok(range)
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn columns(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Number of cells covered
    pub fn area(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.columns())
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    /// Rectangle intersection, ignoring the sheet qualifier
    pub fn intersects(&self, other: &RangeRef) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Every cell in row-major order
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |row| (self.start.col..=self.end.col).map(move |col| CellRef::new(row, col)))
    }

    /// A1 text without the sheet qualifier
    pub fn to_a1(&self) -> String {
        if self.is_single_cell() {
            self.start.to_a1()
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", quote_sheet_name(sheet))?;
        }
        write!(f, "{}", self.to_a1())
    }
}

/// Split an optional `Sheet!` / `'Quoted Sheet'!` prefix off a reference
fn split_sheet_prefix(text: &str) -> SheetResult<(Option<String>, &str)> {
    if let Some(rest) = text.strip_prefix('\'') {
        // Quoted name: '' is an escaped quote
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if let Some(&(_, '\'')) = chars.peek() {
                    name.push('\'');
                    chars.next();
                    continue;
                }
                let after = &rest[i + 1..];
                return match after.strip_prefix('!') {
                    Some(body) => Ok((Some(name), body)),
                    None => Err(SheetError::InvalidReference {
                        reference: text.to_string(),
                        reason: "quoted sheet name must be followed by '!'".to_string(),
                    }),
                };
            }
            name.push(c);
        }
        return Err(SheetError::InvalidReference {
            reference: text.to_string(),
            reason: "unterminated quoted sheet name".to_string(),
        });
    }

    match text.rsplit_once('!') {
        Some((sheet, body)) if !sheet.is_empty() => Ok((Some(sheet.to_string()), body)),
        Some(_) => Err(SheetError::InvalidReference {
            reference: text.to_string(),
            reason: "empty sheet name before '!'".to_string(),
        }),
        None => Ok((None, text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_round_trip() {
        assert_eq!(column_to_letters(0), "A");
        assert_eq!(column_to_letters(25), "Z");
        assert_eq!(column_to_letters(26), "AA");
        assert_eq!(column_to_letters(701), "ZZ");
        assert_eq!(letters_to_column("A"), Some(0));
        assert_eq!(letters_to_column("aa"), Some(26));
        assert_eq!(letters_to_column("XFD"), Some(16_383));
        assert_eq!(letters_to_column("XFE"), None);
        assert_eq!(letters_to_column(""), None);
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(CellRef::parse("A1").unwrap(), CellRef::new(0, 0));
        assert_eq!(CellRef::parse("$C$3").unwrap(), CellRef::new(2, 2));
        assert!(CellRef::parse("A0").is_err());
        assert!(CellRef::parse("12").is_err());
        assert!(CellRef::parse("AB").is_err());
    }

    #[test]
    fn test_parse_range_normalises_corners() {
        let range = RangeRef::parse("C3:A1").unwrap();
        assert_eq!(range.start, CellRef::new(0, 0));
        assert_eq!(range.end, CellRef::new(2, 2));
        assert_eq!(range.area(), 9);
        assert_eq!(range.to_string(), "A1:C3");
    }

    #[test]
    fn test_parse_sheet_qualified_ranges() {
        let range = RangeRef::parse("Data!B2:B10").unwrap();
        assert_eq!(range.sheet.as_deref(), Some("Data"));
        assert_eq!(range.rows(), 9);

        let quoted = RangeRef::parse("'My ''Best'' Sheet'!A1").unwrap();
        assert_eq!(quoted.sheet.as_deref(), Some("My 'Best' Sheet"));
        assert!(quoted.is_single_cell());
        assert_eq!(quoted.to_string(), "'My ''Best'' Sheet'!A1");
    }

    #[test]
    fn test_intersects() {
        let a = RangeRef::parse("A1:B2").unwrap();
        let b = RangeRef::parse("B2:C3").unwrap();
        let c = RangeRef::parse("C1:D1").unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_cells_row_major() {
        let range = RangeRef::parse("A1:B2").unwrap();
        let cells: Vec<String> = range.cells().map(|c| c.to_a1()).collect();
        assert_eq!(cells, vec!["A1", "B1", "A2", "B2"]);
    }
}
