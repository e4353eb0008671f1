use crate::model::{CellValue, ColumnSpec, StyleReference};
use chrono::{NaiveDate, NaiveDateTime};

/// Everything `cell()` accepts
///
/// A `&str` starting with `=` becomes a formula; use [`CellSpec::text`] to
/// store such a string literally.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellSpec {
    pub(crate) value: Option<CellValue>,
    pub(crate) formula: Option<String>,
    pub(crate) style: Option<StyleReference>,
    pub(crate) colspan: Option<u32>,
    pub(crate) rowspan: Option<u32>,
    pub(crate) comment: Option<String>,
}

impl CellSpec {
    /// Empty cell, useful for a styled blank
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: impl Into<CellValue>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Literal text, even when it starts with `=`
    pub fn text(text: impl Into<String>) -> Self {
        Self::value(CellValue::Text(text.into()))
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<CellValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    #[must_use]
    pub fn style(mut self, style: impl Into<StyleReference>) -> Self {
        self.style = Some(style.into());
        self
    }

    #[must_use]
    pub fn colspan(mut self, span: u32) -> Self {
        self.colspan = Some(span);
        self
    }

    #[must_use]
    pub fn rowspan(mut self, span: u32) -> Self {
        self.rowspan = Some(span);
        self
    }

    #[must_use]
    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }
}

impl From<&str> for CellSpec {
    fn from(text: &str) -> Self {
        if text.starts_with('=') {
            CellSpec::formula(text)
        } else {
            CellSpec::text(text)
        }
    }
}

impl From<String> for CellSpec {
    fn from(text: String) -> Self {
        CellSpec::from(text.as_str())
    }
}

impl From<CellValue> for CellSpec {
    fn from(value: CellValue) -> Self {
        CellSpec::value(value)
    }
}

macro_rules! cell_spec_from_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for CellSpec {
                fn from(v: $t) -> Self {
                    CellSpec::value(v)
                }
            }
        )*
    };
}

cell_spec_from_value!(f64, i32, i64, u32, bool, NaiveDate, NaiveDateTime);

/// Row-level attributes for `row_with()`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSpec {
    pub height: Option<String>,
    pub style: Option<StyleReference>,
    pub outline_level: Option<u8>,
}

impl RowSpec {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn height(mut self, height: impl Into<String>) -> Self {
        self.height = Some(height.into());
        self
    }

    #[must_use]
    pub fn style(mut self, style: impl Into<StyleReference>) -> Self {
        self.style = Some(style.into());
        self
    }

    #[must_use]
    pub fn outline_level(mut self, level: u8) -> Self {
        self.outline_level = Some(level);
        self
    }
}

impl From<&str> for ColumnSpec {
    fn from(name: &str) -> Self {
        ColumnSpec::new(name)
    }
}

impl From<String> for ColumnSpec {
    fn from(name: String) -> Self {
        ColumnSpec::new(name)
    }
}
