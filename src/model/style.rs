//! Raw (unresolved) style references attached to cells, rows and columns

use std::collections::BTreeMap;
use std::fmt;

/// A style reference as written by the author, before theme resolution
///
/// `name` picks a style definition from the theme, `traits` mixes extra
/// trait fragments in after it, and `overrides` sets individual properties
/// (dotted keys such as `font.size`) on top of everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleReference {
    pub name: Option<String>,
    pub traits: Vec<String>,
    pub overrides: BTreeMap<String, String>,
}

impl StyleReference {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A reference carrying only inline overrides
    pub fn inline() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_trait(mut self, name: impl Into<String>) -> Self {
        self.traits.push(name.into());
        self
    }

    #[must_use]
    pub fn with_override(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(property.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.traits.is_empty() && self.overrides.is_empty()
    }
}

impl From<&str> for StyleReference {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for StyleReference {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl fmt::Display for StyleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("<inline>"))?;
        for t in &self.traits {
            write!(f, "+{t}")?;
        }
        if !self.overrides.is_empty() {
            let pairs: Vec<String> = self
                .overrides
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " {{{}}}", pairs.join(", "))?;
        }
        Ok(())
    }
}
