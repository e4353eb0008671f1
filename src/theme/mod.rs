//! Themes: palettes, font tables, traits and named style definitions
//!
//! A [`Theme`] is the already-parsed declarative source; [`ThemeSet`] flattens
//! theme-level `extends` chains, and [`StyleResolver`] turns raw style
//! references into [`ResolvedStyle`] records.

pub mod color;
pub mod expr;
pub mod resolved;
pub mod resolver;
pub mod source;

pub use color::Color;
pub use expr::{Modifier, ModifierKind, Reference, Segment, ValueExpr};
pub use resolved::{
    Alignment, BorderLine, Borders, FontStyle, HorizontalAlign, LineStyle, NumberFormat,
    Protection, ResolvedStyle, VerticalAlign,
};
pub use resolver::{ResolutionContext, StyleId, StyleResolver, StyleTable};
pub use source::{load_theme_file, parse_theme};

use crate::error::{CycleKind, SheetError, SheetResult};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Flat property assignments keyed by dotted path (`font.weight`, `border.top`)
pub type PropertyMap = BTreeMap<String, String>;

/// A named style in a theme
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleDefinition {
    /// Parent style whose properties this one inherits
    pub extends: Option<String>,
    /// Traits mixed in after inheritance, in declaration order
    pub includes: Vec<String>,
    /// Own property assignments; these win over parents and traits
    pub properties: PropertyMap,
}

impl StyleDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    #[must_use]
    pub fn include(mut self, trait_name: impl Into<String>) -> Self {
        self.includes.push(trait_name.into());
        self
    }

    #[must_use]
    pub fn set(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }
}

/// Entry of the font table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontSpec {
    pub family: String,
    pub size: Option<String>,
    pub weight: Option<String>,
}

impl FontSpec {
    pub fn family(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            ..Self::default()
        }
    }
}

/// Named palette/font overrides, e.g. a dark variant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variant {
    pub colors: BTreeMap<String, String>,
    pub fonts: BTreeMap<String, FontSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Theme {
    pub name: String,
    /// Parent theme, flattened by [`ThemeSet::flatten`]
    pub extends: Option<String>,
    pub colors: BTreeMap<String, String>,
    pub fonts: BTreeMap<String, FontSpec>,
    pub traits: BTreeMap<String, PropertyMap>,
    pub styles: BTreeMap<String, StyleDefinition>,
    pub variants: BTreeMap<String, Variant>,
}

impl Theme {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn color(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.colors.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn font(mut self, name: impl Into<String>, font: FontSpec) -> Self {
        self.fonts.insert(name.into(), font);
        self
    }

    #[must_use]
    pub fn with_trait(mut self, name: impl Into<String>, properties: PropertyMap) -> Self {
        self.traits.insert(name.into(), properties);
        self
    }

    #[must_use]
    pub fn style(mut self, name: impl Into<String>, definition: StyleDefinition) -> Self {
        self.styles.insert(name.into(), definition);
        self
    }

    /// Raw (possibly self-referencing) value behind a dotted lookup key
    ///
    /// - `colors.<name>` (alias `palette.<name>`)
    /// - `fonts.<name>` → family, `fonts.<name>.family|size|weight`
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let mut parts = key.splitn(3, '.');
        let table = parts.next()?;
        let name = parts.next()?;
        let field = parts.next();
        match (table, field) {
            ("colors" | "palette", None) => self.colors.get(name).map(String::as_str),
            ("fonts", None) | ("fonts", Some("family")) => {
                self.fonts.get(name).map(|f| f.family.as_str())
            }
            ("fonts", Some("size")) => self.fonts.get(name)?.size.as_deref(),
            ("fonts", Some("weight")) => self.fonts.get(name)?.weight.as_deref(),
            _ => None,
        }
    }

    /// Copy of this theme with a variant's overrides applied
    pub fn with_variant(&self, variant: &str) -> SheetResult<Theme> {
        let overrides = self
            .variants
            .get(variant)
            .ok_or_else(|| SheetError::VariantNotFound(variant.to_string()))?;
        let mut theme = self.clone();
        for (k, v) in &overrides.colors {
            theme.colors.insert(k.clone(), v.clone());
        }
        for (k, v) in &overrides.fonts {
            theme.fonts.insert(k.clone(), v.clone());
        }
        Ok(theme)
    }

    /// Overlay `child` on top of `self`; child entries win
    fn merged_with(mut self, child: &Theme) -> Theme {
        self.name = child.name.clone();
        self.extends = None;
        self.colors.extend(child.colors.clone());
        self.fonts.extend(child.fonts.clone());
        self.traits.extend(child.traits.clone());
        self.styles.extend(child.styles.clone());
        for (name, variant) in &child.variants {
            let entry = self.variants.entry(name.clone()).or_default();
            entry.colors.extend(variant.colors.clone());
            entry.fonts.extend(variant.fonts.clone());
        }
        self
    }
}

/// Themes by name, for resolving theme-level `extends`
#[derive(Debug, Clone, Default)]
pub struct ThemeSet {
    themes: BTreeMap<String, Theme>,
}

impl ThemeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, theme: Theme) {
        self.themes.insert(theme.name.clone(), theme);
    }

    pub fn get(&self, name: &str) -> Option<&Theme> {
        self.themes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.themes.keys()
    }

    /// Load every `*.yaml`/`*.yml` theme in a directory
    pub fn load_dir(dir: &Path) -> SheetResult<Self> {
        let mut set = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|e| SheetError::io_at(dir, e))?;
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
            })
            .collect();
        paths.sort();
        for path in paths {
            let theme = load_theme_file(&path)?;
            if set.themes.contains_key(&theme.name) {
                return Err(SheetError::Parse(format!(
                    "Theme '{}' is defined twice (second definition in '{}')",
                    theme.name,
                    path.display()
                )));
            }
            set.insert(theme);
        }
        Ok(set)
    }

    /// Resolve theme-level inheritance into one self-contained theme
    ///
    /// The chain is walked leaf to root; revisiting a theme is a
    /// [`SheetError::StyleCycle`] naming the full path, and more than
    /// `max_depth` `extends` hops is [`SheetError::InheritanceTooDeep`].
    pub fn flatten(&self, name: &str, max_depth: usize) -> SheetResult<Theme> {
        let chain = walk_chain(
            name,
            max_depth,
            CycleKind::Theme,
            |n| self.themes.get(n).map(|t| t.extends.as_deref()),
            |n| SheetError::ThemeNotFound(n.to_string()),
        )?;
        debug!(theme = name, depth = chain.len() - 1, "flattening theme chain");

        let mut themes = chain.iter().rev().filter_map(|n| self.themes.get(n));
        let root = themes
            .next()
            .cloned()
            .ok_or_else(|| SheetError::ThemeNotFound(name.to_string()))?;
        Ok(themes.fold(root, |acc, child| acc.merged_with(child)))
    }

    /// Load a theme file and flatten it against the themes beside it
    ///
    /// Parents named by `extends` are looked up in the file's directory.
    pub fn load_flattened(path: &Path, max_depth: usize) -> SheetResult<Theme> {
        let theme = load_theme_file(path)?;
        if theme.extends.is_none() {
            return Ok(theme);
        }
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut set = Self::load_dir(dir)?;
        let name = theme.name.clone();
        set.insert(theme);
        set.flatten(&name, max_depth)
    }
}

/// Walk an `extends` chain from `start`, returning names leaf-first
///
/// `parent_of` returns `None` for an unknown name and `Some(None)` for a root.
/// Cycles are reported even when they are longer than `max_depth`.
pub(crate) fn walk_chain<'a, F, E>(
    start: &'a str,
    max_depth: usize,
    kind: CycleKind,
    parent_of: F,
    not_found: E,
) -> SheetResult<Vec<String>>
where
    F: Fn(&str) -> Option<Option<&'a str>>,
    E: Fn(&str) -> SheetError,
{
    let mut chain = vec![start.to_string()];
    let mut current = start;
    let mut too_deep = false;

    loop {
        let parent = match parent_of(current) {
            Some(parent) => parent,
            None => return Err(not_found(current)),
        };
        let Some(parent) = parent else { break };

        if chain.iter().any(|n| n == parent) {
            let mut path = chain.clone();
            path.push(parent.to_string());
            let start_idx = path.iter().position(|n| n == parent).unwrap_or(0);
            return Err(SheetError::StyleCycle {
                kind,
                path: path[start_idx..].to_vec(),
            });
        }
        chain.push(parent.to_string());
        if chain.len() - 1 > max_depth {
            // Keep walking: a long cycle should still be reported as a cycle
            too_deep = true;
        }
        current = parent;
    }

    if too_deep {
        return Err(SheetError::InheritanceTooDeep {
            kind,
            name: start.to_string(),
            max: max_depth,
        });
    }
    Ok(chain)
}
