//! Style resolution: inheritance, trait composition, reference substitution
//!
//! Resolution runs in a [`ResolutionContext`] owned by one build. Named style
//! chains, palette lookups and whole references are memoized inside it and
//! dropped with it; nothing survives across builds.

use super::resolved::{apply_properties, ResolvedStyle};
use super::{walk_chain, Color, PropertyMap, Segment, Theme, ValueExpr};
use crate::error::{CycleKind, SheetError, SheetResult};
use crate::model::StyleReference;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Index of a resolved style in a [`StyleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleId(pub(crate) usize);

impl StyleId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Distinct resolved styles of one document, in first-use order
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    styles: Vec<Arc<ResolvedStyle>>,
    labels: Vec<String>,
}

impl StyleTable {
    pub fn get(&self, id: StyleId) -> Option<&ResolvedStyle> {
        self.styles.get(id.0).map(Arc::as_ref)
    }

    /// Shared handle, for callers that keep a style beyond the table
    pub fn shared(&self, id: StyleId) -> Option<Arc<ResolvedStyle>> {
        self.styles.get(id.0).cloned()
    }

    /// Human-readable origin of a style, e.g. `header {font.size=14}`
    pub fn label(&self, id: StyleId) -> Option<&str> {
        self.labels.get(id.0).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StyleId, &ResolvedStyle)> {
        self.styles
            .iter()
            .enumerate()
            .map(|(i, s)| (StyleId(i), s.as_ref()))
    }

    fn push(&mut self, style: ResolvedStyle, label: String) -> StyleId {
        self.styles.push(Arc::new(style));
        self.labels.push(label);
        StyleId(self.styles.len() - 1)
    }
}

/// Pure resolution against one theme, with per-instance memo tables
pub struct StyleResolver<'t> {
    theme: &'t Theme,
    max_depth: usize,
    chains: HashMap<String, Arc<PropertyMap>>,
    lookups: HashMap<String, (String, usize)>,
}

impl<'t> StyleResolver<'t> {
    pub fn new(theme: &'t Theme, max_depth: usize) -> Self {
        Self {
            theme,
            max_depth,
            chains: HashMap::new(),
            lookups: HashMap::new(),
        }
    }

    /// Properties of a named style after `extends` and `includes`
    ///
    /// Within each level, parent properties are laid down first, then the
    /// level's traits in order, then its own properties.
    pub fn flatten_style(&mut self, name: &str, location: &str) -> SheetResult<Arc<PropertyMap>> {
        if let Some(props) = self.chains.get(name) {
            return Ok(Arc::clone(props));
        }

        let theme = self.theme;
        let chain = walk_chain(
            name,
            self.max_depth,
            CycleKind::Style,
            |n| theme.styles.get(n).map(|s| s.extends.as_deref()),
            |n| SheetError::StyleNotFound {
                style: n.to_string(),
                location: location.to_string(),
            },
        )?;

        let mut props = PropertyMap::new();
        for level in chain.iter().rev() {
            if let Some(done) = self.chains.get(level) {
                props = done.as_ref().clone();
                continue;
            }
            let Some(definition) = theme.styles.get(level) else {
                return Err(SheetError::StyleNotFound {
                    style: level.clone(),
                    location: location.to_string(),
                });
            };
            for trait_name in &definition.includes {
                let fragment = theme.traits.get(trait_name).ok_or_else(|| SheetError::TraitNotFound {
                    name: trait_name.clone(),
                    style: level.clone(),
                })?;
                apply_properties(&mut props, fragment);
            }
            apply_properties(&mut props, &definition.properties);
            self.chains.insert(level.clone(), Arc::new(props.clone()));
        }

        debug!(style = name, depth = chain.len() - 1, "flattened style chain");
        self.chains
            .get(name)
            .cloned()
            .ok_or_else(|| SheetError::StyleNotFound {
                style: name.to_string(),
                location: location.to_string(),
            })
    }

    /// Resolve a raw reference into a typed style
    pub fn resolve(&mut self, reference: &StyleReference, location: &str) -> SheetResult<ResolvedStyle> {
        let mut props = match &reference.name {
            Some(name) => self.flatten_style(name, location)?.as_ref().clone(),
            None => PropertyMap::new(),
        };
        for trait_name in &reference.traits {
            let fragment = self.theme.traits.get(trait_name).ok_or_else(|| SheetError::TraitNotFound {
                name: trait_name.clone(),
                style: reference.to_string(),
            })?;
            apply_properties(&mut props, fragment);
        }
        apply_properties(&mut props, &reference.overrides);

        let mut concrete = PropertyMap::new();
        for (key, value) in &props {
            let context = format!("property '{key}' of style '{reference}' at {location}");
            concrete.insert(key.clone(), self.substitute(value, &context)?);
        }
        ResolvedStyle::from_properties(&concrete, &format!("style '{reference}' at {location}"))
    }

    /// Replace every `{...}` reference in a property value
    pub fn substitute(&mut self, value: &str, context: &str) -> SheetResult<String> {
        let mut stack = Vec::new();
        let (text, depth) = self.substitute_inner(value, context, &mut stack)?;
        if depth > self.max_depth {
            return Err(SheetError::InheritanceTooDeep {
                kind: CycleKind::Reference,
                name: value.to_string(),
                max: self.max_depth,
            });
        }
        Ok(text)
    }

    fn substitute_inner(
        &mut self,
        value: &str,
        context: &str,
        stack: &mut Vec<String>,
    ) -> SheetResult<(String, usize)> {
        let expr = ValueExpr::parse(value)?;
        if expr.is_literal() {
            return Ok((value.to_string(), 0));
        }

        let mut out = String::new();
        let mut depth = 0;
        for segment in &expr.segments {
            let reference = match segment {
                Segment::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                Segment::PaletteRef(reference) => reference,
            };
            let key = reference.key();

            let looked_up = match self.lookup(&key, context, stack)? {
                Some((text, d)) => Some((text, d + 1)),
                None => None,
            };
            let (base, d) = match (looked_up, &reference.default) {
                (Some(found), _) => found,
                (None, Some(default)) => (default.clone(), 1),
                (None, None) => {
                    return Err(SheetError::UnresolvedReference {
                        key,
                        context: context.to_string(),
                    })
                }
            };
            depth = depth.max(d);

            if reference.modifiers.is_empty() {
                out.push_str(&base);
                continue;
            }
            let is_palette = matches!(reference.path[0].as_str(), "colors" | "palette");
            let color = Color::parse(&base).filter(|_| is_palette).ok_or_else(|| {
                SheetError::InvalidStyleValue {
                    property: key.clone(),
                    value: base.clone(),
                    reason: "modifiers only apply to palette colors".to_string(),
                }
            })?;
            let modified = reference.modifiers.iter().fold(color, |c, m| c.apply(m));
            out.push_str(&modified.to_hex());
        }
        Ok((out, depth))
    }

    /// Resolved text behind a lookup key; palette entries may nest
    fn lookup(
        &mut self,
        key: &str,
        context: &str,
        stack: &mut Vec<String>,
    ) -> SheetResult<Option<(String, usize)>> {
        if let Some(hit) = self.lookups.get(key) {
            return Ok(Some(hit.clone()));
        }
        if let Some(pos) = stack.iter().position(|k| k == key) {
            let mut path = stack[pos..].to_vec();
            path.push(key.to_string());
            return Err(SheetError::StyleCycle {
                kind: CycleKind::Reference,
                path,
            });
        }
        let Some(raw) = self.theme.lookup(key) else {
            return Ok(None);
        };

        stack.push(key.to_string());
        let resolved = self.substitute_inner(raw, context, stack);
        stack.pop();
        let resolved = resolved?;

        trace!(key, value = %resolved.0, "resolved theme lookup");
        self.lookups.insert(key.to_string(), resolved.clone());
        Ok(Some(resolved))
    }
}

/// Per-build resolution state: resolver memo tables plus the interned table
pub struct ResolutionContext<'t> {
    resolver: StyleResolver<'t>,
    table: StyleTable,
    ids: HashMap<StyleReference, StyleId>,
    hits: usize,
}

impl<'t> ResolutionContext<'t> {
    pub fn new(theme: &'t Theme, max_depth: usize) -> Self {
        Self {
            resolver: StyleResolver::new(theme, max_depth),
            table: StyleTable::default(),
            ids: HashMap::new(),
            hits: 0,
        }
    }

    /// Resolve and intern a reference; equal references share one id
    pub fn resolve(&mut self, reference: &StyleReference, location: &str) -> SheetResult<StyleId> {
        if let Some(id) = self.ids.get(reference) {
            self.hits += 1;
            return Ok(*id);
        }
        let style = self.resolver.resolve(reference, location)?;
        let id = self.table.push(style, reference.to_string());
        self.ids.insert(reference.clone(), id);
        Ok(id)
    }

    /// Resolve every style definition in the theme, so broken but unused
    /// definitions surface too
    pub fn check_all_styles(&mut self) -> SheetResult<()> {
        let theme = self.resolver.theme;
        for name in theme.styles.keys() {
            let reference = StyleReference::named(name.clone());
            self.resolver.resolve(&reference, &format!("theme style '{name}'"))?;
        }
        Ok(())
    }

    pub fn cache_hits(&self) -> usize {
        self.hits
    }

    pub fn finish(self) -> StyleTable {
        debug!(
            distinct = self.table.len(),
            cache_hits = self.hits,
            "style resolution complete"
        );
        self.table
    }
}
