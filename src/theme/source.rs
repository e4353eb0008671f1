use super::resolved::apply_properties;
use super::{FontSpec, PropertyMap, StyleDefinition, Theme, Variant};
use crate::error::{SheetError, SheetResult};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Load a theme from a YAML file
///
/// The theme name defaults to the file stem when the document has no `name`.
pub fn load_theme_file(path: &Path) -> SheetResult<Theme> {
    let content = std::fs::read_to_string(path).map_err(|e| SheetError::io_at(path, e))?;
    let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("theme")
        .to_string();
    parse_theme(&content, &fallback)
}

/// Parse a YAML theme document
///
/// ```yaml
/// name: corporate
/// extends: base
/// colors:
///   primary: "#1F4E79"
///   header_fill: "{colors.primary|lighten:0.1}"
/// fonts:
///   body: Liberation Sans
///   heading: { family: Liberation Serif, size: 14pt, weight: bold }
/// traits:
///   bordered: { border: thin }
/// styles:
///   header:
///     includes: [bordered]
///     font: { weight: bold, color: "#FFFFFF" }
///     fill: "{colors.header_fill}"
/// variants:
///   dark:
///     colors: { primary: "#9CC3E6" }
/// ```
pub fn parse_theme(content: &str, fallback_name: &str) -> SheetResult<Theme> {
    let yaml: Value = serde_yaml::from_str(content)?;
    let root = match &yaml {
        Value::Mapping(map) => map,
        Value::Null => return Ok(Theme::new(fallback_name)),
        _ => return Err(SheetError::Parse("Theme document must be a mapping".to_string())),
    };

    let mut theme = Theme::new(fallback_name);
    for (key, value) in root {
        let key = key_str(key, "theme")?;
        match key {
            "name" => theme.name = scalar(value, "name")?,
            "extends" => theme.extends = Some(scalar(value, "extends")?),
            "colors" | "palette" => theme.colors = parse_string_table(value, key)?,
            "fonts" => theme.fonts = parse_fonts(value)?,
            "traits" => {
                for (name, body) in mapping(value, "traits")? {
                    let name = key_str(name, "traits")?;
                    let mut props = PropertyMap::new();
                    flatten_properties("", body, &mut props, &format!("trait '{name}'"))?;
                    let mut expanded = PropertyMap::new();
                    apply_properties(&mut expanded, &props);
                    theme.traits.insert(name.to_string(), expanded);
                }
            }
            "styles" => {
                for (name, body) in mapping(value, "styles")? {
                    let name = key_str(name, "styles")?;
                    theme.styles.insert(name.to_string(), parse_style(name, body)?);
                }
            }
            "variants" => {
                for (name, body) in mapping(value, "variants")? {
                    let name = key_str(name, "variants")?;
                    theme.variants.insert(name.to_string(), parse_variant(name, body)?);
                }
            }
            other => {
                return Err(SheetError::Parse(format!(
                    "Unknown theme section '{other}' (expected name, extends, colors, fonts, traits, styles or variants)"
                )))
            }
        }
    }
    Ok(theme)
}

fn parse_style(name: &str, body: &Value) -> SheetResult<StyleDefinition> {
    let mut definition = StyleDefinition::new();
    let context = format!("style '{name}'");
    let map = match body {
        Value::Null => return Ok(definition),
        _ => mapping(body, &context)?,
    };

    let mut props = PropertyMap::new();
    for (key, value) in map {
        match key_str(key, &context)? {
            "extends" => definition.extends = Some(scalar(value, "extends")?),
            "includes" => {
                definition.includes = match value {
                    Value::Sequence(items) => items
                        .iter()
                        .map(|v| scalar(v, "includes"))
                        .collect::<SheetResult<_>>()?,
                    other => vec![scalar(other, "includes")?],
                }
            }
            property => flatten_properties(property, value, &mut props, &context)?,
        }
    }
    apply_properties(&mut definition.properties, &props);
    Ok(definition)
}

fn parse_variant(name: &str, body: &Value) -> SheetResult<Variant> {
    let mut variant = Variant::default();
    let context = format!("variant '{name}'");
    for (key, value) in mapping(body, &context)? {
        match key_str(key, &context)? {
            "colors" | "palette" => variant.colors = parse_string_table(value, "colors")?,
            "fonts" => variant.fonts = parse_fonts(value)?,
            other => {
                return Err(SheetError::Parse(format!(
                    "Unknown section '{other}' in {context} (expected colors or fonts)"
                )))
            }
        }
    }
    Ok(variant)
}

fn parse_fonts(value: &Value) -> SheetResult<BTreeMap<String, FontSpec>> {
    let mut fonts = BTreeMap::new();
    for (name, spec) in mapping(value, "fonts")? {
        let name = key_str(name, "fonts")?;
        let font = match spec {
            Value::Mapping(fields) => {
                let mut font = FontSpec::default();
                for (field, v) in fields {
                    match key_str(field, name)? {
                        "family" => font.family = scalar(v, "family")?,
                        "size" => font.size = Some(scalar(v, "size")?),
                        "weight" => font.weight = Some(scalar(v, "weight")?),
                        other => {
                            return Err(SheetError::Parse(format!(
                                "Unknown field '{other}' in font '{name}' (expected family, size or weight)"
                            )))
                        }
                    }
                }
                if font.family.is_empty() {
                    return Err(SheetError::Parse(format!("Font '{name}' has no family")));
                }
                font
            }
            other => FontSpec::family(scalar(other, name)?),
        };
        fonts.insert(name.to_string(), font);
    }
    Ok(fonts)
}

fn parse_string_table(value: &Value, section: &str) -> SheetResult<BTreeMap<String, String>> {
    mapping(value, section)?
        .iter()
        .map(|(k, v)| Ok((key_str(k, section)?.to_string(), scalar(v, section)?)))
        .collect()
}

/// Flatten nested property mappings into dotted keys
pub(crate) fn flatten_properties(
    prefix: &str,
    value: &Value,
    out: &mut PropertyMap,
    context: &str,
) -> SheetResult<()> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let key = key_str(key, context)?;
                let path = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_properties(&path, child, out, context)?;
            }
            Ok(())
        }
        Value::Sequence(_) => Err(SheetError::Parse(format!(
            "Property '{prefix}' in {context} cannot be a list"
        ))),
        scalar_value => {
            out.insert(prefix.to_string(), scalar(scalar_value, prefix)?);
            Ok(())
        }
    }
}

pub(crate) fn mapping<'a>(value: &'a Value, context: &str) -> SheetResult<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| SheetError::Parse(format!("'{context}' must be a mapping")))
}

pub(crate) fn key_str<'a>(key: &'a Value, context: &str) -> SheetResult<&'a str> {
    key.as_str()
        .ok_or_else(|| SheetError::Parse(format!("Keys in '{context}' must be strings")))
}

pub(crate) fn scalar(value: &Value, field: &str) -> SheetResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(SheetError::Parse(format!("'{field}' must be a string, number or boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r##"
name: corporate
extends: base
colors:
  primary: "#1F4E79"
fonts:
  body: Liberation Sans
  heading: { family: Liberation Serif, size: 14pt, weight: bold }
traits:
  bordered: { border: thin }
styles:
  header:
    includes: [bordered]
    font: { weight: bold, size: 12 }
    fill: "{colors.primary}"
  total:
    extends: header
    includes: bordered
variants:
  dark:
    colors: { primary: "#9CC3E6" }
"##;

    #[test]
    fn test_parse_full_theme() {
        let theme = parse_theme(SAMPLE, "fallback").unwrap();
        assert_eq!(theme.name, "corporate");
        assert_eq!(theme.extends.as_deref(), Some("base"));
        assert_eq!(theme.fonts["body"].family, "Liberation Sans");
        assert_eq!(theme.fonts["heading"].size.as_deref(), Some("14pt"));
        assert_eq!(theme.traits["bordered"]["border.left"], "thin");

        let header = &theme.styles["header"];
        assert_eq!(header.includes, vec!["bordered"]);
        assert_eq!(header.properties["font.weight"], "bold");
        assert_eq!(header.properties["font.size"], "12");
        assert_eq!(header.properties["fill.color"], "{colors.primary}");

        let total = &theme.styles["total"];
        assert_eq!(total.extends.as_deref(), Some("header"));
        assert_eq!(total.includes, vec!["bordered"]);
        assert_eq!(theme.variants["dark"].colors["primary"], "#9CC3E6");
    }

    #[test]
    fn test_name_falls_back_to_file_stem() {
        let theme = parse_theme("colors: { a: '#000' }", "plain").unwrap();
        assert_eq!(theme.name, "plain");
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(parse_theme("colours: {}", "t").is_err());
        assert!(parse_theme("styles: { x: { border: [thin] } }", "t").is_err());
    }
}
