//! Format decoding and key flattening.
//!
//! # Data Flow
//! ```text
//! section body (json | yaml | toml)
//!     → decode into a serde_json::Value tree
//!     → flatten nested maps/sequences into dot-path keys
//!     → FlatMap (ordered key → scalar)
//! ```
//!
//! # Design Decisions
//! - One value model (serde_json::Value) for all three formats
//! - Keys are ordered (BTreeMap) so diffs and cache files are reproducible
//! - Values keep their decoded type: `1` and `"1"` are different values

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Flattened key/value projection of one section.
pub type FlatMap = BTreeMap<String, Value>;

/// Serialization format of a config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "yaml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(DecodeError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Errors raised while decoding or flattening a section body.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("document is not a map")]
    NotAMap,

    #[error("{section} section: {source}")]
    InSection {
        section: &'static str,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub fn in_section(section: &'static str, source: DecodeError) -> Self {
        DecodeError::InSection {
            section,
            source: Box::new(source),
        }
    }
}

/// Separator convention used when joining nested key components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparatorStyle {
    pub before: &'static str,
    pub middle: &'static str,
    pub after: &'static str,
}

impl SeparatorStyle {
    /// `a.b.1.c`
    pub const DOT: SeparatorStyle = SeparatorStyle { before: "", middle: ".", after: "" };
    /// `a/b/1/c`
    pub const PATH: SeparatorStyle = SeparatorStyle { before: "", middle: "/", after: "" };
    /// `a[b][1][c]`
    pub const RAILS: SeparatorStyle = SeparatorStyle { before: "[", middle: "", after: "]" };
    /// `a_b_1_c`
    pub const UNDERSCORE: SeparatorStyle = SeparatorStyle { before: "", middle: "_", after: "" };

    fn join(&self, prefix: Option<&str>, component: &str) -> String {
        match prefix {
            None => component.to_string(),
            Some(prefix) => format!(
                "{}{}{}{}{}",
                prefix, self.before, self.middle, component, self.after
            ),
        }
    }
}

/// Decode a section body and flatten it with dot-style keys.
///
/// An empty body is an empty section, not an error.
pub fn parse_flat(body: &str, format: Option<Format>) -> Result<FlatMap, DecodeError> {
    if body.is_empty() {
        return Ok(FlatMap::new());
    }
    let format = format.ok_or_else(|| DecodeError::UnsupportedFormat(String::new()))?;
    let document = decode(body, format)?;
    match document {
        Value::Object(_) | Value::Null => flatten_with(&document, SeparatorStyle::DOT),
        _ => Err(DecodeError::NotAMap),
    }
}

/// Decode a body into the shared value model without flattening.
pub fn decode(body: &str, format: Format) -> Result<Value, DecodeError> {
    match format {
        Format::Json => Ok(serde_json::from_str(body)?),
        Format::Yaml => {
            let value: serde_yaml::Value = serde_yaml::from_str(body)?;
            Ok(from_yaml(value))
        }
        Format::Toml => {
            let table: toml::Table = toml::from_str(body)?;
            Ok(from_toml(toml::Value::Table(table)))
        }
    }
}

/// Flatten a nested map or sequence into a single-level map.
pub fn flatten_with(nested: &Value, style: SeparatorStyle) -> Result<FlatMap, DecodeError> {
    let mut flat = FlatMap::new();
    match nested {
        Value::Object(_) | Value::Array(_) => walk(&mut flat, nested, None, style),
        Value::Null => {}
        _ => return Err(DecodeError::NotAMap),
    }
    Ok(flat)
}

fn walk(flat: &mut FlatMap, nested: &Value, prefix: Option<&str>, style: SeparatorStyle) {
    match nested {
        Value::Object(map) => {
            for (k, v) in map {
                assign(flat, style.join(prefix, k), v, style);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                assign(flat, style.join(prefix, &i.to_string()), v, style);
            }
        }
        _ => {}
    }
}

fn assign(flat: &mut FlatMap, key: String, value: &Value, style: SeparatorStyle) {
    match value {
        Value::Object(_) | Value::Array(_) => walk(flat, value, Some(&key), style),
        scalar => {
            flat.insert(key, scalar.clone());
        }
    }
}

/// Render a flattened value the way change callbacks and the environment see it.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn from_yaml(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(from_yaml).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                map.insert(yaml_key(k), from_yaml(v));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => from_yaml(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match from_yaml(key) {
        Value::String(s) => s,
        other => stringify(&other),
    }
}

fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
        }
    }
}

// NaN and infinities have no JSON number form; keep their text.
fn float(f: f64) -> Value {
    Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

/// Serde adapter for optional format fields encoded as `""` when absent.
pub mod format_field {
    use super::Format;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(format: &Option<Format>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(format.map(|f| f.as_str()).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Format>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}
