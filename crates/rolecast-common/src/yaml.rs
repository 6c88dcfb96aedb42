//! YAML documents as `serde_json::Value`
//!
//! Templates, flavour catalogs and compiler configuration are authored as YAML
//! but compiled as JSON values. Parsing goes through yaml-rust2 and is converted
//! here so the rest of the workspace only ever sees `serde_json::Value`.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::{Error, Result};

/// Parse the first document of a YAML string.
///
/// `source` names where the text came from and is carried in errors.
/// Empty input yields `Value::Null`.
pub fn parse_yaml(input: &str, source: &str) -> Result<Value> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::template_parse(source, e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => Converter { source }.value(doc, ""),
        None => Ok(Value::Null),
    }
}

/// Parse the first document of a YAML string and require a mapping at its root.
pub fn parse_yaml_mapping(input: &str, source: &str) -> Result<Map<String, Value>> {
    match parse_yaml(input, source)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(Error::template_parse(source, "document is empty")),
        other => Err(Error::template_parse(
            source,
            format!("expected a mapping at the document root, found {}", kind_of(&other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Converts one parsed document, tracking the key path so errors can point
/// at the offending node.
struct Converter<'s> {
    source: &'s str,
}

impl Converter<'_> {
    fn value(&self, yaml: Yaml, at: &str) -> Result<Value> {
        match yaml {
            Yaml::Null => Ok(Value::Null),
            Yaml::Boolean(b) => Ok(Value::Bool(b)),
            Yaml::Integer(i) => Ok(Value::from(i)),
            Yaml::Real(spelling) => Ok(real(spelling)),
            Yaml::String(s) => Ok(Value::String(s)),
            Yaml::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.value(item, &format!("{at}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Yaml::Hash(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    let key = self.key(key, at)?;
                    let child = if at.is_empty() {
                        key.clone()
                    } else {
                        format!("{at}.{key}")
                    };
                    map.insert(key, self.value(item, &child)?);
                }
                Ok(Value::Object(map))
            }
            Yaml::Alias(_) => Err(self.error(at, "unresolved alias")),
            Yaml::BadValue => Err(self.error(at, "unreadable value")),
        }
    }

    /// Scalar keys become their string spelling; anything else has no JSON form.
    fn key(&self, key: Yaml, at: &str) -> Result<String> {
        match key {
            Yaml::String(s) | Yaml::Real(s) => Ok(s),
            Yaml::Integer(i) => Ok(i.to_string()),
            Yaml::Boolean(b) => Ok(b.to_string()),
            Yaml::Null => Err(self.error(at, "null mapping key")),
            _ => Err(self.error(at, "mapping key is not a scalar")),
        }
    }

    fn error(&self, at: &str, what: &str) -> Error {
        let at = if at.is_empty() { "<root>" } else { at };
        Error::template_parse(self.source, format!("{what} at {at}"))
    }
}

/// Reals that JSON cannot hold keep their spelling so quantity parsing can
/// reject them with a field-level error.
fn real(spelling: String) -> Value {
    spelling
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::String(spelling))
}
