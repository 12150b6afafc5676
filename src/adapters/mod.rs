//! Protocol adapter set (C2, spec §4.2).
//!
//! Each adapter exposes `adapt_to_server`/`adapt_from_server` and operates
//! structurally over a `serde_json::Value` tree -- field renames, casing
//! conversion, timestamp-unit conversion -- the same shape
//! `original_source`'s adapters use over Python dicts. The adapter is its
//! own inverse on the round trip for any record containing only fields it
//! knows about (spec testable property 1).

mod csharp;
mod go;
mod python;
mod rust_lang;

pub use csharp::CSharpAdapter;
pub use go::GoAdapter;
pub use python::PythonAdapter;
pub use rust_lang::RustAdapter;

use crate::config::{ProtocolVersion, ServerLanguage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    ToServer,
    ToClient,
}

/// A table of renames that change the *word*, not merely the casing (e.g.
/// `kind` -> `entity_type`). Casing conversion, where a dialect applies
/// it, is layered on top by the individual adapter.
#[derive(Debug, Default, Clone)]
pub(crate) struct FieldMapping {
    to_wire: HashMap<&'static str, &'static str>,
    to_canonical: HashMap<&'static str, &'static str>,
}

impl FieldMapping {
    pub(crate) fn new(pairs: &[(&'static str, &'static str)]) -> Self {
        let mut to_wire = HashMap::new();
        let mut to_canonical = HashMap::new();
        for (canonical, wire) in pairs {
            to_wire.insert(*canonical, *wire);
            to_canonical.insert(*wire, *canonical);
        }
        FieldMapping { to_wire, to_canonical }
    }

    fn rename(&self, key: &str, direction: Direction) -> String {
        let table = match direction {
            Direction::ToServer => &self.to_wire,
            Direction::ToClient => &self.to_canonical,
        };
        table.get(key).map(|s| s.to_string()).unwrap_or_else(|| key.to_string())
    }

    /// Recursively renames object keys, descending into nested objects and
    /// arrays of objects, mirroring `original_source`'s
    /// `_apply_field_mapping`.
    pub(crate) fn apply(&self, value: &Value, direction: Direction) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    let new_key = self.rename(k, direction);
                    out.insert(new_key, self.apply(v, direction));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.apply(v, direction)).collect()),
            other => other.clone(),
        }
    }
}

/// Recursively applies `f` to every object key in `value`, descending into
/// nested objects and arrays of objects. Used by dialects (C#, Go) whose
/// wire casing differs from the canonical snake_case for every field, not
/// just the ones with a word-changing rename.
pub(crate) fn recase_all_keys(value: &Value, f: impl Fn(&str) -> String + Copy) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(f(k), recase_all_keys(v, f));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| recase_all_keys(v, f)).collect()),
        other => other.clone(),
    }
}

/// Converts `snake_case` to `PascalCase`.
pub(crate) fn to_pascal_case(text: &str) -> String {
    text.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Converts `PascalCase`/`camelCase` back to `snake_case`. Adequate for the
/// closed set of field names this crate's records use (no adjacent-capital
/// acronyms besides the deliberately-opaque `id`).
pub(crate) fn to_snake_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for (i, c) in text.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Title-cases a single lowercase word, as C#'s `str.title()` does for
/// enum values (`"player"` -> `"Player"`).
pub(crate) fn to_title_case(text: &str) -> String {
    to_pascal_case(text)
}

/// Converts seconds (the canonical unit, spec §3) to whole nanoseconds.
pub(crate) fn seconds_to_nanos(seconds: f64) -> i64 {
    (seconds * 1_000_000_000.0).round() as i64
}

pub(crate) fn nanos_to_seconds(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}

pub(crate) fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

pub(crate) fn millis_to_seconds(millis: i64) -> f64 {
    millis as f64 / 1000.0
}

/// A server-language dialect adapter. Transformations are purely
/// structural; semantics are preserved (spec §4.2).
pub trait ProtocolAdapter: Send + Sync {
    fn adapt_to_server(&self, data: &Value, type_name: &str) -> Value;
    fn adapt_from_server(&self, data: &Value, type_name: &str) -> Value;
}

/// Registry keyed by `(language, protocol_version)` (spec §9). Versions
/// other than 1.2 fall back to the 1.2 adapter.
pub struct AdapterRegistry {
    adapters: HashMap<ServerLanguage, Arc<dyn ProtocolAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut adapters: HashMap<ServerLanguage, Arc<dyn ProtocolAdapter>> = HashMap::new();
        adapters.insert(ServerLanguage::Rust, Arc::new(RustAdapter));
        adapters.insert(ServerLanguage::Python, Arc::new(PythonAdapter));
        adapters.insert(ServerLanguage::CSharp, Arc::new(CSharpAdapter));
        adapters.insert(ServerLanguage::Go, Arc::new(GoAdapter));
        AdapterRegistry { adapters }
    }
}

impl AdapterRegistry {
    pub fn get(&self, language: ServerLanguage, _version: ProtocolVersion) -> Arc<dyn ProtocolAdapter> {
        self.adapters
            .get(&language)
            .cloned()
            .unwrap_or_else(|| self.adapters[&ServerLanguage::Rust].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_and_snake_are_inverses_for_closed_field_set() {
        for field in ["created_at", "is_active", "entity_type", "player_id", "circle_type"] {
            let pascal = to_pascal_case(field);
            assert_eq!(to_snake_case(&pascal), field);
        }
    }

    #[test]
    fn nanos_round_trip_for_common_values() {
        for seconds in [0.0, 1.5, 2.0, 1_700_000_000.25] {
            let nanos = seconds_to_nanos(seconds);
            assert!((nanos_to_seconds(nanos) - seconds).abs() < 1e-6);
        }
    }
}
