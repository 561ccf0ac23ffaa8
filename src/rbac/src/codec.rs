//! Raw attribute encodings exchanged with the directory
//!
//! Hierarchy edges are stored one `child:parent` pair per attribute value and
//! properties one `key:value` pair per value. Malformed values are skipped
//! with a warning instead of failing the whole read.

use crate::types::Relationship;
use std::collections::BTreeMap;
use tracing::warn;

const PAIR_SEPARATOR: char = ':';

/// Split `left:right` at the first separator; `None` if either side is empty
fn split_pair(raw: &str) -> Option<(&str, &str)> {
    match raw.find(PAIR_SEPARATOR) {
        Some(idx) if idx > 0 && idx + 1 < raw.len() => Some((&raw[..idx], &raw[idx + 1..])),
        _ => None,
    }
}

impl Relationship {
    /// Parse a raw `child:parent` value
    pub fn parse(raw: &str) -> Option<Self> {
        split_pair(raw.trim()).map(|(child, parent)| Relationship::new(child, parent))
    }

    /// Encode as `child:parent`
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.child, PAIR_SEPARATOR, self.parent)
    }
}

/// Parse a multi-valued relationship attribute, skipping malformed entries
pub fn parse_relationships<S: AsRef<str>>(values: &[S]) -> Vec<Relationship> {
    values
        .iter()
        .filter_map(|value| {
            let raw = value.as_ref();
            let parsed = Relationship::parse(raw);
            if parsed.is_none() {
                warn!(raw, "Skipping malformed relationship value");
            }
            parsed
        })
        .collect()
}

/// Encode relationships as attribute values
pub fn encode_relationships<'a, I>(edges: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Relationship>,
{
    edges.into_iter().map(Relationship::encode).collect()
}

/// Parse a multi-valued `key:value` attribute, skipping malformed entries.
///
/// Later duplicates of a key win.
pub fn parse_properties<S: AsRef<str>>(values: &[S]) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    for value in values {
        let raw = value.as_ref();
        match split_pair(raw.trim()) {
            Some((key, val)) => {
                props.insert(key.to_string(), val.to_string());
            }
            None => warn!(raw, "Skipping malformed property value"),
        }
    }
    props
}

/// Encode properties as `key:value` attribute values
pub fn encode_properties(props: &BTreeMap<String, String>) -> Vec<String> {
    props
        .iter()
        .map(|(key, value)| format!("{}{}{}", key, PAIR_SEPARATOR, value))
        .collect()
}
