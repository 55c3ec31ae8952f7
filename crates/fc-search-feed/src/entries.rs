//! Order- and duplicate-preserving view of a feed document.
//!
//! `serde_json::Value` keeps only the last value of a repeated key, which
//! would hide duplicate identities. This visitor keeps every entry in
//! document order instead.

use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Value;

/// Top level of a feed document.
pub(crate) enum RawDocument {
    /// `{ "<identity>": { ... }, ... }`
    Keyed(Vec<(String, Value)>),
    /// `[ { "<identity field>": "...", ... }, ... ]`
    Listed(Vec<Value>),
}

impl RawDocument {
    pub(crate) fn len(&self) -> usize {
        match self {
            RawDocument::Keyed(entries) => entries.len(),
            RawDocument::Listed(entries) => entries.len(),
        }
    }
}

struct RawDocumentVisitor;

impl<'de> Visitor<'de> for RawDocumentVisitor {
    type Value = RawDocument;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object keyed by identity or an array of objects")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.push((key, value));
        }
        Ok(RawDocument::Keyed(entries))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element::<Value>()? {
            entries.push(value);
        }
        Ok(RawDocument::Listed(entries))
    }
}

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(RawDocumentVisitor)
    }
}

/// Short description of a JSON value's type for skip reasons.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse error helper for callers that want a plain reason string.
pub(crate) fn parse(bytes: &[u8]) -> Result<RawDocument, String> {
    serde_json::from_slice::<RawDocument>(bytes).map_err(|e| e.to_string())
}
