//! Canonical JSON serialization for deterministic signing.
//!
//! Two parties holding the same logical record must produce the same bytes,
//! otherwise signatures cannot be checked. The canonical form is:
//!
//! 1. Object members whose value is `null` or an empty array are dropped
//! 2. Object keys are sorted by their UTF-8 bytes
//! 3. No whitespace; separators are `,` and `:`
//! 4. No floating-point numbers (decimals travel as pre-formatted strings)
//! 5. Output is pure ASCII: characters outside printable ASCII are written as
//!    lowercase `\uXXXX` escapes (surrogate pairs above the BMP), matching
//!    the common `sort_keys` + `ensure_ascii` JSON dump
//!
//! Key order is enforced by the writer itself rather than relying on how
//! `serde_json::Map` happens to be backed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("JSON decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Floating-point number at {path}: decimals must be pre-formatted strings")]
    FloatingPoint { path: String },

    #[error("Top-level value must be a JSON object")]
    NotAnObject,

    #[error("Input is not in canonical form")]
    NonCanonical,
}

pub type Result<T> = std::result::Result<T, SerializationError>;

/// Canonical JSON text of a record, the exact input to hashing and signing.
///
/// Only constructed through [`to_canonical_json`] or [`CanonicalJson::parse`],
/// so holding one means the bytes are canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalJson(String);

impl CanonicalJson {
    /// Accept externally supplied text only if it already is canonical.
    pub fn parse(text: &str) -> Result<Self> {
        verify_canonical(text.as_bytes())?;
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<[u8]> for CanonicalJson {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Serialize a value to canonical JSON.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<CanonicalJson> {
    let value = serde_json::to_value(value).map_err(SerializationError::Encode)?;
    canonicalize_value(value)
}

/// Canonicalize an already-built JSON value.
pub fn canonicalize_value(value: Value) -> Result<CanonicalJson> {
    if !value.is_object() {
        return Err(SerializationError::NotAnObject);
    }
    let pruned = prune(value);
    let mut out = String::new();
    write_canonical(&pruned, "$", &mut out)?;
    Ok(CanonicalJson(out))
}

/// Deserialize a value from canonical JSON bytes.
pub fn from_canonical_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    verify_canonical(bytes)?;
    serde_json::from_slice(bytes).map_err(SerializationError::Decode)
}

/// Verify that bytes are exactly the canonical rendering of what they encode.
pub fn verify_canonical(bytes: &[u8]) -> Result<()> {
    let value: Value = serde_json::from_slice(bytes).map_err(SerializationError::Decode)?;
    let canonical = canonicalize_value(value)?;
    if canonical.as_bytes() != bytes {
        return Err(SerializationError::NonCanonical);
    }
    Ok(())
}

/// Turn an unordered collection into the fixed sequence used on the wire
/// (sorted, duplicates removed).
pub fn ordered_set<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !is_absent(v))
                .map(|(k, v)| (k, prune(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(prune).collect()),
        other => other,
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn write_canonical(value: &Value, path: &str, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(SerializationError::FloatingPoint {
                    path: path.to_string(),
                });
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, &format!("{path}[{i}]"), out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, &format!("{path}.{key}"), out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}
