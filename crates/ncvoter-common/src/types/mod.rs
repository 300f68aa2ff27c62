//! Sparse row types shared by the ingestion pipeline and its consumers
//!
//! A snapshot line becomes a [`RawRow`] (every cell still text) once the
//! column count is reconciled against the header, and a [`RowData`] once
//! typed columns are coerced. Empty cells never appear in either map, so
//! "absent" is always represented by a missing key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A reconciled snapshot line: lower-cased header name to trimmed cell text.
pub type RawRow = BTreeMap<String, String>;

/// A typed, sparse field map. Keys are always sorted, which keeps the JSON
/// stored in the change log stable.
pub type RowData = BTreeMap<String, FieldValue>;

/// One scalar cell value.
///
/// `Null` and `Text("")` are both tombstones inside a change payload, but
/// they are kept apart: the diff writes an empty string when the cleared
/// value was textual and `Null` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn is_text(&self) -> bool {
        matches!(self, FieldValue::Text(_))
    }

    /// True for the two values that mean "this field was removed"
    pub fn is_tombstone(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// The tombstone recorded when this value is cleared by a later snapshot
    pub fn tombstone(&self) -> FieldValue {
        if self.is_text() {
            FieldValue::Text(String::new())
        } else {
            FieldValue::Null
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Convert a raw row into untyped row data, every cell kept as text.
pub fn raw_to_data(raw: &RawRow) -> RowData {
    raw.iter()
        .map(|(k, v)| (k.clone(), FieldValue::Text(v.clone())))
        .collect()
}
