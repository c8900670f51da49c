//! Row value objects
//!
//! External sources have an arbitrary schema. Rows are carried as a map from
//! lower-cased column name to string value; column names configured by the
//! administrator are wrapped in [`FieldName`] which keeps both the spelling
//! used in SQL and the lower-cased lookup key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A configured column name on the external source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldName {
    raw: String,
    key: String,
}

impl FieldName {
    /// Create a field name. Surrounding whitespace is dropped.
    pub fn new(name: impl AsRef<str>) -> Self {
        let raw = name.as_ref().trim().to_string();
        let key = raw.to_lowercase();
        Self { raw, key }
    }

    /// The name as configured, used when rendering SQL.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The lower-cased key used to look the column up in a [`FieldMap`].
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether no column was configured.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl From<String> for FieldName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for FieldName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<FieldName> for String {
    fn from(value: FieldName) -> Self {
        value.raw
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One row fetched from an external source.
///
/// Keys are lower-cased once, at construction. NULL columns are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap {
    fields: BTreeMap<String, String>,
}

impl FieldMap {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from column/value pairs, lower-casing every column name.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut row = Self::new();
        for (name, value) in pairs {
            row.insert(name, value);
        }
        row
    }

    /// Set a column value. The column name is lower-cased.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.fields
            .insert(name.as_ref().to_lowercase(), value.into());
    }

    /// Builder variant of [`FieldMap::insert`].
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Raw value of a configured column.
    pub fn get(&self, field: &FieldName) -> Option<&str> {
        self.fields.get(field.key()).map(String::as_str)
    }

    /// Trimmed value of a configured column, `None` when missing or blank.
    pub fn get_trimmed(&self, field: &FieldName) -> Option<&str> {
        self.get(field).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Raw value by an already lower-cased column name.
    pub fn get_key(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Column names present in this row, in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of non-NULL columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no non-NULL columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only the listed columns.
    pub fn project(&self, fields: &[FieldName]) -> Self {
        let fields = fields
            .iter()
            .filter_map(|f| {
                self.fields
                    .get_key_value(f.key())
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect();
        Self { fields }
    }

    /// JSON rendering used in diagnostics for rejected rows.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Lazily decoded result rows.
pub type RowIter = Box<dyn Iterator<Item = FieldMap> + Send>;
