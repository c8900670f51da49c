//! Read query builder
//!
//! Queries are built structurally and rendered to SQL only by the database
//! connector. Table and column names come from trusted configuration and are
//! emitted as-is; literal values are always escaped.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::row::{FieldMap, FieldName};

/// How string literals are escaped before interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotingStyle {
    /// SQL standard: a single quote is doubled.
    #[default]
    Standard,
    /// Backslash escaping for engines that interpret `\` inside literals.
    Backslash,
}

impl QuotingStyle {
    /// Escape a literal for use between single quotes.
    pub fn escape(&self, value: &str) -> String {
        match self {
            QuotingStyle::Standard => value.replace('\'', "''"),
            QuotingStyle::Backslash => {
                let mut out = String::with_capacity(value.len() + 8);
                for ch in value.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\0' => out.push_str("\\0"),
                        other => out.push(other),
                    }
                }
                out
            }
        }
    }

    /// Parse a configuration value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "standard" => Some(QuotingStyle::Standard),
            "backslash" => Some(QuotingStyle::Backslash),
            _ => None,
        }
    }
}

/// A `SELECT` against a single external table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    table: String,
    fields: Vec<FieldName>,
    distinct: bool,
    conditions: Vec<(FieldName, String)>,
    any_of: Option<(FieldName, Vec<String>)>,
    order_by: Vec<FieldName>,
}

impl SelectQuery {
    /// Select every column of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            distinct: false,
            conditions: Vec::new(),
            any_of: None,
            order_by: Vec::new(),
        }
    }

    /// Restrict the projection. An empty list selects `*`.
    pub fn select(mut self, fields: impl IntoIterator<Item = FieldName>) -> Self {
        self.fields = fields.into_iter().filter(|f| !f.is_empty()).collect();
        self
    }

    /// Add `DISTINCT`.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add an equality condition; conditions are joined with `AND`.
    pub fn filter(mut self, field: FieldName, value: impl Into<String>) -> Self {
        self.conditions.push((field, value.into()));
        self
    }

    /// Add an `IN (...)` condition.
    pub fn filter_in(mut self, field: FieldName, values: impl IntoIterator<Item = String>) -> Self {
        self.any_of = Some((field, values.into_iter().collect()));
        self
    }

    /// Append a sort column.
    pub fn order_by(mut self, field: FieldName) -> Self {
        self.order_by.push(field);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldName] {
        &self.fields
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn conditions(&self) -> &[(FieldName, String)] {
        &self.conditions
    }

    pub fn any_of(&self) -> Option<(&FieldName, &[String])> {
        self.any_of.as_ref().map(|(f, v)| (f, v.as_slice()))
    }

    /// Render to SQL with literal escaping.
    pub fn to_sql(&self, quoting: QuotingStyle) -> String {
        self.to_sql_with(quoting, |v| v.to_string())
    }

    /// Render to SQL, passing every escaped literal through `encode`.
    pub fn to_sql_with<F>(&self, quoting: QuotingStyle, encode: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let literal = |value: &str| format!("'{}'", encode(&quoting.escape(value)));

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.fields.is_empty() {
            sql.push('*');
        } else {
            let fields: Vec<&str> = self.fields.iter().map(FieldName::as_str).collect();
            sql.push_str(&fields.join(","));
        }
        let _ = write!(sql, " FROM {}", self.table);

        let mut clauses: Vec<String> = self
            .conditions
            .iter()
            .map(|(field, value)| format!("{} = {}", field.as_str(), literal(value)))
            .collect();
        if let Some((field, values)) = &self.any_of {
            if values.is_empty() {
                clauses.push("1 = 0".to_string());
            } else {
                let list: Vec<String> = values.iter().map(|v| literal(v)).collect();
                clauses.push(format!("{} IN ({})", field.as_str(), list.join(",")));
            }
        }
        if !clauses.is_empty() {
            let _ = write!(sql, " WHERE {}", clauses.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order: Vec<&str> = self.order_by.iter().map(FieldName::as_str).collect();
            let _ = write!(sql, " ORDER BY {}", order.join(","));
        }
        sql
    }

    /// Evaluate the `WHERE` clause against an already fetched row.
    pub fn matches(&self, row: &FieldMap) -> bool {
        let conditions_hold = self
            .conditions
            .iter()
            .all(|(field, value)| row.get(field) == Some(value.as_str()));
        let any_of_holds = match &self.any_of {
            Some((field, values)) => row
                .get(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            None => true,
        };
        conditions_hold && any_of_holds
    }
}
