//! Tabular query results
//!
//! A `Table` is an ordered list of rows keyed by column name. Results from
//! the materialization service arrive as JSON records and are remapped in
//! place by the live query path.

mod positions;
mod value;

pub use positions::{concatenate_positions, scale_positions};
pub use value::CellValue;

use crate::error::{CaveError, CaveResult};
use crate::ids::{is_supervoxel_column, root_column_for};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One result row, keyed by column name
pub type Row = BTreeMap<String, CellValue>;

/// An ordered collection of rows with a known column order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from records, taking columns in first-seen order
    pub fn from_records(records: Vec<Row>) -> Self {
        let mut table = Table::default();
        for row in records {
            table.push_row(row);
        }
        table
    }

    /// Parse a JSON array of objects
    pub fn from_json(value: serde_json::Value) -> CaveResult<Self> {
        match value {
            serde_json::Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    let row: Row = serde_json::from_value(item)?;
                    records.push(row);
                }
                Ok(Self::from_records(records))
            }
            other => Err(CaveError::Decode(format!(
                "expected a list of records, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Append a row, registering any new columns
    pub fn push_row(&mut self, row: Row) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in every row (`Null` where missing)
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a CellValue> + 'a {
        const NULL: &CellValue = &CellValue::Null;
        self.rows.iter().map(move |row| row.get(column).unwrap_or(NULL))
    }

    /// Keep only the rows matching `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&Row) -> bool) {
        self.rows.retain(|row| keep(row));
    }

    /// All `(supervoxel column, root column)` pairs present in the table
    pub fn id_column_pairs(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .filter(|c| is_supervoxel_column(c))
            .filter_map(|sv| {
                let root = root_column_for(sv)?;
                self.has_column(&root).then(|| (sv.clone(), root))
            })
            .collect()
    }

    /// Replace the column order (used after position columns are merged or split)
    pub(crate) fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a bool",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
