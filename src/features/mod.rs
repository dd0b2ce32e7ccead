pub mod fill;
pub mod session;
pub mod spread;
pub mod timing;

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::persist::atomic_write;

/// A single named field in a feature row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Float(v) => *v,
            FieldValue::Int(v) => *v as f64,
            FieldValue::Text(s) => s.parse().unwrap_or(0.0),
        }
    }

    fn to_csv(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Int(v) => format!("{}", v),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

/// One labeled observation: a mapping of field name to value with a fixed
/// schema per extraction target.
#[derive(Debug, Clone, Default)]
pub struct FeatureRow {
    values: HashMap<String, FieldValue>,
}

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_f64(&mut self, name: &str, value: f64) -> &mut Self {
        self.values.insert(name.to_string(), FieldValue::Float(value));
        self
    }

    pub fn put_i64(&mut self, name: &str, value: i64) -> &mut Self {
        self.values.insert(name.to_string(), FieldValue::Int(value));
        self
    }

    pub fn put_text(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.values
            .insert(name.to_string(), FieldValue::Text(value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Numeric view of a field, 0 when absent or non-numeric.
    pub fn get_f64(&self, name: &str) -> f64 {
        self.values.get(name).map(|v| v.as_f64()).unwrap_or(0.0)
    }
}

/// An in-memory feature table with a fixed column ordering, materializable
/// as a CSV file with a header row.
#[derive(Debug)]
pub struct FeatureTable {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(name: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            name,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: FeatureRow) {
        self.rows.push(row);
    }

    /// One column as a numeric vector, in row order.
    pub fn column(&self, name: &str) -> Vec<f64> {
        self.rows.iter().map(|r| r.get_f64(name)).collect()
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.columns.join(","));
        out.push('\n');
        for row in &self.rows {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|col| row.get(col).map(|v| v.to_csv()).unwrap_or_default())
                .collect();
            out.push_str(&record.join(","));
            out.push('\n');
        }
        out
    }

    /// Materialize as `<dir>/<name>.csv`, written atomically. An empty table
    /// is not written.
    pub fn save(&self, dir: &Path) -> Result<Option<PathBuf>> {
        if self.is_empty() {
            warn!("no {} rows to save", self.name);
            return Ok(None);
        }

        let path = dir.join(format!("{}.csv", self.name));
        atomic_write(&path, self.to_csv().as_bytes())?;
        info!("saved {} rows to {}", self.len(), path.display());
        Ok(Some(path))
    }
}
