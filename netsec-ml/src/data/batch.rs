//! In-memory tabular data and its CSV representation.

use crate::data::schema::normalize_column_name;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tokens read as a missing value.
pub const MISSING_TOKENS: &[&str] = &["", "na", "NA", "nan", "NaN", "null", "NULL", "None"];

/// A single scalar field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Parse a raw CSV field.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if MISSING_TOKENS.contains(&s) {
            return Self::Missing;
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_nan() => Self::Missing,
            Ok(v) => Self::Number(v),
            Err(_) => Self::Text(s.to_string()),
        }
    }

    /// Convert a JSON document field.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Missing,
            serde_json::Value::Bool(b) => Self::Number(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Missing),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Missing => serde_json::Value::Null,
            Self::Number(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Numeric view; missing cells read as NaN, text as `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Missing => Some(f64::NAN),
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    fn to_csv_field(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Number(v) => format!("{v}"),
            Self::Text(s) => quote_field(s),
        }
    }
}

/// A batch of data rows with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl DataBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Flatten JSON documents into a batch. Columns appear in first-seen order;
    /// fields absent from a document become missing cells.
    pub fn from_records(records: &[serde_json::Map<String, serde_json::Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).map(Cell::from_json).unwrap_or(Cell::Missing))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Convert rows back into JSON documents.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, cell)| (col.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }

    /// A column is numerically typed when every present value is a number.
    /// An all-missing column counts as numeric.
    pub fn is_numeric_column(&self, idx: usize) -> bool {
        self.rows
            .iter()
            .all(|row| !matches!(row.get(idx), Some(Cell::Text(_))))
    }

    /// Numeric values of a column with missing cells as NaN.
    pub fn numeric_column(&self, idx: usize) -> Result<Vec<f64>, MlError> {
        self.rows
            .iter()
            .map(|row| {
                row.get(idx)
                    .unwrap_or(&Cell::Missing)
                    .as_f64()
                    .ok_or_else(|| {
                        MlError::transformation(format!(
                            "column '{}' contains non-numeric values",
                            self.columns.get(idx).map(String::as_str).unwrap_or("?")
                        ))
                    })
            })
            .collect()
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(idx);
        for row in &mut self.rows {
            if idx < row.len() {
                row.remove(idx);
            }
        }
        true
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.columns.iter_mut().find(|c| c.as_str() == from) {
            Some(col) => {
                *col = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Append a column; `values` must have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), MlError> {
        if values.len() != self.rows.len() {
            return Err(MlError::model(format!(
                "column '{name}' has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Replace text cells equal to `token` with missing cells. Returns the count replaced.
    pub fn replace_token_with_missing(&mut self, token: &str) -> usize {
        let mut replaced = 0;
        for cell in self.rows.iter_mut().flatten() {
            if matches!(&*cell, Cell::Text(s) if s.as_str() == token) {
                *cell = Cell::Missing;
                replaced += 1;
            }
        }
        replaced
    }

    /// Trim column names and replace spaces with underscores.
    pub fn normalize_column_names(&mut self) {
        for col in &mut self.columns {
            *col = normalize_column_name(col);
        }
    }

    /// New batch holding the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Parse CSV text with a header row.
    pub fn from_csv_str(content: &str) -> Result<Self, MlError> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| MlError::validation("empty CSV file"))?;
        let columns: Vec<String> = split_record(header)
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let fields = split_record(line);
            if fields.len() != columns.len() {
                return Err(MlError::validation(format!(
                    "CSV row {} has {} fields, header has {}",
                    line_no + 2,
                    fields.len(),
                    columns.len()
                )));
            }
            rows.push(fields.iter().map(|f| Cell::parse(f)).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn read_csv(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_csv_str(&content)
    }

    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| quote_field(c)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(Cell::to_csv_field).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }

    /// Write as CSV, creating parent directories.
    pub fn write_csv(&self, path: &Path) -> Result<(), MlError> {
        crate::persistence::write_artifact(path, self.to_csv_string().as_bytes())
    }
}

/// Split one CSV record, honouring double-quoted fields.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

fn quote_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
