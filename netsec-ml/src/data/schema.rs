//! Declarative column schema: expected columns and the numerical subset.
//!
//! The schema file is YAML with two top-level keys:
//!
//! ```yaml
//! columns:
//!   having_IP_Address: int64
//!   URL_Length: int64
//! numerical_columns:
//!   - having_IP_Address
//!   - URL_Length
//! ```
//!
//! `columns` may also be written as a list of single-entry mappings. Order is
//! preserved in both forms.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

/// Column data type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Unknown,
}

impl ColumnType {
    /// Map a schema type tag (`int64`, `float`, `object`, ...) to a column type.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "int" | "int32" | "int64" | "integer" => Self::Integer,
            "float" | "float32" | "float64" | "double" | "number" => Self::Float,
            "str" | "string" | "object" | "category" => Self::String,
            "bool" | "boolean" => Self::Boolean,
            _ => Self::Unknown,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// Schema for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
}

/// The data contract consumed by validation and transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSchema>,
    pub numerical_columns: Vec<String>,
}

/// Trim a column name and replace inner spaces with underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

impl Schema {
    /// Load a schema file. Missing files and missing keys are configuration errors.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MlError::config(format!("cannot read schema file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| MlError::config(format!("invalid schema file {}: {e}", path.display())))
    }

    /// Parse schema YAML text.
    pub fn parse(content: &str) -> Result<Self, MlError> {
        let doc: Value = serde_yaml::from_str(content)?;
        let columns_value = doc
            .get("columns")
            .ok_or_else(|| MlError::config("missing required key 'columns'"))?;
        let numerical_value = doc
            .get("numerical_columns")
            .ok_or_else(|| MlError::config("missing required key 'numerical_columns'"))?;

        let mut columns = Vec::new();
        match columns_value {
            Value::Mapping(map) => {
                for (name, tag) in map {
                    columns.push(column_entry(name, tag)?);
                }
            }
            Value::Sequence(items) => {
                for item in items {
                    let Value::Mapping(map) = item else {
                        return Err(MlError::config(
                            "'columns' list entries must be single-key mappings",
                        ));
                    };
                    if map.len() != 1 {
                        return Err(MlError::config(
                            "'columns' list entries must be single-key mappings",
                        ));
                    }
                    for (name, tag) in map {
                        columns.push(column_entry(name, tag)?);
                    }
                }
            }
            _ => return Err(MlError::config("'columns' must be a mapping or a list")),
        }

        let numerical_columns = match numerical_value {
            Value::Sequence(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(normalize_column_name)
                        .ok_or_else(|| MlError::config("'numerical_columns' entries must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Value::Null => Vec::new(),
            _ => return Err(MlError::config("'numerical_columns' must be a list")),
        };

        Ok(Self {
            columns,
            numerical_columns,
        })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

fn column_entry(name: &Value, tag: &Value) -> Result<ColumnSchema, MlError> {
    let name = name
        .as_str()
        .ok_or_else(|| MlError::config("column names must be strings"))?;
    let tag = match tag {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)?.trim().to_string(),
    };
    Ok(ColumnSchema {
        name: normalize_column_name(name),
        dtype: ColumnType::from_tag(&tag),
    })
}
