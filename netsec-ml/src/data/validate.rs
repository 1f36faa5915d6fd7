//! Data validation: structural conformance against the schema, then drift.
//!
//! Structural problems in either split are accumulated into one message and
//! abort the stage before drift is computed. Drift never aborts; it is written
//! to the report and surfaced as `validation_status`.

use crate::artifacts::{DataIngestionArtifact, DataValidationArtifact};
use crate::config::DataValidationConfig;
use crate::data::batch::DataBatch;
use crate::data::drift::{ColumnDrift, DriftReport, ks_two_sample, sanitize};
use crate::data::schema::Schema;
use crate::error::MlError;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// A structural problem with a declared numerical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnIssue {
    Missing(String),
    NonNumeric(String),
}

impl fmt::Display for ColumnIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(col) => write!(f, "missing numerical column '{col}'"),
            Self::NonNumeric(col) => write!(f, "column '{col}' is not numeric"),
        }
    }
}

/// Validation stage.
pub struct DataValidation {
    config: DataValidationConfig,
    ingestion_artifact: DataIngestionArtifact,
    schema: Schema,
}

impl DataValidation {
    /// Loads the schema; a missing or malformed schema is a configuration error.
    pub fn new(
        config: DataValidationConfig,
        ingestion_artifact: DataIngestionArtifact,
    ) -> Result<Self, MlError> {
        let schema = Schema::load(&config.schema_path)?;
        tracing::debug!(
            columns = schema.column_count(),
            numerical = schema.numerical_columns.len(),
            "Schema loaded"
        );
        Ok(Self {
            config,
            ingestion_artifact,
            schema,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Read a split and normalize its column names.
    pub fn read_data(path: &Path) -> Result<DataBatch, MlError> {
        let mut batch = DataBatch::read_csv(path)?;
        batch.normalize_column_names();
        Ok(batch)
    }

    pub fn validate_number_of_columns(&self, batch: &DataBatch) -> bool {
        validate_column_count(batch, &self.schema)
    }

    pub fn validate_numerical_columns(&self, batch: &DataBatch) -> Vec<ColumnIssue> {
        validate_numerical_columns(batch, &self.schema)
    }

    /// Run drift detection and persist the report whatever the outcome.
    pub fn detect_dataset_drift(
        &self,
        base: &DataBatch,
        current: &DataBatch,
    ) -> Result<(bool, DriftReport), MlError> {
        let report = detect_drift(base, current, self.config.drift_threshold);
        let yaml = serde_yaml::to_string(&report)?;
        crate::persistence::write_artifact(&self.config.drift_report_file_path, yaml.as_bytes())?;
        let passed = report.passed();
        if !passed {
            tracing::warn!(columns = ?report.drifted_columns(), "Dataset drift detected");
        }
        Ok((passed, report))
    }

    pub fn initiate_data_validation(&self) -> Result<DataValidationArtifact, MlError> {
        let train = Self::read_data(&self.ingestion_artifact.trained_file_path)?;
        let test = Self::read_data(&self.ingestion_artifact.test_file_path)?;

        let mut error_message = String::new();
        if !self.validate_number_of_columns(&train) {
            error_message.push_str("Train dataframe has incorrect column count\n");
        }
        if !self.validate_number_of_columns(&test) {
            error_message.push_str("Test dataframe has incorrect column count\n");
        }
        for (split, batch) in [("Train", &train), ("Test", &test)] {
            let issues = self.validate_numerical_columns(batch);
            if !issues.is_empty() {
                let joined: Vec<String> = issues.iter().map(ToString::to_string).collect();
                error_message.push_str(&format!("{split}: {}\n", joined.join("; ")));
            }
        }
        if !error_message.is_empty() {
            return Err(MlError::validation(format!(
                "data validation failed:\n{}",
                error_message.trim_end()
            )));
        }

        let (drift_passed, _report) = self.detect_dataset_drift(&train, &test)?;

        train.write_csv(&self.config.valid_train_file_path)?;
        test.write_csv(&self.config.valid_test_file_path)?;

        Ok(DataValidationArtifact {
            validation_status: drift_passed,
            valid_train_file_path: self.config.valid_train_file_path.clone(),
            valid_test_file_path: self.config.valid_test_file_path.clone(),
            invalid_train_file_path: None,
            invalid_test_file_path: None,
            drift_report_file_path: self.config.drift_report_file_path.clone(),
        })
    }
}

/// Exact column-count match. On mismatch the missing and extra names are logged.
pub fn validate_column_count(batch: &DataBatch, schema: &Schema) -> bool {
    let expected = schema.column_count();
    let actual = batch.column_count();
    tracing::info!(expected, actual, "Column count check");
    if expected == actual {
        return true;
    }
    let expected_cols: BTreeSet<&str> = schema.column_names().into_iter().collect();
    let actual_cols: BTreeSet<&str> = batch.columns.iter().map(String::as_str).collect();
    let missing: Vec<&&str> = expected_cols.difference(&actual_cols).collect();
    let extra: Vec<&&str> = actual_cols.difference(&expected_cols).collect();
    if !missing.is_empty() {
        tracing::error!(?missing, "Missing columns");
    }
    if !extra.is_empty() {
        tracing::error!(?extra, "Extra columns");
    }
    false
}

/// Every declared numerical column must be present and numerically typed.
pub fn validate_numerical_columns(batch: &DataBatch, schema: &Schema) -> Vec<ColumnIssue> {
    let mut issues = Vec::new();
    for col in &schema.numerical_columns {
        match batch.column_index(col) {
            None => issues.push(ColumnIssue::Missing(col.clone())),
            Some(idx) if !batch.is_numeric_column(idx) => {
                issues.push(ColumnIssue::NonNumeric(col.clone()))
            }
            Some(_) => {}
        }
    }
    issues
}

/// Compare every numerically typed column of `base` against `current`.
///
/// A column drifts when the KS p-value is at or below `threshold`. Columns
/// with no finite values on either side are reported as skipped.
pub fn detect_drift(base: &DataBatch, current: &DataBatch, threshold: f64) -> DriftReport {
    let mut report = DriftReport::default();
    for (idx, column) in base.columns.iter().enumerate() {
        if !base.is_numeric_column(idx) {
            continue;
        }
        let Some(cur_idx) = current.column_index(column) else {
            report
                .columns
                .insert(column.clone(), ColumnDrift::skipped("column absent from current data"));
            continue;
        };
        let (Ok(d1), Ok(d2)) = (base.numeric_column(idx), current.numeric_column(cur_idx)) else {
            report
                .columns
                .insert(column.clone(), ColumnDrift::skipped("non-numeric values in current data"));
            continue;
        };
        let (d1, d2) = (sanitize(&d1), sanitize(&d2));
        let entry = match ks_two_sample(&d1, &d2) {
            Some(result) => ColumnDrift::Tested {
                p_value: result.p_value,
                drift_status: result.p_value <= threshold,
            },
            None => ColumnDrift::skipped("empty data"),
        };
        report.columns.insert(column.clone(), entry);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batch::Cell;

    fn schema(cols: &[&str], numerical: &[&str]) -> Schema {
        let mut yaml = String::from("columns:\n");
        for c in cols {
            yaml.push_str(&format!("  {c}: int64\n"));
        }
        yaml.push_str("numerical_columns:\n");
        for c in numerical {
            yaml.push_str(&format!("  - {c}\n"));
        }
        Schema::parse(&yaml).unwrap()
    }

    fn batch(csv: &str) -> DataBatch {
        DataBatch::from_csv_str(csv).unwrap()
    }

    #[test]
    fn test_column_count_ignores_order() {
        let s = schema(&["a", "b", "c"], &[]);
        assert!(validate_column_count(&batch("c,a,b\n1,2,3\n"), &s));
        assert!(validate_column_count(&batch("x,y,z\n1,2,3\n"), &s));
        assert!(!validate_column_count(&batch("a,b\n1,2\n"), &s));
    }

    #[test]
    fn test_numerical_column_issues() {
        let s = schema(&["a", "b", "c"], &["a", "b", "c"]);
        let issues = validate_numerical_columns(&batch("a,b\n1,x\n"), &s);
        assert_eq!(
            issues,
            vec![
                ColumnIssue::NonNumeric("b".into()),
                ColumnIssue::Missing("c".into())
            ]
        );
    }

    #[test]
    fn test_drift_identical_distributions_pass() {
        let csv = "a,b\n1,0\n-1,1\n0,1\n1,0\n-1,0\n";
        let report = detect_drift(&batch(csv), &batch(csv), 0.05);
        assert!(report.passed());
        assert_eq!(report.columns.len(), 2);
        assert!(report.columns.values().all(|d| !d.drifted()));
    }

    #[test]
    fn test_drift_report_follows_base_column_order() {
        let csv = "z,a,m\n1,0,1\n-1,1,0\n";
        let report = detect_drift(&batch(csv), &batch(csv), 0.05);
        let names: Vec<&str> = report.columns.keys().map(String::as_str).collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn test_drift_skips_empty_columns_and_text() {
        let base = batch("a,b,c\n,x,1\n,y,2\n");
        let current = batch("a,b,c\n,x,1\n,y,2\n");
        let report = detect_drift(&base, &current, 0.05);
        assert!(report.columns["a"].is_skipped());
        assert!(!report.columns.contains_key("b"));
        assert!(!report.columns["c"].is_skipped());
        assert!(report.passed());
    }

    #[test]
    fn test_drift_detects_shift() {
        let rows = |offset: f64| -> DataBatch {
            DataBatch::new(
                vec!["v".into()],
                (0..100)
                    .map(|i| vec![Cell::Number(offset + i as f64)])
                    .collect(),
            )
        };
        let report = detect_drift(&rows(0.0), &rows(1000.0), 0.05);
        assert!(!report.passed());
        assert_eq!(report.drifted_columns(), vec!["v"]);
    }

    #[test]
    fn test_drift_infinities_are_sanitized() {
        let base = batch("v\ninf\n-inf\n");
        let current = batch("v\n1\n2\n");
        let report = detect_drift(&base, &current, 0.05);
        assert!(report.columns["v"].is_skipped());
    }
}
