//! Data transformation: nearest-neighbor imputation fitted on training features.
//!
//! The fitted [`Preprocessor`] is persisted on its own so inference can apply
//! exactly the training-time transform without refitting.

use crate::artifacts::{DataTransformationArtifact, DataValidationArtifact};
use crate::config::DataTransformationConfig;
use crate::data::arrays::save_array;
use crate::data::batch::DataBatch;
use crate::data::schema::Schema;
use crate::error::MlError;
use ndarray::{Array1, Array2, Axis, concatenate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Nearest-neighbor imputer. Missing entries are NaN on input.
///
/// Distances use the NaN-aware Euclidean form: squared differences over the
/// coordinates present in both rows, scaled by `n_features / n_present`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnImputer {
    pub n_neighbors: usize,
    /// Training rows captured at fit time; `None` marks a missing value.
    fit_rows: Vec<Vec<Option<f64>>>,
    /// Fallback when no donor row has the feature.
    column_means: Vec<f64>,
}

impl KnnImputer {
    /// Fit on training features only.
    pub fn fit(x: &Array2<f64>, n_neighbors: usize) -> Result<Self, MlError> {
        if n_neighbors == 0 {
            return Err(MlError::transformation("n_neighbors must be > 0"));
        }
        if x.nrows() == 0 {
            return Err(MlError::transformation("cannot fit imputer on zero rows"));
        }
        let mut column_means = Vec::with_capacity(x.ncols());
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            if present.is_empty() {
                return Err(MlError::transformation(format!(
                    "feature {j} has no values in the training split; transformed width would not match the schema"
                )));
            }
            column_means.push(present.iter().sum::<f64>() / present.len() as f64);
        }
        let fit_rows = x
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .map(|v| if v.is_nan() { None } else { Some(*v) })
                    .collect()
            })
            .collect();
        Ok(Self {
            n_neighbors,
            fit_rows,
            column_means,
        })
    }

    pub fn n_features(&self) -> usize {
        self.column_means.len()
    }

    /// Fill missing entries. Rows without missing values pass through unchanged.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, MlError> {
        if x.ncols() != self.n_features() {
            return Err(MlError::transformation(format!(
                "imputer fitted on {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        let mut out = x.clone();
        for (i, row) in x.rows().into_iter().enumerate() {
            let missing: Vec<usize> = (0..row.len()).filter(|&j| row[j].is_nan()).collect();
            if missing.is_empty() {
                continue;
            }
            let row = row.to_vec();
            let distances: Vec<Option<f64>> = self
                .fit_rows
                .iter()
                .map(|donor| self.distance(&row, donor))
                .collect();
            for j in missing {
                out[[i, j]] = self.impute_one(j, &distances);
            }
        }
        Ok(out)
    }

    fn distance(&self, row: &[f64], donor: &[Option<f64>]) -> Option<f64> {
        let mut sum = 0.0;
        let mut present = 0usize;
        for (a, b) in row.iter().zip(donor) {
            if let (false, Some(b)) = (a.is_nan(), b) {
                sum += (a - b).powi(2);
                present += 1;
            }
        }
        if present == 0 {
            return None;
        }
        Some((sum * self.n_features() as f64 / present as f64).sqrt())
    }

    fn impute_one(&self, feature: usize, distances: &[Option<f64>]) -> f64 {
        let mut donors: Vec<(f64, usize, f64)> = self
            .fit_rows
            .iter()
            .enumerate()
            .filter_map(|(idx, donor)| {
                let value = donor[feature]?;
                let dist = distances[idx]?;
                Some((dist, idx, value))
            })
            .collect();
        if donors.is_empty() {
            return self.column_means[feature];
        }
        donors.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let take = donors.len().min(self.n_neighbors);
        donors[..take].iter().map(|d| d.2).sum::<f64>() / take as f64
    }
}

/// The fitted transformer shipped with the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    /// Feature column names in matrix order.
    pub feature_columns: Vec<String>,
    pub imputer: KnnImputer,
}

impl Preprocessor {
    pub fn fit(
        feature_columns: Vec<String>,
        x: &Array2<f64>,
        n_neighbors: usize,
    ) -> Result<Self, MlError> {
        if feature_columns.len() != x.ncols() {
            return Err(MlError::transformation(format!(
                "{} feature names for {} feature columns",
                feature_columns.len(),
                x.ncols()
            )));
        }
        Ok(Self {
            imputer: KnnImputer::fit(x, n_neighbors)?,
            feature_columns,
        })
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, MlError> {
        self.imputer.transform(x)
    }

    /// Select this preprocessor's feature columns from a batch, by name.
    pub fn feature_matrix(&self, batch: &DataBatch) -> Result<Array2<f64>, MlError> {
        feature_matrix(batch, &self.feature_columns)
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        crate::persistence::write_json_artifact(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        crate::persistence::read_json_artifact(path)?
            .ok_or_else(|| MlError::model(format!("preprocessor not found at {}", path.display())))
    }
}

/// Build a feature matrix from named columns. Missing cells become NaN.
pub fn feature_matrix(batch: &DataBatch, columns: &[String]) -> Result<Array2<f64>, MlError> {
    let mut data = Vec::with_capacity(batch.row_count() * columns.len());
    let mut indices = Vec::with_capacity(columns.len());
    for col in columns {
        let idx = batch
            .column_index(col)
            .ok_or_else(|| MlError::transformation(format!("missing feature column '{col}'")))?;
        indices.push(idx);
    }
    let values: Vec<Vec<f64>> = indices
        .iter()
        .map(|&idx| batch.numeric_column(idx))
        .collect::<Result<_, _>>()?;
    for i in 0..batch.row_count() {
        for column in &values {
            data.push(column[i]);
        }
    }
    Array2::from_shape_vec((batch.row_count(), columns.len()), data)
        .map_err(|e| MlError::transformation(format!("bad feature matrix shape: {e}")))
}

/// Binary target vector; `-1` labels map to `0`.
pub fn target_vector(batch: &DataBatch, target: &str) -> Result<Array1<f64>, MlError> {
    let idx = batch
        .column_index(target)
        .ok_or_else(|| MlError::transformation(format!("target column '{target}' not found")))?;
    let values = batch.numeric_column(idx)?;
    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            if v.is_nan() {
                Err(MlError::transformation(format!(
                    "target '{target}' is missing in row {row}"
                )))
            } else if v == -1.0 {
                Ok(0.0)
            } else {
                Ok(v)
            }
        })
        .collect()
}

/// Transformation stage.
pub struct DataTransformation {
    config: DataTransformationConfig,
    validation_artifact: DataValidationArtifact,
}

impl DataTransformation {
    pub fn new(config: DataTransformationConfig, validation_artifact: DataValidationArtifact) -> Self {
        Self {
            config,
            validation_artifact,
        }
    }

    /// Feature count the schema implies: every declared column except the target.
    fn expected_feature_count(&self) -> Result<usize, MlError> {
        let schema = Schema::load(&self.config.schema_path)?;
        let target_declared = usize::from(schema.contains(&self.config.target_column));
        Ok(schema.column_count() - target_declared)
    }

    pub fn initiate_data_transformation(&self) -> Result<DataTransformationArtifact, MlError> {
        let train = DataBatch::read_csv(&self.validation_artifact.valid_train_file_path)?;
        let test = DataBatch::read_csv(&self.validation_artifact.valid_test_file_path)?;
        let target = self.config.target_column.as_str();

        let feature_columns: Vec<String> = train
            .columns
            .iter()
            .filter(|c| c.as_str() != target)
            .cloned()
            .collect();
        let expected = self.expected_feature_count()?;
        if feature_columns.len() != expected {
            return Err(MlError::transformation(format!(
                "schema implies {expected} features, training split has {}",
                feature_columns.len()
            )));
        }

        let x_train = feature_matrix(&train, &feature_columns)?;
        let x_test = feature_matrix(&test, &feature_columns)?;
        let y_train = target_vector(&train, target)?;
        let y_test = target_vector(&test, target)?;

        let preprocessor =
            Preprocessor::fit(feature_columns, &x_train, self.config.n_neighbors)?;
        let x_train = preprocessor.transform(&x_train)?;
        let x_test = preprocessor.transform(&x_test)?;
        for (split, x) in [("train", &x_train), ("test", &x_test)] {
            if x.ncols() != expected {
                return Err(MlError::transformation(format!(
                    "transformed {split} features have {} columns, expected {expected}",
                    x.ncols()
                )));
            }
        }

        let train_arr = with_target(&x_train, &y_train)?;
        let test_arr = with_target(&x_test, &y_test)?;
        save_array(&self.config.transformed_train_file_path, &train_arr)?;
        save_array(&self.config.transformed_test_file_path, &test_arr)?;
        preprocessor.save(&self.config.transformed_object_file_path)?;

        tracing::info!(
            train_rows = train_arr.nrows(),
            test_rows = test_arr.nrows(),
            features = expected,
            "Transformed arrays persisted"
        );

        Ok(DataTransformationArtifact {
            transformed_object_file_path: self.config.transformed_object_file_path.clone(),
            transformed_train_file_path: self.config.transformed_train_file_path.clone(),
            transformed_test_file_path: self.config.transformed_test_file_path.clone(),
        })
    }
}

/// Append the target as the last column.
fn with_target(x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>, MlError> {
    let y = y.view().insert_axis(Axis(1));
    concatenate(Axis(1), &[x.view(), y])
        .map_err(|e| MlError::transformation(format!("cannot append target: {e}")))
}
