//! The packaged inference object: fitted preprocessor plus selected model.

use crate::data::batch::DataBatch;
use crate::data::transform::Preprocessor;
use crate::error::MlError;
use crate::models::{CandidateModel, Classifier, ModelFamily};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Callers hand raw features to [`NetworkModel::predict`]; imputation happens
/// inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkModel {
    pub preprocessor: Preprocessor,
    pub model: CandidateModel,
}

impl NetworkModel {
    pub fn new(preprocessor: Preprocessor, model: CandidateModel) -> Self {
        Self {
            preprocessor,
            model,
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.preprocessor.feature_columns
    }

    /// Predict 0/1 labels for raw feature rows in preprocessor column order.
    pub fn predict(&self, raw: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        let features = self.preprocessor.transform(raw)?;
        self.model.predict(&features)
    }

    /// Predict for a tabular batch, selecting feature columns by name.
    pub fn predict_batch(&self, batch: &DataBatch) -> Result<Array1<f64>, MlError> {
        let raw = self
            .preprocessor
            .feature_matrix(batch)
            .map_err(|e| MlError::model(format!("input does not match the model: {e}")))?;
        self.predict(&raw)
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        crate::persistence::write_json_artifact(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        crate::persistence::read_json_artifact(path)?
            .ok_or_else(|| MlError::model(format!("no packaged model at {}", path.display())))
    }
}
