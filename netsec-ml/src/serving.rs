//! Batch prediction over CSV files with the packaged final model.

use crate::data::batch::{Cell, DataBatch};
use crate::error::MlError;
use crate::training::estimator::NetworkModel;
use crate::training::trainer::FINAL_MODEL_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Column appended to prediction output.
pub const PREDICTION_COLUMN: &str = "predicted_column";
pub const PREDICTION_FILE_NAME: &str = "output.csv";

/// Historical misspellings in upstream uploads, mapped to the trained names.
pub const COLUMN_CORRECTIONS: [(&str, &str); 2] = [
    ("Domain_registeration_length", "Domain_registration_length"),
    ("popUpWidnow", "popUpWindow"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub prediction_count: usize,
    pub positive_predictions: usize,
    pub output_path: PathBuf,
}

pub struct BatchPredictor {
    model: NetworkModel,
}

impl BatchPredictor {
    pub fn new(model: NetworkModel) -> Self {
        Self { model }
    }

    /// Load `<dir>/model.json`.
    pub fn from_dir(final_model_dir: &Path) -> Result<Self, MlError> {
        Ok(Self::new(NetworkModel::load(
            &final_model_dir.join(FINAL_MODEL_FILE_NAME),
        )?))
    }

    pub fn model(&self) -> &NetworkModel {
        &self.model
    }

    /// Predict every row of `input` and write an annotated copy to
    /// `<output_dir>/output.csv`.
    pub fn predict_csv(&self, input: &Path, output_dir: &Path) -> Result<PredictionSummary, MlError> {
        let is_csv = input
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return Err(MlError::model(format!(
                "expected a .csv file, got {}",
                input.display()
            )));
        }

        let mut batch = DataBatch::read_csv(input)?;
        batch.normalize_column_names();
        for (from, to) in COLUMN_CORRECTIONS {
            batch.rename_column(from, to);
        }

        let predictions = self.model.predict_batch(&batch)?;
        let positive_predictions = predictions.iter().filter(|p| **p == 1.0).count();
        batch.push_column(
            PREDICTION_COLUMN,
            predictions.iter().map(|p| Cell::Number(*p)).collect(),
        )?;

        let output_path = output_dir.join(PREDICTION_FILE_NAME);
        batch.write_csv(&output_path)?;
        tracing::info!(
            rows = predictions.len(),
            positive = positive_predictions,
            output = %output_path.display(),
            "Batch prediction written"
        );
        Ok(PredictionSummary {
            prediction_count: predictions.len(),
            positive_predictions,
            output_path,
        })
    }
}
