//! Stage artifacts. Each is a plain value naming durable paths; stages hand
//! these to one another instead of the data itself.

use crate::config::TieBreak;
use crate::models::ModelFamily;
use crate::training::metrics::ClassificationMetric;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Output of ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIngestionArtifact {
    pub trained_file_path: PathBuf,
    pub test_file_path: PathBuf,
}

/// Output of validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValidationArtifact {
    /// `true` when no column drifted.
    pub validation_status: bool,
    pub valid_train_file_path: PathBuf,
    pub valid_test_file_path: PathBuf,
    pub invalid_train_file_path: Option<PathBuf>,
    pub invalid_test_file_path: Option<PathBuf>,
    pub drift_report_file_path: PathBuf,
}

/// Output of transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformationArtifact {
    pub transformed_object_file_path: PathBuf,
    pub transformed_train_file_path: PathBuf,
    pub transformed_test_file_path: PathBuf,
}

/// Test-split outcome of one candidate family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub family: ModelFamily,
    pub params: serde_json::Value,
    pub test_metric: ClassificationMetric,
}

/// Terminal artifact of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainerArtifact {
    /// Packaged transformer + model.
    pub trained_model_file_path: PathBuf,
    pub model_family: ModelFamily,
    pub train_metric_artifact: ClassificationMetric,
    pub test_metric_artifact: ClassificationMetric,
    pub tie_break: TieBreak,
    pub candidate_reports: Vec<CandidateReport>,
    /// Set when experiment tracking failed; training itself still succeeded.
    pub tracking_error: Option<String>,
}
