//! # netsec-ml: phishing/network-record training pipeline
//!
//! Stages run in a fixed order and talk only through artifacts that name
//! files on disk:
//!
//! 1. **Ingestion** pulls records from a [`RecordStore`] and writes a seeded
//!    train/test split.
//! 2. **Validation** checks both splits against the column schema, then runs a
//!    two-sample KS drift test per numerical column.
//! 3. **Transformation** fits a nearest-neighbor imputer on training features
//!    and persists it with the transformed arrays.
//! 4. **Training** fits five classifier families, selects the best by test F1
//!    and packages it with the imputer as one [`NetworkModel`].
//!
//! [`TrainingPipeline`] sequences the stages; [`BatchPredictor`] serves the
//! packaged model over CSV files.

pub mod artifacts;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod serving;
pub mod training;

pub use artifacts::{
    CandidateReport, DataIngestionArtifact, DataTransformationArtifact, DataValidationArtifact,
    ModelTrainerArtifact,
};
pub use config::{PipelineSettings, TrainingPipelineConfig, load_settings};
pub use data::{MemoryStore, Record, RecordStore, SqliteStore};
pub use error::{ErrorKind, MlError, Stage, StageError};
pub use models::{CandidateModel, Classifier, ModelFamily};
pub use pipeline::TrainingPipeline;
pub use serving::{BatchPredictor, PredictionSummary};
pub use training::{ClassificationMetric, ExperimentTracker, NetworkModel};
