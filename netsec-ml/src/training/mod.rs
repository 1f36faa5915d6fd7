//! Model training: metrics, candidate selection, packaging and tracking.

pub mod estimator;
pub mod metrics;
pub mod reproducibility;
pub mod tracking;
pub mod trainer;

pub use estimator::NetworkModel;
pub use metrics::{ClassificationMetric, get_classification_score};
pub use tracking::{
    ExperimentTracker, LocalTracker, MlflowTracker, NoopTracker, TrackedRun,
    tracker_from_settings,
};
pub use trainer::ModelTrainer;
