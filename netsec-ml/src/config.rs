//! Configuration for the training pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> `netsec.toml` -> environment.
//! `PipelineSettings` is the user-facing document; `TrainingPipelineConfig` and the
//! per-stage configs derived from it pin every file path for one run.

use crate::error::MlError;
use chrono::{DateTime, Local};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the workspace-level configuration file.
pub const CONFIG_FILE_NAME: &str = "netsec.toml";

/// Timestamp layout used to namespace each run's artifact directory.
pub const RUN_TIMESTAMP_FORMAT: &str = "%m_%d_%Y_%H_%M_%S";

/// Top-level pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Root under which every run creates its timestamped directory.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
    /// Declarative column schema consumed by validation and transformation.
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
    /// Label column separated from the features during transformation.
    #[serde(default = "default_target_column")]
    pub target_column: String,
    /// Stable location holding the latest transformer and model for serving.
    #[serde(default = "default_final_model_dir")]
    pub final_model_dir: PathBuf,
    #[serde(default = "default_prediction_output_dir")]
    pub prediction_output_dir: PathBuf,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub transformation: TransformationSettings,
    #[serde(default)]
    pub trainer: TrainerSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            artifact_root: default_artifact_root(),
            schema_path: default_schema_path(),
            target_column: default_target_column(),
            final_model_dir: default_final_model_dir(),
            prediction_output_dir: default_prediction_output_dir(),
            store: StoreSettings::default(),
            ingestion: IngestionSettings::default(),
            validation: ValidationSettings::default(),
            transformation: TransformationSettings::default(),
            trainer: TrainerSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }
}

fn default_pipeline_name() -> String {
    "NetworkSecurity".to_string()
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("Artifacts")
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("data_schema/schema.yaml")
}

fn default_target_column() -> String {
    "Result".to_string()
}

fn default_final_model_dir() -> PathBuf {
    PathBuf::from("final_model")
}

fn default_prediction_output_dir() -> PathBuf {
    PathBuf::from("prediction_output")
}

/// Source record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite file backing the record store.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Upper bound for any single store call.
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            database: default_database(),
            collection: default_collection(),
            timeout_secs: default_store_timeout(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("network_data/records.db")
}

fn default_database() -> String {
    "AndersonAI".to_string()
}

fn default_collection() -> String {
    "NetworkData".to_string()
}

fn default_store_timeout() -> u64 {
    5
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    /// Fraction of rows assigned to the test split.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            test_ratio: default_test_ratio(),
            seed: default_seed(),
        }
    }
}

fn default_test_ratio() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

/// Validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// A column drifts when the two-sample test p-value is at or below this.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            drift_threshold: default_drift_threshold(),
        }
    }
}

fn default_drift_threshold() -> f64 {
    0.05
}

/// Transformation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationSettings {
    /// Neighbors averaged by the nearest-neighbor imputer.
    #[serde(default = "default_n_neighbors")]
    pub n_neighbors: usize,
}

impl Default for TransformationSettings {
    fn default() -> Self {
        Self {
            n_neighbors: default_n_neighbors(),
        }
    }
}

fn default_n_neighbors() -> usize {
    3
}

/// How ties on test F1 are resolved during model selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Highest precision, then first-seen order.
    #[default]
    Precision,
    /// Highest recall, then first-seen order.
    Recall,
    /// First-seen order only.
    FirstSeen,
}

/// Model trainer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerSettings {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Folds used to score hyperparameter grids; below 2 disables tuning.
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    /// Test F1 below this only produces a warning.
    #[serde(default = "default_expected_score")]
    pub expected_score: f64,
    /// Train/test F1 gap above this only produces a warning.
    #[serde(default = "default_overfitting_threshold")]
    pub overfitting_threshold: f64,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            cv_folds: default_cv_folds(),
            expected_score: default_expected_score(),
            overfitting_threshold: default_overfitting_threshold(),
            tie_break: TieBreak::default(),
        }
    }
}

fn default_cv_folds() -> usize {
    3
}

fn default_expected_score() -> f64 {
    0.6
}

fn default_overfitting_threshold() -> f64 {
    0.05
}

/// Experiment tracking backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBackend {
    #[default]
    None,
    /// Append runs to a local JSON registry.
    Local,
    /// MLflow-compatible REST tracking server.
    Mlflow,
}

/// Experiment tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    #[serde(default)]
    pub backend: TrackingBackend,
    /// Server URI for `mlflow`, registry file for `local`.
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default = "default_experiment")]
    pub experiment: String,
    #[serde(default = "default_tracking_timeout")]
    pub timeout_secs: u64,
    /// Environment variable holding a bearer token for the tracking server.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            backend: TrackingBackend::None,
            uri: None,
            experiment: default_experiment(),
            timeout_secs: default_tracking_timeout(),
            token_env: default_token_env(),
        }
    }
}

fn default_experiment() -> String {
    "networksecurity".to_string()
}

fn default_tracking_timeout() -> u64 {
    10
}

fn default_token_env() -> String {
    "DAGSHUB_TOKEN".to_string()
}

impl PipelineSettings {
    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<(), MlError> {
        let ratio = self.ingestion.test_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(MlError::config(format!(
                "ingestion.test_ratio must be in (0, 1), got {ratio}"
            )));
        }
        let threshold = self.validation.drift_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(MlError::config(format!(
                "validation.drift_threshold must be in (0, 1), got {threshold}"
            )));
        }
        if self.transformation.n_neighbors == 0 {
            return Err(MlError::config("transformation.n_neighbors must be > 0"));
        }
        if self.target_column.trim().is_empty() {
            return Err(MlError::config("target_column must not be empty"));
        }
        if self.tracking.backend != TrackingBackend::None && self.tracking.uri.is_none() {
            return Err(MlError::config(format!(
                "tracking.uri is required for backend {:?}",
                self.tracking.backend
            )));
        }
        Ok(())
    }

    /// Resolve relative paths against `workspace`.
    pub fn rooted_at(mut self, workspace: &Path) -> Self {
        for path in [
            &mut self.artifact_root,
            &mut self.schema_path,
            &mut self.final_model_dir,
            &mut self.prediction_output_dir,
            &mut self.store.path,
        ] {
            if path.is_relative() {
                *path = workspace.join(&*path);
            }
        }
        if self.tracking.backend == TrackingBackend::Local {
            if let Some(uri) = self.tracking.uri.as_mut() {
                if Path::new(uri.as_str()).is_relative() {
                    *uri = workspace.join(&*uri).to_string_lossy().into_owned();
                }
            }
        }
        self
    }
}

/// Load settings: defaults, then `<workspace>/netsec.toml` (or `explicit`), then
/// `NETSEC_`-prefixed environment variables with `__` separating sections
/// (e.g. `NETSEC_TRAINER__CV_FOLDS=5`).
pub fn load_settings(workspace: &Path, explicit: Option<&Path>) -> Result<PipelineSettings, MlError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineSettings::default()));

    let file = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| workspace.join(CONFIG_FILE_NAME));
    if file.exists() {
        figment = figment.merge(Toml::file(&file));
    } else if explicit.is_some() {
        return Err(MlError::config(format!(
            "configuration file not found: {}",
            file.display()
        )));
    }

    figment = figment.merge(Env::prefixed("NETSEC_").split("__"));

    let settings: PipelineSettings = figment
        .extract()
        .map_err(|e| MlError::config(e.to_string()))?;
    settings.validate()?;
    Ok(settings.rooted_at(workspace))
}

/// Run-scoped identity and artifact root. Created once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPipelineConfig {
    pub pipeline_name: String,
    /// `<artifact_root>/<timestamp>`.
    pub artifact_dir: PathBuf,
    pub timestamp: String,
}

impl TrainingPipelineConfig {
    pub fn new(settings: &PipelineSettings, at: DateTime<Local>) -> Self {
        let timestamp = at.format(RUN_TIMESTAMP_FORMAT).to_string();
        Self {
            pipeline_name: settings.pipeline_name.clone(),
            artifact_dir: settings.artifact_root.join(&timestamp),
            timestamp,
        }
    }

    pub fn now(settings: &PipelineSettings) -> Self {
        Self::new(settings, Local::now())
    }
}

/// File layout of the ingestion stage.
#[derive(Debug, Clone)]
pub struct DataIngestionConfig {
    pub ingestion_dir: PathBuf,
    pub feature_store_file_path: PathBuf,
    pub training_file_path: PathBuf,
    pub testing_file_path: PathBuf,
    pub test_ratio: f64,
    pub seed: u64,
    pub database: String,
    pub collection: String,
    pub fetch_timeout_secs: u64,
}

impl DataIngestionConfig {
    pub fn new(run: &TrainingPipelineConfig, settings: &PipelineSettings) -> Self {
        let ingestion_dir = run.artifact_dir.join("data_ingestion");
        let ingested = ingestion_dir.join("ingested");
        Self {
            feature_store_file_path: ingestion_dir
                .join("feature_store")
                .join("phishing_data.csv"),
            training_file_path: ingested.join("train.csv"),
            testing_file_path: ingested.join("test.csv"),
            ingestion_dir,
            test_ratio: settings.ingestion.test_ratio,
            seed: settings.ingestion.seed,
            database: settings.store.database.clone(),
            collection: settings.store.collection.clone(),
            fetch_timeout_secs: settings.store.timeout_secs,
        }
    }
}

/// File layout of the validation stage.
#[derive(Debug, Clone)]
pub struct DataValidationConfig {
    pub validation_dir: PathBuf,
    pub valid_train_file_path: PathBuf,
    pub valid_test_file_path: PathBuf,
    pub drift_report_file_path: PathBuf,
    pub schema_path: PathBuf,
    pub drift_threshold: f64,
}

impl DataValidationConfig {
    pub fn new(run: &TrainingPipelineConfig, settings: &PipelineSettings) -> Self {
        let validation_dir = run.artifact_dir.join("data_validation");
        let validated = validation_dir.join("validated");
        Self {
            valid_train_file_path: validated.join("train.csv"),
            valid_test_file_path: validated.join("test.csv"),
            drift_report_file_path: validation_dir.join("drift_report").join("report.yaml"),
            validation_dir,
            schema_path: settings.schema_path.clone(),
            drift_threshold: settings.validation.drift_threshold,
        }
    }
}

/// File layout of the transformation stage.
#[derive(Debug, Clone)]
pub struct DataTransformationConfig {
    pub transformation_dir: PathBuf,
    pub transformed_train_file_path: PathBuf,
    pub transformed_test_file_path: PathBuf,
    pub transformed_object_file_path: PathBuf,
    pub schema_path: PathBuf,
    pub target_column: String,
    pub n_neighbors: usize,
}

impl DataTransformationConfig {
    pub fn new(run: &TrainingPipelineConfig, settings: &PipelineSettings) -> Self {
        let transformation_dir = run.artifact_dir.join("data_transformation");
        let transformed = transformation_dir.join("transformed");
        Self {
            transformed_train_file_path: transformed.join("train.arr"),
            transformed_test_file_path: transformed.join("test.arr"),
            transformed_object_file_path: transformation_dir
                .join("transformed_object")
                .join("preprocessor.json"),
            transformation_dir,
            schema_path: settings.schema_path.clone(),
            target_column: settings.target_column.clone(),
            n_neighbors: settings.transformation.n_neighbors,
        }
    }
}

/// File layout of the model trainer stage.
#[derive(Debug, Clone)]
pub struct ModelTrainerConfig {
    pub trainer_dir: PathBuf,
    pub trained_model_file_path: PathBuf,
    pub final_model_dir: PathBuf,
    pub seed: u64,
    pub cv_folds: usize,
    pub expected_score: f64,
    pub overfitting_threshold: f64,
    pub tie_break: TieBreak,
}

impl ModelTrainerConfig {
    pub fn new(run: &TrainingPipelineConfig, settings: &PipelineSettings) -> Self {
        let trainer_dir = run.artifact_dir.join("model_trainer");
        Self {
            trained_model_file_path: trainer_dir.join("trained_model").join("model.json"),
            trainer_dir,
            final_model_dir: settings.final_model_dir.clone(),
            seed: settings.trainer.seed,
            cv_folds: settings.trainer.cv_folds,
            expected_score: settings.trainer.expected_score,
            overfitting_threshold: settings.trainer.overfitting_threshold,
            tie_break: settings.trainer.tie_break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_are_valid() {
        let settings = PipelineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.ingestion.test_ratio, 0.2);
        assert_eq!(settings.validation.drift_threshold, 0.05);
        assert_eq!(settings.trainer.tie_break, TieBreak::Precision);
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let mut settings = PipelineSettings::default();
        settings.ingestion.test_ratio = 1.0;
        assert!(matches!(settings.validate(), Err(MlError::Config(_))));
    }

    #[test]
    fn test_tracking_requires_uri() {
        let mut settings = PipelineSettings::default();
        settings.tracking.backend = TrackingBackend::Mlflow;
        assert!(settings.validate().is_err());
        settings.tracking.uri = Some("http://localhost:5000".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_run_paths_are_namespaced_by_timestamp() {
        let settings = PipelineSettings::default();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let run = TrainingPipelineConfig::new(&settings, at);
        assert_eq!(run.timestamp, "03_09_2024_14_05_07");
        assert_eq!(run.artifact_dir, PathBuf::from("Artifacts/03_09_2024_14_05_07"));

        let ingestion = DataIngestionConfig::new(&run, &settings);
        assert!(ingestion.training_file_path.ends_with("data_ingestion/ingested/train.csv"));
        let validation = DataValidationConfig::new(&run, &settings);
        assert!(
            validation
                .drift_report_file_path
                .ends_with("data_validation/drift_report/report.yaml")
        );
        let trainer = ModelTrainerConfig::new(&run, &settings);
        assert!(trainer.trained_model_file_path.starts_with(&run.artifact_dir));
    }

    #[test]
    fn test_load_settings_merges_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "target_column = \"label\"\n[trainer]\ncv_folds = 0\ntie_break = \"first_seen\"\n",
        )
        .unwrap();
        let settings = load_settings(dir.path(), None).unwrap();
        assert_eq!(settings.target_column, "label");
        assert_eq!(settings.trainer.cv_folds, 0);
        assert_eq!(settings.trainer.tie_break, TieBreak::FirstSeen);
        assert_eq!(settings.artifact_root, dir.path().join("Artifacts"));
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_settings(dir.path(), Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(MlError::Config(_))));
    }
}
