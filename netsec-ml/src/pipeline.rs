//! Training pipeline orchestrator.
//!
//! Runs ingestion, validation, transformation and training in order, handing
//! each stage's artifact to the next. The first failure stops the run and is
//! returned wrapped with its stage; nothing is retried.

use crate::artifacts::{
    DataIngestionArtifact, DataTransformationArtifact, DataValidationArtifact,
    ModelTrainerArtifact,
};
use crate::config::{
    DataIngestionConfig, DataTransformationConfig, DataValidationConfig, ModelTrainerConfig,
    PipelineSettings, TrainingPipelineConfig,
};
use crate::data::ingest::DataIngestion;
use crate::data::schema::Schema;
use crate::data::source::{RecordStore, SqliteStore};
use crate::data::transform::DataTransformation;
use crate::data::validate::DataValidation;
use crate::error::{MlError, Stage, StageContext, StageError};
use crate::training::tracking::{ExperimentTracker, tracker_from_settings};
use crate::training::trainer::ModelTrainer;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

pub struct TrainingPipeline {
    settings: PipelineSettings,
    run: TrainingPipelineConfig,
    store: Arc<dyn RecordStore>,
    tracker: Arc<dyn ExperimentTracker>,
}

impl TrainingPipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn RecordStore>,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Self {
        let run = TrainingPipelineConfig::now(&settings);
        Self {
            settings,
            run,
            store,
            tracker,
        }
    }

    /// Build with the SQLite record store and the configured tracker.
    pub fn from_settings(settings: PipelineSettings) -> Result<Self, StageError> {
        settings.validate().in_stage(Stage::Setup)?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(&settings.store.path));
        let tracker = tracker_from_settings(&settings.tracking).in_stage(Stage::Setup)?;
        Ok(Self::new(settings, store, tracker))
    }

    /// Replace the run identity, e.g. to pin the artifact directory.
    pub fn with_run(mut self, run: TrainingPipelineConfig) -> Self {
        self.run = run;
        self
    }

    pub fn run_config(&self) -> &TrainingPipelineConfig {
        &self.run
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Configuration checks that must pass before any stage runs.
    pub fn preflight(&self) -> Result<(), StageError> {
        self.settings.validate().in_stage(Stage::Setup)?;
        Schema::load(&self.settings.schema_path).in_stage(Stage::Setup)?;
        Ok(())
    }

    pub async fn start_data_ingestion(&self) -> Result<DataIngestionArtifact, StageError> {
        let config = DataIngestionConfig::new(&self.run, &self.settings);
        let timeout = Duration::from_secs(self.settings.store.timeout_secs.max(1));
        let store = Arc::clone(&self.store);
        async move {
            tokio::time::timeout(timeout, store.connect())
                .await
                .map_err(|_| {
                    MlError::ingestion(format!(
                        "connecting to {} timed out after {}s",
                        store.location(),
                        timeout.as_secs()
                    ))
                })?
                .map_err(|e| MlError::ingestion(format!("cannot connect to record store: {e}")))?;
            let result = DataIngestion::new(config, Arc::clone(&store))
                .initiate_data_ingestion()
                .await;
            if let Err(e) = store.close().await {
                tracing::warn!(error = %e, "Closing the record store failed");
            }
            let artifact = result?;
            tracing::info!(?artifact, "Data ingestion completed");
            Ok(artifact)
        }
        .instrument(tracing::info_span!("stage", name = Stage::Ingestion.as_str()))
        .await
        .in_stage(Stage::Ingestion)
    }

    pub fn start_data_validation(
        &self,
        ingestion_artifact: DataIngestionArtifact,
    ) -> Result<DataValidationArtifact, StageError> {
        let _span = tracing::info_span!("stage", name = Stage::Validation.as_str()).entered();
        let config = DataValidationConfig::new(&self.run, &self.settings);
        let artifact = DataValidation::new(config, ingestion_artifact)
            .and_then(|stage| stage.initiate_data_validation())
            .in_stage(Stage::Validation)?;
        if artifact.validation_status {
            tracing::info!(?artifact, "Data validation completed");
        } else {
            tracing::warn!(
                report = %artifact.drift_report_file_path.display(),
                "Data validation completed with drift"
            );
        }
        Ok(artifact)
    }

    pub fn start_data_transformation(
        &self,
        validation_artifact: DataValidationArtifact,
    ) -> Result<DataTransformationArtifact, StageError> {
        let _span = tracing::info_span!("stage", name = Stage::Transformation.as_str()).entered();
        let config = DataTransformationConfig::new(&self.run, &self.settings);
        let artifact = DataTransformation::new(config, validation_artifact)
            .initiate_data_transformation()
            .in_stage(Stage::Transformation)?;
        tracing::info!(?artifact, "Data transformation completed");
        Ok(artifact)
    }

    pub async fn start_model_trainer(
        &self,
        transformation_artifact: DataTransformationArtifact,
    ) -> Result<ModelTrainerArtifact, StageError> {
        let config = ModelTrainerConfig::new(&self.run, &self.settings);
        let trainer = ModelTrainer::new(config, transformation_artifact, Arc::clone(&self.tracker));
        let artifact = trainer
            .initiate_model_trainer()
            .instrument(tracing::info_span!("stage", name = Stage::Training.as_str()))
            .await
            .in_stage(Stage::Training)?;
        tracing::info!(
            family = %artifact.model_family,
            test_f1 = artifact.test_metric_artifact.f1_score,
            "Model training completed"
        );
        Ok(artifact)
    }

    /// Run every stage in order.
    pub async fn run_pipeline(&self) -> Result<ModelTrainerArtifact, StageError> {
        self.preflight()?;
        tracing::info!(
            pipeline = %self.run.pipeline_name,
            artifact_dir = %self.run.artifact_dir.display(),
            "Training pipeline started"
        );
        let ingestion = self.start_data_ingestion().await?;
        let validation = self.start_data_validation(ingestion)?;
        let transformation = self.start_data_transformation(validation)?;
        let trained = self.start_model_trainer(transformation).await?;
        tracing::info!(
            model = %trained.trained_model_file_path.display(),
            "Training pipeline finished"
        );
        Ok(trained)
    }
}
