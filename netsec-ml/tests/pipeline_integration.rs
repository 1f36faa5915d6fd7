//! End-to-end runs of the training pipeline against an in-memory record store.

use netsec_ml::artifacts::{DataIngestionArtifact, DataValidationArtifact};
use netsec_ml::config::{DataValidationConfig, TrainingPipelineConfig};
use netsec_ml::data::validate::DataValidation;
use netsec_ml::data::{ColumnDrift, DataBatch, DriftReport};
use netsec_ml::training::tracking::{MlflowTracker, NoopTracker};
use netsec_ml::{
    BatchPredictor, ErrorKind, ExperimentTracker, MemoryStore, PipelineSettings, Record,
    RecordStore, Stage, TrainingPipeline,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FEATURES: [&str; 5] = [
    "having_IP_Address",
    "URL_Length",
    "SSLfinal_State",
    "Domain_registration_length",
    "popUpWindow",
];

fn write_schema(dir: &Path, columns: &[&str]) -> std::path::PathBuf {
    let mut yaml = String::from("columns:\n");
    for c in columns {
        yaml.push_str(&format!("  - {c}: int64\n"));
    }
    yaml.push_str("numerical_columns:\n");
    for c in columns {
        yaml.push_str(&format!("  - {c}\n"));
    }
    let path = dir.join("data_schema").join("schema.yaml");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, yaml).unwrap();
    path
}

fn settings(dir: &Path) -> PipelineSettings {
    let mut columns: Vec<&str> = FEATURES.to_vec();
    columns.push("Result");
    let mut settings = PipelineSettings::default();
    settings.schema_path = write_schema(dir, &columns);
    settings.artifact_root = dir.join("Artifacts");
    settings.final_model_dir = dir.join("final_model");
    settings.prediction_output_dir = dir.join("prediction_output");
    settings.trainer.cv_folds = 2;
    settings
}

/// Phishing-style records with values in {-1, 0, 1}; the label follows the
/// first two features, with a few `na` cells.
fn records(n: usize, single_class: bool) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let mut record = Record::new();
            record.insert("_id".into(), serde_json::json!(format!("id{i}")));
            let mut values = Vec::new();
            for (j, name) in FEATURES.iter().enumerate() {
                let v = ((i * (j + 3) + j) % 3) as i64 - 1;
                values.push(v);
                if j == 2 && i % 10 == 0 {
                    record.insert((*name).into(), serde_json::json!("na"));
                } else {
                    record.insert((*name).into(), serde_json::json!(v));
                }
            }
            let label = if single_class || values[0] + values[1] >= 0 {
                1
            } else {
                -1
            };
            record.insert("Result".into(), serde_json::json!(label));
            record
        })
        .collect()
}

fn pipeline(
    settings: PipelineSettings,
    records: Vec<Record>,
    tracker: Arc<dyn ExperimentTracker>,
) -> TrainingPipeline {
    let store = MemoryStore::new().with_collection(
        &settings.store.database,
        &settings.store.collection,
        records,
    );
    TrainingPipeline::new(settings, Arc::new(store), tracker)
}

#[tokio::test]
async fn test_full_pipeline_packages_and_serves_model() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let final_model_dir = settings.final_model_dir.clone();
    let output_dir = settings.prediction_output_dir.clone();
    let pipeline = pipeline(settings, records(150, false), Arc::new(NoopTracker));

    let artifact = pipeline.run_pipeline().await.unwrap();
    assert!(artifact.trained_model_file_path.exists());
    assert!(final_model_dir.join("model.json").exists());
    assert!(final_model_dir.join("preprocessor.json").exists());
    assert_eq!(artifact.candidate_reports.len(), 5);
    assert!(artifact.tracking_error.is_none());
    assert!(artifact.test_metric_artifact.f1_score > 0.5);

    let run_dir = &pipeline.run_config().artifact_dir;
    assert!(run_dir.join("data_ingestion/feature_store/phishing_data.csv").exists());
    assert!(run_dir.join("data_validation/drift_report/report.yaml").exists());
    assert!(run_dir.join("data_transformation/transformed/train.arr").exists());

    let upload = dir.path().join("upload.csv");
    std::fs::write(
        &upload,
        "having_IP_Address,URL_Length,SSLfinal_State,Domain_registeration_length,popUpWidnow\n\
         1,1,0,1,-1\n-1,-1,1,0,0\n1,0,na,1,1\n",
    )
    .unwrap();
    let summary = BatchPredictor::from_dir(&final_model_dir)
        .unwrap()
        .predict_csv(&upload, &output_dir)
        .unwrap();
    assert_eq!(summary.prediction_count, 3);
    let written = DataBatch::read_csv(&summary.output_path).unwrap();
    assert_eq!(written.columns.last().map(String::as_str), Some("predicted_column"));
}

#[test]
fn test_validation_without_drift_reports_every_column() {
    let dir = TempDir::new().unwrap();
    let columns = ["c1", "c2", "c3", "c4", "c5"];
    let mut settings = PipelineSettings::default();
    settings.schema_path = write_schema(dir.path(), &columns);
    settings.artifact_root = dir.path().join("Artifacts");

    let mut csv = columns.join(",");
    csv.push('\n');
    for i in 0..60 {
        let row: Vec<String> = (0..5).map(|j| ((i + j) % 4).to_string()).collect();
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    let train = dir.path().join("train.csv");
    let test = dir.path().join("test.csv");
    std::fs::write(&train, &csv).unwrap();
    std::fs::write(&test, &csv).unwrap();

    let run = TrainingPipelineConfig::now(&settings);
    let config = DataValidationConfig::new(&run, &settings);
    let report_path = config.drift_report_file_path.clone();
    let artifact = DataValidation::new(
        config,
        DataIngestionArtifact {
            trained_file_path: train,
            test_file_path: test,
        },
    )
    .unwrap()
    .initiate_data_validation()
    .unwrap();

    assert!(artifact.validation_status);
    let report: DriftReport =
        serde_yaml::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report.columns.len(), 5);
    for drift in report.columns.values() {
        assert!(matches!(
            drift,
            ColumnDrift::Tested {
                drift_status: false,
                ..
            }
        ));
    }
}

#[tokio::test]
async fn test_single_class_target_fails_training_without_model() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let final_model_dir = settings.final_model_dir.clone();
    let pipeline = pipeline(settings, records(80, true), Arc::new(NoopTracker));

    let err = pipeline.run_pipeline().await.unwrap_err();
    assert_eq!(err.stage, Stage::Training);
    assert_eq!(err.kind(), ErrorKind::Training);
    let trained = pipeline
        .run_config()
        .artifact_dir
        .join("model_trainer/trained_model/model.json");
    assert!(!trained.exists());
    assert!(!final_model_dir.join("model.json").exists());
}

#[tokio::test]
async fn test_unreachable_tracker_does_not_fail_training() {
    let baseline_dir = TempDir::new().unwrap();
    let baseline = pipeline(
        settings(baseline_dir.path()),
        records(120, false),
        Arc::new(NoopTracker),
    )
    .run_pipeline()
    .await
    .unwrap();

    let dir = TempDir::new().unwrap();
    let tracker = MlflowTracker::new(
        "http://127.0.0.1:1",
        "networksecurity",
        None,
        Duration::from_secs(2),
    )
    .unwrap();
    let artifact = pipeline(settings(dir.path()), records(120, false), Arc::new(tracker))
        .run_pipeline()
        .await
        .unwrap();

    assert!(artifact.tracking_error.is_some());
    assert!(artifact.trained_model_file_path.exists());
    assert_eq!(artifact.model_family, baseline.model_family);
    let (a, b) = (artifact.test_metric_artifact, baseline.test_metric_artifact);
    assert!((a.f1_score - b.f1_score).abs() < 1e-6);
    assert!((a.precision_score - b.precision_score).abs() < 1e-6);
    assert!((a.recall_score - b.recall_score).abs() < 1e-6);
}

#[tokio::test]
async fn test_model_selection_is_reproducible() {
    let mut results = Vec::new();
    for _ in 0..2 {
        let dir = TempDir::new().unwrap();
        let artifact = pipeline(settings(dir.path()), records(100, false), Arc::new(NoopTracker))
            .run_pipeline()
            .await
            .unwrap();
        results.push(artifact);
    }
    assert_eq!(results[0].model_family, results[1].model_family);
    for (a, b) in results[0]
        .candidate_reports
        .iter()
        .zip(&results[1].candidate_reports)
    {
        assert_eq!(a.family, b.family);
        assert!((a.test_metric.f1_score - b.test_metric.f1_score).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_unreachable_store_fails_ingestion() {
    let dir = TempDir::new().unwrap();
    let pipeline = TrainingPipeline::new(
        settings(dir.path()),
        Arc::new(MemoryStore::unreachable()),
        Arc::new(NoopTracker),
    );
    let err = pipeline.run_pipeline().await.unwrap_err();
    assert_eq!(err.stage, Stage::Ingestion);
    assert_eq!(err.kind(), ErrorKind::Ingestion);
}

#[tokio::test]
async fn test_missing_schema_fails_before_any_stage() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(dir.path());
    settings.schema_path = dir.path().join("missing.yaml");
    let pipeline = pipeline(settings, records(40, false), Arc::new(NoopTracker));
    let err = pipeline.run_pipeline().await.unwrap_err();
    assert_eq!(err.stage, Stage::Setup);
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!pipeline.run_config().artifact_dir.exists());
}

#[tokio::test]
async fn test_structural_mismatch_fails_validation() {
    let dir = TempDir::new().unwrap();
    let mut records = records(60, false);
    for record in &mut records {
        record.remove("popUpWindow");
    }
    let pipeline = pipeline(settings(dir.path()), records, Arc::new(NoopTracker));
    let err = pipeline.run_pipeline().await.unwrap_err();
    assert_eq!(err.stage, Stage::Validation);
    assert_eq!(err.kind(), ErrorKind::Validation);
    let message = std::error::Error::source(&err).unwrap().to_string();
    assert!(message.contains("Train"));
    assert!(message.contains("Test"));
}

#[test]
fn test_extra_feature_column_fails_transformation() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(settings(dir.path()), Vec::new(), Arc::new(NoopTracker));

    let mut header: Vec<&str> = FEATURES.to_vec();
    header.push("Favicon");
    header.push("Result");
    let mut csv = header.join(",");
    csv.push('\n');
    for i in 0..12 {
        let row: Vec<String> = (0..header.len())
            .map(|j| if (i + j) % 2 == 0 { "1" } else { "-1" }.to_string())
            .collect();
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    let train = dir.path().join("valid_train.csv");
    let test = dir.path().join("valid_test.csv");
    std::fs::write(&train, &csv).unwrap();
    std::fs::write(&test, &csv).unwrap();

    let err = pipeline
        .start_data_transformation(DataValidationArtifact {
            validation_status: true,
            valid_train_file_path: train,
            valid_test_file_path: test,
            invalid_train_file_path: None,
            invalid_test_file_path: None,
            drift_report_file_path: dir.path().join("report.yaml"),
        })
        .unwrap_err();
    assert_eq!(err.stage, Stage::Transformation);
    assert_eq!(err.kind(), ErrorKind::Transformation);
    let transformation_dir = pipeline.run_config().artifact_dir.join("data_transformation");
    assert!(!transformation_dir
        .join("transformed_object/preprocessor.json")
        .exists());
    assert!(!transformation_dir.join("transformed/train.arr").exists());
}

#[tokio::test]
async fn test_pipeline_closes_store_after_ingestion() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let store = Arc::new(MemoryStore::new().with_collection(
        &settings.store.database,
        &settings.store.collection,
        records(60, false),
    ));
    assert!(!store.is_healthy().await);
    let pipeline = TrainingPipeline::new(settings, store.clone(), Arc::new(NoopTracker));

    pipeline.start_data_ingestion().await.unwrap();
    assert!(!store.is_healthy().await);
    // A second ingestion reconnects on its own.
    pipeline.start_data_ingestion().await.unwrap();
    assert!(!store.is_healthy().await);
}
