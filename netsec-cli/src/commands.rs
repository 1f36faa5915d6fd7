//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use netsec_ml::config::CONFIG_FILE_NAME;
use netsec_ml::data::DataBatch;
use netsec_ml::{
    BatchPredictor, PipelineSettings, RecordStore, SqliteStore, TrainingPipeline, load_settings,
};
use std::path::Path;
use std::time::Duration;

pub(crate) async fn handle_command(
    command: Commands,
    workspace: &Path,
    config: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config),
        Commands::Train => {
            let settings = settings(workspace, config)?;
            let pipeline = TrainingPipeline::from_settings(settings)?;
            tracing::info!(
                artifact_dir = %pipeline.run_config().artifact_dir.display(),
                "Training run requested"
            );
            let artifact = pipeline.run_pipeline().await?;
            println!("{}", serde_json::to_string_pretty(&artifact)?);
            if let Some(err) = &artifact.tracking_error {
                eprintln!("Warning: experiment tracking failed: {err}");
            }
            Ok(())
        }
        Commands::Predict { input, output_dir } => {
            let settings = settings(workspace, config)?;
            let output_dir = output_dir.unwrap_or_else(|| settings.prediction_output_dir.clone());
            let predictor = BatchPredictor::from_dir(&settings.final_model_dir)?;
            let summary = predictor.predict_csv(&input, &output_dir)?;
            println!(
                "{} rows predicted, {} positive. Output: {}",
                summary.prediction_count,
                summary.positive_predictions,
                summary.output_path.display()
            );
            Ok(())
        }
        Commands::PushData { input } => {
            let settings = settings(workspace, config)?;
            let inserted = push_data(&settings, &input).await?;
            println!(
                "Inserted {inserted} records into {}.{}",
                settings.store.database, settings.store.collection
            );
            Ok(())
        }
        Commands::Health => {
            let settings = settings(workspace, config)?;
            let store = SqliteStore::new(&settings.store.path);
            let timeout = Duration::from_secs(settings.store.timeout_secs.max(1));
            let connected = tokio::time::timeout(timeout, store.connect()).await;
            let healthy = matches!(connected, Ok(Ok(()))) && store.is_healthy().await;
            let _ = store.close().await;
            if healthy {
                println!("Record store at {} is healthy", store.location());
                Ok(())
            } else {
                anyhow::bail!("Record store at {} is unreachable", store.location())
            }
        }
    }
}

fn settings(workspace: &Path, config: Option<&Path>) -> anyhow::Result<PipelineSettings> {
    load_settings(workspace, config).map_err(|e| anyhow::anyhow!("Configuration error: {e}"))
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&PipelineSettings::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let settings = settings(workspace, config)?;
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

/// Read a CSV file and insert every row as one record.
async fn push_data(settings: &PipelineSettings, input: &Path) -> anyhow::Result<usize> {
    let batch = DataBatch::read_csv(input)?;
    let records = batch.to_records();
    let store = SqliteStore::new(&settings.store.path);
    store.connect().await?;
    let inserted = store
        .insert_many(&settings.store.database, &settings.store.collection, records)
        .await;
    store.close().await?;
    Ok(inserted?)
}
