//! Data ingestion: pull raw records from the store, normalize, split and persist.

use crate::artifacts::DataIngestionArtifact;
use crate::config::DataIngestionConfig;
use crate::data::batch::DataBatch;
use crate::data::source::RecordStore;
use crate::error::MlError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel token the source uses for missing values.
pub const NA_TOKEN: &str = "na";

/// Store-internal identifier column dropped on export.
pub const STORE_ID_COLUMN: &str = "_id";

/// Ingestion stage.
pub struct DataIngestion {
    config: DataIngestionConfig,
    store: Arc<dyn RecordStore>,
}

impl DataIngestion {
    pub fn new(config: DataIngestionConfig, store: Arc<dyn RecordStore>) -> Self {
        Self { config, store }
    }

    /// Read the configured collection into a batch.
    pub async fn export_collection_as_batch(&self) -> Result<DataBatch, MlError> {
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs.max(1));
        let fetch = self
            .store
            .fetch(&self.config.database, &self.config.collection);
        let records = tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| {
                MlError::ingestion(format!(
                    "fetching {}.{} from {} timed out after {}s",
                    self.config.database,
                    self.config.collection,
                    self.store.location(),
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                MlError::ingestion(format!(
                    "cannot read {}.{} from {}: {e}",
                    self.config.database,
                    self.config.collection,
                    self.store.location()
                ))
            })?;

        if records.is_empty() {
            return Err(MlError::ingestion(format!(
                "collection {}.{} returned zero rows",
                self.config.database, self.config.collection
            )));
        }

        let mut batch = DataBatch::from_records(&records);
        batch.drop_column(STORE_ID_COLUMN);
        let replaced = batch.replace_token_with_missing(NA_TOKEN);
        tracing::debug!(
            rows = batch.row_count(),
            columns = batch.column_count(),
            replaced,
            "Collection exported"
        );
        Ok(batch)
    }

    /// Persist the full export as the run's feature store file.
    pub fn export_to_feature_store(&self, batch: &DataBatch) -> Result<(), MlError> {
        batch.write_csv(&self.config.feature_store_file_path)
    }

    /// Split, then persist train and test partitions.
    pub fn split_and_persist(&self, batch: &DataBatch) -> Result<(DataBatch, DataBatch), MlError> {
        let (train, test) = train_test_split(batch, self.config.test_ratio, self.config.seed)?;
        train.write_csv(&self.config.training_file_path)?;
        test.write_csv(&self.config.testing_file_path)?;
        tracing::info!(
            train_rows = train.row_count(),
            test_rows = test.row_count(),
            "Train/test split persisted"
        );
        Ok((train, test))
    }

    pub async fn initiate_data_ingestion(&self) -> Result<DataIngestionArtifact, MlError> {
        let batch = self.export_collection_as_batch().await?;
        self.export_to_feature_store(&batch)?;
        self.split_and_persist(&batch)?;
        Ok(DataIngestionArtifact {
            trained_file_path: self.config.training_file_path.clone(),
            test_file_path: self.config.testing_file_path.clone(),
        })
    }
}

/// Number of test rows for `n` rows at `ratio`, rounded up like the usual
/// `test_size` convention.
pub fn test_size(n: usize, ratio: f64) -> usize {
    ((n as f64) * ratio).ceil() as usize
}

/// Seeded shuffle split. Every row lands in exactly one partition.
pub fn train_test_split(
    batch: &DataBatch,
    test_ratio: f64,
    seed: u64,
) -> Result<(DataBatch, DataBatch), MlError> {
    let n = batch.row_count();
    let n_test = test_size(n, test_ratio);
    if n_test == 0 || n_test >= n {
        return Err(MlError::ingestion(format!(
            "cannot split {n} rows with test ratio {test_ratio}: one partition would be empty"
        )));
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (test_idx, train_idx) = indices.split_at(n_test);
    Ok((batch.select_rows(train_idx), batch.select_rows(test_idx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineSettings, TrainingPipelineConfig};
    use crate::data::batch::Cell;
    use crate::data::source::{MemoryStore, Record};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn numbered_batch(n: usize) -> DataBatch {
        DataBatch::new(
            vec!["id".into()],
            (0..n).map(|i| vec![Cell::Number(i as f64)]).collect(),
        )
    }

    fn ids(batch: &DataBatch) -> Vec<usize> {
        batch
            .rows
            .iter()
            .map(|r| match r[0] {
                Cell::Number(v) => v as usize,
                _ => usize::MAX,
            })
            .collect()
    }

    fn stage(dir: &TempDir, store: MemoryStore) -> DataIngestion {
        let mut settings = PipelineSettings::default();
        settings.artifact_root = dir.path().join("Artifacts");
        let run = TrainingPipelineConfig::now(&settings);
        DataIngestion::new(DataIngestionConfig::new(&run, &settings), Arc::new(store))
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let value = if i % 4 == 0 {
                    serde_json::json!("na")
                } else {
                    serde_json::json!(1)
                };
                serde_json::json!({"_id": i, "a": value, "Result": 1})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_split_sizes() {
        let (train, test) = train_test_split(&numbered_batch(10), 0.2, 42).unwrap();
        assert_eq!(test.row_count(), 2);
        assert_eq!(train.row_count(), 8);
        let (train, test) = train_test_split(&numbered_batch(11), 0.2, 42).unwrap();
        assert_eq!(test.row_count(), 3);
        assert_eq!(train.row_count(), 8);
    }

    #[test]
    fn test_split_is_reproducible() {
        let batch = numbered_batch(50);
        let a = train_test_split(&batch, 0.3, 7).unwrap();
        let b = train_test_split(&batch, 0.3, 7).unwrap();
        assert_eq!(ids(&a.1), ids(&b.1));
        let c = train_test_split(&batch, 0.3, 8).unwrap();
        assert_ne!(ids(&a.1), ids(&c.1));
    }

    #[test]
    fn test_split_rejects_degenerate_partition() {
        assert!(train_test_split(&numbered_batch(1), 0.2, 1).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_is_disjoint_cover(n in 2usize..300, ratio in 0.05f64..0.5, seed in any::<u64>()) {
            let batch = numbered_batch(n);
            prop_assume!(test_size(n, ratio) < n);
            let (train, test) = train_test_split(&batch, ratio, seed).unwrap();
            let train_ids: HashSet<usize> = ids(&train).into_iter().collect();
            let test_ids: HashSet<usize> = ids(&test).into_iter().collect();
            prop_assert!(train_ids.is_disjoint(&test_ids));
            prop_assert_eq!(train_ids.len() + test_ids.len(), n);
            prop_assert_eq!(test.row_count(), test_size(n, ratio));
        }
    }

    #[tokio::test]
    async fn test_ingestion_persists_splits_and_normalizes() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new().with_collection("AndersonAI", "NetworkData", records(20));
        store.connect().await.unwrap();
        let ingestion = stage(&dir, store);

        let artifact = ingestion.initiate_data_ingestion().await.unwrap();
        let train = DataBatch::read_csv(&artifact.trained_file_path).unwrap();
        let test = DataBatch::read_csv(&artifact.test_file_path).unwrap();
        assert_eq!(train.row_count() + test.row_count(), 20);
        assert_eq!(train.columns, vec!["a", "Result"]);
        let missing = train
            .rows
            .iter()
            .chain(test.rows.iter())
            .filter(|r| r[0].is_missing())
            .count();
        assert_eq!(missing, 5);
        assert!(ingestion.config.feature_store_file_path.exists());
    }

    #[tokio::test]
    async fn test_ingestion_empty_collection_fails() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new().with_collection("AndersonAI", "NetworkData", Vec::new());
        store.connect().await.unwrap();
        let err = stage(&dir, store).initiate_data_ingestion().await.unwrap_err();
        assert!(matches!(err, MlError::Ingestion(_)));
    }

    #[tokio::test]
    async fn test_ingestion_unreachable_store_fails() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::unreachable();
        let _ = store.connect().await;
        let err = stage(&dir, store).initiate_data_ingestion().await.unwrap_err();
        assert!(matches!(err, MlError::Ingestion(_)));
    }
}
