//! Data stages: ingestion, validation and transformation, plus the shared
//! tabular and array formats they exchange.

pub mod arrays;
pub mod batch;
pub mod drift;
pub mod ingest;
pub mod schema;
pub mod source;
pub mod transform;
pub mod validate;

pub use batch::{Cell, DataBatch};
pub use drift::{ColumnDrift, DriftReport};
pub use ingest::DataIngestion;
pub use schema::{ColumnType, Schema};
pub use source::{MemoryStore, Record, RecordStore, SqliteStore};
pub use transform::{KnnImputer, Preprocessor};
pub use validate::DataValidation;
