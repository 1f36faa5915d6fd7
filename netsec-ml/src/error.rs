//! Error types for the netsec-ml crate.
//!
//! `MlError` classifies what went wrong; `StageError` records where. Every
//! fatal error that leaves a pipeline stage is wrapped in a `StageError` so
//! callers see the originating stage together with the full cause chain.

use std::fmt;
use thiserror::Error;

/// Top-level error type for pipeline operations.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transformation error: {0}")]
    Transformation(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Coarse classification of an [`MlError`], used for matching without
/// inspecting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Ingestion,
    Validation,
    Transformation,
    Training,
    Tracking,
    Model,
    Store,
    Timeout,
    Io,
    Serialization,
}

impl MlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn ingestion(msg: impl Into<String>) -> Self {
        Self::Ingestion(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transformation(msg: impl Into<String>) -> Self {
        Self::Transformation(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn tracking(msg: impl Into<String>) -> Self {
        Self::Tracking(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Ingestion(_) => ErrorKind::Ingestion,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transformation(_) => ErrorKind::Transformation,
            Self::Training(_) => ErrorKind::Training,
            Self::Tracking(_) | Self::Http(_) => ErrorKind::Tracking,
            Self::Model(_) => ErrorKind::Model,
            Self::Store(_) | Self::Sqlite(_) => ErrorKind::Store,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Io,
            Self::Serde(_) | Self::Yaml(_) => ErrorKind::Serialization,
        }
    }
}

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Configuration and schema loading before any stage runs.
    Setup,
    Ingestion,
    Validation,
    Transformation,
    Training,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Ingestion => "data_ingestion",
            Self::Validation => "data_validation",
            Self::Transformation => "data_transformation",
            Self::Training => "model_trainer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal error annotated with the stage that raised it.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: MlError,
}

impl StageError {
    pub fn new(stage: Stage, source: MlError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Attach stage context to a `Result<T, MlError>`.
pub trait StageContext<T> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T, MlError> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}
