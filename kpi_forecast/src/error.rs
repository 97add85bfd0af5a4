//! Error types for the kpi_forecast crate

use band_math::MathError;
use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for the kpi_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The per-dataset raster directory does not exist
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// A raster could not be opened or lacks a requested band
    #[error("Band extraction failed for {}: {reason}", path.display())]
    BandExtraction { path: PathBuf, reason: String },

    /// Malformed formula or unresolvable band reference
    #[error("Formula evaluation failed: {0}")]
    FormulaEvaluation(MathError),

    /// No fitted estimator and nothing to restore
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Model files must carry the expected extension
    #[error("Invalid filename extension for {}: expected '{expected}'", path.display())]
    InvalidFilenameExtension { path: PathBuf, expected: String },

    /// The per-image results could not be assembled into a dataset
    #[error("Dataset build failed: {0}")]
    DatasetBuild(String),

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error related to parameter validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Not enough observations for the requested model
    #[error("Insufficient data: need at least {needed} observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Estimator (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Chart rendering failure
    #[error("Visualization error: {0}")]
    Visualization(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from mathematical operations
    #[error("Math error: {0}")]
    MathError(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),

    /// A pipeline phase failed for a dataset
    #[error("[{name_id}] {stage} failed: {source}")]
    Stage {
        name_id: String,
        stage: String,
        #[source]
        source: Box<ForecastError>,
    },
}

impl ForecastError {
    /// Wrap an error with the dataset name and failing stage
    pub fn in_stage(self, name_id: &str, stage: &str) -> Self {
        ForecastError::Stage {
            name_id: name_id.to_string(),
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}

impl From<tiff::TiffError> for ForecastError {
    fn from(err: tiff::TiffError) -> Self {
        ForecastError::DataError(format!("TIFF decoding error: {}", err))
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(err: bincode::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::Config(err.to_string())
    }
}
