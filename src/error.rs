// External crates
use polars::error::PolarsError;
use thiserror::Error;

/// Errors surfaced by the forecasting pipeline.
///
/// Data-shape problems (`MissingColumn`, `IncompleteData`,
/// `InsufficientData`) are fatal for the current instrument but are expected
/// to leave a multi-instrument batch run alive. Artifact problems
/// (`ScalerLoad`, `ModelLoad`) are fatal at prediction time; there is no
/// fallback to an unscaled or untrained path.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required column '{0}' not found")]
    MissingColumn(String),

    #[error("incomplete data: {0}")]
    IncompleteData(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("failed to load scaler: {0}")]
    ScalerLoad(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
