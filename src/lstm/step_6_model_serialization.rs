// External imports
use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// Internal imports
use crate::constants::BEST_MODEL_KEY;
use crate::error::PipelineError;
use crate::lstm::step_3_lstm_model_arch::{PriceLstm, PriceLstmConfig};

/// Metadata persisted next to every weight record: enough to reconstruct the
/// input-shape contract without the training run that created the artifact.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelMetadata {
    pub version: String,
    pub timestamp: u64,
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub num_layers: usize,
    pub bidirectional: bool,
    pub dropout: f64,
    pub sequence_length: usize,
}

impl ModelMetadata {
    pub fn new(config: &PriceLstmConfig, sequence_length: usize) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            input_size: config.input_size,
            hidden_size: config.hidden_size,
            output_size: config.output_size,
            num_layers: config.num_layers,
            bidirectional: config.bidirectional,
            dropout: config.dropout,
            sequence_length,
        }
    }

    /// Reconstructs the architecture configuration this artifact was
    /// trained with.
    pub fn to_config(&self) -> PriceLstmConfig {
        PriceLstmConfig {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            output_size: self.output_size,
            num_layers: self.num_layers,
            bidirectional: self.bidirectional,
            dropout: self.dropout,
        }
    }
}

/// Artifact base path for one fold's model, keyed by instrument and fold.
/// Fold-unique names keep checkpoint writes collision-free no matter how
/// folds are executed.
pub fn fold_artifact_path(base_dir: &Path, ticker: &str, fold_index: usize) -> PathBuf {
    base_dir
        .join(ticker)
        .join(format!("model_{}_fold_{}", ticker, fold_index))
}

/// Artifact base path for the retained best model.
pub fn best_artifact_path(base_dir: &Path, ticker: &str) -> PathBuf {
    base_dir
        .join(ticker)
        .join(format!("model_{}_{}", ticker, BEST_MODEL_KEY))
}

/// Saves the model weights and metadata under the given base path
/// (`<path>.bin` and `<path>.meta.json`).
pub fn save_model_with_metadata<B: Backend>(
    model: &PriceLstm<B>,
    metadata: &ModelMetadata,
    path: impl AsRef<Path>,
) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).context("Failed to create model parent directory")?;
    }

    let model_path = path.as_ref().with_extension("bin");
    model
        .clone()
        .save_file::<BinFileRecorder<FullPrecisionSettings>, _>(&model_path, &Default::default())
        .context("Failed to save model weights")?;

    let metadata_path = path.as_ref().with_extension("meta.json");
    let metadata_json =
        serde_json::to_string_pretty(metadata).context("Failed to serialize metadata")?;
    std::fs::write(&metadata_path, metadata_json).context("Failed to write metadata file")?;

    info!("Model saved at {}", model_path.display());
    Ok(())
}

/// Loads a model and its metadata from the given base path.
///
/// Metadata is read first and the architecture rebuilt from it, so artifacts
/// remain loadable independently of the run that created them. Missing or
/// corrupt artifacts are fatal.
pub fn load_model_with_metadata<B: Backend>(
    path: impl AsRef<Path>,
    device: &B::Device,
) -> crate::error::Result<(PriceLstm<B>, ModelMetadata)> {
    let metadata_path = path.as_ref().with_extension("meta.json");
    let metadata_json = std::fs::read_to_string(&metadata_path).map_err(|e| {
        PipelineError::ModelLoad(format!("{}: {}", metadata_path.display(), e))
    })?;
    let metadata: ModelMetadata = serde_json::from_str(&metadata_json).map_err(|e| {
        PipelineError::ModelLoad(format!("{}: {}", metadata_path.display(), e))
    })?;

    let model_path = path.as_ref().with_extension("bin");
    let model = metadata
        .to_config()
        .init::<B>(device)
        .load_file::<BinFileRecorder<FullPrecisionSettings>, _>(
            &model_path,
            &Default::default(),
            device,
        )
        .map_err(|e| PipelineError::ModelLoad(format!("{}: {}", model_path.display(), e)))?;

    Ok((model, metadata))
}

/// Checks that both the weight record and parseable metadata exist.
pub fn verify_model(path: impl AsRef<Path>) -> bool {
    let model_path = path.as_ref().with_extension("bin");
    let metadata_path = path.as_ref().with_extension("meta.json");

    if !model_path.exists() || !metadata_path.exists() {
        return false;
    }
    std::fs::read_to_string(&metadata_path)
        .ok()
        .and_then(|json| serde_json::from_str::<ModelMetadata>(&json).ok())
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use tempfile::tempdir;

    #[test]
    fn test_model_serialization_round_trip() -> Result<()> {
        let temp_dir = tempdir()?;
        let base_path = temp_dir.path().join("model_TEST_fold_0");
        let device = NdArrayDevice::Cpu;

        let config = PriceLstmConfig::new(15);
        let model: PriceLstm<NdArray> = config.init(&device);
        let metadata = ModelMetadata::new(&config, 60);

        save_model_with_metadata(&model, &metadata, &base_path)?;
        assert!(verify_model(&base_path));

        let (loaded, loaded_metadata) =
            load_model_with_metadata::<NdArray>(&base_path, &device)?;

        assert_eq!(loaded_metadata.input_size, 15);
        assert_eq!(loaded_metadata.hidden_size, config.hidden_size);
        assert_eq!(loaded_metadata.num_layers, config.num_layers);
        assert_eq!(loaded_metadata.sequence_length, 60);
        assert_eq!(loaded.input_size(), model.input_size());
        Ok(())
    }

    #[test]
    fn test_load_missing_artifact_fails() {
        let temp_dir = tempdir().unwrap();
        let device = NdArrayDevice::Cpu;
        let missing = temp_dir.path().join("no_such_model");

        let err = load_model_with_metadata::<NdArray>(&missing, &device).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
        assert!(!verify_model(&missing));
    }

    #[test]
    fn test_artifact_paths_are_fold_unique() {
        let base = Path::new("models");
        let a = fold_artifact_path(base, "BTC-USD", 0);
        let b = fold_artifact_path(base, "BTC-USD", 1);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("fold_0"));

        let best = best_artifact_path(base, "BTC-USD");
        assert!(best.to_string_lossy().ends_with("model_BTC-USD_best"));
    }
}
