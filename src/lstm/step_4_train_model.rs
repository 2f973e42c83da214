// External imports
use anyhow::{anyhow, Result};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{backend::Backend, Tensor};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use log::{info, warn};
use polars::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Internal imports
use super::step_1_tensor_preparation::{dataframe_to_tensors, walk_forward_splits, FoldSplit};
use super::step_3_lstm_model_arch::{PriceLstm, PriceLstmConfig};
use super::step_6_model_serialization::{
    best_artifact_path, fold_artifact_path, save_model_with_metadata, ModelMetadata,
};
use crate::constants::{MODEL_DIR, SEQUENCE_LENGTH};

pub type TrainingBackend = Autodiff<NdArray<f32>>;

/// External run control. The training loop polls this between folds and
/// between epochs; cancellation is checked, never pre-empted, and results in
/// a clean early return without promoting the in-flight fold.
pub trait RunController {
    fn is_running(&self) -> bool;
}

/// Controller that never cancels.
pub struct AlwaysRunning;

impl RunController for AlwaysRunning {
    fn is_running(&self) -> bool {
        true
    }
}

/// Shareable stop flag, for callers that cancel from another thread.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl RunController for StopFlag {
    fn is_running(&self) -> bool {
        !self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for the walk-forward training sweep.
#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub n_folds: usize,
    pub sequence_length: usize,
    /// Early stopping: epochs without improvement before the fold stops.
    pub patience: usize,
    /// Minimum validation-loss improvement that counts as progress.
    pub min_delta: f64,
    /// Learning-rate reduction on validation-loss plateau.
    pub lr_reduce_factor: f64,
    pub lr_reduce_patience: usize,
    pub min_learning_rate: f64,
    pub model_dir: PathBuf,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 50,
            n_folds: 5,
            sequence_length: SEQUENCE_LENGTH,
            patience: 10,
            min_delta: 0.0,
            lr_reduce_factor: 0.1,
            lr_reduce_patience: 5,
            min_learning_rate: 1e-6,
            model_dir: PathBuf::from(MODEL_DIR),
        }
    }
}

/// Validation metrics for one fold, in scaled units. Pure functions of
/// predictions and actuals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsRecord {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
}

impl MetricsRecord {
    pub fn compute(predictions: &[f64], actuals: &[f64]) -> Self {
        assert_eq!(predictions.len(), actuals.len());
        let n = predictions.len().max(1) as f64;

        let mut squared = 0.0;
        let mut absolute = 0.0;
        let mut percentage = 0.0;
        for (&p, &a) in predictions.iter().zip(actuals) {
            let err = p - a;
            squared += err * err;
            absolute += err.abs();
            percentage += err.abs() / a.abs().max(f64::EPSILON);
        }

        Self {
            rmse: (squared / n).sqrt(),
            mae: absolute / n,
            mape: percentage / n,
        }
    }

    /// Arithmetic mean across fold records.
    pub fn mean(records: &[MetricsRecord]) -> Option<MetricsRecord> {
        if records.is_empty() {
            return None;
        }
        let n = records.len() as f64;
        Some(MetricsRecord {
            rmse: records.iter().map(|m| m.rmse).sum::<f64>() / n,
            mae: records.iter().map(|m| m.mae).sum::<f64>() / n,
            mape: records.iter().map(|m| m.mape).sum::<f64>() / n,
        })
    }
}

/// Result of one completed fold.
#[derive(Debug, Clone)]
pub struct FoldReport {
    pub fold_index: usize,
    pub best_val_loss: f64,
    pub metrics: MetricsRecord,
    pub checkpoint: PathBuf,
}

/// Outcome of the full walk-forward sweep.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub fold_reports: Vec<FoldReport>,
    pub aggregate: Option<MetricsRecord>,
    pub best_fold: Option<usize>,
    pub best_model_path: Option<PathBuf>,
    pub cancelled: bool,
}

// Splits a tensor along the batch dimension into training-sized chunks.
fn get_batches<B: Backend, const D: usize>(
    data: &Tensor<B, D>,
    batch_size: usize,
) -> Vec<Tensor<B, D>> {
    let num_samples = data.dims()[0];
    let mut batches = Vec::new();
    let mut start = 0;
    while start < num_samples {
        let end = usize::min(start + batch_size, num_samples);
        batches.push(data.clone().narrow(0, start, end - start));
        start = end;
    }
    batches
}

fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Vec<f64> {
    let data = tensor.to_data().convert::<f32>();
    data.as_slice::<f32>()
        .expect("contiguous tensor data")
        .iter()
        .map(|&v| v as f64)
        .collect()
}

/// Trains one fold to completion.
///
/// Returns `Ok(None)` when the run controller cancelled mid-fold; the fold
/// is then abandoned and never considered for promotion. Early stopping
/// restores the weights of the best observed epoch, which are also the
/// weights checkpointed on every improvement.
#[allow(clippy::too_many_arguments)]
fn train_fold(
    features: &Tensor<TrainingBackend, 3>,
    targets: &Tensor<TrainingBackend, 2>,
    split: &FoldSplit,
    config: &PriceLstmConfig,
    settings: &TrainingSettings,
    device: &<TrainingBackend as Backend>::Device,
    checkpoint_path: &PathBuf,
    controller: &dyn RunController,
) -> Result<Option<(PriceLstm<TrainingBackend>, f64, MetricsRecord)>> {
    let train_features = features.clone().narrow(0, split.train.start, split.train.len());
    let train_targets = targets.clone().narrow(0, split.train.start, split.train.len());
    let val_features = features
        .clone()
        .narrow(0, split.validation.start, split.validation.len());
    let val_targets = targets
        .clone()
        .narrow(0, split.validation.start, split.validation.len());

    let mut model = config.init::<TrainingBackend>(device);
    let mut optimizer = AdamConfig::new().init();
    let metadata = ModelMetadata::new(config, settings.sequence_length);

    let mut best_model = model.clone();
    let mut best_val_loss = f64::INFINITY;
    let mut epochs_no_improve = 0;
    let mut epochs_on_plateau = 0;
    let mut current_lr = settings.learning_rate;

    for epoch in 1..=settings.epochs {
        if !controller.is_running() {
            info!("Cancellation requested; abandoning fold at epoch {}", epoch);
            return Ok(None);
        }

        let feature_batches = get_batches(&train_features, settings.batch_size);
        let target_batches = get_batches(&train_targets, settings.batch_size);

        let mut epoch_loss = 0.0;
        for (batch_features, batch_targets) in feature_batches.iter().zip(target_batches.iter()) {
            let predictions = model.forward(batch_features.clone());
            let diff = predictions - batch_targets.clone();
            let loss_tensor = (diff.clone() * diff).mean();
            epoch_loss += loss_tensor.clone().into_scalar() as f64;

            let grads = loss_tensor.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(current_lr, model, grads);
        }
        let train_loss = epoch_loss / feature_batches.len().max(1) as f64;

        // Monitored validation loss for this epoch
        let val_preds = model.forward(val_features.clone());
        let val_diff = val_preds - val_targets.clone();
        let val_loss = (val_diff.clone() * val_diff).mean().into_scalar() as f64;

        info!(
            "Epoch {}/{}: train MSE = {:.6}, val MSE = {:.6}, lr = {:.2e}",
            epoch, settings.epochs, train_loss, val_loss, current_lr
        );

        if best_val_loss - val_loss > settings.min_delta {
            best_val_loss = val_loss;
            best_model = model.clone();
            epochs_no_improve = 0;
            epochs_on_plateau = 0;
            save_model_with_metadata(&best_model, &metadata, checkpoint_path)?;
        } else {
            epochs_no_improve += 1;
            epochs_on_plateau += 1;

            if epochs_no_improve >= settings.patience {
                info!(
                    "Early stopping at epoch {} (best val MSE = {:.6}); restoring best weights",
                    epoch, best_val_loss
                );
                model = best_model.clone();
                break;
            }

            if epochs_on_plateau >= settings.lr_reduce_patience {
                let reduced = (current_lr * settings.lr_reduce_factor)
                    .max(settings.min_learning_rate);
                if reduced < current_lr {
                    info!("Validation plateau: reducing lr {:.2e} -> {:.2e}", current_lr, reduced);
                    current_lr = reduced;
                }
                epochs_on_plateau = 0;
            }
        }
    }

    // Metrics come from the restored best weights on the held-out windows
    let predictions = tensor_to_vec(best_model.forward(val_features));
    let actuals = tensor_to_vec(val_targets);
    let metrics = MetricsRecord::compute(&predictions, &actuals);

    Ok(Some((best_model, best_val_loss, metrics)))
}

/// Runs the full walk-forward cross-validation sweep over a scaled feature
/// matrix and promotes the best fold's model.
///
/// Each fold gets a freshly constructed regressor. A fold that errors is
/// logged and discarded; the sweep fails only when every fold does.
/// Cancellation is not an error: the sweep returns early with whatever best
/// artifact had already been promoted.
pub fn run_walk_forward_training(
    df: &DataFrame,
    ticker: &str,
    config: &PriceLstmConfig,
    settings: &TrainingSettings,
    controller: &dyn RunController,
) -> Result<TrainingOutcome> {
    let device = <TrainingBackend as Backend>::Device::default();

    let (features, targets) =
        dataframe_to_tensors::<TrainingBackend>(df, settings.sequence_length, &device)?;
    let n_windows = features.dims()[0];
    let splits = walk_forward_splits(n_windows, settings.n_folds)?;
    info!(
        "Training {} over {} windows in {} fold(s)",
        ticker,
        n_windows,
        splits.len()
    );

    let mut fold_reports = Vec::new();
    let mut best: Option<(usize, f64, PriceLstm<TrainingBackend>)> = None;
    let mut failed_folds = 0;
    let mut cancelled = false;

    for (fold_index, split) in splits.iter().enumerate() {
        if !controller.is_running() {
            info!("Cancellation requested; stopping before fold {}", fold_index);
            cancelled = true;
            break;
        }

        info!(
            "Fold {}/{}: train windows {}..{}, validation windows {}..{}",
            fold_index + 1,
            splits.len(),
            split.train.start,
            split.train.end,
            split.validation.start,
            split.validation.end
        );

        let checkpoint_path = fold_artifact_path(&settings.model_dir, ticker, fold_index);
        match train_fold(
            &features,
            &targets,
            split,
            config,
            settings,
            &device,
            &checkpoint_path,
            controller,
        ) {
            Ok(Some((model, best_val_loss, metrics))) => {
                info!(
                    "Fold {} done: val MSE {:.6}, RMSE {:.4}, MAE {:.4}, MAPE {:.4}",
                    fold_index, best_val_loss, metrics.rmse, metrics.mae, metrics.mape
                );
                fold_reports.push(FoldReport {
                    fold_index,
                    best_val_loss,
                    metrics,
                    checkpoint: checkpoint_path,
                });
                if best
                    .as_ref()
                    .map(|(_, loss, _)| best_val_loss < *loss)
                    .unwrap_or(true)
                {
                    best = Some((fold_index, best_val_loss, model));
                }
            }
            Ok(None) => {
                cancelled = true;
                break;
            }
            Err(e) => {
                warn!("Fold {} failed and is discarded: {}", fold_index, e);
                failed_folds += 1;
            }
        }
    }

    if fold_reports.is_empty() && failed_folds > 0 && !cancelled {
        return Err(anyhow!("all {} folds failed", failed_folds));
    }

    let mut best_fold = None;
    let mut best_model_path = None;
    if let Some((fold_index, _, model)) = best {
        let path = best_artifact_path(&settings.model_dir, ticker);
        let metadata = ModelMetadata::new(config, settings.sequence_length);
        save_model_with_metadata(&model, &metadata, &path)?;
        info!("Best model from fold {} saved at {}", fold_index, path.display());
        best_fold = Some(fold_index);
        best_model_path = Some(path);
    }

    let aggregate = MetricsRecord::mean(
        &fold_reports.iter().map(|r| r.metrics).collect::<Vec<_>>(),
    );

    Ok(TrainingOutcome {
        fold_reports,
        aggregate,
        best_fold,
        best_model_path,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::synthetic_feature_matrix;
    use tempfile::tempdir;

    #[test]
    fn test_metrics_on_known_vectors() {
        let predictions = [1.0, 2.0, 3.0];
        let actuals = [1.0, 2.0, 5.0];

        let m = MetricsRecord::compute(&predictions, &actuals);
        assert!((m.mae - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.rmse - (4.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((m.mape - (2.0 / 5.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_mean_aggregation() {
        let a = MetricsRecord { rmse: 1.0, mae: 2.0, mape: 0.1 };
        let b = MetricsRecord { rmse: 3.0, mae: 4.0, mape: 0.3 };

        let mean = MetricsRecord::mean(&[a, b]).unwrap();
        assert_eq!(mean.rmse, 2.0);
        assert_eq!(mean.mae, 3.0);
        assert!((mean.mape - 0.2).abs() < 1e-12);

        assert!(MetricsRecord::mean(&[]).is_none());
    }

    #[test]
    fn test_cancellation_before_first_fold_is_clean() -> Result<()> {
        let df = synthetic_feature_matrix(40);
        let temp_dir = tempdir()?;

        let flag = StopFlag::new();
        flag.stop();

        let settings = TrainingSettings {
            n_folds: 2,
            sequence_length: 5,
            epochs: 1,
            model_dir: temp_dir.path().to_path_buf(),
            ..TrainingSettings::default()
        };
        let config = PriceLstmConfig {
            hidden_size: 4,
            num_layers: 1,
            ..PriceLstmConfig::new(crate::constants::FEATURE_COLUMNS.len())
        };

        let outcome = run_walk_forward_training(&df, "TEST", &config, &settings, &flag)?;
        assert!(outcome.cancelled);
        assert!(outcome.fold_reports.is_empty());
        assert!(outcome.best_fold.is_none());
        assert!(outcome.best_model_path.is_none());
        Ok(())
    }

    #[test]
    fn test_walk_forward_sweep_promotes_best() -> Result<()> {
        let df = synthetic_feature_matrix(50);
        let temp_dir = tempdir()?;

        let settings = TrainingSettings {
            n_folds: 2,
            sequence_length: 5,
            epochs: 2,
            batch_size: 16,
            model_dir: temp_dir.path().to_path_buf(),
            ..TrainingSettings::default()
        };
        let config = PriceLstmConfig {
            hidden_size: 4,
            num_layers: 1,
            ..PriceLstmConfig::new(crate::constants::FEATURE_COLUMNS.len())
        };

        let outcome =
            run_walk_forward_training(&df, "TEST", &config, &settings, &AlwaysRunning)?;

        assert!(!outcome.cancelled);
        assert_eq!(outcome.fold_reports.len(), 2);
        assert!(outcome.aggregate.is_some());
        assert!(outcome.best_fold.is_some());

        // Promoted artifact and per-fold checkpoints exist on disk
        let best_path = outcome.best_model_path.as_ref().unwrap();
        assert!(best_path.with_extension("bin").exists());
        for report in &outcome.fold_reports {
            assert!(report.checkpoint.with_extension("bin").exists());
        }
        Ok(())
    }
}
