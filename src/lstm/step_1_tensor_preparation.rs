// External crates
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor};
use polars::prelude::*;
use rayon::prelude::*;
use std::ops::Range;

// Internal modules
use crate::constants::{FEATURE_COLUMNS, TARGET_COLUMN, VALIDATION_SPLIT_RATIO};
use crate::error::{PipelineError, Result};

/// Number of supervised windows a matrix of `rows` rows yields for the given
/// lookback: one per row that has a full history behind it and a label ahead.
pub fn window_count(rows: usize, steps: usize) -> usize {
    rows.saturating_sub(steps)
}

/// Converts a scaled feature matrix into supervised window tensors.
///
/// Produces `(features, targets)` of shapes
/// `[n_windows, steps, n_features]` and `[n_windows, 1]`, where window `i`
/// covers rows `i .. i + steps` and its label is the target column at row
/// `i + steps` — strictly one row after the window's last input row. Feature
/// ordering inside each row follows `FEATURE_COLUMNS`; the same ordering is
/// used at prediction time, so any drift here would silently corrupt both.
///
/// # Arguments
///
/// * `df` - Scaled feature matrix with every feature column populated
/// * `steps` - Window length (rows per sequence)
/// * `device` - Device to create tensors on
///
/// # Returns
///
/// Returns a tuple of (features_tensor, targets_tensor)
pub fn dataframe_to_tensors<B: Backend>(
    df: &DataFrame,
    steps: usize,
    device: &B::Device,
) -> Result<(Tensor<B, 3>, Tensor<B, 2>)> {
    for &col in &FEATURE_COLUMNS {
        if df.column(col).is_err() {
            return Err(PipelineError::MissingColumn(col.to_string()));
        }
    }

    let n_rows = df.height();
    let n_windows = window_count(n_rows, steps);
    if n_windows == 0 {
        return Err(PipelineError::InsufficientData(format!(
            "{} rows cannot produce any {}-step windows",
            n_rows, steps
        )));
    }

    let n_features = FEATURE_COLUMNS.len();
    let columns: Vec<ChunkedArray<Float64Type>> = FEATURE_COLUMNS
        .iter()
        .map(|&name| df.column(name).unwrap().f64().map(|c| c.clone()))
        .collect::<PolarsResult<_>>()?;

    let target_idx = FEATURE_COLUMNS
        .iter()
        .position(|&c| c == TARGET_COLUMN)
        .expect("target column is part of the feature set");

    // Pre-allocate flat buffers and fill them in parallel, one chunk per window
    let mut features_data = vec![0f32; n_windows * steps * n_features];
    let mut target_data = vec![0f32; n_windows];

    features_data
        .par_chunks_mut(steps * n_features)
        .enumerate()
        .for_each(|(i, chunk)| {
            for j in 0..steps {
                for k in 0..n_features {
                    let val = columns[k].get(i + j).unwrap_or(0.0) as f32;
                    chunk[j * n_features + k] = val;
                }
            }
        });

    target_data
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, slot)| {
            *slot = columns[target_idx].get(i + steps).unwrap_or(0.0) as f32;
        });

    let features_shape = Shape::new([n_windows, steps, n_features]);
    let target_shape = Shape::new([n_windows, 1]);

    let features = Tensor::<B, 1>::from_floats(features_data.as_slice(), device)
        .reshape(features_shape);
    let targets = Tensor::<B, 1>::from_floats(target_data.as_slice(), device)
        .reshape(target_shape);

    Ok((features, targets))
}

/// Extracts the last `steps` rows of the feature matrix as a seed window for
/// recursive forecasting, in `FEATURE_COLUMNS` order.
pub fn seed_window(df: &DataFrame, steps: usize) -> Result<Vec<Vec<f32>>> {
    let n_rows = df.height();
    if n_rows < steps {
        return Err(PipelineError::InsufficientData(format!(
            "{} rows is shorter than the {}-step seed window",
            n_rows, steps
        )));
    }

    let mut rows = Vec::with_capacity(steps);
    for i in (n_rows - steps)..n_rows {
        let mut row = Vec::with_capacity(FEATURE_COLUMNS.len());
        for &col in &FEATURE_COLUMNS {
            let value = df
                .column(col)
                .map_err(|_| PipelineError::MissingColumn(col.to_string()))?
                .f64()?
                .get(i)
                .unwrap_or(0.0);
            row.push(value as f32);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// One train/validation partition over the windowed dataset. Both ranges
/// index windows, not raw rows; validation always follows training in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

/// Produces the ordered walk-forward train/validation splits.
///
/// With `n_folds > 1` each fold trains on a strictly growing prefix and
/// validates on the next contiguous block; validation blocks are
/// non-overlapping and strictly increasing in time. With `n_folds <= 1` a
/// single 80/20 split (by window count, original order) is produced.
///
/// # Arguments
///
/// * `n_windows` - Total number of supervised windows
/// * `n_folds` - Requested number of cross-validation folds
pub fn walk_forward_splits(n_windows: usize, n_folds: usize) -> Result<Vec<FoldSplit>> {
    if n_folds <= 1 {
        let train_len = (n_windows as f64 * (1.0 - VALIDATION_SPLIT_RATIO)) as usize;
        if train_len == 0 || train_len == n_windows {
            return Err(PipelineError::InsufficientData(format!(
                "{} windows cannot be split into non-empty train and validation sets",
                n_windows
            )));
        }
        return Ok(vec![FoldSplit {
            train: 0..train_len,
            validation: train_len..n_windows,
        }]);
    }

    let validation_size = n_windows / (n_folds + 1);
    if validation_size == 0 {
        return Err(PipelineError::InsufficientData(format!(
            "{} windows are too few for {} folds with non-empty validation ranges",
            n_windows, n_folds
        )));
    }

    let mut splits = Vec::with_capacity(n_folds);
    for i in 0..n_folds {
        let validation_start = n_windows - (n_folds - i) * validation_size;
        splits.push(FoldSplit {
            train: 0..validation_start,
            validation: validation_start..validation_start + validation_size,
        });
    }
    Ok(splits)
}
