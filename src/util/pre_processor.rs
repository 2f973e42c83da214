// External crates
use log::info;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

// Local modules
use crate::constants::REQUIRED_INPUT_COLUMNS;
use crate::error::{PipelineError, Result};
use crate::util::file_utils::read_financial_csv;

/// Loads a raw OHLCV CSV and prepares it for feature engineering.
///
/// Validates the required input columns, sorts chronologically, then applies
/// the fill policy (forward-fill followed by backward-fill) to every numeric
/// input column so no interior gaps survive.
///
/// # Arguments
///
/// * `full_path` - Path to the CSV file
///
/// # Returns
///
/// Returns the preprocessed DataFrame or an error
pub fn load_and_preprocess(full_path: &Path) -> Result<DataFrame> {
    info!("Loading data from: {}", full_path.display());

    if !full_path.exists() {
        return Err(PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file not found: {}", full_path.display()),
        )));
    }

    let mut df = read_financial_csv(full_path)?;

    for &col in &REQUIRED_INPUT_COLUMNS {
        if df.column(col).is_err() {
            return Err(PipelineError::MissingColumn(col.to_string()));
        }
    }

    if df.column("time").is_ok() {
        df = df.sort(vec!["time"], SortMultipleOptions::default())?;
    }

    fill_forward_then_backward(&mut df, &REQUIRED_INPUT_COLUMNS)?;

    // Anything still null at this point (e.g. an entirely empty column) is
    // unusable for training
    df = df.drop_nulls::<String>(None)?;

    Ok(df)
}

/// Merges two OHLCV histories into one, keyed by the `time` column.
///
/// Rows are concatenated, duplicate timestamps are resolved last-wins (the
/// second frame's rows override the first's), and the result is returned in
/// chronological order.
pub fn merge_histories(older: &DataFrame, newer: &DataFrame) -> Result<DataFrame> {
    let combined = older.vstack(newer)?;
    let time_col = combined
        .column("time")
        .map_err(|_| PipelineError::MissingColumn("time".to_string()))?
        .str()?
        .clone();

    // Last occurrence of each timestamp wins
    let mut last_seen: HashMap<String, usize> = HashMap::with_capacity(combined.height());
    for (idx, value) in time_col.iter().enumerate() {
        last_seen.insert(value.unwrap_or("").to_string(), idx);
    }
    let keep: Vec<bool> = time_col
        .iter()
        .enumerate()
        .map(|(idx, value)| last_seen.get(value.unwrap_or("")) == Some(&idx))
        .collect();

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let deduped = combined.filter(&mask)?;
    Ok(deduped.sort(vec!["time"], SortMultipleOptions::default())?)
}

/// Applies the fill policy to the given columns in place: forward-fill first
/// so gaps inherit the most recent observation, then backward-fill so any
/// leading gap inherits the first real value.
pub fn fill_forward_then_backward(df: &mut DataFrame, columns: &[&str]) -> Result<()> {
    for &col in columns {
        if !df.schema().contains(col) {
            continue;
        }
        let series = df.column(col)?.as_materialized_series().clone();
        if !matches!(series.dtype(), DataType::Float64 | DataType::Int64) {
            continue;
        }
        let values = series.cast(&DataType::Float64)?;
        let chunked = values.f64()?;

        let mut filled: Vec<Option<f64>> = chunked.into_iter().collect();
        forward_fill(&mut filled);
        backward_fill(&mut filled);

        df.replace(col, Series::new(col.into(), filled))?;
    }
    Ok(())
}

/// Backward-fills the given columns in place, so leading undefined rows
/// inherit the first computable value.
pub fn fill_backward(df: &mut DataFrame, columns: &[&str]) -> Result<()> {
    for &col in columns {
        if !df.schema().contains(col) {
            continue;
        }
        let series = df.column(col)?.as_materialized_series().clone();
        if !matches!(series.dtype(), DataType::Float64 | DataType::Int64) {
            continue;
        }
        let values = series.cast(&DataType::Float64)?;
        let mut filled: Vec<Option<f64>> = values.f64()?.into_iter().collect();
        backward_fill(&mut filled);
        df.replace(col, Series::new(col.into(), filled))?;
    }
    Ok(())
}

/// Replaces each missing value with the previous valid one.
fn forward_fill(values: &mut [Option<f64>]) {
    let mut last_valid: Option<f64> = None;
    for slot in values.iter_mut() {
        match slot {
            Some(v) if !v.is_nan() => last_valid = Some(*v),
            _ => *slot = last_valid,
        }
    }
}

/// Replaces each missing value with the next valid one.
fn backward_fill(values: &mut [Option<f64>]) {
    let mut next_valid: Option<f64> = None;
    for slot in values.iter_mut().rev() {
        match slot {
            Some(v) if !v.is_nan() => next_valid = Some(*v),
            _ => *slot = next_valid,
        }
    }
}
