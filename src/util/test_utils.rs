// Shared helpers for unit tests. Not compiled into release builds.

use polars::prelude::*;

/// Builds a synthetic daily OHLCV frame with a known linear close trend:
/// `close[i] = 100 + i`. Deterministic on purpose so indicator math can be
/// checked exactly.
pub fn synthetic_ohlcv(rows: usize) -> DataFrame {
    let time: Vec<String> = (0..rows).map(|i| format!("2020-01-{:03}", i + 1)).collect();
    let close: Vec<f64> = (0..rows).map(|i| 100.0 + i as f64).collect();
    let open: Vec<f64> = close.iter().map(|c| c - 0.5).collect();
    let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
    let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
    let adjusted: Vec<f64> = close.clone();
    let volume: Vec<f64> = (0..rows).map(|i| 1_000.0 + i as f64).collect();

    DataFrame::new(vec![
        Series::new("time".into(), time).into_column(),
        Series::new("open".into(), open).into_column(),
        Series::new("high".into(), high).into_column(),
        Series::new("low".into(), low).into_column(),
        Series::new("close".into(), close).into_column(),
        Series::new("adjusted_close".into(), adjusted).into_column(),
        Series::new("volume".into(), volume).into_column(),
    ])
    .expect("synthetic frame construction cannot fail")
}

/// Synthetic frame already carrying every feature column, scaled into [0, 1].
/// Convenient for window/training tests that do not exercise the indicator
/// stage itself.
pub fn synthetic_feature_matrix(rows: usize) -> DataFrame {
    use crate::constants::FEATURE_COLUMNS;

    let mut columns = Vec::with_capacity(FEATURE_COLUMNS.len());
    for (c, &name) in FEATURE_COLUMNS.iter().enumerate() {
        let values: Vec<f64> = (0..rows)
            .map(|i| ((i + c) % 100) as f64 / 100.0)
            .collect();
        columns.push(Series::new(name.into(), values).into_column());
    }
    DataFrame::new(columns).expect("synthetic frame construction cannot fail")
}
