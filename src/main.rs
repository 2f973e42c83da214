// External crates
use anyhow::{Context, Result};
use burn_ndarray::NdArray;
use chrono::NaiveDate;
use std::env;
use std::path::{Path, PathBuf};

// Local modules
use pricecast::constants::{FEATURE_COLUMNS, SCALER_DIR};
use pricecast::lstm::{
    step_1_tensor_preparation, step_3_lstm_model_arch::PriceLstmConfig,
    step_4_train_model::{run_walk_forward_training, AlwaysRunning, TrainingSettings},
    step_5_prediction, step_6_model_serialization,
};
use pricecast::util::{feature_engineering, pre_processor, scaling};

fn main() -> Result<()> {
    // Positional arguments: ticker, CSV path, forecast horizon in days
    let args: Vec<String> = env::args().collect();
    let ticker = args.get(1).map(|s| s.as_str()).unwrap_or("BTC-USD");
    let csv_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("data/raw_data_{}.csv", ticker)));
    let horizon: usize = args
        .get(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    println!("Ticker: {} | data: {} | horizon: {} days", ticker, csv_path.display(), horizon);

    // Load raw history and derive the feature matrix
    let mut raw = pre_processor::load_and_preprocess(&csv_path)?;
    let mut matrix = feature_engineering::add_technical_indicators(&mut raw)?;
    println!("Feature matrix: {} rows x {} columns", matrix.height(), matrix.width());

    let last_observed_date = last_date(&matrix);

    // Fit and persist both scalers before anything sees scaled data
    let feature_scaler = scaling::fit_transform_features(&mut matrix)?;
    let close_scaler = scaling::fit_transform_close(&mut matrix)?;
    scaling::save_scaler(
        &feature_scaler,
        Path::new(SCALER_DIR),
        ticker,
        scaling::ScalerRole::Feature,
    )?;
    scaling::save_scaler(
        &close_scaler,
        Path::new(SCALER_DIR),
        ticker,
        scaling::ScalerRole::Close,
    )?;

    // Walk-forward cross-validation
    let settings = TrainingSettings::default();
    let config = PriceLstmConfig::new(FEATURE_COLUMNS.len());
    let outcome = run_walk_forward_training(&matrix, ticker, &config, &settings, &AlwaysRunning)?;

    for report in &outcome.fold_reports {
        println!(
            "Fold {}: val MSE {:.6} | RMSE {:.4} | MAE {:.4} | MAPE {:.4}",
            report.fold_index, report.best_val_loss, report.metrics.rmse,
            report.metrics.mae, report.metrics.mape
        );
    }
    if let Some(aggregate) = &outcome.aggregate {
        println!(
            "Average across folds: RMSE {:.4} | MAE {:.4} | MAPE {:.4}",
            aggregate.rmse, aggregate.mae, aggregate.mape
        );
    }
    if outcome.cancelled {
        println!("Training cancelled; skipping forecast.");
        return Ok(());
    }

    let best_path = outcome
        .best_model_path
        .context("no fold produced a usable model")?;

    // Reload the promoted artifact for inference and run the recursive forecast
    let device = Default::default();
    let (model, metadata) =
        step_6_model_serialization::load_model_with_metadata::<NdArray<f32>>(&best_path, &device)?;

    let seed = step_1_tensor_preparation::seed_window(&matrix, metadata.sequence_length)?;
    let prices =
        step_5_prediction::predict_horizon(&model, &seed, &close_scaler, horizon, &device)?;

    println!("Predictions for the next {} days:", horizon);
    match last_observed_date {
        Some(last) => {
            for point in step_5_prediction::forecast_with_dates(last, &prices) {
                println!("{}: ${:.2}", point.date, point.price);
            }
        }
        None => {
            for (i, price) in prices.iter().enumerate() {
                println!("Day {}: ${:.2}", i + 1, price);
            }
        }
    }

    Ok(())
}

// Last row of the time column as a date, when it parses as one.
fn last_date(df: &polars::prelude::DataFrame) -> Option<NaiveDate> {
    let time = df.column("time").ok()?.str().ok()?.clone();
    let last = time.get(time.len().checked_sub(1)?)?.to_string();
    NaiveDate::parse_from_str(&last, "%Y-%m-%d").ok()
}
