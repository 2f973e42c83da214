// External imports
use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor};
use chrono::{Duration, NaiveDate};
use log::info;
use std::collections::VecDeque;

// Internal imports
use super::step_3_lstm_model_arch::SequenceRegressor;
use crate::constants::{FEATURE_COLUMNS, TARGET_COLUMN};
use crate::error::PipelineError;
use crate::util::scaling::MinMaxScaler;

/// One forecast step: a future date with its predicted price in original
/// units.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub price: f64,
}

fn target_index() -> usize {
    FEATURE_COLUMNS
        .iter()
        .position(|&c| c == TARGET_COLUMN)
        .expect("target column is part of the feature set")
}

/// Runs the regressor once over a single window.
fn predict_next_step<B: Backend, M: SequenceRegressor<B>>(
    model: &M,
    window: &VecDeque<Vec<f32>>,
    device: &B::Device,
) -> f64 {
    let steps = window.len();
    let n_features = FEATURE_COLUMNS.len();

    let mut buffer = Vec::with_capacity(steps * n_features);
    for row in window {
        buffer.extend_from_slice(row);
    }

    let input = Tensor::<B, 1>::from_floats(buffer.as_slice(), device)
        .reshape(Shape::new([1, steps, n_features]));
    let output = model.predict(input);

    let data = output.to_data().convert::<f32>();
    data.as_slice::<f32>().expect("contiguous tensor data")[0] as f64
}

/// Iterative multi-step forecast over `horizon_days`.
///
/// The rolling window is an explicit ring buffer owned by this call: each
/// iteration predicts one scaled step, records its inverse-transformed price
/// (single-column inverse of the target scaler), then drops the oldest row
/// and appends a synthetic row whose non-target features are carried forward
/// from the previous last row with the scaled prediction in the target slot.
///
/// Indicator columns in the synthetic rows are not recomputed from the
/// evolving synthetic price, so forecasts beyond the first step are
/// increasingly approximate. This is an accepted approximation of the
/// recursive scheme, not something callers should compensate for.
///
/// # Arguments
///
/// * `model` - Trained regressor
/// * `seed` - The last `steps` scaled feature rows, in `FEATURE_COLUMNS` order
/// * `close_scaler` - Target scaler used to restore original price units
/// * `horizon_days` - Number of future steps to predict
/// * `device` - Device to run inference on
///
/// # Returns
///
/// Returns predicted prices in original units, one per horizon day
pub fn predict_horizon<B: Backend, M: SequenceRegressor<B>>(
    model: &M,
    seed: &[Vec<f32>],
    close_scaler: &MinMaxScaler,
    horizon_days: usize,
    device: &B::Device,
) -> Result<Vec<f64>> {
    if seed.is_empty() {
        return Err(PipelineError::InsufficientData(
            "empty seed window for forecasting".to_string(),
        )
        .into());
    }
    let n_features = FEATURE_COLUMNS.len();
    for row in seed {
        if row.len() != n_features {
            return Err(PipelineError::IncompleteData(format!(
                "seed rows must be {} features wide, got {}",
                n_features,
                row.len()
            ))
            .into());
        }
    }

    let close_idx = target_index();
    let mut window: VecDeque<Vec<f32>> = seed.iter().cloned().collect();
    let mut prices = Vec::with_capacity(horizon_days);

    for _ in 0..horizon_days {
        let scaled_prediction = predict_next_step(model, &window, device);

        // Report in original units, feed back the scaled value
        let price = close_scaler.inverse_column(TARGET_COLUMN, &[scaled_prediction])?[0];
        prices.push(price);

        let mut synthetic_row = window
            .back()
            .expect("window is never empty")
            .clone();
        synthetic_row[close_idx] = scaled_prediction as f32;

        window.pop_front();
        window.push_back(synthetic_row);
    }

    info!("Generated {}-step forecast", horizon_days);
    Ok(prices)
}

/// Pairs horizon prices with their future dates, one day after the last
/// observed row.
pub fn forecast_with_dates(
    last_observed: NaiveDate,
    prices: &[f64],
) -> Vec<ForecastPoint> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &price)| ForecastPoint {
            date: last_observed + Duration::days(i as i64 + 1),
            price,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use polars::prelude::*;

    /// Stub regressor that always predicts the same scaled value.
    struct ConstantRegressor {
        value: f32,
    }

    impl SequenceRegressor<NdArray> for ConstantRegressor {
        fn predict(&self, windows: Tensor<NdArray, 3>) -> Tensor<NdArray, 2> {
            let batch = windows.dims()[0];
            Tensor::full([batch, 1], self.value, &windows.device())
        }
    }

    fn close_scaler_10_to_20() -> MinMaxScaler {
        let close = Series::new("close".into(), vec![10.0, 20.0]);
        let df = DataFrame::new(vec![close.into_column()]).unwrap();
        MinMaxScaler::fit(&df, &["close"]).unwrap()
    }

    fn seed(steps: usize) -> Vec<Vec<f32>> {
        (0..steps)
            .map(|i| vec![i as f32 / steps as f32; FEATURE_COLUMNS.len()])
            .collect()
    }

    #[test]
    fn test_constant_regressor_yields_constant_horizon() -> Result<()> {
        let device = NdArrayDevice::Cpu;
        let model = ConstantRegressor { value: 0.5 };
        let scaler = close_scaler_10_to_20();

        let prices = predict_horizon(&model, &seed(6), &scaler, 5, &device)?;

        assert_eq!(prices.len(), 5);
        // Every fed-back window predicts the same value, and 0.5 inverts to 15
        for price in prices {
            assert!((price - 15.0).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_synthetic_rows_carry_features_forward() -> Result<()> {
        let device = NdArrayDevice::Cpu;
        let model = ConstantRegressor { value: 0.25 };
        let scaler = close_scaler_10_to_20();

        // Horizon longer than the window forces full turnover of the buffer
        let prices = predict_horizon(&model, &seed(3), &scaler, 7, &device)?;
        assert_eq!(prices.len(), 7);
        for price in prices {
            assert!((price - 12.5).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_empty_seed_is_rejected() {
        let device = NdArrayDevice::Cpu;
        let model = ConstantRegressor { value: 0.5 };
        let scaler = close_scaler_10_to_20();

        let err = predict_horizon(&model, &[], &scaler, 3, &device).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[test]
    fn test_forecast_dates_follow_last_observation() {
        let last = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let points = forecast_with_dates(last, &[101.0, 102.0, 103.0]);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(points[2].date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(points[2].price, 103.0);
    }
}
