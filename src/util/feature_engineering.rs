// External crates
use polars::prelude::*;

// Local modules
use crate::constants::{
    BOLLINGER_WINDOW, FEATURE_COLUMNS, MACD_FAST_SPAN, MACD_SLOW_SPAN, REQUIRED_INPUT_COLUMNS,
    RSI_LOSS_EPSILON, RSI_PERIOD, VOLATILITY_WINDOW,
};
use crate::error::{PipelineError, Result};

fn rolling_options(window: usize, min_periods: usize) -> RollingOptionsFixedWindow {
    RollingOptionsFixedWindow {
        window_size: window,
        min_periods,
        center: false,
        weights: None,
        fn_params: None,
    }
}

/// Calculates a Simple Moving Average (SMA) over the close-inclusive window.
///
/// Rows without `window` preceding observations are left undefined.
pub fn calculate_sma(df: &DataFrame, column: &str, window: usize) -> PolarsResult<Series> {
    let series = df.column(column)?.f64()?.clone().into_series();
    if series.len() < window {
        return Ok(Series::full_null(column.into(), series.len(), &DataType::Float64));
    }
    series.rolling_mean(rolling_options(window, window))
}

/// Calculates simple per-row returns: `(close - prev_close) / prev_close`.
pub fn calculate_returns(df: &DataFrame) -> PolarsResult<Series> {
    let close: Series = df.column("close")?.as_materialized_series().clone();
    let shifted: Series = close.shift(1);
    let diff: Series = (close - shifted.clone())?;
    let returns: Series = (&diff / &shifted)?;
    Ok(returns)
}

/// Calculates rolling standard deviation of returns.
pub fn calculate_volatility(df: &DataFrame, window: usize) -> PolarsResult<Series> {
    let returns = calculate_returns(df)?;
    if returns.len() < window {
        return Ok(Series::full_null("volatility".into(), returns.len(), &DataType::Float64));
    }
    returns.rolling_std(rolling_options(window, window))
}

/// Exponentially-weighted moving average with pandas-style adjusted weights.
///
/// `alpha = 2 / (span + 1)`; each output is the decay-weighted mean of all
/// observations so far, undefined until `min_periods` observations exist.
fn ewm_mean(values: &ChunkedArray<Float64Type>, span: usize, min_periods: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut seen = 0usize;
    let mut out = Vec::with_capacity(values.len());

    for opt in values.into_iter() {
        match opt {
            Some(v) if !v.is_nan() => {
                numerator = v + decay * numerator;
                denominator = 1.0 + decay * denominator;
                seen += 1;
                if seen >= min_periods {
                    out.push(Some(numerator / denominator));
                } else {
                    out.push(None);
                }
            }
            _ => out.push(None),
        }
    }

    out
}

/// Calculates Moving Average Convergence Divergence (MACD).
///
/// Fast EMA minus slow EMA of close; both legs require the slow span's worth
/// of history before producing a defined value.
pub fn calculate_macd(df: &DataFrame) -> PolarsResult<Series> {
    let close = df.column("close")?.f64()?.clone();

    let fast = ewm_mean(&close, MACD_FAST_SPAN, MACD_SLOW_SPAN);
    let slow = ewm_mean(&close, MACD_SLOW_SPAN, MACD_SLOW_SPAN);

    let macd: Vec<Option<f64>> = fast
        .into_iter()
        .zip(slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    Ok(Series::new("macd".into(), macd))
}

/// Calculates the Relative Strength Index (RSI).
///
/// Gains and losses are split from per-row deltas by zeroing the
/// opposite-sign component; the rolling loss average is floored at a small
/// epsilon so the ratio is always defined.
pub fn calculate_rsi(df: &DataFrame, window: usize) -> PolarsResult<Series> {
    let close = df.column("close")?.f64()?.clone().into_series();
    let prev_close = close.shift(1);

    let mut gains = Vec::with_capacity(close.len());
    let mut losses = Vec::with_capacity(close.len());

    // No delta exists for the first row
    gains.push(0.0);
    losses.push(0.0);

    for i in 1..close.len() {
        let curr = close.f64()?.get(i).unwrap_or(0.0);
        let prev = prev_close.f64()?.get(i).unwrap_or(0.0);
        let change = curr - prev;

        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    let gains_series = Series::new("gains".into(), gains);
    let losses_series = Series::new("losses".into(), losses);

    let avg_gain = gains_series.rolling_mean(rolling_options(window, 1))?;
    let avg_loss = losses_series.rolling_mean(rolling_options(window, 1))?;

    let mut rsi = Vec::with_capacity(close.len());
    for i in 0..close.len() {
        let g = avg_gain.f64()?.get(i).unwrap_or(0.0);
        let l = avg_loss.f64()?.get(i).unwrap_or(0.0).max(RSI_LOSS_EPSILON);

        let rs = g / l;
        rsi.push(100.0 - (100.0 / (1.0 + rs)));
    }

    Ok(Series::new("rsi_14".into(), rsi))
}

/// Calculates Bollinger-style bands around the short moving average,
/// widened by twice the rolling return volatility.
pub fn calculate_bands(middle: &Series, volatility: &Series) -> PolarsResult<(Series, Series)> {
    let mid = middle.f64()?;
    let vol = volatility.f64()?;

    let mut upper = Vec::with_capacity(mid.len());
    let mut lower = Vec::with_capacity(mid.len());

    for i in 0..mid.len() {
        match (mid.get(i), vol.get(i)) {
            (Some(m), Some(v)) => {
                upper.push(Some(m + 2.0 * v));
                lower.push(Some(m - 2.0 * v));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    Ok((
        Series::new("bb_upper".into(), upper),
        Series::new("bb_lower".into(), lower),
    ))
}

/// Adds all technical indicators to the DataFrame.
///
/// Every indicator is strictly causal: each row uses only observations at or
/// before that row. Leading rows that remain undefined after computation are
/// backward-filled; if undefined values survive even that, the input history
/// is too short for the configured lookbacks and the call fails.
pub fn add_technical_indicators(df: &mut DataFrame) -> Result<DataFrame> {
    for &col in &REQUIRED_INPUT_COLUMNS {
        if df.column(col).is_err() {
            return Err(PipelineError::MissingColumn(col.to_string()));
        }
    }

    // The pipeline works in f64 throughout
    for &col in &REQUIRED_INPUT_COLUMNS {
        let series = df.column(col)?.as_materialized_series().clone();
        if series.dtype() != &DataType::Float64 {
            df.replace(col, series.cast(&DataType::Float64)?)?;
        }
    }

    let sma50 = calculate_sma(df, "close", 50)?;
    let sma200 = calculate_sma(df, "close", 200)?;
    let sma20 = calculate_sma(df, "close", BOLLINGER_WINDOW)?;
    let returns = calculate_returns(df)?;
    let volatility = calculate_volatility(df, VOLATILITY_WINDOW)?;
    let (bb_upper, bb_lower) = calculate_bands(&sma20, &volatility)?;
    let rsi = calculate_rsi(df, RSI_PERIOD)?;
    let macd = calculate_macd(df)?;

    let indicators = vec![
        sma50.with_name("sma_50".into()).into_column(),
        sma200.with_name("sma_200".into()).into_column(),
        returns.with_name("returns".into()).into_column(),
        volatility.with_name("volatility_50".into()).into_column(),
        sma20.with_name("sma_20".into()).into_column(),
        bb_upper.into_column(),
        bb_lower.into_column(),
        rsi.into_column(),
        macd.into_column(),
    ];

    let mut result = df.hstack(&indicators)?;

    crate::util::pre_processor::fill_backward(&mut result, &FEATURE_COLUMNS)?;

    let remaining = count_undefined(&result, &FEATURE_COLUMNS)?;
    if remaining > 0 {
        return Err(PipelineError::IncompleteData(format!(
            "{} undefined values remain after backward fill; history is shorter than the longest indicator lookback",
            remaining
        )));
    }

    Ok(result)
}

/// Counts null and NaN values across the given columns.
pub fn count_undefined(df: &DataFrame, columns: &[&str]) -> PolarsResult<usize> {
    let mut undefined = 0;

    for &col in columns {
        if let Ok(series) = df.column(col) {
            if let Ok(f64_series) = series.f64() {
                undefined += f64_series.null_count();
                for opt_val in f64_series.iter().flatten() {
                    if opt_val.is_nan() {
                        undefined += 1;
                    }
                }
            } else {
                undefined += series.null_count();
            }
        }
    }

    Ok(undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::synthetic_ohlcv;

    #[test]
    fn test_sma_matches_arithmetic_mean() -> Result<()> {
        // Linear close series: close[i] = 100 + i
        let df = synthetic_ohlcv(300);

        let sma50 = calculate_sma(&df, "close", 50)?;
        let sma200 = calculate_sma(&df, "close", 200)?;

        // At row 250 the window covers rows 201..=250 and 51..=250
        let close = df.column("close")?.f64()?;
        let mean_of = |start: usize, end: usize| -> f64 {
            (start..=end).map(|i| close.get(i).unwrap()).sum::<f64>() / (end - start + 1) as f64
        };

        assert!((sma50.f64()?.get(250).unwrap() - mean_of(201, 250)).abs() < 1e-9);
        assert!((sma200.f64()?.get(250).unwrap() - mean_of(51, 250)).abs() < 1e-9);

        // Not enough history yet
        assert_eq!(sma200.f64()?.get(100), None);
        Ok(())
    }

    #[test]
    fn test_rsi_bounds_and_direction() -> Result<()> {
        let rising = synthetic_ohlcv(100);
        let rsi = calculate_rsi(&rising, RSI_PERIOD)?;
        let rsi = rsi.f64()?;

        for i in 0..rsi.len() {
            let v = rsi.get(i).unwrap();
            assert!((0.0..=100.0).contains(&v), "rsi out of range: {}", v);
        }
        // Strictly rising series saturates toward 100
        assert!(rsi.get(99).unwrap() > 99.0);

        // Strictly falling series sits near 0
        let mut falling = synthetic_ohlcv(100);
        let inverted: Vec<f64> = (0..100).map(|i| 500.0 - i as f64).collect();
        falling.replace("close", Series::new("close".into(), inverted))?;
        let rsi = calculate_rsi(&falling, RSI_PERIOD)?;
        assert!(rsi.f64()?.get(99).unwrap() < 1.0);
        Ok(())
    }

    #[test]
    fn test_macd_requires_slow_span_history() -> Result<()> {
        let df = synthetic_ohlcv(60);
        let macd = calculate_macd(&df)?;
        let macd = macd.f64()?;

        assert_eq!(macd.get(MACD_SLOW_SPAN - 2), None);
        assert!(macd.get(MACD_SLOW_SPAN - 1).is_some());
        Ok(())
    }

    #[test]
    fn test_indicators_fully_defined_after_backfill() -> Result<()> {
        let mut df = synthetic_ohlcv(300);
        let result = add_technical_indicators(&mut df)?;

        assert_eq!(count_undefined(&result, &FEATURE_COLUMNS)?, 0);

        // Backward fill makes the leading rows equal the first computable value
        let sma200 = result.column("sma_200")?.f64()?;
        assert_eq!(sma200.get(0), sma200.get(199));
        Ok(())
    }

    #[test]
    fn test_missing_close_column_is_fatal() {
        let open = Series::new("open".into(), vec![1.0, 2.0, 3.0]);
        let mut df = DataFrame::new(vec![open.into_column()]).unwrap();

        let err = add_technical_indicators(&mut df).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(_)));
    }

    #[test]
    fn test_short_history_is_incomplete() {
        // Far fewer rows than the 200-row lookback
        let mut df = synthetic_ohlcv(50);
        let err = add_technical_indicators(&mut df).unwrap_err();
        assert!(matches!(err, PipelineError::IncompleteData(_)));
    }
}
