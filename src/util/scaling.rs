// External crates
use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Local modules
use crate::constants::{FEATURE_COLUMNS, TARGET_COLUMN};
use crate::error::{PipelineError, Result};

/// Which of the two pipeline scalers an artifact belongs to.
///
/// The feature scaler covers every model input except the target; the close
/// scaler covers the target alone so its scale stays independently
/// invertible. The two column sets are disjoint by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerRole {
    Feature,
    Close,
}

impl ScalerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalerRole::Feature => "feature",
            ScalerRole::Close => "close",
        }
    }
}

/// Min-max normalization transform fitted over a named column set.
///
/// Stores per-column `(min, max)` from the fitting range. Immutable once
/// fitted; persisted artifacts are loaded read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    columns: Vec<String>,
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl MinMaxScaler {
    /// Fits the scaler over the given columns' full value range.
    pub fn fit(df: &DataFrame, columns: &[&str]) -> Result<Self> {
        let mut mins = Vec::with_capacity(columns.len());
        let mut maxs = Vec::with_capacity(columns.len());

        for &col in columns {
            let series = df
                .column(col)
                .map_err(|_| PipelineError::MissingColumn(col.to_string()))?;
            let chunked = series.f64()?;
            mins.push(chunked.min().unwrap_or(0.0));
            maxs.push(chunked.max().unwrap_or(1.0));
        }

        Ok(Self {
            columns: columns.iter().map(|&c| c.to_string()).collect(),
            mins,
            maxs,
        })
    }

    /// Fits over the given columns and scales them in place.
    pub fn fit_transform(df: &mut DataFrame, columns: &[&str]) -> Result<Self> {
        let scaler = Self::fit(df, columns)?;
        scaler.transform(df)?;
        Ok(scaler)
    }

    /// Scales the fitted columns in place to [0, 1] over the fitted range.
    pub fn transform(&self, df: &mut DataFrame) -> Result<()> {
        for (idx, col) in self.columns.iter().enumerate() {
            let series = df
                .column(col)
                .map_err(|_| PipelineError::MissingColumn(col.clone()))?;
            let chunked = series.f64()?;
            let min = self.mins[idx];
            let range = self.range(idx);

            let scaled: Vec<Option<f64>> = chunked
                .into_iter()
                .map(|opt| opt.map(|v| (v - min) / range))
                .collect();
            df.replace(col, Series::new(col.as_str().into(), scaled))?;
        }
        Ok(())
    }

    /// Maps full-width scaled rows back to original units. Each row must be
    /// as wide as the fitted column set, in fitted column order.
    pub fn inverse_transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let width = self.columns.len();
        let mut restored = Vec::with_capacity(rows.len());

        for row in rows {
            if row.len() != width {
                return Err(PipelineError::IncompleteData(format!(
                    "inverse transform expects rows of width {}, got {}",
                    width,
                    row.len()
                )));
            }
            let mut out = Vec::with_capacity(width);
            for (idx, &v) in row.iter().enumerate() {
                out.push(v * self.range(idx) + self.mins[idx]);
            }
            restored.push(out);
        }

        Ok(restored)
    }

    /// Inverts a single column's scaled values.
    ///
    /// Because the transform was fit jointly across the column set, a full
    /// width row is reconstructed (zero-padding the other columns) and the
    /// requested column extracted from the joint inverse.
    pub fn inverse_column(&self, column: &str, values: &[f64]) -> Result<Vec<f64>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| PipelineError::MissingColumn(column.to_string()))?;

        let width = self.columns.len();
        let padded: Vec<Vec<f64>> = values
            .iter()
            .map(|&v| {
                let mut row = vec![0.0; width];
                row[idx] = v;
                row
            })
            .collect();

        let restored = self.inverse_transform(&padded)?;
        Ok(restored.into_iter().map(|row| row[idx]).collect())
    }

    /// Scales one raw value of the given fitted column.
    pub fn scale_value(&self, column: &str, value: f64) -> Result<f64> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| PipelineError::MissingColumn(column.to_string()))?;
        Ok((value - self.mins[idx]) / self.range(idx))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    // Constant columns would make the transform non-invertible; treat their
    // range as unit width instead.
    fn range(&self, idx: usize) -> f64 {
        let range = self.maxs[idx] - self.mins[idx];
        if range.abs() < f64::EPSILON {
            1.0
        } else {
            range
        }
    }
}

/// Fits and applies the feature scaler: every feature column except the
/// target, so feature scaling never touches the target's independent scale.
pub fn fit_transform_features(df: &mut DataFrame) -> Result<MinMaxScaler> {
    let columns: Vec<&str> = FEATURE_COLUMNS
        .iter()
        .copied()
        .filter(|&c| c != TARGET_COLUMN)
        .collect();
    MinMaxScaler::fit_transform(df, &columns)
}

/// Fits and applies the target scaler over the close column alone.
pub fn fit_transform_close(df: &mut DataFrame) -> Result<MinMaxScaler> {
    MinMaxScaler::fit_transform(df, &[TARGET_COLUMN])
}

/// Artifact location for a persisted scaler, keyed by instrument and role.
pub fn scaler_path(dir: &Path, ticker: &str, role: ScalerRole) -> PathBuf {
    dir.join(format!("{}_scaler_{}.json", role.as_str(), ticker))
}

/// Persists a fitted scaler as a JSON artifact.
pub fn save_scaler(
    scaler: &MinMaxScaler,
    dir: &Path,
    ticker: &str,
    role: ScalerRole,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = scaler_path(dir, ticker, role);
    let json = serde_json::to_string_pretty(scaler).map_err(|e| {
        PipelineError::ScalerLoad(format!("failed to serialize scaler: {}", e))
    })?;
    std::fs::write(&path, json)?;
    info!("Scaler saved at {}", path.display());
    Ok(path)
}

/// Loads a persisted scaler. Missing or corrupt artifacts are fatal; there
/// is no fallback to an unscaled path.
pub fn load_scaler(dir: &Path, ticker: &str, role: ScalerRole) -> Result<MinMaxScaler> {
    let path = scaler_path(dir, ticker, role);
    let json = std::fs::read_to_string(&path).map_err(|e| {
        PipelineError::ScalerLoad(format!("{}: {}", path.display(), e))
    })?;
    serde_json::from_str(&json)
        .map_err(|e| PipelineError::ScalerLoad(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn two_column_frame() -> DataFrame {
        let a = Series::new("a".into(), vec![10.0, 12.0, 15.0, 20.0]);
        let b = Series::new("b".into(), vec![0.0, 1.0, 2.0, 4.0]);
        DataFrame::new(vec![a.into_column(), b.into_column()]).unwrap()
    }

    #[test]
    fn test_known_range_maps_midpoint_to_half() -> Result<()> {
        let mut df = two_column_frame();
        let scaler = MinMaxScaler::fit_transform(&mut df, &["a", "b"])?;

        // min=10, max=20 maps 15 to 0.5 exactly
        let a = df.column("a")?.f64()?;
        assert_eq!(a.get(2), Some(0.5));
        assert_eq!(a.get(0), Some(0.0));
        assert_eq!(a.get(3), Some(1.0));

        let restored = scaler.inverse_column("a", &[0.5])?;
        assert_eq!(restored[0], 15.0);
        Ok(())
    }

    #[test]
    fn test_round_trip_law() -> Result<()> {
        let df = two_column_frame();
        let scaler = MinMaxScaler::fit(&df, &["a", "b"])?;

        for &(a, b) in &[(10.0, 0.0), (13.3, 2.7), (20.0, 4.0)] {
            let scaled = vec![vec![
                scaler.scale_value("a", a)?,
                scaler.scale_value("b", b)?,
            ]];
            let restored = scaler.inverse_transform(&scaled)?;
            assert!((restored[0][0] - a).abs() < 1e-12);
            assert!((restored[0][1] - b).abs() < 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_feature_and_close_scalers_are_disjoint() -> Result<()> {
        let mut df = crate::util::test_utils::synthetic_ohlcv(10);
        // Restrict to raw columns for this test; indicators are irrelevant
        let feature_scaler = MinMaxScaler::fit_transform(
            &mut df,
            &["open", "high", "low", "adjusted_close", "volume"],
        )?;

        assert!(!feature_scaler.columns().iter().any(|c| c == TARGET_COLUMN));
        // Target column untouched by the feature transform
        let close = df.column("close")?.f64()?;
        assert_eq!(close.get(0), Some(100.0));

        let close_scaler = MinMaxScaler::fit_transform(&mut df, &[TARGET_COLUMN])?;
        assert_eq!(close_scaler.columns(), &[TARGET_COLUMN.to_string()]);
        let close = df.column("close")?.f64()?;
        assert_eq!(close.get(0), Some(0.0));
        assert_eq!(close.get(9), Some(1.0));
        Ok(())
    }

    #[test]
    fn test_persistence_round_trip() -> Result<()> {
        let df = two_column_frame();
        let scaler = MinMaxScaler::fit(&df, &["a", "b"])?;

        let temp_dir = tempdir()?;
        save_scaler(&scaler, temp_dir.path(), "TEST", ScalerRole::Feature)?;
        let loaded = load_scaler(temp_dir.path(), "TEST", ScalerRole::Feature)?;

        assert_eq!(scaler, loaded);
        Ok(())
    }

    #[test]
    fn test_load_missing_scaler_fails() {
        let temp_dir = tempdir().unwrap();
        let err = load_scaler(temp_dir.path(), "NONE", ScalerRole::Close).unwrap_err();
        assert!(matches!(err, PipelineError::ScalerLoad(_)));
    }

    #[test]
    fn test_fit_missing_column_fails() {
        let df = two_column_frame();
        let err = MinMaxScaler::fit(&df, &["a", "missing"]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(_)));
    }
}
