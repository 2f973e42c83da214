// External crates
use log::debug;
use polars::prelude::*;
use rustalib::util::file_utils::read_financial_data;
use std::path::Path;

/// Reads a financial CSV into a DataFrame with standardized column names.
///
/// Wraps rustalib's `read_financial_data` and additionally maps
/// case-insensitive vendor spellings onto the canonical lowercase set
/// (`open`, `high`, `low`, `close`, `adjusted_close`, `volume`, `time`).
/// When the source has no adjusted close series, one is synthesized from
/// `close` so downstream feature processing always sees the full set.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
///
/// # Returns
///
/// Returns the DataFrame with standardized column names
pub fn read_financial_csv<P: AsRef<Path>>(file_path: P) -> PolarsResult<DataFrame> {
    let path_str = file_path.as_ref().to_str().ok_or_else(|| {
        PolarsError::ComputeError("CSV path is not valid UTF-8".into())
    })?;
    let (mut df, _metadata) = read_financial_data(path_str)?;

    // Identify columns whose spelling differs from the canonical name
    let mut rename_columns = Vec::new();
    for column_name in df.get_column_names() {
        let col_lower = column_name.to_lowercase();
        let standard_name = match col_lower.as_str() {
            "open" | "o" | "op" | "openprice" | "open_price" => "open",
            "high" | "h" | "highprice" | "high_price" | "max" => "high",
            "low" | "l" | "lowprice" | "low_price" | "min" => "low",
            "close" | "c" | "cl" | "closeprice" | "close_price" => "close",
            "volume" | "vol" | "v" | "volumes" => "volume",
            "timestamp" | "time" | "date" | "t" | "datetime" | "dt" | "day" => "time",
            "adj close" | "adj_close" | "adjusted close" | "adjusted_close" | "adjclose"
            | "adj" => "adjusted_close",
            _ => continue,
        };
        if column_name != standard_name {
            rename_columns.push((column_name.to_string(), standard_name.to_string()));
        }
    }

    if !rename_columns.is_empty() {
        debug!("Standardizing column names: {:?}", rename_columns);
        for (old_name, new_name) in rename_columns {
            df.rename(&old_name, new_name.into())?;
        }
    }

    // Volume often arrives as integers; the pipeline works in f64 throughout
    if df.schema().contains("volume") {
        let volume = df.column("volume")?.as_materialized_series().clone();
        if volume.dtype() != &DataType::Float64 {
            df.replace("volume", volume.cast(&DataType::Float64)?)?;
        }
    }

    if !df.schema().contains("adjusted_close") && df.schema().contains("close") {
        let close = df.column("close")?.as_materialized_series().clone();
        df.with_column(close.with_name("adjusted_close".into()))?;
    }

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_read_csv_standardizes_columns() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("bars.csv");
        let mut file = std::fs::File::create(&csv_path)?;
        writeln!(file, "Date,Open,High,Low,Close,Volume")?;
        for i in 0..5 {
            writeln!(
                file,
                "2024-01-0{},10.0,11.0,9.0,10.{},100{}",
                i + 1,
                i,
                i
            )?;
        }

        let df = read_financial_csv(&csv_path)?;
        for col in ["time", "open", "high", "low", "close", "volume", "adjusted_close"] {
            assert!(df.schema().contains(col), "missing column {}", col);
        }
        assert_eq!(df.column("volume")?.dtype(), &DataType::Float64);
        // Synthesized adjusted_close mirrors close
        let close = df.column("close")?.f64()?.get(0);
        let adj = df.column("adjusted_close")?.f64()?.get(0);
        assert_eq!(close, adj);
        Ok(())
    }
}
