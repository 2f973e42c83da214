// Feature columns fed to the model, in the fixed order used everywhere:
// scaling, windowing, training and prediction all index into this set.
pub const FEATURE_COLUMNS: [&str; 15] = [
    "open",
    "high",
    "low",
    "close",
    "adjusted_close",
    "volume",
    "sma_50",
    "sma_200",
    "returns",
    "volatility_50",
    "sma_20",
    "bb_upper",
    "bb_lower",
    "rsi_14",
    "macd",
];

/// Column the model predicts.
pub const TARGET_COLUMN: &str = "close";

/// Columns that must be present in the raw input before feature engineering.
pub const REQUIRED_INPUT_COLUMNS: [&str; 6] =
    ["open", "high", "low", "close", "adjusted_close", "volume"];

// Indicator parameters
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST_SPAN: usize = 12;
pub const MACD_SLOW_SPAN: usize = 26;
pub const VOLATILITY_WINDOW: usize = 50;
pub const BOLLINGER_WINDOW: usize = 20;
/// Floor applied to the rolling loss average so RSI never divides by zero.
pub const RSI_LOSS_EPSILON: f64 = 1e-10;

// Model parameters
pub const SEQUENCE_LENGTH: usize = 60; // Number of time steps to look back

// Data preprocessing
pub const VALIDATION_SPLIT_RATIO: f64 = 0.2; // 20% of windows for validation when n_folds <= 1

// Artifact locations
pub const MODEL_DIR: &str = "models";
pub const SCALER_DIR: &str = "scalers";
/// Distinguished artifact key for the retained best fold.
pub const BEST_MODEL_KEY: &str = "best";
