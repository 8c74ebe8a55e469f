use thiserror::Error;

/// Errors that can occur when configuring or training an HMM.
#[derive(Debug, Error)]
pub enum HmmError {
    #[error("Invalid number of states: {0} (must be >= 1)")]
    InvalidStateCount(usize),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Probability must be in [0, 1] (got {value} at index {index})")]
    InvalidProbability { index: usize, value: f64 },

    #[error("Probability vector must sum to 1.0 (got {sum})")]
    InvalidProbabilitySum { sum: f64 },

    #[error("Transition matrix row {row} must sum to 1.0 (got {sum})")]
    InvalidTransitionRow { row: usize, sum: f64 },

    #[error("Operation requires a {expected} model")]
    VariantMismatch { expected: &'static str },

    #[error("Missing data: {0}")]
    MissingData(&'static str),

    #[error("Observation sequence is empty")]
    EmptyObservations,

    #[error("Observation[{index}] = {symbol} out of range (n_symbols = {n_symbols})")]
    SymbolOutOfRange {
        index: usize,
        symbol: usize,
        n_symbols: usize,
    },

    #[error("Time emission log-likelihood at [{timepoint}][{state}] is zero or not finite")]
    NonFiniteEmission { timepoint: usize, state: usize },

    #[error("Timepoint {timepoint} out of range (n_timepoints = {n_timepoints})")]
    TimepointOutOfRange {
        timepoint: usize,
        n_timepoints: usize,
    },

    #[error("No start-to-end path of non-zero weight; current parameters forbid every trajectory")]
    NoPath,

    #[error("NaN encountered during log-space accumulation")]
    NumericError,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Model file not found: {0}")]
    ModelFileNotFound(String),
}
