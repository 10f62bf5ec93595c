//! Error types for the risk simulator.

use crate::risk::SizingPolicy;
use thiserror::Error;

/// Main error type for the risk simulator.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Missing, malformed or empty historical source.
    #[error("Data error: {0}")]
    DataError(String),

    /// Invalid parameter or parameter combination.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A non-finite value appeared while a trial was running.
    #[error("Numeric integrity failure at step {step} (equity = {equity}): {detail}")]
    NumericIntegrity {
        step: usize,
        equity: f64,
        detail: String,
    },

    /// A trial failed for a reason other than numeric integrity.
    #[error("Trial {trial} ({policy} @ {starting_capital}) failed: {source}")]
    TrialFailed {
        starting_capital: f64,
        policy: SizingPolicy,
        trial: usize,
        source: Box<SimulationError>,
    },

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for simulator operations.
pub type Result<T> = std::result::Result<T, SimulationError>;
