use thiserror::Error;

/// Failures surfaced by the engine's public entry points.
///
/// Thin-data conditions are normally reported through the `ready` flags on
/// the calibration and backtest reports; `InsufficientSamples` is only returned
/// when a caller explicitly asks for a fitted result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("insufficient samples: {available} usable, {required} required")]
    InsufficientSamples { required: usize, available: usize },

    #[error("no combo passed the quality thresholds ({evaluated} evaluated); relax the filter")]
    NoQualifyingCombo { evaluated: usize },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
