//! Error type shared by the distribution, optimizer and estimator layers.

use thiserror::Error;

/// Errors raised while re-parameterizing distributions, optimizing the
/// sampling model, or accumulating batch statistics.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A re-parameterization would produce a non-finite or out-of-range parameter.
    #[error("invalid parameterization of {family}: mean {mean}, shape {shape}: {reason}")]
    InvalidParameterization {
        family: &'static str,
        mean: f64,
        shape: f64,
        reason: String,
    },

    /// No scenario in a cross-entropy round scored above the elite threshold.
    #[error("empty elite set in round {round}: no scenario scored above {threshold}")]
    EmptyEliteSet { round: usize, threshold: u32 },

    /// Elite scenarios exist but none carries a usable weight.
    #[error("degenerate weights in round {round}: none of {elite_count} elite scenarios has a finite weight")]
    DegenerateWeights { round: usize, elite_count: usize },

    /// A model does not have one variable per scenario coordinate.
    #[error("model dimension mismatch: expected {expected} variables, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Every importance weight drawn in a batch was non-finite.
    #[error("all {trials} importance weights in the batch were non-finite")]
    AllWeightsRejected { trials: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
