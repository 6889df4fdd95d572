//! Error types for penalty compilation and solving.

use thiserror::Error;
use vmnet_core::ModelError;

/// Errors that can occur while compiling, checking or solving models.
#[derive(Error, Debug)]
pub enum HybridError {
    /// A penalty weight is not strictly positive and finite.
    #[error("Invalid weight {weight} for constraint {constraint}")]
    InvalidWeight {
        /// Label of the constraint.
        constraint: String,
        /// Offending weight.
        weight: f64,
    },

    /// The model uses a feature the backend cannot express.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The sampler failed. Not fatal inside the retune loop.
    #[error("Sampler failed: {0}")]
    Sampler(String),

    /// The exact backend failed.
    #[error("Exact solver failed: {0}")]
    ExactSolver(String),

    /// Topology or model error.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result type for hybrid operations.
pub type HybridResult<T> = Result<T, HybridError>;
