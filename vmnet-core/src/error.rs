//! Error types for topology and model construction.

use thiserror::Error;

use crate::ids::NodeId;

/// Errors that can occur while building topologies and models.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Malformed topology or demand parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A model was requested before the data it depends on exists.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// A model invariant would be broken (unknown variable, duplicate label, ...).
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// An assignment does not bind every variable of the model.
    #[error(
        "Incomplete assignment: {} variable(s) missing, first is {}",
        missing.len(),
        missing.first().map(String::as_str).unwrap_or("?")
    )]
    IncompleteAssignment {
        /// Display names of the unbound variables.
        missing: Vec<String>,
    },

    /// Node id outside the topology.
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
