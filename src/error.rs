//! Error types for fisher-mva
//!
//! The taxonomy follows the failure modes of the training pipeline: bad
//! configuration, missing inputs, empty selections, failed fits, and I/O.
//! None of these are retried anywhere; every failure is fatal to the run.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// fisher-mva error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration: malformed cut/weight expression, unknown or
    /// duplicate feature, bad method option string
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input file or named event table does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A selection predicate left zero rows for one class
    #[error("empty training set: cut '{cut}' matched no {class} events")]
    EmptyTrainingSet {
        /// Class whose selection survived zero rows
        class: String,
        /// The selection predicate that was applied
        cut: String,
    },

    /// Model fitting failed on degenerate inputs
    #[error("training failed for method '{method}': {reason}")]
    Training {
        /// Booked method name
        method: String,
        /// What went wrong during the fit
        reason: String,
    },

    /// Storage error (Parquet/Arrow)
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Results container serialization error
    #[error("results serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
