//! Error types for pathflux

use thiserror::Error;

/// Errors that can occur while turning an event log into graph and vector artifacts
#[derive(Debug, Error)]
pub enum PathError {
    /// A raw record is missing a required field or carries an unparsable value
    #[error("Schema error in record {index}: {message}")]
    Schema { index: usize, message: String },

    /// A user has no qualifying events left after filtering
    #[error("No events left for user {user_id} after segmentation")]
    EmptyTrajectory { user_id: String },

    /// Normalization needs a non-zero denominator and the graph has none
    #[error("Empty graph: {0}")]
    EmptyGraph(String),

    /// Events inside a trajectory are not in (timestamp, index) order
    #[error("Ordering violated in trajectory {trajectory}: {message}")]
    Ordering { trajectory: String, message: String },

    /// Vectorization was called with an index from another run or vocabulary
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PathError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            PathError::Schema { .. } => "SCHEMA_ERROR",
            PathError::EmptyTrajectory { .. } => "EMPTY_TRAJECTORY",
            PathError::EmptyGraph(_) => "EMPTY_GRAPH",
            PathError::Ordering { .. } => "ORDERING_ERROR",
            PathError::UnknownEvent(_) => "UNKNOWN_EVENT",
            PathError::Config(_) => "CONFIG_ERROR",
            PathError::Json(_) => "JSON_ERROR",
        }
    }
}
