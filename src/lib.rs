//! pathflux - Event log to transition graph and trajectory vector engine
//!
//! pathflux turns a tabular log of user events into behavioral trajectories, a
//! weighted directed transition graph, and per-trajectory feature vectors through a
//! deterministic pipeline: normalization → segmentation → transition aggregation →
//! graph normalization → vectorization → encoding.

pub mod aggregator;
pub mod config;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod normalizer;
pub mod pipeline;
pub mod segmenter;
pub mod stats;
pub mod types;
pub mod vectorizer;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::{
    AggregationMode, BoundaryPolicy, ColumnMapping, CountEncoding, DuplicatePolicy,
    NormalizationMode, PipelineConfig, VectorizationMode,
};
pub use error::PathError;
pub use graph::TransitionGraph;
pub use pipeline::{records_to_artifacts, Pipeline, PipelineOutput};
pub use types::{Event, Trajectory, TrajectorySet};
pub use vectorizer::{FeatureIndex, VectorSet};

/// Library version embedded in all artifacts
pub const PATHFLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for artifacts
pub const PRODUCER_NAME: &str = "pathflux";
