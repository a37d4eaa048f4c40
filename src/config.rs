//! Pipeline configuration
//!
//! Every option the pipeline recognizes lives in [`PipelineConfig`]. Unknown keys are
//! rejected at parse time and field values are checked by [`PipelineConfig::validate`]
//! before any stage runs.

use crate::error::PathError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How transitions are weighted while scanning trajectories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMode {
    /// +1 for every occurrence of a transition
    #[default]
    RawCount,
    /// +1 at most once per user for each transition
    UniqueUser,
    /// Sum of the time spent between the two events, in seconds at millisecond resolution
    TimeWeighted,
}

impl AggregationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMode::RawCount => "raw-count",
            AggregationMode::UniqueUser => "unique-user",
            AggregationMode::TimeWeighted => "time-weighted",
        }
    }
}

/// How aggregated edge weights are scaled into probability-like values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationMode {
    #[default]
    None,
    /// Divide by the total outgoing weight of the source node
    #[serde(alias = "node")]
    Row,
    /// Divide by the total weight of the whole graph
    Full,
}

impl NormalizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationMode::None => "none",
            NormalizationMode::Row => "row",
            NormalizationMode::Full => "full",
        }
    }
}

/// Vector encoding for trajectories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VectorizationMode {
    /// One component per event in the vocabulary
    #[default]
    CountBased,
    /// One component per transition observed in the run
    GraphBased,
}

/// Component values for count-based vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountEncoding {
    #[default]
    Count,
    Binary,
    /// Occurrences divided by trajectory length
    Frequency,
    /// Seconds from each occurrence to the next event, summed per event
    Time,
    /// `time` divided by the trajectory duration; all zero for zero-length trajectories
    TimeFraction,
}

/// What to do with repeated (user, event, timestamp) records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    KeepFirst,
    KeepAll,
    Error,
}

/// Where a boundary event goes when it splits a trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryPolicy {
    /// The boundary event opens the next trajectory
    #[default]
    StartNext,
    /// The boundary event closes the current trajectory
    EndCurrent,
    /// The boundary event is dropped
    Exclude,
}

/// Mapping from canonical fields to raw record keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ColumnMapping {
    pub user_id: String,
    pub event_name: String,
    pub timestamp: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            user_id: "user_id".to_string(),
            event_name: "event".to_string(),
            timestamp: "timestamp".to_string(),
        }
    }
}

/// Full option set for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Raw record key names
    pub columns: ColumnMapping,
    /// Maximum gap between consecutive events of one session, in seconds.
    /// Compared at nanosecond resolution.
    pub session_timeout_sec: Option<f64>,
    /// Event names that split trajectories
    pub boundary_events: BTreeSet<String>,
    pub boundary_policy: BoundaryPolicy,
    pub aggregation_mode: AggregationMode,
    pub normalization_mode: NormalizationMode,
    pub include_self_loops: bool,
    pub vectorization_mode: VectorizationMode,
    pub count_encoding: CountEncoding,
    pub duplicate_policy: DuplicatePolicy,
    /// Wrap each trajectory in synthetic `path_start` / `path_end` events
    pub add_path_markers: bool,
    /// Drop normalized edges lighter than this
    pub edge_weight_threshold: Option<f64>,
    /// Aggregate and vectorize on the rayon thread pool
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMapping::default(),
            session_timeout_sec: None,
            boundary_events: BTreeSet::new(),
            boundary_policy: BoundaryPolicy::default(),
            aggregation_mode: AggregationMode::default(),
            normalization_mode: NormalizationMode::default(),
            include_self_loops: true,
            vectorization_mode: VectorizationMode::default(),
            count_encoding: CountEncoding::default(),
            duplicate_policy: DuplicatePolicy::default(),
            add_path_markers: false,
            edge_weight_threshold: None,
            parallel: false,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, PathError> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| PathError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, PathError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check field values that serde cannot express
    pub fn validate(&self) -> Result<(), PathError> {
        let columns = [
            ("user_id", &self.columns.user_id),
            ("event_name", &self.columns.event_name),
            ("timestamp", &self.columns.timestamp),
        ];
        for (field, name) in columns {
            if name.trim().is_empty() {
                return Err(PathError::Config(format!(
                    "column mapping for {} must not be empty",
                    field
                )));
            }
        }
        let distinct: BTreeSet<&str> = columns.iter().map(|(_, n)| n.as_str()).collect();
        if distinct.len() != columns.len() {
            return Err(PathError::Config(
                "column mapping must use three distinct keys".to_string(),
            ));
        }

        if let Some(timeout) = self.session_timeout_sec {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(PathError::Config(format!(
                    "session_timeout_sec must be a positive number, got {}",
                    timeout
                )));
            }
        }

        if self.boundary_events.iter().any(|e| e.trim().is_empty()) {
            return Err(PathError::Config(
                "boundary_events must not contain empty names".to_string(),
            ));
        }

        if let Some(threshold) = self.edge_weight_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(PathError::Config(format!(
                    "edge_weight_threshold must be a non-negative number, got {}",
                    threshold
                )));
            }
        }

        Ok(())
    }

    /// Session timeout as a duration
    pub(crate) fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_sec.map(seconds_to_duration)
    }
}

/// Convert positive fractional seconds to a duration, saturating at the i64 nanosecond range
pub(crate) fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::nanoseconds((seconds * 1e9).round() as i64)
}
