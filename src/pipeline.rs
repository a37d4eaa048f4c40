//! Pipeline orchestration
//!
//! This module provides the public API for pathflux.
//! It orchestrates the full pipeline from raw event records to graph and vector artifacts.

use crate::aggregator::TransitionAggregator;
use crate::config::PipelineConfig;
use crate::encoder::ArtifactEncoder;
use crate::error::PathError;
use crate::graph::{GraphNormalizer, TransitionGraph};
use crate::normalizer::{EventNormalizer, RejectedRecord};
use crate::segmenter::TrajectorySegmenter;
use crate::stats::{RunStats, StatsCollector};
use crate::types::{Event, RawRecord, TrajectorySet};
use crate::vectorizer::{TrajectoryVectorizer, VectorSet};
use tracing::info;
use uuid::Uuid;

/// Artifacts of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub graph: TransitionGraph,
    pub vectors: VectorSet,
    pub stats: RunStats,
}

/// Configured pipeline. Each call to [`Pipeline::run`] is an independent run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    normalizer: EventNormalizer,
    segmenter: TrajectorySegmenter,
    aggregator: TransitionAggregator,
    graph_normalizer: GraphNormalizer,
    vectorizer: TrajectoryVectorizer,
    stats: StatsCollector,
}

impl Pipeline {
    /// Build a pipeline, rejecting invalid configuration before any stage runs
    pub fn new(config: PipelineConfig) -> Result<Self, PathError> {
        config.validate()?;
        Ok(Self {
            normalizer: EventNormalizer::from_config(&config),
            segmenter: TrajectorySegmenter::from_config(&config),
            aggregator: TransitionAggregator::from_config(&config),
            graph_normalizer: GraphNormalizer::from_config(&config),
            vectorizer: TrajectoryVectorizer::from_config(&config),
            stats: StatsCollector::default(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over raw records.
    ///
    /// Pipeline stages:
    /// 1. EventNormalizer - Validate records into canonical events
    /// 2. TrajectorySegmenter - Group by user and split into sessions
    /// 3. TransitionAggregator - Accumulate edge weights
    /// 4. GraphNormalizer - Scale weights and freeze the graph
    /// 5. TrajectoryVectorizer - Fit the index, then vectorize
    /// 6. StatsCollector - Describe the run
    pub fn run(&self, records: &[RawRecord]) -> Result<PipelineOutput, PathError> {
        let events = self.normalizer.normalize(records)?;
        self.run_events(events)
    }

    /// Like [`Pipeline::run`], but malformed records are skipped and reported
    pub fn run_lenient(
        &self,
        records: &[RawRecord],
    ) -> Result<(PipelineOutput, Vec<RejectedRecord>), PathError> {
        let report = self.normalizer.normalize_lenient(records);
        let output = self.run_events(report.events)?;
        Ok((output, report.rejected))
    }

    /// Run the stages after normalization over already canonical events
    pub fn run_events(&self, events: Vec<Event>) -> Result<PipelineOutput, PathError> {
        let event_count = events.len();
        let trajectories = self.segmenter.segment(events)?;
        let raw = self.aggregator.aggregate(&trajectories.trajectories)?;
        let graph = self.graph_normalizer.normalize(raw)?;
        let vectors = self.vectorizer.fit_transform(&trajectories)?;
        let stats = self.stats.collect(&trajectories);

        info!(
            run_id = %trajectories.run_id,
            events = event_count,
            trajectories = trajectories.len(),
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            "pipeline run complete"
        );

        Ok(PipelineOutput {
            run_id: trajectories.run_id,
            graph,
            vectors,
            stats,
        })
    }

    /// Normalize and segment only
    pub fn segment(&self, records: &[RawRecord]) -> Result<TrajectorySet, PathError> {
        let events = self.normalizer.normalize(records)?;
        self.segmenter.segment(events)
    }

    /// Descriptive statistics without building the graph
    pub fn describe(&self, records: &[RawRecord]) -> Result<RunStats, PathError> {
        let trajectories = self.segment(records)?;
        Ok(self.stats.collect(&trajectories))
    }

    /// Report malformed records without running any later stage
    pub fn validate(&self, records: &[RawRecord]) -> Vec<RejectedRecord> {
        self.normalizer.validate_records(records)
    }
}

/// Turn a JSON array of records into the encoded artifact document.
///
/// # Arguments
/// * `records_json` - JSON array of raw event records
/// * `config_json` - Pipeline configuration; an empty string selects the defaults
///
/// # Example
/// ```ignore
/// let artifact = records_to_artifacts(
///     r#"[{"user_id": "u1", "event": "open", "timestamp": "2024-01-15T10:00:00Z"}]"#,
///     r#"{"aggregation_mode": "unique-user"}"#,
/// )?;
/// ```
pub fn records_to_artifacts(records_json: &str, config_json: &str) -> Result<String, PathError> {
    let config = if config_json.trim().is_empty() {
        PipelineConfig::default()
    } else {
        PipelineConfig::from_json(config_json)?
    };
    let records = EventNormalizer::parse_array(records_json)?;
    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run(&records)?;
    ArtifactEncoder::new().encode_to_json(&output, pipeline.config())
}
