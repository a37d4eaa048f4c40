//! Artifact encoding
//!
//! This module encodes a pipeline run into the JSON exchange document consumed by
//! downstream visualization and clustering tools.

use crate::config::{AggregationMode, NormalizationMode, PipelineConfig, VectorizationMode};
use crate::error::PathError;
use crate::graph::GraphExport;
use crate::pipeline::PipelineOutput;
use crate::stats::RunStats;
use crate::vectorizer::{FeatureIndex, TrajectoryVector};
use crate::{PATHFLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

/// Current artifact format version
pub const FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
pub struct GraphSection {
    pub aggregation_mode: AggregationMode,
    pub normalization_mode: NormalizationMode,
    #[serde(flatten)]
    pub export: GraphExport,
}

#[derive(Debug, Serialize)]
pub struct VectorSection<'a> {
    pub mode: VectorizationMode,
    pub index: &'a FeatureIndex,
    pub labels: Vec<String>,
    pub rows: &'a [TrajectoryVector],
}

/// Complete exchange document for one run
#[derive(Debug, Serialize)]
pub struct ArtifactPayload<'a> {
    pub format_version: &'static str,
    pub producer: Producer,
    pub run_id: String,
    pub computed_at_utc: String,
    pub config: &'a PipelineConfig,
    pub graph: GraphSection,
    pub vectors: VectorSection<'a>,
    pub stats: &'a RunStats,
}

/// Encoder for pipeline artifacts
pub struct ArtifactEncoder {
    instance_id: String,
}

impl Default for ArtifactEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn encode<'a>(
        &self,
        output: &'a PipelineOutput,
        config: &'a PipelineConfig,
    ) -> ArtifactPayload<'a> {
        let graph = GraphSection {
            aggregation_mode: output.graph.aggregation_mode(),
            normalization_mode: output.graph.normalization_mode(),
            export: output.graph.to_export(),
        };

        let vectors = VectorSection {
            mode: output.vectors.mode,
            index: &output.vectors.index,
            labels: output.vectors.index.labels(),
            rows: &output.vectors.vectors,
        };

        ArtifactPayload {
            format_version: FORMAT_VERSION,
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: PATHFLUX_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            run_id: output.run_id.to_string(),
            computed_at_utc: Utc::now().to_rfc3339(),
            config,
            graph,
            vectors,
            stats: &output.stats,
        }
    }

    pub fn encode_to_json(
        &self,
        output: &PipelineOutput,
        config: &PipelineConfig,
    ) -> Result<String, PathError> {
        Ok(serde_json::to_string(&self.encode(output, config))?)
    }

    pub fn encode_to_json_pretty(
        &self,
        output: &PipelineOutput,
        config: &PipelineConfig,
    ) -> Result<String, PathError> {
        Ok(serde_json::to_string_pretty(&self.encode(output, config))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::EventNormalizer;
    use crate::pipeline::Pipeline;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn run() -> (PipelineOutput, PipelineConfig) {
        let records = json!([
            {"user_id": "u1", "event": "A", "timestamp": "2024-01-15T10:00:00Z"},
            {"user_id": "u1", "event": "B", "timestamp": "2024-01-15T10:01:00Z"},
            {"user_id": "u2", "event": "A", "timestamp": "2024-01-15T10:00:00Z"},
        ]);
        let records = EventNormalizer::parse_array(&records.to_string()).unwrap();
        let config = PipelineConfig::default();
        let output = Pipeline::new(config.clone()).unwrap().run(&records).unwrap();
        (output, config)
    }

    #[test]
    fn test_encode_document_layout() {
        let (output, config) = run();
        let encoder = ArtifactEncoder::with_instance_id("test-instance".to_string());
        let json = encoder.encode_to_json(&output, &config).unwrap();
        let doc: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(doc["format_version"], FORMAT_VERSION);
        assert_eq!(doc["producer"]["name"], PRODUCER_NAME);
        assert_eq!(doc["producer"]["instance_id"], "test-instance");
        assert_eq!(doc["run_id"], output.run_id.to_string());
        assert_eq!(doc["graph"]["aggregation_mode"], "raw-count");
        assert_eq!(doc["graph"]["nodes"], json!([{"name": "A"}, {"name": "B"}]));
        assert_eq!(
            doc["graph"]["edges"],
            json!([{"source": "A", "target": "B", "weight": 1.0}])
        );
        assert_eq!(doc["vectors"]["mode"], "count-based");
        assert_eq!(doc["vectors"]["labels"], json!(["A", "B"]));
        assert_eq!(doc["vectors"]["rows"][0]["trajectory_id"], "u1_1");
        assert_eq!(doc["vectors"]["rows"][0]["values"], json!([1.0, 1.0]));
        assert_eq!(doc["stats"]["summary"]["trajectories"], 2);
        assert!(doc["computed_at_utc"].as_str().is_some());
    }

    #[test]
    fn test_pretty_and_compact_carry_same_document() {
        let (output, config) = run();
        let encoder = ArtifactEncoder::new();

        let compact: Value =
            serde_json::from_str(&encoder.encode_to_json(&output, &config).unwrap()).unwrap();
        let pretty: Value =
            serde_json::from_str(&encoder.encode_to_json_pretty(&output, &config).unwrap()).unwrap();

        assert_eq!(compact["graph"], pretty["graph"]);
        assert_eq!(compact["vectors"], pretty["vectors"]);
    }
}
