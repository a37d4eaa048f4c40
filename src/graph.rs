//! Graph normalization
//!
//! Turns raw aggregated edge weights into a frozen [`TransitionGraph`] whose weights
//! are passed through, row-normalized (outgoing probabilities), or normalized over
//! the whole graph.

use crate::aggregator::AggregatedGraph;
use crate::config::{AggregationMode, NormalizationMode, PipelineConfig};
use crate::error::PathError;
use crate::types::Edge;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Node entry in the graph exchange format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
}

/// Graph exchange format: `nodes = [{name}]`, `edges = [{source, target, weight}]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<Edge>,
}

/// Dense adjacency matrix over the sorted node list (row = source, column = target)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl TransitionMatrix {
    pub fn get(&self, source: &str, target: &str) -> Option<f64> {
        let row = self.labels.iter().position(|l| l == source)?;
        let col = self.labels.iter().position(|l| l == target)?;
        self.values.get(row)?.get(col).copied()
    }
}

/// Immutable snapshot of a normalized transition graph.
///
/// Every edge endpoint is a node, and nodes and edges are kept sorted. Only
/// [`GraphNormalizer`] builds one, so there is no `Deserialize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionGraph {
    aggregation_mode: AggregationMode,
    normalization_mode: NormalizationMode,
    nodes: Vec<String>,
    edges: Vec<Edge>,
}

impl TransitionGraph {
    pub fn aggregation_mode(&self) -> AggregationMode {
        self.aggregation_mode
    }

    pub fn normalization_mode(&self) -> NormalizationMode {
        self.normalization_mode
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn weight(&self, source: &str, target: &str) -> Option<f64> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
            .map(|e| e.weight)
    }

    /// Edges leaving `node`
    pub fn outgoing<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node)
    }

    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// Copy of the graph without edges lighter than `min_weight`. Nodes are kept.
    pub fn with_edge_threshold(&self, min_weight: f64) -> TransitionGraph {
        TransitionGraph {
            aggregation_mode: self.aggregation_mode,
            normalization_mode: self.normalization_mode,
            nodes: self.nodes.clone(),
            edges: self
                .edges
                .iter()
                .filter(|e| e.weight >= min_weight)
                .cloned()
                .collect(),
        }
    }

    pub fn transition_matrix(&self) -> TransitionMatrix {
        let positions: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let mut values = vec![vec![0.0; self.nodes.len()]; self.nodes.len()];
        for edge in &self.edges {
            if let (Some(&row), Some(&col)) = (
                positions.get(edge.source.as_str()),
                positions.get(edge.target.as_str()),
            ) {
                values[row][col] = edge.weight;
            }
        }
        TransitionMatrix {
            labels: self.nodes.clone(),
            values,
        }
    }

    pub fn to_export(&self) -> GraphExport {
        GraphExport {
            nodes: self
                .nodes
                .iter()
                .map(|name| NodeRecord { name: name.clone() })
                .collect(),
            edges: self.edges.clone(),
        }
    }
}

/// Normalizer for aggregated graphs
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphNormalizer {
    mode: NormalizationMode,
    edge_weight_threshold: Option<f64>,
}

impl GraphNormalizer {
    pub fn new(mode: NormalizationMode) -> Self {
        Self {
            mode,
            edge_weight_threshold: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            mode: config.normalization_mode,
            edge_weight_threshold: config.edge_weight_threshold,
        }
    }

    /// Normalize raw weights into a frozen graph. The node set is carried over unchanged.
    pub fn normalize(&self, raw: AggregatedGraph) -> Result<TransitionGraph, PathError> {
        let edges = match self.mode {
            NormalizationMode::None => raw
                .edges
                .iter()
                .map(|(key, &weight)| edge(&key.source, &key.target, weight))
                .collect(),
            NormalizationMode::Row => normalize_rows(&raw),
            NormalizationMode::Full => normalize_full(&raw)?,
        };

        let graph = TransitionGraph {
            aggregation_mode: raw.mode,
            normalization_mode: self.mode,
            nodes: raw.nodes.into_iter().collect(),
            edges,
        };
        let graph = match self.edge_weight_threshold {
            Some(threshold) => graph.with_edge_threshold(threshold),
            None => graph,
        };

        debug!(
            mode = self.mode.as_str(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "normalized transition graph"
        );
        Ok(graph)
    }
}

fn edge(source: &str, target: &str, weight: f64) -> Edge {
    Edge {
        source: source.to_string(),
        target: target.to_string(),
        weight,
    }
}

/// Divide each weight by its source's outgoing total; zero rows stay zero
fn normalize_rows(raw: &AggregatedGraph) -> Vec<Edge> {
    let mut outgoing: BTreeMap<&str, f64> = BTreeMap::new();
    for (key, weight) in &raw.edges {
        *outgoing.entry(key.source.as_str()).or_insert(0.0) += weight;
    }

    raw.edges
        .iter()
        .map(|(key, &weight)| {
            let total = outgoing.get(key.source.as_str()).copied().unwrap_or(0.0);
            let normalized = if total > 0.0 { weight / total } else { 0.0 };
            edge(&key.source, &key.target, normalized)
        })
        .collect()
}

/// Divide each weight by the graph total
fn normalize_full(raw: &AggregatedGraph) -> Result<Vec<Edge>, PathError> {
    if raw.edges.is_empty() {
        return Err(PathError::EmptyGraph(
            "full normalization needs at least one edge".to_string(),
        ));
    }
    let total = raw.total_weight();
    if total <= 0.0 {
        return Err(PathError::EmptyGraph(format!(
            "full normalization needs a positive total weight, got {}",
            total
        )));
    }
    Ok(raw
        .edges
        .iter()
        .map(|(key, &weight)| edge(&key.source, &key.target, weight / total))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EdgeKey;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    const EPS: f64 = 1e-9;

    fn raw_graph(nodes: &[&str], edges: &[(&str, &str, f64)]) -> AggregatedGraph {
        AggregatedGraph {
            mode: AggregationMode::RawCount,
            nodes: nodes.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>(),
            edges: edges
                .iter()
                .map(|(s, t, w)| (EdgeKey::new(*s, *t), *w))
                .collect(),
        }
    }

    fn scenario() -> AggregatedGraph {
        raw_graph(
            &["A", "B", "C", "D"],
            &[("A", "B", 2.0), ("B", "C", 1.0), ("B", "D", 1.0)],
        )
    }

    #[test]
    fn test_none_passes_weights_through() {
        let graph = GraphNormalizer::new(NormalizationMode::None)
            .normalize(scenario())
            .unwrap();
        assert_eq!(graph.weight("A", "B"), Some(2.0));
        assert_eq!(graph.nodes(), ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_row_normalization_scenario() {
        let graph = GraphNormalizer::new(NormalizationMode::Row)
            .normalize(scenario())
            .unwrap();

        assert!((graph.weight("A", "B").unwrap() - 1.0).abs() < EPS);
        assert!((graph.weight("B", "C").unwrap() - 0.5).abs() < EPS);
        assert!((graph.weight("B", "D").unwrap() - 0.5).abs() < EPS);
    }

    #[test]
    fn test_row_sums_to_one() {
        let raw = raw_graph(
            &["A", "B", "C"],
            &[
                ("A", "A", 3.0),
                ("A", "B", 7.0),
                ("A", "C", 0.1),
                ("B", "C", 13.0),
                ("C", "A", 0.3),
                ("C", "B", 0.7),
            ],
        );
        let graph = GraphNormalizer::new(NormalizationMode::Row)
            .normalize(raw)
            .unwrap();

        for node in graph.nodes() {
            let sum: f64 = graph.outgoing(node).map(|e| e.weight).sum();
            assert!((sum - 1.0).abs() < EPS, "row {} sums to {}", node, sum);
        }
    }

    #[test]
    fn test_row_with_zero_outgoing_weight_stays_zero() {
        let raw = raw_graph(&["A", "B"], &[("A", "B", 0.0)]);
        let graph = GraphNormalizer::new(NormalizationMode::Row)
            .normalize(raw)
            .unwrap();
        assert_eq!(graph.weight("A", "B"), Some(0.0));
    }

    #[test]
    fn test_row_on_edgeless_graph_keeps_nodes() {
        let raw = raw_graph(&["A"], &[]);
        let graph = GraphNormalizer::new(NormalizationMode::Row)
            .normalize(raw)
            .unwrap();
        assert_eq!(graph.nodes(), ["A"]);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_full_sums_to_one() {
        let graph = GraphNormalizer::new(NormalizationMode::Full)
            .normalize(scenario())
            .unwrap();
        assert!((graph.total_weight() - 1.0).abs() < EPS);
        assert!((graph.weight("A", "B").unwrap() - 0.5).abs() < EPS);
    }

    #[test]
    fn test_full_on_empty_graph_fails() {
        let result = GraphNormalizer::new(NormalizationMode::Full).normalize(raw_graph(&["A"], &[]));
        assert!(matches!(result, Err(PathError::EmptyGraph(_))));

        let zero = raw_graph(&["A", "B"], &[("A", "B", 0.0)]);
        let result = GraphNormalizer::new(NormalizationMode::Full).normalize(zero);
        assert!(matches!(result, Err(PathError::EmptyGraph(_))));
    }

    #[test]
    fn test_threshold_drops_edges_keeps_nodes() {
        let mut config = PipelineConfig::default();
        config.normalization_mode = NormalizationMode::Row;
        config.edge_weight_threshold = Some(0.6);

        let graph = GraphNormalizer::from_config(&config)
            .normalize(scenario())
            .unwrap();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.nodes().len(), 4);
    }

    #[test]
    fn test_transition_matrix() {
        let graph = GraphNormalizer::new(NormalizationMode::None)
            .normalize(scenario())
            .unwrap();
        let matrix = graph.transition_matrix();

        assert_eq!(matrix.labels, vec!["A", "B", "C", "D"]);
        assert_eq!(matrix.values[0], vec![0.0, 2.0, 0.0, 0.0]);
        assert_eq!(matrix.get("B", "D"), Some(1.0));
        assert_eq!(matrix.get("D", "A"), Some(0.0));
        assert_eq!(matrix.get("X", "A"), None);
    }

    #[test]
    fn test_matrix_lookup_on_ragged_values() {
        let matrix: TransitionMatrix = serde_json::from_value(serde_json::json!({
            "labels": ["A", "B"],
            "values": [[0.0, 1.0]]
        }))
        .unwrap();

        assert_eq!(matrix.get("A", "B"), Some(1.0));
        assert_eq!(matrix.get("B", "A"), None);
    }

    #[test]
    fn test_export_format() {
        let graph = GraphNormalizer::new(NormalizationMode::None)
            .normalize(scenario())
            .unwrap();
        let value = serde_json::to_value(graph.to_export()).unwrap();

        assert_eq!(value["nodes"][0]["name"], "A");
        assert_eq!(value["edges"][0]["source"], "A");
        assert_eq!(value["edges"][0]["target"], "B");
        assert_eq!(value["edges"][0]["weight"], 2.0);
    }
}
