//! Transition aggregation
//!
//! Scans consecutive event pairs of each trajectory and accumulates edge weights.
//! Accumulation is split into a map step ([`EdgeAccumulator::absorb`]) and a
//! commutative reduce step ([`EdgeAccumulator::merge`]), so trajectories can be
//! processed in any order or on any number of threads with identical results.

use crate::config::{AggregationMode, PipelineConfig};
use crate::error::PathError;
use crate::types::{EdgeKey, Trajectory};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Running totals for one edge. Only the field used by the active mode is filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EdgeTally {
    count: u64,
    users: BTreeSet<String>,
    /// Integer milliseconds keep the sum exact under any merge order. Saturates at i64::MAX.
    dwell_ms: i64,
}

impl EdgeTally {
    fn merge(&mut self, other: EdgeTally) {
        self.count += other.count;
        self.users.extend(other.users);
        self.dwell_ms = self.dwell_ms.saturating_add(other.dwell_ms);
    }

    fn weight(&self, mode: AggregationMode) -> f64 {
        match mode {
            AggregationMode::RawCount => self.count as f64,
            AggregationMode::UniqueUser => self.users.len() as f64,
            AggregationMode::TimeWeighted => self.dwell_ms as f64 / 1000.0,
        }
    }
}

/// Partial edge accumulator
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeAccumulator {
    mode: AggregationMode,
    include_self_loops: bool,
    nodes: BTreeSet<String>,
    edges: BTreeMap<EdgeKey, EdgeTally>,
}

impl EdgeAccumulator {
    pub fn new(mode: AggregationMode, include_self_loops: bool) -> Self {
        Self {
            mode,
            include_self_loops,
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Accumulator holding a single trajectory
    pub fn from_trajectory(
        trajectory: &Trajectory,
        mode: AggregationMode,
        include_self_loops: bool,
    ) -> Result<Self, PathError> {
        let mut acc = Self::new(mode, include_self_loops);
        acc.absorb(trajectory)?;
        Ok(acc)
    }

    /// Add a trajectory's nodes and transitions
    pub fn absorb(&mut self, trajectory: &Trajectory) -> Result<(), PathError> {
        for name in trajectory.event_names() {
            if !self.nodes.contains(name) {
                self.nodes.insert(name.to_string());
            }
        }

        for (prev, next) in trajectory.transitions() {
            if next.position() < prev.position() {
                return Err(PathError::Ordering {
                    trajectory: trajectory.id.clone(),
                    message: format!(
                        "{} at {} follows {} at {}",
                        next.event_name,
                        next.timestamp.to_rfc3339(),
                        prev.event_name,
                        prev.timestamp.to_rfc3339()
                    ),
                });
            }

            let key = EdgeKey::new(prev.event_name.as_str(), next.event_name.as_str());
            if !self.include_self_loops && key.is_self_loop() {
                continue;
            }

            let tally = self.edges.entry(key).or_default();
            match self.mode {
                AggregationMode::RawCount => tally.count += 1,
                AggregationMode::UniqueUser => {
                    if !tally.users.contains(&trajectory.user_id) {
                        tally.users.insert(trajectory.user_id.clone());
                    }
                }
                AggregationMode::TimeWeighted => {
                    let dwell = (next.timestamp - prev.timestamp).num_milliseconds();
                    tally.dwell_ms = tally.dwell_ms.saturating_add(dwell);
                }
            }
        }

        Ok(())
    }

    /// Combine two partial accumulators. Commutative and associative.
    pub fn merge(mut self, mut other: EdgeAccumulator) -> EdgeAccumulator {
        if other.edges.len() > self.edges.len() {
            std::mem::swap(&mut self, &mut other);
        }
        self.nodes.append(&mut other.nodes);
        for (key, tally) in other.edges {
            self.edges.entry(key).or_default().merge(tally);
        }
        self
    }

    /// Freeze the accumulated tallies into raw edge weights
    pub fn finish(self) -> AggregatedGraph {
        let mode = self.mode;
        let edges = self
            .edges
            .into_iter()
            .map(|(key, tally)| (key, tally.weight(mode)))
            .collect();
        AggregatedGraph {
            mode,
            nodes: self.nodes,
            edges,
        }
    }
}

/// Raw (unnormalized) edge weights plus the node set
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedGraph {
    pub mode: AggregationMode,
    pub nodes: BTreeSet<String>,
    pub edges: BTreeMap<EdgeKey, f64>,
}

impl AggregatedGraph {
    pub fn weight(&self, source: &str, target: &str) -> Option<f64> {
        self.edges.get(&EdgeKey::new(source, target)).copied()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn total_weight(&self) -> f64 {
        self.edges.values().sum()
    }
}

/// Builds an [`AggregatedGraph`] from trajectories
#[derive(Debug, Clone, Copy)]
pub struct TransitionAggregator {
    mode: AggregationMode,
    include_self_loops: bool,
    parallel: bool,
}

impl TransitionAggregator {
    pub fn new(mode: AggregationMode, include_self_loops: bool) -> Self {
        Self {
            mode,
            include_self_loops,
            parallel: false,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            mode: config.aggregation_mode,
            include_self_loops: config.include_self_loops,
            parallel: config.parallel,
        }
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn aggregate(&self, trajectories: &[Trajectory]) -> Result<AggregatedGraph, PathError> {
        let acc = if self.parallel {
            self.accumulate_parallel(trajectories)?
        } else {
            self.accumulate_sequential(trajectories)?
        };
        let graph = acc.finish();
        debug!(
            mode = graph.mode.as_str(),
            nodes = graph.nodes.len(),
            edges = graph.edge_count(),
            parallel = self.parallel,
            "aggregated transitions"
        );
        Ok(graph)
    }

    fn accumulate_sequential(
        &self,
        trajectories: &[Trajectory],
    ) -> Result<EdgeAccumulator, PathError> {
        let mut acc = EdgeAccumulator::new(self.mode, self.include_self_loops);
        for trajectory in trajectories {
            acc.absorb(trajectory)?;
        }
        Ok(acc)
    }

    fn accumulate_parallel(&self, trajectories: &[Trajectory]) -> Result<EdgeAccumulator, PathError> {
        let (mode, loops) = (self.mode, self.include_self_loops);
        trajectories
            .par_iter()
            .try_fold(
                || EdgeAccumulator::new(mode, loops),
                |mut acc, trajectory| {
                    acc.absorb(trajectory)?;
                    Ok::<_, PathError>(acc)
                },
            )
            .try_reduce(|| EdgeAccumulator::new(mode, loops), |a, b| Ok(a.merge(b)))
    }
}
