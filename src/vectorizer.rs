//! Trajectory vectorization
//!
//! Projects trajectories into fixed-length numeric vectors for clustering consumers.
//! Vectorization is two-pass: [`TrajectoryVectorizer::fit`] builds a [`FeatureIndex`]
//! over the whole run, then [`TrajectoryVectorizer::transform`] fills one vector per
//! trajectory against that index. The index is read-only once built and is tied to
//! the run id of the trajectories it was fitted on.

use crate::aggregator::EdgeAccumulator;
use crate::config::{AggregationMode, CountEncoding, PipelineConfig, VectorizationMode};
use crate::error::PathError;
use crate::types::{EdgeKey, Trajectory, TrajectorySet};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Event vocabulary of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VocabularyIndex {
    pub run_id: Uuid,
    events: Vec<String>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl VocabularyIndex {
    pub fn new(run_id: Uuid, events: BTreeSet<String>) -> Self {
        let events: Vec<String> = events.into_iter().collect();
        let positions = events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.clone(), i))
            .collect();
        Self {
            run_id,
            events,
            positions,
        }
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn position(&self, event_name: &str) -> Option<usize> {
        self.positions.get(event_name).copied()
    }

    /// Recover event occurrence counts from a count-encoded vector
    pub fn event_multiset(&self, values: &[f64]) -> Result<BTreeMap<String, u64>, PathError> {
        if values.len() != self.events.len() {
            return Err(PathError::UnknownEvent(format!(
                "vector has {} components, vocabulary has {}",
                values.len(),
                self.events.len()
            )));
        }
        Ok(self
            .events
            .iter()
            .zip(values)
            .filter(|(_, v)| **v > 0.0)
            .map(|(name, &v)| (name.clone(), v.round() as u64))
            .collect())
    }
}

/// Transitions observed in one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionIndex {
    pub run_id: Uuid,
    transitions: Vec<EdgeKey>,
    #[serde(skip)]
    positions: HashMap<EdgeKey, usize>,
}

impl TransitionIndex {
    pub fn new(run_id: Uuid, transitions: BTreeSet<EdgeKey>) -> Self {
        let transitions: Vec<EdgeKey> = transitions.into_iter().collect();
        let positions = transitions
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Self {
            run_id,
            transitions,
            positions,
        }
    }

    pub fn transitions(&self) -> &[EdgeKey] {
        &self.transitions
    }

    pub fn position(&self, key: &EdgeKey) -> Option<usize> {
        self.positions.get(key).copied()
    }
}

/// Index fixing vector dimensionality for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureIndex {
    Vocabulary(VocabularyIndex),
    Transitions(TransitionIndex),
}

impl FeatureIndex {
    pub fn run_id(&self) -> Uuid {
        match self {
            FeatureIndex::Vocabulary(index) => index.run_id,
            FeatureIndex::Transitions(index) => index.run_id,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            FeatureIndex::Vocabulary(index) => index.events.len(),
            FeatureIndex::Transitions(index) => index.transitions.len(),
        }
    }

    /// Human-readable component names (`A` or `A -> B`)
    pub fn labels(&self) -> Vec<String> {
        match self {
            FeatureIndex::Vocabulary(index) => index.events.clone(),
            FeatureIndex::Transitions(index) => index
                .transitions
                .iter()
                .map(|k| format!("{} -> {}", k.source, k.target))
                .collect(),
        }
    }
}

/// One trajectory's vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryVector {
    pub trajectory_id: String,
    pub user_id: String,
    pub values: Vec<f64>,
}

/// All vectors of a run plus the index that produced them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorSet {
    pub mode: VectorizationMode,
    pub index: FeatureIndex,
    pub vectors: Vec<TrajectoryVector>,
}

/// Vectorizer for trajectories
#[derive(Debug, Clone, Copy, Default)]
pub struct TrajectoryVectorizer {
    mode: VectorizationMode,
    encoding: CountEncoding,
    aggregation_mode: AggregationMode,
    include_self_loops: bool,
    parallel: bool,
}

impl TrajectoryVectorizer {
    pub fn count_based(encoding: CountEncoding) -> Self {
        Self {
            mode: VectorizationMode::CountBased,
            encoding,
            include_self_loops: true,
            ..Self::default()
        }
    }

    pub fn graph_based(aggregation_mode: AggregationMode, include_self_loops: bool) -> Self {
        Self {
            mode: VectorizationMode::GraphBased,
            aggregation_mode,
            include_self_loops,
            ..Self::default()
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            mode: config.vectorization_mode,
            encoding: config.count_encoding,
            aggregation_mode: config.aggregation_mode,
            include_self_loops: config.include_self_loops,
            parallel: config.parallel,
        }
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// First pass: build the index over every trajectory of the run
    pub fn fit(&self, set: &TrajectorySet) -> FeatureIndex {
        match self.mode {
            VectorizationMode::CountBased => {
                FeatureIndex::Vocabulary(VocabularyIndex::new(set.run_id, set.vocabulary()))
            }
            VectorizationMode::GraphBased => {
                let transitions = set
                    .iter()
                    .flat_map(|t| t.transitions())
                    .map(|(a, b)| EdgeKey::new(a.event_name.as_str(), b.event_name.as_str()))
                    .filter(|k| self.include_self_loops || !k.is_self_loop())
                    .collect();
                FeatureIndex::Transitions(TransitionIndex::new(set.run_id, transitions))
            }
        }
    }

    /// Second pass: one vector per trajectory against a fitted index
    pub fn transform(&self, index: &FeatureIndex, set: &TrajectorySet) -> Result<VectorSet, PathError> {
        if index.run_id() != set.run_id {
            return Err(PathError::UnknownEvent(format!(
                "index was built for run {}, trajectories belong to run {}",
                index.run_id(),
                set.run_id
            )));
        }

        let vectors = if self.parallel {
            set.trajectories
                .par_iter()
                .map(|t| self.vectorize(index, t))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            set.trajectories
                .iter()
                .map(|t| self.vectorize(index, t))
                .collect::<Result<Vec<_>, _>>()?
        };

        debug!(
            run_id = %set.run_id,
            dimension = index.dimension(),
            vectors = vectors.len(),
            "vectorized trajectories"
        );
        Ok(VectorSet {
            mode: self.mode,
            index: index.clone(),
            vectors,
        })
    }

    pub fn fit_transform(&self, set: &TrajectorySet) -> Result<VectorSet, PathError> {
        let index = self.fit(set);
        self.transform(&index, set)
    }

    /// Vectorize a single trajectory
    pub fn vectorize(
        &self,
        index: &FeatureIndex,
        trajectory: &Trajectory,
    ) -> Result<TrajectoryVector, PathError> {
        let values = match (self.mode, index) {
            (VectorizationMode::CountBased, FeatureIndex::Vocabulary(vocab)) => {
                self.count_vector(vocab, trajectory)?
            }
            (VectorizationMode::GraphBased, FeatureIndex::Transitions(transitions)) => {
                self.transition_vector(transitions, trajectory)?
            }
            _ => {
                return Err(PathError::UnknownEvent(
                    "index kind does not match the vectorization mode".to_string(),
                ))
            }
        };
        Ok(TrajectoryVector {
            trajectory_id: trajectory.id.clone(),
            user_id: trajectory.user_id.clone(),
            values,
        })
    }

    fn count_vector(
        &self,
        vocab: &VocabularyIndex,
        trajectory: &Trajectory,
    ) -> Result<Vec<f64>, PathError> {
        let mut positions = Vec::with_capacity(trajectory.len());
        for name in trajectory.event_names() {
            let position = vocab.position(name).ok_or_else(|| {
                PathError::UnknownEvent(format!(
                    "{} in trajectory {} is not in the vocabulary",
                    name, trajectory.id
                ))
            })?;
            positions.push(position);
        }

        let mut values = vec![0.0_f64; vocab.events.len()];
        match self.encoding {
            CountEncoding::Count | CountEncoding::Binary | CountEncoding::Frequency => {
                for &position in &positions {
                    values[position] += 1.0;
                }
            }
            CountEncoding::Time | CountEncoding::TimeFraction => {
                // Dwell is credited to the event the user is leaving
                let mut dwell_ms = vec![0_i64; vocab.events.len()];
                for (&position, (prev, next)) in positions.iter().zip(trajectory.transitions()) {
                    let dwell = (next.timestamp - prev.timestamp).num_milliseconds();
                    dwell_ms[position] = dwell_ms[position].saturating_add(dwell);
                }
                for (value, ms) in values.iter_mut().zip(dwell_ms) {
                    *value = ms as f64 / 1000.0;
                }
            }
        }

        match self.encoding {
            CountEncoding::Count | CountEncoding::Time => {}
            CountEncoding::Binary => values.iter_mut().for_each(|v| *v = v.min(1.0)),
            CountEncoding::Frequency => {
                let length = trajectory.len() as f64;
                if length > 0.0 {
                    values.iter_mut().for_each(|v| *v /= length);
                }
            }
            CountEncoding::TimeFraction => {
                let duration = trajectory.duration_sec();
                if duration > 0.0 {
                    values.iter_mut().for_each(|v| *v /= duration);
                } else {
                    values.iter_mut().for_each(|v| *v = 0.0);
                }
            }
        }
        Ok(values)
    }

    fn transition_vector(
        &self,
        index: &TransitionIndex,
        trajectory: &Trajectory,
    ) -> Result<Vec<f64>, PathError> {
        let local = EdgeAccumulator::from_trajectory(
            trajectory,
            self.aggregation_mode,
            self.include_self_loops,
        )?
        .finish();

        let mut values = vec![0.0_f64; index.transitions.len()];
        for (key, weight) in local.edges {
            let position = index.position(&key).ok_or_else(|| {
                PathError::UnknownEvent(format!(
                    "transition {} -> {} in trajectory {} is not in the index",
                    key.source, key.target, trajectory.id
                ))
            })?;
            values[position] = weight;
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn trajectory(user: &str, names: &[&str]) -> Trajectory {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let events = names
            .iter()
            .enumerate()
            .map(|(i, n)| Event::new(user, *n, base + Duration::seconds(i as i64 * 20), i as u64))
            .collect();
        Trajectory::new(user, 1, events)
    }

    fn make_test_set() -> TrajectorySet {
        TrajectorySet::new(vec![
            trajectory("u1", &["A", "B", "A", "C"]),
            trajectory("u2", &["B", "B", "D"]),
            trajectory("u3", &["A"]),
        ])
    }

    #[test]
    fn test_count_based_vectors() {
        let set = make_test_set();
        let vectors = TrajectoryVectorizer::count_based(CountEncoding::Count)
            .fit_transform(&set)
            .unwrap();

        assert_eq!(vectors.index.labels(), vec!["A", "B", "C", "D"]);
        assert_eq!(vectors.vectors[0].values, vec![2.0, 1.0, 1.0, 0.0]);
        assert_eq!(vectors.vectors[1].values, vec![0.0, 2.0, 0.0, 1.0]);
        assert_eq!(vectors.vectors[2].values, vec![1.0, 0.0, 0.0, 0.0]);
        assert!(vectors.vectors.iter().all(|v| v.values.len() == 4));
    }

    #[test]
    fn test_binary_and_frequency_encodings() {
        let set = make_test_set();
        let binary = TrajectoryVectorizer::count_based(CountEncoding::Binary)
            .fit_transform(&set)
            .unwrap();
        assert_eq!(binary.vectors[0].values, vec![1.0, 1.0, 1.0, 0.0]);

        let frequency = TrajectoryVectorizer::count_based(CountEncoding::Frequency)
            .fit_transform(&set)
            .unwrap();
        assert_eq!(frequency.vectors[0].values, vec![0.5, 0.25, 0.25, 0.0]);
    }

    #[test]
    fn test_time_encodings() {
        // events 20s apart: A(0) B(20) A(40) C(60)
        let set = TrajectorySet::new(vec![
            trajectory("u1", &["A", "B", "A", "C"]),
            trajectory("u2", &["B"]),
        ]);

        let time = TrajectoryVectorizer::count_based(CountEncoding::Time)
            .fit_transform(&set)
            .unwrap();
        assert_eq!(time.index.labels(), vec!["A", "B", "C"]);
        assert_eq!(time.vectors[0].values, vec![40.0, 20.0, 0.0]);
        assert_eq!(time.vectors[1].values, vec![0.0, 0.0, 0.0]);

        let fraction = TrajectoryVectorizer::count_based(CountEncoding::TimeFraction)
            .fit_transform(&set)
            .unwrap();
        let values = &fraction.vectors[0].values;
        assert!((values[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((values[1] - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(values[2], 0.0);
        assert!((values.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(fraction.vectors[1].values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_count_vector_round_trip_to_multiset() {
        let set = make_test_set();
        let vectorizer = TrajectoryVectorizer::count_based(CountEncoding::Count);
        let index = vectorizer.fit(&set);
        let vectors = vectorizer.transform(&index, &set).unwrap();

        let vocab = match &index {
            FeatureIndex::Vocabulary(vocab) => vocab,
            _ => panic!("expected vocabulary index"),
        };

        for (trajectory, vector) in set.iter().zip(&vectors.vectors) {
            let mut expected: BTreeMap<String, u64> = BTreeMap::new();
            for name in trajectory.event_names() {
                *expected.entry(name.to_string()).or_insert(0) += 1;
            }
            assert_eq!(vocab.event_multiset(&vector.values).unwrap(), expected);
        }

        assert!(vocab.event_multiset(&[1.0]).is_err());
    }

    #[test]
    fn test_graph_based_vectors() {
        let set = make_test_set();
        let vectors = TrajectoryVectorizer::graph_based(AggregationMode::RawCount, true)
            .fit_transform(&set)
            .unwrap();

        assert_eq!(
            vectors.index.labels(),
            vec!["A -> B", "A -> C", "B -> A", "B -> B", "B -> D"]
        );
        assert_eq!(vectors.vectors[0].values, vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(vectors.vectors[1].values, vec![0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(vectors.vectors[2].values, vec![0.0; 5]);
    }

    #[test]
    fn test_graph_based_without_self_loops() {
        let set = make_test_set();
        let vectors = TrajectoryVectorizer::graph_based(AggregationMode::RawCount, false)
            .fit_transform(&set)
            .unwrap();
        assert_eq!(vectors.index.dimension(), 4);
        assert!(!vectors.index.labels().contains(&"B -> B".to_string()));
    }

    #[test]
    fn test_graph_based_time_weighted() {
        let set = TrajectorySet::new(vec![trajectory("u1", &["A", "B", "A", "B"])]);
        let vectors = TrajectoryVectorizer::graph_based(AggregationMode::TimeWeighted, true)
            .fit_transform(&set)
            .unwrap();
        // A -> B twice at 20s each, B -> A once
        assert_eq!(vectors.vectors[0].values, vec![40.0, 20.0]);
    }

    #[test]
    fn test_index_from_other_run_is_rejected() {
        let vectorizer = TrajectoryVectorizer::count_based(CountEncoding::Count);
        let index = vectorizer.fit(&make_test_set());
        let other_run = make_test_set();

        let result = vectorizer.transform(&index, &other_run);
        assert!(matches!(result, Err(PathError::UnknownEvent(_))));
    }

    #[test]
    fn test_event_outside_vocabulary_is_rejected() {
        let vectorizer = TrajectoryVectorizer::count_based(CountEncoding::Count);
        let index = vectorizer.fit(&make_test_set());
        let result = vectorizer.vectorize(&index, &trajectory("u9", &["Z"]));
        assert!(matches!(result, Err(PathError::UnknownEvent(_))));
    }

    #[test]
    fn test_mode_mismatch_is_rejected() {
        let set = make_test_set();
        let index = TrajectoryVectorizer::count_based(CountEncoding::Count).fit(&set);
        let result = TrajectoryVectorizer::graph_based(AggregationMode::RawCount, true)
            .transform(&index, &set);
        assert!(matches!(result, Err(PathError::UnknownEvent(_))));
    }

    #[test]
    fn test_parallel_transform_matches_sequential() {
        let set = make_test_set();
        let vectorizer = TrajectoryVectorizer::graph_based(AggregationMode::RawCount, true);
        let index = vectorizer.fit(&set);

        let sequential = vectorizer.transform(&index, &set).unwrap();
        let parallel = vectorizer.parallel(true).transform(&index, &set).unwrap();
        assert_eq!(parallel, sequential);
    }
}
