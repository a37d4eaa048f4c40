//! Core types for the pathflux pipeline
//!
//! This module defines the data that flows between stages: canonical events,
//! trajectories, and transition edges. Graph and vector artifacts live next to the
//! stages that produce them (`graph`, `vectorizer`).

use crate::error::PathError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A raw tabular record as handed over by the loader
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Name of the synthetic event opening a trajectory
pub const PATH_START: &str = "path_start";

/// Name of the synthetic event closing a trajectory
pub const PATH_END: &str = "path_end";

/// Origin of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Ingested from the event log
    Raw,
    /// Synthetic trajectory start marker
    PathStart,
    /// Synthetic trajectory end marker
    PathEnd,
}

/// Canonical event. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    /// Arrival position in the raw log; breaks timestamp ties
    pub event_index: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(
        user_id: impl Into<String>,
        event_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        event_index: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_name: event_name.into(),
            timestamp,
            event_index,
            kind: EventKind::Raw,
        }
    }

    /// Synthetic marker sharing the position of `anchor`
    pub(crate) fn marker(anchor: &Event, kind: EventKind) -> Self {
        let name = match kind {
            EventKind::PathEnd => PATH_END,
            _ => PATH_START,
        };
        Self {
            user_id: anchor.user_id.clone(),
            event_name: name.to_string(),
            timestamp: anchor.timestamp,
            event_index: anchor.event_index,
            kind,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.kind != EventKind::Raw
    }

    /// Sort key inside a trajectory
    pub fn position(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.event_index)
    }
}

/// Ordered events of one user session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trajectory {
    /// `{user_id}_{session}`
    pub id: String,
    pub user_id: String,
    /// 1-based session ordinal within the user
    pub session: u32,
    pub events: Vec<Event>,
}

impl Trajectory {
    pub fn new(user_id: impl Into<String>, session: u32, events: Vec<Event>) -> Self {
        let user_id = user_id.into();
        Self {
            id: format!("{}_{}", user_id, session),
            user_id,
            session,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.event_name.as_str())
    }

    /// Consecutive event pairs
    pub fn transitions(&self) -> impl Iterator<Item = (&Event, &Event)> {
        self.events.windows(2).map(|pair| (&pair[0], &pair[1]))
    }

    /// Seconds between the first and the last event
    pub fn duration_sec(&self) -> f64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        }
    }

    /// Check that (timestamp, event_index) never decreases
    pub fn check_ordering(&self) -> Result<(), PathError> {
        for (prev, next) in self.transitions() {
            if next.position() < prev.position() {
                return Err(PathError::Ordering {
                    trajectory: self.id.clone(),
                    message: format!(
                        "event {} ({} at {}) precedes event {} ({} at {})",
                        next.event_index,
                        next.event_name,
                        next.timestamp.to_rfc3339(),
                        prev.event_index,
                        prev.event_name,
                        prev.timestamp.to_rfc3339()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Trajectories produced by one segmentation, stamped with the run they belong to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySet {
    pub run_id: Uuid,
    pub trajectories: Vec<Trajectory>,
}

impl TrajectorySet {
    pub fn new(trajectories: Vec<Trajectory>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trajectories,
        }
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Trajectory> {
        self.trajectories.iter()
    }

    /// Distinct event names across all trajectories
    pub fn vocabulary(&self) -> BTreeSet<String> {
        self.trajectories
            .iter()
            .flat_map(|t| t.event_names())
            .map(str::to_string)
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.trajectories
            .iter()
            .map(|t| t.user_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Directed transition between two event names
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
}

impl EdgeKey {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

/// Weighted edge in the exchange format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, minute, 0).unwrap()
    }

    #[test]
    fn test_trajectory_id_format() {
        let trajectory = Trajectory::new("u1", 2, vec![]);
        assert_eq!(trajectory.id, "u1_2");
        assert!(trajectory.is_empty());
    }

    #[test]
    fn test_transitions_and_duration() {
        let events = vec![
            Event::new("u1", "A", ts(0), 0),
            Event::new("u1", "B", ts(1), 1),
            Event::new("u1", "C", ts(5), 2),
        ];
        let trajectory = Trajectory::new("u1", 1, events);

        let pairs: Vec<(&str, &str)> = trajectory
            .transitions()
            .map(|(a, b)| (a.event_name.as_str(), b.event_name.as_str()))
            .collect();
        assert_eq!(pairs, vec![("A", "B"), ("B", "C")]);
        assert_eq!(trajectory.duration_sec(), 300.0);
    }

    #[test]
    fn test_ordering_check() {
        let ok = Trajectory::new(
            "u1",
            1,
            vec![
                Event::new("u1", "A", ts(0), 3),
                Event::new("u1", "B", ts(0), 4),
            ],
        );
        assert!(ok.check_ordering().is_ok());

        let broken = Trajectory::new(
            "u1",
            1,
            vec![
                Event::new("u1", "A", ts(2), 0),
                Event::new("u1", "B", ts(1), 1),
            ],
        );
        assert!(matches!(
            broken.check_ordering(),
            Err(PathError::Ordering { .. })
        ));
    }

    #[test]
    fn test_marker_keeps_anchor_position() {
        let anchor = Event::new("u1", "A", ts(3), 7);
        let marker = Event::marker(&anchor, EventKind::PathEnd);
        assert_eq!(marker.event_name, PATH_END);
        assert_eq!(marker.position(), anchor.position());
        assert!(marker.is_synthetic());
    }

    #[test]
    fn test_event_kind_serialization() {
        let json = serde_json::to_string(&EventKind::PathStart).unwrap();
        assert_eq!(json, "\"path_start\"");
    }
}
