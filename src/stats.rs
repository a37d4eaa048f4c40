//! Descriptive statistics over a segmented run

use crate::types::{Trajectory, TrajectorySet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Per-event activity counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventStats {
    pub event: String,
    pub occurrences: u64,
    pub occurrences_share: f64,
    pub unique_users: u64,
    pub unique_users_share: f64,
    pub unique_trajectories: u64,
    pub unique_trajectories_share: f64,
    /// Trajectories whose last event is this one
    pub dropoff_trajectories: u64,
    pub dropoff_share: f64,
}

/// Run-level totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub users: u64,
    pub trajectories: u64,
    pub events: u64,
    pub unique_events: u64,
    pub mean_trajectory_length: f64,
    pub max_trajectory_length: u64,
    pub mean_duration_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub summary: RunSummary,
    pub events: Vec<EventStats>,
}

#[derive(Default)]
struct EventTally<'a> {
    occurrences: u64,
    users: BTreeSet<&'a str>,
    trajectories: BTreeSet<&'a str>,
    dropoffs: u64,
}

/// Collects [`RunStats`] from trajectories
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsCollector {
    include_markers: bool,
}

impl StatsCollector {
    pub fn include_markers(mut self, enabled: bool) -> Self {
        self.include_markers = enabled;
        self
    }

    pub fn collect(&self, set: &TrajectorySet) -> RunStats {
        RunStats {
            summary: self.describe(set),
            events: self.describe_events(set),
        }
    }

    /// Per-event statistics, sorted by descending occurrences then name
    pub fn describe_events(&self, set: &TrajectorySet) -> Vec<EventStats> {
        let mut tallies: BTreeMap<&str, EventTally> = BTreeMap::new();
        let mut total_occurrences = 0u64;

        for trajectory in set.iter() {
            let mut last = None;
            for event in &trajectory.events {
                if event.is_synthetic() && !self.include_markers {
                    continue;
                }
                let tally = tallies.entry(event.event_name.as_str()).or_default();
                tally.occurrences += 1;
                tally.users.insert(trajectory.user_id.as_str());
                tally.trajectories.insert(trajectory.id.as_str());
                total_occurrences += 1;
                last = Some(event.event_name.as_str());
            }
            if let Some(name) = last {
                if let Some(tally) = tallies.get_mut(name) {
                    tally.dropoffs += 1;
                }
            }
        }

        let total_users = set.user_count() as u64;
        let total_trajectories = set.len() as u64;

        let mut stats: Vec<EventStats> = tallies
            .into_iter()
            .map(|(name, tally)| EventStats {
                event: name.to_string(),
                occurrences: tally.occurrences,
                occurrences_share: share(tally.occurrences, total_occurrences),
                unique_users: tally.users.len() as u64,
                unique_users_share: share(tally.users.len() as u64, total_users),
                unique_trajectories: tally.trajectories.len() as u64,
                unique_trajectories_share: share(tally.trajectories.len() as u64, total_trajectories),
                dropoff_trajectories: tally.dropoffs,
                dropoff_share: share(tally.dropoffs, total_trajectories),
            })
            .collect();

        stats.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.event.cmp(&b.event))
        });
        stats
    }

    pub fn describe(&self, set: &TrajectorySet) -> RunSummary {
        let lengths: Vec<u64> = set.iter().map(|t| self.length(t)).collect();
        let events: u64 = lengths.iter().sum();
        let trajectories = set.len() as u64;

        let unique_events = set
            .iter()
            .flat_map(|t| t.events.iter())
            .filter(|e| self.include_markers || !e.is_synthetic())
            .map(|e| e.event_name.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u64;

        let total_duration: f64 = set.iter().map(Trajectory::duration_sec).sum();

        RunSummary {
            run_id: set.run_id,
            users: set.user_count() as u64,
            trajectories,
            events,
            unique_events,
            mean_trajectory_length: ratio(events as f64, trajectories),
            max_trajectory_length: lengths.iter().copied().max().unwrap_or(0),
            mean_duration_sec: ratio(total_duration, trajectories),
        }
    }

    fn length(&self, trajectory: &Trajectory) -> u64 {
        trajectory
            .events
            .iter()
            .filter(|e| self.include_markers || !e.is_synthetic())
            .count() as u64
    }
}

fn share(part: u64, whole: u64) -> f64 {
    ratio(part as f64, whole)
}

fn ratio(value: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        value / count as f64
    }
}
