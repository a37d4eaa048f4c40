//! Trajectory segmentation
//!
//! Groups canonical events by user and cuts each user's stream into sessions on
//! inactivity gaps and on boundary events.

use crate::config::{seconds_to_duration, BoundaryPolicy, PipelineConfig};
use crate::error::PathError;
use crate::types::{Event, EventKind, Trajectory, TrajectorySet};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Splits normalized events into trajectories
#[derive(Debug, Clone, Default)]
pub struct TrajectorySegmenter {
    /// Maximum allowed gap between consecutive events
    session_timeout: Option<Duration>,
    boundary_events: BTreeSet<String>,
    boundary_policy: BoundaryPolicy,
    add_path_markers: bool,
}

impl TrajectorySegmenter {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            session_timeout: config.session_timeout(),
            boundary_events: config.boundary_events.clone(),
            boundary_policy: config.boundary_policy,
            add_path_markers: config.add_path_markers,
        }
    }

    pub fn with_session_timeout_sec(mut self, seconds: f64) -> Self {
        self.session_timeout = Some(seconds_to_duration(seconds));
        self
    }

    pub fn with_boundary_events<I, S>(mut self, names: I, policy: BoundaryPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.boundary_events = names.into_iter().map(Into::into).collect();
        self.boundary_policy = policy;
        self
    }

    pub fn with_path_markers(mut self, enabled: bool) -> Self {
        self.add_path_markers = enabled;
        self
    }

    /// Segment events into trajectories.
    ///
    /// Users appear in order of their first event in the input. Within a user, events
    /// are ordered by (timestamp, event_index). The result carries a fresh run id.
    pub fn segment(&self, events: Vec<Event>) -> Result<TrajectorySet, PathError> {
        let mut user_order: Vec<String> = Vec::new();
        let mut by_user: HashMap<String, Vec<Event>> = HashMap::new();

        for event in events {
            if !by_user.contains_key(&event.user_id) {
                user_order.push(event.user_id.clone());
            }
            by_user
                .entry(event.user_id.clone())
                .or_default()
                .push(event);
        }

        let mut trajectories = Vec::new();
        for user_id in user_order {
            let mut user_events = by_user.remove(&user_id).unwrap_or_default();
            user_events.sort_by_key(Event::position);

            let sessions = self.split_user(user_events);
            if sessions.is_empty() {
                return Err(PathError::EmptyTrajectory { user_id });
            }

            for (ordinal, session) in sessions.into_iter().enumerate() {
                let session = if self.add_path_markers {
                    wrap_with_markers(session)
                } else {
                    session
                };
                trajectories.push(Trajectory::new(user_id.clone(), ordinal as u32 + 1, session));
            }
        }

        let set = TrajectorySet::new(trajectories);
        debug!(
            run_id = %set.run_id,
            users = set.user_count(),
            trajectories = set.len(),
            "segmented event log"
        );
        Ok(set)
    }

    /// Cut one user's ordered events into sessions, dropping empty ones
    fn split_user(&self, events: Vec<Event>) -> Vec<Vec<Event>> {
        let mut sessions: Vec<Vec<Event>> = Vec::new();
        let mut current: Vec<Event> = Vec::new();
        // Gaps are measured between raw neighbors, so an excluded boundary still counts
        let mut last_timestamp: Option<DateTime<Utc>> = None;

        for event in events {
            if let (Some(limit), Some(last)) = (self.session_timeout, last_timestamp) {
                if event.timestamp - last > limit {
                    flush(&mut sessions, &mut current);
                }
            }
            last_timestamp = Some(event.timestamp);

            if self.boundary_events.contains(&event.event_name) {
                match self.boundary_policy {
                    BoundaryPolicy::StartNext => {
                        flush(&mut sessions, &mut current);
                        current.push(event);
                    }
                    BoundaryPolicy::EndCurrent => {
                        current.push(event);
                        flush(&mut sessions, &mut current);
                    }
                    BoundaryPolicy::Exclude => flush(&mut sessions, &mut current),
                }
            } else {
                current.push(event);
            }
        }
        flush(&mut sessions, &mut current);

        sessions
    }
}

fn flush(sessions: &mut Vec<Vec<Event>>, current: &mut Vec<Event>) {
    if !current.is_empty() {
        sessions.push(std::mem::take(current));
    }
}

fn wrap_with_markers(mut session: Vec<Event>) -> Vec<Event> {
    let (start, end) = match (session.first(), session.last()) {
        (Some(first), Some(last)) => (
            Event::marker(first, EventKind::PathStart),
            Event::marker(last, EventKind::PathEnd),
        ),
        _ => return session,
    };
    session.insert(0, start);
    session.push(end);
    session
}
