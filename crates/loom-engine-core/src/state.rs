//! # State Reducer
//!
//! Workflow state is never stored as a mutable row; it is derived from the
//! event log. The single reducer rule: the state at position `n` is the
//! payload of the last `state:updated` event among `events[0..n]`, or
//! nothing if none exists yet. Every code path that needs "current state"
//! goes through [`compute_state_at`], which is what makes pause, resume,
//! fork, and replay agree with each other.

use serde_json::Value;

use crate::event::{Event, EventName};

/// State visible after the first `n` events, i.e. a function of
/// `events[0..n]` only. `None` when no `state:updated` has occurred yet;
/// in particular `compute_state_at(events, 0)` is always `None`.
pub fn compute_state_at(events: &[Event], n: usize) -> Option<Value> {
    let upto = n.min(events.len());
    events[..upto]
        .iter()
        .rev()
        .find(|e| e.name == EventName::StateUpdated)
        .and_then(|e| e.payload.get("state").cloned())
}

/// State after the whole log.
pub fn current_state(events: &[Event]) -> Option<Value> {
    compute_state_at(events, events.len())
}

/// Session lifecycle, derived from the event log.
///
/// `pending → running ↔ paused → {completed, failed, aborted}`; terminal
/// states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted
        )
    }

    /// Fold the log into a status. Later events win; terminal events are
    /// absorbing.
    pub fn from_events(events: &[Event]) -> Self {
        let mut status = SessionStatus::Pending;
        for event in events {
            if status.is_terminal() {
                break;
            }
            status = match event.name {
                EventName::WorkflowStarted | EventName::SessionResumed => SessionStatus::Running,
                EventName::SessionPaused => SessionStatus::Paused,
                EventName::WorkflowCompleted => SessionStatus::Completed,
                EventName::WorkflowFailed => SessionStatus::Failed,
                EventName::SessionAborted => SessionStatus::Aborted,
                _ => status,
            };
        }
        status
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(name: EventName, payload: Value, position: u64) -> Event {
        Event {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            name,
            payload,
            timestamp: Utc::now(),
            position,
        }
    }

    fn sample_log() -> Vec<Event> {
        vec![
            event(EventName::WorkflowStarted, json!({}), 0),
            event(EventName::StateUpdated, json!({"state": {"n": 1}}), 1),
            event(EventName::AgentText, json!({"delta": "…"}), 2),
            event(EventName::StateUpdated, json!({"state": {"n": 2}}), 3),
            event(EventName::WorkflowCompleted, json!({"success": true}), 4),
        ]
    }

    #[test]
    fn state_at_zero_is_undefined() {
        assert_eq!(compute_state_at(&sample_log(), 0), None);
        assert_eq!(compute_state_at(&[], 0), None);
    }

    #[test]
    fn state_is_last_intent_before_position() {
        let log = sample_log();
        assert_eq!(compute_state_at(&log, 1), None);
        assert_eq!(compute_state_at(&log, 2), Some(json!({"n": 1})));
        assert_eq!(compute_state_at(&log, 3), Some(json!({"n": 1})));
        assert_eq!(compute_state_at(&log, 4), Some(json!({"n": 2})));
        assert_eq!(current_state(&log), Some(json!({"n": 2})));
    }

    #[test]
    fn position_past_end_clamps_to_full_log() {
        let log = sample_log();
        assert_eq!(compute_state_at(&log, 999), current_state(&log));
    }

    #[test]
    fn status_follows_lifecycle() {
        let mut log = vec![event(EventName::WorkflowStarted, json!({}), 0)];
        assert_eq!(SessionStatus::from_events(&log), SessionStatus::Running);

        log.push(event(EventName::SessionPaused, json!({}), 1));
        assert_eq!(SessionStatus::from_events(&log), SessionStatus::Paused);

        log.push(event(EventName::SessionResumed, json!({}), 2));
        assert_eq!(SessionStatus::from_events(&log), SessionStatus::Running);

        log.push(event(EventName::WorkflowCompleted, json!({}), 3));
        assert_eq!(SessionStatus::from_events(&log), SessionStatus::Completed);
        assert!(SessionStatus::from_events(&log).is_terminal());
    }

    #[test]
    fn empty_log_is_pending() {
        assert_eq!(SessionStatus::from_events(&[]), SessionStatus::Pending);
    }
}
