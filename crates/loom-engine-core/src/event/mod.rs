//! # Session Events
//!
//! Everything observable that happens inside a session is an [`Event`]: an
//! immutable record with a fixed [`EventName`], a kind-specific JSON
//! payload, a timestamp, and a 0-indexed contiguous `position` within its
//! session's log. The event log is the canonical representation of a
//! session; in-memory state is always derivable from it (see
//! [`crate::state::compute_state_at`]).
//!
//! The wire format is a flat JSON object:
//!
//! ```json
//! {
//!   "id": "…uuid…",
//!   "session_id": "…uuid…",
//!   "name": "state:updated",
//!   "payload": { "state": { } },
//!   "timestamp": "2026-08-01T12:00:00Z",
//!   "position": 7
//! }
//! ```

pub mod bus;
pub mod snapshot;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed enumeration of event names.
///
/// Names serialize to their wire form (`workflow:started`, `agent:text`,
/// …). Adding a variant is a wire-format change; subscribers filter on
/// these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "workflow:started")]
    WorkflowStarted,
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow:failed")]
    WorkflowFailed,

    #[serde(rename = "phase:start")]
    PhaseStart,
    #[serde(rename = "phase:complete")]
    PhaseComplete,

    #[serde(rename = "task:start")]
    TaskStart,
    #[serde(rename = "task:complete")]
    TaskComplete,
    #[serde(rename = "task:failed")]
    TaskFailed,

    #[serde(rename = "agent:started")]
    AgentStarted,
    #[serde(rename = "agent:thinking")]
    AgentThinking,
    #[serde(rename = "agent:text")]
    AgentText,
    #[serde(rename = "agent:tool:start")]
    AgentToolStart,
    #[serde(rename = "agent:tool:complete")]
    AgentToolComplete,
    #[serde(rename = "agent:completed")]
    AgentCompleted,
    #[serde(rename = "agent:failed")]
    AgentFailed,
    #[serde(rename = "agent:retry")]
    AgentRetry,

    #[serde(rename = "state:updated")]
    StateUpdated,

    #[serde(rename = "session:paused")]
    SessionPaused,
    #[serde(rename = "session:resumed")]
    SessionResumed,
    #[serde(rename = "session:aborted")]
    SessionAborted,
    #[serde(rename = "session:prompt")]
    SessionPrompt,
    #[serde(rename = "session:reply")]
    SessionReply,

    #[serde(rename = "narrative")]
    Narrative,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::WorkflowStarted => "workflow:started",
            EventName::WorkflowCompleted => "workflow:completed",
            EventName::WorkflowFailed => "workflow:failed",
            EventName::PhaseStart => "phase:start",
            EventName::PhaseComplete => "phase:complete",
            EventName::TaskStart => "task:start",
            EventName::TaskComplete => "task:complete",
            EventName::TaskFailed => "task:failed",
            EventName::AgentStarted => "agent:started",
            EventName::AgentThinking => "agent:thinking",
            EventName::AgentText => "agent:text",
            EventName::AgentToolStart => "agent:tool:start",
            EventName::AgentToolComplete => "agent:tool:complete",
            EventName::AgentCompleted => "agent:completed",
            EventName::AgentFailed => "agent:failed",
            EventName::AgentRetry => "agent:retry",
            EventName::StateUpdated => "state:updated",
            EventName::SessionPaused => "session:paused",
            EventName::SessionResumed => "session:resumed",
            EventName::SessionAborted => "session:aborted",
            EventName::SessionPrompt => "session:prompt",
            EventName::SessionReply => "session:reply",
            EventName::Narrative => "narrative",
        }
    }

    /// Parse a wire name. Returns `None` for names outside the
    /// enumeration; stored logs are trusted, external input is not.
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }

    /// Terminal workflow outcomes; a session log never grows past one of
    /// these except for `session:*` bookkeeping appended by fork tooling.
    pub fn is_workflow_terminal(&self) -> bool {
        matches!(
            self,
            EventName::WorkflowCompleted | EventName::WorkflowFailed | EventName::SessionAborted
        )
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance tiers for `narrative` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeImportance {
    Critical,
    Important,
    Detailed,
}

/// A persisted event. `position` is assigned by the event store at append
/// time and is contiguous per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: EventName,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub position: u64,
}

/// An event that has not been appended yet: everything but the session and
/// position, which the store assigns.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: Uuid,
    pub name: EventName,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// A fresh record stamped now. This is what the runtime emits.
    pub fn new(name: EventName, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// A copy of an existing event with a fresh identity but the original
    /// timestamp. Used when forking a session.
    pub fn copy_of(event: &Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: event.name,
            payload: event.payload.clone(),
            timestamp: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_name_round_trips_through_wire_form() {
        for name in [
            EventName::WorkflowStarted,
            EventName::AgentToolStart,
            EventName::StateUpdated,
            EventName::SessionPrompt,
            EventName::Narrative,
        ] {
            assert_eq!(EventName::parse(name.as_str()), Some(name));
        }
        assert_eq!(EventName::parse("not:a:name"), None);
    }

    #[test]
    fn wire_format_has_flat_shape() {
        let event = Event {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            name: EventName::StateUpdated,
            payload: json!({"state": {"answer": "4"}}),
            timestamp: Utc::now(),
            position: 3,
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["name"], "state:updated");
        assert_eq!(wire["position"], 3);
        assert_eq!(wire["payload"]["state"]["answer"], "4");
        assert!(wire["timestamp"].is_string());
    }

    #[test]
    fn copy_preserves_timestamp_but_not_identity() {
        let event = Event {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            name: EventName::AgentText,
            payload: json!({"delta": "4"}),
            timestamp: Utc::now(),
            position: 0,
        };
        let copy = EventRecord::copy_of(&event);
        assert_ne!(copy.id, event.id);
        assert_eq!(copy.timestamp, event.timestamp);
        assert_eq!(copy.payload, event.payload);
    }
}
