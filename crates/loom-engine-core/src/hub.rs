//! # Hub
//!
//! The bidirectional boundary where transports attach to a session.
//! Outbound, a hub fans session events out to listeners with name-based
//! filtering; inbound, it routes replies, coarse messages, and aborts to
//! the session's runtime. A transport is anything that takes a hub and
//! drives one or both directions: HTTP/SSE, WebSocket, a console, a
//! test harness.
//!
//! Listener failures are diagnostics, never control flow: a throwing
//! listener is logged as a handler error and the feed continues.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::event::bus::{BusItem, EventSubscription};
use crate::event::{Event, EventName};
use crate::scaffold::Scaffold;

/// Coarse transport-facing connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Event-name filter: `*`, an exact name, or a `prefix:*` family match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Exact(String),
    Prefix(String),
}

impl EventFilter {
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            EventFilter::All
        } else if let Some(prefix) = s.strip_suffix('*') {
            EventFilter::Prefix(prefix.to_string())
        } else {
            EventFilter::Exact(s.to_string())
        }
    }

    pub fn matches(&self, name: EventName) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Exact(expected) => name.as_str() == expected,
            EventFilter::Prefix(prefix) => name.as_str().starts_with(prefix.as_str()),
        }
    }
}

/// Outbound event callback. Errors are reported as handler diagnostics
/// and never reach the producer.
pub type HubListener =
    Arc<dyn Fn(&Event) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Handle for one listener registration; dropping it unsubscribes.
pub struct HubSubscription {
    task: JoinHandle<()>,
}

impl HubSubscription {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A transport attaches to a hub and returns its cleanup.
pub type TransportCleanup = Box<dyn FnOnce() + Send>;

pub trait Transport: Send + Sync {
    fn attach(&self, hub: &SessionHub) -> TransportCleanup;
}

/// Bidirectional boundary for one session.
#[derive(Clone)]
pub struct SessionHub {
    scaffold: Scaffold,
    session_id: Uuid,
    status: watch::Sender<HubStatus>,
}

impl SessionHub {
    pub(crate) fn new(scaffold: Scaffold, session_id: Uuid) -> Self {
        // In-process attachment has no handshake to wait for.
        let (status, _) = watch::channel(HubStatus::Connected);
        Self {
            scaffold,
            session_id,
            status,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Register a filtered listener. Events are delivered in publish
    /// order on a dedicated task; a slow listener only ever loses its own
    /// subscription (bus overflow), never slows the runtime.
    pub fn subscribe(&self, filter: EventFilter, listener: HubListener) -> HubSubscription {
        let mut feed = self.scaffold.subscribe(self.session_id);
        let status = self.status.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = feed.next_item().await {
                match item {
                    BusItem::Event(event) => {
                        if !filter.matches(event.name) {
                            continue;
                        }
                        if let Err(cause) = listener(&event) {
                            let diagnostic = CoreError::Handler {
                                handler: "hub-listener".to_string(),
                                event: event.name.to_string(),
                                message: cause.to_string(),
                            };
                            warn!(%diagnostic, "subscriber callback failed");
                        }
                    }
                    BusItem::Overflow => {
                        let _ = status.send(HubStatus::Error);
                        warn!("hub subscription overflowed and was dropped");
                        break;
                    }
                }
            }
            let _ = status.send(HubStatus::Disconnected);
        });
        HubSubscription { task }
    }

    /// Raw pull-based feed for transports that stream (SSE, WebSocket).
    pub fn events(&self) -> EventSubscription {
        self.scaffold.subscribe(self.session_id)
    }

    /// Coarse broadcast into the running workflow.
    pub async fn send(&self, body: Value) -> Result<()> {
        self.scaffold
            .send_message(self.session_id, None, body)
            .await
    }

    /// Targeted message for a named phase.
    pub async fn send_to(&self, node_id: &str, body: Value) -> Result<()> {
        self.scaffold
            .send_message(self.session_id, Some(node_id.to_string()), body)
            .await
    }

    /// Resolve an outstanding `session:prompt`.
    pub async fn reply(
        &self,
        prompt_id: Uuid,
        content: String,
        choice: Option<String>,
    ) -> Result<()> {
        self.scaffold
            .reply(self.session_id, prompt_id, content, choice)
            .await
    }

    pub async fn abort(&self, reason: Option<String>) -> Result<bool> {
        self.scaffold.abort(self.session_id, reason).await
    }

    pub async fn session_active(&self) -> bool {
        self.scaffold.is_running(self.session_id).await
    }

    pub fn status(&self) -> watch::Receiver<HubStatus> {
        self.status.subscribe()
    }
}
