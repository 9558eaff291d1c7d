//! Server-Sent Events encoding of the session event feed.
//!
//! Frames are `event: <name>` / `data: <wire json>` pairs. The stream
//! optionally replays history first, then follows the live bus
//! subscription, deduplicating on position across the replay/live seam.
//! It ends once the session reaches a terminal event; slow consumers that
//! overflow their bus queue get a final `error` frame instead of a silent
//! drop.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures_util::Stream;
use tracing::warn;
use uuid::Uuid;

use loom_engine_core::error::Result;
use loom_engine_core::event::bus::BusItem;
use loom_engine_core::{Event, Scaffold};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn sse_frame(event: &Event) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {}\ndata: {}\n\n", event.name, data))
}

fn error_frame(message: &str) -> Bytes {
    Bytes::from(format!(
        "event: error\ndata: {{\"error\":{}}}\n\n",
        serde_json::Value::String(message.to_string())
    ))
}

fn keep_alive_frame() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}

type SseStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, actix_web::Error>>>>;

/// Build the SSE byte stream for one session.
pub async fn event_stream(
    scaffold: Scaffold,
    session_id: Uuid,
    history: bool,
) -> Result<SseStream> {
    // Subscribe before reading history so no event falls between the
    // two; the position check below drops the overlap.
    let mut live = scaffold.subscribe(session_id);
    let backlog = if history {
        scaffold.events(session_id).await?
    } else {
        Vec::new()
    };
    let status = scaffold.status(session_id).await?;

    let stream = stream! {
        let mut last_position: Option<u64> = None;
        let mut terminal_seen = false;

        for event in &backlog {
            last_position = Some(event.position);
            if event.name.is_workflow_terminal() {
                terminal_seen = true;
            }
            yield Ok(sse_frame(event));
        }

        // Nothing more will be published for a settled session.
        if terminal_seen || status.is_terminal() {
            return;
        }

        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        keep_alive.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                item = live.next_item() => {
                    match item {
                        Some(BusItem::Event(event)) => {
                            if matches!(last_position, Some(last) if event.position <= last) {
                                continue;
                            }
                            last_position = Some(event.position);
                            let terminal = event.name.is_workflow_terminal();
                            yield Ok(sse_frame(&event));
                            if terminal {
                                return;
                            }
                        }
                        Some(BusItem::Overflow) => {
                            warn!(%session_id, "sse consumer overflowed its buffer");
                            yield Ok(error_frame("subscriber_overflow"));
                            return;
                        }
                        None => return,
                    }
                }
                _ = keep_alive.tick() => {
                    yield Ok(keep_alive_frame());
                }
            }
        }
    };

    Ok(Box::pin(stream))
}
