//! # In-Process Event Bus
//!
//! Per-session publish/subscribe with bounded buffering. Producers never
//! block and never fail because of a subscriber: each subscription owns a
//! bounded queue, and a subscriber that falls behind is torn down with a
//! terminal [`BusItem::Overflow`] item rather than silently dropped or
//! allowed to apply backpressure upstream.
//!
//! The bus carries no durability guarantees of its own. The runtime
//! appends to the event store first and publishes only after the durable
//! acknowledgement, so a subscriber can never observe an event a replay
//! would not also see.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::Event;

/// Queue capacity per subscriber before overflow teardown.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Item yielded by an [`EventSubscription`].
#[derive(Debug, Clone)]
pub enum BusItem {
    Event(Event),
    /// Terminal: the subscriber exceeded its buffer and was dropped.
    /// No further items follow.
    Overflow,
}

struct Subscriber {
    tx: mpsc::Sender<Event>,
    overflowed: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    by_session: HashMap<Uuid, Vec<Subscriber>>,
    all: Vec<Subscriber>,
}

/// Cloneable handle to the process-wide bus.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Deliver `event` to every live subscriber of its session plus the
    /// fan-out subscribers. Never blocks; a full queue drops that
    /// subscriber after marking it overflowed.
    pub fn publish(&self, event: &Event) {
        let mut registry = self.registry.lock().expect("bus registry poisoned");
        if let Some(subs) = registry.by_session.get_mut(&event.session_id) {
            deliver(subs, event);
            if subs.is_empty() {
                registry.by_session.remove(&event.session_id);
            }
        }
        deliver(&mut registry.all, event);
    }

    /// Subscribe to one session. Receives only events published after the
    /// call, in publish order.
    pub fn subscribe(&self, session_id: Uuid) -> EventSubscription {
        let (sub, stream) = self.make_subscriber();
        let mut registry = self.registry.lock().expect("bus registry poisoned");
        registry.by_session.entry(session_id).or_default().push(sub);
        stream
    }

    /// Subscribe to all sessions (observer fan-out).
    pub fn subscribe_all(&self) -> EventSubscription {
        let (sub, stream) = self.make_subscriber();
        let mut registry = self.registry.lock().expect("bus registry poisoned");
        registry.all.push(sub);
        stream
    }

    fn make_subscriber(&self) -> (Subscriber, EventSubscription) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let sub = Subscriber {
            tx,
            overflowed: overflowed.clone(),
        };
        let stream = EventSubscription {
            rx,
            overflowed,
            overflow_signaled: false,
        };
        (sub, stream)
    }

    #[cfg(test)]
    fn subscriber_count(&self, session_id: Uuid) -> usize {
        let registry = self.registry.lock().unwrap();
        registry
            .by_session
            .get(&session_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

fn deliver(subs: &mut Vec<Subscriber>, event: &Event) {
    subs.retain(|sub| match sub.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            sub.overflowed.store(true, Ordering::Release);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

/// Stream side of a subscription. Ends when the subscriber is dropped by
/// the bus; if the cause was overflow, a single [`BusItem::Overflow`] is
/// yielded first.
pub struct EventSubscription {
    rx: mpsc::Receiver<Event>,
    overflowed: Arc<AtomicBool>,
    overflow_signaled: bool,
}

impl Stream for EventSubscription {
    type Item = BusItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(BusItem::Event(event))),
            Poll::Ready(None) => {
                if self.overflowed.load(Ordering::Acquire) && !self.overflow_signaled {
                    self.overflow_signaled = true;
                    Poll::Ready(Some(BusItem::Overflow))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl EventSubscription {
    /// Pull the next item without going through `StreamExt`.
    pub async fn next_item(&mut self) -> Option<BusItem> {
        use futures_util::StreamExt;
        self.next().await
    }
}
