// =============================================================================
// EventBus — universe-scoped typed pub/sub with a provenance contract
// =============================================================================
//
// Bound to exactly one UniverseContext at construction. `publish` enforces
// the provenance contract before anything else runs: a mismatched universe
// or missing session_id never reaches a handler. Dispatch is single-threaded
// and cooperative — type-specific handlers run before global handlers, in
// subscription order, and the bus awaits any future a handler returns before
// moving to the next one.
// =============================================================================

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{Event, EventKind};
use crate::universe::UniverseContext;

const EVENT_LOG_CAPACITY: usize = 100;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    UniverseMismatch { expected: String, got: String },
    MissingProvenance(String),
}

impl fmt::Display for EventBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventBusError::UniverseMismatch { expected, got } => {
                write!(f, "universe mismatch: bus is bound to {expected}, event carries {got}")
            }
            EventBusError::MissingProvenance(field) => {
                write!(f, "missing provenance field: {field}")
            }
        }
    }
}

impl std::error::Error for EventBusError {}

struct Subscribers {
    by_kind: HashMap<EventKind, Vec<Handler>>,
    global: Vec<Handler>,
}

impl Subscribers {
    fn new() -> Self {
        Self { by_kind: HashMap::new(), global: Vec::new() }
    }
}

/// Typed pub/sub bound to exactly one UniverseContext.
pub struct EventBus {
    pub context: UniverseContext,
    subscribers: RwLock<Subscribers>,
    event_log: RwLock<Vec<Event>>,
}

impl EventBus {
    pub fn new(context: UniverseContext) -> Self {
        Self {
            context,
            subscribers: RwLock::new(Subscribers::new()),
            event_log: RwLock::new(Vec::with_capacity(EVENT_LOG_CAPACITY)),
        }
    }

    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        self.subscribers.write().by_kind.entry(kind).or_default().push(handler);
    }

    pub fn subscribe_all(&self, handler: Handler) {
        self.subscribers.write().global.push(handler);
    }

    /// Removes a previously-subscribed type-specific handler, matched by
    /// `Arc` pointer identity. A no-op if the handler was never subscribed
    /// (or already removed) for `kind`.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Handler) {
        if let Some(handlers) = self.subscribers.write().by_kind.get_mut(&kind) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Removes a previously-subscribed global handler, matched by `Arc`
    /// pointer identity.
    pub fn unsubscribe_all(&self, handler: &Handler) {
        self.subscribers.write().global.retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Recent-event ring log, most-recent-last, capped at 100 entries.
    pub fn recent_events(&self) -> Vec<Event> {
        self.event_log.read().clone()
    }

    pub async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        let prov = event.provenance();

        if prov.universe != self.context.universe {
            return Err(EventBusError::UniverseMismatch {
                expected: self.context.universe.to_string(),
                got: prov.universe.to_string(),
            });
        }
        if prov.session_id.is_empty() {
            return Err(EventBusError::MissingProvenance("session_id".to_string()));
        }

        {
            let mut log = self.event_log.write();
            log.push(event.clone());
            while log.len() > EVENT_LOG_CAPACITY {
                log.remove(0);
            }
        }

        let kind = event.kind();
        let (type_specific, global) = {
            let subs = self.subscribers.read();
            let type_specific = subs.by_kind.get(&kind).cloned().unwrap_or_default();
            (type_specific, subs.global.clone())
        };

        for handler in type_specific.iter().chain(global.iter()) {
            handler(event.clone()).await;
        }

        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("universe", &self.context.universe)
            .field("session_id", &self.context.session_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogEvent, Provenance};
    use crate::universe::Universe;
    use parking_lot::Mutex;

    fn make_event(bus: &EventBus, universe: Universe, session_id: &str) -> Event {
        Event::LogEvent(LogEvent {
            prov: Provenance {
                universe,
                session_id: session_id.to_string(),
                timestamp: chrono::Utc::now(),
                source: "test".to_string(),
                data_lineage_id: Some(bus.context.data_lineage_id.clone()),
                validity_class: Some(bus.context.validity_class),
            },
            message: "hi".to_string(),
            data: serde_json::json!({}),
        })
    }

    #[tokio::test]
    async fn cross_universe_publish_rejected() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        let before = bus.recent_events().len();
        let event = make_event(&bus, Universe::Paper, "s");
        let err = bus.publish(event).await.unwrap_err();
        assert!(matches!(err, EventBusError::UniverseMismatch { .. }));
        assert_eq!(bus.recent_events().len(), before);
    }

    #[tokio::test]
    async fn missing_session_id_rejected() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        let event = make_event(&bus, Universe::Simulation, "");
        let err = bus.publish(event).await.unwrap_err();
        assert_eq!(err, EventBusError::MissingProvenance("session_id".to_string()));
    }

    #[tokio::test]
    async fn type_specific_before_global_fifo() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(
            EventKind::LogEvent,
            Arc::new(move |_e| {
                let o1 = o1.clone();
                Box::pin(async move { o1.lock().push("type-specific") })
            }),
        );
        let o2 = order.clone();
        bus.subscribe_all(Arc::new(move |_e| {
            let o2 = o2.clone();
            Box::pin(async move { o2.lock().push("global") })
        }));

        let event = make_event(&bus, Universe::Simulation, "s");
        bus.publish(event).await.unwrap();

        assert_eq!(*order.lock(), vec!["type-specific", "global"]);
    }

    #[tokio::test]
    async fn handler_error_does_not_abort_publish() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        let ran = Arc::new(Mutex::new(false));

        bus.subscribe_all(Arc::new(|_e| Box::pin(async move {
            // simulate a handler that would have panicked on bad input;
            // handlers communicate failure by logging, never by propagating.
            tracing::warn!("handler failed, continuing");
        })));
        let ran2 = ran.clone();
        bus.subscribe_all(Arc::new(move |_e| {
            let ran2 = ran2.clone();
            Box::pin(async move { *ran2.lock() = true })
        }));

        let event = make_event(&bus, Universe::Simulation, "s");
        bus.publish(event).await.unwrap();
        assert!(*ran.lock());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_dispatch() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let handler: Handler = Arc::new(move |_e| {
            let c = c.clone();
            Box::pin(async move { *c.lock() += 1 })
        });
        bus.subscribe(EventKind::LogEvent, handler.clone());

        bus.publish(make_event(&bus, Universe::Simulation, "s")).await.unwrap();
        assert_eq!(*calls.lock(), 1);

        bus.unsubscribe(EventKind::LogEvent, &handler);
        bus.publish(make_event(&bus, Universe::Simulation, "s")).await.unwrap();
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_all_stops_global_dispatch() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let handler: Handler = Arc::new(move |_e| {
            let c = c.clone();
            Box::pin(async move { *c.lock() += 1 })
        });
        bus.subscribe_all(handler.clone());

        bus.publish(make_event(&bus, Universe::Simulation, "s")).await.unwrap();
        assert_eq!(*calls.lock(), 1);

        bus.unsubscribe_all(&handler);
        bus.publish(make_event(&bus, Universe::Simulation, "s")).await.unwrap();
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn event_log_caps_at_100() {
        let bus = EventBus::new(UniverseContext::new(Universe::Simulation));
        for _ in 0..150 {
            let event = make_event(&bus, Universe::Simulation, "s");
            bus.publish(event).await.unwrap();
        }
        assert_eq!(bus.recent_events().len(), EVENT_LOG_CAPACITY);
    }
}
