//! Client-visible events and the listener registry.
//!
//! Listeners are kept per [`EventKind`] in registration order and invoked
//! synchronously, in that order, on the connection's driver task. A listener
//! may call back into the client (e.g. `ack` from a `message` listener).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{Frame, StompError};

/// Event names listeners register against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Message,
    Receipt,
    Error,
}

/// Payload of an `error` event.
#[derive(Debug, Clone)]
pub enum ErrorEvent {
    /// ERROR frame sent by the broker; `message` carries the description.
    Frame(Frame),
    /// Socket or TLS failure.
    Transport(Arc<StompError>),
}

#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    /// Transport closed, with the error that caused it, if any.
    Disconnected(Option<Arc<StompError>>),
    Message(Frame),
    Receipt(String),
    Error(ErrorEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected(_) => EventKind::Disconnected,
            Event::Message(_) => EventKind::Message,
            Event::Receipt(_) => EventKind::Receipt,
            Event::Error(_) => EventKind::Error,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Invoke every listener registered for the event's kind.
    ///
    /// The listener list is snapshotted first so listeners can register
    /// further listeners without deadlocking.
    pub fn emit(&self, event: &Event) {
        let listeners: Vec<EventHandler> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let log = log.clone();
            bus.on(EventKind::Receipt, move |event| {
                if let Event::Receipt(id) = event {
                    log.lock().unwrap().push(format!("{n}:{id}"));
                }
            });
        }

        bus.emit(&Event::Receipt("r1".into()));
        assert_eq!(*log.lock().unwrap(), vec!["0:r1", "1:r1", "2:r1"]);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        bus.on(EventKind::Connected, move |_| *counter.lock().unwrap() += 1);

        bus.emit(&Event::Disconnected(None));
        bus.emit(&Event::Connected);

        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(bus.listener_count(EventKind::Connected), 1);
        assert_eq!(bus.listener_count(EventKind::Message), 0);
    }

    #[test]
    fn listener_may_register_another() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.on(EventKind::Connected, move |_| {
            inner.on(EventKind::Connected, |_| {});
        });
        bus.emit(&Event::Connected);
        assert_eq!(bus.listener_count(EventKind::Connected), 2);
    }
}
