//! The client facade applications hold.
//!
//! # Example
//!
//! ```no_run
//! use stomp_client::{ClientConfig, Headers, StompClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stomp_client::StompError> {
//!     let client = std::sync::Arc::new(StompClient::new(
//!         ClientConfig::new("localhost", 61613).credentials("guest", "guest"),
//!     ));
//!
//!     let subscriber = client.clone();
//!     client.on_connected(move || {
//!         let _ = subscriber.subscribe_with_handler(
//!             "/queue/test",
//!             Headers::from([("ack", "client")]),
//!             |body, headers| println!("{:?}: {}", headers.get("message-id"), String::from_utf8_lossy(body)),
//!         );
//!     });
//!
//!     client.connect()?;
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect()
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{info, info_span, Span};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::events::{ErrorEvent, Event, EventBus, EventKind};
use crate::subscription::{Destination, MessageHandler, SubscriptionRegistry};
use crate::types::{Frame, Headers, Result, StompError};

/// A STOMP client bound to one broker address.
///
/// Outbound commands are non-blocking: they queue the frame for the
/// connection's driver task and return the frame that will be written.
/// Everything that happens on the wire is reported through events.
#[derive(Debug)]
pub struct StompClient {
    config: Arc<ClientConfig>,
    events: Arc<EventBus>,
    span: Span,
    current: Mutex<Dispatcher>,
}

impl StompClient {
    pub fn new(config: ClientConfig) -> Self {
        let span = info_span!("stomp", host = %config.host, port = config.port);
        Self::with_span(config, span)
    }

    /// Create a client that records its diagnostics under `span`.
    pub fn with_span(config: ClientConfig, span: Span) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(EventBus::new());
        let current = Mutex::new(Self::fresh_dispatcher(&config, &events, &span));
        Self {
            config,
            events,
            span,
            current,
        }
    }

    fn fresh_dispatcher(config: &Arc<ClientConfig>, events: &Arc<EventBus>, span: &Span) -> Dispatcher {
        let connection = Arc::new(Connection::new(config.clone(), span.clone()));
        Dispatcher::new(
            connection,
            Arc::new(Mutex::new(SubscriptionRegistry::new())),
            events.clone(),
            span.clone(),
        )
    }

    fn slot(&self) -> MutexGuard<'_, Dispatcher> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatcher(&self) -> Dispatcher {
        self.slot().clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start connecting. A finished connection is replaced, together with its
    /// subscriptions; listeners are kept.
    pub fn connect(&self) -> Result<()> {
        let mut slot = self.slot();
        let state = slot.connection().state();
        if state.is_active() {
            return Err(StompError::InvalidState(state));
        }
        if !slot.connection().is_fresh() {
            info!(parent: &self.span, "Replacing finished connection ({:?})", state);
            *slot = Self::fresh_dispatcher(&self.config, &self.events, &self.span);
        }
        let dispatcher = slot.clone();
        drop(slot);
        dispatcher.connection().connect(dispatcher.clone())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.dispatcher().connection().disconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.dispatcher().connection().state()
    }

    pub fn session(&self) -> Option<String> {
        self.dispatcher().connection().session()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.dispatcher().connection().protocol_version()
    }

    /// `None` for plain TCP or before the TLS handshake finished.
    pub fn peer_certificate_valid(&self) -> Option<bool> {
        self.dispatcher()
            .connection()
            .tls_status()
            .map(|s| s.peer_certificate_valid)
    }

    pub fn authorization_error(&self) -> Option<String> {
        self.dispatcher()
            .connection()
            .tls_status()
            .and_then(|s| s.authorization_error)
    }

    /// Subscribe without a per-subscription handler; messages still arrive
    /// through the `message` event.
    pub fn subscribe(&self, destination: impl Into<Destination>, headers: Headers) -> Result<Vec<Frame>> {
        self.dispatcher()
            .subscribe(&destination.into(), &headers, None)
    }

    /// Subscribe and run `handler` with the body and headers of every message
    /// routed to these subscriptions.
    pub fn subscribe_with_handler<F>(
        &self,
        destination: impl Into<Destination>,
        headers: Headers,
        handler: F,
    ) -> Result<Vec<Frame>>
    where
        F: Fn(&[u8], &Headers) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.dispatcher()
            .subscribe(&destination.into(), &headers, Some(handler))
    }

    pub fn unsubscribe(&self, destination: impl Into<Destination>, headers: Headers) -> Result<Vec<Frame>> {
        self.dispatcher().unsubscribe(&destination.into(), &headers)
    }

    /// Send a message. A `body` header becomes the frame body. With
    /// `want_receipt`, a `receipt` header is added; the broker's answer
    /// arrives as a `receipt` event.
    pub fn send(&self, headers: Headers, want_receipt: bool) -> Result<Frame> {
        self.dispatcher().send(headers, want_receipt)
    }

    /// Send a message with an explicit body, which may hold arbitrary bytes.
    /// A `content-length` header is added unless `headers` already has one.
    pub fn send_body(&self, headers: Headers, body: impl Into<Bytes>, want_receipt: bool) -> Result<Frame> {
        self.dispatcher()
            .send_body(headers, body.into(), want_receipt)
    }

    pub fn ack(&self, headers: &Headers) -> Result<Frame> {
        self.dispatcher().ack(headers)
    }

    pub fn nack(&self, headers: &Headers) -> Result<Frame> {
        self.dispatcher().nack(headers)
    }

    pub fn begin(&self) -> Result<String> {
        self.dispatcher().begin()
    }

    pub fn commit(&self, transaction: &str) -> Result<Frame> {
        self.dispatcher().commit(transaction)
    }

    pub fn abort(&self, transaction: &str) -> Result<Frame> {
        self.dispatcher().abort(transaction)
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.on(kind, listener);
    }

    pub fn on_connected<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on(EventKind::Connected, move |_| listener());
    }

    pub fn on_disconnected<F>(&self, listener: F)
    where
        F: Fn(Option<&StompError>) + Send + Sync + 'static,
    {
        self.events.on(EventKind::Disconnected, move |event| {
            if let Event::Disconnected(cause) = event {
                listener(cause.as_deref());
            }
        });
    }

    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.events.on(EventKind::Message, move |event| {
            if let Event::Message(frame) = event {
                listener(frame);
            }
        });
    }

    pub fn on_receipt<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on(EventKind::Receipt, move |event| {
            if let Event::Receipt(id) = event {
                listener(id);
            }
        });
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.events.on(EventKind::Error, move |event| {
            if let Event::Error(error) = event {
                listener(error);
            }
        });
    }
}
