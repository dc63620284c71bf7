//! Command dispatcher.
//!
//! Inbound, it turns decoded frames into [`Event`]s and runs per-subscription
//! handlers. Outbound, it builds the frame for each client command and hands
//! it to the [`Connection`] for transmission.
//!
//! Caller-supplied headers are not validated: a SEND without `destination`
//! goes out as-is and the broker answers with an ERROR frame.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, trace, warn, Span};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::events::{ErrorEvent, Event, EventBus};
use crate::subscription::{Destination, MessageHandler, SubscriptionRegistry};
use crate::types::{Command, Frame, Headers, Result, StompError};

/// Upper bound for generated transaction and receipt ids.
const MAX_RANDOM_ID: u64 = 99_999_999_999;

/// Routes frames between one [`Connection`] and the client's listeners.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    connection: Arc<Connection>,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    events: Arc<EventBus>,
    span: Span,
}

impl Dispatcher {
    pub fn new(
        connection: Arc<Connection>,
        subscriptions: Arc<Mutex<SubscriptionRegistry>>,
        events: Arc<EventBus>,
        span: Span,
    ) -> Self {
        Self {
            connection,
            subscriptions,
            events,
            span,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn subscriptions(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one inbound frame.
    pub fn dispatch(&self, frame: Frame) {
        match frame.command {
            Command::Message => {
                if frame.header("message-id").is_none() {
                    trace!(parent: &self.span, "Dropping MESSAGE without message-id");
                    return;
                }
                self.run_subscription_handler(&frame);
                self.events.emit(&Event::Message(frame));
            }
            Command::Connected => {
                self.events.emit(&Event::Connected);
            }
            Command::Receipt => match frame.header("receipt-id") {
                Some(id) => self.events.emit(&Event::Receipt(id.to_string())),
                None => warn!(parent: &self.span, "Dropping RECEIPT without receipt-id"),
            },
            Command::Error => {
                warn!(
                    parent: &self.span,
                    "Broker sent ERROR: {}",
                    frame.header("message").unwrap_or_default()
                );
                self.events.emit(&Event::Error(ErrorEvent::Frame(frame)));
            }
            other => {
                warn!(parent: &self.span, "Could not handle inbound command: {}", other);
            }
        }
    }

    fn run_subscription_handler(&self, frame: &Frame) {
        // Clone the handler out so it runs without the registry locked.
        let handler = self
            .subscriptions()
            .lookup(&frame.headers)
            .filter(|s| s.enabled)
            .and_then(|s| s.handler.clone());
        if let Some(handler) = handler {
            handler(&frame.body, &frame.headers);
        }
    }

    pub(crate) fn transport_error(&self, err: Arc<StompError>) {
        self.events
            .emit(&Event::Error(ErrorEvent::Transport(err)));
    }

    pub(crate) fn disconnected(&self, cause: Option<Arc<StompError>>) {
        self.events.emit(&Event::Disconnected(cause));
    }

    fn transmit(&self, frame: Frame) -> Result<Frame> {
        self.connection.transmit(frame.clone())?;
        Ok(frame)
    }

    /// Send one SUBSCRIBE per destination and register each subscription.
    ///
    /// If a frame cannot be queued, the subscriptions registered earlier in
    /// the same call are removed again and the error is returned.
    pub fn subscribe(
        &self,
        destination: &Destination,
        headers: &Headers,
        handler: Option<MessageHandler>,
    ) -> Result<Vec<Frame>> {
        let session = self.connection.session();
        let frames = subscribe_frames(destination, headers, session.as_deref(), &uid());

        let mut sent = Vec::with_capacity(frames.len());
        for frame in frames {
            let frame = match self.transmit(frame) {
                Ok(frame) => frame,
                Err(e) => {
                    let ids: Vec<&str> = sent.iter().filter_map(|f: &Frame| f.header("id")).collect();
                    self.subscriptions().remove_ids(&ids);
                    return Err(e);
                }
            };
            if let (Some(id), Some(dest)) = (frame.header("id"), frame.header("destination")) {
                self.subscriptions().add(id, dest, handler.clone());
            }
            sent.push(frame);
        }
        debug!(parent: &self.span, "Subscribed to {:?}", destination.as_slice());
        Ok(sent)
    }

    /// Send one UNSUBSCRIBE per destination. The subscription named by the
    /// frame's `id` is disabled; without an id, every subscription on the
    /// destination is.
    pub fn unsubscribe(&self, destination: &Destination, headers: &Headers) -> Result<Vec<Frame>> {
        let session = self.connection.session();
        let frames = {
            let registry = self.subscriptions();
            unsubscribe_frames(destination, headers, session.as_deref(), |dest| {
                registry.enabled_for(dest).map(|s| s.id.clone())
            })
        };

        let mut sent = Vec::with_capacity(frames.len());
        for frame in frames {
            let frame = self.transmit(frame)?;
            {
                let mut registry = self.subscriptions();
                match (frame.header("id"), frame.header("destination")) {
                    (Some(id), _) => {
                        registry.disable_id(id);
                    }
                    (None, Some(dest)) => {
                        registry.disable_destination(dest);
                    }
                    (None, None) => {}
                }
            }
            debug!(
                parent: &self.span,
                "No longer subscribed to: {}",
                frame.header("destination").unwrap_or_default()
            );
            sent.push(frame);
        }
        Ok(sent)
    }

    /// Send a message; a `body` entry in `headers` becomes the frame body.
    pub fn send(&self, headers: Headers, want_receipt: bool) -> Result<Frame> {
        let session = self.connection.session();
        let receipt = want_receipt.then(random_id);
        self.transmit(send_frame(headers, None, session.as_deref(), receipt))
    }

    /// Send a message with an explicit (possibly binary) body.
    pub fn send_body(&self, headers: Headers, body: Bytes, want_receipt: bool) -> Result<Frame> {
        let session = self.connection.session();
        let receipt = want_receipt.then(random_id);
        self.transmit(send_frame(headers, Some(body), session.as_deref(), receipt))
    }

    pub fn ack(&self, headers: &Headers) -> Result<Frame> {
        let frame = self.transmit(acknowledgement_frame(Command::Ack, headers))?;
        debug!(
            parent: &self.span,
            "Acknowledged message: {}",
            frame.header("message-id").unwrap_or_default()
        );
        Ok(frame)
    }

    pub fn nack(&self, headers: &Headers) -> Result<Frame> {
        let frame = self.transmit(acknowledgement_frame(Command::Nack, headers))?;
        debug!(
            parent: &self.span,
            "Denied message: {}",
            frame.header("message-id").unwrap_or_default()
        );
        Ok(frame)
    }

    /// Start a transaction and return its generated id.
    pub fn begin(&self) -> Result<String> {
        let id = random_id();
        self.transmit(transaction_frame(Command::Begin, &id))?;
        debug!(parent: &self.span, "Begin transaction: {}", id);
        Ok(id)
    }

    pub fn commit(&self, transaction: &str) -> Result<Frame> {
        let frame = self.transmit(transaction_frame(Command::Commit, transaction))?;
        debug!(parent: &self.span, "Commit transaction: {}", transaction);
        Ok(frame)
    }

    pub fn abort(&self, transaction: &str) -> Result<Frame> {
        let frame = self.transmit(transaction_frame(Command::Abort, transaction))?;
        debug!(parent: &self.span, "Abort transaction: {}", transaction);
        Ok(frame)
    }
}

/// Build the CONNECT frame for the handshake.
pub fn connect_frame(config: &ClientConfig) -> Frame {
    let mut frame = Frame::new(Command::Connect);
    if let (Some(login), Some(passcode)) = (&config.login, &config.passcode) {
        frame.headers.insert("login", login.as_str());
        frame.headers.insert("passcode", passcode.as_str());
    }
    if let Some(client_id) = &config.client_id {
        frame.headers.insert("client-id", client_id.as_str());
    }
    if let Some(vhost) = &config.vhost {
        frame.headers.insert("host", vhost.as_str());
    }
    frame
        .headers
        .insert("accept-version", config.accept_versions.as_str());
    frame
}

/// Expand a SUBSCRIBE into one frame per destination with ids `<uid>-<index>`.
pub fn subscribe_frames(
    destination: &Destination,
    headers: &Headers,
    session: Option<&str>,
    uid: &str,
) -> Vec<Frame> {
    destination
        .as_slice()
        .iter()
        .enumerate()
        .map(|(index, dest)| {
            let mut frame = Frame::new(Command::Subscribe)
                .with_header("destination", dest.as_str())
                .with_header("id", format!("{uid}-{index}"));
            copy_headers(headers, &mut frame.headers, &["destination", "id", "session"]);
            if let Some(session) = session {
                frame.headers.insert("session", session);
            }
            frame
        })
        .collect()
}

/// Expand an UNSUBSCRIBE into one frame per destination. Without an explicit
/// `id` header, `resolve_id` supplies the subscription id for a destination.
pub fn unsubscribe_frames<F>(
    destination: &Destination,
    headers: &Headers,
    session: Option<&str>,
    resolve_id: F,
) -> Vec<Frame>
where
    F: Fn(&str) -> Option<String>,
{
    destination
        .as_slice()
        .iter()
        .map(|dest| {
            let mut frame =
                Frame::new(Command::Unsubscribe).with_header("destination", dest.as_str());
            match headers.get("id") {
                Some(id) => {
                    frame.headers.insert("id", id);
                }
                None => {
                    if let Some(id) = resolve_id(dest) {
                        frame.headers.insert("id", id);
                    }
                }
            }
            copy_headers(headers, &mut frame.headers, &["destination", "id", "session"]);
            if let Some(session) = session {
                frame.headers.insert("session", session);
            }
            frame
        })
        .collect()
}

/// Build a SEND frame. Without an explicit body, a `body` header is moved
/// into the frame body. An explicit body is announced with `content-length`
/// so brokers read past embedded NULs.
pub fn send_frame(
    mut headers: Headers,
    body: Option<Bytes>,
    session: Option<&str>,
    receipt: Option<String>,
) -> Frame {
    let header_body = headers.remove("body");
    let body = match body {
        Some(body) => {
            if !headers.contains_key("content-length") {
                headers.insert("content-length", body.len().to_string());
            }
            body
        }
        None => Bytes::from(header_body.unwrap_or_default()),
    };
    if let Some(session) = session {
        headers.insert("session", session);
    }
    if let Some(receipt) = receipt {
        headers.insert("receipt", receipt);
    }
    Frame::new(Command::Send)
        .with_headers(headers)
        .with_body(body)
}

/// ACK / NACK carry only `message-id` and `subscription`.
pub fn acknowledgement_frame(command: Command, headers: &Headers) -> Frame {
    let mut frame = Frame::new(command);
    for key in ["message-id", "subscription"] {
        if let Some(value) = headers.get(key).filter(|v| !v.is_empty()) {
            frame.headers.insert(key, value);
        }
    }
    frame
}

pub fn transaction_frame(command: Command, transaction: &str) -> Frame {
    Frame::new(command).with_header("transaction", transaction)
}

fn copy_headers(from: &Headers, to: &mut Headers, skip: &[&str]) {
    for (key, value) in from.iter() {
        if !skip.contains(&key) {
            to.insert(key, value);
        }
    }
}

/// Per-call subscription uid: `sub-<millis>-<0..1000>`.
pub fn uid() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = rand::thread_rng().gen_range(0..1000);
    format!("sub-{millis}-{suffix}")
}

/// Random decimal id used for transactions and receipts.
pub fn random_id() -> String {
    rand::thread_rng().gen_range(0..MAX_RANDOM_ID).to_string()
}
