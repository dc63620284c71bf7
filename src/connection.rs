//! Connection lifecycle state machine.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> HANDSHAKING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
//!                      \             \             \
//!                       +-------------+-------------+--> ERROR (terminal)
//! ```
//!
//! A [`Connection`] is single-use: once it has been started it never returns
//! to a connectable state, and the facade replaces it to reconnect. All I/O
//! for one connection runs on one driver task, which reads inbound frames and
//! writes queued outbound frames one at a time, so frames are decoded,
//! dispatched and written in order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::codec::StompCodec;
use crate::config::ClientConfig;
use crate::dispatcher::{connect_frame, Dispatcher};
use crate::tcp::{self, TlsStatus};
use crate::types::{Command, Frame, Result, StompError};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
    Error,
}

impl ConnectionState {
    /// Whether a transport is (or is about to be) held.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Handshaking
                | ConnectionState::Connected
                | ConnectionState::Disconnecting
        )
    }
}

#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    started: bool,
    established: bool,
    session: Option<String>,
    protocol_version: Option<String>,
    tls: Option<TlsStatus>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

/// One broker connection and its transport.
#[derive(Debug)]
pub struct Connection {
    config: Arc<ClientConfig>,
    inner: Mutex<Inner>,
    cancel: Notify,
    span: Span,
}

impl Connection {
    /// Create an idle connection. `span` is the logging context every
    /// diagnostic of this connection is recorded under.
    pub fn new(config: Arc<ClientConfig>, span: Span) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            cancel: Notify::new(),
            span,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Session id assigned by the broker's CONNECTED frame.
    pub fn session(&self) -> Option<String> {
        self.lock().session.clone()
    }

    /// Protocol version from the broker's CONNECTED frame.
    pub fn protocol_version(&self) -> Option<String> {
        self.lock().protocol_version.clone()
    }

    /// Certificate validation outcome, for TLS connections that got that far.
    pub fn tls_status(&self) -> Option<TlsStatus> {
        self.lock().tls.clone()
    }

    /// True until `connect` has been called.
    pub fn is_fresh(&self) -> bool {
        !self.lock().started
    }

    /// Start connecting. Returns once the driver task is spawned; progress is
    /// reported through the dispatcher's events.
    pub fn connect(self: &Arc<Self>, dispatcher: Dispatcher) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| StompError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.lock();
            if inner.started {
                return Err(StompError::InvalidState(inner.state));
            }
            inner.started = true;
            inner.state = ConnectionState::Connecting;
            inner.outbound = Some(tx);
        }

        let span = self.span.clone();
        runtime.spawn(self.clone().run(rx, dispatcher).instrument(span));
        Ok(())
    }

    /// Close the transport. In-flight outbound frames may be lost.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Connecting
            | ConnectionState::Handshaking
            | ConnectionState::Connected => {}
            other => return Err(StompError::InvalidState(other)),
        }
        inner.state = ConnectionState::Disconnecting;
        if let Some(tx) = inner.outbound.take() {
            let _ = tx.send(Outbound::Close);
        }
        drop(inner);

        self.cancel.notify_one();
        debug!(parent: &self.span, "disconnect called");
        Ok(())
    }

    /// Queue a frame for the driver task to write.
    pub(crate) fn transmit(&self, frame: Frame) -> Result<()> {
        let inner = self.lock();
        match (inner.state, inner.outbound.as_ref()) {
            (
                ConnectionState::Connecting
                | ConnectionState::Handshaking
                | ConnectionState::Connected,
                Some(tx),
            ) => tx
                .send(Outbound::Frame(frame))
                .map_err(|_| StompError::NotConnected),
            _ => Err(StompError::NotConnected),
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut inner = self.lock();
        if inner.state != from {
            return false;
        }
        inner.state = to;
        true
    }

    async fn run(
        self: Arc<Self>,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        dispatcher: Dispatcher,
    ) {
        let opened = tokio::select! {
            opened = tcp::open(&self.config) => opened,
            _ = self.cancel.notified() => {
                info!("Connect cancelled");
                self.finish(&dispatcher, None);
                return;
            }
        };
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(&dispatcher, e);
                return;
            }
        };
        let mut transport = opened.transport;

        if let Some(status) = opened.tls {
            self.lock().tls = Some(status.clone());
            if !status.peer_certificate_valid {
                let reason = status.authorization_error.unwrap_or_default();
                error!("SSL is not authorized: {}", reason);
                if self.config.ssl_validate {
                    let _ = transport.shutdown().await;
                    self.fail(&dispatcher, StompError::CertificateRejected(reason));
                    return;
                }
            }
        }

        if !self.transition(ConnectionState::Connecting, ConnectionState::Handshaking) {
            // disconnect() won the race with the open.
            let _ = transport.shutdown().await;
            self.finish(&dispatcher, None);
            return;
        }

        let (read_half, write_half) = tokio::io::split(transport);
        let mut reader = FramedRead::new(read_half, StompCodec::new());
        let mut writer = FramedWrite::new(write_half, StompCodec::new());

        if let Err(e) = writer.send(connect_frame(&self.config)).await {
            self.fail(&dispatcher, e);
            return;
        }
        debug!("CONNECT sent, awaiting CONNECTED");

        let cause = loop {
            tokio::select! {
                inbound = reader.next() => match inbound {
                    Some(Ok(frame)) => self.receive(frame, &dispatcher),
                    Some(Err(e)) => break Some(e),
                    None => {
                        info!("Connection closed by peer");
                        break None;
                    }
                },
                command = outbound.recv() => match command {
                    Some(Outbound::Frame(frame)) => {
                        debug!("Sending {}", frame);
                        if let Err(e) = writer.send(frame).await {
                            break Some(e);
                        }
                        if !outbound.is_empty() {
                            debug!("Write buffered, {} frames queued", outbound.len());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let established = self.lock().established;
                        if established {
                            if let Err(e) = writer.send(Frame::new(Command::Disconnect)).await {
                                debug!("DISCONNECT not delivered: {}", e);
                            }
                        }
                        // Half-close; dropping both halves below closes the socket.
                        if let Err(e) = writer.close().await {
                            debug!("Shutdown failed: {}", e);
                        }
                        break None;
                    }
                },
            }
        };

        drop(reader);
        drop(writer);
        match cause {
            Some(e) => self.fail(&dispatcher, e),
            None => self.finish(&dispatcher, None),
        }
    }

    fn receive(&self, frame: Frame, dispatcher: &Dispatcher) {
        debug!("Received {}", frame);
        if frame.command == Command::Connected {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Handshaking {
                warn!("Ignoring CONNECTED while {:?}", inner.state);
                return;
            }
            inner.state = ConnectionState::Connected;
            inner.established = true;
            inner.session = frame.header("session").map(str::to_owned);
            inner.protocol_version = frame.header("version").map(str::to_owned);
            info!(
                session = ?inner.session,
                version = ?inner.protocol_version,
                "Connected to STOMP"
            );
        }
        dispatcher.dispatch(frame);
    }

    fn fail(&self, dispatcher: &Dispatcher, err: StompError) {
        let err = Arc::new(err);
        error!("{}", err);
        dispatcher.transport_error(err.clone());
        self.finish(dispatcher, Some(err));
    }

    fn finish(&self, dispatcher: &Dispatcher, cause: Option<Arc<StompError>>) {
        {
            let mut inner = self.lock();
            inner.outbound = None;
            inner.state = if cause.is_some() {
                ConnectionState::Error
            } else {
                ConnectionState::Disconnected
            };
        }
        match &cause {
            Some(e) => info!("Disconnected with error: {}", e),
            None => info!("Disconnected"),
        }
        dispatcher.disconnected(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::subscription::SubscriptionRegistry;
    use tokio::net::TcpListener;

    fn connection(port: u16) -> (Arc<Connection>, Dispatcher) {
        let config = Arc::new(ClientConfig::new("127.0.0.1", port));
        let conn = Arc::new(Connection::new(config, Span::none()));
        let dispatcher = Dispatcher::new(
            conn.clone(),
            Arc::new(Mutex::new(SubscriptionRegistry::new())),
            Arc::new(EventBus::new()),
            Span::none(),
        );
        (conn, dispatcher)
    }

    #[test]
    fn starts_disconnected_without_transport() {
        let (conn, _) = connection(61613);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.is_fresh());
        assert!(conn.session().is_none());
        assert!(matches!(
            conn.transmit(Frame::new(Command::Begin)),
            Err(StompError::NotConnected)
        ));
        assert!(matches!(
            conn.disconnect(),
            Err(StompError::InvalidState(ConnectionState::Disconnected))
        ));
    }

    #[test]
    fn connect_needs_a_runtime() {
        let (conn, dispatcher) = connection(61613);
        assert!(matches!(conn.connect(dispatcher), Err(StompError::NoRuntime)));
        assert!(conn.is_fresh());
    }

    #[tokio::test]
    async fn connect_enters_connecting_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (conn, dispatcher) = connection(listener.local_addr().unwrap().port());

        conn.connect(dispatcher.clone()).unwrap();
        // The driver task has not been polled yet on this single-threaded runtime.
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_fresh());
        assert!(matches!(
            conn.connect(dispatcher),
            Err(StompError::InvalidState(ConnectionState::Connecting))
        ));
    }

    #[test]
    fn active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Disconnecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Error.is_active());
    }
}
