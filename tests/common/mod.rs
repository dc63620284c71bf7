//! In-process broker and event capture shared by the integration tests.
#![allow(dead_code)]

use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::info;

use stomp_client::{
    ClientConfig, Command, Event, EventKind, Frame, StompClient, StompCodec, StompError,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A scripted broker: the test drives every frame it reads and writes.
pub struct MockBroker {
    listener: TcpListener,
}

impl MockBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        info!("Mock broker bound to {}", listener.local_addr().unwrap());
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.port())
    }

    pub async fn accept(&self) -> BrokerSession {
        let (socket, addr) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        info!("New connection from {}", addr);
        BrokerSession::new(socket)
    }

    /// Accept a connection and run the server side of the TLS handshake.
    pub async fn accept_tls(
        &self,
        acceptor: &TlsAcceptor,
    ) -> std::io::Result<BrokerSession<TlsStream<TcpStream>>> {
        let (socket, addr) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")?;
        info!("New TLS connection from {}", addr);
        let stream = timeout(WAIT, acceptor.accept(socket))
            .await
            .expect("TLS handshake timed out")?;
        Ok(BrokerSession::new(stream))
    }
}

pub struct BrokerSession<S = TcpStream> {
    framed: Framed<S, StompCodec>,
}

impl<S> BrokerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, StompCodec::new()),
        }
    }

    /// Next decoded item from the client, or `None` once it closed the stream.
    pub async fn try_recv(&mut self) -> Option<Result<Frame, StompError>> {
        timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for a client frame")
    }

    /// Next frame from the client, or `None` once it closed the socket.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.try_recv().await.map(|frame| frame.unwrap())
    }

    /// Read exactly `len` bytes off the wire, bypassing the codec.
    pub async fn recv_raw(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = self.framed.read_buffer_mut().split().to_vec();
        if bytes.len() < len {
            let start = bytes.len();
            bytes.resize(len, 0);
            timeout(WAIT, self.framed.get_mut().read_exact(&mut bytes[start..]))
                .await
                .expect("timed out waiting for raw bytes")
                .unwrap();
        }
        bytes
    }

    pub async fn expect(&mut self, command: Command) -> Frame {
        let frame = self.recv().await.expect("client closed the connection");
        assert_eq!(frame.command, command, "unexpected frame {frame:?}");
        frame
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    /// Write raw bytes, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.framed.get_mut().write_all(bytes).await.unwrap();
    }

    /// Read CONNECT and answer with CONNECTED.
    pub async fn handshake(&mut self, session: &str) -> Frame {
        let connect = self.expect(Command::Connect).await;
        self.send(
            Frame::new(Command::Connected)
                .with_header("session", session)
                .with_header("version", "1.1"),
        )
        .await;
        connect
    }
}

/// Capture every event the client raises, in order.
pub fn record(client: &StompClient) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Message,
        EventKind::Receipt,
        EventKind::Error,
    ] {
        let tx = tx.clone();
        client.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

/// Next event of any kind.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip ahead to the next event of `kind`.
pub async fn wait_for(events: &mut mpsc::UnboundedReceiver<Event>, kind: EventKind) -> Event {
    loop {
        let event = next_event(events).await;
        if event.kind() == kind {
            return event;
        }
    }
}

/// Connect `client` to `broker` and complete the handshake.
pub async fn connected(
    client: &StompClient,
    broker: &MockBroker,
    events: &mut mpsc::UnboundedReceiver<Event>,
    session: &str,
) -> BrokerSession {
    client.connect().unwrap();
    let mut conn = broker.accept().await;
    conn.handshake(session).await;
    wait_for(events, EventKind::Connected).await;
    conn
}
