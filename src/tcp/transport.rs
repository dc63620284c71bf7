use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use super::tls::{self, TlsStatus};
use crate::config::ClientConfig;
use crate::types::{Result, StompError};

/// Duplex byte stream to the broker, plain or TLS-wrapped.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

/// A freshly opened transport and, for TLS, how certificate validation went.
#[derive(Debug)]
pub struct Opened {
    pub transport: Transport,
    pub tls: Option<TlsStatus>,
}

/// Open a transport to the configured broker.
pub async fn open(config: &ClientConfig) -> Result<Opened> {
    let address = config.address();
    if !config.ssl {
        debug!("Connecting to {}", address);
        let stream = TcpStream::connect(&address).await?;
        info!("TCP connection to {} established", address);
        return Ok(Opened {
            transport: Transport::Plain(stream),
            tls: None,
        });
    }

    debug!("Connecting to {} using SSL", address);
    let (client_config, record) = tls::client_config(&config.ssl_options)?;
    let server_name = tls::server_name(&config.host, &config.ssl_options)?;

    let stream = TcpStream::connect(&address).await?;
    let connector = TlsConnector::from(client_config);
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| StompError::Tls(e.to_string()))?;
    debug!("SSL connection complete");

    Ok(Opened {
        transport: Transport::Tls(Box::new(stream)),
        tls: Some(record.status()),
    })
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
