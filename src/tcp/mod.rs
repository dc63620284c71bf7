//! Socket plumbing: plain TCP and TLS transports.

mod tls;
mod transport;

pub use tls::TlsStatus;
pub use transport::{open, Opened, Transport};
