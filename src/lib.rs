//! # stomp-client
//!
//! An asynchronous STOMP 1.0/1.1 client for brokers such as ActiveMQ and
//! RabbitMQ:
//!
//! * **Frame codec** for the text wire format, with header escaping
//! * **Stream framer** that cuts NUL-terminated frames out of arbitrary chunks
//! * **Connection state machine** over plain TCP or TLS (rustls)
//! * **Subscription routing** of inbound MESSAGE frames to handlers
//!
//! ## Quick Start
//!
//! ```rust
//! use stomp_client::{Command, Frame};
//!
//! let frame = Frame::new(Command::Send)
//!     .with_header("destination", "/queue/a")
//!     .with_body("hello");
//!
//! let encoded = stomp_client::encode_frame(&frame);
//! assert_eq!(&encoded[..], b"SEND\ndestination:/queue/a\n\nhello\0");
//!
//! let decoded = stomp_client::decode_frame(&encoded[..encoded.len() - 1]).unwrap();
//! assert_eq!(frame, decoded);
//! ```
//!
//! ## Protocol Overview
//!
//! A STOMP frame looks like this on the wire:
//!
//! ```text
//! COMMAND\n
//! key:value\n
//! key:value\n
//! \n
//! BODY\0
//! ```
//!
//! Header values escape `\`, CR, LF and `:` as `\\`, `\r`, `\n` and `\c`. A body
//! may carry a `content-length` header, which marks it as a bytes message.
//! Brokers may send a bare newline between frames as a heartbeat; it is skipped.
//!
//! ## Commands
//!
//! | Command     | Direction       | Description                      |
//! |-------------|-----------------|----------------------------------|
//! | CONNECT     | Client → Broker | Start of session                 |
//! | CONNECTED   | Broker → Client | Session accepted                 |
//! | SEND        | Client → Broker | Publish a message                |
//! | SUBSCRIBE   | Client → Broker | Register interest in destination |
//! | UNSUBSCRIBE | Client → Broker | Cancel a subscription            |
//! | MESSAGE     | Broker → Client | Message for a subscription       |
//! | ACK / NACK  | Client → Broker | Accept or reject a message       |
//! | BEGIN       | Client → Broker | Start a transaction              |
//! | COMMIT      | Client → Broker | Commit a transaction             |
//! | ABORT       | Client → Broker | Roll back a transaction          |
//! | RECEIPT     | Broker → Client | Confirms a frame with `receipt`  |
//! | ERROR       | Broker → Client | Broker-side failure              |
//! | DISCONNECT  | Client → Broker | Graceful close                   |

pub mod types;
pub mod frame;
pub mod framer;
pub mod codec;
pub mod config;
pub mod tcp;
pub mod connection;
pub mod dispatcher;
pub mod subscription;
pub mod events;
pub mod client;

// Re-export main types for convenience
pub use types::{
    Command, Frame, Header, Headers, Result, StompError,
    DEFAULT_HOST, DEFAULT_PORT, SUPPORTED_VERSIONS, V1_0, V1_1,
};

pub use client::StompClient;
pub use codec::StompCodec;
pub use config::{ClientConfig, TlsOptions};
pub use connection::ConnectionState;
pub use events::{ErrorEvent, Event, EventKind};
pub use frame::{decode_frame, encode_frame};
pub use framer::StreamFramer;
pub use subscription::{Destination, MessageHandler};
