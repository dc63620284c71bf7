//! `tokio_util` codec for use with `FramedRead` / `FramedWrite`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::frame::{decode_frame, encode_into};
use crate::framer::split_frame;
use crate::types::{Frame, StompError};

/// Codec that frames a byte stream and decodes each frame.
///
/// Raw frames that fail to decode are dropped; they never surface as errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompCodec;

impl StompCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StompError> {
        while let Some(raw) = split_frame(src) {
            match decode_frame(&raw) {
                Some(frame) => {
                    trace!("decoded {}", frame);
                    return Ok(Some(frame));
                }
                None => debug!("Dropping malformed frame ({} bytes)", raw.len()),
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StompError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!("Discarding {} unterminated bytes at end of stream", src.len());
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = StompError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), StompError> {
        encode_into(&frame, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;
    use futures::SinkExt;
    use tokio_stream::StreamExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn reads_frames_across_chunk_boundaries() {
        let mock = tokio_test::io::Builder::new()
            .read(b"CONNECTED\nversion:1.1\nsess")
            .read(b"ion:abc\n\n\0\nMESSAGE\nmessage-id:1\n\nhel")
            .read(b"lo\0RECEIPT\nreceipt-id:9\n\n\0")
            .build();
        let mut framed = FramedRead::new(mock, StompCodec::new());

        let connected = framed.next().await.unwrap().unwrap();
        assert_eq!(connected.command, Command::Connected);
        assert_eq!(connected.header("session"), Some("abc"));

        let message = framed.next().await.unwrap().unwrap();
        assert_eq!(message.command, Command::Message);
        assert_eq!(message.body_text(), "hello");

        let receipt = framed.next().await.unwrap().unwrap();
        assert_eq!(receipt.header("receipt-id"), Some("9"));

        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let mock = tokio_test::io::Builder::new()
            .read(b"BOGUS\n\n\0RECEIPT\nreceipt-id:1\n\n\0")
            .build();
        let mut framed = FramedRead::new(mock, StompCodec::new());

        let frame = framed.next().await.unwrap().unwrap();
        assert_eq!(frame.command, Command::Receipt);
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn trailing_partial_data_is_not_an_error() {
        let mock = tokio_test::io::Builder::new()
            .read(b"RECEIPT\nreceipt-id:1\n\n\0\nMESSAGE\nmessage-")
            .build();
        let mut framed = FramedRead::new(mock, StompCodec::new());

        assert!(framed.next().await.unwrap().is_ok());
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn writes_encoded_frames() {
        let mock = tokio_test::io::Builder::new()
            .write(b"BEGIN\ntransaction:42\n\n\0")
            .build();
        let mut framed = FramedWrite::new(mock, StompCodec::new());
        framed
            .send(Frame::new(Command::Begin).with_header("transaction", "42"))
            .await
            .unwrap();
    }
}
