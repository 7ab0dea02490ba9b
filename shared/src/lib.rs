//! Wire types shared by the room server and its clients.
//!
//! Two layers travel over every connection:
//! - [`Frame`]: the transport unit. Control traffic (ping, pong, close) lives
//!   here and never reaches a room.
//! - [`Envelope`]: the typed, user-tagged message carried inside a
//!   [`Frame::Data`] and fanned out to every member of a room.

use bincode::Options;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;
/// Hard ceiling for a single transport frame, independent of room limits.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;
/// Longest sender id an inbound envelope may carry.
pub const MAX_USER_ID_LEN: usize = 1024;

/// Kind byte plus the two length prefixes.
const ENVELOPE_OVERHEAD: usize = 1 + 8 + 8;

/// Errors raised while decoding an [`Envelope`].
///
/// None of these are fatal to a connection: the offending frame is dropped.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("malformed envelope: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Transport-level failures. Always fatal to the connection that raised them.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Text,
    StructuredEvent,
    PresenceJoin,
    PresenceLeave,
}

impl EnvelopeKind {
    /// Discriminator written on the wire.
    pub fn code(self) -> u8 {
        match self {
            EnvelopeKind::Text => 0,
            EnvelopeKind::StructuredEvent => 1,
            EnvelopeKind::PresenceJoin => 2,
            EnvelopeKind::PresenceLeave => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EnvelopeKind::Text),
            1 => Some(EnvelopeKind::StructuredEvent),
            2 => Some(EnvelopeKind::PresenceJoin),
            3 => Some(EnvelopeKind::PresenceLeave),
            _ => None,
        }
    }

    pub fn is_presence(self) -> bool {
        matches!(self, EnvelopeKind::PresenceJoin | EnvelopeKind::PresenceLeave)
    }
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = EnvelopeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EnvelopeKind::from_code(code).ok_or(EnvelopeError::UnknownKind(code))
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeKind::Text => "text",
            EnvelopeKind::StructuredEvent => "event",
            EnvelopeKind::PresenceJoin => "join",
            EnvelopeKind::PresenceLeave => "leave",
        };
        f.write_str(name)
    }
}

/// Borrowed view used for encoding so the payload is never cloned.
#[derive(Serialize)]
struct WireEnvelopeRef<'a> {
    kind: u8,
    user_id: &'a str,
    payload: &'a [u8],
}

#[derive(Deserialize)]
struct WireEnvelope {
    kind: u8,
    user_id: String,
    payload: Vec<u8>,
}

/// The message unit exchanged between members of a room.
///
/// Immutable once built; re-tagging with [`Envelope::with_user_id`] yields a
/// new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: EnvelopeKind,
    user_id: String,
    payload: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, user_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            payload: payload.into(),
        }
    }

    /// A TEXT envelope. The user id is left empty; the server stamps it.
    pub fn text(body: &str) -> Self {
        Self::new(EnvelopeKind::Text, String::new(), body.as_bytes())
    }

    pub fn event(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(EnvelopeKind::StructuredEvent, String::new(), payload)
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn with_user_id(self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..self
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let wire = WireEnvelopeRef {
            kind: self.kind.code(),
            user_id: &self.user_id,
            payload: &self.payload,
        };
        Ok(bincode::serialize(&wire)?)
    }

    /// Decodes an envelope, rejecting unknown kinds and payloads over
    /// `max_payload_size` bytes.
    ///
    /// Input that could not fit under the limit is refused before the payload
    /// is read, and `size` is then the encoded length. Trailing bytes are
    /// malformed.
    pub fn decode(bytes: &[u8], max_payload_size: usize) -> Result<Self, EnvelopeError> {
        let limit = max_payload_size.saturating_add(ENVELOPE_OVERHEAD + MAX_USER_ID_LEN);
        let wire: WireEnvelope = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(limit as u64)
            .reject_trailing_bytes()
            .deserialize(bytes)
            .map_err(|e| {
                if matches!(*e, bincode::ErrorKind::SizeLimit) {
                    EnvelopeError::PayloadTooLarge {
                        size: bytes.len(),
                        max: max_payload_size,
                    }
                } else {
                    EnvelopeError::Malformed(e)
                }
            })?;
        let kind = EnvelopeKind::try_from(wire.kind)?;
        if wire.payload.len() > max_payload_size {
            return Err(EnvelopeError::PayloadTooLarge {
                size: wire.payload.len(),
                max: max_payload_size,
            });
        }
        Ok(Self {
            kind,
            user_id: wire.user_id,
            payload: wire.payload,
        })
    }
}

/// Transport frame. Control frames are told apart from data here, never by
/// envelope kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Data(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Length-prefixed bincode framing for [`Frame`] over any byte stream.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.inner.decode(src)? {
            Some(body) => Ok(Some(bincode::deserialize(&body)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = bincode::serialize(&frame)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

/// First data frame a TCP client sends: which room to enter and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub room_id: String,
    pub user_id: String,
    pub display_name: String,
}

impl Handshake {
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_test::{assert_err, assert_ok};
    use tokio_util::codec::FramedRead;

    #[test]
    fn test_kind_codes() {
        for kind in [
            EnvelopeKind::Text,
            EnvelopeKind::StructuredEvent,
            EnvelopeKind::PresenceJoin,
            EnvelopeKind::PresenceLeave,
        ] {
            assert_eq!(EnvelopeKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EnvelopeKind::from_code(4), None);
        assert!(EnvelopeKind::PresenceJoin.is_presence());
        assert!(!EnvelopeKind::Text.is_presence());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::new(EnvelopeKind::StructuredEvent, "user-7", b"{\"bpm\":120}".to_vec());
        let bytes = assert_ok!(envelope.encode());
        let decoded = assert_ok!(Envelope::decode(&bytes, DEFAULT_MAX_PAYLOAD_SIZE));

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.user_id(), "user-7");
        assert_eq!(decoded.payload_str(), Some("{\"bpm\":120}"));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let wire = WireEnvelopeRef {
            kind: 42,
            user_id: "u",
            payload: b"hi",
        };
        let bytes = bincode::serialize(&wire).unwrap();

        match Envelope::decode(&bytes, DEFAULT_MAX_PAYLOAD_SIZE) {
            Err(EnvelopeError::UnknownKind(42)) => {}
            other => panic!("expected unknown kind, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_payload_too_large() {
        let envelope = Envelope::new(EnvelopeKind::Text, "", vec![b'x'; 17]);
        let bytes = envelope.encode().unwrap();

        match Envelope::decode(&bytes, 16) {
            Err(EnvelopeError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, 17);
                assert_eq!(max, 16);
            }
            other => panic!("expected payload too large, got {:?}", other),
        }

        // Exactly at the limit is accepted
        assert_ok!(Envelope::decode(&bytes, 17));
    }

    #[test]
    fn test_decode_refuses_oversized_input_early() {
        let envelope = Envelope::new(EnvelopeKind::Text, "u", vec![0u8; 8 * 1024]);
        let bytes = envelope.encode().unwrap();

        match Envelope::decode(&bytes, 16) {
            Err(EnvelopeError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, bytes.len());
                assert_eq!(max, 16);
            }
            other => panic!("expected payload too large, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = Envelope::text("hi").encode().unwrap();
        bytes.push(0);

        match Envelope::decode(&bytes, DEFAULT_MAX_PAYLOAD_SIZE) {
            Err(EnvelopeError::Malformed(_)) => {}
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert_err!(Envelope::decode(&[1, 2], DEFAULT_MAX_PAYLOAD_SIZE));
    }

    #[test]
    fn test_with_user_id_restamps() {
        let envelope = Envelope::text("hi").with_user_id("bob");
        assert_eq!(envelope.kind(), EnvelopeKind::Text);
        assert_eq!(envelope.user_id(), "bob");
        assert_eq!(envelope.payload(), b"hi");
    }

    #[test]
    fn test_codec_partial_input() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Frame::Data(b"hello".to_vec()), &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let frame = codec.decode(&mut partial).unwrap();
        assert_eq!(frame, Some(Frame::Data(b"hello".to_vec())));
    }

    #[test]
    fn test_codec_rejects_oversized_frame() {
        let mut encoder = FrameCodec::new();
        let mut buf = BytesMut::new();
        encoder.encode(Frame::Data(vec![0; 128]), &mut buf).unwrap();

        let mut decoder = FrameCodec::with_max_length(64);
        assert_err!(decoder.decode(&mut buf));
    }

    #[tokio::test]
    async fn test_codec_reads_frames_from_stream() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Frame::Ping(vec![1]), &mut buf).unwrap();
        codec.encode(Frame::Data(b"abc".to_vec()), &mut buf).unwrap();
        codec.encode(Frame::Close, &mut buf).unwrap();

        let (first, rest) = buf.split_at(3);
        let mock = tokio_test::io::Builder::new().read(first).read(rest).build();
        let mut frames = FramedRead::new(mock, FrameCodec::new());

        assert_eq!(frames.next().await.unwrap().unwrap(), Frame::Ping(vec![1]));
        assert_eq!(frames.next().await.unwrap().unwrap(), Frame::Data(b"abc".to_vec()));
        assert_eq!(frames.next().await.unwrap().unwrap(), Frame::Close);
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn test_handshake_roundtrip() {
        let hello = Handshake::new("lobby", "u-1", "Ada");
        let bytes = hello.encode().unwrap();
        assert_eq!(Handshake::decode(&bytes).unwrap(), hello);
    }
}
