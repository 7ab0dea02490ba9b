//! Error types for admission and the accept path

use shared::FrameError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Why a hub refused a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("room is full")]
    RoomFull,
    #[error("room is closed")]
    HubClosed,
}

/// A refused join. Carries the transport back so the caller can close it.
pub struct JoinRejected<T> {
    pub reason: RejectReason,
    pub transport: T,
}

impl<T> JoinRejected<T> {
    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T> fmt::Debug for JoinRejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinRejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for JoinRejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "join rejected: {}", self.reason)
    }
}

impl<T> std::error::Error for JoinRejected<T> {}

/// Failures on the accept/handshake path, before a connection reaches a hub.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("invalid handshake: {0}")]
    Handshake(String),
    #[error("handshake not received in time")]
    HandshakeTimeout,
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error(transparent)]
    Rejected(#[from] RejectReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_messages() {
        assert_eq!(RejectReason::RoomFull.to_string(), "room is full");
        assert_eq!(RejectReason::HubClosed.to_string(), "room is closed");

        let rejected = JoinRejected {
            reason: RejectReason::RoomFull,
            transport: (),
        };
        assert_eq!(rejected.to_string(), "join rejected: room is full");
        assert!(format!("{:?}", rejected).contains("RoomFull"));
    }

    #[test]
    fn test_server_error_conversions() {
        let err: ServerError = RejectReason::HubClosed.into();
        assert_eq!(err.to_string(), "room is closed");

        let err: ServerError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, ServerError::Io(_)));

        let err = ServerError::RoomNotFound("lobby".to_string());
        assert_eq!(err.to_string(), "room lobby not found");
    }
}
