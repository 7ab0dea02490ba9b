//! Reader and writer pumps bridging one framed transport to its hub
//!
//! Each admitted connection runs two independently scheduled tasks:
//! - the reader turns inbound data frames into broadcasts and treats any
//!   frame, control frames included, as proof of life;
//! - the writer drains the member's outbound queue and probes the peer with
//!   a ping every heartbeat period.
//!
//! Either pump failing ends in a `Leave`. Removal from the hub stops the
//! reader at once and closes the writer's queue; the reader also stops as
//! soon as the writer is gone.

use crate::config::HubConfig;
use crate::hub::HubCommand;
use crate::room::RoomId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, warn};
use shared::{Envelope, Frame, FrameError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

/// A duplex frame transport, already upgraded and ready for room traffic.
pub trait Transport:
    Stream<Item = Result<Frame, FrameError>> + Sink<Frame, Error = FrameError> + Send + Unpin + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Frame, FrameError>>
        + Sink<Frame, Error = FrameError>
        + Send
        + Unpin
        + 'static
{
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique connection id, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Caller-supplied identity attached to a connection. Already authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub display_name: String,
}

impl UserInfo {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Handle to an admitted connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user: UserInfo,
    room_id: RoomId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Resolves once both pumps have exited.
    pub async fn wait(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

#[derive(Debug, Error)]
enum WriteFailure {
    #[error("write deadline of {0:?} exceeded")]
    Deadline(Duration),
    #[error(transparent)]
    Transport(#[from] FrameError),
}

/// Starts both pumps for an admitted member.
pub(crate) fn spawn<T: Transport>(
    id: ConnectionId,
    user: UserInfo,
    room_id: RoomId,
    transport: T,
    outbound: mpsc::Receiver<Arc<Envelope>>,
    removed: oneshot::Receiver<()>,
    hub: mpsc::Sender<HubCommand>,
    config: &HubConfig,
) -> Connection {
    let (sink, stream) = transport.split();
    let (writer_alive, writer_done) = oneshot::channel();

    let writer = tokio::spawn(write_pump(
        id,
        sink,
        outbound,
        hub.clone(),
        config.write_timeout,
        config.heartbeat_period(),
        writer_alive,
    ));

    let reader = tokio::spawn(read_pump(
        id,
        user.user_id.clone(),
        stream,
        hub,
        config.read_timeout,
        config.max_payload_size,
        removed,
        writer_done,
    ));

    Connection {
        id,
        user,
        room_id,
        reader,
        writer,
    }
}

async fn read_pump<T: Transport>(
    id: ConnectionId,
    user_id: String,
    mut stream: SplitStream<T>,
    hub: mpsc::Sender<HubCommand>,
    read_timeout: Duration,
    max_payload_size: usize,
    mut removed: oneshot::Receiver<()>,
    mut writer_done: oneshot::Receiver<()>,
) {
    loop {
        // A fresh deadline per read: any frame counts as liveness
        let next = tokio::select! {
            _ = &mut removed => {
                debug!("Connection {} removed from room, stopping reader", id);
                return;
            }
            _ = &mut writer_done => {
                debug!("Connection {} writer finished, stopping reader", id);
                break;
            }
            next = timeout(read_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                warn!(
                    "Connection {} silent for {:?}, treating peer as dead",
                    id, read_timeout
                );
                break;
            }
            Ok(None) => {
                debug!("Connection {} closed by peer", id);
                break;
            }
            Ok(Some(Err(e))) => {
                warn!("Connection {} read failed: {}", id, e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Close => {
                debug!("Connection {} sent close", id);
                break;
            }
            Frame::Ping(_) | Frame::Pong(_) => {
                debug!("Connection {} liveness frame", id);
            }
            Frame::Data(bytes) => match Envelope::decode(&bytes, max_payload_size) {
                Ok(envelope) if envelope.kind().is_presence() => {
                    warn!("Connection {} sent a {} notice, dropping it", id, envelope.kind());
                }
                Ok(envelope) => {
                    let envelope = envelope.with_user_id(user_id.as_str());
                    let broadcast = HubCommand::Broadcast {
                        origin: Some(id),
                        envelope,
                    };
                    if hub.send(broadcast).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Connection {} dropped frame: {}", id, e),
            },
        }
    }

    let _ = hub.send(HubCommand::Leave { id }).await;
}

async fn write_pump<T: Transport>(
    id: ConnectionId,
    mut sink: SplitSink<T, Frame>,
    mut outbound: mpsc::Receiver<Arc<Envelope>>,
    hub: mpsc::Sender<HubCommand>,
    write_timeout: Duration,
    heartbeat_period: Duration,
    _alive: oneshot::Sender<()>,
) {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(envelope) = next else {
                    debug!("Connection {} outbound queue closed, sending close", id);
                    let _ = write_frame(&mut sink, Frame::Close, write_timeout).await;
                    break;
                };
                let bytes = match envelope.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Connection {} failed to encode envelope: {}", id, e);
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut sink, Frame::Data(bytes), write_timeout).await {
                    warn!("Connection {} write failed: {}", id, e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                debug!("Connection {} ping", id);
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), write_timeout).await {
                    warn!("Connection {} heartbeat failed: {}", id, e);
                    break;
                }
            }
        }
    }

    let _ = timeout(write_timeout, sink.close()).await;
    let _ = hub.send(HubCommand::Leave { id }).await;
}

async fn write_frame<S>(sink: &mut S, frame: Frame, deadline: Duration) -> Result<(), WriteFailure>
where
    S: Sink<Frame, Error = FrameError> + Unpin,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WriteFailure::Deadline(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use shared::{EnvelopeKind, FrameCodec};
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type Peer = Framed<DuplexStream, FrameCodec>;

    fn pair() -> (Peer, Peer) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        (
            Framed::new(server, FrameCodec::new()),
            Framed::new(client, FrameCodec::new()),
        )
    }

    async fn next_frame(peer: &mut Peer) -> Frame {
        timeout(Duration::from_secs(5), peer.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("frame error")
    }

    fn data(envelope: &Envelope) -> Frame {
        Frame::Data(envelope.encode().unwrap())
    }

    fn config() -> HubConfig {
        HubConfig::default().with_presence(false)
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert_eq!(format!("{}", a), format!("#{}", a.as_u64()));
    }

    #[tokio::test]
    async fn test_reader_stamps_user_id() {
        let hub = Hub::new("room", config());
        let (a, mut a_peer) = pair();
        let (b, mut b_peer) = pair();
        hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();
        hub.join(b, UserInfo::new("bob", "Bob")).await.unwrap();

        // The wire claims to be someone else; the server knows better
        let forged = Envelope::new(EnvelopeKind::Text, "mallory", b"hi".to_vec());
        a_peer.send(data(&forged)).await.unwrap();

        match next_frame(&mut b_peer).await {
            Frame::Data(bytes) => {
                let envelope = Envelope::decode(&bytes, usize::MAX).unwrap();
                assert_eq!(envelope.user_id(), "alice");
                assert_eq!(envelope.payload(), b"hi");
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forged_presence_is_dropped() {
        let hub = Hub::new("room", config());
        let (a, mut a_peer) = pair();
        let (b, mut b_peer) = pair();
        hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();
        hub.join(b, UserInfo::new("bob", "Bob")).await.unwrap();

        let forged = Envelope::new(EnvelopeKind::PresenceLeave, "bob", b"Bob".to_vec());
        a_peer.send(data(&forged)).await.unwrap();
        a_peer.send(data(&Envelope::text("ok"))).await.unwrap();

        match next_frame(&mut b_peer).await {
            Frame::Data(bytes) => {
                let envelope = Envelope::decode(&bytes, usize::MAX).unwrap();
                assert_eq!(envelope.kind(), EnvelopeKind::Text);
                assert_eq!(envelope.payload_str(), Some("ok"));
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_frames_are_dropped_not_fatal() {
        let hub = Hub::new("room", config().with_max_payload_size(8));
        let (a, mut a_peer) = pair();
        let (b, mut b_peer) = pair();
        hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();
        hub.join(b, UserInfo::new("bob", "Bob")).await.unwrap();

        a_peer.send(Frame::Data(vec![0xff, 0x01])).await.unwrap();
        a_peer
            .send(data(&Envelope::text("far too long for the limit")))
            .await
            .unwrap();
        a_peer.send(data(&Envelope::text("ok"))).await.unwrap();

        match next_frame(&mut b_peer).await {
            Frame::Data(bytes) => {
                let envelope = Envelope::decode(&bytes, usize::MAX).unwrap();
                assert_eq!(envelope.payload_str(), Some("ok"));
            }
            other => panic!("expected data, got {:?}", other),
        }
        assert_eq!(hub.member_count(), 2);
    }

    #[tokio::test]
    async fn test_close_frame_leaves_room() {
        let hub = Hub::new("room", config());
        let (a, mut a_peer) = pair();
        let connection = hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();
        assert_eq!(connection.room_id(), "room");
        assert_eq!(connection.user().display_name, "Alice");

        a_peer.send(Frame::Close).await.unwrap();

        // Leave closes the queue, so the writer answers with its own close
        assert_eq!(next_frame(&mut a_peer).await, Frame::Close);
        timeout(Duration::from_secs(2), connection.wait())
            .await
            .expect("pumps did not stop");
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_drop_leaves_room() {
        let hub = Hub::new("room", config());
        let (a, a_peer) = pair();
        let connection = hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();

        drop(a_peer);

        timeout(Duration::from_secs(2), connection.wait())
            .await
            .expect("pumps did not stop");
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_pings_idle_peer() {
        let config = config().with_read_timeout(Duration::from_millis(1500));
        let hub = Hub::new("room", config);
        let (a, mut a_peer) = pair();
        hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();

        // Answering each probe keeps the connection alive past the deadline
        for _ in 0..2 {
            assert!(matches!(next_frame(&mut a_peer).await, Frame::Ping(_)));
            a_peer.send(Frame::Pong(Vec::new())).await.unwrap();
        }
        assert_eq!(hub.member_count(), 1);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let config = config().with_read_timeout(Duration::from_millis(100));
        let hub = Hub::new("room", config);
        let (a, _a_peer) = pair();
        let connection = hub.join(a, UserInfo::new("alice", "Alice")).await.unwrap();

        timeout(Duration::from_secs(2), connection.wait())
            .await
            .expect("read deadline never fired");
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test]
    async fn test_write_frame_deadline() {
        // Nobody reads the other end of an 8 byte pipe
        let (server, _client) = tokio::io::duplex(8);
        let mut framed = Framed::new(server, FrameCodec::new());

        let result = write_frame(
            &mut framed,
            Frame::Data(vec![0; 256]),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(WriteFailure::Deadline(_))));
    }
}
