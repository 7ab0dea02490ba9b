//! TCP accept loop: handshake, room lookup, then hand-off to the room's hub
//!
//! Everything here happens before a connection becomes a hub member. The
//! first frame a client sends must be a [`Handshake`]; the room it names is
//! resolved through the [`RoomStore`] and its hub fetched (or created) from
//! the [`HubRegistry`].

use crate::connection::UserInfo;
use crate::error::ServerError;
use crate::registry::HubRegistry;
use crate::room::{Room, RoomStore};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{Frame, FrameCodec, Handshake};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Create unknown rooms on first join instead of refusing the caller
    pub auto_create: bool,
    /// Capacity given to rooms created on demand
    pub default_capacity: usize,
    pub handshake_timeout: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            auto_create: false,
            default_capacity: 0,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

pub struct Listener {
    listener: TcpListener,
    rooms: Arc<dyn RoomStore>,
    hubs: Arc<HubRegistry>,
    settings: ListenerSettings,
}

impl Listener {
    pub async fn bind(
        addr: &str,
        rooms: Arc<dyn RoomStore>,
        hubs: Arc<HubRegistry>,
        settings: ListenerSettings,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            rooms,
            hubs,
            settings,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the task is dropped.
    pub async fn run(self) {
        let accept = Arc::new(Acceptor {
            rooms: self.rooms,
            hubs: self.hubs,
            settings: self.settings,
        });

        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    let accept = Arc::clone(&accept);
                    tokio::spawn(async move {
                        if let Err(e) = accept.serve(socket, addr).await {
                            warn!("Connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

struct Acceptor {
    rooms: Arc<dyn RoomStore>,
    hubs: Arc<HubRegistry>,
    settings: ListenerSettings,
}

impl Acceptor {
    async fn serve(&self, socket: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
        socket.set_nodelay(true)?;
        let mut framed = Framed::new(socket, FrameCodec::new());

        let hello = match self.read_handshake(&mut framed).await {
            Ok(hello) => hello,
            Err(e) => {
                refuse(&mut framed).await;
                return Err(e);
            }
        };
        debug!(
            "Handshake from {}: {} wants room {}",
            addr, hello.display_name, hello.room_id
        );

        let room = match self.resolve_room(&hello) {
            Ok(room) => room,
            Err(e) => {
                refuse(&mut framed).await;
                return Err(e);
            }
        };

        let hub = room.hub(&self.hubs);
        let user = UserInfo::new(hello.user_id, hello.display_name);
        match hub.join(framed, user).await {
            Ok(connection) => {
                info!(
                    "{} joined room {} from {} as connection {}",
                    connection.user().display_name,
                    room.id,
                    addr,
                    connection.id()
                );
                connection.wait().await;
                debug!("Connection from {} finished", addr);
                Ok(())
            }
            Err(rejected) => {
                let reason = rejected.reason;
                let mut framed = rejected.into_transport();
                refuse(&mut framed).await;
                Err(reason.into())
            }
        }
    }

    async fn read_handshake(
        &self,
        framed: &mut Framed<TcpStream, FrameCodec>,
    ) -> Result<Handshake, ServerError> {
        let frame = timeout(self.settings.handshake_timeout, framed.next())
            .await
            .map_err(|_| ServerError::HandshakeTimeout)?;

        let bytes = match frame {
            Some(Ok(Frame::Data(bytes))) => bytes,
            Some(Ok(other)) => {
                return Err(ServerError::Handshake(format!(
                    "expected handshake, got {:?}",
                    other
                )))
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ServerError::Handshake("closed before handshake".to_string())),
        };

        let hello = Handshake::decode(&bytes).map_err(|e| ServerError::Handshake(e.to_string()))?;
        if hello.room_id.is_empty() {
            return Err(ServerError::Handshake("empty room id".to_string()));
        }
        if hello.user_id.is_empty() {
            return Err(ServerError::Handshake("empty user id".to_string()));
        }
        Ok(hello)
    }

    fn resolve_room(&self, hello: &Handshake) -> Result<Room, ServerError> {
        if let Some(room) = self.rooms.get(&hello.room_id) {
            return Ok(room);
        }
        if !self.settings.auto_create {
            return Err(ServerError::RoomNotFound(hello.room_id.clone()));
        }

        let room = Room::new(
            hello.room_id.clone(),
            hello.room_id.clone(),
            hello.user_id.clone(),
        )
        .with_capacity(self.settings.default_capacity);
        info!("Creating room {} for {}", room.id, room.owner);
        Ok(self.rooms.insert_if_absent(room))
    }
}

/// Best-effort close frame to a caller we are turning away.
async fn refuse(framed: &mut Framed<TcpStream, FrameCodec>) {
    let _ = timeout(Duration::from_secs(1), async {
        let _ = framed.send(Frame::Close).await;
        let _ = framed.close().await;
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::error::RejectReason;
    use crate::room::MemoryRoomStore;

    async fn start(rooms: Vec<Room>, settings: ListenerSettings) -> (SocketAddr, Arc<HubRegistry>) {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::with_rooms(rooms));
        let hubs = Arc::new(HubRegistry::new(HubConfig::default().with_presence(false)));
        let listener = Listener::bind("127.0.0.1:0", store, Arc::clone(&hubs), settings)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.run());
        (addr, hubs)
    }

    async fn connect(addr: SocketAddr, hello: &Handshake) -> Framed<TcpStream, FrameCodec> {
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(socket, FrameCodec::new());
        framed.send(Frame::Data(hello.encode().unwrap())).await.unwrap();
        framed
    }

    async fn next_frame(framed: &mut Framed<TcpStream, FrameCodec>) -> Option<Frame> {
        timeout(Duration::from_secs(2), framed.next())
            .await
            .expect("timed out")
            .map(|f| f.unwrap())
    }

    async fn wait_for_members(hubs: &HubRegistry, room: &str, expected: usize) {
        for _ in 0..200 {
            if hubs.get(room).map(|h| h.member_count()) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("room {} never reached {} members", room, expected);
    }

    #[tokio::test]
    async fn test_join_known_room() {
        let (addr, hubs) = start(vec![Room::new("jam", "Jam", "ada")], ListenerSettings::default()).await;

        let _client = connect(addr, &Handshake::new("jam", "u1", "Ada")).await;
        wait_for_members(&hubs, "jam", 1).await;

        let members = hubs.get("jam").unwrap().members().await;
        assert_eq!(members[0].user, UserInfo::new("u1", "Ada"));
    }

    #[tokio::test]
    async fn test_unknown_room_is_refused() {
        let (addr, hubs) = start(vec![], ListenerSettings::default()).await;

        let mut client = connect(addr, &Handshake::new("nowhere", "u1", "Ada")).await;
        assert_eq!(next_frame(&mut client).await, Some(Frame::Close));
        assert!(hubs.get("nowhere").is_none());
    }

    #[tokio::test]
    async fn test_auto_create_room() {
        let settings = ListenerSettings {
            auto_create: true,
            default_capacity: 1,
            ..ListenerSettings::default()
        };
        let (addr, hubs) = start(vec![], settings).await;

        let _first = connect(addr, &Handshake::new("fresh", "u1", "Ada")).await;
        wait_for_members(&hubs, "fresh", 1).await;
        assert_eq!(hubs.get("fresh").unwrap().config().capacity, 1);

        // Capacity 1: the second caller is turned away
        let mut second = connect(addr, &Handshake::new("fresh", "u2", "Bob")).await;
        assert_eq!(next_frame(&mut second).await, Some(Frame::Close));
        assert_eq!(hubs.get("fresh").unwrap().member_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_handshake_is_refused() {
        let (addr, _hubs) = start(vec![Room::new("jam", "Jam", "ada")], ListenerSettings::default()).await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(socket, FrameCodec::new());
        framed.send(Frame::Ping(Vec::new())).await.unwrap();
        assert_eq!(next_frame(&mut framed).await, Some(Frame::Close));

        let mut empty = connect(addr, &Handshake::new("jam", "", "Nobody")).await;
        assert_eq!(next_frame(&mut empty).await, Some(Frame::Close));
    }

    #[test]
    fn test_reject_reason_maps_to_server_error() {
        let err: ServerError = RejectReason::RoomFull.into();
        assert!(matches!(err, ServerError::Rejected(RejectReason::RoomFull)));
    }
}
