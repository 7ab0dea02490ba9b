//! Client side of a room connection: handshake, sending, receiving

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use shared::{Envelope, Frame, FrameCodec, Handshake, DEFAULT_MAX_PAYLOAD_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A joined room, seen from the client.
///
/// Heartbeat pings from the server are answered inside [`RoomClient::recv`],
/// so the caller only has to keep receiving to stay connected.
pub struct RoomClient<S = TcpStream> {
    framed: Framed<S, FrameCodec>,
    max_payload_size: usize,
}

impl RoomClient<TcpStream> {
    pub async fn connect(server_addr: &str, hello: &Handshake) -> ClientResult<Self> {
        let socket = TcpStream::connect(server_addr).await?;
        socket.set_nodelay(true)?;
        Self::handshake(socket, hello).await
    }
}

impl<S> RoomClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends the handshake over an already connected stream.
    pub async fn handshake(stream: S, hello: &Handshake) -> ClientResult<Self> {
        let mut framed = Framed::new(stream, FrameCodec::new());
        framed.send(Frame::Data(hello.encode()?)).await?;
        debug!("Sent handshake for room {}", hello.room_id);
        Ok(Self {
            framed,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        })
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub async fn send(&mut self, envelope: &Envelope) -> ClientResult<()> {
        self.framed.send(Frame::Data(envelope.encode()?)).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, body: &str) -> ClientResult<()> {
        self.send(&Envelope::text(body)).await
    }

    /// Next envelope from the room, or `None` once the server closes.
    ///
    /// Pings are answered and undecodable envelopes skipped.
    pub async fn recv(&mut self) -> ClientResult<Option<Envelope>> {
        while let Some(frame) = self.framed.next().await {
            match frame? {
                Frame::Data(bytes) => match Envelope::decode(&bytes, self.max_payload_size) {
                    Ok(envelope) => return Ok(Some(envelope)),
                    Err(e) => warn!("Skipping envelope: {}", e),
                },
                Frame::Ping(payload) => {
                    debug!("Ping from server");
                    self.framed.send(Frame::Pong(payload)).await?;
                }
                Frame::Pong(_) => {}
                Frame::Close => {
                    debug!("Server closed the connection");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Says goodbye and shuts the write side down.
    pub async fn leave(mut self) -> ClientResult<()> {
        self.framed.send(Frame::Close).await?;
        self.framed.close().await?;
        Ok(())
    }
}
