//! Per-connection protocol state machine.
//!
//! Each accepted socket gets one task running [`Connection::handle`], which
//! reads frames and drives the Handshake → Status / Login → Play phases.
//! The write half sits behind a mutex so packets hit the wire in submission
//! order; both halves grow a CFB8 cipher after the encryption handshake.

mod commands;
mod inventory;
mod login;
mod play;
mod status;

pub(crate) use login::SessionClient;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::{Bytes, BytesMut};
use craft_crypto::{Cfb8Decryptor, Cfb8Encryptor, CryptoError, ServerKeyPair};
use craft_proto::codec::{ProtoDecode, ProtoEncode};
use craft_proto::error::ProtoError;
use craft_proto::frame;
use craft_proto::packets::{HandshakePacket, Packet, Phase};
use craft_proto::slot::{Slot, EMPTY_SLOT};
use craft_proto::types::ChunkPos;
use craft_world::World;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::persistence::Storage;
use crate::player::manager::Manager;
use crate::player::Player;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Eof,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected packet 0x{id:02X} in {phase:?}")]
    UnexpectedPacket { phase: Phase, id: i32 },

    #[error("invalid data: {0}")]
    InvalidData(String),
}

struct SinkInner {
    half: Box<dyn AsyncWrite + Send + Unpin>,
    cipher: Option<Cfb8Encryptor>,
}

/// Cheaply clonable handle to a connection's write half. The mutex
/// serializes whole frames, which is the per-connection ordering guarantee.
#[derive(Clone)]
pub struct PacketSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl PacketSink {
    fn new(half: OwnedWriteHalf) -> Self {
        Self::from_writer(Box::new(half))
    }

    pub(crate) fn from_writer(half: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner { half, cipher: None })),
        }
    }

    /// Frame, encrypt, and write one packet.
    pub async fn send<P: Packet + ProtoEncode>(&self, packet: &P) -> std::io::Result<()> {
        let mut body = BytesMut::new();
        packet.proto_encode(&mut body);
        let mut framed = frame::encode_frame(P::ID, &body);

        let mut inner = self.inner.lock().await;
        if let Some(cipher) = &mut inner.cipher {
            cipher.encrypt(&mut framed);
        }
        inner.half.write_all(&framed).await
    }

    /// All writes after this call are encrypted.
    async fn enable_encryption(&self, cipher: Cfb8Encryptor) {
        self.inner.lock().await.cipher = Some(cipher);
    }
}

/// Read half with an incremental frame buffer and optional decryption.
pub struct FrameReader {
    half: OwnedReadHalf,
    cipher: Option<Cfb8Decryptor>,
    buf: BytesMut,
}

impl FrameReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            cipher: None,
            buf: BytesMut::new(),
        }
    }

    fn enable_encryption(&mut self, cipher: Cfb8Decryptor) {
        self.cipher = Some(cipher);
    }

    /// Read the next complete frame: (packet id, payload).
    pub async fn next_frame(&mut self) -> Result<(i32, Bytes), ConnError> {
        loop {
            if let Some(frame) = frame::decode_frame(&mut self.buf)? {
                return Ok(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = self.half.read(&mut chunk).await?;
            if n == 0 {
                return Err(ConnError::Eof);
            }
            if let Some(cipher) = &mut self.cipher {
                cipher.decrypt(&mut chunk[..n]);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Keep-alive watchdog state, shared with the watchdog task.
pub(crate) struct KeepAliveState {
    pub last_id: i32,
    pub last_sent: Instant,
    pub acked: bool,
}

pub struct Connection {
    pub(crate) reader: FrameReader,
    pub(crate) sink: PacketSink,
    pub(crate) phase: Phase,
    pub(crate) peer: SocketAddr,

    pub(crate) cfg: Arc<Config>,
    pub(crate) keys: Option<Arc<ServerKeyPair>>,
    pub(crate) world: Arc<World>,
    pub(crate) players: Arc<Manager>,
    pub(crate) storage: Arc<Storage>,
    pub(crate) session: Arc<SessionClient>,

    shutdown: watch::Receiver<bool>,
    pub(crate) cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,

    pub(crate) player: Option<Arc<Player>>,
    pub(crate) login_username: String,
    pub(crate) verify_token: Vec<u8>,
    pub(crate) loaded_chunks: HashSet<ChunkPos>,
    pub(crate) keep_alive: Arc<StdMutex<KeepAliveState>>,
    pub(crate) dead: bool,

    // Window-0 interaction state.
    pub(crate) cursor: Slot,
    pub(crate) crafting_grid: [Slot; 4],
    pub(crate) drag_active: bool,
    pub(crate) drag_mode: i8,
    pub(crate) drag_slots: Vec<i16>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        cfg: Arc<Config>,
        keys: Option<Arc<ServerKeyPair>>,
        world: Arc<World>,
        players: Arc<Manager>,
        storage: Arc<Storage>,
        session: Arc<SessionClient>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            reader: FrameReader::new(read_half),
            sink: PacketSink::new(write_half),
            phase: Phase::Handshake,
            peer,
            cfg,
            keys,
            world,
            players,
            storage,
            session,
            shutdown,
            cancel_tx,
            cancel_rx,
            player: None,
            login_username: String::new(),
            verify_token: Vec::new(),
            loaded_chunks: HashSet::new(),
            keep_alive: Arc::new(StdMutex::new(KeepAliveState {
                last_id: 0,
                last_sent: Instant::now(),
                acked: true,
            })),
            dead: false,
            cursor: EMPTY_SLOT,
            crafting_grid: [EMPTY_SLOT; 4],
            drag_active: false,
            drag_mode: 0,
            drag_slots: Vec::new(),
        }
    }

    /// Run the connection lifecycle until the socket closes, a protocol
    /// error occurs, or the server shuts down.
    pub async fn handle(mut self) {
        debug!(addr = %self.peer, "connection accepted");

        loop {
            let (packet_id, data) = tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = self.cancel_rx.changed() => break,
                frame = self.reader.next_frame() => match frame {
                    Ok(f) => f,
                    Err(ConnError::Eof) => break,
                    Err(e) => {
                        error!(addr = %self.peer, phase = ?self.phase, error = %e, "read failed");
                        break;
                    }
                },
            };

            if let Err(e) = self.handle_packet(packet_id, data).await {
                match e {
                    ConnError::Eof => {}
                    e => error!(addr = %self.peer, phase = ?self.phase, error = %e, "handling packet"),
                }
                break;
            }

            if *self.cancel_rx.borrow() {
                break;
            }
        }

        let _ = self.cancel_tx.send(true);

        if let Some(player) = self.player.take() {
            self.players.remove(&player).await;
            if let Err(e) = self.storage.save_player(&player) {
                warn!(player = %player.username, error = %e, "saving player on disconnect");
            }
            info!(player = %player.username, "player disconnected");
        }
        debug!(addr = %self.peer, "connection closed");
    }

    async fn handle_packet(&mut self, packet_id: i32, data: Bytes) -> Result<(), ConnError> {
        match self.phase {
            Phase::Handshake => self.handle_handshake(packet_id, data).await,
            Phase::Status => self.handle_status(packet_id, data).await,
            Phase::Login => self.handle_login(packet_id, data).await,
            Phase::Play => self.handle_play(packet_id, data).await,
        }
    }

    async fn handle_handshake(&mut self, packet_id: i32, mut data: Bytes) -> Result<(), ConnError> {
        if packet_id != 0x00 {
            return Err(ConnError::UnexpectedPacket {
                phase: self.phase,
                id: packet_id,
            });
        }
        let handshake = HandshakePacket::proto_decode(&mut data)?;
        debug!(
            addr = %self.peer,
            protocol = handshake.protocol_version.0,
            next_state = handshake.next_state.0,
            "handshake"
        );
        match handshake.next_state.0 {
            1 => self.phase = Phase::Status,
            2 => self.phase = Phase::Login,
            other => {
                return Err(ConnError::InvalidData(format!(
                    "bad handshake next state {other}"
                )))
            }
        }
        Ok(())
    }

    /// Switch both stream directions to CFB8 with the shared secret.
    pub(crate) async fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), ConnError> {
        self.reader
            .enable_encryption(Cfb8Decryptor::new(shared_secret)?);
        self.sink
            .enable_encryption(Cfb8Encryptor::new(shared_secret)?)
            .await;
        Ok(())
    }

    /// Request connection teardown (read loop and watchdog observe this).
    pub(crate) fn disconnect(&self, reason: &str) {
        info!(addr = %self.peer, reason, "disconnecting");
        let _ = self.cancel_tx.send(true);
    }

    pub(crate) fn cancel_pair(&self) -> (watch::Sender<bool>, watch::Receiver<bool>) {
        (self.cancel_tx.clone(), self.cancel_rx.clone())
    }
}
