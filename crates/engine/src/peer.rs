//! One TCP peer connection, run as its own task: a reader half parsing
//! incoming frames and a writer half draining commands from the swarm,
//! raced against each other with `tokio::select!` inside a single
//! spawned task.
//!
//! Grounded on `librqbit::peer_connection::PeerConnection::manage_peer`
//! (reader/writer `async` blocks selected together over split stream
//! halves) and `manage_peer_incoming`/`manage_peer_outgoing` for the
//! eager-handshake connect/accept paths.

use std::net::SocketAddr;
use std::time::Duration;

use rbt_core::Id20;
use rbt_peer_protocol::{msg_id, FrameError, Handshake, HandshakeError, Message, Request, HANDSHAKE_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound on how long a handshake (either direction) may take.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Send a keep-alive if nothing has gone out for this long.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(110);
/// Drop a peer that sends nothing at all for this long.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub begin: u32,
    pub len: u32,
}

/// Commands the swarm sends down to a peer task.
#[derive(Debug)]
pub enum OutboundMessage {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(BlockRequest),
    Cancel(BlockRequest),
    Piece { piece: u32, begin: u32, block: Vec<u8> },
}

/// Events a peer task reports back up to the swarm, tagged with the
/// originating peer's address so a single mpsc channel can multiplex
/// every peer task.
#[derive(Debug)]
pub struct PeerEvent {
    pub addr: SocketAddr,
    pub kind: PeerEventKind,
}

#[derive(Debug)]
pub enum PeerEventKind {
    HandshakeDone { peer_id: Id20 },
    Bitfield(Vec<u8>),
    Have(u32),
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Block { piece: u32, begin: u32, data: Vec<u8> },
    Request(BlockRequest),
    Cancel(BlockRequest),
    /// The task is exiting; `Swarm` should drop this peer's table entry.
    Disconnected(String),
}

/// The swarm's handle onto a running peer task.
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub direction: Direction,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl PeerHandle {
    /// Queues an outbound message. Silently dropped if the peer task has
    /// already exited — `Swarm` learns this from the matching
    /// `Disconnected` event instead of from this call's return value.
    pub fn send(&self, msg: OutboundMessage) {
        let _ = self.tx.send(msg);
    }
}

/// Connects to `addr`, performs the outbound handshake, and spawns the
/// peer task. Returns immediately; failures surface as a `Disconnected`
/// event on `events_tx` rather than as an `Err` here, so callers can
/// treat every peer uniformly.
pub fn spawn_outbound(
    addr: SocketAddr,
    info_hash: Id20,
    our_peer_id: Id20,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
) -> PeerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        match connect_and_handshake(addr, info_hash, our_peer_id).await {
            Ok((stream, peer_id)) => run_peer(addr, stream, peer_id, events_tx, rx).await,
            Err(e) => {
                let _ = events_tx.send(PeerEvent {
                    addr,
                    kind: PeerEventKind::Disconnected(e),
                });
            }
        }
    });
    PeerHandle { addr, direction: Direction::Outbound, tx }
}

/// Takes an already-`accept`ed stream, performs the inbound handshake
/// (send ours first, then read and validate theirs), and spawns the
/// peer task.
pub fn spawn_inbound(
    mut stream: TcpStream,
    addr: SocketAddr,
    info_hash: Id20,
    our_peer_id: Id20,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
) -> PeerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let result = timeout(HANDSHAKE_TIMEOUT, async {
            let ours = Handshake::new(info_hash, our_peer_id);
            stream
                .write_all(&ours.serialize())
                .await
                .map_err(|e| format!("writing handshake: {e}"))?;
            let theirs = read_handshake(&mut stream).await?;
            if theirs.info_hash != info_hash {
                return Err("info hash mismatch on inbound handshake".to_string());
            }
            if theirs.peer_id == our_peer_id {
                return Err("connected to ourselves".to_string());
            }
            Ok(theirs.peer_id)
        })
        .await
        .map_err(|_| "handshake timed out".to_string())
        .and_then(|r| r);

        match result {
            Ok(peer_id) => run_peer(addr, stream, peer_id, events_tx, rx).await,
            Err(e) => {
                let _ = events_tx.send(PeerEvent {
                    addr,
                    kind: PeerEventKind::Disconnected(e),
                });
            }
        }
    });
    PeerHandle { addr, direction: Direction::Inbound, tx }
}

async fn connect_and_handshake(
    addr: SocketAddr,
    info_hash: Id20,
    our_peer_id: Id20,
) -> Result<(TcpStream, Id20), String> {
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        let ours = Handshake::new(info_hash, our_peer_id);
        stream
            .write_all(&ours.serialize())
            .await
            .map_err(|e| format!("writing handshake: {e}"))?;
        let theirs = read_handshake(&mut stream).await?;
        if theirs.info_hash != info_hash {
            return Err("info hash mismatch on outbound handshake".to_string());
        }
        if theirs.peer_id == our_peer_id {
            return Err("connected to ourselves".to_string());
        }
        Ok((stream, theirs.peer_id))
    })
    .await
    .map_err(|_| "handshake timed out".to_string())
    .and_then(|r| r)
}

async fn read_handshake(stream: &mut TcpStream) -> Result<Handshake, String> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| format!("reading handshake: {e}"))?;
    Handshake::deserialize(&buf)
        .map(|(h, _)| h)
        .map_err(|e| handshake_err_string(e))
}

fn handshake_err_string(e: HandshakeError) -> String {
    format!("bad handshake: {e}")
}

async fn run_peer(
    addr: SocketAddr,
    stream: TcpStream,
    peer_id: Id20,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    mut outgoing_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let _ = events_tx.send(PeerEvent {
        addr,
        kind: PeerEventKind::HandshakeDone { peer_id },
    });

    let (read_half, write_half) = stream.into_split();

    let reader = read_loop(addr, read_half, events_tx.clone());
    let writer = write_loop(write_half, &mut outgoing_rx);

    tokio::pin!(reader);
    tokio::pin!(writer);

    let reason = tokio::select! {
        r = &mut reader => match r {
            Ok(()) => "peer closed the connection".to_string(),
            Err(e) => e,
        },
        r = &mut writer => match r {
            Ok(()) => "outgoing channel closed".to_string(),
            Err(e) => e,
        },
    };

    let _ = events_tx.send(PeerEvent {
        addr,
        kind: PeerEventKind::Disconnected(reason),
    });
}

async fn read_loop(
    addr: SocketAddr,
    mut read_half: OwnedReadHalf,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
) -> Result<(), String> {
    let mut buf = Vec::with_capacity(64 * 1024);
    let mut scratch = [0u8; 16 * 1024];

    loop {
        let read = timeout(READ_IDLE_TIMEOUT, read_half.read(&mut scratch))
            .await
            .map_err(|_| "read idle timeout".to_string())?
            .map_err(|e| format!("read error: {e}"))?;
        if read == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&scratch[..read]);

        loop {
            match Message::deserialize(&buf) {
                Ok((msg, consumed)) => {
                    let kind = translate_message(&msg);
                    buf.drain(..consumed);
                    if let Some(kind) = kind {
                        if events_tx
                            .send(PeerEvent { addr, kind })
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                }
                Err(FrameError::Incomplete) => break,
                Err(e) => return Err(format!("frame error: {e}")),
            }
        }
    }
}

fn translate_message(msg: &Message<'_>) -> Option<PeerEventKind> {
    Some(match msg {
        Message::KeepAlive => return None,
        Message::Choke => PeerEventKind::Choke,
        Message::Unchoke => PeerEventKind::Unchoke,
        Message::Interested => PeerEventKind::Interested,
        Message::NotInterested => PeerEventKind::NotInterested,
        Message::Have(piece) => PeerEventKind::Have(*piece),
        Message::Bitfield(bits) => PeerEventKind::Bitfield(bits.to_vec()),
        Message::Request(r) => PeerEventKind::Request(BlockRequest {
            piece: r.index,
            begin: r.begin,
            len: r.length,
        }),
        Message::Piece { index, begin, block } => PeerEventKind::Block {
            piece: *index,
            begin: *begin,
            data: block.to_vec(),
        },
        Message::Cancel(r) => PeerEventKind::Cancel(BlockRequest {
            piece: r.index,
            begin: r.begin,
            len: r.length,
        }),
        Message::Port(_) => return None,
    })
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    outgoing_rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
) -> Result<(), String> {
    let mut buf = Vec::with_capacity(64 * 1024);
    loop {
        let msg = match timeout(KEEPALIVE_INTERVAL, outgoing_rx.recv()).await {
            Ok(Some(msg)) => Some(msg),
            Ok(None) => return Ok(()),
            Err(_) => None,
        };

        buf.clear();
        match msg {
            Some(OutboundMessage::Choke) => Message::Choke.serialize(&mut buf),
            Some(OutboundMessage::Unchoke) => Message::Unchoke.serialize(&mut buf),
            Some(OutboundMessage::Interested) => Message::Interested.serialize(&mut buf),
            Some(OutboundMessage::NotInterested) => Message::NotInterested.serialize(&mut buf),
            Some(OutboundMessage::Have(piece)) => Message::Have(piece).serialize(&mut buf),
            Some(OutboundMessage::Bitfield(bits)) => Message::Bitfield(&bits).serialize(&mut buf),
            Some(OutboundMessage::Request(r)) => Message::Request(Request {
                index: r.piece,
                begin: r.begin,
                length: r.len,
            })
            .serialize(&mut buf),
            Some(OutboundMessage::Cancel(r)) => Message::Cancel(Request {
                index: r.piece,
                begin: r.begin,
                length: r.len,
            })
            .serialize(&mut buf),
            Some(OutboundMessage::Piece { piece, begin, block }) => Message::Piece {
                index: piece,
                begin,
                block: &block,
            }
            .serialize(&mut buf),
            None => Message::KeepAlive.serialize(&mut buf),
        }

        write_half
            .write_all(&buf)
            .await
            .map_err(|e| format!("write error: {e}"))?;
    }
}

#[allow(dead_code)]
fn _assert_msg_ids_in_use() {
    let _ = msg_id::PORT;
}
