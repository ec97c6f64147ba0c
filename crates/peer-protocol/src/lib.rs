//! The BitTorrent peer wire protocol: handshake plus length-prefixed
//! messages. No extension-protocol support — fast-extensions, ut_metadata
//! and ut_pex are out of scope, so every frame is read out of one
//! contiguous per-peer buffer rather than juggling a double-buffer split.

use byteorder::{BigEndian, ByteOrder};
use rbt_buffers::ByteBuf;
use rbt_core::Id20;
use thiserror::Error;

pub const PSTR_BT1: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

pub const MSGID_LEN: usize = 1;
pub const INTEGER_LEN: usize = 4;
/// Refuse to allocate a read buffer larger than this for a single frame —
/// guards against a peer claiming an absurd length prefix.
pub const MAX_MSG_LEN: usize = 2 * 1024 * 1024;

pub mod msg_id {
    pub const CHOKE: u8 = 0;
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const NOT_INTERESTED: u8 = 3;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
    pub const CANCEL: u8 = 8;
    pub const PORT: u8 = 9;
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("not enough data buffered yet")]
    Incomplete,
    #[error("frame length {0} exceeds MAX_MSG_LEN")]
    TooLarge(usize),
    #[error("unsupported message id {0}")]
    UnsupportedMessageId(u8),
    #[error("message id {id} has incorrect length {len}")]
    IncorrectLen { id: u8, len: usize },
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("not enough data for handshake")]
    Incomplete,
    #[error("bad protocol string length {0}, expected 19")]
    BadPstrLen(u8),
    #[error("bad protocol string {0:?}")]
    BadPstr(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: u64,
    pub info_hash: Id20,
    pub peer_id: Id20,
}

impl Handshake {
    pub fn new(info_hash: Id20, peer_id: Id20) -> Self {
        Self {
            reserved: 0,
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        out[0] = 19;
        out[1..20].copy_from_slice(PSTR_BT1);
        out[20..28].copy_from_slice(&self.reserved.to_be_bytes());
        out[28..48].copy_from_slice(&self.info_hash.0);
        out[48..68].copy_from_slice(&self.peer_id.0);
        out
    }

    pub fn deserialize(buf: &[u8]) -> Result<(Self, usize), HandshakeError> {
        if buf.is_empty() {
            return Err(HandshakeError::Incomplete);
        }
        let pstrlen = buf[0];
        if pstrlen != 19 {
            return Err(HandshakeError::BadPstrLen(pstrlen));
        }
        if buf.len() < HANDSHAKE_LEN {
            return Err(HandshakeError::Incomplete);
        }
        if &buf[1..20] != PSTR_BT1.as_slice() {
            return Err(HandshakeError::BadPstr(buf[1..20].to_vec()));
        }
        let reserved = BigEndian::read_u64(&buf[20..28]);
        let info_hash = Id20::from_bytes(&buf[28..48]).map_err(|_| HandshakeError::Incomplete)?;
        let peer_id = Id20::from_bytes(&buf[48..68]).map_err(|_| HandshakeError::Incomplete)?;
        Ok((
            Handshake {
                reserved,
                info_hash,
                peer_id,
            },
            HANDSHAKE_LEN,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl Request {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.begin.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
    }

    fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() != 12 {
            return None;
        }
        Some(Request {
            index: BigEndian::read_u32(&buf[0..4]),
            begin: BigEndian::read_u32(&buf[4..8]),
            length: BigEndian::read_u32(&buf[8..12]),
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Message<'a> {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(&'a [u8]),
    Request(Request),
    Piece { index: u32, begin: u32, block: &'a [u8] },
    Cancel(Request),
    /// DHT port announcement. Parsed so a conforming peer's handshake
    /// extension bits don't desync framing; always ignored by the swarm
    /// (no DHT support).
    Port(u16),
}

/// Manual `Debug`: payload-bearing variants render their byte slices
/// through `ByteBuf`'s hex/string-aware formatting instead of dumping raw
/// arrays, which is unreadable for a 16KiB block.
impl<'a> std::fmt::Debug for Message<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "KeepAlive"),
            Message::Choke => write!(f, "Choke"),
            Message::Unchoke => write!(f, "Unchoke"),
            Message::Interested => write!(f, "Interested"),
            Message::NotInterested => write!(f, "NotInterested"),
            Message::Have(piece) => f.debug_tuple("Have").field(piece).finish(),
            Message::Bitfield(bits) => f.debug_tuple("Bitfield").field(&ByteBuf(bits)).finish(),
            Message::Request(r) => f.debug_tuple("Request").field(r).finish(),
            Message::Piece { index, begin, block } => f
                .debug_struct("Piece")
                .field("index", index)
                .field("begin", begin)
                .field("block", &ByteBuf(block))
                .finish(),
            Message::Cancel(r) => f.debug_tuple("Cancel").field(r).finish(),
            Message::Port(p) => f.debug_tuple("Port").field(p).finish(),
        }
    }
}

impl<'a> Message<'a> {
    /// Serializes this message, including the 4-byte length prefix, into
    /// `out`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let len_pos = out.len();
        out.extend_from_slice(&[0, 0, 0, 0]);
        let body_start = out.len();
        match self {
            Message::KeepAlive => {}
            Message::Choke => out.push(msg_id::CHOKE),
            Message::Unchoke => out.push(msg_id::UNCHOKE),
            Message::Interested => out.push(msg_id::INTERESTED),
            Message::NotInterested => out.push(msg_id::NOT_INTERESTED),
            Message::Have(piece) => {
                out.push(msg_id::HAVE);
                out.extend_from_slice(&piece.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                out.push(msg_id::BITFIELD);
                out.extend_from_slice(bits);
            }
            Message::Request(r) => {
                out.push(msg_id::REQUEST);
                r.serialize_into(out);
            }
            Message::Piece { index, begin, block } => {
                out.push(msg_id::PIECE);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&begin.to_be_bytes());
                out.extend_from_slice(block);
            }
            Message::Cancel(r) => {
                out.push(msg_id::CANCEL);
                r.serialize_into(out);
            }
            Message::Port(p) => {
                out.push(msg_id::PORT);
                out.extend_from_slice(&p.to_be_bytes());
            }
        }
        let body_len = (out.len() - body_start) as u32;
        BigEndian::write_u32(&mut out[len_pos..len_pos + 4], body_len);
    }

    /// Parses one complete frame from the front of `buf`. Returns the
    /// message and the number of bytes consumed. Returns
    /// `Err(FrameError::Incomplete)` if `buf` doesn't yet contain a full
    /// frame — callers must not advance their cursor in that case.
    pub fn deserialize(buf: &'a [u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < INTEGER_LEN {
            return Err(FrameError::Incomplete);
        }
        let len = BigEndian::read_u32(&buf[0..INTEGER_LEN]) as usize;
        if len > MAX_MSG_LEN {
            return Err(FrameError::TooLarge(len));
        }
        let total = INTEGER_LEN + len;
        if buf.len() < total {
            return Err(FrameError::Incomplete);
        }
        if len == 0 {
            return Ok((Message::KeepAlive, total));
        }
        let body = &buf[INTEGER_LEN..total];
        let id = body[0];
        let payload = &body[MSGID_LEN..];
        let msg = match id {
            msg_id::CHOKE => check_len(id, payload, 0, Message::Choke)?,
            msg_id::UNCHOKE => check_len(id, payload, 0, Message::Unchoke)?,
            msg_id::INTERESTED => check_len(id, payload, 0, Message::Interested)?,
            msg_id::NOT_INTERESTED => check_len(id, payload, 0, Message::NotInterested)?,
            msg_id::HAVE => {
                if payload.len() != 4 {
                    return Err(FrameError::IncorrectLen { id, len: payload.len() });
                }
                Message::Have(BigEndian::read_u32(payload))
            }
            msg_id::BITFIELD => Message::Bitfield(payload),
            msg_id::REQUEST => {
                let r = Request::deserialize(payload)
                    .ok_or(FrameError::IncorrectLen { id, len: payload.len() })?;
                Message::Request(r)
            }
            msg_id::PIECE => {
                if payload.len() < 8 {
                    return Err(FrameError::IncorrectLen { id, len: payload.len() });
                }
                Message::Piece {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    block: &payload[8..],
                }
            }
            msg_id::CANCEL => {
                let r = Request::deserialize(payload)
                    .ok_or(FrameError::IncorrectLen { id, len: payload.len() })?;
                Message::Cancel(r)
            }
            msg_id::PORT => {
                if payload.len() != 2 {
                    return Err(FrameError::IncorrectLen { id, len: payload.len() });
                }
                Message::Port(BigEndian::read_u16(payload))
            }
            other => return Err(FrameError::UnsupportedMessageId(other)),
        };
        Ok((msg, total))
    }
}

fn check_len<'a>(
    id: u8,
    payload: &[u8],
    expected: usize,
    msg: Message<'a>,
) -> Result<Message<'a>, FrameError> {
    if payload.len() != expected {
        return Err(FrameError::IncorrectLen { id, len: payload.len() });
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trip() {
        let info_hash = Id20::new([1u8; 20]);
        let peer_id = Id20::new([2u8; 20]);
        let hs = Handshake::new(info_hash, peer_id);
        let buf = hs.serialize();
        let (parsed, consumed) = Handshake::deserialize(&buf).unwrap();
        assert_eq!(consumed, HANDSHAKE_LEN);
        assert_eq!(parsed, hs);
    }

    #[test]
    fn handshake_rejects_bad_pstr() {
        let mut buf = Handshake::new(Id20::default(), Id20::default()).serialize();
        buf[1] = b'X';
        assert!(matches!(
            Handshake::deserialize(&buf),
            Err(HandshakeError::BadPstr(_))
        ));
    }

    #[test]
    fn keepalive_round_trip() {
        let mut buf = Vec::new();
        Message::KeepAlive.serialize(&mut buf);
        assert_eq!(buf, vec![0, 0, 0, 0]);
        let (msg, consumed) = Message::deserialize(&buf).unwrap();
        assert_eq!(msg, Message::KeepAlive);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn interested_round_trip() {
        let mut buf = Vec::new();
        Message::Interested.serialize(&mut buf);
        let (msg, consumed) = Message::deserialize(&buf).unwrap();
        assert_eq!(msg, Message::Interested);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn have_round_trip() {
        let mut buf = Vec::new();
        Message::Have(42).serialize(&mut buf);
        let (msg, _) = Message::deserialize(&buf).unwrap();
        assert_eq!(msg, Message::Have(42));
    }

    #[test]
    fn bitfield_round_trip() {
        let bits = [0xffu8, 0x00, 0x80];
        let mut buf = Vec::new();
        Message::Bitfield(&bits).serialize(&mut buf);
        let (msg, _) = Message::deserialize(&buf).unwrap();
        assert_eq!(msg, Message::Bitfield(&bits));
    }

    #[test]
    fn request_round_trip() {
        let r = Request { index: 1, begin: 16384, length: 16384 };
        let mut buf = Vec::new();
        Message::Request(r).serialize(&mut buf);
        let (msg, _) = Message::deserialize(&buf).unwrap();
        assert_eq!(msg, Message::Request(r));
    }

    #[test]
    fn piece_round_trip() {
        let block = vec![7u8; 16384];
        let mut buf = Vec::new();
        Message::Piece { index: 3, begin: 0, block: &block }.serialize(&mut buf);
        let (msg, consumed) = Message::deserialize(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        match msg {
            Message::Piece { index, begin, block: b } => {
                assert_eq!(index, 3);
                assert_eq!(begin, 0);
                assert_eq!(b, &block[..]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn port_round_trip() {
        let mut buf = Vec::new();
        Message::Port(6881).serialize(&mut buf);
        let (msg, _) = Message::deserialize(&buf).unwrap();
        assert_eq!(msg, Message::Port(6881));
    }

    #[test]
    fn incomplete_frame_does_not_error_hard() {
        let mut buf = Vec::new();
        Message::Have(1).serialize(&mut buf);
        let partial = &buf[..buf.len() - 1];
        assert!(matches!(Message::deserialize(partial), Err(FrameError::Incomplete)));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_MSG_LEN + 1) as u32).to_be_bytes());
        assert!(matches!(Message::deserialize(&buf), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn unsupported_message_id_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.push(99);
        assert!(matches!(
            Message::deserialize(&buf),
            Err(FrameError::UnsupportedMessageId(99))
        ));
    }
}
