//! Ground truth for what we have, what we're downloading, and what's still
//! missing. Owns the output file, verifies completed pieces against their
//! SHA-1, and picks the next block to request.
//!
//! Grounded on `librqbit::chunk_tracker::ChunkTracker` for the piece/block
//! bitset state machine and `librqbit::storage::filesystem::fs` for the
//! positioned-I/O pattern — trimmed to a single output file, since
//! multi-file torrents are treated as one concatenated file.

use std::os::unix::fs::FileExt;
use std::path::Path;

use bitvec::prelude::*;
use parking_lot::Mutex;
use rbt_core::{Lengths, TorrentMeta, ValidPieceIndex, BLOCK_LEN};
use rbt_sha1::sha1_of;

use crate::bits::{bit_get, trailing_pad_is_zero};
use crate::error::StoreError;

trait PositionedIo {
    fn pread_exact(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
    fn pwrite_all(&self, offset: u64, buf: &[u8]) -> std::io::Result<()>;
}

impl PositionedIo for std::fs::File {
    fn pread_exact(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.read_exact_at(buf, offset)
    }

    fn pwrite_all(&self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        self.write_all_at(buf, offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceState {
    Missing,
    Pending,
    Have,
}

struct ManagedPiece {
    state: PieceState,
    len: u32,
    total_blocks: u32,
    expected_hash: [u8; 20],
    payload: Option<Vec<u8>>,
    received: BitVec<u8, Lsb0>,
    requested: BitVec<u8, Lsb0>,
    count_received: u32,
    peer_availability: u32,
}

impl ManagedPiece {
    fn new(lengths: &Lengths, index: ValidPieceIndex, expected_hash: [u8; 20]) -> Self {
        let total_blocks = lengths.blocks_per_piece(index);
        Self {
            state: PieceState::Missing,
            len: lengths.piece_length(index),
            total_blocks,
            expected_hash,
            payload: None,
            received: BitVec::repeat(false, total_blocks as usize),
            requested: BitVec::repeat(false, total_blocks as usize),
            count_received: 0,
            peer_availability: 0,
        }
    }
}

/// What happened as a result of `record_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The piece was already `Have`, or the piece index doesn't exist.
    Ignored,
    /// The block was buffered; the piece isn't complete yet.
    Buffered,
    Verified(VerifyOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Committed,
    /// SHA-1 mismatch; the piece was rolled back to `Missing`.
    Failed,
}

struct Inner {
    pieces: Vec<ManagedPiece>,
    bitfield: BitVec<u8, Msb0>,
    pieces_have: u32,
    bytes_downloaded: u64,
}

/// Owns the output file and all per-piece bookkeeping. Shared across peer
/// tasks behind an `Arc`; the file itself tolerates concurrent positioned
/// I/O without a lock, only the piece bitsets need one.
pub struct PieceStore {
    lengths: Option<Lengths>,
    total_length: u64,
    file: std::fs::File,
    inner: Mutex<Inner>,
}

impl PieceStore {
    /// Opens (creating if necessary) the output file at `path`, sized and
    /// sparsely pre-allocated for `torrent`, and builds the per-piece
    /// tracking state. A zero-length torrent is accepted and immediately
    /// reports `is_complete() == true` with no pieces to track.
    pub fn create(path: &Path, torrent: &TorrentMeta) -> Result<Self, StoreError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if torrent.total_length == 0 {
            return Ok(Self {
                lengths: None,
                total_length: 0,
                file,
                inner: Mutex::new(Inner {
                    pieces: Vec::new(),
                    bitfield: BitVec::new(),
                    pieces_have: 0,
                    bytes_downloaded: 0,
                }),
            });
        }

        file.set_len(torrent.total_length)?;
        file.pwrite_all(&[0u8], torrent.total_length - 1)?;

        let lengths = Lengths::new(torrent.total_length, torrent.piece_length)
            .map_err(|e| StoreError::BadLengths(e.to_string()))?;

        let pieces = lengths
            .iter_piece_infos()
            .map(|info| {
                let mut hash = [0u8; 20];
                if let Some(h) = torrent.piece_hash(info.piece_index.get()) {
                    hash.copy_from_slice(h);
                }
                ManagedPiece::new(&lengths, info.piece_index, hash)
            })
            .collect();

        Ok(Self {
            total_length: torrent.total_length,
            inner: Mutex::new(Inner {
                pieces,
                bitfield: BitVec::repeat(false, lengths.total_pieces() as usize),
                pieces_have: 0,
                bytes_downloaded: 0,
            }),
            lengths: Some(lengths),
            file,
        })
    }

    pub fn total_pieces(&self) -> u32 {
        self.lengths.as_ref().map(Lengths::total_pieces).unwrap_or(0)
    }

    pub fn bitfield_len_bytes(&self) -> usize {
        self.lengths.as_ref().map(Lengths::piece_bitfield_bytes).unwrap_or(0)
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn is_complete(&self) -> bool {
        let total = self.total_pieces();
        if total == 0 {
            return true;
        }
        self.inner.lock().pieces_have == total
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.inner.lock().bytes_downloaded
    }

    pub fn bytes_left(&self) -> u64 {
        self.total_length.saturating_sub(self.bytes_downloaded())
    }

    /// A snapshot of our bitfield, MSB-first, `⌈P/8⌉` bytes, trailing pad
    /// bits zero.
    pub fn our_bitfield_bytes(&self) -> Vec<u8> {
        self.inner.lock().bitfield.as_raw_slice().to_vec()
    }

    /// Whether `piece` has been verified and committed. Used by the
    /// upload path to decide whether an incoming `request` can be served.
    pub fn piece_have(&self, piece: u32) -> bool {
        let Some(lengths) = self.lengths.as_ref() else { return false };
        let Some(valid) = lengths.validate_piece_index(piece) else { return false };
        self.inner.lock().pieces[valid.get() as usize].state == PieceState::Have
    }

    pub fn peer_announced_piece(&self, piece: u32, present: bool) {
        let Some(lengths) = self.lengths.as_ref() else { return };
        let Some(valid) = lengths.validate_piece_index(piece) else { return };
        let mut inner = self.inner.lock();
        let mp = &mut inner.pieces[valid.get() as usize];
        mp.peer_availability = if present {
            mp.peer_availability.saturating_add(1)
        } else {
            mp.peer_availability.saturating_sub(1)
        };
    }

    /// True if `peer_bits` (raw MSB-first bitfield bytes) advertises any
    /// piece we don't have yet.
    pub fn has_any_needed(&self, peer_bits: &[u8]) -> bool {
        let total = self.total_pieces();
        let inner = self.inner.lock();
        (0..total).any(|i| {
            inner.pieces[i as usize].state != PieceState::Have && bit_get(peer_bits, i as usize)
        })
    }

    pub fn trailing_pad_is_zero(&self, bitfield_bytes: &[u8]) -> bool {
        trailing_pad_is_zero(bitfield_bytes, self.total_pieces() as usize)
    }

    /// Records bytes received for a `(piece, begin)` block. No-ops if the
    /// piece is out of range or already `Have`. Triggers verification once
    /// every block of the piece has arrived.
    pub fn record_block(
        &self,
        piece: u32,
        begin: u32,
        bytes: &[u8],
    ) -> Result<RecordOutcome, StoreError> {
        let Some(lengths) = self.lengths.as_ref() else {
            return Ok(RecordOutcome::Ignored);
        };
        let Some(valid) = lengths.validate_piece_index(piece) else {
            return Ok(RecordOutcome::Ignored);
        };

        let mut inner = self.inner.lock();
        if inner.pieces[valid.get() as usize].state == PieceState::Have {
            return Ok(RecordOutcome::Ignored);
        }

        if begin % BLOCK_LEN != 0 {
            return Err(StoreError::Misaligned);
        }
        let piece_len = lengths.piece_length(valid);
        let end = begin
            .checked_add(bytes.len() as u32)
            .ok_or(StoreError::OutOfBounds)?;
        if end > piece_len {
            return Err(StoreError::OutOfBounds);
        }

        let block_index = (begin / BLOCK_LEN) as usize;
        {
            let mp = &mut inner.pieces[valid.get() as usize];
            if mp.state == PieceState::Missing {
                mp.payload = Some(vec![0u8; piece_len as usize]);
                mp.state = PieceState::Pending;
            }
            let payload = mp.payload.as_mut().expect("payload allocated above");
            payload[begin as usize..begin as usize + bytes.len()].copy_from_slice(bytes);
            if !mp.received[block_index] {
                mp.received.set(block_index, true);
                mp.requested.set(block_index, true);
                mp.count_received += 1;
            }
        }

        let done = {
            let mp = &inner.pieces[valid.get() as usize];
            mp.count_received == mp.total_blocks
        };
        if !done {
            return Ok(RecordOutcome::Buffered);
        }
        Ok(RecordOutcome::Verified(self.verify_and_commit_locked(&mut inner, valid)?))
    }

    /// On a hash match, writes the piece to disk and commits it to `Have`.
    /// A write failure is `StoreError::Io` and is propagated to the
    /// caller rather than swallowed — per spec.md §4.3/§7 a failed write
    /// is `IOFatal`, not a piece-local failure, so the piece must not be
    /// marked `Have` (testable invariant #1: `Have` implies the bytes are
    /// actually on disk). The caller (`Swarm`) turns this into a fatal
    /// shutdown.
    fn verify_and_commit_locked(
        &self,
        inner: &mut Inner,
        index: ValidPieceIndex,
    ) -> Result<VerifyOutcome, StoreError> {
        let idx = index.get() as usize;
        let payload = inner.pieces[idx]
            .payload
            .take()
            .expect("verify is only called once a piece's payload is fully buffered");
        let digest = sha1_of(&payload);

        if digest == inner.pieces[idx].expected_hash {
            let offset = self.lengths.as_ref().unwrap().piece_offset(index);
            self.file.pwrite_all(&payload, offset)?;
            inner.bitfield.set(idx, true);
            inner.pieces_have += 1;
            inner.bytes_downloaded += payload.len() as u64;
            inner.pieces[idx].state = PieceState::Have;
            Ok(VerifyOutcome::Committed)
        } else {
            let mp = &mut inner.pieces[idx];
            mp.state = PieceState::Missing;
            mp.received.fill(false);
            mp.requested.fill(false);
            mp.count_received = 0;
            Ok(VerifyOutcome::Failed)
        }
    }

    /// Picks the next block to request from a peer advertising
    /// `peer_bits`. Pending pieces are preferred over missing ones
    /// (finish what's started); ties broken by rarest-first, then lowest
    /// index. In endgame mode, blocks already requested (but not yet
    /// received) remain selectable, and `requested` is not updated —
    /// callers are expected to bound how many times they call this per
    /// peer (see `Swarm`'s `MAX_IN_FLIGHT` cap).
    pub fn next_block_for(&self, peer_bits: &[u8], endgame: bool) -> Option<(u32, u32, u32)> {
        let lengths = self.lengths.as_ref()?;
        let total = lengths.total_pieces();
        let mut inner = self.inner.lock();

        for phase in [PieceState::Pending, PieceState::Missing] {
            let mut candidates: Vec<u32> = (0..total)
                .filter(|&i| {
                    inner.pieces[i as usize].state == phase && bit_get(peer_bits, i as usize)
                })
                .collect();
            candidates.sort_by_key(|&i| (inner.pieces[i as usize].peer_availability, i));

            for piece in candidates {
                let valid = lengths.validate_piece_index(piece)?;
                let total_blocks = inner.pieces[piece as usize].total_blocks;
                let bits = if endgame {
                    &inner.pieces[piece as usize].received
                } else {
                    &inner.pieces[piece as usize].requested
                };
                if let Some(block) = (0..total_blocks).find(|&b| !bits[b as usize]) {
                    if !endgame {
                        inner.pieces[piece as usize].requested.set(block as usize, true);
                    }
                    let begin = lengths.block_offset_in_piece(valid, block)?;
                    let size = lengths.block_size(valid, block)?;
                    return Some((piece, begin, size));
                }
            }
        }
        None
    }

    /// Clears the `requested` bit for one block, making it eligible for
    /// `next_block_for` again. Used when the peer it was requested from
    /// disconnects before delivering it — without this the block would
    /// stay marked requested forever outside of endgame.
    pub fn release_requested(&self, piece: u32, begin: u32) {
        let Some(lengths) = self.lengths.as_ref() else { return };
        let Some(valid) = lengths.validate_piece_index(piece) else { return };
        let mut inner = self.inner.lock();
        let mp = &mut inner.pieces[valid.get() as usize];
        if mp.state == PieceState::Have {
            return;
        }
        let block_index = (begin / BLOCK_LEN) as usize;
        if block_index < mp.total_blocks as usize && !mp.received[block_index] {
            mp.requested.set(block_index, false);
        }
    }

    /// Every block not yet received, across pending and missing pieces.
    /// Used only by the endgame fan-out, which needs the full set rather
    /// than one block at a time.
    pub fn missing_blocks(&self) -> Vec<(u32, u32, u32)> {
        let Some(lengths) = self.lengths.as_ref() else { return Vec::new() };
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (piece, mp) in inner.pieces.iter().enumerate() {
            if mp.state == PieceState::Have {
                continue;
            }
            let Some(valid) = lengths.validate_piece_index(piece as u32) else { continue };
            for block in 0..mp.total_blocks {
                if !mp.received[block as usize] {
                    let Some(begin) = lengths.block_offset_in_piece(valid, block) else { continue };
                    let Some(size) = lengths.block_size(valid, block) else { continue };
                    out.push((piece as u32, begin, size));
                }
            }
        }
        out
    }

    /// Reads `len` bytes at `piece·L + begin` for serving an incoming
    /// `request`.
    pub fn read_block(&self, piece: u32, begin: u32, len: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        let lengths = self
            .lengths
            .as_ref()
            .ok_or_else(|| StoreError::BadLengths("empty torrent has no pieces to read".into()))?;
        let Some(valid) = lengths.validate_piece_index(piece) else {
            return Err(StoreError::OutOfBounds);
        };
        let piece_len = lengths.piece_length(valid);
        if begin.checked_add(len).map(|e| e > piece_len).unwrap_or(true) {
            return Err(StoreError::OutOfBounds);
        }
        let offset = lengths.piece_offset(valid) + begin as u64;
        self.file.pread_exact(offset, &mut buf[..len as usize])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbt_core::Id20;

    fn meta_with(total_length: u64, piece_length: u32, piece_hashes: Vec<[u8; 20]>) -> TorrentMeta {
        let mut pieces = Vec::new();
        for h in &piece_hashes {
            pieces.extend_from_slice(h);
        }
        TorrentMeta {
            announce: None,
            announce_list: Vec::new(),
            name: Some("out.bin".into()),
            piece_length,
            pieces,
            total_length,
            info_hash: Id20::default(),
        }
    }

    fn hash_of(data: &[u8]) -> [u8; 20] {
        sha1_of(data)
    }

    #[test]
    fn single_small_piece_round_trips() {
        let data = b"HELLO WORLD PIECE A!"; // 21 bytes, but let's use 20 to match BLOCK boundary-irrelevant case
        let data = &data[..20];
        let meta = meta_with(20, 20, vec![hash_of(data)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let store = PieceStore::create(&path, &meta).unwrap();

        assert!(!store.is_complete());
        let outcome = store.record_block(0, 0, data).unwrap();
        assert_eq!(outcome, RecordOutcome::Verified(VerifyOutcome::Committed));
        assert!(store.is_complete());
        assert_eq!(store.bytes_downloaded(), 20);
        assert_eq!(store.bytes_left(), 0);
        assert_eq!(store.our_bitfield_bytes(), vec![0x80]);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn zero_length_torrent_is_immediately_complete() {
        let meta = meta_with(0, 16384, vec![]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        // total_length == 0 is rejected by Lengths upstream; PieceStore
        // special-cases it rather than constructing a Lengths at all.
        let store = PieceStore::create(&path, &meta).unwrap();
        assert!(store.is_complete());
        assert_eq!(store.bytes_left(), 0);
        assert_eq!(store.total_pieces(), 0);
    }

    #[test]
    fn ragged_last_piece_has_short_final_block() {
        // 40000 bytes, piece_length 16384 -> pieces of 16384, 16384, 7232.
        let p0 = vec![0xAAu8; 16384];
        let p1 = vec![0xBBu8; 16384];
        let p2 = vec![0xCCu8; 7232];
        let meta = meta_with(40000, 16384, vec![hash_of(&p0), hash_of(&p1), hash_of(&p2)]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();

        for (i, data) in [&p0, &p1, &p2].into_iter().enumerate() {
            for chunk_start in (0..data.len()).step_by(BLOCK_LEN as usize) {
                let end = (chunk_start + BLOCK_LEN as usize).min(data.len());
                store
                    .record_block(i as u32, chunk_start as u32, &data[chunk_start..end])
                    .unwrap();
            }
        }
        assert!(store.is_complete());
        assert_eq!(store.bytes_downloaded(), 40000);
    }

    #[test]
    fn verification_failure_rolls_back_to_missing_and_can_retry() {
        let good = vec![0x42u8; 16];
        let mut bad = good.clone();
        bad[0] ^= 0xff;
        let meta = meta_with(16, 16, vec![hash_of(&good)]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();

        let outcome = store.record_block(0, 0, &bad).unwrap();
        assert_eq!(outcome, RecordOutcome::Verified(VerifyOutcome::Failed));
        assert!(!store.is_complete());
        assert_eq!(store.bytes_downloaded(), 0);

        // Re-requestable: next_block_for should offer piece 0 again.
        let next = store.next_block_for(&[0x80], false);
        assert_eq!(next, Some((0, 0, 16)));

        let outcome = store.record_block(0, 0, &good).unwrap();
        assert_eq!(outcome, RecordOutcome::Verified(VerifyOutcome::Committed));
        assert!(store.is_complete());
    }

    #[test]
    fn rejects_misaligned_and_out_of_bounds_blocks() {
        let meta = meta_with(32768, 32768, vec![[0u8; 20]]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();

        assert!(matches!(
            store.record_block(0, 1, &[0u8; 4]),
            Err(StoreError::Misaligned)
        ));
        assert!(matches!(
            store.record_block(0, 16384, &vec![0u8; 32768]),
            Err(StoreError::OutOfBounds)
        ));
    }

    #[test]
    fn next_block_for_prefers_pending_over_missing() {
        let meta = meta_with(65536, 32768, vec![[0u8; 20]; 2]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();

        // Start piece 1 first (becomes Pending), leave piece 0 Missing.
        store.record_block(1, 0, &[0u8; 16384]).unwrap();
        let peer_bits = [0xC0u8]; // both pieces 0 and 1 advertised
        let (piece, begin, _) = store.next_block_for(&peer_bits, false).unwrap();
        assert_eq!((piece, begin), (1, 16384));
    }

    #[test]
    fn endgame_allows_rerequesting_an_already_requested_block() {
        let meta = meta_with(16384, 16384, vec![[0u8; 20]]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();

        let first = store.next_block_for(&[0x80], false);
        assert_eq!(first, Some((0, 0, 16384)));
        // Non-endgame: the block is now marked requested, so it won't be
        // offered again.
        assert_eq!(store.next_block_for(&[0x80], false), None);
        // Endgame: still offered, since it hasn't been *received* yet.
        assert_eq!(store.next_block_for(&[0x80], true), Some((0, 0, 16384)));
    }

    #[test]
    fn has_any_needed_reflects_missing_pieces_only() {
        let meta = meta_with(32768, 16384, vec![[0u8; 20]; 2]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();
        assert!(store.has_any_needed(&[0x80]));
        assert!(!store.has_any_needed(&[0x00]));
    }

    #[test]
    fn read_block_returns_verified_bytes() {
        let data = vec![0x7u8; 16384];
        let meta = meta_with(16384, 16384, vec![hash_of(&data)]);
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::create(&dir.path().join("out.bin"), &meta).unwrap();
        store.record_block(0, 0, &data).unwrap();

        let mut buf = vec![0u8; 100];
        store.read_block(0, 10, 100, &mut buf).unwrap();
        assert_eq!(buf, vec![0x7u8; 100]);
    }
}
