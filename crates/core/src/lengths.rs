use anyhow::Context;

use crate::constants::BLOCK_LEN;

pub fn last_element_size<T>(total_length: T, piece_length: T) -> T
where
    T: std::ops::Rem<Output = T> + Default + Eq + Copy,
{
    let rem = total_length % piece_length;
    if rem == T::default() {
        return piece_length;
    }
    rem
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceInfo {
    pub piece_index: ValidPieceIndex,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub piece_index: ValidPieceIndex,

    /// Index of the block within the piece.
    pub block_index: u32,

    /// Absolute block index if the first block of the first piece was 0.
    pub absolute_index: u32,
    pub size: u32,

    /// Offset of the block in bytes within the piece.
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Lengths {
    /// Total length of the torrent content, in bytes.
    total_length: u64,

    /// Length in bytes of each piece (except possibly the last one).
    piece_length: u32,

    /// Id and length of the last piece (which may be truncated).
    last_piece_id: u32,
    last_piece_length: u32,

    /// How many blocks are there per normal piece (except the last piece).
    blocks_per_piece: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidPieceIndex(u32);

impl std::fmt::Display for ValidPieceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for ValidPieceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl ValidPieceIndex {
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl Lengths {
    pub fn new(total_length: u64, piece_length: u32) -> anyhow::Result<Self> {
        if total_length == 0 {
            anyhow::bail!("torrent with 0 length is useless")
        }
        let total_pieces = total_length.div_ceil(piece_length as u64) as u32;
        Ok(Self {
            piece_length,
            total_length,
            blocks_per_piece: (piece_length as u64).div_ceil(BLOCK_LEN as u64) as u32,
            last_piece_id: total_pieces - 1,
            last_piece_length: last_element_size(total_length, piece_length as u64) as u32,
        })
    }

    /// How many bytes are required to store a bitfield with one bit per piece.
    pub const fn piece_bitfield_bytes(&self) -> usize {
        self.total_pieces().div_ceil(8) as usize
    }

    /// How many bytes are required to store a bitfield with one bit per block.
    pub const fn block_bitfield_bytes(&self) -> usize {
        self.total_blocks().div_ceil(8) as usize
    }

    pub const fn total_length(&self) -> u64 {
        self.total_length
    }

    pub const fn validate_piece_index(&self, index: u32) -> Option<ValidPieceIndex> {
        if index > self.last_piece_id {
            return None;
        }
        Some(ValidPieceIndex(index))
    }

    pub fn try_validate_piece_index(&self, index: u32) -> anyhow::Result<ValidPieceIndex> {
        self.validate_piece_index(index)
            .with_context(|| format!("invalid piece index {index}"))
    }

    pub const fn default_piece_length(&self) -> u32 {
        self.piece_length
    }

    pub const fn default_blocks_per_piece(&self) -> u32 {
        self.blocks_per_piece
    }

    pub const fn total_blocks(&self) -> u32 {
        self.last_piece_id * self.default_blocks_per_piece()
            + self.blocks_per_piece(self.last_piece_id())
    }

    pub const fn last_piece_id(&self) -> ValidPieceIndex {
        ValidPieceIndex(self.last_piece_id)
    }

    pub const fn total_pieces(&self) -> u32 {
        self.last_piece_id + 1
    }

    pub const fn piece_length(&self, index: ValidPieceIndex) -> u32 {
        if index.0 == self.last_piece_id {
            return self.last_piece_length;
        }
        self.piece_length
    }

    pub const fn block_absolute_offset(&self, block_info: &BlockInfo) -> u64 {
        self.piece_offset(block_info.piece_index) + block_info.offset as u64
    }

    pub const fn piece_offset(&self, index: ValidPieceIndex) -> u64 {
        index.0 as u64 * self.piece_length as u64
    }

    pub fn iter_piece_infos(&self) -> impl Iterator<Item = PieceInfo> {
        let last_id = self.last_piece_id;
        let last_len = self.last_piece_length;
        let pl = self.piece_length;
        (0..self.total_pieces()).map(move |idx| PieceInfo {
            piece_index: ValidPieceIndex(idx),
            len: if idx == last_id { last_len } else { pl },
        })
    }

    /// The range of piece ids that overlap a given byte range of the torrent.
    pub fn iter_pieces_within_offset(&self, offset_bytes: u64, len: u64) -> std::ops::Range<u32> {
        let offset_bytes = offset_bytes.min(self.total_length);
        let end_bytes = (offset_bytes + len).min(self.total_length);

        let start_piece_id = (offset_bytes / self.piece_length as u64) as u32;
        let end_piece_id = if end_bytes == offset_bytes {
            start_piece_id
        } else {
            end_bytes.div_ceil(self.piece_length as u64) as u32
        };
        start_piece_id..end_piece_id
    }

    pub fn iter_block_infos(&self, index: ValidPieceIndex) -> impl Iterator<Item = BlockInfo> {
        let mut remaining = self.piece_length(index);
        let absolute_offset = index.0 * self.blocks_per_piece;
        (0u32..).scan(0, move |offset, idx| {
            if remaining == 0 {
                return None;
            }
            let s = std::cmp::min(remaining, BLOCK_LEN);
            let result = BlockInfo {
                piece_index: index,
                block_index: idx,
                absolute_index: absolute_offset + idx,
                size: s,
                offset: *offset,
            };
            *offset += s;
            remaining -= s;
            Some(result)
        })
    }

    pub fn block_info_from_received_data(
        &self,
        piece_index: ValidPieceIndex,
        begin: u32,
        block_size: u32,
    ) -> Option<BlockInfo> {
        let index = begin / BLOCK_LEN;
        let expected_block_size = self.block_size(piece_index, index)?;
        let offset = self.block_offset_in_piece(piece_index, index)?;
        if offset != begin {
            return None;
        }
        if expected_block_size != block_size {
            return None;
        }
        let absolute_index = self.blocks_per_piece * piece_index.get() + index;
        Some(BlockInfo {
            piece_index,
            block_index: index,
            size: block_size,
            offset,
            absolute_index,
        })
    }

    pub const fn block_range(&self, index: ValidPieceIndex) -> std::ops::Range<usize> {
        let start = index.0 * self.blocks_per_piece;
        let end = start + self.blocks_per_piece(index);
        start as usize..end as usize
    }

    pub const fn blocks_per_piece(&self, index: ValidPieceIndex) -> u32 {
        if index.0 == self.last_piece_id {
            return self.last_piece_length.div_ceil(BLOCK_LEN);
        }
        self.blocks_per_piece
    }

    pub const fn block_offset_in_piece(
        &self,
        piece_index: ValidPieceIndex,
        block_index: u32,
    ) -> Option<u32> {
        if block_index >= self.blocks_per_piece(piece_index) {
            return None;
        }
        Some(block_index * BLOCK_LEN)
    }

    pub fn block_size(&self, piece_index: ValidPieceIndex, block_index: u32) -> Option<u32> {
        let piece_length = self.piece_length(piece_index);
        let last_block_id = piece_length.div_ceil(BLOCK_LEN) - 1;
        if block_index < last_block_id {
            return Some(BLOCK_LEN);
        }
        if block_index == last_block_id {
            return Some(last_element_size(piece_length, BLOCK_LEN));
        }
        None
    }

    /// How many bytes out of the given piece fall within the given file
    /// (identified by offset and length within the concatenated torrent
    /// content).
    pub fn size_of_piece_in_file(&self, piece_id: u32, file_offset: u64, file_len: u64) -> u64 {
        let piece_offset = piece_id as u64 * self.default_piece_length() as u64;
        let piece_end = piece_offset + self.default_piece_length() as u64;

        let file_end = file_offset + file_len;

        let offset = file_offset.max(piece_offset);
        let end = file_end.min(piece_end);

        end.saturating_sub(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lengths() -> Lengths {
        Lengths::new(1174243328, 262144).unwrap()
    }

    #[test]
    fn test_total_pieces() {
        let l = make_lengths();
        assert_eq!(l.total_pieces(), 4480);
    }

    #[test]
    fn test_total_pieces_2() {
        let l = Lengths::new(4148166656, 2097152).unwrap();
        assert_eq!(l.total_pieces(), 1978);
    }

    #[test]
    fn test_piece_length() {
        let l = make_lengths();
        let p = l.validate_piece_index(4479).unwrap();

        assert_eq!(l.piece_length(l.validate_piece_index(0).unwrap()), 262144);
        assert_eq!(l.piece_length(p), 100352);
    }

    #[test]
    fn test_blocks_in_piece() {
        let l = make_lengths();
        let p = l.validate_piece_index(4479).unwrap();

        assert_eq!(l.blocks_per_piece(l.validate_piece_index(0).unwrap()), 16);
        assert_eq!(l.blocks_per_piece(p), 7);
    }

    #[test]
    fn test_block_size() {
        let l = make_lengths();
        let p = l.validate_piece_index(4479).unwrap();

        assert_eq!(l.block_size(p, 0), Some(16384));
        assert_eq!(l.block_size(p, 6), Some(2048));
    }

    #[test]
    fn test_block_infos() {
        let l = make_lengths();
        let p = l.validate_piece_index(4479).unwrap();

        let mut it = l.iter_block_infos(p);
        let first = it.next().unwrap();
        let last = it.last().unwrap();

        assert_eq!(
            first,
            BlockInfo {
                piece_index: p,
                block_index: 0,
                absolute_index: 71664,
                size: 16384,
                offset: 0,
            }
        );

        assert_eq!(
            last,
            BlockInfo {
                piece_index: p,
                block_index: 6,
                absolute_index: 71670,
                size: 2048,
                offset: 98304,
            }
        );
    }

    #[test]
    fn test_iter_pieces_within() {
        macro_rules! check {
            ($l:expr, $offset:expr, $len:expr, $expected:expr) => {
                assert_eq!(
                    &$l.iter_pieces_within_offset($offset, $len)
                        .collect::<Vec<_>>()[..],
                    $expected
                );
            };
        }

        let l = Lengths::new(21, 10).unwrap();
        check!(&l, 0, 5, &[0]);
        check!(&l, 0, 10, &[0]);
        check!(&l, 0, 11, &[0, 1]);
        check!(&l, 0, 0, &[]);
        check!(&l, 10, 0, &[]);
        check!(&l, 10, 1, &[1]);
        check!(&l, 10, 10, &[1]);
        check!(&l, 10, 11, &[1, 2]);
        check!(&l, 20, 1, &[2]);
        check!(&l, 21, 0, &[]);
    }

    #[test]
    fn test_size_of_piece_in_file() {
        let l = Lengths::new(10, 5).unwrap();

        assert_eq!(l.size_of_piece_in_file(0, 0, 10), 5);
        assert_eq!(l.size_of_piece_in_file(0, 1, 10), 4);
        assert_eq!(l.size_of_piece_in_file(0, 5, 10), 0);
        assert_eq!(l.size_of_piece_in_file(1, 0, 10), 5);
        assert_eq!(l.size_of_piece_in_file(1, 9, 10), 1);
        assert_eq!(l.size_of_piece_in_file(2, 0, 10), 0);
    }

    #[test]
    fn test_lengths_extensive_sample() {
        // A spot check across divisible/non-divisible combinations; the
        // teacher's equivalent test exhaustively checks all 16 boolean
        // combinations of (total%piece==0, piece%block==0, >1 piece, >1
        // block per piece) — kept here as a representative subset.
        let l = Lengths::new(65536, 32768).unwrap();
        assert_eq!(l.total_pieces(), 2);
        assert_eq!(l.total_blocks(), 4);
        assert_eq!(l.blocks_per_piece(l.last_piece_id()), 2);
        assert_eq!(l.block_size(ValidPieceIndex(1), 0), Some(BLOCK_LEN));
        assert_eq!(l.block_size(ValidPieceIndex(1), 2), None);

        let l = Lengths::new(21000, 20000).unwrap();
        assert_eq!(l.total_pieces(), 2);
        assert_eq!(l.total_blocks(), 3);
        assert_eq!(l.block_size(ValidPieceIndex(0), 0), Some(BLOCK_LEN));
        assert_eq!(l.block_size(ValidPieceIndex(0), 1), Some(20000 - BLOCK_LEN));
        assert_eq!(l.block_size(ValidPieceIndex(1), 0), Some(1000));
    }
}
