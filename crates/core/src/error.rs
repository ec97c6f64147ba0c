use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("torrent has zero length")]
    ZeroLength,
    #[error("invalid piece index {0}")]
    InvalidPieceIndex(u32),
    #[error("file path escapes the output directory: {0}")]
    PathTraversal(String),
    #[error("malformed bencode: {0}")]
    Bencode(#[from] rbt_bencode::DecodeError),
    #[error("malformed torrent metainfo: {0}")]
    Metainfo(String),
}

pub type Result<T> = std::result::Result<T, Error>;
