use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("begin offset is not a multiple of BLOCK_LEN")]
    Misaligned,
    #[error("block extends past the end of its piece")]
    OutOfBounds,
    #[error("torrent lengths are internally inconsistent: {0}")]
    BadLengths(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The two failure kinds that propagate out of a running `Swarm`: a bad
/// starting configuration, or an unrecoverable output-file error. Every
/// other failure kind in spec.md's taxonomy (`PeerFatal`, `PeerTransient`,
/// `TrackerUnavailable`, `VerifyFailure`) is contained at the point it
/// occurs and never reaches this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
