pub mod constants;
pub mod error;
pub mod hash_id;
pub mod lengths;
pub mod peer_id;
pub mod speed_estimator;
pub mod torrent_metainfo;

pub use constants::{BLOCK_LEN, MAX_IN_FLIGHT, MAX_REQUESTED_BLOCK_LEN};
pub use error::Error;
pub use hash_id::Id20;
pub use lengths::{BlockInfo, Lengths, PieceInfo, ValidPieceIndex};
pub use peer_id::generate_peer_id;
pub use speed_estimator::SpeedEstimator;
pub use torrent_metainfo::TorrentMeta;
