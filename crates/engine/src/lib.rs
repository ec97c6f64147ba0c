//! The three components spec.md calls "the core": the per-peer protocol
//! state machine (`peer`), the piece manager (`piece_store`), and the
//! swarm coordinator that multiplexes every peer connection and runs the
//! choking/endgame policy (`swarm`).

pub mod bits;
pub mod error;
pub mod peer;
pub mod piece_store;
pub mod swarm;

#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use piece_store::{PieceStore, RecordOutcome, VerifyOutcome};
pub use swarm::{Swarm, SwarmConfig};
