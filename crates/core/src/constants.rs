/// Size of a single requested block, per the wire protocol convention.
/// Most clients (including this one) refuse to serve or request anything
/// larger.
pub const BLOCK_LEN: u32 = 16384;

/// Maximum number of outstanding block requests we keep in flight to a
/// single peer at once.
pub const MAX_IN_FLIGHT: usize = 10;

/// Largest `length` we'll honor in an incoming `request` message. Real
/// requests are always `BLOCK_LEN`; this just bounds how much a
/// misbehaving peer can make us try to read and buffer in one go.
pub const MAX_REQUESTED_BLOCK_LEN: u32 = 2 * BLOCK_LEN;
