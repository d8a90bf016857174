//! Rumor gossip.
//!
//! Every server numbers the batches of messages it originates (rumors) from
//! 0 upward. Peers accept them strictly in order per sender, buffer the ones
//! that arrive early, apply their messages with bounded retries, and pass
//! each accepted rumor on to the next peer of a round-robin cycle.

pub mod buffer;
pub mod engine;

pub use buffer::{BUFFER_TTL, BufferedRumor, RumorBuffer};
pub use engine::{MAX_RETRY, RumorEngine};
