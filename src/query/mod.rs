//! Bookkeeping of the queries this server sends to its peers.
//!
//! Every outbound query that expects an answer is recorded under its JSON-RPC
//! id so the answer can be routed back to the right handler.

pub mod tracker;

pub use tracker::{PendingQuery, QueryKind, QueryTracker};
