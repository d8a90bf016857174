//! # PopStellar
//!
//! `popstellar` is a federated publish/subscribe hub for proof-of-personhood
//! organizations. Clients publish signed messages on hierarchical channels;
//! servers replicate them to each other through ordered, gossiped rumors.
//!
//! ## Core Modules
//!
//! - `hub`: Routes every JSON-RPC frame through a bounded worker pool and runs the periodic gossip tasks.
//! - `channel`: Channels, their subscribers and the per-object message handlers.
//! - `rumor`: Per-sender ordering, buffering and propagation of rumors.
//! - `socket`: Live connections and round-robin peer selection.
//! - `query`: Outbound queries waiting for an answer.
//! - `message`: Signed messages, hashing and the server key pair.
//! - `persistence`: The `Repository` contract and its sled implementation.
//! - `config`: Loads settings from a file and the environment.
//! - `transport`: The WebSocket endpoints and the JSON-RPC envelopes.
//! - `utils`: Shared error taxonomy and logging setup.

pub mod channel;
pub mod config;
pub mod hub;
pub mod message;
pub mod persistence;
pub mod query;
pub mod rumor;
pub mod socket;
pub mod transport;
pub mod utils;
