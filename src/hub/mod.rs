//! The `hub` module ties every component together.
//!
//! - `Hub`: the bounded inbound queue, the worker pool and the periodic
//!   rumor, rumor-state and heartbeat senders.
//! - `handlers`: one function per JSON-RPC method, plus answer routing.
//! - `MessageProcessor`: validation and dispatch of a message to its channel.

pub mod engine;
pub mod handlers;
pub mod processor;

pub use engine::{Hub, HubState, Inbound};
pub use processor::MessageProcessor;

#[cfg(test)]
mod tests;
