//! The `channel` module implements the hierarchical pub/sub channels.
//!
//! - `Channel`: one topic with its subscribers and persisted inbox.
//! - `ChannelRegistry`: every hosted channel by path.
//! - `HandlerTable`: per `(object, action)` validation run before a message
//!   is accepted on a channel.

#[allow(clippy::module_inception)]
pub mod channel;
pub mod handler;
pub mod kind;
pub mod lao;
pub mod registry;
pub mod witness;

pub use channel::Channel;
pub use handler::{HandlerTable, MessageHandler, ObjectHandler};
pub use kind::{ChannelKind, LAO_SIBLINGS, ROOT, ROOT_PREFIX, lao_channels};
pub use lao::LaoCreateHandler;
pub use registry::ChannelRegistry;
pub use witness::WitnessHandler;

#[cfg(test)]
mod tests;
