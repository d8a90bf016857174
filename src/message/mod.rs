//! The `message` module defines the signed, content-addressed messages that
//! flow through channels and rumors, the payloads the hub interprets, and the
//! server's own signing identity.

pub mod data;
pub mod keys;
#[allow(clippy::module_inception)]
pub mod message;

pub use keys::ServerKeys;
pub use message::{Message, WitnessSignature, hash};

#[cfg(test)]
mod tests;
