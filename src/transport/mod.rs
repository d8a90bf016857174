//! The `transport` module is responsible for network communication with
//! clients and peer servers over WebSockets.
//!
//! It defines the JSON-RPC envelopes exchanged on the wire and implements the
//! client and server endpoints, handing every received frame to the hub.

pub mod message;
pub mod websocket;
