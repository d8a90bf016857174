//! The `socket` module represents the connections the hub talks to.
//!
//! A `Socket` is the hub-side handle of one WebSocket connection: an id, the
//! kind of endpoint it was accepted on and the channel feeding its write task.
//! `SocketSet` keeps every live socket and drives round-robin rumor
//! propagation among the server sockets. `PeerDirectory` remembers the
//! servers that greeted us.

#[allow(clippy::module_inception)]
pub mod socket;
pub mod peers;
pub mod set;

pub use peers::PeerDirectory;
pub use set::SocketSet;
pub use socket::{Socket, SocketKind};
