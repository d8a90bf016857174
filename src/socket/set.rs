use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::socket::Socket;

/// Round-robin states untouched for this long are dropped.
pub const ROUND_ROBIN_TTL: Duration = Duration::from_secs(60);

/// Progress of one rumor through the peer list.
///
/// The peers visited so far always form the contiguous arc of `count`
/// positions ending just before `index`.
#[derive(Debug)]
struct RoundRobin {
    index: usize,
    count: usize,
    banned: Option<String>,
    touched: Instant,
}

impl RoundRobin {
    /// First position of the visited arc.
    fn start(&self, total: usize) -> usize {
        (self.index % total + total - self.count % total) % total
    }

    /// The peer at `removed` left a list of `total` peers.
    fn peer_removed(&mut self, removed: usize, total: usize) {
        let next = self.index % total;
        let visited =
            self.count >= total || (removed + total - self.start(total)) % total < self.count;
        if visited {
            self.count -= 1;
        }
        self.index = if removed < next { next - 1 } else { next };
    }

    /// A peer was appended to a list of `total` peers.
    fn peer_appended(&mut self, total: usize) {
        if total == 0 || self.count == 0 {
            return;
        }
        if self.count >= total {
            // exhausted cycles stay exhausted
            self.count += 1;
            return;
        }
        let start = self.start(total);
        if start + self.count == total {
            // the arc ends on the old last peer: the new one is next
            self.index = total;
        } else if start + self.count > total {
            // the new peer lands inside the wrapped arc
            self.count += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    sockets: HashMap<String, Socket>,
    /// Server socket ids in connection order.
    peers: Vec<String>,
    states: HashMap<(String, u64), RoundRobin>,
}

/// Registry of live sockets.
#[derive(Debug)]
pub struct SocketSet {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl Default for SocketSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketSet {
    pub fn new() -> Self {
        Self::with_ttl(ROUND_ROBIN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
        }
    }

    /// Insert or replace a socket. Server sockets join the peer list.
    pub fn upsert(&self, socket: Socket) {
        let mut inner = self.inner.lock();
        if socket.is_server() && !inner.peers.contains(&socket.id) {
            let total = inner.peers.len();
            for state in inner.states.values_mut() {
                state.peer_appended(total);
            }
            inner.peers.push(socket.id.clone());
        }
        inner.sockets.insert(socket.id.clone(), socket);
    }

    /// Remove a socket. Pending round-robin cycles keep their place so the
    /// peers not yet visited still get the rumor.
    pub fn delete(&self, socket_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.peers.iter().position(|id| id == socket_id) {
            let total = inner.peers.len();
            for state in inner.states.values_mut() {
                state.peer_removed(removed, total);
            }
            inner.peers.remove(removed);
        }
        inner.sockets.remove(socket_id).is_some()
    }

    pub fn get(&self, socket_id: &str) -> Option<Socket> {
        self.inner.lock().sockets.get(socket_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Server sockets in connection order.
    pub fn peers(&self) -> Vec<Socket> {
        let inner = self.inner.lock();
        inner
            .peers
            .iter()
            .filter_map(|id| inner.sockets.get(id).cloned())
            .collect()
    }

    /// Send a frame to every server socket.
    pub fn send_to_all_peers(&self, text: &str) {
        let inner = self.inner.lock();
        for id in &inner.peers {
            if let Some(socket) = inner.sockets.get(id) {
                socket.send(text.to_string());
            }
        }
    }

    /// Send `payload` to the next peer in the round-robin cycle of
    /// `(sender_id, rumor_id)`, never to `origin`.
    ///
    /// Each call makes at most one send. Once every peer has been visited the
    /// state stays exhausted until it expires, so late answers cannot restart
    /// the cycle. Returns the id of the socket the payload was sent to.
    pub fn send_rumor(
        &self,
        origin: Option<&str>,
        sender_id: &str,
        rumor_id: u64,
        payload: &str,
    ) -> Option<String> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let ttl = self.ttl;
        inner
            .states
            .retain(|_, state| now.duration_since(state.touched) < ttl);

        let Inner {
            sockets,
            peers,
            states,
        } = &mut *inner;

        let total = peers.len();
        if total == 0 {
            debug!(sender = sender_id, rumor_id, "no peer to send rumor to");
            return None;
        }

        let state = states
            .entry((sender_id.to_string(), rumor_id))
            .or_insert_with(|| RoundRobin {
                index: 0,
                count: 0,
                banned: origin.map(str::to_string),
                touched: now,
            });
        state.touched = now;

        while state.count < total {
            let peer_id = &peers[state.index % total];
            state.index += 1;
            state.count += 1;

            if state.banned.as_deref() == Some(peer_id.as_str()) {
                continue;
            }

            let Some(socket) = sockets.get(peer_id) else {
                warn!(peer = %peer_id, "peer listed without a socket");
                continue;
            };

            if socket.send(payload.to_string()) {
                debug!(sender = sender_id, rumor_id, peer = %peer_id, "rumor sent");
                return Some(peer_id.clone());
            }
        }

        debug!(sender = sender_id, rumor_id, "rumor reached every peer");
        None
    }

    #[cfg(test)]
    pub(crate) fn round_robin_states(&self) -> usize {
        self.inner.lock().states.len()
    }
}
