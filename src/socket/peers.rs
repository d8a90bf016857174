use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::message::data::Peer;
use crate::transport::message::GreetServerParams;

/// Servers that greeted us, keyed by public key.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    greeted: RwLock<BTreeMap<String, GreetServerParams>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a greeting. Returns false if this server already greeted us.
    pub fn insert(&self, greeting: GreetServerParams) -> bool {
        let mut greeted = self.greeted.write();
        if greeted.contains_key(&greeting.public_key) {
            return false;
        }
        greeted.insert(greeting.public_key.clone(), greeting);
        true
    }

    pub fn contains(&self, public_key: &str) -> bool {
        self.greeted.read().contains_key(public_key)
    }

    /// Client-facing addresses, as advertised in organization greetings.
    pub fn client_addresses(&self) -> Vec<Peer> {
        self.greeted
            .read()
            .values()
            .map(|g| Peer {
                address: g.client_address.clone(),
            })
            .collect()
    }
}
