use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::channel::{Channel, ChannelKind, ROOT};
use crate::persistence::Repository;
use crate::utils::{HubError, HubResult};

/// Every channel this server hosts, by path.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    repo: Arc<dyn Repository>,
}

impl ChannelRegistry {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            repo,
        }
    }

    /// Create `/root` if needed and register every stored channel.
    pub fn load(&self) -> HubResult<usize> {
        if !self.repo.has_channel(ROOT)? {
            self.repo.store_channel(ROOT, ChannelKind::Root)?;
        }

        let stored = self.repo.get_all_channels()?;
        let count = stored.len();
        for (path, kind) in stored {
            self.add(&path, kind);
        }
        info!(channels = count, "channels loaded");
        Ok(count)
    }

    /// Register a channel already persisted. Existing entries are kept.
    pub fn add(&self, path: &str, kind: ChannelKind) -> Arc<Channel> {
        self.channels
            .write()
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Channel::new(path, kind, self.repo.clone())))
            .clone()
    }

    pub fn get(&self, path: &str) -> HubResult<Arc<Channel>> {
        self.channels
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| HubError::ChannelNotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.channels.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `socket_id` from every subscriber set. Returns how many channels
    /// it was subscribed to.
    pub fn unsubscribe_from_all(&self, socket_id: &str) -> usize {
        self.channels
            .read()
            .values()
            .filter(|c| c.remove_subscriber(socket_id))
            .count()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.len())
            .finish()
    }
}
