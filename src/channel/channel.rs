use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::channel::{ChannelKind, MessageHandler};
use crate::message::Message;
use crate::persistence::Repository;
use crate::socket::Socket;
use crate::transport::message::{METHOD_BROADCAST, PublishParams, encode_query};
use crate::utils::{HubError, HubResult};

/// A single pub/sub channel.
///
/// The inbox lives in the repository; the channel itself only holds the
/// subscriber set. Storing a message and broadcasting it happen under the
/// subscriber lock, so nobody can subscribe between the two and miss it.
pub struct Channel {
    path: String,
    kind: ChannelKind,
    subscribers: Mutex<HashMap<String, Socket>>,
    repo: Arc<dyn Repository>,
}

impl Channel {
    pub fn new(path: &str, kind: ChannelKind, repo: Arc<dyn Repository>) -> Self {
        Self {
            path: path.to_string(),
            kind,
            subscribers: Mutex::new(HashMap::new()),
            repo,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn subscribe(&self, socket: Socket) {
        debug!(channel = %self.path, socket = %socket.id, "subscribed");
        self.subscribers.lock().insert(socket.id.clone(), socket);
    }

    pub fn unsubscribe(&self, socket_id: &str) -> HubResult<()> {
        if !self.remove_subscriber(socket_id) {
            return Err(HubError::InvalidAction(format!(
                "cannot unsubscribe from {}: not subscribed",
                self.path
            )));
        }
        debug!(channel = %self.path, socket = socket_id, "unsubscribed");
        Ok(())
    }

    pub(crate) fn remove_subscriber(&self, socket_id: &str) -> bool {
        self.subscribers.lock().remove(socket_id).is_some()
    }

    pub fn is_subscribed(&self, socket_id: &str) -> bool {
        self.subscribers.lock().contains_key(socket_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Validate `msg` with `handler`, then store it and push it to every
    /// subscriber.
    pub fn publish(
        &self,
        msg: &Message,
        handler: &dyn MessageHandler,
        from_rumor: bool,
    ) -> HubResult<()> {
        handler.handle(&self.path, msg, from_rumor)?;

        let subscribers = self.subscribers.lock();
        if self.repo.has_message(&msg.message_id)? {
            return Err(HubError::DuplicateResource(format!(
                "message {} was already received on {}",
                msg.message_id, self.path
            )));
        }
        self.repo.store_message_and_data(&self.path, msg)?;
        self.send_to(&subscribers, msg)
    }

    /// Stored messages, oldest first.
    pub fn catchup(&self) -> HubResult<Vec<Message>> {
        self.repo.get_all_messages_from_channel(&self.path)
    }

    /// Push `msg` to the current subscribers without storing it.
    pub fn broadcast(&self, msg: &Message) -> HubResult<()> {
        let subscribers = self.subscribers.lock();
        self.send_to(&subscribers, msg)
    }

    fn send_to(&self, subscribers: &HashMap<String, Socket>, msg: &Message) -> HubResult<()> {
        if subscribers.is_empty() {
            return Ok(());
        }

        let params = PublishParams {
            channel: self.path.clone(),
            message: msg.clone(),
        };
        let text = encode_query(METHOD_BROADCAST, &params, None)?;
        for socket in subscribers.values() {
            socket.send(text.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
