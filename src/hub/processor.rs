use std::sync::Arc;

use crate::channel::{ChannelRegistry, HandlerTable, MessageHandler, ROOT};
use crate::message::Message;
use crate::message::data::{ACTION_CREATE, LAO_OBJECT};
use crate::persistence::Repository;
use crate::utils::{HubError, HubResult};

/// Entry point for every message entering a channel, whether published by a
/// client or replayed from a rumor.
///
/// Checks the message id and signature, picks the handler for its
/// `object#action` and hands it to the target channel. `/root` has no inbox
/// of its own: `lao#create` persists itself together with the new channels.
pub struct MessageProcessor {
    channels: Arc<ChannelRegistry>,
    handlers: HandlerTable,
    repo: Arc<dyn Repository>,
}

impl MessageProcessor {
    pub fn new(
        channels: Arc<ChannelRegistry>,
        handlers: HandlerTable,
        repo: Arc<dyn Repository>,
    ) -> Self {
        Self {
            channels,
            handlers,
            repo,
        }
    }
}

impl MessageHandler for MessageProcessor {
    fn handle(&self, channel: &str, msg: &Message, from_rumor: bool) -> HubResult<()> {
        msg.verify()?;
        let header = msg.header()?;
        let handler = self.handlers.get(&header.object, &header.action)?;

        if channel != ROOT {
            return self
                .channels
                .get(channel)?
                .publish(msg, handler.as_ref(), from_rumor);
        }

        if header.object != LAO_OBJECT || header.action != ACTION_CREATE {
            return Err(HubError::InvalidMessageField(format!(
                "only lao#create may be published on {ROOT}, got {}#{}",
                header.object, header.action
            )));
        }
        if self.repo.has_message(&msg.message_id)? {
            return Err(HubError::DuplicateResource(format!(
                "message {} was already received on {ROOT}",
                msg.message_id
            )));
        }
        handler.handle(channel, msg, from_rumor)
    }
}
