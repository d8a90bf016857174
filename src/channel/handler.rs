use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::ChannelRegistry;
use crate::message::Message;
use crate::message::data::{
    ACTION_CREATE, ACTION_GREET, ACTION_WITNESS, CHIRP_OBJECT, COIN_OBJECT, CONSENSUS_OBJECT,
    ELECTION_OBJECT, FEDERATION_OBJECT, LAO_OBJECT, MEETING_OBJECT, MESSAGE_OBJECT, POPCHA_OBJECT,
    REACTION_OBJECT, ROLL_CALL_OBJECT,
};
use crate::utils::{HubError, HubResult};

/// Validates (and applies the side effects of) one kind of message.
///
/// The same handler runs for client publishes and for messages replayed from
/// rumors; `from_rumor` tells them apart.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, channel: &str, msg: &Message, from_rumor: bool) -> HubResult<()>;
}

/// `(object, action)` pairs of the protocol stored without further checks
/// than the channel kind.
pub const PLAIN_ACTIONS: &[(&str, &[&str])] = &[
    (LAO_OBJECT, &["update_properties", "state", ACTION_GREET]),
    (ROLL_CALL_OBJECT, &["create", "open", "close", "reopen"]),
    (MEETING_OBJECT, &["create", "state"]),
    (
        ELECTION_OBJECT,
        &["setup", "key", "open", "cast_vote", "end", "result"],
    ),
    (CHIRP_OBJECT, &["add", "delete", "notify_add", "notify_delete"]),
    (REACTION_OBJECT, &["add", "delete"]),
    (
        CONSENSUS_OBJECT,
        &[
            "elect",
            "elect_accept",
            "prepare",
            "promise",
            "propose",
            "accept",
            "learn",
            "failure",
        ],
    ),
    (COIN_OBJECT, &["post_transaction"]),
    (POPCHA_OBJECT, &["authenticate"]),
    (
        FEDERATION_OBJECT,
        &[
            "challenge_request",
            "challenge",
            "expect",
            "init",
            "result",
            "tokens_exchange",
        ],
    ),
];

/// Lookup table from `(object, action)` to handler, filled at startup.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<(String, String), Arc<dyn MessageHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: &str, action: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .insert((object.to_string(), action.to_string()), handler);
    }

    pub fn get(&self, object: &str, action: &str) -> HubResult<Arc<dyn MessageHandler>> {
        self.handlers
            .get(&(object.to_string(), action.to_string()))
            .cloned()
            .ok_or_else(|| {
                HubError::InvalidMessageField(format!("unknown object#action {object}#{action}"))
            })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The protocol's handlers: organization creation, witness sign-offs and
    /// a channel-kind check for everything else.
    pub fn standard(
        registry: Arc<ChannelRegistry>,
        lao_create: Arc<dyn MessageHandler>,
        witness: Arc<dyn MessageHandler>,
    ) -> Self {
        let mut table = Self::new();
        table.register(LAO_OBJECT, ACTION_CREATE, lao_create);
        table.register(MESSAGE_OBJECT, ACTION_WITNESS, witness);

        let object: Arc<dyn MessageHandler> = Arc::new(ObjectHandler::new(registry));
        for (obj, actions) in PLAIN_ACTIONS {
            for action in *actions {
                table.register(obj, action, object.clone());
            }
        }
        table
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Accepts a message if the target channel's kind carries its object.
pub struct ObjectHandler {
    registry: Arc<ChannelRegistry>,
}

impl ObjectHandler {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }
}

impl MessageHandler for ObjectHandler {
    fn handle(&self, channel: &str, msg: &Message, _from_rumor: bool) -> HubResult<()> {
        let kind = self.registry.get(channel)?.kind();
        let header = msg.header()?;
        if !kind.accepts(&header.object) {
            return Err(HubError::InvalidMessageField(format!(
                "{}#{} cannot be published on {channel}",
                header.object, header.action
            )));
        }
        Ok(())
    }
}
