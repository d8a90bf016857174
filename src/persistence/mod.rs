//! The `persistence` module stores everything the hub must keep across
//! restarts: channel inboxes, rumors, messages that could not be applied yet,
//! the server's own pending rumor, witness signatures and the server keys.
//!
//! The hub only talks to the `Repository` trait. `SledRepository` implements
//! it on top of `sled` trees, using multi-tree transactions wherever several
//! records must change together.

pub mod sled_store;

use crate::channel::ChannelKind;
use crate::message::{Message, ServerKeys};
use crate::transport::message::{IdsByChannel, MessagesByChannel, RumorParams, RumorState};
use crate::utils::HubResult;

pub use sled_store::SledRepository;

pub trait Repository: Send + Sync {
    fn has_message(&self, message_id: &str) -> HubResult<bool>;

    /// Append `msg` to the inbox of `channel` and drop it from the
    /// unprocessed set.
    fn store_message_and_data(&self, channel: &str, msg: &Message) -> HubResult<()>;

    fn get_all_messages_from_channel(&self, channel: &str) -> HubResult<Vec<Message>>;

    /// Look up stored messages, keeping the requested grouping. Unknown ids
    /// are left out.
    fn get_messages_by_id(&self, ids: &IdsByChannel) -> HubResult<MessagesByChannel>;

    fn has_channel(&self, path: &str) -> HubResult<bool>;

    fn store_channel(&self, path: &str, kind: ChannelKind) -> HubResult<()>;

    fn get_all_channels(&self) -> HubResult<Vec<(String, ChannelKind)>>;

    /// Create the organization channels and store the creation message on
    /// `/root` and the greeting on the organization channel, all at once.
    fn store_lao_with_greet(
        &self,
        channels: &[(String, ChannelKind)],
        lao_path: &str,
        create: &Message,
        greet: &Message,
    ) -> HubResult<()>;

    /// Returns `(is_next, already_exists)` for the rumor.
    fn check_rumor(&self, sender_id: &str, rumor_id: u64) -> HubResult<(bool, bool)>;

    /// Record an accepted rumor: the ids applied and the messages left to
    /// retry.
    fn store_rumor(
        &self,
        rumor_id: u64,
        sender_id: &str,
        unprocessed: &MessagesByChannel,
        processed: &[String],
    ) -> HubResult<()>;

    fn get_unprocessed_messages_by_channel(&self) -> HubResult<MessagesByChannel>;

    fn get_rumor_state(&self) -> HubResult<RumorState>;

    /// Rumors known here but not to the holder of `state`, sorted by sender
    /// then rumor id.
    fn get_rumors_missing_from(&self, state: &RumorState) -> HubResult<Vec<RumorParams>>;

    /// Queue a locally published message for this server's next rumor.
    /// Returns the number of messages now pending.
    fn add_message_to_my_rumor(&self, message_id: &str) -> HubResult<usize>;

    /// Take the pending messages as the next own rumor and advance the
    /// counter. `None` when nothing is pending.
    fn get_and_increment_my_rumor(&self, sender_id: &str) -> HubResult<Option<RumorParams>>;

    /// Ids of every stored message, grouped by channel.
    fn get_params_heartbeat(&self) -> HubResult<IdsByChannel>;

    /// The subset of `params` not stored here.
    fn get_missing_ids(&self, params: &IdsByChannel) -> HubResult<IdsByChannel>;

    fn add_witness_signature(
        &self,
        message_id: &str,
        witness: &str,
        signature: &str,
    ) -> HubResult<()>;

    fn get_or_create_server_keys(&self) -> HubResult<ServerKeys>;
}
