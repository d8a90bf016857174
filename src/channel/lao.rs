use std::sync::Arc;

use tracing::info;

use crate::channel::{ChannelRegistry, MessageHandler, ROOT, ROOT_PREFIX, lao_channels};
use crate::message::data::{ACTION_GREET, LAO_OBJECT, LaoCreate, LaoGreet};
use crate::message::{Message, ServerKeys};
use crate::persistence::Repository;
use crate::socket::PeerDirectory;
use crate::utils::{HubError, HubResult};

/// Handles `lao#create` on `/root`.
///
/// On success the organization channel, its sub-channels, the creation
/// message and a greeting signed by this server are persisted in one
/// transaction, then the channels are registered.
pub struct LaoCreateHandler {
    repo: Arc<dyn Repository>,
    registry: Arc<ChannelRegistry>,
    keys: ServerKeys,
    peers: Arc<PeerDirectory>,
    /// Only this key may create organizations, if set.
    owner: Option<String>,
    client_address: String,
}

impl LaoCreateHandler {
    pub fn new(
        repo: Arc<dyn Repository>,
        registry: Arc<ChannelRegistry>,
        keys: ServerKeys,
        peers: Arc<PeerDirectory>,
        owner: Option<String>,
        client_address: String,
    ) -> Self {
        Self {
            repo,
            registry,
            keys,
            peers,
            owner,
            client_address,
        }
    }

    fn greeting(&self, create: &LaoCreate) -> HubResult<Message> {
        self.keys.sign_data(&LaoGreet {
            object: LAO_OBJECT.to_string(),
            action: ACTION_GREET.to_string(),
            lao: create.id.clone(),
            frontend: create.organizer.clone(),
            address: self.client_address.clone(),
            peers: self.peers.client_addresses(),
        })
    }
}

impl MessageHandler for LaoCreateHandler {
    fn handle(&self, channel: &str, msg: &Message, from_rumor: bool) -> HubResult<()> {
        if channel != ROOT {
            return Err(HubError::InvalidMessageField(format!(
                "lao#create is only accepted on {ROOT}, not {channel}"
            )));
        }

        let create: LaoCreate = msg.unmarshal_data()?;
        let lao_path = format!("{ROOT_PREFIX}{}", create.id);

        if self.repo.has_channel(&lao_path)? {
            return Err(HubError::DuplicateResource(format!(
                "organization {lao_path} already exists"
            )));
        }
        if create.name.is_empty() {
            return Err(HubError::InvalidAction("organization name is empty".into()));
        }
        if create.id != create.expected_id() {
            return Err(HubError::InvalidAction(
                "organization id is not hash(organizer, creation, name)".into(),
            ));
        }
        if msg.sender != create.organizer {
            return Err(HubError::AccessDenied(
                "sender's public key does not match the organizer's".into(),
            ));
        }
        if !from_rumor {
            if let Some(owner) = &self.owner {
                if *owner != msg.sender {
                    return Err(HubError::AccessDenied(
                        "sender's public key does not match the owner's".into(),
                    ));
                }
            }
        }

        let greet = self.greeting(&create)?;
        let channels = lao_channels(&create.id);
        self.repo
            .store_lao_with_greet(&channels, &lao_path, msg, &greet)?;

        for (path, kind) in &channels {
            self.registry.add(path, *kind);
        }

        info!(lao = %lao_path, name = %create.name, from_rumor, "organization created");
        Ok(())
    }
}
