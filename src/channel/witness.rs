use std::sync::Arc;

use crate::channel::MessageHandler;
use crate::message::data::WitnessMessage;
use crate::message::message::{decode_base64, verify_signature};
use crate::message::Message;
use crate::persistence::Repository;
use crate::utils::HubResult;

/// Handles `message#witness`: checks the witness's signature over the target
/// message id and files it with that message.
pub struct WitnessHandler {
    repo: Arc<dyn Repository>,
}

impl WitnessHandler {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

impl MessageHandler for WitnessHandler {
    fn handle(&self, _channel: &str, msg: &Message, _from_rumor: bool) -> HubResult<()> {
        let witness: WitnessMessage = msg.unmarshal_data()?;
        let target = decode_base64("message_id", &witness.message_id)?;
        verify_signature(&msg.sender, &target, &witness.signature)?;

        self.repo
            .add_witness_signature(&witness.message_id, &msg.sender, &witness.signature)
    }
}
