//! Payloads carried in `Message::data`.
//!
//! Only the payloads the hub itself needs to understand are modelled here:
//! organization creation and greeting, and witness sign-offs. Every other
//! payload is opaque beyond its `object`/`action` header.

use serde::{Deserialize, Serialize};

use crate::message::message::hash;

pub const LAO_OBJECT: &str = "lao";
pub const MESSAGE_OBJECT: &str = "message";
pub const ROLL_CALL_OBJECT: &str = "roll_call";
pub const MEETING_OBJECT: &str = "meeting";
pub const ELECTION_OBJECT: &str = "election";
pub const CHIRP_OBJECT: &str = "chirp";
pub const REACTION_OBJECT: &str = "reaction";
pub const CONSENSUS_OBJECT: &str = "consensus";
pub const COIN_OBJECT: &str = "coin";
pub const POPCHA_OBJECT: &str = "popcha";
pub const FEDERATION_OBJECT: &str = "federation";

pub const ACTION_CREATE: &str = "create";
pub const ACTION_GREET: &str = "greet";
pub const ACTION_WITNESS: &str = "witness";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataHeader {
    pub object: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoCreate {
    pub object: String,
    pub action: String,
    pub id: String,
    pub name: String,
    pub creation: i64,
    pub organizer: String,
    #[serde(default)]
    pub witnesses: Vec<String>,
}

impl LaoCreate {
    pub fn new(organizer: &str, name: &str, creation: i64) -> Self {
        Self {
            object: LAO_OBJECT.to_string(),
            action: ACTION_CREATE.to_string(),
            id: hash(&[organizer, &creation.to_string(), name]),
            name: name.to_string(),
            creation,
            organizer: organizer.to_string(),
            witnesses: Vec::new(),
        }
    }

    /// The organization id is `hash(organizer, creation, name)`.
    pub fn expected_id(&self) -> String {
        hash(&[&self.organizer, &self.creation.to_string(), &self.name])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub address: String,
}

/// Greeting stored by the server on every organization channel it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoGreet {
    pub object: String,
    pub action: String,
    pub lao: String,
    pub frontend: String,
    pub address: String,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessMessage {
    pub object: String,
    pub action: String,
    pub message_id: String,
    pub signature: String,
}
