use serde::{Deserialize, Serialize};

use crate::message::data::{
    CHIRP_OBJECT, COIN_OBJECT, CONSENSUS_OBJECT, ELECTION_OBJECT, FEDERATION_OBJECT, LAO_OBJECT,
    MEETING_OBJECT, MESSAGE_OBJECT, POPCHA_OBJECT, REACTION_OBJECT, ROLL_CALL_OBJECT,
};

pub const ROOT: &str = "/root";
pub const ROOT_PREFIX: &str = "/root/";

pub const SOCIAL_CHIRPS: &str = "/social/chirps";
pub const SOCIAL_REACTIONS: &str = "/social/reactions";
pub const CONSENSUS: &str = "/consensus";
pub const COIN: &str = "/coin";
pub const AUTHENTICATION: &str = "/authentication";
pub const FEDERATION: &str = "/federation";

/// Sub-channels provisioned together with every organization channel.
pub const LAO_SIBLINGS: [(&str, ChannelKind); 6] = [
    (SOCIAL_CHIRPS, ChannelKind::Chirp),
    (SOCIAL_REACTIONS, ChannelKind::Reaction),
    (CONSENSUS, ChannelKind::Consensus),
    (COIN, ChannelKind::Coin),
    (AUTHENTICATION, ChannelKind::Authentication),
    (FEDERATION, ChannelKind::Federation),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Root,
    Lao,
    Chirp,
    Reaction,
    Consensus,
    Coin,
    Authentication,
    Federation,
}

impl ChannelKind {
    /// Whether messages with this `object` may be published on the channel.
    /// `message` (witness sign-offs) is accepted wherever content lives.
    pub fn accepts(self, object: &str) -> bool {
        match self {
            Self::Root => object == LAO_OBJECT,
            Self::Lao => matches!(
                object,
                LAO_OBJECT | MESSAGE_OBJECT | ROLL_CALL_OBJECT | MEETING_OBJECT | ELECTION_OBJECT
            ),
            Self::Chirp => matches!(object, CHIRP_OBJECT | MESSAGE_OBJECT),
            Self::Reaction => matches!(object, REACTION_OBJECT | MESSAGE_OBJECT),
            Self::Consensus => matches!(object, CONSENSUS_OBJECT | MESSAGE_OBJECT),
            Self::Coin => matches!(object, COIN_OBJECT | MESSAGE_OBJECT),
            Self::Authentication => object == POPCHA_OBJECT,
            Self::Federation => object == FEDERATION_OBJECT,
        }
    }
}

/// Every channel created for the organization `lao_id`, organization
/// channel first.
pub fn lao_channels(lao_id: &str) -> Vec<(String, ChannelKind)> {
    let lao_path = format!("{ROOT_PREFIX}{lao_id}");
    let mut channels = Vec::with_capacity(LAO_SIBLINGS.len() + 1);
    channels.push((lao_path.clone(), ChannelKind::Lao));
    for (suffix, kind) in LAO_SIBLINGS {
        channels.push((format!("{lao_path}{suffix}"), kind));
    }
    channels
}
