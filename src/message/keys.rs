//! Server identity.
//!
//! Each server owns an Ed25519 key pair. The public key is the server's
//! rumor `sender_id` and the sender of every message it synthesizes
//! (organization greetings). The pair is persisted by the repository so the
//! identity survives restarts.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::message::message::{Message, encode_base64};
use crate::utils::HubResult;

#[derive(Clone)]
pub struct ServerKeys {
    signing: SigningKey,
}

impl ServerKeys {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// base64url public key, used as this server's identifier.
    pub fn public_key(&self) -> String {
        encode_base64(&self.signing.verifying_key().to_bytes())
    }

    /// Wrap `data` in a message signed by this server.
    pub fn sign_data<T: Serialize>(&self, data: &T) -> HubResult<Message> {
        Message::from_data(data, &self.signing)
    }
}

impl std::fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeys")
            .field("public_key", &self.public_key())
            .finish()
    }
}
