//! Message definitions
//!
//! `Message` is the content-addressed unit published on channels and carried
//! inside rumors. Its identifier is derived from `data` and `signature`, so
//! the same content always yields the same `message_id` and storage can
//! deduplicate on it.
//!
//! Notes on fields:
//! - `data`: base64url encoding of a JSON object tagged with `object`/`action`
//! - `sender`: base64url Ed25519 public key of the author
//! - `signature`: base64url Ed25519 signature of the decoded `data` bytes
//! - `witness_signatures`: sign-offs added after creation

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::message::data::DataHeader;
use crate::utils::{HubError, HubResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessSignature {
    pub witness: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub data: String,
    pub sender: String,
    pub signature: String,
    #[serde(default)]
    pub witness_signatures: Vec<WitnessSignature>,
}

/// Hash a list of strings the way message and organization identifiers are
/// computed: SHA-256 over `len(s) || s` for each part, base64url encoded.
pub fn hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.len().to_string().as_bytes());
        hasher.update(part.as_bytes());
    }
    URL_SAFE.encode(hasher.finalize())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

pub fn decode_base64(field: &str, value: &str) -> HubResult<Vec<u8>> {
    URL_SAFE
        .decode(value)
        .map_err(|e| HubError::InvalidMessageField(format!("failed to decode {field}: {e}")))
}

/// Check an Ed25519 `signature` of `payload` by `public_key`, both base64url.
pub fn verify_signature(public_key: &str, payload: &[u8], signature: &str) -> HubResult<()> {
    let key = decode_base64("public key", public_key)?;
    let key: [u8; 32] = key.as_slice().try_into().map_err(|_| {
        HubError::InvalidMessageField(format!("public key has {} bytes", key.len()))
    })?;
    let key = VerifyingKey::from_bytes(&key)
        .map_err(|e| HubError::InvalidMessageField(format!("invalid public key: {e}")))?;

    let signature = decode_base64("signature", signature)?;
    let signature = Signature::from_slice(&signature)
        .map_err(|e| HubError::InvalidMessageField(format!("invalid signature: {e}")))?;

    key.verify(payload, &signature)
        .map_err(|_| HubError::InvalidMessageField("signature verification failed".into()))
}

impl Message {
    /// Build a message whose `data` is `data_bytes`, signed by `key`.
    pub fn new_signed(data_bytes: &[u8], key: &SigningKey) -> Self {
        let data = encode_base64(data_bytes);
        let signature = encode_base64(&key.sign(data_bytes).to_bytes());
        let sender = encode_base64(&key.verifying_key().to_bytes());
        let message_id = hash(&[&data, &signature]);

        Self {
            message_id,
            data,
            sender,
            signature,
            witness_signatures: Vec::new(),
        }
    }

    /// Serialize `data` as JSON and wrap it in a signed message.
    pub fn from_data<T: Serialize>(data: &T, key: &SigningKey) -> HubResult<Self> {
        let buf = serde_json::to_vec(data)
            .map_err(|e| HubError::Internal(format!("failed to marshal message data: {e}")))?;
        Ok(Self::new_signed(&buf, key))
    }

    pub fn expected_id(&self) -> String {
        hash(&[&self.data, &self.signature])
    }

    /// Check the content address and the sender's signature.
    pub fn verify(&self) -> HubResult<()> {
        let expected = self.expected_id();
        if expected != self.message_id {
            return Err(HubError::InvalidMessageField(format!(
                "message_id is wrong: expected {expected} but got {}",
                self.message_id
            )));
        }

        verify_signature(&self.sender, &self.decoded_data()?, &self.signature)
    }

    pub fn decoded_data(&self) -> HubResult<Vec<u8>> {
        decode_base64("data", &self.data)
    }

    /// Decode the `object`/`action` pair of the payload.
    pub fn header(&self) -> HubResult<DataHeader> {
        self.unmarshal_data()
    }

    pub fn unmarshal_data<T: DeserializeOwned>(&self) -> HubResult<T> {
        let buf = self.decoded_data()?;
        serde_json::from_slice(&buf)
            .map_err(|e| HubError::InvalidMessageField(format!("failed to unmarshal data: {e}")))
    }
}
