use std::collections::BTreeMap;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Tree};
use tracing::{debug, info};

use crate::channel::ChannelKind;
use crate::message::{Message, ServerKeys, WitnessSignature};
use crate::persistence::Repository;
use crate::transport::message::{IdsByChannel, MessagesByChannel, RumorParams, RumorState};
use crate::utils::{HubError, HubResult};

const SECRET_KEY: &[u8] = b"secret";
const NEXT_RUMOR_ID: &[u8] = b"next_rumor_id";

/// A message as kept in the `messages` tree.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredMessage {
    pub channel: String,
    pub message: Message,
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug)]
struct StoredChannel {
    kind: ChannelKind,
    timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug)]
struct StoredRumor {
    processed: Vec<String>,
    unprocessed: MessagesByChannel,
    timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug)]
struct PendingMessage {
    channel: String,
    message: Message,
}

#[derive(Clone)]
pub struct SledRepository {
    db: Db,
    /// message_id -> StoredMessage
    messages: Tree,
    /// channel \0 seq -> message_id, in insertion order per channel
    channel_index: Tree,
    /// path -> StoredChannel
    channels: Tree,
    /// sender \0 rumor_id -> StoredRumor
    rumors: Tree,
    /// sender -> last accepted rumor_id
    rumor_state: Tree,
    /// message_id -> PendingMessage
    unprocessed: Tree,
    /// message_id \0 witness -> signature
    witnesses: Tree,
    /// seq -> message_id, messages waiting for the next own rumor
    my_rumor: Tree,
    /// server secrets and counters
    meta: Tree,
}

fn encode<T: Serialize>(value: &T) -> HubResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| HubError::Internal(format!("failed to encode record: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> HubResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| HubError::Internal(format!("failed to decode record: {e}")))
}

fn decode_u64(bytes: &[u8]) -> HubResult<u64> {
    let buf: [u8; 8] = bytes
        .try_into()
        .map_err(|_| HubError::Internal(format!("counter has {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(buf))
}

fn decode_string(bytes: &[u8]) -> HubResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| HubError::Internal(format!("stored key is not utf-8: {e}")))
}

/// `name \0 n` with `n` big-endian so keys sort numerically.
fn sequence_key(name: &str, n: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 9);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key.extend_from_slice(&n.to_be_bytes());
    key
}

fn prefix(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key
}

fn abort<T>(err: HubError) -> Result<T, ConflictableTransactionError<HubError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn tx_error(err: TransactionError<HubError>) -> HubError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

impl SledRepository {
    pub fn open(path: &str) -> HubResult<Self> {
        let db = sled::open(path)?;
        let repo = Self {
            messages: db.open_tree("messages")?,
            channel_index: db.open_tree("channel_index")?,
            channels: db.open_tree("channels")?,
            rumors: db.open_tree("rumors")?,
            rumor_state: db.open_tree("rumor_state")?,
            unprocessed: db.open_tree("unprocessed")?,
            witnesses: db.open_tree("witnesses")?,
            my_rumor: db.open_tree("my_rumor")?,
            meta: db.open_tree("meta")?,
            db,
        };
        info!(path, channels = repo.channels.len(), "repository opened");
        Ok(repo)
    }

    fn load_message(&self, message_id: &[u8]) -> HubResult<Option<StoredMessage>> {
        match self.messages.get(message_id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Copy of `msg` with the side-collected witness signatures appended.
    fn with_witnesses(&self, mut msg: Message) -> HubResult<Message> {
        for entry in self.witnesses.scan_prefix(prefix(&msg.message_id)) {
            let (key, signature) = entry?;
            let witness = decode_string(&key[msg.message_id.len() + 1..])?;
            if msg.witness_signatures.iter().any(|w| w.witness == witness) {
                continue;
            }
            msg.witness_signatures.push(WitnessSignature {
                witness,
                signature: decode_string(&signature)?,
            });
        }
        Ok(msg)
    }

    fn rumor_params(&self, sender_id: &str, rumor_id: u64) -> HubResult<Option<RumorParams>> {
        let Some(bytes) = self.rumors.get(sequence_key(sender_id, rumor_id))? else {
            return Ok(None);
        };
        let stored: StoredRumor = decode(&bytes)?;

        let mut messages = stored.unprocessed;
        for id in &stored.processed {
            if let Some(record) = self.load_message(id.as_bytes())? {
                messages.entry(record.channel).or_default().push(record.message);
            }
        }

        Ok(Some(RumorParams {
            sender_id: sender_id.to_string(),
            rumor_id,
            messages,
        }))
    }
}

impl Repository for SledRepository {
    fn has_message(&self, message_id: &str) -> HubResult<bool> {
        Ok(self.messages.contains_key(message_id)?)
    }

    fn store_message_and_data(&self, channel: &str, msg: &Message) -> HubResult<()> {
        let record = encode(&StoredMessage {
            channel: channel.to_string(),
            message: msg.clone(),
            timestamp: Utc::now().timestamp(),
        })?;
        let index_key = sequence_key(channel, self.db.generate_id()?);
        let id = msg.message_id.as_bytes();

        (&self.messages, &self.channel_index, &self.unprocessed)
            .transaction(|(messages, index, unprocessed)| {
                if messages.get(id)?.is_some() {
                    return abort(HubError::DuplicateResource(format!(
                        "message {} already exists",
                        msg.message_id
                    )));
                }
                messages.insert(id, record.as_slice())?;
                index.insert(index_key.as_slice(), id)?;
                unprocessed.remove(id)?;
                Ok(())
            })
            .map_err(tx_error)?;

        debug!(channel, message_id = %msg.message_id, "message stored");
        Ok(())
    }

    fn get_all_messages_from_channel(&self, channel: &str) -> HubResult<Vec<Message>> {
        let mut result = Vec::new();
        for entry in self.channel_index.scan_prefix(prefix(channel)) {
            let (_, id) = entry?;
            if let Some(record) = self.load_message(&id)? {
                result.push(self.with_witnesses(record.message)?);
            }
        }
        Ok(result)
    }

    fn get_messages_by_id(&self, ids: &IdsByChannel) -> HubResult<MessagesByChannel> {
        let mut result = MessagesByChannel::new();
        for (channel, ids) in ids {
            for id in ids {
                if let Some(record) = self.load_message(id.as_bytes())? {
                    result
                        .entry(channel.clone())
                        .or_default()
                        .push(self.with_witnesses(record.message)?);
                }
            }
        }
        Ok(result)
    }

    fn has_channel(&self, path: &str) -> HubResult<bool> {
        Ok(self.channels.contains_key(path)?)
    }

    fn store_channel(&self, path: &str, kind: ChannelKind) -> HubResult<()> {
        let record = encode(&StoredChannel {
            kind,
            timestamp: Utc::now().timestamp(),
        })?;
        self.channels.insert(path, record)?;
        Ok(())
    }

    fn get_all_channels(&self) -> HubResult<Vec<(String, ChannelKind)>> {
        let mut result = Vec::new();
        for entry in self.channels.iter() {
            let (path, record) = entry?;
            let record: StoredChannel = decode(&record)?;
            result.push((decode_string(&path)?, record.kind));
        }
        Ok(result)
    }

    fn store_lao_with_greet(
        &self,
        channels: &[(String, ChannelKind)],
        lao_path: &str,
        create: &Message,
        greet: &Message,
    ) -> HubResult<()> {
        let now = Utc::now().timestamp();
        let channel_records = channels
            .iter()
            .map(|(path, kind)| -> HubResult<_> {
                let record = encode(&StoredChannel {
                    kind: *kind,
                    timestamp: now,
                })?;
                Ok((path.as_str(), record))
            })
            .collect::<HubResult<Vec<_>>>()?;

        let stored = [(crate::channel::ROOT, create), (lao_path, greet)]
            .into_iter()
            .map(|(channel, msg)| -> HubResult<_> {
                let record = encode(&StoredMessage {
                    channel: channel.to_string(),
                    message: msg.clone(),
                    timestamp: now,
                })?;
                let index_key = sequence_key(channel, self.db.generate_id()?);
                Ok((msg.message_id.as_bytes(), record, index_key))
            })
            .collect::<HubResult<Vec<_>>>()?;

        (&self.channels, &self.messages, &self.channel_index, &self.unprocessed)
            .transaction(|(tx_channels, messages, index, unprocessed)| {
                if tx_channels.get(lao_path)?.is_some() {
                    return abort(HubError::DuplicateResource(format!(
                        "channel {lao_path} already exists"
                    )));
                }
                for (path, record) in &channel_records {
                    tx_channels.insert(*path, record.as_slice())?;
                }
                for (id, record, index_key) in &stored {
                    if messages.get(*id)?.is_some() {
                        return abort(HubError::DuplicateResource(
                            "organization message already exists".into(),
                        ));
                    }
                    messages.insert(*id, record.as_slice())?;
                    index.insert(index_key.as_slice(), *id)?;
                    unprocessed.remove(*id)?;
                }
                Ok(())
            })
            .map_err(tx_error)?;

        info!(lao = lao_path, "organization channels created");
        Ok(())
    }

    fn check_rumor(&self, sender_id: &str, rumor_id: u64) -> HubResult<(bool, bool)> {
        if self.rumors.contains_key(sequence_key(sender_id, rumor_id))? {
            return Ok((false, true));
        }

        let is_next = match self.rumor_state.get(sender_id)? {
            Some(last) => rumor_id == decode_u64(&last)? + 1,
            None => rumor_id == 0,
        };
        Ok((is_next, false))
    }

    fn store_rumor(
        &self,
        rumor_id: u64,
        sender_id: &str,
        unprocessed: &MessagesByChannel,
        processed: &[String],
    ) -> HubResult<()> {
        let record = encode(&StoredRumor {
            processed: processed.to_vec(),
            unprocessed: unprocessed.clone(),
            timestamp: Utc::now().timestamp(),
        })?;
        let pending = unprocessed
            .iter()
            .flat_map(|(channel, msgs)| msgs.iter().map(move |m| (channel, m)))
            .map(|(channel, msg)| -> HubResult<_> {
                let record = encode(&PendingMessage {
                    channel: channel.clone(),
                    message: msg.clone(),
                })?;
                Ok((msg.message_id.as_bytes(), record))
            })
            .collect::<HubResult<Vec<_>>>()?;
        let key = sequence_key(sender_id, rumor_id);

        (&self.rumors, &self.rumor_state, &self.unprocessed, &self.messages)
            .transaction(|(rumors, state, tx_unprocessed, messages)| {
                if rumors.get(key.as_slice())?.is_some() {
                    return abort(HubError::DuplicateResource(format!(
                        "rumor {sender_id}:{rumor_id} already exists"
                    )));
                }
                rumors.insert(key.as_slice(), record.as_slice())?;

                let advance = match state.get(sender_id)? {
                    Some(last) => match decode_u64(&last) {
                        Ok(last) => rumor_id > last,
                        Err(e) => return abort(e),
                    },
                    None => true,
                };
                if advance {
                    state.insert(sender_id, &rumor_id.to_be_bytes()[..])?;
                }

                for (id, record) in &pending {
                    if messages.get(*id)?.is_none() {
                        tx_unprocessed.insert(*id, record.as_slice())?;
                    }
                }
                Ok(())
            })
            .map_err(tx_error)?;

        debug!(
            sender = sender_id,
            rumor_id,
            processed = processed.len(),
            unprocessed = pending.len(),
            "rumor stored"
        );
        Ok(())
    }

    fn get_unprocessed_messages_by_channel(&self) -> HubResult<MessagesByChannel> {
        let mut result = MessagesByChannel::new();
        for entry in self.unprocessed.iter() {
            let (_, record) = entry?;
            let pending: PendingMessage = decode(&record)?;
            result.entry(pending.channel).or_default().push(pending.message);
        }
        Ok(result)
    }

    fn get_rumor_state(&self) -> HubResult<RumorState> {
        let mut state = RumorState::new();
        for entry in self.rumor_state.iter() {
            let (sender, last) = entry?;
            state.insert(decode_string(&sender)?, decode_u64(&last)?);
        }
        Ok(state)
    }

    fn get_rumors_missing_from(&self, state: &RumorState) -> HubResult<Vec<RumorParams>> {
        let mut missing = Vec::new();
        for (sender, last) in self.get_rumor_state()? {
            let first = match state.get(&sender) {
                Some(theirs) if *theirs >= last => continue,
                Some(theirs) => theirs + 1,
                None => 0,
            };
            for rumor_id in first..=last {
                if let Some(params) = self.rumor_params(&sender, rumor_id)? {
                    missing.push(params);
                }
            }
        }
        Ok(missing)
    }

    fn add_message_to_my_rumor(&self, message_id: &str) -> HubResult<usize> {
        let seq = self.db.generate_id()?;
        self.my_rumor.insert(seq.to_be_bytes(), message_id)?;
        Ok(self.my_rumor.len())
    }

    fn get_and_increment_my_rumor(&self, sender_id: &str) -> HubResult<Option<RumorParams>> {
        let mut keys = Vec::new();
        let mut ids = Vec::new();
        for entry in self.my_rumor.iter() {
            let (key, id) = entry?;
            keys.push(key);
            ids.push(decode_string(&id)?);
        }
        if ids.is_empty() {
            return Ok(None);
        }

        let mut messages = MessagesByChannel::new();
        for id in &ids {
            if let Some(record) = self.load_message(id.as_bytes())? {
                messages.entry(record.channel).or_default().push(record.message);
            }
        }

        let timestamp = Utc::now().timestamp();
        let rumor_id = (&self.meta, &self.my_rumor, &self.rumors, &self.rumor_state)
            .transaction(|(meta, my_rumor, rumors, state)| {
                let rumor_id = match meta.get(NEXT_RUMOR_ID)? {
                    Some(bytes) => match decode_u64(&bytes) {
                        Ok(n) => n,
                        Err(e) => return abort(e),
                    },
                    None => 0,
                };
                let record = match encode(&StoredRumor {
                    processed: ids.clone(),
                    unprocessed: MessagesByChannel::new(),
                    timestamp,
                }) {
                    Ok(r) => r,
                    Err(e) => return abort(e),
                };

                for key in &keys {
                    my_rumor.remove(key.clone())?;
                }
                meta.insert(NEXT_RUMOR_ID, &(rumor_id + 1).to_be_bytes()[..])?;
                rumors.insert(sequence_key(sender_id, rumor_id), record)?;
                state.insert(sender_id, &rumor_id.to_be_bytes()[..])?;
                Ok(rumor_id)
            })
            .map_err(tx_error)?;

        Ok(Some(RumorParams {
            sender_id: sender_id.to_string(),
            rumor_id,
            messages,
        }))
    }

    fn get_params_heartbeat(&self) -> HubResult<IdsByChannel> {
        let mut result = IdsByChannel::new();
        for entry in self.channel_index.iter() {
            let (key, id) = entry?;
            let Some(split) = key.iter().position(|b| *b == 0) else {
                continue;
            };
            result
                .entry(decode_string(&key[..split])?)
                .or_default()
                .push(decode_string(&id)?);
        }
        Ok(result)
    }

    fn get_missing_ids(&self, params: &IdsByChannel) -> HubResult<IdsByChannel> {
        let mut missing = BTreeMap::new();
        for (channel, ids) in params {
            let mut absent = Vec::new();
            for id in ids {
                if !self.messages.contains_key(id)? {
                    absent.push(id.clone());
                }
            }
            if !absent.is_empty() {
                missing.insert(channel.clone(), absent);
            }
        }
        Ok(missing)
    }

    fn add_witness_signature(
        &self,
        message_id: &str,
        witness: &str,
        signature: &str,
    ) -> HubResult<()> {
        let mut key = prefix(message_id);
        key.extend_from_slice(witness.as_bytes());
        self.witnesses.insert(key, signature)?;
        Ok(())
    }

    fn get_or_create_server_keys(&self) -> HubResult<ServerKeys> {
        if let Some(secret) = self.meta.get(SECRET_KEY)? {
            let secret = <[u8; 32]>::try_from(&secret[..]).map_err(|_| {
                HubError::Internal(format!("stored server key has {} bytes", secret.len()))
            })?;
            return Ok(ServerKeys::from_secret(&secret));
        }

        let keys = ServerKeys::generate();
        self.meta.insert(SECRET_KEY, IVec::from(&keys.secret_bytes()[..]))?;
        self.meta.flush()?;
        info!(public_key = %keys.public_key(), "generated server keys");
        Ok(keys)
    }
}

impl std::fmt::Debug for SledRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledRepository")
            .field("db", &"sled::Db")
            .finish()
    }
}
