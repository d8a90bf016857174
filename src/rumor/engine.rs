use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::MessageHandler;
use crate::message::Message;
use crate::persistence::Repository;
use crate::query::QueryTracker;
use crate::rumor::RumorBuffer;
use crate::socket::{Socket, SocketSet};
use crate::transport::message::{METHOD_RUMOR, MessagesByChannel, RumorParams, encode_query};
use crate::utils::{HubError, HubResult};

/// Default number of passes over a rumor's messages.
pub const MAX_RETRY: usize = 10;

/// Accepts rumors from peers in per-sender order and applies their messages.
pub struct RumorEngine {
    repo: Arc<dyn Repository>,
    processor: Arc<dyn MessageHandler>,
    sockets: Arc<SocketSet>,
    queries: Arc<QueryTracker>,
    buffer: RumorBuffer,
    max_retry: usize,
    /// Held from `check_rumor` to `store_rumor`.
    sequencer: Mutex<()>,
}

impl RumorEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        processor: Arc<dyn MessageHandler>,
        sockets: Arc<SocketSet>,
        queries: Arc<QueryTracker>,
        buffer: RumorBuffer,
        max_retry: usize,
    ) -> Self {
        Self {
            repo,
            processor,
            sockets,
            queries,
            buffer,
            max_retry,
            sequencer: Mutex::new(()),
        }
    }

    pub fn buffer(&self) -> &RumorBuffer {
        &self.buffer
    }

    /// Handle a `rumor` query from `socket`.
    ///
    /// On `Ok` the query has been answered. A duplicate, or a rumor already
    /// waiting in the buffer, is returned as an error for the caller to
    /// report.
    pub fn handle_rumor(
        &self,
        socket: &Socket,
        query_id: Option<i64>,
        params: RumorParams,
    ) -> HubResult<()> {
        let _sequence = self.sequencer.lock();

        let (is_next, exists) = self.repo.check_rumor(&params.sender_id, params.rumor_id)?;
        if exists {
            return Err(HubError::DuplicateResource(format!(
                "rumor {}:{} already exists",
                params.sender_id, params.rumor_id
            )));
        }

        if !is_next {
            self.buffer.insert(params, Some(socket.id.clone()))?;
            socket.send_result(query_id, &0);
            return Ok(());
        }

        socket.send_result(query_id, &0);
        self.accept_chain(params, Some(socket.id.clone()))
    }

    /// Integrate rumors a peer sent in answer to our `rumor_state`. They are
    /// sorted by sender then id, so each one unlocks the next.
    pub fn handle_missing_rumors(&self, origin: &str, rumors: Vec<RumorParams>) -> HubResult<()> {
        let _sequence = self.sequencer.lock();

        for params in rumors {
            let (is_next, exists) = self.repo.check_rumor(&params.sender_id, params.rumor_id)?;
            if exists {
                continue;
            }
            if is_next {
                self.accept_chain(params, Some(origin.to_string()))?;
            } else if let Err(e) = self.buffer.insert(params, Some(origin.to_string())) {
                debug!("skipping missing rumor: {}", e);
            }
        }
        Ok(())
    }

    /// Send `params` to the next peer of its round-robin cycle.
    pub fn propagate(&self, origin: Option<&str>, params: &RumorParams) -> HubResult<()> {
        let id = self.queries.next_id();
        let payload = encode_query(METHOD_RUMOR, params, Some(id))?;
        // tracked first so a fast answer always finds it
        self.queries.add_rumor(id, params.clone());
        if self
            .sockets
            .send_rumor(origin, &params.sender_id, params.rumor_id, &payload)
            .is_none()
        {
            self.queries.take(id);
        }
        Ok(())
    }

    /// Retry every message left over by earlier rumors.
    pub fn retry_unprocessed(&self) -> HubResult<usize> {
        let pending = self.repo.get_unprocessed_messages_by_channel()?;
        if pending.is_empty() {
            return Ok(0);
        }
        let (_, processed) = self.try_handling_messages_by_channel(pending);
        if !processed.is_empty() {
            info!(count = processed.len(), "unprocessed messages applied");
        }
        Ok(processed.len())
    }

    /// Apply messages fetched with `get_messages_by_id`. Whatever still fails
    /// is dropped; the next heartbeat asks for it again.
    pub fn apply_messages(&self, messages: MessagesByChannel) -> usize {
        let (unprocessed, processed) = self.try_handling_messages_by_channel(messages);
        if !unprocessed.is_empty() {
            debug!(channels = unprocessed.len(), "fetched messages left unapplied");
        }
        processed.len()
    }

    fn accept_chain(&self, params: RumorParams, origin: Option<String>) -> HubResult<()> {
        let mut next = Some((params, origin));
        while let Some((params, origin)) = next.take() {
            let sender_id = params.sender_id.clone();
            let rumor_id = params.rumor_id;
            self.accept(params, origin.as_deref())?;

            next = self
                .buffer
                .take(&sender_id, rumor_id + 1)
                .map(|b| (b.params, b.origin));
        }
        Ok(())
    }

    fn accept(&self, params: RumorParams, origin: Option<&str>) -> HubResult<()> {
        self.propagate(origin, &params)?;

        let (unprocessed, processed) = self.try_handling_messages_by_channel(params.messages);
        self.repo
            .store_rumor(params.rumor_id, &params.sender_id, &unprocessed, &processed)?;
        debug!(
            sender = %params.sender_id,
            rumor_id = params.rumor_id,
            processed = processed.len(),
            "rumor accepted"
        );

        self.retry_unprocessed()?;
        Ok(())
    }

    /// Apply messages, parents first, over up to `max_retry` passes per
    /// channel. Returns what is still unprocessed and the ids applied.
    fn try_handling_messages_by_channel(
        &self,
        messages: MessagesByChannel,
    ) -> (MessagesByChannel, Vec<String>) {
        let mut channels: Vec<(String, Vec<Message>)> = messages.into_iter().collect();
        channels.sort_by_key(|(path, _)| path.len());

        let mut unprocessed = MessagesByChannel::new();
        let mut processed = Vec::new();

        for (channel, mut pending) in channels {
            for _ in 0..self.max_retry {
                if pending.is_empty() {
                    break;
                }
                pending.retain(|msg| match self.processor.handle(&channel, msg, true) {
                    Ok(()) => {
                        processed.push(msg.message_id.clone());
                        false
                    }
                    Err(e) if e.is_duplicate() => {
                        processed.push(msg.message_id.clone());
                        false
                    }
                    Err(e) => {
                        debug!(channel = %channel, message_id = %msg.message_id, "deferred: {}", e);
                        true
                    }
                });
            }

            if !pending.is_empty() {
                debug!(channel = %channel, count = pending.len(), "messages left unprocessed");
                unprocessed.insert(channel, pending);
            }
        }

        (unprocessed, processed)
    }
}
