use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tungstenite::protocol::Message as WsMessage;

use crate::transport::message::{encode_error, encode_result};
use crate::utils::HubError;

/// Endpoint a connection was accepted on (or dialed to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Client,
    Server,
}

impl std::fmt::Display for SocketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Handle of a connected WebSocket peer.
///
/// Cloning is cheap; every clone feeds the same write task.
#[derive(Debug, Clone)]
pub struct Socket {
    /// Unique identifier for the connection.
    pub id: String,

    pub kind: SocketKind,

    /// Channel to the connection's write task.
    pub sender: UnboundedSender<WsMessage>,
}

impl Socket {
    pub fn new(kind: SocketKind, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("{kind}-{}", uuid::Uuid::new_v4()),
            kind,
            sender,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn is_server(&self) -> bool {
        self.kind == SocketKind::Server
    }

    /// Queue a text frame. Returns false if the write task is gone.
    pub fn send(&self, text: String) -> bool {
        if let Err(e) = self.sender.send(WsMessage::text(text)) {
            warn!(socket = %self.id, "failed to queue frame: {}", e);
            return false;
        }
        true
    }

    pub fn send_result<R: Serialize>(&self, id: Option<i64>, result: &R) {
        match encode_result(id, result) {
            Ok(text) => {
                self.send(text);
            }
            Err(e) => warn!(socket = %self.id, "dropping result: {}", e),
        }
    }

    pub fn send_error(&self, id: Option<i64>, err: &HubError) {
        match encode_error(id, &err.to_error_body()) {
            Ok(text) => {
                self.send(text);
            }
            Err(e) => warn!(socket = %self.id, "dropping error answer: {}", e),
        }
    }
}
