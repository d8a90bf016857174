//! Error taxonomy of the hub.
//!
//! Every failure that can be reported to a socket is a `HubError`. The
//! variant decides the numeric JSON-RPC code carried by the error answer;
//! the display string becomes its `description`.

use serde::{Deserialize, Serialize};

pub const INVALID_ACTION_CODE: i32 = -1;
pub const INVALID_RESOURCE_CODE: i32 = -2;
pub const DUPLICATE_RESOURCE_CODE: i32 = -3;
pub const INVALID_MESSAGE_FIELD_CODE: i32 = -4;
pub const ACCESS_DENIED_CODE: i32 = -5;
pub const INTERNAL_SERVER_CODE: i32 = -6;

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The request is well formed but not allowed in this context.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid resource: unknown method '{0}'")]
    UnknownMethod(String),

    #[error("invalid resource: channel {0} does not exist")]
    ChannelNotFound(String),

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Message, rumor or channel already exists (or is already buffered).
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    /// The JSON-RPC envelope does not have the expected shape.
    #[error("invalid message field: schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("invalid message field: {0}")]
    InvalidMessageField(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Storage or crypto failure inside the server.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl HubError {
    /// JSON-RPC error code for this variant.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidAction(_) => INVALID_ACTION_CODE,
            Self::UnknownMethod(_) | Self::ChannelNotFound(_) | Self::InvalidResource(_) => {
                INVALID_RESOURCE_CODE
            }
            Self::DuplicateResource(_) => DUPLICATE_RESOURCE_CODE,
            Self::SchemaValidation(_) | Self::InvalidMessageField(_) => INVALID_MESSAGE_FIELD_CODE,
            Self::AccessDenied(_) => ACCESS_DENIED_CODE,
            Self::Internal(_) => INTERNAL_SERVER_CODE,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateResource(_))
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            description: self.to_string(),
        }
    }
}

impl From<sled::Error> for HubError {
    fn from(err: sled::Error) -> Self {
        Self::Internal(format!("storage: {err}"))
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMessageField(format!("failed to decode JSON: {err}"))
    }
}

/// `error` member of a JSON-RPC error answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub description: String,
}
