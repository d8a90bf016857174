//! JSON-RPC 2.0 envelopes exchanged with clients and peer servers.
//!
//! Incoming frames are parsed in two steps: first the envelope (`RawQuery`
//! or `RawAnswer`), then the method-specific params (`Method::parse`). This
//! keeps unknown methods distinguishable from malformed params.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::utils::{ErrorBody, HubError, HubResult};

pub const JSON_RPC_VERSION: &str = "2.0";

pub const METHOD_SUBSCRIBE: &str = "subscribe";
pub const METHOD_UNSUBSCRIBE: &str = "unsubscribe";
pub const METHOD_PUBLISH: &str = "publish";
pub const METHOD_CATCHUP: &str = "catchup";
pub const METHOD_BROADCAST: &str = "broadcast";
pub const METHOD_RUMOR: &str = "rumor";
pub const METHOD_RUMOR_STATE: &str = "rumor_state";
pub const METHOD_GET_MESSAGES_BY_ID: &str = "get_messages_by_id";
pub const METHOD_HEARTBEAT: &str = "heartbeat";
pub const METHOD_GREET_SERVER: &str = "greet_server";

/// Messages of a rumor, grouped by channel path.
pub type MessagesByChannel = BTreeMap<String, Vec<Message>>;

/// Message ids grouped by channel path (heartbeat and get_messages_by_id).
pub type IdsByChannel = BTreeMap<String, Vec<String>>;

/// Last accepted rumor id per sender.
pub type RumorState = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishParams {
    pub channel: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumorParams {
    pub sender_id: String,
    pub rumor_id: u64,
    pub messages: MessagesByChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumorStateParams {
    pub state: RumorState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetServerParams {
    pub public_key: String,
    pub client_address: String,
    pub server_address: String,
}

/// A query as received, before its params are interpreted.
#[derive(Debug, Deserialize)]
pub struct RawQuery {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Option<i64>,
}

/// An answer to one of our own queries.
#[derive(Debug, Deserialize)]
pub struct RawAnswer {
    pub jsonrpc: String,
    pub id: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<ErrorBody>,
}

#[derive(Debug)]
pub enum Incoming {
    Query(RawQuery),
    Answer(RawAnswer),
}

/// Split a raw frame into a query or an answer.
pub fn parse_incoming(raw: &str) -> HubResult<Incoming> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| HubError::SchemaValidation(format!("frame is not JSON: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(HubError::SchemaValidation("frame is not a JSON object".into()));
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSON_RPC_VERSION) {
        return Err(HubError::SchemaValidation(
            "jsonrpc field must be \"2.0\"".into(),
        ));
    }

    if object.contains_key("method") {
        let query = serde_json::from_value(value)
            .map_err(|e| HubError::SchemaValidation(format!("malformed query: {e}")))?;
        return Ok(Incoming::Query(query));
    }

    if object.contains_key("result") || object.contains_key("error") {
        let answer = serde_json::from_value(value)
            .map_err(|e| HubError::SchemaValidation(format!("malformed answer: {e}")))?;
        return Ok(Incoming::Answer(answer));
    }

    Err(HubError::SchemaValidation(
        "frame is neither a query nor an answer".into(),
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Subscribe(ChannelParams),
    Unsubscribe(ChannelParams),
    Publish(PublishParams),
    Catchup(ChannelParams),
    Broadcast(PublishParams),
    Rumor(RumorParams),
    RumorState(RumorStateParams),
    GetMessagesById(IdsByChannel),
    Heartbeat(IdsByChannel),
    GreetServer(GreetServerParams),
}

impl Method {
    pub fn parse(method: &str, params: Value) -> HubResult<Self> {
        fn params_of<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> HubResult<T> {
            serde_json::from_value(params).map_err(|e| {
                HubError::SchemaValidation(format!("invalid params for {method}: {e}"))
            })
        }

        let parsed = match method {
            METHOD_SUBSCRIBE => Self::Subscribe(params_of(method, params)?),
            METHOD_UNSUBSCRIBE => Self::Unsubscribe(params_of(method, params)?),
            METHOD_PUBLISH => Self::Publish(params_of(method, params)?),
            METHOD_CATCHUP => Self::Catchup(params_of(method, params)?),
            METHOD_BROADCAST => Self::Broadcast(params_of(method, params)?),
            METHOD_RUMOR => Self::Rumor(params_of(method, params)?),
            METHOD_RUMOR_STATE => Self::RumorState(params_of(method, params)?),
            METHOD_GET_MESSAGES_BY_ID => Self::GetMessagesById(params_of(method, params)?),
            METHOD_HEARTBEAT => Self::Heartbeat(params_of(method, params)?),
            METHOD_GREET_SERVER => Self::GreetServer(params_of(method, params)?),
            other => return Err(HubError::UnknownMethod(other.to_string())),
        };

        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => METHOD_SUBSCRIBE,
            Self::Unsubscribe(_) => METHOD_UNSUBSCRIBE,
            Self::Publish(_) => METHOD_PUBLISH,
            Self::Catchup(_) => METHOD_CATCHUP,
            Self::Broadcast(_) => METHOD_BROADCAST,
            Self::Rumor(_) => METHOD_RUMOR,
            Self::RumorState(_) => METHOD_RUMOR_STATE,
            Self::GetMessagesById(_) => METHOD_GET_MESSAGES_BY_ID,
            Self::Heartbeat(_) => METHOD_HEARTBEAT,
            Self::GreetServer(_) => METHOD_GREET_SERVER,
        }
    }

    /// Methods that only another server may send.
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            Self::Rumor(_)
                | Self::RumorState(_)
                | Self::GetMessagesById(_)
                | Self::Heartbeat(_)
                | Self::GreetServer(_)
        )
    }
}

#[derive(Serialize)]
struct QueryOut<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a P,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

#[derive(Serialize)]
struct AnswerOut<'a, R: Serialize> {
    jsonrpc: &'static str,
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorBody>,
}

/// Encode an outbound query. `id` is `None` for notifications.
pub fn encode_query<P: Serialize>(method: &str, params: &P, id: Option<i64>) -> HubResult<String> {
    serde_json::to_string(&QueryOut {
        jsonrpc: JSON_RPC_VERSION,
        method,
        params,
        id,
    })
    .map_err(|e| HubError::Internal(format!("failed to marshal {method} query: {e}")))
}

pub fn encode_result<R: Serialize>(id: Option<i64>, result: &R) -> HubResult<String> {
    serde_json::to_string(&AnswerOut {
        jsonrpc: JSON_RPC_VERSION,
        id,
        result: Some(result),
        error: None,
    })
    .map_err(|e| HubError::Internal(format!("failed to marshal result: {e}")))
}

pub fn encode_error(id: Option<i64>, body: &ErrorBody) -> HubResult<String> {
    serde_json::to_string(&AnswerOut::<()> {
        jsonrpc: JSON_RPC_VERSION,
        id,
        result: None,
        error: Some(body),
    })
    .map_err(|e| HubError::Internal(format!("failed to marshal error: {e}")))
}
