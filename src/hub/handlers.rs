use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::ROOT;
use crate::hub::engine::HubState;
use crate::message::Message;
use crate::query::QueryKind;
use crate::socket::Socket;
use crate::transport::message::{
    ChannelParams, GreetServerParams, IdsByChannel, Incoming, METHOD_GET_MESSAGES_BY_ID,
    MessagesByChannel, Method, PublishParams, RawAnswer, RawQuery, RumorParams,
    RumorStateParams, encode_query, parse_incoming,
};
use crate::utils::{HubError, HubResult};

/// Handle one raw frame received on `socket`. Failures to answer a query
/// are reported back to the sender.
pub fn handle_incoming(state: &HubState, socket: &Socket, raw: &str) {
    match parse_incoming(raw) {
        Ok(Incoming::Query(query)) => {
            let id = query.id;
            if let Err(e) = handle_query(state, socket, query) {
                debug!(socket = %socket.id, code = e.code(), "query failed: {}", e);
                socket.send_error(id, &e);
            }
        }
        Ok(Incoming::Answer(answer)) => {
            if let Err(e) = handle_answer(state, socket, answer) {
                warn!(socket = %socket.id, "failed to handle answer: {}", e);
            }
        }
        Err(e) => {
            debug!(socket = %socket.id, "malformed frame: {}", e);
            socket.send_error(None, &e);
        }
    }
}

fn handle_query(state: &HubState, socket: &Socket, query: RawQuery) -> HubResult<()> {
    let method = Method::parse(&query.method, query.params)?;
    if method.is_server_only() && !socket.is_server() {
        return Err(HubError::AccessDenied(format!(
            "{} is reserved to servers",
            method.name()
        )));
    }

    let id = query.id;
    match method {
        Method::Subscribe(params) => handle_subscribe(state, socket, id, params),
        Method::Unsubscribe(params) => handle_unsubscribe(state, socket, id, params),
        Method::Publish(params) => handle_publish(state, socket, id, params),
        Method::Catchup(params) => handle_catchup(state, socket, id, params),
        Method::Broadcast(_) => Err(HubError::InvalidAction(
            "broadcast is only sent by the hub".into(),
        )),
        Method::Rumor(params) => state.rumors.handle_rumor(socket, id, params),
        Method::RumorState(params) => handle_rumor_state(state, socket, id, params),
        Method::GetMessagesById(params) => handle_get_messages_by_id(state, socket, id, params),
        Method::Heartbeat(params) => handle_heartbeat(state, socket, params),
        Method::GreetServer(params) => handle_greet_server(state, socket, params),
    }
}

fn reject_root(channel: &str, action: &str) -> HubResult<()> {
    if channel == ROOT {
        return Err(HubError::InvalidAction(format!(
            "cannot {action} {ROOT}"
        )));
    }
    Ok(())
}

fn handle_subscribe(
    state: &HubState,
    socket: &Socket,
    id: Option<i64>,
    params: ChannelParams,
) -> HubResult<()> {
    reject_root(&params.channel, "subscribe to")?;
    state.channels.get(&params.channel)?.subscribe(socket.clone());
    debug!(socket = %socket.id, channel = %params.channel, "subscribed");
    socket.send_result(id, &0);
    Ok(())
}

fn handle_unsubscribe(
    state: &HubState,
    socket: &Socket,
    id: Option<i64>,
    params: ChannelParams,
) -> HubResult<()> {
    reject_root(&params.channel, "unsubscribe from")?;
    state.channels.get(&params.channel)?.unsubscribe(&socket.id)?;
    debug!(socket = %socket.id, channel = %params.channel, "unsubscribed");
    socket.send_result(id, &0);
    Ok(())
}

fn handle_publish(
    state: &HubState,
    socket: &Socket,
    id: Option<i64>,
    params: PublishParams,
) -> HubResult<()> {
    state
        .processor
        .handle(&params.channel, &params.message, false)?;

    let pending = state
        .repo
        .add_message_to_my_rumor(&params.message.message_id)?;
    if pending >= state.settings.rumor_max_messages {
        state.rumor_ready.notify_one();
    }

    debug!(
        socket = %socket.id,
        channel = %params.channel,
        message_id = %params.message.message_id,
        "published"
    );
    socket.send_result(id, &0);
    Ok(())
}

fn handle_catchup(
    state: &HubState,
    socket: &Socket,
    id: Option<i64>,
    params: ChannelParams,
) -> HubResult<()> {
    let messages: Vec<Message> = state.channels.get(&params.channel)?.catchup()?;
    socket.send_result(id, &messages);
    Ok(())
}

fn handle_rumor_state(
    state: &HubState,
    socket: &Socket,
    id: Option<i64>,
    params: RumorStateParams,
) -> HubResult<()> {
    let missing = state.repo.get_rumors_missing_from(&params.state)?;
    debug!(socket = %socket.id, count = missing.len(), "answering rumor state");
    socket.send_result(id, &missing);
    Ok(())
}

fn handle_get_messages_by_id(
    state: &HubState,
    socket: &Socket,
    id: Option<i64>,
    params: IdsByChannel,
) -> HubResult<()> {
    let messages = state.repo.get_messages_by_id(&params)?;
    socket.send_result(id, &messages);
    Ok(())
}

/// Ask the sender for the messages its heartbeat lists that we lack.
fn handle_heartbeat(state: &HubState, socket: &Socket, params: IdsByChannel) -> HubResult<()> {
    let missing = state.repo.get_missing_ids(&params)?;
    if missing.is_empty() {
        return Ok(());
    }

    let query_id = state.queries.next_id();
    let text = encode_query(METHOD_GET_MESSAGES_BY_ID, &missing, Some(query_id))?;
    state.queries.add_get_messages_by_id(query_id);
    if !socket.send(text) {
        state.queries.take(query_id);
    }
    Ok(())
}

fn handle_greet_server(
    state: &HubState,
    socket: &Socket,
    params: GreetServerParams,
) -> HubResult<()> {
    if params.public_key == state.greeting.public_key {
        return Err(HubError::InvalidAction("a server cannot greet itself".into()));
    }

    let public_key = params.public_key.clone();
    if state.peers.insert(params) {
        info!(peer = %public_key, socket = %socket.id, "new server greeted us");
        state.send_greeting(socket)?;
    }
    Ok(())
}

/// Route an answer to the query it resolves.
fn handle_answer(state: &HubState, socket: &Socket, answer: RawAnswer) -> HubResult<()> {
    let Some(id) = answer.id else {
        return Err(HubError::InvalidResource("answer without an id".into()));
    };
    let Some(kind) = state.queries.take(id) else {
        return Err(HubError::InvalidResource(format!("no pending query {id}")));
    };

    if let Some(error) = &answer.error {
        debug!(query = id, code = error.code, "peer answered with an error: {}", error.description);
    }

    match kind {
        QueryKind::Rumor(params) => continue_rumor(state, &params),
        QueryKind::RumorState => {
            let rumors: Vec<RumorParams> = result_of(&answer)?;
            state.rumors.handle_missing_rumors(&socket.id, rumors)
        }
        QueryKind::GetMessagesById => {
            let messages: MessagesByChannel = result_of(&answer)?;
            let applied = state.rumors.apply_messages(messages);
            debug!(query = id, applied, "fetched messages applied");
            Ok(())
        }
    }
}

/// Any answer to a rumor, success or not, moves it on to the next peer.
fn continue_rumor(state: &HubState, params: &RumorParams) -> HubResult<()> {
    state.rumors.propagate(None, params)
}

fn result_of<T: serde::de::DeserializeOwned>(answer: &RawAnswer) -> HubResult<T> {
    match &answer.result {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| HubError::SchemaValidation(format!("malformed result: {e}"))),
        None if answer.error.is_some() => Err(HubError::InvalidResource(
            "peer could not answer the query".into(),
        )),
        None => serde_json::from_value(Value::Null)
            .map_err(|e| HubError::SchemaValidation(format!("missing result: {e}"))),
    }
}
