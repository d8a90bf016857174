use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use super::Hub;
use super::handlers::handle_incoming;
use crate::channel::MessageHandler;
use crate::config::Settings;
use crate::message::data::{LaoCreate, LaoGreet};
use crate::message::{Message, ServerKeys};
use crate::persistence::{Repository, SledRepository};
use crate::socket::{Socket, SocketKind};
use crate::utils::{HubError, HubResult};

struct Fixture {
    hub: Arc<Hub>,
    repo: Arc<dyn Repository>,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = tempdir().expect("Failed to create temp dir");
    let repo: Arc<dyn Repository> =
        Arc::new(SledRepository::open(dir.path().to_str().unwrap()).unwrap());
    let mut settings = Settings::default();
    settings.hub.workers = 2;
    let hub = Hub::new(&settings, repo.clone()).expect("Failed to build hub");
    Fixture {
        hub,
        repo,
        _dir: dir,
    }
}

fn socket(kind: SocketKind) -> (Socket, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    (Socket::new(kind, tx), rx)
}

fn frames(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(WsMessage::Text(text)) = rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

fn send(f: &Fixture, socket: &Socket, frame: Value) {
    handle_incoming(f.hub.state(), socket, &frame.to_string());
}

fn query(method: &str, params: Value, id: i64) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id})
}

fn create_lao(organizer: &ServerKeys, name: &str) -> (LaoCreate, Message) {
    let create = LaoCreate::new(&organizer.public_key(), name, 1_700_000_000);
    let msg = organizer.sign_data(&create).unwrap();
    (create, msg)
}

fn chirp(keys: &ServerKeys, text: &str) -> Message {
    keys.sign_data(&json!({"object": "chirp", "action": "add", "text": text}))
        .unwrap()
}

#[tokio::test]
async fn test_lao_creation_through_publish() {
    let f = fixture();
    let (client, mut rx) = socket(SocketKind::Client);
    let organizer = ServerKeys::generate();
    let (create, msg) = create_lao(&organizer, "Conference");

    send(&f, &client, query("publish", json!({"channel": "/root", "message": msg}), 1));
    let answers = frames(&mut rx);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["id"], 1);
    assert_eq!(answers[0]["result"], 0);

    let lao_path = format!("/root/{}", create.id);
    send(&f, &client, query("catchup", json!({"channel": lao_path}), 2));
    let answers = frames(&mut rx);
    let stored: Vec<Message> = serde_json::from_value(answers[0]["result"].clone()).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sender, f.hub.public_key());
    let greet: LaoGreet = stored[0].unmarshal_data().unwrap();
    assert_eq!(greet.lao, create.id);

    send(
        &f,
        &client,
        query("subscribe", json!({"channel": format!("{lao_path}/social/chirps")}), 3),
    );
    assert_eq!(frames(&mut rx)[0]["result"], 0);
}

#[tokio::test]
async fn test_duplicate_publish_is_reported() {
    let f = fixture();
    let (client, mut rx) = socket(SocketKind::Client);
    let (_, msg) = create_lao(&ServerKeys::generate(), "Twice");

    let frame = query("publish", json!({"channel": "/root", "message": msg}), 1);
    send(&f, &client, frame.clone());
    send(&f, &client, frame);

    let answers = frames(&mut rx);
    assert_eq!(answers[0]["result"], 0);
    assert_eq!(answers[1]["error"]["code"], -3);
}

#[tokio::test]
async fn test_protocol_errors() {
    let f = fixture();
    let (client, mut rx) = socket(SocketKind::Client);

    send(&f, &client, query("subscribe", json!({"channel": "/root"}), 1));
    send(&f, &client, query("rumor_state", json!({"state": {}}), 2));
    send(&f, &client, query("teleport", json!({}), 3));
    send(&f, &client, query("catchup", json!({"channel": "/root/missing"}), 4));
    send(&f, &client, query("subscribe", json!({"nope": 1}), 5));
    handle_incoming(f.hub.state(), &client, "{not json");

    let answers = frames(&mut rx);
    let codes: Vec<(Value, Value)> = answers
        .iter()
        .map(|a| (a["id"].clone(), a["error"]["code"].clone()))
        .collect();
    assert_eq!(
        codes,
        vec![
            (json!(1), json!(-1)),
            (json!(2), json!(-5)),
            (json!(3), json!(-2)),
            (json!(4), json!(-2)),
            (json!(5), json!(-4)),
            (Value::Null, json!(-4)),
        ]
    );
}

#[tokio::test]
async fn test_client_publish_becomes_own_rumor() {
    let f = fixture();
    let (client, _client_rx) = socket(SocketKind::Client);
    let (peer, mut peer_rx) = socket(SocketKind::Server);
    f.hub.register(peer);

    let (_, msg) = create_lao(&ServerKeys::generate(), "Gossip");
    send(&f, &client, query("publish", json!({"channel": "/root", "message": msg}), 1));

    f.hub.state().send_own_rumor().unwrap();
    let sent = frames(&mut peer_rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "rumor");
    assert_eq!(sent[0]["params"]["sender_id"], f.hub.public_key());
    assert_eq!(sent[0]["params"]["rumor_id"], 0);
    assert_eq!(sent[0]["params"]["messages"]["/root"][0]["message_id"], msg.message_id.as_str());

    // nothing new to send
    f.hub.state().send_own_rumor().unwrap();
    assert!(frames(&mut peer_rx).is_empty());
}

#[tokio::test]
async fn test_rumor_message_waits_for_its_organization() {
    let f = fixture();
    let (peer, mut peer_rx) = socket(SocketKind::Server);
    f.hub.register(peer.clone());

    let organizer = ServerKeys::generate();
    let (create, create_msg) = create_lao(&organizer, "Later");
    let chirps = format!("/root/{}/social/chirps", create.id);
    let early = chirp(&organizer, "before the organization exists");

    let mut first = BTreeMap::new();
    first.insert(chirps.clone(), vec![early.clone()]);
    send(
        &f,
        &peer,
        query("rumor", json!({"sender_id": "S1", "rumor_id": 0, "messages": first}), 1),
    );
    assert_eq!(
        f.repo.get_unprocessed_messages_by_channel().unwrap()[&chirps],
        vec![early.clone()]
    );

    let mut second = BTreeMap::new();
    second.insert("/root".to_string(), vec![create_msg]);
    send(
        &f,
        &peer,
        query("rumor", json!({"sender_id": "S1", "rumor_id": 1, "messages": second}), 2),
    );

    assert!(f.repo.get_unprocessed_messages_by_channel().unwrap().is_empty());
    assert_eq!(f.repo.get_all_messages_from_channel(&chirps).unwrap(), vec![early]);

    let acks: Vec<Value> = frames(&mut peer_rx)
        .into_iter()
        .filter(|frame| frame.get("result").is_some())
        .collect();
    assert_eq!(acks.len(), 2);
}

#[tokio::test]
async fn test_greet_server_is_answered_once() {
    let f = fixture();
    let (peer, mut rx) = socket(SocketKind::Server);
    let greeting = json!({
        "jsonrpc": "2.0",
        "method": "greet_server",
        "params": {
            "public_key": "remote-key",
            "client_address": "ws://remote:9000/client",
            "server_address": "ws://remote:9001/server"
        }
    });

    send(&f, &peer, greeting.clone());
    let replies = frames(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["method"], "greet_server");
    assert_eq!(replies[0]["params"]["public_key"], f.hub.public_key());
    assert!(f.hub.state().peers.contains("remote-key"));

    send(&f, &peer, greeting);
    assert!(frames(&mut rx).is_empty());
}

#[tokio::test]
async fn test_heartbeat_fetches_missing_messages() {
    let f = fixture();
    let (peer, mut rx) = socket(SocketKind::Server);
    let (create, msg) = create_lao(&ServerKeys::generate(), "Remote");

    send(
        &f,
        &peer,
        json!({
            "jsonrpc": "2.0",
            "method": "heartbeat",
            "params": {"/root": [msg.message_id]}
        }),
    );
    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "get_messages_by_id");
    assert_eq!(sent[0]["params"]["/root"][0], msg.message_id.as_str());

    let query_id = sent[0]["id"].as_i64().unwrap();
    send(
        &f,
        &peer,
        json!({"jsonrpc": "2.0", "id": query_id, "result": {"/root": [msg]}}),
    );
    assert!(f.hub.state().channels.contains(&format!("/root/{}", create.id)));
    assert!(f.hub.state().queries.is_empty());
}

#[tokio::test]
async fn test_new_server_receives_greeting_and_rumor_state() {
    let f = fixture();
    let (peer, mut rx) = socket(SocketKind::Server);
    f.hub.notify_new_server(peer.clone()).unwrap();

    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["method"], "greet_server");
    assert_eq!(sent[1]["method"], "rumor_state");
    assert_eq!(f.hub.state().sockets.peer_count(), 1);

    // the peer answers with a rumor we never saw
    let (create, msg) = create_lao(&ServerKeys::generate(), "Missed");
    let query_id = sent[1]["id"].as_i64().unwrap();
    send(
        &f,
        &peer,
        json!({
            "jsonrpc": "2.0",
            "id": query_id,
            "result": [{"sender_id": "S9", "rumor_id": 0, "messages": {"/root": [msg]}}]
        }),
    );
    assert!(f.hub.state().channels.contains(&format!("/root/{}", create.id)));
    assert_eq!(f.repo.get_rumor_state().unwrap()["S9"], 0);
}

#[tokio::test]
async fn test_unknown_answer_is_ignored() {
    let f = fixture();
    let (peer, mut rx) = socket(SocketKind::Server);
    send(&f, &peer, json!({"jsonrpc": "2.0", "id": 42, "result": 0}));
    assert!(frames(&mut rx).is_empty());
}

#[tokio::test]
async fn test_dispatch_loop_and_shutdown() {
    let f = fixture();
    f.hub.start();

    let (client, mut rx) = socket(SocketKind::Client);
    f.hub.register(client.clone());
    for id in 0..5 {
        let frame = query("catchup", json!({"channel": "/root"}), id);
        f.hub.receive(client.clone(), frame.to_string()).await.unwrap();
    }

    let mut ids = Vec::new();
    for _ in 0..5 {
        let answer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for an answer")
            .expect("Socket channel closed");
        let frame: Value = serde_json::from_str(answer.to_text().unwrap()).unwrap();
        assert_eq!(frame["result"], json!([]));
        ids.push(frame["id"].as_i64().unwrap());
    }
    ids.sort();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    f.hub.closed_sender().send(client.id.clone()).unwrap();
    for _ in 0..50 {
        if f.hub.state().sockets.get(&client.id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(f.hub.state().sockets.get(&client.id).is_none());

    tokio::time::timeout(Duration::from_secs(5), f.hub.stop())
        .await
        .expect("Hub did not stop");
}

#[test]
fn test_zero_periods_are_rejected() {
    let dir = tempdir().expect("Failed to create temp dir");
    let repo: Arc<dyn Repository> =
        Arc::new(SledRepository::open(dir.path().to_str().unwrap()).unwrap());

    let cases: [(&str, fn(&mut Settings)); 4] = [
        ("hub.workers", |s| s.hub.workers = 0),
        ("hub.rumor_delay_ms", |s| s.hub.rumor_delay_ms = 0),
        ("hub.rumor_state_delay_ms", |s| s.hub.rumor_state_delay_ms = 0),
        ("hub.heartbeat_delay_ms", |s| s.hub.heartbeat_delay_ms = 0),
    ];
    for (name, tweak) in cases {
        let mut settings = Settings::default();
        tweak(&mut settings);
        match Hub::new(&settings, repo.clone()).err() {
            Some(HubError::Internal(msg)) => assert!(msg.contains(name), "{msg}"),
            other => panic!("Expected {name} to be rejected, got {other:?}"),
        }
    }
}

/// Panics on every message.
struct ExplodingProcessor;

impl MessageHandler for ExplodingProcessor {
    fn handle(&self, _channel: &str, _msg: &Message, _from_rumor: bool) -> HubResult<()> {
        panic!("processor exploded");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_panic_is_contained() {
    let dir = tempdir().expect("Failed to create temp dir");
    let repo: Arc<dyn Repository> =
        Arc::new(SledRepository::open(dir.path().to_str().unwrap()).unwrap());
    let mut settings = Settings::default();
    settings.hub.workers = 1;
    settings.hub.inbound_capacity = 1;
    let hub = Hub::with_processor(&settings, repo, Arc::new(ExplodingProcessor))
        .expect("Failed to build hub");
    hub.start();

    let (client, mut rx) = socket(SocketKind::Client);
    hub.register(client.clone());

    let (_, msg) = create_lao(&ServerKeys::generate(), "Boom");
    let publish = query("publish", json!({"channel": "/root", "message": msg}), 1);
    hub.receive(client.clone(), publish.to_string()).await.unwrap();

    // one worker and a one-slot queue: these sends wait on the pool
    for id in 2..6 {
        let frame = query("catchup", json!({"channel": "/root"}), id);
        hub.receive(client.clone(), frame.to_string()).await.unwrap();
    }

    let mut ids = Vec::new();
    for _ in 2..6 {
        let answer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for an answer")
            .expect("Socket channel closed");
        let frame: Value = serde_json::from_str(answer.to_text().unwrap()).unwrap();
        ids.push(frame["id"].as_i64().unwrap());
    }
    ids.sort();
    assert_eq!(ids, vec![2, 3, 4, 5]);

    tokio::time::timeout(Duration::from_secs(5), hub.stop())
        .await
        .expect("Hub did not drain its workers");
    assert!(rx.try_recv().is_err());
}
