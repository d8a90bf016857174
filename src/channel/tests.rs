use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::json;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use super::*;
use crate::message::data::{LaoCreate, LaoGreet, WitnessMessage};
use crate::message::message::encode_base64;
use crate::message::{Message, ServerKeys};
use crate::persistence::{Repository, SledRepository};
use crate::socket::{PeerDirectory, Socket, SocketKind};
use crate::transport::message::GreetServerParams;
use crate::utils::HubError;

struct Fixture {
    repo: Arc<dyn Repository>,
    registry: Arc<ChannelRegistry>,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = tempdir().expect("Failed to create temp dir");
    let repo: Arc<dyn Repository> =
        Arc::new(SledRepository::open(dir.path().to_str().unwrap()).unwrap());
    let registry = Arc::new(ChannelRegistry::new(repo.clone()));
    registry.load().unwrap();
    Fixture {
        repo,
        registry,
        _dir: dir,
    }
}

fn client() -> (Socket, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    (Socket::new(SocketKind::Client, tx), rx)
}

fn chirp(keys: &ServerKeys, text: &str) -> Message {
    keys.sign_data(&json!({"object": "chirp", "action": "add", "text": text}))
        .unwrap()
}

struct AcceptAll;

impl MessageHandler for AcceptAll {
    fn handle(&self, _channel: &str, _msg: &Message, _from_rumor: bool) -> crate::utils::HubResult<()> {
        Ok(())
    }
}

struct RejectAll;

impl MessageHandler for RejectAll {
    fn handle(&self, _channel: &str, _msg: &Message, _from_rumor: bool) -> crate::utils::HubResult<()> {
        Err(HubError::InvalidAction("rejected".into()))
    }
}

#[test]
fn test_load_creates_root() {
    let f = fixture();
    assert!(f.repo.has_channel(ROOT).unwrap());
    assert_eq!(f.registry.get(ROOT).unwrap().kind(), ChannelKind::Root);
}

#[test]
fn test_get_missing_channel() {
    let f = fixture();
    let err = f.registry.get("/root/nope").unwrap_err();
    assert!(matches!(err, HubError::ChannelNotFound(_)));
}

#[test]
fn test_unsubscribe_requires_subscription() {
    let f = fixture();
    let channel = f.registry.add("/root/a", ChannelKind::Lao);
    let (socket, _rx) = client();

    let err = channel.unsubscribe(socket.id()).unwrap_err();
    assert!(err.to_string().contains("not subscribed"));

    channel.subscribe(socket.clone());
    assert!(channel.is_subscribed(socket.id()));
    channel.unsubscribe(socket.id()).unwrap();
    assert!(!channel.is_subscribed(socket.id()));
}

#[test]
fn test_publish_stores_and_broadcasts() {
    let f = fixture();
    let keys = ServerKeys::generate();
    let channel = f.registry.add("/root/a/social/chirps", ChannelKind::Chirp);
    let (socket, mut rx) = client();
    channel.subscribe(socket);

    let msg = chirp(&keys, "hello");
    channel.publish(&msg, &AcceptAll, false).unwrap();

    let Ok(WsMessage::Text(text)) = rx.try_recv() else {
        panic!("Expected a text message");
    };
    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["method"], "broadcast");
    assert_eq!(frame["params"]["channel"], "/root/a/social/chirps");
    assert_eq!(frame["params"]["message"]["message_id"], msg.message_id.as_str());
    assert!(frame.get("id").is_none());

    assert_eq!(channel.catchup().unwrap(), vec![msg]);
}

#[test]
fn test_duplicate_publish_is_rejected() {
    let f = fixture();
    let keys = ServerKeys::generate();
    let channel = f.registry.add("/root/a/social/chirps", ChannelKind::Chirp);
    let msg = chirp(&keys, "once");

    channel.publish(&msg, &AcceptAll, false).unwrap();
    let err = channel.publish(&msg, &AcceptAll, false).unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(channel.catchup().unwrap().len(), 1);
}

#[test]
fn test_handler_rejection_stores_nothing() {
    let f = fixture();
    let keys = ServerKeys::generate();
    let channel = f.registry.add("/root/a", ChannelKind::Lao);
    let msg = chirp(&keys, "no");

    assert!(channel.publish(&msg, &RejectAll, false).is_err());
    assert!(channel.catchup().unwrap().is_empty());
}

#[test]
fn test_catchup_is_oldest_first() {
    let f = fixture();
    let keys = ServerKeys::generate();
    let channel = f.registry.add("/root/a/social/chirps", ChannelKind::Chirp);
    let msgs: Vec<Message> = (0..5).map(|i| chirp(&keys, &i.to_string())).collect();
    for m in &msgs {
        channel.publish(m, &AcceptAll, false).unwrap();
    }
    assert_eq!(channel.catchup().unwrap(), msgs);
}

#[test]
fn test_broadcast_does_not_persist() {
    let f = fixture();
    let keys = ServerKeys::generate();
    let channel = f.registry.add("/root/a", ChannelKind::Lao);
    let (socket, mut rx) = client();
    channel.subscribe(socket);

    channel.broadcast(&chirp(&keys, "push")).unwrap();
    assert!(rx.try_recv().is_ok());
    assert!(channel.catchup().unwrap().is_empty());
}

#[test]
fn test_unsubscribe_from_all() {
    let f = fixture();
    let a = f.registry.add("/root/a", ChannelKind::Lao);
    let b = f.registry.add("/root/b", ChannelKind::Lao);
    let (socket, _rx) = client();
    a.subscribe(socket.clone());
    b.subscribe(socket.clone());

    assert_eq!(f.registry.unsubscribe_from_all(socket.id()), 2);
    assert!(!a.is_subscribed(socket.id()));
    assert_eq!(f.registry.unsubscribe_from_all(socket.id()), 0);
}

#[test]
fn test_object_handler_checks_channel_kind() {
    let f = fixture();
    let keys = ServerKeys::generate();
    f.registry.add("/root/a/social/chirps", ChannelKind::Chirp);
    f.registry.add("/root/a/coin", ChannelKind::Coin);
    let handler = ObjectHandler::new(f.registry.clone());
    let msg = chirp(&keys, "x");

    assert!(handler.handle("/root/a/social/chirps", &msg, false).is_ok());
    let err = handler.handle("/root/a/coin", &msg, false).unwrap_err();
    assert!(matches!(err, HubError::InvalidMessageField(_)));
    let err = handler.handle("/root/missing", &msg, true).unwrap_err();
    assert!(matches!(err, HubError::ChannelNotFound(_)));
}

#[test]
fn test_standard_table() {
    let f = fixture();
    let table = HandlerTable::standard(
        f.registry.clone(),
        Arc::new(AcceptAll),
        Arc::new(WitnessHandler::new(f.repo.clone())),
    );
    assert!(table.get("lao", "create").is_ok());
    assert!(table.get("message", "witness").is_ok());
    assert!(table.get("chirp", "add").is_ok());
    assert!(table.get("federation", "challenge").is_ok());
    let err = table.get("chirp", "explode").err().unwrap();
    assert!(matches!(err, HubError::InvalidMessageField(_)));
}

fn lao_handler(f: &Fixture, keys: &ServerKeys, owner: Option<String>) -> LaoCreateHandler {
    let peers = Arc::new(PeerDirectory::new());
    peers.insert(GreetServerParams {
        public_key: "peer-key".into(),
        client_address: "ws://peer:9000/client".into(),
        server_address: "ws://peer:9001/server".into(),
    });
    LaoCreateHandler::new(
        f.repo.clone(),
        f.registry.clone(),
        keys.clone(),
        peers,
        owner,
        "ws://127.0.0.1:9000/client".into(),
    )
}

#[test]
fn test_lao_create_provisions_channels_and_greeting() {
    let f = fixture();
    let server = ServerKeys::generate();
    let organizer = ServerKeys::generate();
    let handler = lao_handler(&f, &server, Some(organizer.public_key()));

    let create = LaoCreate::new(&organizer.public_key(), "Conference", 1_700_000_000);
    let msg = organizer.sign_data(&create).unwrap();
    handler.handle(ROOT, &msg, false).unwrap();

    let lao_path = format!("/root/{}", create.id);
    for (path, kind) in lao_channels(&create.id) {
        assert_eq!(f.registry.get(&path).unwrap().kind(), kind);
        assert!(f.repo.has_channel(&path).unwrap());
    }
    assert!(f.registry.contains(&format!("{lao_path}/federation")));

    assert_eq!(f.registry.get(ROOT).unwrap().catchup().unwrap(), vec![msg.clone()]);
    let stored = f.registry.get(&lao_path).unwrap().catchup().unwrap();
    assert_eq!(stored.len(), 1);
    let greet = &stored[0];
    assert_eq!(greet.sender, server.public_key());
    assert!(greet.verify().is_ok());
    let data: LaoGreet = greet.unmarshal_data().unwrap();
    assert_eq!(data.lao, create.id);
    assert_eq!(data.frontend, organizer.public_key());
    assert_eq!(data.peers.len(), 1);
    assert_eq!(data.peers[0].address, "ws://peer:9000/client");

    let err = handler.handle(ROOT, &msg, false).unwrap_err();
    assert!(err.is_duplicate());
}

#[test]
fn test_lao_create_rejections() {
    let f = fixture();
    let server = ServerKeys::generate();
    let organizer = ServerKeys::generate();
    let intruder = ServerKeys::generate();

    let handler = lao_handler(&f, &server, Some(organizer.public_key()));

    // wrong id
    let mut bad = LaoCreate::new(&organizer.public_key(), "x", 1);
    bad.id = "forged".into();
    let err = handler
        .handle(ROOT, &organizer.sign_data(&bad).unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidAction(_)));

    // sender is not the organizer
    let create = LaoCreate::new(&organizer.public_key(), "x", 2);
    let err = handler
        .handle(ROOT, &intruder.sign_data(&create).unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, HubError::AccessDenied(_)));

    // organizer is not the owner
    let create = LaoCreate::new(&intruder.public_key(), "x", 3);
    let msg = intruder.sign_data(&create).unwrap();
    let err = handler.handle(ROOT, &msg, false).unwrap_err();
    assert!(matches!(err, HubError::AccessDenied(_)));

    // replicated organizations skip the owner check
    handler.handle(ROOT, &msg, true).unwrap();

    // only on /root
    let create = LaoCreate::new(&organizer.public_key(), "y", 4);
    let err = handler
        .handle("/root/other", &organizer.sign_data(&create).unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidMessageField(_)));
}

#[test]
fn test_witness_signature_is_recorded() {
    let f = fixture();
    let author_key = SigningKey::generate(&mut OsRng);
    let witness_key = SigningKey::generate(&mut OsRng);
    let author = ServerKeys::from_secret(&author_key.to_bytes());
    let witness = ServerKeys::from_secret(&witness_key.to_bytes());
    let channel = f.registry.add("/root/a/social/chirps", ChannelKind::Chirp);
    let msg = chirp(&author, "witness me");
    channel.publish(&msg, &AcceptAll, false).unwrap();

    let target = crate::message::message::decode_base64("id", &msg.message_id).unwrap();
    let data = WitnessMessage {
        object: "message".into(),
        action: "witness".into(),
        message_id: msg.message_id.clone(),
        signature: encode_base64(&witness_key.sign(&target).to_bytes()),
    };
    let witness_msg = witness.sign_data(&data).unwrap();

    let handler = WitnessHandler::new(f.repo.clone());
    handler
        .handle("/root/a/social/chirps", &witness_msg, false)
        .unwrap();

    let stored = channel.catchup().unwrap();
    assert_eq!(stored[0].witness_signatures.len(), 1);
    assert_eq!(stored[0].witness_signatures[0].witness, witness.public_key());

    let mut forged = data.clone();
    forged.signature = encode_base64(&author_key.sign(&target).to_bytes());
    let err = handler
        .handle("/root/a/social/chirps", &witness.sign_data(&forged).unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidMessageField(_)));
}
