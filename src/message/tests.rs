use super::data::{LAO_OBJECT, LaoCreate};
use super::keys::ServerKeys;
use super::message::{Message, decode_base64, hash};
use crate::utils::HubError;

#[test]
fn test_hash_is_length_prefixed() {
    // "ab" + "c" and "a" + "bc" must not collide
    assert_ne!(hash(&["ab", "c"]), hash(&["a", "bc"]));
    assert_eq!(hash(&["x", "y"]), hash(&["x", "y"]));
}

#[test]
fn test_signed_message_verifies() {
    let keys = ServerKeys::generate();
    let msg = keys
        .sign_data(&LaoCreate::new(&keys.public_key(), "lao", 1_700_000_000))
        .unwrap();

    assert_eq!(msg.sender, keys.public_key());
    assert_eq!(msg.message_id, msg.expected_id());
    assert!(msg.verify().is_ok());

    let header = msg.header().unwrap();
    assert_eq!(header.object, LAO_OBJECT);
    assert_eq!(header.action, "create");
}

#[test]
fn test_wrong_message_id_is_rejected() {
    let keys = ServerKeys::generate();
    let mut msg = keys
        .sign_data(&serde_json::json!({"object": "chirp", "action": "add"}))
        .unwrap();
    msg.message_id = "bogus".to_string();

    let err = msg.verify().unwrap_err();
    assert!(matches!(err, HubError::InvalidMessageField(_)));
}

#[test]
fn test_tampered_signature_is_rejected() {
    let keys = ServerKeys::generate();
    let other = ServerKeys::generate();
    let mut msg = keys.sign_data(&serde_json::json!({"object": "chirp", "action": "add"})).unwrap();

    // signature from a different key, id recomputed so only the signature check fails
    let forged = other.sign_data(&serde_json::json!({"object": "chirp", "action": "add"})).unwrap();
    msg.signature = forged.signature;
    msg.message_id = msg.expected_id();

    assert!(msg.verify().is_err());
}

#[test]
fn test_lao_id_matches_hash_of_fields() {
    let lao = LaoCreate::new("organizer", "name", 42);
    assert_eq!(lao.id, hash(&["organizer", "42", "name"]));
    assert_eq!(lao.id, lao.expected_id());
}

#[test]
fn test_keys_roundtrip_through_secret() {
    let keys = ServerKeys::generate();
    let restored = ServerKeys::from_secret(&keys.secret_bytes());
    assert_eq!(keys.public_key(), restored.public_key());
}

#[test]
fn test_decode_base64_reports_field() {
    let err = decode_base64("sender", "***").unwrap_err();
    assert!(err.to_string().contains("sender"));
}

#[test]
fn test_message_without_witness_signatures_deserializes() {
    let json = r#"{"message_id":"a","data":"b","sender":"c","signature":"d"}"#;
    let msg: Message = serde_json::from_str(json).unwrap();
    assert!(msg.witness_signatures.is_empty());
}
