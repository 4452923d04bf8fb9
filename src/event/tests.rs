use ed25519_dalek::SigningKey;
use serde_json::json;

use super::*;
use crate::id::{EventId, ServerName};

fn version(id: &str) -> RoomVersion { RoomVersion::from_id(id).unwrap() }

fn test_key() -> SigningKey { SigningKey::from_bytes(&[7u8; 32]) }

fn base_object() -> CanonicalObject {
	let value = json!({
		"type": "m.room.message",
		"room_id": "!r:x.example",
		"sender": "@alice:x.example",
		"origin": "x.example",
		"origin_server_ts": 1_700_000_000_000u64,
		"depth": 3,
		"prev_events": ["$prev"],
		"auth_events": ["$auth"],
		"content": { "msgtype": "m.text", "body": "hello" },
	});
	match value {
		serde_json::Value::Object(object) => object,
		_ => unreachable!(),
	}
}

#[test]
fn content_hash_ignores_stripped_members() {
	let mut object = base_object();
	let before = content_hash(&object).unwrap();

	object.insert("unsigned".into(), json!({ "age": 4 }));
	object.insert("signatures".into(), json!({ "x.example": {} }));
	let after = content_hash(&object).unwrap();

	assert_eq!(before, after);
}

#[test]
fn hash_closure() {
	let mut object = base_object();
	let sha256 = content_hash(&object).unwrap();
	object.insert("hashes".into(), json!({ "sha256": sha256 }));

	verify_content_hash(&object).unwrap();

	// perturb content, closure must break
	object.insert("content".into(), json!({ "body": "tampered" }));
	assert!(verify_content_hash(&object).is_err());
}

#[test]
fn signature_closure() {
	let key = test_key();
	let mut object = base_object();
	sign_object(&mut object, "x.example", "a_key", &key).unwrap();

	verify_signature(&object, "x.example", "ed25519:a_key", &key.verifying_key()).unwrap();
}

#[test]
fn forged_signature_rejected() {
	let key = test_key();
	let mut object = base_object();
	sign_object(&mut object, "x.example", "a_key", &key).unwrap();

	// flip one byte of the encoded signature
	let sig = object["signatures"]["x.example"]["ed25519:a_key"]
		.as_str()
		.unwrap()
		.to_owned();
	let mut forged = sig.into_bytes();
	forged[10] = if forged[10] == b'A' { b'B' } else { b'A' };
	object["signatures"]["x.example"]["ed25519:a_key"] =
		json!(String::from_utf8(forged).unwrap());

	let err = verify_signature(&object, "x.example", "ed25519:a_key", &key.verifying_key());
	assert!(matches!(err, Err(crate::Error::Verify(_))));
}

#[test]
fn signing_preimage_excludes_unsigned() {
	let mut object = base_object();
	let before = signing_preimage(&object).unwrap();
	object.insert("unsigned".into(), json!({ "age": 99 }));
	assert_eq!(before, signing_preimage(&object).unwrap());
}

#[test]
fn event_id_dialects() {
	let server = ServerName::parse("x.example").unwrap();
	let object = base_object();

	let v2 = event_id_for(&object, &version("2"), &server).unwrap();
	assert_eq!(v2.hostname(), Some("x.example"));

	let v3 = event_id_for(&object, &version("3"), &server).unwrap();
	assert!(v3.is_reference_hash());

	let v4 = event_id_for(&object, &version("4"), &server).unwrap();
	assert!(v4.is_reference_hash());
	assert!(!v4.contains('+') && !v4.contains('/'));

	// identical essential content derives the identical id
	assert_eq!(v4, event_id_for(&object, &version("4"), &server).unwrap());
}

#[test]
fn redaction_mask_message() {
	let object = base_object();
	let stripped = essential(&object, &version("6")).unwrap();
	assert!(stripped["content"].as_object().unwrap().is_empty());
	assert_eq!(stripped["type"], "m.room.message");
}

#[test]
fn redaction_mask_member_and_power() {
	let mut object = base_object();
	object.insert("type".into(), json!("m.room.member"));
	object.insert("state_key".into(), json!("@bob:x.example"));
	object.insert(
		"content".into(),
		json!({ "membership": "join", "displayname": "Bob", "join_authorised_via_users_server": "@mod:y.example" }),
	);

	let v6 = essential(&object, &version("6")).unwrap();
	assert_eq!(v6["content"], json!({ "membership": "join" }));

	let v9 = essential(&object, &version("9")).unwrap();
	assert_eq!(
		v9["content"],
		json!({ "membership": "join", "join_authorised_via_users_server": "@mod:y.example" }),
	);

	object.insert("type".into(), json!("m.room.power_levels"));
	object.insert("content".into(), json!({ "invite": 50, "users_default": 0, "notifications": {} }));
	let v10 = essential(&object, &version("10")).unwrap();
	assert_eq!(v10["content"], json!({ "users_default": 0 }));
	let v11 = essential(&object, &version("11")).unwrap();
	assert_eq!(v11["content"], json!({ "invite": 50, "users_default": 0 }));
}

#[test]
fn redaction_mask_create_v11_keeps_content() {
	let mut object = base_object();
	object.insert("type".into(), json!("m.room.create"));
	object.insert("content".into(), json!({ "room_version": "11", "org.example.custom": true }));

	let v10 = essential(&object, &version("10")).unwrap();
	assert_eq!(v10["content"], json!({}));

	let v11 = essential(&object, &version("11")).unwrap();
	assert_eq!(v11["content"], json!({ "room_version": "11", "org.example.custom": true }));
}

#[test]
fn pdu_round_trip() {
	let event_id = EventId::parse("$ev:x.example").unwrap();
	let pdu = Pdu::from_id_object(&event_id, base_object()).unwrap();
	assert_eq!(pdu.event_id, event_id);
	assert_eq!(pdu.kind, "m.room.message");
	assert!(!pdu.is_state());

	let object = pdu.to_object().unwrap();
	let again = Pdu::from_id_object(&event_id, object).unwrap();
	assert_eq!(pdu, again);
	assert_eq!(again.depth, 3);
}

#[test]
fn wire_object_omits_id_in_hash_versions() {
	let event_id = EventId::parse("$ev:x.example").unwrap();
	let pdu = Pdu::from_id_object(&event_id, base_object()).unwrap();

	assert!(pdu.to_wire_object(&version("1")).unwrap().contains_key("event_id"));
	assert!(!pdu.to_wire_object(&version("6")).unwrap().contains_key("event_id"));
}

#[test]
fn conform_caps() {
	let event_id = EventId::parse("$ev:x.example").unwrap();
	let mut object = base_object();
	object.insert("hashes".into(), json!({ "sha256": "aGFzaA" }));
	let mut pdu = Pdu::from_id_object(&event_id, object).unwrap();

	pdu.conform(1024).unwrap();
	assert!(pdu.conform(MAX_SIZE + 1).is_err());

	pdu.kind = "x".repeat(TYPE_MAX_SIZE + 1);
	assert!(pdu.conform(1024).is_err());
	pdu.kind = "m.room.message".into();

	pdu.state_key = Some("k".repeat(STATE_KEY_MAX_SIZE + 1));
	assert!(pdu.conform(1024).is_err());
	pdu.state_key = None;

	pdu.prev_events.clear();
	assert!(pdu.conform(1024).is_err());
}
