//! Shared fixtures for module tests.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
	config,
	database::Database,
	dbs::{self, Dbs},
	event::{content_hash, EventRef, Pdu},
	id::{EventId, RoomId, UserId},
	Server,
};

pub(crate) struct TestEnv {
	pub server: Arc<Server>,
	pub db: Arc<Database>,
	pub dbs: Arc<Dbs>,
	_dir: tempfile::TempDir,
}

pub(crate) async fn env() -> TestEnv {
	let dir = tempfile::tempdir().expect("tempdir");
	let server = Server::new(config::test(dir.path()));
	let db = Database::open(&server, dbs::MAPS).await.expect("open");
	let dbs = Dbs::new(&db);
	TestEnv { server, db, dbs, _dir: dir }
}

/// A structurally-valid pdu with a correct content hash; signatures are
/// absent unless a test signs it.
pub(crate) fn pdu(
	event_id: &str,
	room_id: &str,
	sender: &str,
	kind: &str,
	state_key: Option<&str>,
	depth: u64,
	prev_events: &[&str],
	auth_events: &[&str],
	content: Value,
) -> Pdu {
	let mut pdu = Pdu {
		event_id: EventId::parse(event_id).expect("test event id"),
		room_id: RoomId::parse(room_id).expect("test room id"),
		sender: UserId::parse(sender).expect("test user id"),
		origin: None,
		origin_server_ts: 1_700_000_000_000,
		kind: kind.to_owned(),
		content,
		state_key: state_key.map(str::to_owned),
		prev_events: prev_events
			.iter()
			.map(|id| EventRef::bare(EventId::parse(id).expect("test prev id")))
			.collect(),
		prev_state: None,
		depth,
		auth_events: auth_events
			.iter()
			.map(|id| EventRef::bare(EventId::parse(id).expect("test auth id")))
			.collect(),
		redacts: None,
		unsigned: None,
		hashes: None,
		signatures: None,
	};

	let object = pdu.to_object().expect("to object");
	let sha256 = content_hash(&object).expect("content hash");
	pdu.hashes = Some(crate::event::EventHash { sha256 });
	pdu
}

/// The canonical first events of a test room: create, creator join, and a
/// message, wired with correct ancestry.
pub(crate) fn seed_room(room_id: &str, creator: &str) -> (Pdu, Pdu, Pdu) {
	let create = pdu(
		"$create:x.example",
		room_id,
		creator,
		"m.room.create",
		Some(""),
		1,
		&[],
		&[],
		json!({ "creator": creator, "room_version": "10" }),
	);
	let join = pdu(
		"$join:x.example",
		room_id,
		creator,
		"m.room.member",
		Some(creator),
		2,
		&["$create:x.example"],
		&["$create:x.example"],
		json!({ "membership": "join" }),
	);
	let message = pdu(
		"$msg:x.example",
		room_id,
		creator,
		"m.room.message",
		None,
		3,
		&["$join:x.example"],
		&["$create:x.example", "$join:x.example"],
		json!({ "msgtype": "m.text", "body": "hello" }),
	);
	(create, join, message)
}
