use std::sync::Arc;

use serde_json::{json, Value};

use super::{Opts, Outcome, Phase, Vm};
use crate::{
	config,
	event::{canonical::CanonicalObject, content_hash, event_id_for, Builder, RoomVersion},
	id::{EventId, RoomId, UserId},
	services::Services,
	Server,
};

async fn services() -> (Arc<Services>, tempfile::TempDir) {
	let dir = tempfile::tempdir().expect("tempdir");
	let server = Server::new(config::test(dir.path()));
	let services = Services::open(&server, reqwest::Client::new())
		.await
		.expect("services open");
	(services, dir)
}

fn alice() -> UserId { UserId::parse("@alice:test.local").unwrap() }

/// Build a federation-style wire object (no event_id, hash-derived id) and
/// return it with the id the evaluator will derive.
fn fed_object(
	room_id: &RoomId,
	sender: &str,
	kind: &str,
	state_key: Option<&str>,
	depth: u64,
	prevs: &[&EventId],
	auths: &[&EventId],
	content: Value,
) -> (CanonicalObject, EventId) {
	let mut object = match json!({
		"room_id": room_id.as_str(),
		"sender": sender,
		"origin": sender.split_once(':').unwrap().1,
		"origin_server_ts": 1_700_000_000_000u64,
		"type": kind,
		"content": content,
		"depth": depth,
		"prev_events": prevs.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
		"auth_events": auths.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
	}) {
		Value::Object(object) => object,
		_ => unreachable!(),
	};
	if let Some(state_key) = state_key {
		object.insert("state_key".to_owned(), json!(state_key));
	}

	let sha256 = content_hash(&object).unwrap();
	object.insert("hashes".to_owned(), json!({ "sha256": sha256 }));

	let version = RoomVersion::from_id("10").unwrap();
	let origin = crate::id::ServerName::parse("test.local").unwrap();
	let event_id = event_id_for(&object, &version, &origin).unwrap();
	(object, event_id)
}

/// Federation options with the network-dependent phases opted out.
fn offline_opts() -> Opts {
	Opts {
		verify: false,
		fetch_auth: false,
		fetch_prev: false,
		fetch_state: false,
		..Opts::default()
	}
}

/// Seed a room through the authoring path: create, creator join.
async fn seed(vm: &Vm) -> RoomId {
	let room_id = RoomId::parse("!r:test.local").unwrap();

	let create = Builder::state(
		"m.room.create",
		"",
		json!({ "creator": alice().as_str(), "room_version": "10" }),
	);
	assert!(vm.author(&room_id, &alice(), create, &Opts::local()).await.unwrap().is_accepted());

	let join = Builder::state(
		"m.room.member",
		alice().as_str(),
		json!({ "membership": "join" }),
	);
	assert!(vm.author(&room_id, &alice(), join, &Opts::local()).await.unwrap().is_accepted());

	room_id
}

#[tokio::test]
async fn local_create_join_message() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;

	let message = Builder::message("hello");
	let outcome = vm.author(&room_id, &alice(), message, &Opts::local()).await.unwrap();
	assert!(outcome.is_accepted());

	let room = services.rooms.room(&room_id);
	assert_eq!(room.member_count("join").await.unwrap(), 1);
	assert_eq!(room.event_count().await.unwrap(), 3);

	// the create cell points at the first event of the room
	let create_idx = room.state_get("m.room.create", "").await.unwrap().unwrap();
	let create = services.rooms.events.get(create_idx).await.unwrap();
	assert_eq!(create.kind, "m.room.create");
	assert_eq!(create.depth, 1);

	// head is the message alone
	let heads = room.head_ids().await.unwrap();
	assert_eq!(heads.len(), 1);
	assert_eq!(Some(heads[0].0), outcome.accepted_idx());
}

#[tokio::test]
async fn out_of_order_arrival_defers_then_accepts() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;
	let room = services.rooms.room(&room_id);

	let heads = room.head_ids().await.unwrap();
	let join_id = heads[0].1.clone();
	let create_idx = room.state_get("m.room.create", "").await.unwrap().unwrap();
	let create_id = services.rooms.events.get(create_idx).await.unwrap().event_id.clone();

	let (m1, m1_id) = fed_object(
		&room_id,
		alice().as_str(),
		"m.room.message",
		None,
		3,
		&[&join_id],
		&[&create_id, &join_id],
		json!({ "msgtype": "m.text", "body": "first" }),
	);
	let (m2, m2_id) = fed_object(
		&room_id,
		alice().as_str(),
		"m.room.message",
		None,
		4,
		&[&m1_id],
		&[&create_id, &join_id],
		json!({ "msgtype": "m.text", "body": "second" }),
	);

	// the later message arrives first and must defer on its ancestry
	let outcome = vm.eval(m2.clone(), &offline_opts()).await.unwrap();
	match outcome {
		Outcome::Deferred { phase, awaiting } => {
			assert_eq!(phase, Phase::FetchPrev);
			assert_eq!(awaiting, vec![m1_id.clone()]);
		},
		other => panic!("expected deferral, got {other:?}"),
	}

	// the ancestor arrives; both evaluations now accept
	assert!(vm.eval(m1, &offline_opts()).await.unwrap().is_accepted());
	let retry = vm.eval(m2, &offline_opts()).await.unwrap();
	assert!(retry.is_accepted());

	let heads = room.head_ids().await.unwrap();
	assert_eq!(heads.len(), 1);
	assert_eq!(heads[0].1, m2_id);
	assert_eq!(room.event_count().await.unwrap(), 4);
}

#[tokio::test]
async fn forged_signature_writes_nothing() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;
	let room = services.rooms.room(&room_id);

	let heads = room.head_ids().await.unwrap();
	let join_id = heads[0].1.clone();
	let create_idx = room.state_get("m.room.create", "").await.unwrap().unwrap();
	let create_id = services.rooms.events.get(create_idx).await.unwrap().event_id.clone();

	let (mut object, event_id) = fed_object(
		&room_id,
		alice().as_str(),
		"m.room.message",
		None,
		3,
		&[&join_id],
		&[&create_id, &join_id],
		json!({ "msgtype": "m.text", "body": "trust me" }),
	);

	// a signature by the right key id but the wrong key
	let key_id = format!("ed25519:{}", services.keys.key_name());
	object.insert(
		"signatures".to_owned(),
		json!({ "test.local": { (key_id): "3fRrhUab7nHKaxmx4PurV9a4hzNov7HU1V8mPKGzVnNDLGbKi8TJpDDIa7JJ5pVJ8uFhLNY5lDnJwTBUvNFMDA" } }),
	);

	let opts = Opts { verify: true, ..offline_opts() };
	let outcome = vm.eval(object, &opts).await.unwrap();
	match outcome {
		Outcome::Rejected { phase, error } => {
			assert_eq!(phase, Phase::Verify);
			assert!(matches!(error, crate::Error::Verify(_)));
		},
		other => panic!("expected verify rejection, got {other:?}"),
	}

	// no rows became visible
	assert_eq!(services.dbs.idx_of(&event_id).await.unwrap(), None);
	assert_eq!(room.event_count().await.unwrap(), 2);
}

#[tokio::test]
async fn power_over_raise_rejected_in_pipeline() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;

	// alice caps herself at 50
	let levels = Builder::state(
		"m.room.power_levels",
		"",
		json!({ "users": { "@alice:test.local": 50 } }),
	);
	assert!(vm.author(&room_id, &alice(), levels, &Opts::local()).await.unwrap().is_accepted());

	// then tries to mint a 100 for bob
	let over_raise = Builder::state(
		"m.room.power_levels",
		"",
		json!({ "users": { "@alice:test.local": 50, "@bob:test.local": 100 } }),
	);
	let outcome = vm.author(&room_id, &alice(), over_raise, &Opts::local()).await.unwrap();
	match outcome {
		Outcome::Rejected { phase, error } => {
			assert_eq!(phase, Phase::AuthRela);
			assert!(matches!(error, crate::Error::Auth { rule: 10, .. }));
		},
		other => panic!("expected rule 10 rejection, got {other:?}"),
	}

	// no state change
	let room = services.rooms.room(&room_id);
	let pl_idx = room.state_get("m.room.power_levels", "").await.unwrap().unwrap();
	let pl = services.rooms.events.get(pl_idx).await.unwrap();
	assert_eq!(pl.content["users"], json!({ "@alice:test.local": 50 }));
}

#[tokio::test]
async fn replay_is_idempotent() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;
	let room = services.rooms.room(&room_id);

	let heads = room.head_ids().await.unwrap();
	let join_id = heads[0].1.clone();
	let create_idx = room.state_get("m.room.create", "").await.unwrap().unwrap();
	let create_id = services.rooms.events.get(create_idx).await.unwrap().event_id.clone();

	let (object, _) = fed_object(
		&room_id,
		alice().as_str(),
		"m.room.message",
		None,
		3,
		&[&join_id],
		&[&create_id, &join_id],
		json!({ "msgtype": "m.text", "body": "once" }),
	);

	let first = vm.eval(object.clone(), &offline_opts()).await.unwrap();
	let second = vm.eval(object, &offline_opts()).await.unwrap();
	assert!(first.is_accepted() && second.is_accepted());
	assert_eq!(first.accepted_idx(), second.accepted_idx());
	assert_eq!(room.event_count().await.unwrap(), 3, "second evaluation left the db unchanged");
}

#[tokio::test]
async fn unjoined_sender_rejected_in_pipeline() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;
	let room = services.rooms.room(&room_id);

	let create_idx = room.state_get("m.room.create", "").await.unwrap().unwrap();
	let create_id = services.rooms.events.get(create_idx).await.unwrap().event_id.clone();

	let (object, _) = fed_object(
		&room_id,
		"@mallory:test.local",
		"m.room.message",
		None,
		3,
		&[&create_id],
		&[&create_id],
		json!({ "msgtype": "m.text", "body": "let me in" }),
	);

	let outcome = vm.eval(object, &offline_opts()).await.unwrap();
	match outcome {
		Outcome::Rejected { phase, error } => {
			assert_eq!(phase, Phase::AuthRela);
			assert!(matches!(error, crate::Error::Auth { rule: 6, .. }));
		},
		other => panic!("expected rule 6 rejection, got {other:?}"),
	}
}

#[tokio::test]
async fn backfilled_chain_reconciles_with_live_event() {
	let (services, _dir) = services().await;
	let vm = services.vm();
	let room_id = seed(&vm).await;
	let room = services.rooms.room(&room_id);

	let heads = room.head_ids().await.unwrap();
	let join_id = heads[0].1.clone();
	let create_idx = room.state_get("m.room.create", "").await.unwrap().unwrap();
	let create_id = services.rooms.events.get(create_idx).await.unwrap().event_id.clone();

	// a backfill bundle: 62 messages forming a chain behind the join
	let mut prev = join_id.clone();
	for i in 0..62u64 {
		let (object, event_id) = fed_object(
			&room_id,
			alice().as_str(),
			"m.room.message",
			None,
			3 + i,
			&[&prev],
			&[&create_id, &join_id],
			json!({ "msgtype": "m.text", "body": format!("history {i}") }),
		);
		assert!(vm.eval(object, &offline_opts()).await.unwrap().is_accepted());
		prev = event_id;
	}
	assert_eq!(room.event_count().await.unwrap(), 64);

	// live receipt referencing the last backfilled event
	let (live, live_id) = fed_object(
		&room_id,
		alice().as_str(),
		"m.room.message",
		None,
		65,
		&[&prev],
		&[&create_id, &join_id],
		json!({ "msgtype": "m.text", "body": "now" }),
	);
	assert!(vm.eval(live, &offline_opts()).await.unwrap().is_accepted());

	assert_eq!(room.event_count().await.unwrap(), 65);
	let heads = room.head_ids().await.unwrap();
	assert_eq!(heads.len(), 1);
	assert_eq!(heads[0].1, live_id);
	assert!(room.horizon().await.unwrap().is_empty());
}
