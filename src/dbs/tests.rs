use futures::StreamExt;
use serde_json::json;

use super::{keys, RefType, WriteOp, WriteOpts};
use crate::{
	database::stream,
	event::canonical,
	test_utils::{env, pdu, seed_room},
};

fn opts(event_idx: u64) -> WriteOpts {
	WriteOpts { op: WriteOp::Set, event_idx, horizon_resolve: true, refs: true }
}

#[tokio::test]
async fn idx_allocation_is_monotonic() {
	let t = env().await;
	let a = t.dbs.next_idx().await.unwrap();
	let b = t.dbs.next_idx().await.unwrap();
	let c = t.dbs.next_idx().await.unwrap();
	assert!(a < b && b < c);
	assert_eq!(a, 1, "counters start at one; zero means no event");
}

#[tokio::test]
async fn index_and_payload_agree() {
	let t = env().await;
	let (create, ..) = seed_room("!r:x.example", "@alice:x.example");
	let json = canonical::to_vec(&create.to_object().unwrap()).unwrap();

	let idx = t.dbs.next_idx().await.unwrap();
	let mut batch = t.db.batch();
	t.dbs.write(&mut batch, &create, &json, &opts(idx)).await.unwrap();
	batch.commit().unwrap();

	// _event_id -> event_idx -> _event_json round trip
	assert_eq!(t.dbs.idx_of(&create.event_id).await.unwrap(), Some(idx));
	let stored = t.dbs.idx_json.get(&keys::idx_key(idx)).await.unwrap().unwrap();
	assert_eq!(stored, json, "re-read yields byte-identical canonical json");

	// field columns agree with the payload
	let key = keys::idx_key(idx);
	assert_eq!(t.dbs.idx_type.get(&key).await.unwrap().unwrap(), b"m.room.create");
	assert_eq!(
		t.dbs.idx_sender.get(&key).await.unwrap().unwrap(),
		b"@alice:x.example"
	);
	assert_eq!(t.dbs.idx_depth.get(&key).await.unwrap().unwrap(), 1u64.to_be_bytes());

	// composite state cell points back at the idx
	let cell = keys::room_state_key("!r:x.example", "m.room.create", "", 1);
	assert_eq!(t.dbs.room_state.get(&cell).await.unwrap().unwrap(), key);
}

#[tokio::test]
async fn unknown_ancestors_become_horizon_rows() {
	let t = env().await;
	let orphan = pdu(
		"$orphan:x.example",
		"!r:x.example",
		"@alice:x.example",
		"m.room.message",
		None,
		9,
		&["$missing:y.example"],
		&["$also_missing:y.example"],
		json!({ "body": "dangling" }),
	);
	let json = canonical::to_vec(&orphan.to_object().unwrap()).unwrap();

	let idx = t.dbs.next_idx().await.unwrap();
	let mut batch = t.db.batch();
	t.dbs.write(&mut batch, &orphan, &json, &opts(idx)).await.unwrap();
	batch.commit().unwrap();

	let rows: Vec<_> = stream::stream_prefix(
		t.dbs.event_horizon.clone(),
		keys::horizon_prefix("$missing:y.example"),
	)
	.map(|kv| kv.unwrap())
	.collect()
	.await;
	assert_eq!(rows.len(), 1);
	let (_, referrer) = keys::horizon_parse(&rows[0].0).unwrap();
	assert_eq!(referrer, idx);
	assert_eq!(rows[0].1, [RefType::Prev as u8]);
}

#[tokio::test]
async fn arriving_event_resolves_its_horizon_rows() {
	let t = env().await;

	// the referrer arrives first, naming an unseen prev
	let late = pdu(
		"$late:x.example",
		"!r:x.example",
		"@alice:x.example",
		"m.room.message",
		None,
		5,
		&["$early:x.example"],
		&[],
		json!({ "body": "second" }),
	);
	let late_json = canonical::to_vec(&late.to_object().unwrap()).unwrap();
	let late_idx = t.dbs.next_idx().await.unwrap();
	let mut batch = t.db.batch();
	t.dbs.write(&mut batch, &late, &late_json, &opts(late_idx)).await.unwrap();
	batch.commit().unwrap();

	// now the missing ancestor arrives
	let early = pdu(
		"$early:x.example",
		"!r:x.example",
		"@alice:x.example",
		"m.room.message",
		None,
		4,
		&[],
		&[],
		json!({ "body": "first" }),
	);
	let early_json = canonical::to_vec(&early.to_object().unwrap()).unwrap();
	let early_idx = t.dbs.next_idx().await.unwrap();
	let mut batch = t.db.batch();
	t.dbs
		.write(&mut batch, &early, &early_json, &opts(early_idx))
		.await
		.unwrap();
	batch.commit().unwrap();

	// horizon cleared
	let remaining: Vec<_> = stream::stream_prefix(
		t.dbs.event_horizon.clone(),
		keys::horizon_prefix("$early:x.example"),
	)
	.collect()
	.await;
	assert!(remaining.is_empty());

	// forward reference promoted in its place
	let refs: Vec<_> = stream::stream_prefix(
		t.dbs.event_refs.clone(),
		keys::refs_prefix(early_idx),
	)
	.map(|kv| kv.unwrap())
	.collect()
	.await;
	assert_eq!(refs.len(), 1);
	assert_eq!(
		keys::refs_parse(&refs[0].0).unwrap(),
		(early_idx, RefType::Prev, late_idx),
	);
}

#[tokio::test]
async fn delete_removes_every_cell() {
	let t = env().await;
	let (create, ..) = seed_room("!r:x.example", "@alice:x.example");
	let json = canonical::to_vec(&create.to_object().unwrap()).unwrap();

	let idx = t.dbs.next_idx().await.unwrap();
	let mut batch = t.db.batch();
	t.dbs.write(&mut batch, &create, &json, &opts(idx)).await.unwrap();
	batch.commit().unwrap();

	let mut batch = t.db.batch();
	let del = WriteOpts { op: WriteOp::Delete, event_idx: idx, horizon_resolve: false, refs: true };
	t.dbs.write(&mut batch, &create, &json, &del).await.unwrap();
	batch.commit().unwrap();

	assert_eq!(t.dbs.idx_of(&create.event_id).await.unwrap(), None);
	assert!(t.dbs.idx_json.get(&keys::idx_key(idx)).await.unwrap().is_none());
	let cell = keys::room_state_key("!r:x.example", "m.room.create", "", 1);
	assert!(t.dbs.room_state.get(&cell).await.unwrap().is_none());
}
