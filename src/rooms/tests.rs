use futures::StreamExt;
use serde_json::json;

use super::{Order, Rooms};
use crate::{
	dbs::{WriteOp, WriteOpts},
	event::{canonical, Pdu},
	id::RoomId,
	test_utils::{env, pdu, seed_room, TestEnv},
};

async fn admit(t: &TestEnv, rooms: &Rooms, pdu: &Pdu) -> u64 {
	let json = canonical::to_vec(&pdu.to_object().unwrap()).unwrap();
	let idx = t.dbs.next_idx().await.unwrap();
	let opts = WriteOpts { op: WriteOp::Set, event_idx: idx, horizon_resolve: true, refs: true };

	let mut batch = t.db.batch();
	t.dbs.write(&mut batch, pdu, &json, &opts).await.unwrap();
	rooms.room(&pdu.room_id).advance_head(&mut batch, pdu, idx);
	batch.commit().unwrap();
	idx
}

#[tokio::test]
async fn seeded_room_views() {
	let t = env().await;
	let rooms = Rooms::new(&t.server, &t.dbs);
	let room_id = RoomId::parse("!r:x.example").unwrap();
	let (create, join, message) = seed_room("!r:x.example", "@alice:x.example");

	let create_idx = admit(&t, &rooms, &create).await;
	let join_idx = admit(&t, &rooms, &join).await;
	let message_idx = admit(&t, &rooms, &message).await;

	let room = rooms.room(&room_id);
	assert!(room.exists().await.unwrap());
	assert_eq!(room.version().await.unwrap().id, "10");

	// state cells
	assert_eq!(room.state_get("m.room.create", "").await.unwrap(), Some(create_idx));
	assert_eq!(
		room.state_get("m.room.member", "@alice:x.example").await.unwrap(),
		Some(join_idx),
	);

	// membership
	assert_eq!(room.member_count("join").await.unwrap(), 1);
	assert!(room.origins().await.unwrap().is_empty(), "alice is local");

	// head is the message only
	let heads = room.head_ids().await.unwrap();
	assert_eq!(heads.len(), 1);
	assert_eq!(heads[0].0, message_idx);
	assert_eq!(heads[0].1.as_str(), "$msg:x.example");

	// timeline order both ways
	let forward: Vec<_> = room
		.events(None, Order::Forward)
		.map(|r| r.unwrap().1)
		.collect()
		.await;
	assert_eq!(forward, vec![create_idx, join_idx, message_idx]);
	let reverse: Vec<_> = room
		.events(None, Order::Reverse)
		.map(|r| r.unwrap().1)
		.collect()
		.await;
	assert_eq!(reverse, vec![message_idx, join_idx, create_idx]);
	assert_eq!(room.event_count().await.unwrap(), 3);
	assert_eq!(room.max_depth().await.unwrap(), Some(3));

	// auth chain of the message: join and create, via join's own ancestry
	let chain = room.auth_chain(&[message_idx]).await.unwrap();
	assert_eq!(chain.len(), 2);
	assert!(chain.contains(&create_idx) && chain.contains(&join_idx));

	// fully connected room has no horizon
	assert!(room.horizon().await.unwrap().is_empty());
	assert!(room.sounding().await.unwrap().is_none());
}

#[tokio::test]
async fn state_overwrites_resolve_to_latest_depth() {
	let t = env().await;
	let rooms = Rooms::new(&t.server, &t.dbs);
	let room_id = RoomId::parse("!r:x.example").unwrap();
	let (create, join, _) = seed_room("!r:x.example", "@alice:x.example");

	admit(&t, &rooms, &create).await;
	let join_idx = admit(&t, &rooms, &join).await;

	let leave = pdu(
		"$leave:x.example",
		"!r:x.example",
		"@alice:x.example",
		"m.room.member",
		Some("@alice:x.example"),
		3,
		&["$join:x.example"],
		&["$create:x.example", "$join:x.example"],
		json!({ "membership": "leave" }),
	);
	let leave_idx = admit(&t, &rooms, &leave).await;

	let room = rooms.room(&room_id);
	assert_eq!(
		room.state_get("m.room.member", "@alice:x.example").await.unwrap(),
		Some(leave_idx),
	);
	assert_eq!(
		room.state_at("m.room.member", "@alice:x.example", 2).await.unwrap(),
		Some(join_idx),
		"historical bound sees the join",
	);
	assert_eq!(room.member_count("join").await.unwrap(), 0);
}

#[tokio::test]
async fn horizon_reports_gap_for_backfill() {
	let t = env().await;
	let rooms = Rooms::new(&t.server, &t.dbs);
	let room_id = RoomId::parse("!r:x.example").unwrap();

	let dangling = pdu(
		"$d:y.example",
		"!r:x.example",
		"@bob:y.example",
		"m.room.message",
		None,
		64,
		&["$unseen1:y.example", "$unseen2:y.example"],
		&[],
		json!({ "body": "from the future" }),
	);
	let idx = admit(&t, &rooms, &dangling).await;

	let room = rooms.room(&room_id);
	let horizon = room.horizon().await.unwrap();
	assert_eq!(horizon.len(), 2);

	let gap = room.sounding().await.unwrap().expect("gap exists");
	assert_eq!(gap.sounding, 64);
	assert_eq!(gap.twain, 63);
	assert_eq!(gap.anchors, vec![idx, idx]);
	assert_eq!(gap.missing.len(), 2);

	// bounded visitation honors the depth floor
	let mut seen = 0;
	room.missing_for_each(65, |_, _| {
		seen += 1;
		true
	})
	.await
	.unwrap();
	assert_eq!(seen, 0);

	room.missing_for_each(64, |_, _| {
		seen += 1;
		true
	})
	.await
	.unwrap();
	assert_eq!(seen, 2);
}

#[tokio::test]
async fn head_rebuild_matches_incremental() {
	let t = env().await;
	let rooms = Rooms::new(&t.server, &t.dbs);
	let room_id = RoomId::parse("!r:x.example").unwrap();
	let (create, join, message) = seed_room("!r:x.example", "@alice:x.example");

	admit(&t, &rooms, &create).await;
	admit(&t, &rooms, &join).await;
	let message_idx = admit(&t, &rooms, &message).await;

	let room = rooms.room(&room_id);
	let incremental = room.head_ids().await.unwrap();

	let rebuilt = room.rebuild_head().await.unwrap();
	assert_eq!(rebuilt, 1);
	let recomputed = room.head_ids().await.unwrap();
	assert_eq!(incremental, recomputed);
	assert_eq!(recomputed[0].0, message_idx);
}
