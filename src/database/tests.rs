use std::sync::Arc;

use futures::StreamExt;

use super::{descriptor, stream, Database, Direction};
use crate::{config, Server};

const TEST_MAPS: &[descriptor::Descriptor] = &[
	descriptor::Descriptor { name: "alpha", ..descriptor::RANDOM },
	descriptor::Descriptor { name: "beta", ..descriptor::SEQUENTIAL },
];

async fn open() -> (Arc<Database>, tempfile::TempDir) {
	let dir = tempfile::tempdir().expect("tempdir");
	let server = Server::new(config::test(dir.path()));
	let db = Database::open(&server, TEST_MAPS).await.expect("open");
	(db, dir)
}

#[tokio::test]
async fn point_reads_round_trip() {
	let (db, _dir) = open().await;
	let alpha = db["alpha"].clone();

	alpha.insert(b"k1", b"v1").unwrap();
	assert_eq!(alpha.get(b"k1").await.unwrap().as_deref(), Some(&b"v1"[..]));
	assert_eq!(alpha.get(b"absent").await.unwrap(), None);
	assert!(alpha.has(b"k1").await.unwrap());

	alpha.remove(b"k1").unwrap();
	assert_eq!(alpha.get(b"k1").await.unwrap(), None);
}

#[tokio::test]
async fn batch_is_atomic_across_columns() {
	let (db, _dir) = open().await;
	let alpha = db["alpha"].clone();
	let beta = db["beta"].clone();

	let mut batch = db.batch();
	batch.put(&alpha, b"a", b"1");
	batch.put(&beta, b"b", b"2");
	batch.delete(&alpha, b"missing");
	assert_eq!(batch.len(), 3);
	batch.commit().unwrap();

	assert_eq!(alpha.get(b"a").await.unwrap().as_deref(), Some(&b"1"[..]));
	assert_eq!(beta.get(b"b").await.unwrap().as_deref(), Some(&b"2"[..]));
}

#[tokio::test]
async fn snapshot_fixes_sequence() {
	let (db, _dir) = open().await;
	let alpha = db["alpha"].clone();

	alpha.insert(b"k", b"old").unwrap();
	let snapshot = db.snapshot();
	alpha.insert(b"k", b"new").unwrap();

	let cf = db.engine.cf("alpha");
	let before = snapshot.get_cf(&cf, b"k").unwrap();
	assert_eq!(before.as_deref(), Some(&b"old"[..]));
	assert_eq!(alpha.get(b"k").await.unwrap().as_deref(), Some(&b"new"[..]));
}

#[tokio::test]
async fn streams_preserve_order() {
	let (db, _dir) = open().await;
	let beta = db["beta"].clone();

	for i in 0u16..200 {
		beta.insert(&i.to_be_bytes(), b"x").unwrap();
	}

	let forward: Vec<_> = stream::stream_from(beta.clone(), None, Direction::Forward)
		.map(|kv| kv.unwrap().0)
		.collect()
		.await;
	assert_eq!(forward.len(), 200);
	assert!(forward.windows(2).all(|w| w[0] < w[1]));

	let reverse: Vec<_> = stream::stream_from(beta.clone(), None, Direction::Reverse)
		.map(|kv| kv.unwrap().0)
		.collect()
		.await;
	assert_eq!(reverse.len(), 200);
	assert!(reverse.windows(2).all(|w| w[0] > w[1]));
}

#[tokio::test]
async fn prefix_scans_stop_at_boundary() {
	let (db, _dir) = open().await;
	let alpha = db["alpha"].clone();

	alpha.insert(b"room1\xFFa", b"1").unwrap();
	alpha.insert(b"room1\xFFb", b"2").unwrap();
	alpha.insert(b"room2\xFFa", b"3").unwrap();

	let hits: Vec<_> = stream::stream_prefix(alpha.clone(), b"room1\xFF".to_vec())
		.map(|kv| kv.unwrap())
		.collect()
		.await;
	assert_eq!(hits.len(), 2);

	let mut upper = b"room1\xFF".to_vec();
	upper.extend_from_slice(&[0xFF; 9]);
	let last = stream::rev_stream_prefix(alpha.clone(), b"room1\xFF".to_vec(), upper)
		.next()
		.await
		.unwrap()
		.unwrap();
	assert_eq!(last.0, b"room1\xFFb");
}

#[tokio::test]
async fn watch_prefix_wakes_on_write() {
	let (db, _dir) = open().await;
	let alpha = db["alpha"].clone();

	let watch = alpha.watch_prefix(b"pre");
	alpha.insert(b"prefix-key", b"v").unwrap();
	tokio::time::timeout(std::time::Duration::from_secs(5), watch)
		.await
		.expect("watcher woke");
}

#[tokio::test]
async fn undescribed_on_disk_column_is_an_error() {
	let dir = tempfile::tempdir().expect("tempdir");
	let server = Server::new(config::test(dir.path()));
	drop(Database::open(&server, TEST_MAPS).await.expect("first open"));

	const FEWER: &[descriptor::Descriptor] =
		&[descriptor::Descriptor { name: "alpha", ..descriptor::RANDOM }];
	let err = Database::open(&server, FEWER).await;
	assert!(err.is_err(), "dropping a described column must fail the open");
}
