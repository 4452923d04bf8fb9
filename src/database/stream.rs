//! Async iteration over a column.
//!
//! A stream advances in bounded chunks. Each chunk begins with a fresh
//! non-blocking seek to the resume key; if the chunk fill reports
//! `incomplete` the same seek is offloaded to the pool's blocking tier and
//! the stream suspends. Because a seek is idempotent with respect to
//! (snapshot, key), the cursor survives cache displacement during the
//! offload: the next chunk simply re-seeks from the last key returned.

use std::sync::Arc;

use futures::{stream, Stream, StreamExt};

use super::{
	map::{KeyVal, Map},
	pool,
};
use crate::Result;

const CHUNK: usize = 64;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Direction {
	#[default]
	Forward,
	Reverse,
}

struct Cursor {
	map: Arc<Map>,
	/// Seek target for the next chunk; `None` before the first chunk means
	/// seek-to-first (or -last in reverse).
	from: Option<Vec<u8>>,
	dir: Direction,
	/// The first chunk includes the seek key itself; later chunks resume
	/// after the last yielded key.
	skip_first: bool,
	done: bool,
}

/// Stream all entries from a key (inclusive) in the given direction.
pub fn stream_from(
	map: Arc<Map>,
	from: Option<Vec<u8>>,
	dir: Direction,
) -> impl Stream<Item = Result<KeyVal>> + Send {
	let cursor = Cursor { map, from, dir, skip_first: false, done: false };

	stream::unfold(cursor, |mut cursor| async move {
		if cursor.done {
			return None;
		}

		match next_chunk(&mut cursor).await {
			Ok(chunk) if chunk.is_empty() => None,
			Ok(chunk) => Some((stream::iter(chunk.into_iter().map(Ok)), cursor)),
			Err(e) => {
				cursor.done = true;
				Some((stream::iter(vec![Err(e)]), cursor))
			},
		}
	})
	.flatten()
}

/// Stream entries whose keys begin with the prefix, in order.
pub fn stream_prefix(
	map: Arc<Map>,
	prefix: Vec<u8>,
) -> impl Stream<Item = Result<KeyVal>> + Send {
	stream_from(map, Some(prefix.clone()), Direction::Forward).take_while(move |item| {
		let more = match item {
			Ok((key, _)) => key.starts_with(&prefix),
			Err(_) => true,
		};
		futures::future::ready(more)
	})
}

/// Reverse stream of entries whose keys begin with the prefix, starting
/// from the greatest such key. `upper` must be a byte string sorting at or
/// after every key in the prefix range.
pub fn rev_stream_prefix(
	map: Arc<Map>,
	prefix: Vec<u8>,
	upper: Vec<u8>,
) -> impl Stream<Item = Result<KeyVal>> + Send {
	stream_from(map, Some(upper), Direction::Reverse).take_while(move |item| {
		let more = match item {
			Ok((key, _)) => key.starts_with(&prefix),
			Err(_) => true,
		};
		futures::future::ready(more)
	})
}

async fn next_chunk(cursor: &mut Cursor) -> Result<Vec<KeyVal>> {
	let reverse = cursor.dir == Direction::Reverse;
	let want = CHUNK.saturating_add(usize::from(cursor.skip_first));

	// Non-blocking tier first; offload the identical seek on a miss.
	let filled = cursor
		.map
		.chunk_cached(cursor.from.as_deref(), reverse, want)?;
	let mut chunk = match filled {
		Some(chunk) => chunk,
		None => {
			let cmd = pool::Seek {
				map: cursor.map.clone(),
				from: cursor.from.clone(),
				reverse,
				limit: want,
				res: None,
			};
			cursor.map.engine().pool.execute_seek(cmd).await?
		},
	};

	// Resume-key entry was already yielded by the previous chunk.
	if cursor.skip_first && chunk.first().map(|(k, _)| k.as_slice()) == cursor.from.as_deref() {
		chunk.remove(0);
	}

	match chunk.last() {
		Some((key, _)) => {
			cursor.from = Some(key.clone());
			cursor.skip_first = true;
		},
		None => cursor.done = true,
	}

	if chunk.len() < CHUNK {
		cursor.done = true;
	}

	Ok(chunk)
}
