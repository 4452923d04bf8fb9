use std::{fmt, sync::Arc};

use rocksdb::{ReadOptions, ReadTier, WriteOptions};
use tracing::trace;

use super::{engine::Engine, pool, watchers::Watchers};
use crate::{error::map_engine_err, Result};

pub type Key = Vec<u8>;
pub type Val = Vec<u8>;
pub type KeyVal = (Key, Val);

/// One column of the store. Reads prefer the non-blocking tier and offload
/// to the engine's worker pool on a cache miss.
pub struct Map {
	engine: Arc<Engine>,
	name: &'static str,
	watchers: Watchers,
}

/// Outcome of a non-blocking tier read.
enum Tier {
	Hit(Option<Vec<u8>>),
	/// Required block is not resident; the blocking tier must be consulted.
	Incomplete,
}

impl Map {
	pub(crate) fn open(engine: &Arc<Engine>, name: &'static str) -> Arc<Self> {
		Arc::new(Self {
			engine: engine.clone(),
			name,
			watchers: Watchers::default(),
		})
	}

	#[inline]
	#[must_use]
	pub fn name(&self) -> &str { self.name }

	/// Point read. Suspends only when the blocking tier is needed.
	pub async fn get(self: &Arc<Self>, key: &[u8]) -> Result<Option<Vec<u8>>> {
		match self.get_cached(key)? {
			Tier::Hit(value) => Ok(value),
			Tier::Incomplete => {
				trace!(map = self.name, "cache miss; offloading");
				let cmd = pool::Get { map: self.clone(), key: key.to_vec(), res: None };
				self.engine.pool.execute_get(cmd).await
			},
		}
	}

	pub async fn has(self: &Arc<Self>, key: &[u8]) -> Result<bool> {
		Ok(self.get(key).await?.is_some())
	}

	/// Non-blocking tier only; never touches disk.
	fn get_cached(&self, key: &[u8]) -> Result<Tier> {
		let res = self
			.engine
			.db
			.get_pinned_cf_opt(&self.engine.cf(self.name), key, &cache_read_options());

		match res {
			Ok(Some(value)) => Ok(Tier::Hit(Some(value.to_vec()))),
			Ok(None) => Ok(Tier::Hit(None)),
			Err(e) => match map_engine_err(e) {
				e if e.is_incomplete() => Ok(Tier::Incomplete),
				e => {
					self.engine.count_error(&e);
					Err(e)
				},
			},
		}
	}

	/// Blocking tier; runs on a pool worker (or in tests).
	pub(crate) fn get_blocking(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.engine
			.db
			.get_pinned_cf_opt(&self.engine.cf(self.name), key, &read_options())
			.map(|opt| opt.map(|v| v.to_vec()))
			.map_err(map_engine_err)
	}

	pub fn insert(&self, key: &[u8], value: &[u8]) -> Result {
		self.engine
			.db
			.put_cf_opt(&self.engine.cf(self.name), key, value, &WriteOptions::default())
			.map_err(map_engine_err)?;

		self.watchers.wake(key);
		Ok(())
	}

	pub fn remove(&self, key: &[u8]) -> Result {
		self.engine
			.db
			.delete_cf_opt(&self.engine.cf(self.name), key, &WriteOptions::default())
			.map_err(map_engine_err)
	}

	/// Bounded fill from the non-blocking tier. `Ok(None)` means a block
	/// was not resident and the blocking tier must take over; the partial
	/// progress is discarded because the fresh seek is idempotent for a
	/// given (snapshot, key).
	pub(crate) fn chunk_cached(
		&self,
		from: Option<&[u8]>,
		reverse: bool,
		limit: usize,
	) -> Result<Option<Vec<KeyVal>>> {
		self.chunk(from, reverse, limit, cache_read_options())
	}

	/// Bounded fill from the blocking tier; runs on a pool worker.
	pub(crate) fn chunk_blocking(
		&self,
		from: Option<&[u8]>,
		reverse: bool,
		limit: usize,
	) -> Result<Vec<KeyVal>> {
		self.chunk(from, reverse, limit, read_options())
			.map(|chunk| chunk.expect("blocking tier read cannot be incomplete"))
	}

	fn chunk(
		&self,
		from: Option<&[u8]>,
		reverse: bool,
		limit: usize,
		opts: ReadOptions,
	) -> Result<Option<Vec<KeyVal>>> {
		let mut it = self
			.engine
			.db
			.raw_iterator_cf_opt(&self.engine.cf(self.name), opts);

		match (from, reverse) {
			(Some(from), false) => it.seek(from),
			(Some(from), true) => it.seek_for_prev(from),
			(None, false) => it.seek_to_first(),
			(None, true) => it.seek_to_last(),
		}

		let mut out = Vec::with_capacity(limit.min(256));
		while it.valid() && out.len() < limit {
			let (key, value) = it.item().expect("valid iterator has an item");
			out.push((key.to_vec(), value.to_vec()));
			if reverse { it.prev() } else { it.next() }
		}

		match it.status() {
			Ok(()) => Ok(Some(out)),
			Err(e) => match map_engine_err(e) {
				e if e.is_incomplete() => Ok(None),
				e => {
					self.engine.count_error(&e);
					Err(e)
				},
			},
		}
	}

	/// Resolves when any key beginning with the prefix is written.
	pub fn watch_prefix<'a>(
		&'a self,
		prefix: &[u8],
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
		self.watchers.watch(prefix)
	}

	pub(crate) fn wake(&self, key: &[u8]) { self.watchers.wake(key); }

	pub(crate) fn engine(&self) -> &Arc<Engine> { &self.engine }
}

impl fmt::Display for Map {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name) }
}

impl fmt::Debug for Map {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Map({})", self.name)
	}
}

fn read_options() -> ReadOptions {
	let mut opts = ReadOptions::default();
	opts.set_total_order_seek(true);
	opts
}

fn cache_read_options() -> ReadOptions {
	let mut opts = read_options();
	opts.set_read_tier(ReadTier::BlockCache);
	opts
}
