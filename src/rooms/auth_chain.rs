use std::{
	collections::HashSet,
	sync::{Arc, Mutex},
};

use lru_cache::LruCache;
use tracing::{debug, trace};

use super::Room;
use crate::{dbs::EventIdx, Result};

const CACHE_CAPACITY: usize = 10_000;

/// Per-event auth chain cache: idx → its full transitive auth set.
pub(crate) struct Cache {
	inner: Mutex<LruCache<EventIdx, Arc<HashSet<EventIdx>>>>,
}

impl Cache {
	pub(crate) fn new() -> Self {
		Self { inner: Mutex::new(LruCache::new(CACHE_CAPACITY)) }
	}

	fn get(&self, idx: EventIdx) -> Option<Arc<HashSet<EventIdx>>> {
		self.inner.lock().expect("auth chain cache lock").get_mut(&idx).cloned()
	}

	fn insert(&self, idx: EventIdx, chain: Arc<HashSet<EventIdx>>) {
		self.inner.lock().expect("auth chain cache lock").insert(idx, chain);
	}
}

impl Room<'_> {
	/// The transitive closure of `auth_events` from the starting events,
	/// deduplicated, in no specified order. Starting events themselves are
	/// not part of the chain.
	pub async fn auth_chain(&self, starting: &[EventIdx]) -> Result<HashSet<EventIdx>> {
		let mut full = HashSet::new();
		for &start in starting {
			if let Some(cached) = self.rooms.auth_chain_cache.get(start) {
				trace!(start, "auth chain cache hit");
				full.extend(cached.iter().copied());
				continue;
			}

			let chain = Arc::new(self.auth_chain_inner(start).await?);
			debug!(start, chain_length = chain.len(), "auth chain computed");
			self.rooms.auth_chain_cache.insert(start, chain.clone());
			full.extend(chain.iter().copied());
		}

		Ok(full)
	}

	/// Visit the chain; the closure receives each event_idx once.
	pub async fn auth_chain_for_each<F>(&self, starting: &[EventIdx], mut f: F) -> Result
	where
		F: FnMut(EventIdx) -> bool,
	{
		for idx in self.auth_chain(starting).await? {
			if !f(idx) {
				break;
			}
		}

		Ok(())
	}

	async fn auth_chain_inner(&self, start: EventIdx) -> Result<HashSet<EventIdx>> {
		let mut chain = HashSet::new();
		let mut todo = vec![start];

		while let Some(idx) = todo.pop() {
			let pdu = self.rooms.events.get(idx).await?;
			for auth_id in pdu.auth_ids() {
				let Some(auth_idx) = self.rooms.dbs.idx_of(auth_id).await? else {
					// beyond the horizon; the fetch engine owns completing it
					continue;
				};

				if chain.insert(auth_idx) {
					todo.push(auth_idx);
				}
			}
		}

		Ok(chain)
	}
}
