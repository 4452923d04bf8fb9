use std::sync::{Arc, Mutex};

use lru_cache::LruCache;
use tracing::trace;

use crate::{
	dbs::{keys, Dbs, EventIdx},
	event::Pdu,
	id::EventId,
	Error, Result, Server,
};

/// Materializes events on demand by their internal index, through an LRU
/// over the payload column. Entries may be evicted between suspensions;
/// callers re-resolve after any yield rather than holding slots.
pub struct EventFetch {
	dbs: Arc<Dbs>,
	cache: Mutex<LruCache<EventIdx, Arc<Pdu>>>,
}

impl EventFetch {
	pub(crate) fn new(server: &Arc<Server>, dbs: &Arc<Dbs>) -> Arc<Self> {
		Arc::new(Self {
			dbs: dbs.clone(),
			cache: Mutex::new(LruCache::new(server.config.event_cache_capacity)),
		})
	}

	pub async fn get(&self, idx: EventIdx) -> Result<Arc<Pdu>> {
		if let Some(hit) = self.cache.lock().expect("event cache lock").get_mut(&idx) {
			return Ok(hit.clone());
		}

		let json = self
			.dbs
			.idx_json
			.get(&keys::idx_key(idx))
			.await?
			.ok_or_else(|| Error::NotFound("event_idx has no payload".into()))?;
		let pdu: Arc<Pdu> = Arc::new(serde_json::from_slice(&json)?);

		trace!(idx, event_id = %pdu.event_id, "event materialized");
		self.cache
			.lock()
			.expect("event cache lock")
			.insert(idx, pdu.clone());

		Ok(pdu)
	}

	pub async fn multi_get(&self, idxs: &[EventIdx]) -> Result<Vec<Arc<Pdu>>> {
		let mut out = Vec::with_capacity(idxs.len());
		for &idx in idxs {
			out.push(self.get(idx).await?);
		}

		Ok(out)
	}

	/// Resolve by event id, passing through the primary index.
	pub async fn get_by_id(&self, event_id: &EventId) -> Result<Option<(EventIdx, Arc<Pdu>)>> {
		match self.dbs.idx_of(event_id).await? {
			Some(idx) => Ok(Some((idx, self.get(idx).await?))),
			None => Ok(None),
		}
	}

	/// The stored canonical bytes; bypasses the cache.
	pub async fn json(&self, idx: EventIdx) -> Result<Vec<u8>> {
		self.dbs
			.idx_json
			.get(&keys::idx_key(idx))
			.await?
			.ok_or_else(|| Error::NotFound("event_idx has no payload".into()))
	}
}
