pub mod keys;
pub mod maps;
#[cfg(test)]
mod tests;
mod write;

use std::sync::{Arc, Mutex};

use crate::{
	database::{Database, Map},
	id::EventId,
	utils, Result,
};

pub use self::{
	keys::{EventIdx, RefType},
	maps::MAPS,
	write::{Opts as WriteOpts, Report as WriteReport, WriteOp},
};

/// Handles to every column of the "events" database plus the event_idx
/// allocator. Shared by the write plans and the room views.
pub struct Dbs {
	pub db: Arc<Database>,

	pub global: Arc<Map>,
	pub eventid_idx: Arc<Map>,
	pub idx_json: Arc<Map>,
	pub idx_eventid: Arc<Map>,
	pub idx_type: Arc<Map>,
	pub idx_sender: Arc<Map>,
	pub idx_room: Arc<Map>,
	pub idx_depth: Arc<Map>,
	pub idx_state_key: Arc<Map>,
	pub room_events: Arc<Map>,
	pub room_type_events: Arc<Map>,
	pub room_state: Arc<Map>,
	pub room_heads: Arc<Map>,
	pub event_horizon: Arc<Map>,
	pub event_refs: Arc<Map>,

	counter: Mutex<()>,
}

impl Dbs {
	pub fn new(db: &Arc<Database>) -> Arc<Self> {
		Arc::new(Self {
			db: db.clone(),
			global: db["global"].clone(),
			eventid_idx: db["eventid_idx"].clone(),
			idx_json: db["idx_json"].clone(),
			idx_eventid: db["idx_eventid"].clone(),
			idx_type: db["idx_type"].clone(),
			idx_sender: db["idx_sender"].clone(),
			idx_room: db["idx_room"].clone(),
			idx_depth: db["idx_depth"].clone(),
			idx_state_key: db["idx_state_key"].clone(),
			room_events: db["room_events"].clone(),
			room_type_events: db["room_type_events"].clone(),
			room_state: db["room_state"].clone(),
			room_heads: db["room_heads"].clone(),
			event_horizon: db["event_horizon"].clone(),
			event_refs: db["event_refs"].clone(),
			counter: Mutex::new(()),
		})
	}

	/// Allocate the next event_idx. Strictly monotonic per database and
	/// never reused after deletion.
	pub async fn next_idx(&self) -> Result<EventIdx> {
		const COUNTER_KEY: &[u8] = b"event_idx";

		let _guard = self.counter.lock().expect("counter lock");
		let old = self.global.get_blocking(COUNTER_KEY)?;
		let new = utils::increment(old.as_deref());
		self.global.insert(COUNTER_KEY, &new)?;

		utils::u64_from_bytes(&new)
	}

	/// Resolve an event id to its internal index, if stored.
	pub async fn idx_of(&self, event_id: &EventId) -> Result<Option<EventIdx>> {
		match self.eventid_idx.get(event_id.as_ref()).await? {
			Some(val) => Ok(Some(keys::idx_from_val(&val)?)),
			None => Ok(None),
		}
	}
}
