use std::collections::BTreeMap;

use futures::StreamExt;

use super::Room;
use crate::{
	database::stream,
	dbs::{keys, EventIdx},
	Result,
};

impl Room<'_> {
	/// The event currently authoritative for a state cell, or absent. The
	/// cell's history is depth-keyed; most-recent is a reverse seek from
	/// the cell's upper bound.
	pub async fn state_get(&self, kind: &str, state_key: &str) -> Result<Option<EventIdx>> {
		let cell = keys::room_state_cell(self.room_id, kind, state_key);
		let upper = keys::room_state_cell_upper(self.room_id, kind, state_key);
		self.newest_in_cell(cell, upper).await
	}

	/// The cell's authoritative event at or below a depth bound; drives
	/// historical auth checks.
	pub async fn state_at(
		&self,
		kind: &str,
		state_key: &str,
		max_depth: u64,
	) -> Result<Option<EventIdx>> {
		let cell = keys::room_state_cell(self.room_id, kind, state_key);
		let upper = keys::room_state_key(self.room_id, kind, state_key, max_depth);
		self.newest_in_cell(cell, upper).await
	}

	async fn newest_in_cell(&self, cell: Vec<u8>, upper: Vec<u8>) -> Result<Option<EventIdx>> {
		let mut rows = std::pin::pin!(stream::rev_stream_prefix(
			self.rooms.dbs.room_state.clone(),
			cell,
			upper,
		));

		match rows.next().await {
			Some(row) => {
				let (_, val) = row?;
				Ok(Some(keys::idx_from_val(&val)?))
			},
			None => Ok(None),
		}
	}

	/// Enumerate current state cells whose type begins with the prefix.
	/// Rows sort by (type, state_key, depth) ascending, so the last row of
	/// each cell is its authoritative entry; the fold is deterministic for
	/// fixed database contents.
	pub async fn state_entries(
		&self,
		type_prefix: &str,
	) -> Result<BTreeMap<(String, String), EventIdx>> {
		let prefix = keys::room_state_type_prefix(self.room_id, type_prefix);
		let mut cells = BTreeMap::new();

		let mut rows = std::pin::pin!(stream::stream_prefix(
			self.rooms.dbs.room_state.clone(),
			prefix,
		));
		while let Some(row) = rows.next().await {
			let (key, val) = row?;
			let (kind, state_key, _depth) = keys::room_state_parse(&key)?;
			cells.insert((kind, state_key), keys::idx_from_val(&val)?);
		}

		Ok(cells)
	}

	/// Visit current state cells; the closure receives the event_idx first
	/// and materializes payloads itself when needed.
	pub async fn state_for_each<F>(&self, type_prefix: &str, mut f: F) -> Result
	where
		F: FnMut(EventIdx, &str, &str) -> bool,
	{
		for ((kind, state_key), idx) in self.state_entries(type_prefix).await? {
			if !f(idx, &kind, &state_key) {
				break;
			}
		}

		Ok(())
	}
}
