use futures::StreamExt;
use tracing::debug;

use super::Room;
use crate::{
	database::{stream, Batch},
	dbs::{keys, EventIdx},
	event::Pdu,
	id::EventId,
	Result,
};

impl Room<'_> {
	/// The forward extremities: events with no local descendants. Non-empty
	/// for any room with at least one stored event.
	pub async fn head_ids(&self) -> Result<Vec<(EventIdx, EventId)>> {
		let prefix = keys::room_events_prefix(self.room_id);
		let mut out = Vec::new();
		let mut rows = std::pin::pin!(stream::stream_prefix(
			self.rooms.dbs.room_heads.clone(),
			prefix,
		));
		while let Some(row) = rows.next().await {
			let (key, val) = row?;
			let event_id = EventId::parse(keys::room_heads_parse(&key)?)?;
			out.push((keys::idx_from_val(&val)?, event_id));
		}

		Ok(out)
	}

	pub async fn head_count(&self) -> Result<usize> {
		Ok(self.head_ids().await?.len())
	}

	/// Record the newly-admitted event as a head and retire every prev it
	/// satisfies. Part of the commit batch, so the head set moves
	/// atomically with the event becoming visible.
	pub fn advance_head(&self, batch: &mut Batch, pdu: &Pdu, idx: EventIdx) {
		batch.put(
			&self.rooms.dbs.room_heads,
			&keys::room_heads_key(self.room_id, &pdu.event_id),
			&keys::idx_key(idx),
		);

		for prev in pdu.prev_ids() {
			batch.delete(&self.rooms.dbs.room_heads, &keys::room_heads_key(self.room_id, prev));
		}
	}

	/// Recompute the head set from the reference graph: an event is a head
	/// iff no stored event lists it among its prev_events.
	pub async fn rebuild_head(&self) -> Result<usize> {
		use crate::dbs::RefType;

		self.reset_head().await?;

		let mut rebuilt = 0usize;
		let mut rows = std::pin::pin!(stream::stream_prefix(
			self.rooms.dbs.room_events.clone(),
			keys::room_events_prefix(self.room_id),
		));

		let mut batch = self.rooms.dbs.db.batch();
		while let Some(row) = rows.next().await {
			let (key, event_id) = row?;
			let (_, idx) = keys::room_events_parse(&key)?;

			let mut referenced = false;
			let mut refs = std::pin::pin!(stream::stream_prefix(
				self.rooms.dbs.event_refs.clone(),
				keys::refs_prefix(idx),
			));
			while let Some(r) = refs.next().await {
				let (rkey, _) = r?;
				if keys::refs_parse(&rkey)?.1 == RefType::Prev {
					referenced = true;
					break;
				}
			}

			if !referenced {
				let event_id = crate::utils::string_from_bytes(&event_id)?;
				batch.put(
					&self.rooms.dbs.room_heads,
					&keys::room_heads_key(self.room_id, &event_id),
					&keys::idx_key(idx),
				);
				rebuilt = rebuilt.saturating_add(1);
			}
		}

		batch.commit()?;
		debug!(room_id = %self.room_id, rebuilt, "head set rebuilt");
		Ok(rebuilt)
	}

	/// Clear the head set entirely.
	pub async fn reset_head(&self) -> Result {
		let mut batch = self.rooms.dbs.db.batch();
		let mut rows = std::pin::pin!(stream::stream_prefix(
			self.rooms.dbs.room_heads.clone(),
			keys::room_events_prefix(self.room_id),
		));
		while let Some(row) = rows.next().await {
			let (key, _) = row?;
			batch.delete(&self.rooms.dbs.room_heads, &key);
		}

		batch.commit()
	}
}
