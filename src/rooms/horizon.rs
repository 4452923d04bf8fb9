use std::collections::BTreeMap;

use futures::StreamExt;

use super::Room;
use crate::{
	database::stream,
	dbs::{keys, EventIdx},
	id::EventId,
	Result,
};

/// A contiguous gap in the stored DAG: the unresolved ids referenced at
/// the highest depth, bounding backfill. `sounding` is the depth of the
/// deepest referrer whose ancestry is incomplete; `twain` is the greatest
/// stored depth at or below which the gap opens.
#[derive(Debug)]
pub struct Gap {
	pub sounding: u64,
	pub twain: u64,
	pub missing: Vec<EventId>,
	pub anchors: Vec<EventIdx>,
}

impl Room<'_> {
	/// Every prev/auth reference of this room not satisfied locally, as
	/// (missing event_id, referrer event_idx) pairs.
	pub async fn horizon(&self) -> Result<Vec<(EventId, EventIdx)>> {
		let mut out = Vec::new();
		let mut rows = std::pin::pin!(stream::stream_from(
			self.rooms.dbs.event_horizon.clone(),
			None,
			stream::Direction::Forward,
		));

		while let Some(row) = rows.next().await {
			let (key, _) = row?;
			let (event_id, referrer) = keys::horizon_parse(&key)?;

			// the horizon column is global; filter to this room by referrer
			let pdu = self.rooms.events.get(referrer).await?;
			if pdu.room_id.as_str() == self.room_id.as_str() {
				out.push((EventId::parse(event_id)?, referrer));
			}
		}

		Ok(out)
	}

	/// Visit unresolved references whose referrer sits at or above the
	/// depth bound. The closure receives the referrer's event_idx first.
	pub async fn missing_for_each<F>(&self, min_depth: u64, mut f: F) -> Result
	where
		F: FnMut(EventIdx, &EventId) -> bool,
	{
		for (event_id, referrer) in self.horizon().await? {
			let pdu = self.rooms.events.get(referrer).await?;
			if pdu.depth >= min_depth && !f(referrer, &event_id) {
				break;
			}
		}

		Ok(())
	}

	/// Locate the highest-depth gap to drive backfill, if any reference is
	/// unresolved.
	pub async fn sounding(&self) -> Result<Option<Gap>> {
		let mut by_depth: BTreeMap<u64, (Vec<EventId>, Vec<EventIdx>)> = BTreeMap::new();
		for (event_id, referrer) in self.horizon().await? {
			let pdu = self.rooms.events.get(referrer).await?;
			let slot = by_depth.entry(pdu.depth).or_default();
			slot.0.push(event_id);
			slot.1.push(referrer);
		}

		let Some((&sounding, _)) = by_depth.iter().next_back() else {
			return Ok(None);
		};
		let (missing, anchors) = by_depth.remove(&sounding).expect("entry just observed");

		Ok(Some(Gap {
			sounding,
			twain: sounding.saturating_sub(1),
			missing,
			anchors,
		}))
	}
}
