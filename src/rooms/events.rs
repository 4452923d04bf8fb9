use futures::{Stream, StreamExt};

use super::Room;
use crate::{
	database::stream::{self, Direction},
	dbs::{keys, EventIdx},
	Result,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Order {
	/// Ascending depth, oldest first.
	#[default]
	Forward,
	/// Descending depth, newest first.
	Reverse,
}

impl Room<'_> {
	/// Depth-ordered stream of (depth, event_idx) over the room's member
	/// stream, optionally starting from a depth bound.
	pub fn events(
		&self,
		from_depth: Option<u64>,
		order: Order,
	) -> impl Stream<Item = Result<(u64, EventIdx)>> + Send {
		let map = self.rooms.dbs.room_events.clone();
		let prefix = keys::room_events_prefix(self.room_id);

		let inner = match order {
			Order::Forward => {
				let from = match from_depth {
					Some(depth) => {
						let mut key = prefix.clone();
						key.extend_from_slice(&depth.to_be_bytes());
						key
					},
					None => prefix.clone(),
				};
				futures::future::Either::Left(stream::stream_from(
					map,
					Some(from),
					Direction::Forward,
				))
			},
			Order::Reverse => {
				let mut upper = prefix.clone();
				let depth = from_depth.unwrap_or(u64::MAX);
				upper.extend_from_slice(&depth.to_be_bytes());
				upper.extend_from_slice(&[0xFF; 8]);
				futures::future::Either::Right(stream::stream_from(
					map,
					Some(upper),
					Direction::Reverse,
				))
			},
		};

		inner
			.take_while(move |row| {
				let more = match row {
					Ok((key, _)) => key.starts_with(&prefix),
					Err(_) => true,
				};
				futures::future::ready(more)
			})
			.map(|row| {
				let (key, _) = row?;
				keys::room_events_parse(&key)
			})
	}

	/// Total stored events of the room.
	pub async fn event_count(&self) -> Result<usize> {
		let mut count = 0usize;
		let mut events = std::pin::pin!(self.events(None, Order::Forward));
		while let Some(row) = events.next().await {
			row?;
			count = count.saturating_add(1);
		}

		Ok(count)
	}

	/// The greatest stored depth, if any event exists.
	pub async fn max_depth(&self) -> Result<Option<u64>> {
		let mut newest = std::pin::pin!(self.events(None, Order::Reverse));
		match newest.next().await {
			Some(row) => Ok(Some(row?.0)),
			None => Ok(None),
		}
	}
}
