mod auth_chain;
mod event_fetch;
mod events;
mod head;
mod horizon;
mod members;
mod state;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::{
	dbs::{Dbs, EventIdx},
	event::{Pdu, RoomVersion},
	id::RoomId,
	Error, Result, Server,
};

pub use self::{
	event_fetch::EventFetch,
	events::Order,
	horizon::Gap,
};

/// Read-only interpretation of the event index as rooms.
pub struct Rooms {
	pub(crate) server: Arc<Server>,
	pub(crate) dbs: Arc<Dbs>,
	pub(crate) events: Arc<EventFetch>,
	pub(crate) auth_chain_cache: auth_chain::Cache,
}

impl Rooms {
	pub fn new(server: &Arc<Server>, dbs: &Arc<Dbs>) -> Arc<Self> {
		Arc::new(Self {
			server: server.clone(),
			dbs: dbs.clone(),
			events: EventFetch::new(server, dbs),
			auth_chain_cache: auth_chain::Cache::new(),
		})
	}

	/// A view over one room. Cheap; holds no state beyond the id.
	#[must_use]
	pub fn room<'a>(&'a self, room_id: &'a RoomId) -> Room<'a> {
		Room { rooms: self, room_id }
	}

	/// Materialize an event by its internal index through the LRU.
	pub async fn event(&self, idx: EventIdx) -> Result<Arc<Pdu>> { self.events.get(idx).await }
}

#[derive(Clone, Copy)]
pub struct Room<'a> {
	pub(crate) rooms: &'a Rooms,
	pub(crate) room_id: &'a RoomId,
}

impl Room<'_> {
	#[inline]
	#[must_use]
	pub fn id(&self) -> &RoomId { self.room_id }

	/// Whether any event of the room is stored locally.
	pub async fn exists(&self) -> Result<bool> {
		Ok(self.state_get("m.room.create", "").await?.is_some())
	}

	/// The room version from the create event; error if the room is not
	/// known locally.
	pub async fn version(&self) -> Result<RoomVersion> {
		let idx = self
			.state_get("m.room.create", "")
			.await?
			.ok_or_else(|| Error::NotFound("room has no create event".into()))?;

		let create = self.rooms.events.get(idx).await?;
		let id = create.stated_room_version().unwrap_or("1");
		RoomVersion::from_id(id)
	}
}
