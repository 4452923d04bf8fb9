mod builder;
pub mod canonical;
mod event_id;
mod hash;
mod redact;
mod reference;
mod room_version;
pub mod sign;
#[cfg(test)]
mod tests;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::{
	builder::Builder,
	canonical::CanonicalObject,
	event_id::event_id_for,
	hash::{content_hash, reference_hash, verify_content_hash},
	redact::essential,
	reference::EventRef,
	room_version::RoomVersion,
	sign::{sign_object, signing_preimage, verify_signature},
};
use crate::{
	id::{EventId, RoomId, ServerName, UserId},
	Error, Result,
};

/// Whole-event canonical size cap.
pub const MAX_SIZE: usize = 64 * 1024;
/// Caps on the `type`, `state_key` and `origin` members.
pub const TYPE_MAX_SIZE: usize = 256;
pub const STATE_KEY_MAX_SIZE: usize = 256;
pub const ORIGIN_MAX_SIZE: usize = 256;

/// Persistent Data Unit: the canonical event tuple.
///
/// The record carries every legal member; optional members are absent from
/// the canonical form rather than null. A state event is one whose
/// `state_key` is present, possibly empty.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Pdu {
	pub event_id: EventId,
	pub room_id: RoomId,
	pub sender: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin: Option<ServerName>,
	pub origin_server_ts: u64,
	#[serde(rename = "type")]
	pub kind: String,
	pub content: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub state_key: Option<String>,
	#[serde(default)]
	pub prev_events: Vec<EventRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prev_state: Option<Vec<EventRef>>,
	#[serde(default)]
	pub depth: u64,
	#[serde(default)]
	pub auth_events: Vec<EventRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redacts: Option<EventId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unsigned: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hashes: Option<EventHash>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signatures: Option<Value>,
}

/// Content hashes of a PDU.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventHash {
	/// Unpadded base64 of the SHA-256 content hash.
	pub sha256: String,
}

impl Pdu {
	/// Materialize from a canonical object, adopting the given id. The id is
	/// inserted so the record always knows its identity even in room
	/// versions whose wire form omits it.
	pub fn from_id_object(event_id: &EventId, mut object: CanonicalObject) -> Result<Self> {
		object.insert("event_id".to_owned(), Value::String(event_id.as_str().to_owned()));
		serde_json::to_value(object)
			.and_then(serde_json::from_value)
			.map_err(Into::into)
	}

	/// The canonical object, including `event_id`.
	pub fn to_object(&self) -> Result<CanonicalObject> {
		match serde_json::to_value(self)? {
			Value::Object(object) => Ok(object),
			_ => Err(Error::BadJson("pdu did not serialize to an object".into())),
		}
	}

	/// The canonical object as sent over federation: hash-derived room
	/// versions omit `event_id`.
	pub fn to_wire_object(&self, version: &RoomVersion) -> Result<CanonicalObject> {
		let mut object = self.to_object()?;
		if version.reference_hashes {
			object.remove("event_id");
		}

		Ok(object)
	}

	#[inline]
	#[must_use]
	pub fn is_state(&self) -> bool { self.state_key.is_some() }

	#[must_use]
	pub fn membership(&self) -> Option<&str> {
		self.content.get("membership").and_then(Value::as_str)
	}

	/// The origin server: the explicit `origin` member when present, else
	/// the sender's server.
	#[must_use]
	pub fn origin_name(&self) -> &str {
		self.origin
			.as_ref()
			.map_or_else(|| self.sender.server_name(), |o| o.as_str())
	}

	pub fn prev_ids(&self) -> impl DoubleEndedIterator<Item = &EventId> + '_ {
		self.prev_events.iter().map(|r| &r.event_id)
	}

	pub fn auth_ids(&self) -> impl DoubleEndedIterator<Item = &EventId> + '_ {
		self.auth_events.iter().map(|r| &r.event_id)
	}

	/// Shape and size checks for admission; the canonical byte length is
	/// measured by the caller who already holds the serialized form.
	pub fn conform(&self, canonical_len: usize) -> Result {
		if canonical_len > MAX_SIZE {
			return Err(Error::Conform("event exceeds 64 KiB".into()));
		}
		if self.kind.len() > TYPE_MAX_SIZE {
			return Err(Error::Conform("type exceeds 256 bytes".into()));
		}
		if self.state_key.as_ref().is_some_and(|k| k.len() > STATE_KEY_MAX_SIZE) {
			return Err(Error::Conform("state_key exceeds 256 bytes".into()));
		}
		if self.origin.as_ref().is_some_and(|o| o.len() > ORIGIN_MAX_SIZE) {
			return Err(Error::Conform("origin exceeds 256 bytes".into()));
		}
		if !self.content.is_object() {
			return Err(Error::Conform("content is not an object".into()));
		}
		if self.hashes.is_none() {
			return Err(Error::Conform("hashes member missing".into()));
		}
		if self.kind != "m.room.create" && self.prev_events.is_empty() {
			return Err(Error::Conform("no prev_events".into()));
		}

		Ok(())
	}

	/// Room version stated by a create event; `None` for anything else.
	#[must_use]
	pub fn stated_room_version(&self) -> Option<&str> {
		(self.kind == "m.room.create").then(|| {
			self.content
				.get("room_version")
				.and_then(Value::as_str)
				.unwrap_or("1")
		})
	}
}

/// Identity is the event id, not the memory representation.
impl Eq for Pdu {}

impl PartialEq for Pdu {
	fn eq(&self, other: &Self) -> bool { self.event_id == other.event_id }
}

impl Ord for Pdu {
	fn cmp(&self, other: &Self) -> Ordering { self.event_id.cmp(&other.event_id) }
}

impl PartialOrd for Pdu {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
