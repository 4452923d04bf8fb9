use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::id::EventId;

/// An ancestry reference from `prev_events` / `auth_events` /
/// `prev_state`. Room versions 1 and 2 write `[event_id, {"sha256": …}]`
/// tuples; later versions write the bare event id. Both shapes parse; the
/// stored hash decides which shape serializes back out, so an event
/// round-trips in its own dialect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventRef {
	pub event_id: EventId,
	pub hash: Option<String>,
}

impl EventRef {
	#[must_use]
	pub fn bare(event_id: EventId) -> Self { Self { event_id, hash: None } }

	#[must_use]
	pub fn hashed(event_id: EventId, sha256: String) -> Self {
		Self { event_id, hash: Some(sha256) }
	}
}

impl From<EventId> for EventRef {
	fn from(event_id: EventId) -> Self { Self::bare(event_id) }
}

impl AsRef<EventId> for EventRef {
	fn as_ref(&self) -> &EventId { &self.event_id }
}

impl Serialize for EventRef {
	fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
		use serde::ser::SerializeSeq;

		match &self.hash {
			None => ser.serialize_str(&self.event_id),
			Some(sha256) => {
				let mut seq = ser.serialize_seq(Some(2))?;
				seq.serialize_element(self.event_id.as_str())?;
				seq.serialize_element(&serde_json::json!({ "sha256": sha256 }))?;
				seq.end()
			},
		}
	}
}

impl<'de> Deserialize<'de> for EventRef {
	fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
		let value = Value::deserialize(de)?;
		match value {
			Value::String(s) => {
				let event_id = EventId::parse(&s).map_err(de::Error::custom)?;
				Ok(Self::bare(event_id))
			},
			Value::Array(mut items) if !items.is_empty() => {
				let Value::String(s) = items.remove(0) else {
					return Err(de::Error::custom("reference tuple must begin with event id"));
				};
				let event_id = EventId::parse(&s).map_err(de::Error::custom)?;
				let hash = items
					.first()
					.and_then(|v| v.get("sha256"))
					.and_then(Value::as_str)
					.map(str::to_owned);
				Ok(Self { event_id, hash })
			},
			_ => Err(de::Error::custom("reference is neither id string nor tuple")),
		}
	}
}
