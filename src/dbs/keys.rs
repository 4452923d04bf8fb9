//! Order-preserving key encodings.
//!
//! Integer components are big-endian u64 so byte order equals numeric
//! order; string components are separated by `0xFF`, a byte that never
//! appears in valid UTF-8 text.

use arrayvec::ArrayVec;

use crate::{utils, Error, Result};

/// Component separator.
pub const SEP: u8 = 0xFF;

/// The local sequence number naming a stored event.
pub type EventIdx = u64;

/// Edge kind in the forward reference graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RefType {
	Prev = 0,
	Auth = 1,
}

impl RefType {
	pub fn from_byte(b: u8) -> Result<Self> {
		match b {
			0 => Ok(Self::Prev),
			1 => Ok(Self::Auth),
			_ => Err(Error::bad_database("unknown ref type byte")),
		}
	}
}

#[inline]
#[must_use]
pub fn idx_key(idx: EventIdx) -> [u8; 8] { idx.to_be_bytes() }

pub fn idx_from_val(val: &[u8]) -> Result<EventIdx> { utils::u64_from_bytes(val) }

/// `room_events`: room ∥ depth ∥ idx → event_id
#[must_use]
pub fn room_events_key(room_id: &str, depth: u64, idx: EventIdx) -> Vec<u8> {
	let mut key = Vec::with_capacity(room_id.len() + 17);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(&depth.to_be_bytes());
	key.extend_from_slice(&idx.to_be_bytes());
	key
}

#[must_use]
pub fn room_events_prefix(room_id: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(room_id.len() + 1);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key
}

pub fn room_events_parse(key: &[u8]) -> Result<(u64, EventIdx)> {
	let (_, tail) = utils::split_once(key, SEP)
		.ok_or_else(|| Error::bad_database("room_events key has no separator"))?;
	if tail.len() != 16 {
		return Err(Error::bad_database("room_events key tail is not 16 bytes"));
	}

	Ok((utils::u64_from_bytes(&tail[..8])?, utils::u64_from_bytes(&tail[8..])?))
}

/// `room_type_events`: room ∥ type ∥ event_id → idx
#[must_use]
pub fn room_type_events_key(room_id: &str, kind: &str, event_id: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(room_id.len() + kind.len() + event_id.len() + 2);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(kind.as_bytes());
	key.push(SEP);
	key.extend_from_slice(event_id.as_bytes());
	key
}

#[must_use]
pub fn room_type_events_prefix(room_id: &str, kind: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(room_id.len() + kind.len() + 2);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(kind.as_bytes());
	key.push(SEP);
	key
}

/// `room_state`: room ∥ type ∥ state_key ∥ depth → idx.
/// Most-recent state is a reverse seek from the cell's upper bound.
#[must_use]
pub fn room_state_key(room_id: &str, kind: &str, state_key: &str, depth: u64) -> Vec<u8> {
	let mut key = room_state_cell(room_id, kind, state_key);
	key.extend_from_slice(&depth.to_be_bytes());
	key
}

#[must_use]
pub fn room_state_cell(room_id: &str, kind: &str, state_key: &str) -> Vec<u8> {
	let mut key =
		Vec::with_capacity(room_id.len() + kind.len() + state_key.len() + 11);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(kind.as_bytes());
	key.push(SEP);
	key.extend_from_slice(state_key.as_bytes());
	key.push(SEP);
	key
}

/// Sorts at or after every depth row of the cell.
#[must_use]
pub fn room_state_cell_upper(room_id: &str, kind: &str, state_key: &str) -> Vec<u8> {
	let mut key = room_state_cell(room_id, kind, state_key);
	key.extend_from_slice(&[0xFF; 8]);
	key
}

#[must_use]
pub fn room_state_type_prefix(room_id: &str, type_prefix: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(room_id.len() + type_prefix.len() + 1);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(type_prefix.as_bytes());
	key
}

/// Split a `room_state` key into (type, state_key, depth).
pub fn room_state_parse(key: &[u8]) -> Result<(String, String, u64)> {
	let (_room, tail) = utils::split_once(key, SEP)
		.ok_or_else(|| Error::bad_database("room_state key has no separator"))?;
	let (kind, tail) = utils::split_once(tail, SEP)
		.ok_or_else(|| Error::bad_database("room_state key has no type separator"))?;
	let (state_key, depth) = utils::split_once(tail, SEP)
		.ok_or_else(|| Error::bad_database("room_state key has no state_key separator"))?;

	Ok((
		utils::string_from_bytes(kind)?,
		utils::string_from_bytes(state_key)?,
		utils::u64_from_bytes(depth)?,
	))
}

/// `room_heads`: room ∥ event_id → idx
#[must_use]
pub fn room_heads_key(room_id: &str, event_id: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(room_id.len() + event_id.len() + 1);
	key.extend_from_slice(room_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(event_id.as_bytes());
	key
}

pub fn room_heads_parse(key: &[u8]) -> Result<String> {
	let (_, event_id) = utils::split_once(key, SEP)
		.ok_or_else(|| Error::bad_database("room_heads key has no separator"))?;
	utils::string_from_bytes(event_id)
}

/// `event_horizon`: missing event_id ∥ referrer idx → [ref_type]
#[must_use]
pub fn horizon_key(event_id: &str, referrer: EventIdx) -> Vec<u8> {
	let mut key = Vec::with_capacity(event_id.len() + 9);
	key.extend_from_slice(event_id.as_bytes());
	key.push(SEP);
	key.extend_from_slice(&referrer.to_be_bytes());
	key
}

#[must_use]
pub fn horizon_prefix(event_id: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(event_id.len() + 1);
	key.extend_from_slice(event_id.as_bytes());
	key.push(SEP);
	key
}

pub fn horizon_parse(key: &[u8]) -> Result<(String, EventIdx)> {
	let (event_id, idx) = utils::split_once(key, SEP)
		.ok_or_else(|| Error::bad_database("horizon key has no separator"))?;
	Ok((utils::string_from_bytes(event_id)?, utils::u64_from_bytes(idx)?))
}

/// `event_refs`: ancestor idx ∥ ref_type ∥ descendant idx → ()
#[must_use]
pub fn refs_key(ancestor: EventIdx, ref_type: RefType, descendant: EventIdx) -> ArrayVec<u8, 17> {
	let mut key = ArrayVec::new();
	key.try_extend_from_slice(&ancestor.to_be_bytes()).expect("within capacity");
	key.push(ref_type as u8);
	key.try_extend_from_slice(&descendant.to_be_bytes()).expect("within capacity");
	key
}

#[must_use]
pub fn refs_prefix(ancestor: EventIdx) -> Vec<u8> { ancestor.to_be_bytes().to_vec() }

pub fn refs_parse(key: &[u8]) -> Result<(EventIdx, RefType, EventIdx)> {
	if key.len() != 17 {
		return Err(Error::bad_database("refs key is not 17 bytes"));
	}

	Ok((
		utils::u64_from_bytes(&key[..8])?,
		RefType::from_byte(key[8])?,
		utils::u64_from_bytes(&key[9..])?,
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn room_events_orders_by_depth_then_idx() {
		let a = room_events_key("!r:x", 1, 9);
		let b = room_events_key("!r:x", 2, 1);
		let c = room_events_key("!r:x", 2, 3);
		assert!(a < b && b < c);

		let (depth, idx) = room_events_parse(&c).unwrap();
		assert_eq!((depth, idx), (2, 3));
	}

	#[test]
	fn state_cell_reverse_seek_bound() {
		let low = room_state_key("!r:x", "m.room.member", "@a:x", 1);
		let high = room_state_key("!r:x", "m.room.member", "@a:x", 700);
		let upper = room_state_cell_upper("!r:x", "m.room.member", "@a:x");
		assert!(low < high && high < upper);

		// a longer state_key must not fall inside the cell range
		let other = room_state_key("!r:x", "m.room.member", "@a:xx", 1);
		assert!(other > upper || !other.starts_with(&room_state_cell("!r:x", "m.room.member", "@a:x")));
	}

	#[test]
	fn state_parse_round_trip() {
		let key = room_state_key("!r:x", "m.room.member", "@alice:x", 42);
		let (kind, state_key, depth) = room_state_parse(&key).unwrap();
		assert_eq!(kind, "m.room.member");
		assert_eq!(state_key, "@alice:x");
		assert_eq!(depth, 42);
	}

	#[test]
	fn horizon_and_refs_round_trip() {
		let key = horizon_key("$missing:x", 7);
		let (event_id, referrer) = horizon_parse(&key).unwrap();
		assert_eq!(event_id, "$missing:x");
		assert_eq!(referrer, 7);

		let key = refs_key(3, RefType::Auth, 9);
		assert_eq!(refs_parse(&key).unwrap(), (3, RefType::Auth, 9));
		assert!(key.starts_with(&refs_prefix(3)));
	}

	#[test]
	fn idx_keys_sort_numerically() {
		assert!(idx_key(9) < idx_key(10));
		assert!(idx_key(255) < idx_key(256));
		assert_eq!(idx_from_val(&idx_key(77)).unwrap(), 77);
	}
}
