use crate::{Error, Result};

/// Capabilities a room version selects. Everything downstream branches on
/// these flags rather than on the version string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoomVersion {
	pub id: String,

	/// Ancestry references are bare event id strings rather than
	/// `[event_id, hash]` tuples, and event ids derive from the
	/// reference hash.
	pub reference_hashes: bool,

	/// Event ids use the URL-safe base64 alphabet (v4 and later).
	pub url_safe_event_ids: bool,

	/// `m.room.aliases` has special auth treatment (v1 through v5).
	pub special_aliases: bool,

	/// Rooms without a power_levels event default the invite level to
	/// moderator (the v1 family; later versions default it to zero).
	pub guarded_invite_default: bool,

	/// Canonical JSON integer range strictly enforced (v6 and later).
	pub strict_canonical: bool,

	pub knocking: bool,
	pub restricted_join: bool,
	pub knock_restricted_join: bool,

	/// Power levels must be integers, never string-encoded (v10 and later).
	pub integer_power_levels: bool,

	/// v11 redaction rules: full `m.room.create` content survives, and
	/// `redacts` is protected on `m.room.redaction`.
	pub updated_redaction_rules: bool,

	/// Room creator is implied by the create event `sender` rather than a
	/// `creator` content member (v11 and later).
	pub implied_creator: bool,
}

impl RoomVersion {
	pub const DEFAULT: &'static str = "10";

	pub fn from_id(id: &str) -> Result<Self> {
		let n: u8 = match id {
			"1" => 1,
			"2" => 2,
			"3" => 3,
			"4" => 4,
			"5" => 5,
			"6" => 6,
			"7" => 7,
			"8" => 8,
			"9" => 9,
			"10" => 10,
			"11" => 11,
			_ => return Err(Error::VersionMismatch(id.to_owned())),
		};

		Ok(Self {
			id: id.to_owned(),
			reference_hashes: n >= 3,
			url_safe_event_ids: n >= 4,
			special_aliases: n <= 5,
			guarded_invite_default: n <= 5,
			strict_canonical: n >= 6,
			knocking: n >= 7,
			restricted_join: n >= 8,
			knock_restricted_join: n >= 10,
			integer_power_levels: n >= 10,
			updated_redaction_rules: n >= 11,
			implied_creator: n >= 11,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dialect_boundaries() {
		let v2 = RoomVersion::from_id("2").unwrap();
		assert!(!v2.reference_hashes);
		assert!(v2.special_aliases);

		let v3 = RoomVersion::from_id("3").unwrap();
		assert!(v3.reference_hashes);
		assert!(!v3.url_safe_event_ids);

		let v4 = RoomVersion::from_id("4").unwrap();
		assert!(v4.url_safe_event_ids);

		let v11 = RoomVersion::from_id("11").unwrap();
		assert!(v11.updated_redaction_rules && v11.implied_creator);
	}

	#[test]
	fn unknown_version_is_mismatch() {
		assert!(matches!(RoomVersion::from_id("org.example.custom"), Err(Error::VersionMismatch(_))));
	}
}
