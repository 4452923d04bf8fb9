use std::collections::BTreeMap;

use serde_json::Value;

use crate::{event::RoomVersion, id::UserId, Error, Result};

/// Effective power-level table for a room: either parsed from the current
/// `m.room.power_levels` content or derived from defaults when the room has
/// none, in which case only the creator is elevated.
#[derive(Clone, Debug)]
pub struct PowerLevels {
	pub users: BTreeMap<String, i64>,
	pub users_default: i64,
	pub events: BTreeMap<String, i64>,
	pub events_default: i64,
	pub state_default: i64,
	pub ban: i64,
	pub kick: i64,
	pub redact: i64,
	pub invite: i64,
	creator: Option<String>,
}

impl PowerLevels {
	/// The table of a room without a power_levels event: everything at
	/// zero except the creator and the moderation actions. The v1 family
	/// of room versions guarded invites at moderator level by default.
	#[must_use]
	pub fn defaults(creator: Option<&UserId>, version: &RoomVersion) -> Self {
		Self {
			users: BTreeMap::new(),
			users_default: 0,
			events: BTreeMap::new(),
			events_default: 0,
			state_default: 0,
			ban: 50,
			kick: 50,
			redact: 50,
			invite: if version.guarded_invite_default { 50 } else { 0 },
			creator: creator.map(|c| c.as_str().to_owned()),
		}
	}

	/// Parse power_levels content. Room versions before 10 tolerate
	/// string-encoded integers.
	pub fn from_content(
		content: &Value,
		creator: Option<&UserId>,
		version: &RoomVersion,
	) -> Result<Self> {
		let level = |key: &str, default: i64| -> Result<i64> {
			match content.get(key) {
				None => Ok(default),
				Some(v) => parse_level(v, version),
			}
		};

		Ok(Self {
			users: parse_level_map(content.get("users"), version)?,
			users_default: level("users_default", 0)?,
			events: parse_level_map(content.get("events"), version)?,
			events_default: level("events_default", 0)?,
			state_default: level("state_default", 50)?,
			ban: level("ban", 50)?,
			kick: level("kick", 50)?,
			redact: level("redact", 50)?,
			invite: level("invite", 0)?,
			creator: creator.map(|c| c.as_str().to_owned()),
		})
	}

	/// A user's effective level. The creator of a room without explicit
	/// levels holds 100.
	#[must_use]
	pub fn user_level(&self, user: &UserId) -> i64 {
		if let Some(level) = self.users.get(user.as_str()) {
			return *level;
		}
		if self.users.is_empty() && self.creator.as_deref() == Some(user.as_str()) {
			return 100;
		}

		self.users_default
	}

	/// The level required to send an event of this type, state or message.
	#[must_use]
	pub fn required_level(&self, kind: &str, is_state: bool) -> i64 {
		self.events.get(kind).copied().unwrap_or(if is_state {
			self.state_default
		} else {
			self.events_default
		})
	}
}

fn parse_level(value: &Value, version: &RoomVersion) -> Result<i64> {
	match value {
		Value::Number(n) => n
			.as_i64()
			.ok_or_else(|| Error::Auth { rule: 10, reason: "power level is not an integer".into() }),
		Value::String(s) if !version.integer_power_levels => s
			.trim()
			.parse()
			.map_err(|_| Error::Auth { rule: 10, reason: "unparsable power level string".into() }),
		_ => Err(Error::Auth { rule: 10, reason: "power level has wrong type".into() }),
	}
}

fn parse_level_map(value: Option<&Value>, version: &RoomVersion) -> Result<BTreeMap<String, i64>> {
	let mut out = BTreeMap::new();
	let Some(Value::Object(map)) = value else {
		return Ok(out);
	};

	for (key, raw) in map {
		out.insert(key.clone(), parse_level(raw, version)?);
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn user(s: &str) -> UserId { UserId::parse(s).unwrap() }

	#[test]
	fn creator_is_elevated_without_levels() {
		let alice = user("@alice:x");
		let bob = user("@bob:x");
		let v10 = RoomVersion::from_id("10").unwrap();
		let levels = PowerLevels::defaults(Some(&alice), &v10);
		assert_eq!(levels.user_level(&alice), 100);
		assert_eq!(levels.user_level(&bob), 0);
		assert_eq!(levels.required_level("m.room.name", true), 0);
	}

	#[test]
	fn invite_default_is_guarded_in_the_v1_family() {
		let v5 = RoomVersion::from_id("5").unwrap();
		let v6 = RoomVersion::from_id("6").unwrap();
		assert_eq!(PowerLevels::defaults(None, &v5).invite, 50);
		assert_eq!(PowerLevels::defaults(None, &v6).invite, 0);
	}

	#[test]
	fn explicit_users_override_creator() {
		let alice = user("@alice:x");
		let v10 = RoomVersion::from_id("10").unwrap();
		let content = json!({ "users": { "@alice:x": 50 }, "state_default": 50 });
		let levels = PowerLevels::from_content(&content, Some(&alice), &v10).unwrap();
		assert_eq!(levels.user_level(&alice), 50);
		assert_eq!(levels.required_level("m.room.name", true), 50);
		assert_eq!(levels.required_level("m.room.message", false), 0);
	}

	#[test]
	fn string_levels_only_in_old_versions() {
		let v9 = RoomVersion::from_id("9").unwrap();
		let v10 = RoomVersion::from_id("10").unwrap();
		let content = json!({ "ban": "75" });

		let lenient = PowerLevels::from_content(&content, None, &v9).unwrap();
		assert_eq!(lenient.ban, 75);
		assert!(PowerLevels::from_content(&content, None, &v10).is_err());
	}
}
