use serde_json::{Map, Value};

use super::{CanonicalObject, RoomVersion};
use crate::Result;

/// Top-level members that survive redaction in every version.
const KEPT_TOP_LEVEL: &[&str] = &[
	"event_id",
	"type",
	"room_id",
	"sender",
	"state_key",
	"content",
	"hashes",
	"signatures",
	"depth",
	"prev_events",
	"prev_state",
	"auth_events",
	"origin",
	"origin_server_ts",
	"membership",
];

/// The essential form of an event: everything a redaction cannot remove.
/// This is the input to reference hashing, so the per-version mask is pinned
/// to the room version's redaction algorithm.
pub fn essential(object: &CanonicalObject, version: &RoomVersion) -> Result<CanonicalObject> {
	let kind = object.get("type").and_then(Value::as_str).unwrap_or_default();

	let mut out: CanonicalObject = object
		.iter()
		.filter(|(k, _)| {
			KEPT_TOP_LEVEL.contains(&k.as_str())
				|| (version.updated_redaction_rules
					&& kind == "m.room.redaction"
					&& k.as_str() == "redacts")
		})
		.map(|(k, v)| (k.clone(), v.clone()))
		.collect();

	let content = object
		.get("content")
		.and_then(Value::as_object)
		.cloned()
		.unwrap_or_default();
	out.insert("content".to_owned(), Value::Object(essential_content(kind, content, version)));

	Ok(out)
}

fn essential_content(
	kind: &str,
	content: Map<String, Value>,
	version: &RoomVersion,
) -> Map<String, Value> {
	let kept: &[&str] = match kind {
		"m.room.create" if version.updated_redaction_rules => return content,
		"m.room.create" => &["creator"],
		"m.room.member" => {
			if version.restricted_join {
				&["membership", "join_authorised_via_users_server"]
			} else {
				&["membership"]
			}
		},
		"m.room.join_rules" => {
			if version.restricted_join {
				&["join_rule", "allow"]
			} else {
				&["join_rule"]
			}
		},
		"m.room.power_levels" => {
			if version.updated_redaction_rules {
				&[
					"ban",
					"events",
					"events_default",
					"invite",
					"kick",
					"redact",
					"state_default",
					"users",
					"users_default",
				]
			} else {
				&[
					"ban",
					"events",
					"events_default",
					"kick",
					"redact",
					"state_default",
					"users",
					"users_default",
				]
			}
		},
		"m.room.history_visibility" => &["history_visibility"],
		"m.room.redaction" if version.updated_redaction_rules => &["redacts"],
		"m.room.aliases" if version.special_aliases => &["aliases"],
		_ => &[],
	};

	content
		.into_iter()
		.filter(|(k, _)| kept.contains(&k.as_str()))
		.collect()
}

/// Apply redaction in place: replace content with its essential subset and
/// record the reason under `unsigned.redacted_because`.
pub fn redact(object: &mut CanonicalObject, version: &RoomVersion, because: Value) -> Result {
	let essential = essential(object, version)?;
	*object = essential;
	object.remove("unsigned");
	object.insert(
		"unsigned".to_owned(),
		serde_json::json!({ "redacted_because": because }),
	);

	Ok(())
}
