use serde_json::{json, Value};

use crate::id::EventId;

/// The author's half of a new event; the evaluator's ISSUE phase supplies
/// everything else (ancestry, depth, timestamp, hashes, signatures).
#[derive(Clone, Debug)]
pub struct Builder {
	pub kind: String,
	pub content: Value,
	pub state_key: Option<String>,
	pub redacts: Option<EventId>,
	/// Timestamped authoring; current time when absent.
	pub timestamp: Option<u64>,
}

impl Builder {
	#[must_use]
	pub fn state(kind: &str, state_key: &str, content: Value) -> Self {
		Self {
			kind: kind.to_owned(),
			content,
			state_key: Some(state_key.to_owned()),
			redacts: None,
			timestamp: None,
		}
	}

	#[must_use]
	pub fn timeline(kind: &str, content: Value) -> Self {
		Self {
			kind: kind.to_owned(),
			content,
			state_key: None,
			redacts: None,
			timestamp: None,
		}
	}

	#[must_use]
	pub fn message(body: &str) -> Self {
		Self::timeline("m.room.message", json!({ "msgtype": "m.text", "body": body }))
	}
}
