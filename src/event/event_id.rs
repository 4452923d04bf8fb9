use base64::{
	engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
	Engine,
};

use super::{hash, CanonicalObject, RoomVersion};
use crate::{
	id::{EventId, ServerName},
	Result,
};

/// Derive the event id the room version dictates. Versions 1 and 2 mint a
/// server-generated opaque id; later versions derive it from the reference
/// hash (standard base64 alphabet for v3, URL-safe from v4).
pub fn event_id_for(
	object: &CanonicalObject,
	version: &RoomVersion,
	server: &ServerName,
) -> Result<EventId> {
	if !version.reference_hashes {
		return Ok(EventId::generate(server));
	}

	let digest = hash::reference_hash(object, version)?;
	let encoded = if version.url_safe_event_ids {
		URL_SAFE_NO_PAD.encode(digest)
	} else {
		STANDARD_NO_PAD.encode(digest)
	};

	EventId::parse(format!("${encoded}"))
}
