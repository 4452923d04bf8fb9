use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{canonical, CanonicalObject, RoomVersion};
use crate::{Error, Result};

/// The content hash preimage strips `hashes`, `signatures` and `unsigned`;
/// SHA-256 over the canonical bytes, unpadded base64 on the wire.
pub fn content_hash(object: &CanonicalObject) -> Result<String> {
	let mut preimage = object.clone();
	preimage.remove("hashes");
	preimage.remove("signatures");
	preimage.remove("unsigned");

	let bytes = canonical::to_vec(&preimage)?;
	Ok(STANDARD_NO_PAD.encode(Sha256::digest(&bytes)))
}

/// Check `hashes.sha256` against the recomputed content hash.
pub fn verify_content_hash(object: &CanonicalObject) -> Result {
	let claimed = object
		.get("hashes")
		.and_then(|h| h.get("sha256"))
		.and_then(Value::as_str)
		.ok_or_else(|| Error::Verify("hashes.sha256 missing".into()))?;

	let computed = content_hash(object)?;
	if claimed != computed {
		return Err(Error::Verify("content hash mismatch".into()));
	}

	Ok(())
}

/// The reference hash identifies an event in hash-derived room versions:
/// SHA-256 over the canonical essential (redacted) form with `signatures`,
/// `unsigned` and `age_ts` removed. The event id must not contribute to its
/// own derivation.
pub fn reference_hash(object: &CanonicalObject, version: &RoomVersion) -> Result<[u8; 32]> {
	let mut preimage = super::essential(object, version)?;
	preimage.remove("signatures");
	preimage.remove("unsigned");
	preimage.remove("age_ts");
	preimage.remove("event_id");

	let bytes = canonical::to_vec(&preimage)?;
	Ok(Sha256::digest(&bytes).into())
}
