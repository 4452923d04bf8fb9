use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::{json, Value};

use super::{canonical, CanonicalObject};
use crate::{Error, Result};

/// The signing preimage: the canonical form with `signatures` and `unsigned`
/// removed.
pub fn signing_preimage(object: &CanonicalObject) -> Result<Vec<u8>> {
	let mut preimage = object.clone();
	preimage.remove("signatures");
	preimage.remove("unsigned");
	canonical::to_vec(&preimage)
}

/// Sign the object and place the signature at
/// `signatures[origin]["ed25519:<name>"]`.
pub fn sign_object(
	object: &mut CanonicalObject,
	origin: &str,
	key_name: &str,
	key: &SigningKey,
) -> Result {
	let preimage = signing_preimage(object)?;
	let sig: Signature = key.sign(&preimage);
	let encoded = STANDARD_NO_PAD.encode(sig.to_bytes());

	let signatures = object
		.entry("signatures".to_owned())
		.or_insert_with(|| json!({}));
	let by_origin = signatures
		.as_object_mut()
		.ok_or_else(|| Error::BadJson("signatures is not an object".into()))?
		.entry(origin.to_owned())
		.or_insert_with(|| json!({}));
	by_origin
		.as_object_mut()
		.ok_or_else(|| Error::BadJson("signatures entry is not an object".into()))?
		.insert(format!("ed25519:{key_name}"), Value::String(encoded));

	Ok(())
}

/// Verify the signature at `signatures[origin][key_id]` against the signing
/// preimage, using the given Ed25519 verify key.
pub fn verify_signature(
	object: &CanonicalObject,
	origin: &str,
	key_id: &str,
	key: &VerifyingKey,
) -> Result {
	let encoded = object
		.get("signatures")
		.and_then(|s| s.get(origin))
		.and_then(|s| s.get(key_id))
		.and_then(Value::as_str)
		.ok_or_else(|| Error::Verify(format!("no signature by {origin}/{key_id}").into()))?;

	let bytes = STANDARD_NO_PAD
		.decode(encoded)
		.map_err(|_| Error::Verify("signature is not valid base64".into()))?;
	let bytes: [u8; 64] = bytes
		.try_into()
		.map_err(|_| Error::Verify("signature is not 64 bytes".into()))?;
	let sig = Signature::from_bytes(&bytes);

	let preimage = signing_preimage(object)?;
	key.verify(&preimage, &sig)
		.map_err(|_| Error::Verify(format!("bad signature by {origin}/{key_id}").into()))
}

/// Key ids the object claims to be signed with for an origin.
pub fn claimed_key_ids<'a>(
	object: &'a CanonicalObject,
	origin: &str,
) -> impl Iterator<Item = &'a str> + 'a {
	object
		.get("signatures")
		.and_then(|s| s.get(origin))
		.and_then(Value::as_object)
		.into_iter()
		.flat_map(|by_key| by_key.keys().map(String::as_str))
}
