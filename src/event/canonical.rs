//! Canonical JSON: members sorted by UTF-8 code point, compact separators,
//! integers only, UTF-8 with minimal escaping.
//!
//! `serde_json`'s default object representation is an ordered map keyed by
//! code point and its compact writer emits no insignificant whitespace, so
//! serializing a validated value is already canonical; validation is the
//! interesting part.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// A canonical JSON object, the shape every event takes on the wire and in
/// the payload column.
pub type CanonicalObject = Map<String, Value>;

/// Largest integer magnitude canonical JSON admits.
pub const MAX_CANONICAL_INT: i64 = (1 << 53) - 1;

/// Parse a canonical JSON object from bytes, validating canonicality.
pub fn from_slice(bytes: &[u8]) -> Result<CanonicalObject> {
	let value: Value = serde_json::from_slice(bytes)?;
	let Value::Object(object) = value else {
		return Err(Error::BadJson("event is not a json object".into()));
	};

	validate_object(&object)?;
	Ok(object)
}

/// Serialize a canonical object to its canonical byte form.
pub fn to_vec(object: &CanonicalObject) -> Result<Vec<u8>> {
	serde_json::to_vec(object).map_err(Into::into)
}

pub fn to_string(object: &CanonicalObject) -> Result<String> {
	serde_json::to_string(object).map_err(Into::into)
}

/// Reject values canonical JSON cannot express: floats, exponents, and
/// integers beyond ±2^53-1.
pub fn validate(value: &Value) -> Result {
	match value {
		Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
		Value::Number(n) => {
			let ok = n
				.as_i64()
				.is_some_and(|i| (-MAX_CANONICAL_INT..=MAX_CANONICAL_INT).contains(&i));
			ok.then_some(())
				.ok_or_else(|| Error::BadJson(format!("number {n} is not a canonical integer").into()))
		},
		Value::Array(values) => values.iter().try_for_each(validate),
		Value::Object(object) => validate_object(object),
	}
}

pub fn validate_object(object: &CanonicalObject) -> Result {
	object.values().try_for_each(validate)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn round_trip() {
		let bytes = br#"{"b":1,"a":{"z":[true,null,"x"],"y":-2}}"#;
		let object = from_slice(bytes).unwrap();
		let out = to_vec(&object).unwrap();
		// members re-sorted, no whitespace
		assert_eq!(out, br#"{"a":{"y":-2,"z":[true,null,"x"]},"b":1}"#);

		// parse(serialize(e)) == e
		assert_eq!(from_slice(&out).unwrap(), object);
	}

	#[test]
	fn rejects_floats_and_big_ints() {
		assert!(from_slice(br#"{"a":1.5}"#).is_err());
		assert!(from_slice(br#"{"a":9007199254740992}"#).is_err());
		assert!(from_slice(br#"{"a":9007199254740991}"#).is_ok());
		assert!(from_slice(br#"{"a":-9007199254740991}"#).is_ok());
	}

	#[test]
	fn sorts_by_code_point() {
		let object = from_slice(br#"{"é":1,"z":2,"A":3}"#.as_slice()).unwrap();
		let out = to_string(&object).unwrap();
		// 'A' < 'z' < 'é' by code point
		assert_eq!(out, "{\"A\":3,\"z\":2,\"\u{e9}\":1}");
	}

	#[test]
	fn nested_validation() {
		let bad = json!({"outer": {"inner": [1, 2, 3.25]}});
		assert!(validate(&bad).is_err());
	}
}
