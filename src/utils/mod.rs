use std::time::{SystemTime, UNIX_EPOCH};

use rand::{distributions::Alphanumeric, Rng};

use crate::{Error, Result};

pub fn millis_since_unix_epoch() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("time is valid")
		.as_millis() as u64
}

/// Parses the bytes into an u64.
pub fn u64_from_bytes(bytes: &[u8]) -> Result<u64> {
	let array: [u8; 8] = bytes
		.try_into()
		.map_err(|_| Error::bad_database("value is not 8 bytes"))?;
	Ok(u64::from_be_bytes(array))
}

/// Parses the bytes into a string.
pub fn string_from_bytes(bytes: &[u8]) -> Result<String> {
	String::from_utf8(bytes.to_vec()).map_err(|_| Error::bad_database("value is not utf-8"))
}

pub fn random_string(length: usize) -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(length)
		.map(char::from)
		.collect()
}

/// Incremented counter value over the previous stored big-endian u64.
/// Counters start at one; zero is reserved to mean "no event".
pub fn increment(old: Option<&[u8]>) -> [u8; 8] {
	let number = match old.map(TryInto::try_into) {
		Some(Ok(bytes)) => u64::from_be_bytes(bytes).wrapping_add(1),
		_ => 1,
	};

	number.to_be_bytes()
}

/// Splits the slice at the first occurrence of the separator.
pub fn split_once(bytes: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
	let pos = bytes.iter().position(|&b| b == sep)?;
	Some((&bytes[..pos], &bytes[pos.saturating_add(1)..]))
}

/// Glob matching as server ACLs use it: `*` spans any sequence, `?` any
/// single character.
pub fn wildcard_match(pattern: &str, subject: &str) -> bool {
	let pattern: Vec<char> = pattern.chars().collect();
	let subject: Vec<char> = subject.chars().collect();
	wildcard_inner(&pattern, &subject)
}

fn wildcard_inner(pattern: &[char], subject: &[char]) -> bool {
	match (pattern.first(), subject.first()) {
		(None, None) => true,
		(Some('*'), _) =>
			wildcard_inner(&pattern[1..], subject)
				|| (!subject.is_empty() && wildcard_inner(pattern, &subject[1..])),
		(Some('?'), Some(_)) => wildcard_inner(&pattern[1..], &subject[1..]),
		(Some(p), Some(s)) if p == s => wildcard_inner(&pattern[1..], &subject[1..]),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn increment_wraps_from_empty() {
		assert_eq!(u64::from_be_bytes(increment(None)), 1);
		let two = increment(Some(&increment(None)));
		assert_eq!(u64::from_be_bytes(two), 2);
	}

	#[test]
	fn split_once_finds_separator() {
		assert_eq!(split_once(b"a\xFFbc", 0xFF), Some((&b"a"[..], &b"bc"[..])));
		assert_eq!(split_once(b"abc", 0xFF), None);
	}

	#[test]
	fn wildcard_matching() {
		assert!(wildcard_match("*.example.org", "evil.example.org"));
		assert!(wildcard_match("exact.host", "exact.host"));
		assert!(wildcard_match("1.2.3.?", "1.2.3.4"));
		assert!(!wildcard_match("*.example.org", "example.org"));
		assert!(!wildcard_match("other.host", "exact.host"));
	}
}
