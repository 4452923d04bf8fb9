//! Sigil-discriminated Matrix identifiers.
//!
//! Every fully-qualified id is a short string with a leading sigil naming its
//! kind and a `:host` tail naming the origin server. Event ids in hash-derived
//! room versions carry no host; device ids carry no sigil and are scoped to
//! the owning server.

use std::{fmt, hash::Hash, ops::Deref};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{utils, Error, Result};

/// Maximum length of any identifier, per the Matrix common identifier format.
pub const MAX_ID_LENGTH: usize = 255;

/// Kind discriminator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Sigil {
	Event,
	User,
	Room,
	RoomAlias,
	Group,
	/// Internal kind naming an origin server itself; used for the node
	/// pseudo-room that stores cached server keys.
	Node,
}

impl Sigil {
	#[must_use]
	pub const fn char(self) -> char {
		match self {
			Self::Event => '$',
			Self::User => '@',
			Self::Room => '!',
			Self::RoomAlias => '#',
			Self::Group => '+',
			Self::Node => ':',
		}
	}

	#[must_use]
	pub const fn from_char(c: char) -> Option<Self> {
		match c {
			'$' => Some(Self::Event),
			'@' => Some(Self::User),
			'!' => Some(Self::Room),
			'#' => Some(Self::RoomAlias),
			'+' => Some(Self::Group),
			':' => Some(Self::Node),
			_ => None,
		}
	}
}

macro_rules! id_type {
	($name:ident, $sigil:expr, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
		pub struct $name(Box<str>);

		impl $name {
			pub const SIGIL: Sigil = $sigil;

			pub fn parse(s: impl AsRef<str>) -> Result<Self> {
				let s = s.as_ref();
				validate(Self::SIGIL, s)?;
				Ok(Self(s.into()))
			}

			/// The part between the sigil and the `:host` tail.
			#[must_use]
			pub fn localpart(&self) -> &str {
				let rest = &self.0[1..];
				rest.split_once(':').map_or(rest, |(local, _)| local)
			}

			/// The origin server, if the id is fully qualified.
			#[must_use]
			pub fn hostname(&self) -> Option<&str> {
				self.0[1..].split_once(':').map(|(_, host)| host)
			}

			#[inline]
			#[must_use]
			pub fn as_str(&self) -> &str { &self.0 }
		}

		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str { &self.0 }
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str { &self.0 }
		}

		impl AsRef<[u8]> for $name {
			fn as_ref(&self) -> &[u8] { self.0.as_bytes() }
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
		}

		impl std::str::FromStr for $name {
			type Err = Error;

			fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
		}

		impl TryFrom<String> for $name {
			type Error = Error;

			fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
		}

		impl Serialize for $name {
			fn serialize<S: Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
				ser.serialize_str(&self.0)
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D: Deserializer<'de>>(
				de: D,
			) -> std::result::Result<Self, D::Error> {
				let s = String::deserialize(de)?;
				Self::parse(&s).map_err(de::Error::custom)
			}
		}
	};
}

id_type!(EventId, Sigil::Event, "An event id: `$localpart:server` or `$base64` in hash-derived room versions.");
id_type!(UserId, Sigil::User, "A user id: `@localpart:server`.");
id_type!(RoomId, Sigil::Room, "A room id: `!opaque:server`.");
id_type!(RoomAliasId, Sigil::RoomAlias, "A room alias: `#alias:server`.");
id_type!(NodeId, Sigil::Node, "An origin server as an id subject; internal.");

fn validate(sigil: Sigil, s: &str) -> Result {
	if s.len() > MAX_ID_LENGTH {
		return Err(Error::BadId("id exceeds 255 bytes".into()));
	}

	let mut chars = s.chars();
	if chars.next().and_then(Sigil::from_char) != Some(sigil) {
		return Err(Error::BadSigil(sigil));
	}

	let rest = &s[1..];
	if rest.is_empty() {
		return Err(Error::BadId("empty localpart".into()));
	}

	// Event ids in hash-derived versions are unqualified; everything else
	// requires a `:host` tail.
	let qualified = matches!(sigil, Sigil::User | Sigil::Room | Sigil::RoomAlias);
	if qualified {
		let Some((local, host)) = rest.split_once(':') else {
			return Err(Error::BadId("missing :host tail".into()));
		};
		if local.is_empty() || host.is_empty() {
			return Err(Error::BadId("empty localpart or host".into()));
		}
	}

	Ok(())
}

impl UserId {
	/// The server the user belongs to; always present for user ids.
	#[must_use]
	pub fn server_name(&self) -> &str { self.hostname().expect("user id is fully qualified") }

	/// Guest ids take a random localpart.
	pub fn generate_guest(server: &ServerName) -> Self {
		Self(format!("@guest_{}:{server}", utils::random_string(12).to_lowercase()).into())
	}
}

impl RoomId {
	/// The server that created the room; always present for room ids.
	#[must_use]
	pub fn server_name(&self) -> &str { self.hostname().expect("room id is fully qualified") }

	/// New room ids take a time-based opaque localpart.
	pub fn generate(server: &ServerName) -> Self {
		Self(format!("!{}:{server}", timebased_localpart()).into())
	}
}

impl EventId {
	/// Server-generated id form used by room versions 1 and 2.
	pub fn generate(server: &ServerName) -> Self {
		Self(format!("${}:{server}", timebased_localpart()).into())
	}

	/// Hash-derived ids carry no `:host` tail.
	#[must_use]
	pub fn is_reference_hash(&self) -> bool { self.hostname().is_none() }
}

impl RoomAliasId {
	/// Aliases take a caller-supplied localpart.
	pub fn from_parts(alias: &str, server: &ServerName) -> Result<Self> {
		Self::parse(format!("#{alias}:{server}"))
	}
}

impl NodeId {
	pub fn from_server(server: &ServerName) -> Self { Self(format!(":{server}").into()) }

	/// The pseudo-room holding this node's cached keys as state events.
	pub fn pseudo_room(&self, local: &ServerName) -> RoomId {
		RoomId(format!("!{}:{local}", self.localpart()).into())
	}
}

/// A server name: hostname with optional port, no sigil.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ServerName(Box<str>);

impl ServerName {
	pub fn parse(s: impl AsRef<str>) -> Result<Self> {
		let s = s.as_ref();
		if s.is_empty() || s.len() > MAX_ID_LENGTH {
			return Err(Error::BadId("server name length".into()));
		}

		let (host, port) = match s.rsplit_once(':') {
			Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => (host, Some(port)),
			_ => (s, None),
		};
		if host.is_empty() || port.is_some_and(str::is_empty) {
			return Err(Error::BadId("empty host".into()));
		}
		if host.contains(['@', '!', '$', '#', '/', '?']) {
			return Err(Error::BadId("invalid character in server name".into()));
		}

		Ok(Self(s.into()))
	}

	#[inline]
	#[must_use]
	pub fn as_str(&self) -> &str { &self.0 }

	#[must_use]
	pub fn host(&self) -> &str {
		self.0
			.rsplit_once(':')
			.filter(|(_, p)| p.bytes().all(|b| b.is_ascii_digit()))
			.map_or(&self.0, |(host, _)| host)
	}
}

impl Deref for ServerName {
	type Target = str;

	fn deref(&self) -> &str { &self.0 }
}

impl AsRef<str> for ServerName {
	fn as_ref(&self) -> &str { &self.0 }
}

impl fmt::Display for ServerName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl std::str::FromStr for ServerName {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl Serialize for ServerName {
	fn serialize<S: Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
		ser.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for ServerName {
	fn deserialize<D: Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
		let s = String::deserialize(de)?;
		Self::parse(&s).map_err(de::Error::custom)
	}
}

/// A device id: opaque, server-scoped, no sigil.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct DeviceId(Box<str>);

impl DeviceId {
	pub fn generate() -> Self { Self(utils::random_string(10).into()) }
}

impl Deref for DeviceId {
	type Target = str;

	fn deref(&self) -> &str { &self.0 }
}

fn timebased_localpart() -> String {
	// Millisecond timestamp in base36 with random tail; sorts roughly by
	// creation time and never collides in practice.
	let mut ts = utils::millis_since_unix_epoch();
	let mut out = String::with_capacity(18);
	while ts > 0 {
		let digit = (ts % 36) as u32;
		out.push(char::from_digit(digit, 36).expect("digit below radix"));
		ts /= 36;
	}

	out.push_str(&utils::random_string(8));
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn server() -> ServerName { ServerName::parse("example.org").unwrap() }

	#[test]
	fn parse_rejects_wrong_sigil() {
		assert!(UserId::parse("$notauser:example.org").is_err());
		assert!(RoomId::parse("@notaroom:example.org").is_err());
	}

	#[test]
	fn parse_requires_host_tail() {
		assert!(UserId::parse("@alice").is_err());
		assert!(RoomId::parse("!opaque").is_err());

		// hash-derived event ids are legitimately unqualified
		let id = EventId::parse("$0yTSUxhp3fjBtrzhd7TfAUMQK8ZlKxLl0DHjPQFnCGQ").unwrap();
		assert!(id.is_reference_hash());
	}

	#[test]
	fn localpart_and_host() {
		let alice = UserId::parse("@alice:example.org").unwrap();
		assert_eq!(alice.localpart(), "alice");
		assert_eq!(alice.server_name(), "example.org");

		let port = ServerName::parse("example.org:8448").unwrap();
		assert_eq!(port.host(), "example.org");
	}

	#[test]
	fn generators() {
		let room = RoomId::generate(&server());
		assert_eq!(room.server_name(), "example.org");

		let event = EventId::generate(&server());
		assert!(!event.is_reference_hash());

		let guest = UserId::generate_guest(&server());
		assert!(guest.localpart().starts_with("guest_"));
	}

	#[test]
	fn node_pseudo_room() {
		let node = NodeId::from_server(&ServerName::parse("remote.example").unwrap());
		let room = node.pseudo_room(&server());
		assert_eq!(room.localpart(), "remote.example");
		assert_eq!(room.server_name(), "example.org");
	}

	#[test]
	fn length_cap() {
		let long = format!("@{}:example.org", "a".repeat(300));
		assert!(UserId::parse(&long).is_err());
	}
}
