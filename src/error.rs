use std::borrow::Cow;

use crate::id::Sigil;

/// Crate-wide result alias.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Error taxonomy. The storage variants mirror the engine's status codes;
/// the pipeline variants carry the phase or rule that produced them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	// storage
	#[error("not found: {0}")]
	NotFound(Cow<'static, str>),
	#[error("corruption: {0}")]
	Corruption(Cow<'static, str>),
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("invalid argument: {0}")]
	InvalidArgument(Cow<'static, str>),
	#[error("not supported: {0}")]
	NotSupported(Cow<'static, str>),
	#[error("busy: {0}")]
	Busy(Cow<'static, str>),
	#[error("timed out: {0}")]
	TimedOut(Cow<'static, str>),
	/// Cache miss in the non-blocking read tier. Never surfaced to a caller;
	/// the map offloads the read to the pool and retries.
	#[error("incomplete: {0}")]
	Incomplete(Cow<'static, str>),
	#[error("try again: {0}")]
	TryAgain(Cow<'static, str>),
	#[error("shutdown in progress")]
	ShutdownInProgress,

	// event pipeline
	#[error("malformed event: {0}")]
	Conform(Cow<'static, str>),
	#[error("verification failed: {0}")]
	Verify(Cow<'static, str>),
	#[error("unauthorized (rule {rule}): {reason}")]
	Auth { rule: u8, reason: Cow<'static, str> },
	#[error("access denied: {0}")]
	AccessDenied(Cow<'static, str>),
	#[error("fetch timed out via {origin}")]
	FetchTimeout { origin: String },
	#[error("no origin could satisfy the fetch for {event_id}")]
	FetchExhausted { event_id: String },
	#[error("room version {0} is not supported")]
	VersionMismatch(String),
	#[error("cancelled")]
	Cancelled,

	// identifiers and json
	#[error("invalid mxid: expected sigil '{}'", .0.char())]
	BadSigil(Sigil),
	#[error("invalid mxid: {0}")]
	BadId(Cow<'static, str>),
	#[error("not canonical json: {0}")]
	BadJson(Cow<'static, str>),
	#[error(transparent)]
	Json(#[from] serde_json::Error),

	// federation
	#[error("{code} from {origin}: {message}")]
	Federation { origin: String, code: Cow<'static, str>, message: String },
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error("request error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),
	#[error("signature error: {0}")]
	Signature(#[from] ed25519_dalek::SignatureError),

	// config
	#[error("configuration error: {0}")]
	Config(#[from] figment::Error),

	#[error("{0}")]
	Err(Cow<'static, str>),
}

impl Error {
	pub fn bad_database(msg: &'static str) -> Self { Self::Corruption(msg.into()) }

	#[inline]
	#[must_use]
	pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }

	#[inline]
	#[must_use]
	pub fn is_incomplete(&self) -> bool { matches!(self, Self::Incomplete(_)) }

	/// Whether a fetch attempt hitting this error should rotate to another
	/// origin rather than give up.
	#[must_use]
	pub fn is_terminal(&self) -> bool {
		match self {
			Self::VersionMismatch(_) | Self::AccessDenied(_) => true,
			Self::Federation { code, .. } => code == "M_NOT_FOUND" || code == "M_FORBIDDEN",
			_ => false,
		}
	}

	/// Matrix error code for the federation surface. Internal reason text is
	/// never sent to peers.
	#[must_use]
	pub fn federation_code(&self) -> &'static str {
		match self {
			Self::NotFound(_) | Self::FetchExhausted { .. } => "M_NOT_FOUND",
			Self::Auth { .. } | Self::AccessDenied(_) => "M_FORBIDDEN",
			Self::VersionMismatch(_) => "M_INCOMPATIBLE_ROOM_VERSION",
			Self::Conform(_) | Self::BadJson(_) | Self::BadId(_) | Self::BadSigil(_) =>
				"M_BAD_JSON",
			_ => "M_UNKNOWN",
		}
	}
}

pub(crate) fn map_engine_err(e: rocksdb::Error) -> Error {
	use rocksdb::ErrorKind;

	let what = e.to_string();
	match e.kind() {
		ErrorKind::NotFound => Error::NotFound(what.into()),
		ErrorKind::Corruption => Error::Corruption(what.into()),
		ErrorKind::IOError => Error::Io(std::io::Error::other(what)),
		ErrorKind::InvalidArgument => Error::InvalidArgument(what.into()),
		ErrorKind::NotSupported => Error::NotSupported(what.into()),
		ErrorKind::Busy => Error::Busy(what.into()),
		ErrorKind::TimedOut => Error::TimedOut(what.into()),
		ErrorKind::Incomplete => Error::Incomplete(what.into()),
		ErrorKind::TryAgain => Error::TryAgain(what.into()),
		ErrorKind::ShutdownInProgress => Error::ShutdownInProgress,
		_ => Error::Err(what.into()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn federation_codes_hide_internals() {
		let e = Error::Auth { rule: 10, reason: "cannot raise above own power".into() };
		assert_eq!(e.federation_code(), "M_FORBIDDEN");

		let e = Error::Corruption("sst block checksum".into());
		assert_eq!(e.federation_code(), "M_UNKNOWN");
	}

	#[test]
	fn terminal_classification() {
		assert!(Error::VersionMismatch("12".into()).is_terminal());
		assert!(!Error::TimedOut("peer".into()).is_terminal());
		let e = Error::Federation {
			origin: "remote.example".into(),
			code: "M_NOT_FOUND".into(),
			message: String::new(),
		};
		assert!(e.is_terminal());
	}
}
