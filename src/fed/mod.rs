//! Typed clients for the server-server endpoints the core consumes.
//!
//! Every request body is canonical JSON, signed per the X-Matrix scheme;
//! the HTTP client with its connection pool and TLS is supplied by the
//! caller's environment. Responses are capped in size and validated
//! against the typed response shapes before anything downstream sees them.

mod client;
mod request;

use std::{sync::Arc, time::Duration};

use ed25519_dalek::SigningKey;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::{
	event::canonical::{self, CanonicalObject},
	id::ServerName,
	Error, Result, Server,
};

pub use self::client::*;
pub use self::request::authorization;

pub struct Client {
	http: reqwest::Client,
	origin: ServerName,
	key_name: String,
	signing_key: Arc<SigningKey>,
	max_response_size: usize,
	timeout: Duration,
}

impl Client {
	pub fn new(
		server: &Arc<Server>,
		http: reqwest::Client,
		signing_key: Arc<SigningKey>,
		key_name: impl Into<String>,
	) -> Result<Arc<Self>> {
		Ok(Arc::new(Self {
			http,
			origin: ServerName::parse(&server.config.server_name)?,
			key_name: key_name.into(),
			signing_key,
			max_response_size: server.config.max_request_size,
			timeout: Duration::from_secs(server.config.request_timeout_secs),
		}))
	}

	#[inline]
	#[must_use]
	pub fn origin(&self) -> &ServerName { &self.origin }

	/// One signed round-trip: canonicalize, sign, submit, cap, parse.
	async fn request<T: DeserializeOwned>(
		&self,
		destination: &ServerName,
		method: http::Method,
		path_and_query: &str,
		body: Option<&CanonicalObject>,
	) -> Result<T> {
		let content = body.map(canonical::to_vec).transpose()?;
		let auth = request::authorization(
			&self.origin,
			destination,
			method.as_str(),
			path_and_query,
			content.as_deref(),
			&self.key_name,
			&self.signing_key,
		)?;

		let host = if destination.contains(':') {
			destination.to_string()
		} else {
			format!("{destination}:8448")
		};
		let url = url::Url::parse(&format!("https://{host}{path_and_query}"))?;

		trace!(%method, %url, "federation request");
		let mut req = self
			.http
			.request(method, url)
			.timeout(self.timeout)
			.header(http::header::AUTHORIZATION, auth);
		if let Some(content) = content {
			req = req
				.header(http::header::CONTENT_TYPE, "application/json")
				.body(content);
		}

		let response = req.send().await?;
		let status = response.status();
		let bytes = response.bytes().await?;
		if bytes.len() > self.max_response_size {
			return Err(Error::Federation {
				origin: destination.to_string(),
				code: "M_TOO_LARGE".into(),
				message: "response exceeds size cap".into(),
			});
		}

		if !status.is_success() {
			let (code, message) = parse_error_body(&bytes);
			debug!(%destination, %status, code, "federation error response");
			return Err(Error::Federation {
				origin: destination.to_string(),
				code: code.into(),
				message,
			});
		}

		serde_json::from_slice(&bytes).map_err(|e| Error::Federation {
			origin: destination.to_string(),
			code: "M_BAD_JSON".into(),
			message: e.to_string(),
		})
	}
}

fn parse_error_body(bytes: &[u8]) -> (String, String) {
	#[derive(serde::Deserialize)]
	struct MatrixError {
		#[serde(default)]
		errcode: Option<String>,
		#[serde(default)]
		error: Option<String>,
	}

	match serde_json::from_slice::<MatrixError>(bytes) {
		Ok(e) => (
			e.errcode.unwrap_or_else(|| "M_UNKNOWN".to_owned()),
			e.error.unwrap_or_default(),
		),
		Err(_) => ("M_UNKNOWN".to_owned(), String::new()),
	}
}
