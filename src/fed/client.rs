use std::collections::BTreeMap;

use http::Method;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::Client;
use crate::{
	event::canonical::CanonicalObject,
	id::{EventId, RoomId, ServerName, UserId},
	Result,
};

#[derive(Debug, Deserialize)]
pub struct VersionResponse {
	pub server: ServerVersion,
}

#[derive(Debug, Deserialize)]
pub struct ServerVersion {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct MakeJoinResponse {
	#[serde(default)]
	pub room_version: Option<String>,
	pub event: CanonicalObject,
}

#[derive(Debug, Deserialize)]
pub struct SendJoinResponse {
	#[serde(default)]
	pub origin: Option<String>,
	#[serde(default)]
	pub state: Vec<CanonicalObject>,
	#[serde(default)]
	pub auth_chain: Vec<CanonicalObject>,
}

#[derive(Debug, Deserialize)]
pub struct InviteResponse {
	pub event: CanonicalObject,
}

#[derive(Debug, Deserialize)]
pub struct StateResponse {
	#[serde(default)]
	pub pdus: Vec<CanonicalObject>,
	#[serde(default)]
	pub auth_chain: Vec<CanonicalObject>,
}

#[derive(Debug, Deserialize)]
pub struct StateIdsResponse {
	#[serde(default)]
	pub pdu_ids: Vec<String>,
	#[serde(default)]
	pub auth_chain_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackfillResponse {
	#[serde(default)]
	pub origin: Option<String>,
	#[serde(default)]
	pub origin_server_ts: Option<u64>,
	#[serde(default)]
	pub pdus: Vec<CanonicalObject>,
}

#[derive(Debug, Deserialize)]
pub struct EventResponse {
	#[serde(default)]
	pub pdus: Vec<CanonicalObject>,
}

#[derive(Debug, Deserialize)]
pub struct EventAuthResponse {
	#[serde(default)]
	pub auth_chain: Vec<CanonicalObject>,
}

#[derive(Debug, Deserialize)]
pub struct QueryAuthResponse {
	#[serde(default)]
	pub auth_chain: Vec<CanonicalObject>,
	#[serde(default)]
	pub missing: Vec<String>,
	#[serde(default)]
	pub rejects: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
	/// Per-event results; an empty object means accepted.
	#[serde(default)]
	pub pdus: BTreeMap<String, PduResult>,
}

#[derive(Debug, Deserialize)]
pub struct PduResult {
	#[serde(default)]
	pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MissingEventsResponse {
	#[serde(default)]
	pub events: Vec<CanonicalObject>,
}

#[derive(Debug, Deserialize)]
pub struct UserDevicesResponse {
	pub user_id: String,
	#[serde(default)]
	pub stream_id: u64,
	#[serde(default)]
	pub devices: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UserKeysResponse {
	#[serde(default)]
	pub device_keys: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct UserKeysClaimResponse {
	#[serde(default)]
	pub one_time_keys: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ServerKeysResponse {
	pub server_name: String,
	#[serde(default)]
	pub verify_keys: BTreeMap<String, VerifyKey>,
	#[serde(default)]
	pub old_verify_keys: BTreeMap<String, Value>,
	#[serde(default)]
	pub valid_until_ts: Option<u64>,
	#[serde(default)]
	pub signatures: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyKey {
	pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct PublicRoomsResponse {
	#[serde(default)]
	pub chunk: Vec<Value>,
	#[serde(default)]
	pub total_room_count_estimate: Option<u64>,
}

impl Client {
	pub async fn version(&self, destination: &ServerName) -> Result<VersionResponse> {
		self.request(destination, Method::GET, "/_matrix/federation/v1/version", None)
			.await
	}

	pub async fn make_join(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		user_id: &UserId,
		versions: &[&str],
	) -> Result<MakeJoinResponse> {
		let ver: String = versions.iter().map(|v| format!("ver={v}")).join("&");
		let path = format!(
			"/_matrix/federation/v1/make_join/{room_id}/{user_id}?{ver}",
		);
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn send_join(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		event_id: &EventId,
		event: &CanonicalObject,
	) -> Result<SendJoinResponse> {
		let path = format!("/_matrix/federation/v2/send_join/{room_id}/{event_id}");
		self.request(destination, Method::PUT, &path, Some(event)).await
	}

	pub async fn invite(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		event_id: &EventId,
		body: &CanonicalObject,
	) -> Result<InviteResponse> {
		let path = format!("/_matrix/federation/v2/invite/{room_id}/{event_id}");
		self.request(destination, Method::PUT, &path, Some(body)).await
	}

	pub async fn state(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		event_id: &EventId,
	) -> Result<StateResponse> {
		let path =
			format!("/_matrix/federation/v1/state/{room_id}?event_id={event_id}");
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn state_ids(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		event_id: &EventId,
	) -> Result<StateIdsResponse> {
		let path =
			format!("/_matrix/federation/v1/state_ids/{room_id}?event_id={event_id}");
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn backfill(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		anchors: &[EventId],
		limit: usize,
	) -> Result<BackfillResponse> {
		let vs: String = anchors.iter().map(|v| format!("v={v}")).join("&");
		let path = format!("/_matrix/federation/v1/backfill/{room_id}?{vs}&limit={limit}");
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn event(
		&self,
		destination: &ServerName,
		event_id: &EventId,
	) -> Result<EventResponse> {
		let path = format!("/_matrix/federation/v1/event/{event_id}");
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn event_auth(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		event_id: &EventId,
	) -> Result<EventAuthResponse> {
		let path = format!("/_matrix/federation/v1/event_auth/{room_id}/{event_id}");
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn query_auth(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		event_id: &EventId,
		auth_chain: Vec<CanonicalObject>,
	) -> Result<QueryAuthResponse> {
		let mut body = Map::new();
		body.insert(
			"auth_chain".to_owned(),
			Value::Array(auth_chain.into_iter().map(Value::Object).collect()),
		);

		let path = format!("/_matrix/federation/v1/query_auth/{room_id}/{event_id}");
		self.request(destination, Method::POST, &path, Some(&body)).await
	}

	/// Submit one transaction. Callers bound the payload to 50 PDUs and
	/// 100 EDUs; per-destination ordering is the sender's responsibility.
	pub async fn send_transaction(
		&self,
		destination: &ServerName,
		txn_id: &str,
		pdus: Vec<CanonicalObject>,
		edus: Vec<CanonicalObject>,
	) -> Result<SendResponse> {
		debug_assert!(pdus.len() <= 50, "transaction exceeds PDU cap");
		debug_assert!(edus.len() <= 100, "transaction exceeds EDU cap");

		let mut body = Map::new();
		body.insert("origin".to_owned(), Value::String(self.origin.to_string()));
		body.insert(
			"origin_server_ts".to_owned(),
			Value::Number(crate::utils::millis_since_unix_epoch().into()),
		);
		body.insert(
			"pdus".to_owned(),
			Value::Array(pdus.into_iter().map(Value::Object).collect()),
		);
		if !edus.is_empty() {
			body.insert(
				"edus".to_owned(),
				Value::Array(edus.into_iter().map(Value::Object).collect()),
			);
		}

		let path = format!("/_matrix/federation/v1/send/{txn_id}");
		self.request(destination, Method::PUT, &path, Some(&body)).await
	}

	pub async fn get_missing_events(
		&self,
		destination: &ServerName,
		room_id: &RoomId,
		earliest: &[EventId],
		latest: &[EventId],
		limit: usize,
		min_depth: u64,
	) -> Result<MissingEventsResponse> {
		let ids = |list: &[EventId]| {
			Value::Array(
				list.iter()
					.map(|id| Value::String(id.as_str().to_owned()))
					.collect(),
			)
		};

		let mut body = Map::new();
		body.insert("earliest_events".to_owned(), ids(earliest));
		body.insert("latest_events".to_owned(), ids(latest));
		body.insert("limit".to_owned(), Value::Number(limit.into()));
		body.insert("min_depth".to_owned(), Value::Number(min_depth.into()));

		let path = format!("/_matrix/federation/v1/get_missing_events/{room_id}");
		self.request(destination, Method::POST, &path, Some(&body)).await
	}

	pub async fn user_devices(
		&self,
		destination: &ServerName,
		user_id: &UserId,
	) -> Result<UserDevicesResponse> {
		let path = format!("/_matrix/federation/v1/user/devices/{user_id}");
		self.request(destination, Method::GET, &path, None).await
	}

	pub async fn user_keys_query(
		&self,
		destination: &ServerName,
		device_keys: BTreeMap<String, Vec<String>>,
	) -> Result<UserKeysResponse> {
		let mut body = Map::new();
		body.insert(
			"device_keys".to_owned(),
			serde_json::to_value(device_keys).unwrap_or(Value::Null),
		);

		self.request(
			destination,
			Method::POST,
			"/_matrix/federation/v1/user/keys/query",
			Some(&body),
		)
		.await
	}

	pub async fn user_keys_claim(
		&self,
		destination: &ServerName,
		one_time_keys: BTreeMap<String, BTreeMap<String, String>>,
	) -> Result<UserKeysClaimResponse> {
		let mut body = Map::new();
		body.insert(
			"one_time_keys".to_owned(),
			serde_json::to_value(one_time_keys).unwrap_or(Value::Null),
		);

		self.request(
			destination,
			Method::POST,
			"/_matrix/federation/v1/user/keys/claim",
			Some(&body),
		)
		.await
	}

	/// A server's published signing keys.
	pub async fn server_key(&self, destination: &ServerName) -> Result<ServerKeysResponse> {
		self.request(destination, Method::GET, "/_matrix/key/v2/server", None)
			.await
	}

	pub async fn public_rooms(
		&self,
		destination: &ServerName,
		limit: usize,
	) -> Result<PublicRoomsResponse> {
		let path = format!("/_matrix/federation/v1/publicRooms?limit={limit}");
		self.request(destination, Method::GET, &path, None).await
	}
}
