//! Server signing-key cache.
//!
//! Remote verify keys are persisted as `m.key` state events in an internal
//! node pseudo-room, so the ordinary storage path handles them uniformly;
//! an in-memory LRU fronts the room state. The local keypair is generated
//! at first start and kept in the global column.

use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey};
use lru_cache::LruCache;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
	dbs::{Dbs, WriteOp, WriteOpts},
	event::{canonical, content_hash, EventHash, Pdu},
	fed,
	id::{EventId, NodeId, RoomId, ServerName, UserId},
	rooms::Rooms,
	utils, Error, Result, Server,
};

const CACHE_CAPACITY: usize = 1000;
const LOCAL_SEED_KEY: &[u8] = b"signing_key_seed";
const LOCAL_NAME_KEY: &[u8] = b"signing_key_name";

pub struct Keys {
	server: Arc<Server>,
	dbs: Arc<Dbs>,
	rooms: Arc<Rooms>,
	local: Arc<SigningKey>,
	key_name: String,
	cache: Mutex<LruCache<(String, String), VerifyingKey>>,
}

impl Keys {
	/// Load the local keypair, generating and persisting one on first
	/// start.
	pub fn open(server: &Arc<Server>, dbs: &Arc<Dbs>, rooms: &Arc<Rooms>) -> Result<Arc<Self>> {
		let (local, key_name) = match dbs.global.get_blocking(LOCAL_SEED_KEY)? {
			Some(seed) => {
				let seed: [u8; 32] = seed
					.try_into()
					.map_err(|_| Error::bad_database("signing key seed is not 32 bytes"))?;
				let name = dbs
					.global
					.get_blocking(LOCAL_NAME_KEY)?
					.ok_or_else(|| Error::bad_database("signing key has no name"))?;
				(SigningKey::from_bytes(&seed), utils::string_from_bytes(&name)?)
			},
			None => {
				let key = SigningKey::generate(&mut OsRng);
				let name = utils::random_string(8).to_lowercase();
				dbs.global.insert(LOCAL_SEED_KEY, key.as_bytes())?;
				dbs.global.insert(LOCAL_NAME_KEY, name.as_bytes())?;
				info!(key_id = %format!("ed25519:{name}"), "generated server signing key");
				(key, name)
			},
		};

		Ok(Arc::new(Self {
			server: server.clone(),
			dbs: dbs.clone(),
			rooms: rooms.clone(),
			local: Arc::new(local),
			key_name,
			cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
		}))
	}

	#[inline]
	#[must_use]
	pub fn signing_key(&self) -> Arc<SigningKey> { self.local.clone() }

	#[inline]
	#[must_use]
	pub fn key_name(&self) -> &str { &self.key_name }

	#[inline]
	#[must_use]
	pub fn key_id(&self) -> String { format!("ed25519:{}", self.key_name) }

	/// The verify key for `origin/key_id`, consulting cache, the node
	/// pseudo-room, and finally the origin itself through the federation
	/// client when one is supplied.
	pub async fn verify_key(
		&self,
		origin: &ServerName,
		key_id: &str,
		fed: Option<&fed::Client>,
	) -> Result<VerifyingKey> {
		if origin.as_str() == self.server.config.server_name {
			return Ok(self.local.verifying_key());
		}

		let cache_key = (origin.to_string(), key_id.to_owned());
		if let Some(hit) = self.cache.lock().expect("key cache lock").get_mut(&cache_key) {
			return Ok(*hit);
		}

		if let Some(key) = self.stored_key(origin, key_id).await? {
			self.cache.lock().expect("key cache lock").insert(cache_key, key);
			return Ok(key);
		}

		let Some(fed) = fed else {
			return Err(Error::NotFound(format!("no key {key_id} for {origin}").into()));
		};

		debug!(%origin, key_id, "fetching server keys");
		let response = fed.server_key(origin).await?;
		self.persist(origin, &response).await?;

		let encoded = response
			.verify_keys
			.get(key_id)
			.map(|k| k.key.as_str())
			.ok_or_else(|| Error::NotFound(format!("{origin} does not publish {key_id}").into()))?;
		let key = decode_key(encoded)?;
		self.cache.lock().expect("key cache lock").insert(cache_key, key);

		Ok(key)
	}

	/// The pseudo-room holding an origin's cached keys.
	fn node_room(&self, origin: &ServerName) -> Result<RoomId> {
		let local = ServerName::parse(&self.server.config.server_name)?;
		Ok(NodeId::from_server(origin).pseudo_room(&local))
	}

	async fn stored_key(&self, origin: &ServerName, key_id: &str) -> Result<Option<VerifyingKey>> {
		let room_id = self.node_room(origin)?;
		let room = self.rooms.room(&room_id);
		let Some(idx) = room.state_get("m.key", origin).await? else {
			return Ok(None);
		};

		let pdu = self.rooms.events.get(idx).await?;
		let Some(encoded) = pdu
			.content
			.get("verify_keys")
			.and_then(|vk| vk.get(key_id))
			.and_then(|k| k.get("key"))
			.and_then(Value::as_str)
		else {
			return Ok(None);
		};

		decode_key(encoded).map(Some)
	}

	/// Record a key response as a state event; depth is the fetch time so
	/// newer responses shadow older ones in the cell history.
	async fn persist(&self, origin: &ServerName, response: &fed::ServerKeysResponse) -> Result {
		let local = ServerName::parse(&self.server.config.server_name)?;
		let mut pdu = Pdu {
			event_id: EventId::generate(&local),
			room_id: self.node_room(origin)?,
			sender: UserId::parse(format!("@key:{local}"))?,
			origin: Some(local),
			origin_server_ts: utils::millis_since_unix_epoch(),
			kind: "m.key".to_owned(),
			content: json!({
				"server_name": response.server_name,
				"verify_keys": response
					.verify_keys
					.iter()
					.map(|(id, k)| (id.clone(), json!({ "key": k.key })))
					.collect::<serde_json::Map<_, _>>(),
				"valid_until_ts": response.valid_until_ts,
			}),
			state_key: Some(origin.to_string()),
			prev_events: Vec::new(),
			prev_state: None,
			depth: utils::millis_since_unix_epoch(),
			auth_events: Vec::new(),
			redacts: None,
			unsigned: None,
			hashes: None,
			signatures: None,
		};

		let object = pdu.to_object()?;
		pdu.hashes = Some(EventHash { sha256: content_hash(&object)? });
		let json = canonical::to_vec(&pdu.to_object()?)?;

		let idx = self.dbs.next_idx().await?;
		let opts =
			WriteOpts { op: WriteOp::Set, event_idx: idx, horizon_resolve: false, refs: false };
		let mut batch = self.dbs.db.batch();
		self.dbs.write(&mut batch, &pdu, &json, &opts).await?;
		batch.commit()
	}
}

fn decode_key(encoded: &str) -> Result<VerifyingKey> {
	let bytes: [u8; 32] = STANDARD_NO_PAD
		.decode(encoded)
		.map_err(|_| Error::Verify("verify key is not valid base64".into()))?
		.try_into()
		.map_err(|_| Error::Verify("verify key is not 32 bytes".into()))?;

	VerifyingKey::from_bytes(&bytes).map_err(Into::into)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::env;

	#[tokio::test]
	async fn local_keypair_persists_across_opens() {
		let t = env().await;
		let rooms = Rooms::new(&t.server, &t.dbs);

		let first = Keys::open(&t.server, &t.dbs, &rooms).unwrap();
		let second = Keys::open(&t.server, &t.dbs, &rooms).unwrap();
		assert_eq!(
			first.signing_key().verifying_key(),
			second.signing_key().verifying_key(),
		);
		assert_eq!(first.key_id(), second.key_id());
	}

	#[tokio::test]
	async fn persisted_remote_keys_resolve_without_network() {
		let t = env().await;
		let rooms = Rooms::new(&t.server, &t.dbs);
		let keys = Keys::open(&t.server, &t.dbs, &rooms).unwrap();

		let origin = ServerName::parse("remote.example").unwrap();
		let remote = SigningKey::from_bytes(&[9u8; 32]);
		let encoded = STANDARD_NO_PAD.encode(remote.verifying_key().as_bytes());
		let response = fed::ServerKeysResponse {
			server_name: "remote.example".into(),
			verify_keys: [(
				"ed25519:abc".to_owned(),
				fed::VerifyKey { key: encoded },
			)]
			.into(),
			old_verify_keys: Default::default(),
			valid_until_ts: Some(u64::MAX),
			signatures: None,
		};
		keys.persist(&origin, &response).await.unwrap();

		let resolved = keys.verify_key(&origin, "ed25519:abc", None).await.unwrap();
		assert_eq!(resolved, remote.verifying_key());
	}

	#[tokio::test]
	async fn unknown_key_without_client_is_not_found() {
		let t = env().await;
		let rooms = Rooms::new(&t.server, &t.dbs);
		let keys = Keys::open(&t.server, &t.dbs, &rooms).unwrap();

		let origin = ServerName::parse("stranger.example").unwrap();
		let err = keys.verify_key(&origin, "ed25519:zzz", None).await.unwrap_err();
		assert!(err.is_not_found());
	}
}
