//! On-demand retrieval of missing events, state and auth chains from peers.
//!
//! Submissions acquire a slot from a bounded global inflight budget and
//! queue when saturated. An attempt that fails non-terminally rotates to
//! the next origin from the caller's server list, skipping origins with a
//! recent transport error; terminal answers finish the request failed.

use std::{
	collections::{BTreeSet, HashMap},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
	event::canonical::CanonicalObject,
	fed,
	id::{EventId, RoomId, ServerName},
	utils, Error, Result, Server,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
	Event,
	Auth,
	Backfill,
	State,
	StateIds,
}

/// One tracked fetch; snapshots of these are exposed for introspection.
#[derive(Clone, Debug)]
pub struct Request {
	pub op: Op,
	pub room_id: RoomId,
	pub event_id: EventId,
	/// Server currently in flight.
	pub origin: Option<String>,
	pub attempted: BTreeSet<String>,
	pub started: u64,
	pub finished: Option<u64>,
	pub error: Option<String>,
}

/// What a completed fetch hands back to the evaluator; the VM re-enters
/// itself with each unseen event individually.
#[derive(Debug)]
pub enum Bundle {
	Events(Vec<CanonicalObject>),
	State { pdus: Vec<CanonicalObject>, auth_chain: Vec<CanonicalObject> },
	StateIds { pdu_ids: Vec<String>, auth_chain_ids: Vec<String> },
}

pub struct Fetcher {
	server: Arc<Server>,
	fed: Arc<fed::Client>,
	inflight: Arc<Semaphore>,
	pending: Mutex<HashMap<u64, Request>>,
	ticket: AtomicU64,
	/// origin -> millis of last transport error; consulted for rotation
	cooldown: Mutex<HashMap<String, u64>>,
}

impl Fetcher {
	pub fn new(server: &Arc<Server>, fed: &Arc<fed::Client>) -> Arc<Self> {
		Arc::new(Self {
			server: server.clone(),
			fed: fed.clone(),
			inflight: Arc::new(Semaphore::new(server.config.fetch_max_inflight)),
			pending: Mutex::new(HashMap::new()),
			ticket: AtomicU64::new(0),
			cooldown: Mutex::new(HashMap::new()),
		})
	}

	/// The pending set, for introspection.
	#[must_use]
	pub fn pending(&self) -> Vec<Request> {
		self.pending
			.lock()
			.expect("pending lock")
			.values()
			.cloned()
			.collect()
	}

	/// Fetch a single event by id.
	pub async fn event(
		&self,
		room_id: &RoomId,
		event_id: &EventId,
		origins: &[ServerName],
	) -> Result<Bundle> {
		self.run(Op::Event, room_id, event_id, origins, None).await
	}

	/// Fetch the auth chain for an event.
	pub async fn auth(
		&self,
		room_id: &RoomId,
		event_id: &EventId,
		origins: &[ServerName],
	) -> Result<Bundle> {
		self.run(Op::Auth, room_id, event_id, origins, None).await
	}

	/// Backfill history behind an anchor.
	pub async fn backfill(
		&self,
		room_id: &RoomId,
		anchor: &EventId,
		origins: &[ServerName],
		limit: usize,
	) -> Result<Bundle> {
		self.run(Op::Backfill, room_id, anchor, origins, Some(limit)).await
	}

	/// Fetch the full state at an event.
	pub async fn state(
		&self,
		room_id: &RoomId,
		event_id: &EventId,
		origins: &[ServerName],
	) -> Result<Bundle> {
		self.run(Op::State, room_id, event_id, origins, None).await
	}

	/// Fetch the state ids at an event.
	pub async fn state_ids(
		&self,
		room_id: &RoomId,
		event_id: &EventId,
		origins: &[ServerName],
	) -> Result<Bundle> {
		self.run(Op::StateIds, room_id, event_id, origins, None).await
	}

	async fn run(
		&self,
		op: Op,
		room_id: &RoomId,
		event_id: &EventId,
		origins: &[ServerName],
		limit: Option<usize>,
	) -> Result<Bundle> {
		self.server.check_running()?;

		let _slot = self
			.inflight
			.acquire()
			.await
			.map_err(|_| Error::ShutdownInProgress)?;

		let ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
		let request = Request {
			op,
			room_id: room_id.clone(),
			event_id: event_id.clone(),
			origin: None,
			attempted: BTreeSet::new(),
			started: utils::millis_since_unix_epoch(),
			finished: None,
			error: None,
		};
		self.pending.lock().expect("pending lock").insert(ticket, request);

		let result = self.rotate(ticket, op, room_id, event_id, origins, limit).await;

		let mut pending = self.pending.lock().expect("pending lock");
		if let Some(entry) = pending.get_mut(&ticket) {
			entry.finished = Some(utils::millis_since_unix_epoch());
			if let Err(e) = &result {
				entry.error = Some(e.to_string());
			}
		}
		pending.remove(&ticket);

		result
	}

	async fn rotate(
		&self,
		ticket: u64,
		op: Op,
		room_id: &RoomId,
		event_id: &EventId,
		origins: &[ServerName],
		limit: Option<usize>,
	) -> Result<Bundle> {
		let cooldown_window = self.server.config.origin_cooldown_secs.saturating_mul(1000);

		for origin in origins {
			self.server.check_running()?;

			if self.in_cooldown(origin, cooldown_window) {
				debug!(%origin, "skipping origin in cooldown");
				continue;
			}

			{
				let mut pending = self.pending.lock().expect("pending lock");
				if let Some(entry) = pending.get_mut(&ticket) {
					entry.origin = Some(origin.to_string());
					entry.attempted.insert(origin.to_string());
				}
			}

			match self.attempt(op, room_id, event_id, origin, limit).await {
				Ok(bundle) => return Ok(bundle),
				Err(e) if e.is_terminal() => {
					debug!(%origin, %event_id, "terminal fetch failure: {e}");
					return Err(e);
				},
				Err(e) => {
					warn!(%origin, %event_id, "fetch attempt failed: {e}");
					self.cooldown
						.lock()
						.expect("cooldown lock")
						.insert(origin.to_string(), utils::millis_since_unix_epoch());
				},
			}
		}

		Err(Error::FetchExhausted { event_id: event_id.to_string() })
	}

	fn in_cooldown(&self, origin: &ServerName, window_ms: u64) -> bool {
		let cooldown = self.cooldown.lock().expect("cooldown lock");
		cooldown
			.get(origin.as_str())
			.is_some_and(|&at| utils::millis_since_unix_epoch().saturating_sub(at) < window_ms)
	}

	async fn attempt(
		&self,
		op: Op,
		room_id: &RoomId,
		event_id: &EventId,
		origin: &ServerName,
		limit: Option<usize>,
	) -> Result<Bundle> {
		match op {
			Op::Event => {
				let response = self.fed.event(origin, event_id).await?;
				if response.pdus.is_empty() {
					return Err(Error::Federation {
						origin: origin.to_string(),
						code: "M_NOT_FOUND".into(),
						message: "origin returned no event".into(),
					});
				}
				Ok(Bundle::Events(response.pdus))
			},
			Op::Auth => {
				let response = self.fed.event_auth(origin, room_id, event_id).await?;
				Ok(Bundle::Events(response.auth_chain))
			},
			Op::Backfill => {
				let limit = limit.unwrap_or(64);
				let anchors = std::slice::from_ref(event_id);
				let response = self.fed.backfill(origin, room_id, anchors, limit).await?;
				Ok(Bundle::Events(response.pdus))
			},
			Op::State => {
				let response = self.fed.state(origin, room_id, event_id).await?;
				Ok(Bundle::State {
					pdus: response.pdus,
					auth_chain: response.auth_chain,
				})
			},
			Op::StateIds => {
				let response = self.fed.state_ids(origin, room_id, event_id).await?;
				Ok(Bundle::StateIds {
					pdu_ids: response.pdu_ids,
					auth_chain_ids: response.auth_chain_ids,
				})
			},
		}
	}
}

impl Drop for Fetcher {
	fn drop(&mut self) {
		let abandoned = self.pending.lock().map(|p| p.len()).unwrap_or(0);
		if abandoned > 0 {
			warn!(abandoned, "fetcher dropped with requests pending");
		}
	}
}
