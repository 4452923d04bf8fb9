use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use super::{Opts, Outcome, Phase, Vm};
use crate::{
	auth::{self, AuthSet},
	dbs::{WriteOp, WriteOpts},
	event::{
		canonical::{self, CanonicalObject},
		content_hash, event_id_for, sign, Builder, EventRef, Pdu, RoomVersion,
	},
	fetch::Bundle,
	id::{EventId, RoomId, ServerName, UserId},
	utils, Error, Result,
};

impl Vm {
	/// ISSUE: author a new event locally. Fills ancestry from the current
	/// head, selects the auth events from current state, stamps the
	/// timestamp, hashes, signs, derives the id, then runs the common
	/// pipeline.
	#[instrument(skip(self, builder, opts), fields(room_id = %room_id, kind = %builder.kind))]
	pub async fn author(
		&self,
		room_id: &RoomId,
		sender: &UserId,
		builder: Builder,
		opts: &Opts,
	) -> Result<Outcome> {
		let services = &self.services;
		let local = ServerName::parse(&services.server.config.server_name)?;
		let room = services.rooms.room(room_id);

		let version = if builder.kind == "m.room.create" {
			let id = builder
				.content
				.get("room_version")
				.and_then(Value::as_str)
				.unwrap_or("1");
			RoomVersion::from_id(id)?
		} else {
			room.version().await?
		};

		// ancestry from the current head
		let (prev_events, depth) = if builder.kind == "m.room.create" {
			(Vec::new(), 1)
		} else {
			let heads = room.head_ids().await?;
			if heads.is_empty() {
				return Err(Error::NotFound("room has no head".into()));
			}

			let mut depth = 0u64;
			let mut refs = Vec::with_capacity(heads.len());
			for (idx, event_id) in heads {
				let head = services.rooms.events.get(idx).await?;
				depth = depth.max(head.depth);
				refs.push(if version.reference_hashes {
					EventRef::bare(event_id)
				} else {
					let sha256 = head
						.hashes
						.as_ref()
						.map(|h| h.sha256.clone())
						.unwrap_or_default();
					EventRef::hashed(event_id, sha256)
				});
			}

			(refs, depth.saturating_add(1))
		};

		// auth events from current state, per the allowed selectors
		let mut probe = Pdu {
			event_id: EventId::parse("$probe")?,
			room_id: room_id.clone(),
			sender: sender.clone(),
			origin: Some(local.clone()),
			origin_server_ts: builder.timestamp.unwrap_or_else(utils::millis_since_unix_epoch),
			kind: builder.kind.clone(),
			content: builder.content.clone(),
			state_key: builder.state_key.clone(),
			prev_events,
			prev_state: None,
			depth,
			auth_events: Vec::new(),
			redacts: builder.redacts.clone(),
			unsigned: None,
			hashes: None,
			signatures: None,
		};

		if probe.kind != "m.room.create" {
			for (kind, state_key) in auth::auth_selectors(&probe) {
				if let Some(idx) = room.state_get(&kind, &state_key).await? {
					let auth_pdu = services.rooms.events.get(idx).await?;
					probe.auth_events.push(if version.reference_hashes {
						EventRef::bare(auth_pdu.event_id.clone())
					} else {
						let sha256 = auth_pdu
							.hashes
							.as_ref()
							.map(|h| h.sha256.clone())
							.unwrap_or_default();
						EventRef::hashed(auth_pdu.event_id.clone(), sha256)
					});
				}
			}
		}

		// the wire object carries no id in hash-derived versions
		let mut object = probe.to_object()?;
		object.remove("event_id");
		if !version.reference_hashes {
			let event_id = EventId::generate(&local);
			object.insert("event_id".to_owned(), Value::String(event_id.to_string()));
		}

		let sha256 = content_hash(&object)?;
		object.insert(
			"hashes".to_owned(),
			serde_json::json!({ "sha256": sha256 }),
		);
		sign::sign_object(
			&mut object,
			&local,
			services.keys.key_name(),
			&services.keys.signing_key(),
		)?;

		self.eval(object, opts).await
	}

	/// Evaluate one event object through the phase pipeline. Ancestors
	/// obtained from fetches re-enter this same function.
	pub fn eval<'a>(
		&'a self,
		mut object: CanonicalObject,
		opts: &'a Opts,
	) -> BoxFuture<'a, Result<Outcome>> {
		async move {
			let services = &self.services;
			services.server.check_running()?;

			let kind = object
				.get("type")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_owned();
			let Some(room_id) = object
				.get("room_id")
				.and_then(Value::as_str)
				.and_then(|r| RoomId::parse(r).ok())
			else {
				return Ok(reject(Phase::Conform, Error::Conform("missing room_id".into())));
			};

			// version resolution; an unknown room triggers FETCH_STATE
			let version = match self.resolve_version(&kind, &room_id, &object, opts).await? {
				Ok(version) => version,
				Err(outcome) => return Ok(outcome),
			};

			// the wire form of hash-derived versions excludes the id
			let claimed_id = object
				.remove("event_id")
				.and_then(|v| v.as_str().and_then(|s| EventId::parse(s).ok()));
			let event_id = if version.reference_hashes {
				match event_id_for(&object, &version, services.fed.origin()) {
					Ok(id) => id,
					Err(e) => return Ok(reject(Phase::Conform, e)),
				}
			} else {
				match claimed_id {
					Some(id) => {
						object.insert(
							"event_id".to_owned(),
							Value::String(id.to_string()),
						);
						id
					},
					None =>
						return Ok(reject(
							Phase::Conform,
							Error::Conform("event_id required by room version".into()),
						)),
				}
			};

			let pdu = match Pdu::from_id_object(&event_id, object.clone()) {
				Ok(pdu) => Arc::new(pdu),
				Err(e) => return Ok(reject(Phase::Conform, Error::Conform(e.to_string().into()))),
			};

			trace!(event_id = %pdu.event_id, kind = %pdu.kind, "evaluation running");

			// CONFORM
			if opts.conform {
				let wire = canonical::to_vec(&object)?;
				if let Err(e) = canonical::validate_object(&object)
					.and_then(|()| pdu.conform(wire.len()))
				{
					return Ok(reject(Phase::Conform, e));
				}
			}

			// ACCESS
			if opts.access {
				if let Err(e) = self.check_access(&pdu).await {
					return Ok(reject(Phase::Access, e));
				}
			}

			// VERIFY: content hash and signature over the wire form
			if opts.verify {
				let mut wire_object = object.clone();
				if version.reference_hashes {
					wire_object.remove("event_id");
				}
				if let Err(e) = self.check_signatures(&pdu, &wire_object).await {
					return Ok(reject(Phase::Verify, e));
				}
			}

			// FETCH_AUTH
			let missing = self.missing_of(pdu.auth_ids()).await?;
			if !missing.is_empty() {
				match self.complete(&pdu, missing, Phase::FetchAuth, opts).await? {
					None => {},
					Some(outcome) => return Ok(outcome),
				}
			}

			// AUTH_STATIC: rules 1..=3 over the supplied set
			let supplied = self.materialize_set(&pdu, &version).await?;
			if opts.auth_static {
				if let Err(e) = auth::check_static(&pdu, &supplied, &version) {
					return Ok(reject(Phase::AuthStatic, e));
				}
			}

			// FETCH_PREV
			let missing = self.missing_of(pdu.prev_ids()).await?;
			if !missing.is_empty() {
				match self.complete(&pdu, missing, Phase::FetchPrev, opts).await? {
					None => {},
					Some(outcome) => return Ok(outcome),
				}
			}

			// PRECOMMIT: duplicate suppression
			let existing = services.dbs.idx_of(&pdu.event_id).await?;
			if opts.precommit {
				if let Some(event_idx) = existing {
					if !opts.replays {
						trace!(event_idx, "duplicate accepted without rewrite");
						return Ok(Outcome::Accepted { event_idx, event_id: pdu.event_id.clone() });
					}
				}
			}

			// AUTH_RELA: rules 4..=12 against the supplied set
			if opts.auth_rela && pdu.kind != "m.room.create" {
				if let Err(e) = auth::check_rela(&pdu, &supplied, &version) {
					return Ok(reject(Phase::AuthRela, e));
				}
			}

			// AUTH_PRES: re-check against currently resolved room state
			if opts.auth_pres && pdu.kind != "m.room.create" {
				let present = self.present_set(&pdu, &version).await?;
				if let Err(e) = auth::check_rela(&pdu, &present, &version) {
					return Ok(reject(Phase::AuthPres, e));
				}
			}

			// WRITE + POST: one atomic batch
			let event_idx = if let Some(event_idx) = existing {
				event_idx
			} else if opts.write {
				let event_idx = services.dbs.next_idx().await?;
				let json = canonical::to_vec(&pdu.to_object()?)?;
				let write_opts = WriteOpts {
					op: WriteOp::Set,
					event_idx,
					horizon_resolve: true,
					refs: true,
				};

				let mut batch = services.db.batch();
				let report = services.dbs.write(&mut batch, &pdu, &json, &write_opts).await?;

				if opts.post && report.resolved_prev_referrers == 0 {
					services
						.rooms
						.room(&pdu.room_id)
						.advance_head(&mut batch, &pdu, event_idx);
				}

				batch.commit()?;
				debug!(event_id = %pdu.event_id, event_idx, "event committed");
				event_idx
			} else {
				0
			};

			// NOTIFY
			if opts.notify {
				self.notify(&pdu, &version, opts).await?;
			}

			Ok(Outcome::Accepted { event_idx, event_id: pdu.event_id.clone() })
		}
		.boxed()
	}

	/// Find the room version, fetching state from a peer when the room is
	/// not known locally.
	async fn resolve_version(
		&self,
		kind: &str,
		room_id: &RoomId,
		object: &CanonicalObject,
		opts: &Opts,
	) -> Result<std::result::Result<RoomVersion, Outcome>> {
		if kind == "m.room.create" {
			let id = object
				.get("content")
				.and_then(|c| c.get("room_version"))
				.and_then(Value::as_str)
				.unwrap_or("1");
			return match RoomVersion::from_id(id) {
				Ok(version) => Ok(Ok(version)),
				Err(e) => Ok(Err(reject(Phase::Conform, e))),
			};
		}

		let room = self.services.rooms.room(room_id);
		match room.version().await {
			Ok(version) => return Ok(Ok(version)),
			Err(e) if e.is_not_found() => {},
			Err(e) => return Err(e),
		}

		if !opts.fetch_state {
			return Ok(Err(Outcome::Deferred { phase: Phase::FetchState, awaiting: Vec::new() }));
		}

		// state at one of the event's prevs teaches us the room
		let prevs: Vec<EventId> = object
			.get("prev_events")
			.and_then(Value::as_array)
			.map(|refs| {
				refs.iter()
					.filter_map(|r| {
						serde_json::from_value::<EventRef>(r.clone())
							.ok()
							.map(|r| r.event_id)
					})
					.collect()
			})
			.unwrap_or_default();

		let Some(anchor) = prevs.first() else {
			return Ok(Err(Outcome::Deferred { phase: Phase::FetchState, awaiting: Vec::new() }));
		};

		let origins = self.fetch_origins(room_id, opts).await?;
		let bundle = match self.services.fetch.state(room_id, anchor, &origins).await {
			Ok(bundle) => bundle,
			Err(e) => {
				warn!(%room_id, "state fetch failed: {e}");
				return Ok(Err(Outcome::Deferred {
					phase: Phase::FetchState,
					awaiting: vec![anchor.clone()],
				}));
			},
		};

		if let Bundle::State { auth_chain, pdus } = bundle {
			let sub_opts = opts.for_ancestor();
			for ancestor in auth_chain.into_iter().chain(pdus) {
				if let Err(e) = self.eval(ancestor, &sub_opts).await {
					warn!("state event evaluation failed: {e}");
				}
			}
		}

		match room.version().await {
			Ok(version) => Ok(Ok(version)),
			Err(_) => Ok(Err(Outcome::Deferred {
				phase: Phase::FetchState,
				awaiting: vec![anchor.clone()],
			})),
		}
	}

	/// Server ACLs and the configured blocklist.
	async fn check_access(&self, pdu: &Pdu) -> Result {
		let origin = pdu.origin_name();
		let config = &self.services.server.config;
		if config.forbidden_servers.iter().any(|s| s == origin) {
			return Err(Error::AccessDenied("origin is forbidden by configuration".into()));
		}

		let room = self.services.rooms.room(&pdu.room_id);
		let Some(acl_idx) = room.state_get("m.room.server_acl", "").await? else {
			return Ok(());
		};

		let acl = self.services.rooms.events.get(acl_idx).await?;
		let matches = |list: &str| -> bool {
			acl.content
				.get(list)
				.and_then(Value::as_array)
				.into_iter()
				.flatten()
				.filter_map(Value::as_str)
				.any(|pattern| utils::wildcard_match(pattern, origin))
		};

		if matches("deny") {
			return Err(Error::AccessDenied("origin is denied by the room ACL".into()));
		}
		if acl.content.get("allow").is_some() && !matches("allow") {
			return Err(Error::AccessDenied("origin is not allowed by the room ACL".into()));
		}

		Ok(())
	}

	/// Content hash, then at least one valid signature by the origin.
	async fn check_signatures(&self, pdu: &Pdu, wire_object: &CanonicalObject) -> Result {
		crate::event::verify_content_hash(wire_object)?;

		let origin = ServerName::parse(pdu.origin_name())
			.map_err(|_| Error::Verify("event origin is not a server name".into()))?;
		let key_ids: Vec<String> = sign::claimed_key_ids(wire_object, origin.as_str())
			.map(str::to_owned)
			.collect();
		if key_ids.is_empty() {
			return Err(Error::Verify("event carries no signature by its origin".into()));
		}

		// at least one claimed signature must verify
		let mut last = Error::Verify("no verifiable signature".into());
		for key_id in &key_ids {
			let key = match self
				.services
				.keys
				.verify_key(&origin, key_id, Some(&self.services.fed))
				.await
			{
				Ok(key) => key,
				Err(e) => {
					last = e;
					continue;
				},
			};

			match sign::verify_signature(wire_object, origin.as_str(), key_id, &key) {
				Ok(()) => return Ok(()),
				Err(e) => last = e,
			}
		}

		Err(last)
	}

	/// Which of the ids are beyond the local horizon.
	async fn missing_of(
		&self,
		ids: impl Iterator<Item = &EventId>,
	) -> Result<Vec<EventId>> {
		let mut missing = Vec::new();
		for id in ids {
			if self.services.dbs.idx_of(id).await?.is_none() {
				missing.push(id.clone());
			}
		}

		Ok(missing)
	}

	/// FETCH_AUTH / FETCH_PREV: retrieve and evaluate missing ancestors.
	/// `None` means the ancestry is now complete; `Some` carries the
	/// deferred outcome otherwise.
	async fn complete(
		&self,
		pdu: &Pdu,
		missing: Vec<EventId>,
		phase: Phase,
		opts: &Opts,
	) -> Result<Option<Outcome>> {
		let fetching = match phase {
			Phase::FetchAuth => opts.fetch_auth,
			Phase::FetchPrev => opts.fetch_prev,
			_ => false,
		};
		if !fetching {
			return Ok(Some(Outcome::Deferred { phase, awaiting: missing }));
		}

		let origins = self.fetch_origins(&pdu.room_id, opts).await?;
		let sub_opts = opts.for_ancestor();
		let mut awaiting = Vec::new();
		for id in missing {
			let bundle = match phase {
				Phase::FetchAuth =>
					self.services.fetch.auth(&pdu.room_id, &id, &origins).await,
				_ => self.services.fetch.event(&pdu.room_id, &id, &origins).await,
			};

			let events = match bundle {
				Ok(Bundle::Events(events)) => events,
				Ok(_) => Vec::new(),
				Err(e) => {
					debug!(event_id = %id, "ancestor fetch failed: {e}");
					awaiting.push(id);
					continue;
				},
			};

			// the VM re-enters with each unseen event individually
			for ancestor in events {
				match self.eval(ancestor, &sub_opts).await {
					Ok(outcome) if !outcome.is_accepted() => {
						trace!(?outcome, "ancestor not accepted");
					},
					Ok(_) => {},
					Err(e) => warn!("ancestor evaluation failed: {e}"),
				}
			}

			if self.services.dbs.idx_of(&id).await?.is_none() {
				awaiting.push(id);
			}
		}

		if awaiting.is_empty() {
			Ok(None)
		} else {
			Ok(Some(Outcome::Deferred { phase, awaiting }))
		}
	}

	/// Materialize the supplied auth set from local storage.
	async fn materialize_set(&self, pdu: &Pdu, version: &RoomVersion) -> Result<AuthSet> {
		let mut events = Vec::with_capacity(pdu.auth_events.len());
		for id in pdu.auth_ids() {
			if let Some((_, auth_pdu)) = self.services.rooms.events.get_by_id(id).await? {
				events.push(auth_pdu);
			}
		}

		Ok(AuthSet::new(events, version.clone()))
	}

	/// The auth-relevant cells of the room's currently resolved state.
	async fn present_set(&self, pdu: &Pdu, version: &RoomVersion) -> Result<AuthSet> {
		let room = self.services.rooms.room(&pdu.room_id);
		let mut cells = vec![
			("m.room.create".to_owned(), String::new()),
			("m.room.power_levels".to_owned(), String::new()),
			("m.room.join_rules".to_owned(), String::new()),
			("m.room.member".to_owned(), pdu.sender.as_str().to_owned()),
		];
		if pdu.kind == "m.room.member" {
			if let Some(target) = &pdu.state_key {
				cells.push(("m.room.member".to_owned(), target.clone()));
			}
		}

		let mut events = Vec::with_capacity(cells.len());
		for (kind, state_key) in cells {
			if let Some(idx) = room.state_get(&kind, &state_key).await? {
				events.push(self.services.rooms.events.get(idx).await?);
			}
		}

		Ok(AuthSet::new(events, version.clone()))
	}

	/// Wake downstream consumers and schedule the federation send.
	async fn notify(&self, pdu: &Pdu, version: &RoomVersion, opts: &Opts) -> Result {
		let local = &self.services.server.config.server_name;
		let authored_locally = pdu.origin_name() == local;
		if !opts.notify_servers || !authored_locally {
			return Ok(());
		}

		let room = self.services.rooms.room(&pdu.room_id);
		let origins = room.origins().await?;
		if origins.is_empty() {
			return Ok(());
		}

		let wire = pdu.to_wire_object(version)?;
		let destinations: Vec<ServerName> = origins
			.iter()
			.filter_map(|o| ServerName::parse(o).ok())
			.collect();
		self.services.sending.send_pdu(destinations.iter(), &wire);

		Ok(())
	}

	/// Candidate peers for a fetch: the event's origin first, then the
	/// room's members' servers.
	async fn fetch_origins(&self, room_id: &RoomId, opts: &Opts) -> Result<Vec<ServerName>> {
		let mut origins = Vec::new();
		if let Some(origin) = &opts.origin {
			origins.push(origin.clone());
		}

		let room = self.services.rooms.room(room_id);
		for origin in room.origins().await? {
			if let Ok(name) = ServerName::parse(&origin) {
				if !origins.contains(&name) {
					origins.push(name);
				}
			}
		}

		Ok(origins)
	}
}

fn reject(phase: Phase, error: Error) -> Outcome {
	debug!(%phase, "evaluation rejected: {error}");
	Outcome::Rejected { phase, error }
}
