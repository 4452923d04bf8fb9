//! Admission rules.
//!
//! An event is admitted against a bounded auth-event set, usually four to
//! eight events. The rules run in fixed numerical order; the first failure
//! rejects the event with the rule number and a reason. Type-specific
//! sub-hooks dispatch after the common prefix.

mod member;
mod power;

use std::sync::Arc;

use serde_json::Value;

pub use self::power::PowerLevels;
use crate::{
	event::{Pdu, RoomVersion},
	id::UserId,
	Error, Result,
};

fn fail(rule: u8, reason: &'static str) -> Error {
	Error::Auth { rule, reason: reason.into() }
}

/// The bounded auth-event set supplied with an event, with typed accessors
/// over the state cells it carries.
pub struct AuthSet {
	events: Vec<Arc<Pdu>>,
	version: RoomVersion,
}

impl AuthSet {
	#[must_use]
	pub fn new(events: Vec<Arc<Pdu>>, version: RoomVersion) -> Self {
		Self { events, version }
	}

	fn cell(&self, kind: &str, state_key: &str) -> Option<&Arc<Pdu>> {
		self.events
			.iter()
			.find(|e| e.kind == kind && e.state_key.as_deref() == Some(state_key))
	}

	#[must_use]
	pub fn create(&self) -> Option<&Arc<Pdu>> { self.cell("m.room.create", "") }

	#[must_use]
	pub fn power_levels(&self) -> Option<&Arc<Pdu>> { self.cell("m.room.power_levels", "") }

	#[must_use]
	pub fn member(&self, user: &UserId) -> Option<&Arc<Pdu>> {
		self.cell("m.room.member", user.as_str())
	}

	#[must_use]
	pub fn membership_of(&self, user: &UserId) -> Option<&str> {
		self.member(user).and_then(|m| m.membership())
	}

	#[must_use]
	pub fn third_party_invite(&self, token: &str) -> Option<&Arc<Pdu>> {
		self.cell("m.room.third_party_invite", token)
	}

	/// The current join rule; rooms without the state event are
	/// invite-only.
	#[must_use]
	pub fn join_rule(&self) -> &str {
		self.cell("m.room.join_rules", "")
			.and_then(|e| e.content.get("join_rule"))
			.and_then(Value::as_str)
			.unwrap_or("invite")
	}

	#[must_use]
	pub fn creator(&self) -> Option<UserId> {
		let create = self.create()?;
		if self.version.implied_creator {
			return Some(create.sender.clone());
		}

		create
			.content
			.get("creator")
			.and_then(Value::as_str)
			.and_then(|c| UserId::parse(c).ok())
	}

	/// The effective power table: the power_levels cell when present, else
	/// creator-elevated defaults.
	pub fn levels(&self) -> Result<PowerLevels> {
		let creator = self.creator();
		match self.power_levels() {
			Some(pl) => PowerLevels::from_content(&pl.content, creator.as_ref(), &self.version),
			None => Ok(PowerLevels::defaults(creator.as_ref(), &self.version)),
		}
	}
}

/// The `(type, state_key)` cells an event is entitled to name in its
/// `auth_events`.
#[must_use]
pub fn auth_selectors(pdu: &Pdu) -> Vec<(String, String)> {
	if pdu.kind == "m.room.create" {
		return Vec::new();
	}

	let mut selectors = vec![
		("m.room.create".to_owned(), String::new()),
		("m.room.power_levels".to_owned(), String::new()),
		("m.room.member".to_owned(), pdu.sender.as_str().to_owned()),
	];

	if pdu.kind == "m.room.member" {
		if let Some(target) = &pdu.state_key {
			if target.as_str() != pdu.sender.as_str() {
				selectors.push(("m.room.member".to_owned(), target.clone()));
			}
		}
		selectors.push(("m.room.join_rules".to_owned(), String::new()));

		if let Some(token) = pdu
			.content
			.get("third_party_invite")
			.and_then(|t| t.get("signed"))
			.and_then(|s| s.get("token"))
			.and_then(Value::as_str)
		{
			selectors.push(("m.room.third_party_invite".to_owned(), token.to_owned()));
		}
		if let Some(authoriser) = pdu
			.content
			.get("join_authorised_via_users_server")
			.and_then(Value::as_str)
		{
			selectors.push(("m.room.member".to_owned(), authoriser.to_owned()));
		}
	}

	selectors
}

/// Power events drive state resolution ordering: create, power_levels,
/// join_rules, and any membership change done *to* another user that
/// removes them.
#[must_use]
pub fn is_power_event(pdu: &Pdu) -> bool {
	match pdu.kind.as_str() {
		"m.room.create" | "m.room.power_levels" | "m.room.join_rules" =>
			pdu.state_key.as_deref() == Some(""),
		"m.room.member" => {
			let demotion = matches!(pdu.membership(), Some("leave") | Some("ban"));
			demotion && pdu.state_key.as_deref() != Some(pdu.sender.as_str())
		},
		_ => false,
	}
}

/// Run the complete admission order against the supplied auth set.
pub fn check(pdu: &Pdu, set: &AuthSet, version: &RoomVersion) -> Result {
	check_static(pdu, set, version)?;
	if pdu.kind == "m.room.create" {
		return Ok(());
	}

	check_rela(pdu, set, version)
}

/// Rules 1 through 3: the well-formedness of the supplied set itself.
pub fn check_static(pdu: &Pdu, set: &AuthSet, version: &RoomVersion) -> Result {
	// 1. create events stand alone; nothing prior may be required
	if pdu.kind == "m.room.create" {
		return check_create(pdu, version);
	}

	// 2. the supplied set must be well-formed
	check_auth_set(pdu, set)?;

	// 3. every non-create event descends from a create
	if set.create().is_none() {
		return Err(fail(3, "auth set has no m.room.create"));
	}

	Ok(())
}

/// Rules 4 through 12: admission relative to the state the set carries.
/// Assumes `check_static` already passed for this (event, set).
pub fn check_rela(pdu: &Pdu, set: &AuthSet, version: &RoomVersion) -> Result {
	// 4. aliases short-circuit in the room versions that special-case them
	if pdu.kind == "m.room.aliases" && version.special_aliases {
		let state_key = pdu
			.state_key
			.as_deref()
			.ok_or_else(|| fail(4, "aliases event without state_key"))?;
		if state_key != pdu.sender.server_name() {
			return Err(fail(4, "alias state_key is not the sender's server"));
		}

		return Ok(());
	}

	let levels = set.levels()?;

	// 5. the membership machine fully decides member events
	if pdu.kind == "m.room.member" {
		return member::check_member(pdu, set, &levels, version);
	}

	// 6. everyone else must currently be joined
	if set.membership_of(&pdu.sender) != Some("join") {
		return Err(fail(6, "sender is not joined"));
	}

	// 7. third-party invites check the invite level
	if pdu.kind == "m.room.third_party_invite" {
		return (levels.user_level(&pdu.sender) >= levels.invite)
			.then_some(())
			.ok_or_else(|| fail(7, "sender cannot issue third-party invites"));
	}

	// 8. the event's required power must not exceed the sender's
	let sender_level = levels.user_level(&pdu.sender);
	if levels.required_level(&pdu.kind, pdu.is_state()) > sender_level {
		return Err(fail(8, "sender lacks the required power level"));
	}

	// 9. user-keyed state cells belong to their user
	if pdu
		.state_key
		.as_deref()
		.is_some_and(|k| k.starts_with('@') && k != pdu.sender.as_str())
	{
		return Err(fail(9, "user-keyed state_key differs from sender"));
	}

	// 10. power_levels changes are bounded by the sender's own level
	if pdu.kind == "m.room.power_levels" {
		return check_power_levels(pdu, set, &levels, sender_level, version);
	}

	// 11. redactions need power or authorship of the target
	if pdu.kind == "m.room.redaction" {
		return check_redaction(pdu, &levels, sender_level);
	}

	// 12. otherwise: accept
	Ok(())
}

fn check_create(pdu: &Pdu, version: &RoomVersion) -> Result {
	if !pdu.prev_events.is_empty() || !pdu.auth_events.is_empty() {
		return Err(fail(1, "create event is not the room's first"));
	}
	if pdu.room_id.server_name() != pdu.sender.server_name() {
		return Err(fail(1, "room_id domain differs from creator"));
	}
	if pdu.stated_room_version().is_some_and(|v| v != version.id) {
		return Err(fail(1, "create event names a different room version"));
	}

	Ok(())
}

fn check_auth_set(pdu: &Pdu, set: &AuthSet) -> Result {
	let selectors = auth_selectors(pdu);

	for (i, event) in set.events.iter().enumerate() {
		// (a) duplicate cells
		let cell = (event.kind.as_str(), event.state_key.as_deref());
		if set.events[..i]
			.iter()
			.any(|prior| (prior.kind.as_str(), prior.state_key.as_deref()) == cell)
		{
			return Err(fail(2, "duplicate (type, state_key) in auth set"));
		}

		// (b) foreign rooms
		if event.room_id != pdu.room_id {
			return Err(fail(2, "auth event from another room"));
		}

		// (c) cells the event is not entitled to
		let Some(state_key) = event.state_key.as_deref() else {
			return Err(fail(2, "auth event is not a state event"));
		};
		let allowed = selectors
			.iter()
			.any(|(kind, key)| kind == &event.kind && key == state_key);
		if !allowed {
			return Err(fail(2, "auth event is not an allowed selector"));
		}
	}

	Ok(())
}

fn check_power_levels(
	pdu: &Pdu,
	set: &AuthSet,
	current: &PowerLevels,
	sender_level: i64,
	version: &RoomVersion,
) -> Result {
	// validates integer discipline for the room version as a side effect
	let proposed = PowerLevels::from_content(&pdu.content, None, version)?;

	// the room's first power_levels event is unconstrained
	if set.power_levels().is_none() {
		return Ok(());
	}

	let scalars = [
		(current.users_default, proposed.users_default),
		(current.events_default, proposed.events_default),
		(current.state_default, proposed.state_default),
		(current.ban, proposed.ban),
		(current.kick, proposed.kick),
		(current.redact, proposed.redact),
		(current.invite, proposed.invite),
	];
	for (old, new) in scalars {
		if old != new && (old > sender_level || new > sender_level) {
			return Err(fail(10, "cannot modify a level beyond one's own"));
		}
	}

	for key in current.events.keys().chain(proposed.events.keys()) {
		let old = current.events.get(key).copied();
		let new = proposed.events.get(key).copied();
		if old != new {
			let beyond = old.is_some_and(|l| l > sender_level)
				|| new.is_some_and(|l| l > sender_level);
			if beyond {
				return Err(fail(10, "cannot modify an event level beyond one's own"));
			}
		}
	}

	for key in current.users.keys().chain(proposed.users.keys()) {
		let old = current.users.get(key).copied();
		let new = proposed.users.get(key).copied();
		if old == new {
			continue;
		}

		if old.is_some_and(|l| l > sender_level) || new.is_some_and(|l| l > sender_level) {
			return Err(fail(10, "cannot raise a user above one's own level"));
		}
		// demoting a peer requires outranking them, except oneself
		if key != pdu.sender.as_str() && old.is_some_and(|l| l >= sender_level) {
			return Err(fail(10, "cannot change a peer's or superior's level"));
		}
	}

	Ok(())
}

fn check_redaction(pdu: &Pdu, levels: &PowerLevels, sender_level: i64) -> Result {
	if sender_level >= levels.redact {
		return Ok(());
	}

	// without the power, one may only redact one's own server's events
	let same_origin = pdu
		.redacts
		.as_ref()
		.and_then(|target| target.hostname())
		.is_some_and(|host| host == pdu.sender.server_name());
	same_origin
		.then_some(())
		.ok_or_else(|| fail(11, "sender can neither redact nor claim the target"))
}
