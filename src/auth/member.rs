use serde_json::Value;

use super::{AuthSet, PowerLevels};
use crate::{event::Pdu, event::RoomVersion, id::UserId, Error, Result};

fn fail(reason: &'static str) -> Error {
	Error::Auth { rule: 5, reason: reason.into() }
}

/// The membership state machine: invite/join/leave/ban/knock transitions,
/// join rules, self vs third-party change permissions. Passing this hook
/// admits the member event outright; the remaining rules do not apply.
pub(super) fn check_member(
	pdu: &Pdu,
	set: &AuthSet,
	levels: &PowerLevels,
	version: &RoomVersion,
) -> Result {
	let target = pdu
		.state_key
		.as_deref()
		.ok_or_else(|| fail("member event without state_key"))?;
	let target = UserId::parse(target).map_err(|_| fail("state_key is not a user id"))?;
	let membership = pdu.membership().ok_or_else(|| fail("content without membership"))?;

	let sender_membership = set.membership_of(&pdu.sender);
	let target_membership = set.membership_of(&target);
	let join_rule = set.join_rule();

	match membership {
		"join" => check_join(
			pdu,
			set,
			&target,
			sender_membership,
			target_membership,
			join_rule,
			version,
		),
		"invite" => check_invite(pdu, set, &target, sender_membership, target_membership, levels),
		"leave" => check_leave(pdu, &target, sender_membership, target_membership, levels),
		"ban" => check_ban(pdu, &target, sender_membership, target_membership, levels),
		"knock" => check_knock(pdu, &target, sender_membership, join_rule, version),
		_ => Err(fail("unknown membership value")),
	}
}

fn check_join(
	pdu: &Pdu,
	set: &AuthSet,
	target: &UserId,
	sender_membership: Option<&str>,
	target_membership: Option<&str>,
	join_rule: &str,
	version: &RoomVersion,
) -> Result {
	if *target != pdu.sender {
		return Err(fail("cannot join on behalf of another user"));
	}

	// the creator's first join follows the create event directly
	let first_join = pdu.prev_events.len() == 1
		&& set
			.create()
			.is_some_and(|create| pdu.prev_ids().next() == Some(&create.event_id));
	if first_join && set.creator().as_ref() == Some(&pdu.sender) {
		return Ok(());
	}

	if target_membership == Some("ban") {
		return Err(fail("target is banned"));
	}
	if target_membership == Some("join") {
		return Ok(());
	}

	match join_rule {
		"public" => Ok(()),
		"invite" | "knock" => (sender_membership == Some("invite")
			|| sender_membership == Some("join"))
		.then_some(())
		.ok_or_else(|| fail("join rule requires an invite")),
		"restricted" | "knock_restricted"
			if version.restricted_join || version.knock_restricted_join =>
		{
			if sender_membership == Some("invite") || sender_membership == Some("join") {
				return Ok(());
			}

			// an authorising server vouches for the restricted join
			let authorised = pdu
				.content
				.get("join_authorised_via_users_server")
				.and_then(Value::as_str)
				.is_some();
			authorised
				.then_some(())
				.ok_or_else(|| fail("restricted join without authorising user"))
		},
		_ => Err(fail("join rule forbids joining")),
	}
}

fn check_invite(
	pdu: &Pdu,
	set: &AuthSet,
	target: &UserId,
	sender_membership: Option<&str>,
	target_membership: Option<&str>,
	levels: &PowerLevels,
) -> Result {
	// third-party invites carry a token that must match a
	// m.room.third_party_invite in the auth set
	if let Some(tpi) = pdu.content.get("third_party_invite") {
		let token = tpi
			.get("signed")
			.and_then(|s| s.get("token"))
			.and_then(Value::as_str)
			.ok_or_else(|| fail("third_party_invite without signed token"))?;

		return set
			.third_party_invite(token)
			.is_some()
			.then_some(())
			.ok_or_else(|| fail("no third_party_invite event for token"));
	}

	if sender_membership != Some("join") {
		return Err(fail("inviter is not in the room"));
	}
	if matches!(target_membership, Some("join") | Some("ban")) {
		return Err(fail("target is joined or banned"));
	}
	if levels.user_level(&pdu.sender) < levels.invite {
		return Err(fail("sender cannot invite"));
	}

	_ = target;
	Ok(())
}

fn check_leave(
	pdu: &Pdu,
	target: &UserId,
	sender_membership: Option<&str>,
	target_membership: Option<&str>,
	levels: &PowerLevels,
) -> Result {
	if *target == pdu.sender {
		return matches!(sender_membership, Some("join") | Some("invite") | Some("knock"))
			.then_some(())
			.ok_or_else(|| fail("cannot leave a room one is not in"));
	}

	// a kick, or an unban
	if sender_membership != Some("join") {
		return Err(fail("kicker is not in the room"));
	}

	let sender_level = levels.user_level(&pdu.sender);
	if target_membership == Some("ban") && sender_level < levels.ban {
		return Err(fail("sender cannot unban"));
	}
	if sender_level < levels.kick {
		return Err(fail("sender cannot kick"));
	}
	if levels.user_level(target) >= sender_level {
		return Err(fail("cannot kick a peer or superior"));
	}

	Ok(())
}

fn check_ban(
	pdu: &Pdu,
	target: &UserId,
	sender_membership: Option<&str>,
	_target_membership: Option<&str>,
	levels: &PowerLevels,
) -> Result {
	if sender_membership != Some("join") {
		return Err(fail("banner is not in the room"));
	}

	let sender_level = levels.user_level(&pdu.sender);
	if sender_level < levels.ban {
		return Err(fail("sender cannot ban"));
	}
	if levels.user_level(target) >= sender_level {
		return Err(fail("cannot ban a peer or superior"));
	}

	Ok(())
}

fn check_knock(
	pdu: &Pdu,
	target: &UserId,
	sender_membership: Option<&str>,
	join_rule: &str,
	version: &RoomVersion,
) -> Result {
	if !version.knocking {
		return Err(fail("room version does not support knocking"));
	}
	if *target != pdu.sender {
		return Err(fail("cannot knock for another user"));
	}

	let rule_allows = join_rule == "knock"
		|| (version.knock_restricted_join && join_rule == "knock_restricted");
	if !rule_allows {
		return Err(fail("join rule forbids knocking"));
	}
	if matches!(sender_membership, Some("join") | Some("ban")) {
		return Err(fail("cannot knock while joined or banned"));
	}

	Ok(())
}
