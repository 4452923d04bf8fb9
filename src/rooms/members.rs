use std::collections::BTreeSet;

use super::Room;
use crate::{dbs::EventIdx, id::UserId, Result};

impl Room<'_> {
	/// Enumerate members, optionally filtered by membership value and by
	/// the member's server. The closure receives the event_idx first.
	pub async fn members_for_each<F>(
		&self,
		membership: Option<&str>,
		host: Option<&str>,
		mut f: F,
	) -> Result
	where
		F: FnMut(EventIdx, &UserId) -> bool,
	{
		let cells = self.state_entries("m.room.member").await?;
		for ((kind, state_key), idx) in cells {
			if kind != "m.room.member" {
				continue;
			}

			let Ok(user_id) = UserId::parse(&state_key) else {
				continue;
			};
			if host.is_some_and(|h| user_id.server_name() != h) {
				continue;
			}

			if let Some(want) = membership {
				let pdu = self.rooms.events.get(idx).await?;
				if pdu.membership() != Some(want) {
					continue;
				}
			}

			if !f(idx, &user_id) {
				break;
			}
		}

		Ok(())
	}

	pub async fn member_count(&self, membership: &str) -> Result<usize> {
		let mut count = 0usize;
		let cells = self.state_entries("m.room.member").await?;
		for ((kind, _), idx) in cells {
			if kind != "m.room.member" {
				continue;
			}

			let pdu = self.rooms.events.get(idx).await?;
			if pdu.membership() == Some(membership) {
				count = count.saturating_add(1);
			}
		}

		Ok(count)
	}

	/// Remote servers considered "in" the room: every server with at least
	/// one joined member, excluding our own.
	pub async fn origins(&self) -> Result<BTreeSet<String>> {
		let local = self.rooms.server.config.server_name.clone();
		let mut origins = BTreeSet::new();
		self.members_for_each(Some("join"), None, |_, user_id| {
			let server = user_id.server_name();
			if server != local {
				origins.insert(server.to_owned());
			}
			true
		})
		.await?;

		Ok(origins)
	}
}
