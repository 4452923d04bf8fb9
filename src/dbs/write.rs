use tracing::trace;

use super::{keys, Dbs, EventIdx, RefType};
use crate::{database::Batch, event::Pdu, Result};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WriteOp {
	#[default]
	Set,
	Delete,
}

/// Instructions for one event's write plan.
#[derive(Debug)]
pub struct Opts {
	pub op: WriteOp,
	/// Assigned by the evaluator; monotonic per database.
	pub event_idx: EventIdx,
	/// Clear horizon rows this event satisfies, promoting them to refs.
	pub horizon_resolve: bool,
	/// Write forward-reference deltas for each ancestry edge.
	pub refs: bool,
}

/// What the plan observed while being laid out.
#[derive(Debug, Default)]
pub struct Report {
	/// Horizon rows this event satisfied whose edge was a prev reference;
	/// non-zero means stored descendants already exist and the event must
	/// not become a head.
	pub resolved_prev_referrers: usize,
}

impl Dbs {
	/// Append every cell write required to admit (or remove) the event to
	/// the batch. The batch commits as a unit; a failure of any sub-write
	/// surfaces before anything becomes visible.
	pub async fn write(
		&self,
		batch: &mut Batch,
		pdu: &Pdu,
		json: &[u8],
		opts: &Opts,
	) -> Result<Report> {
		match opts.op {
			WriteOp::Set => self.write_set(batch, pdu, json, opts).await,
			WriteOp::Delete => {
				self.write_delete(batch, pdu, opts).await?;
				Ok(Report::default())
			},
		}
	}

	async fn write_set(
		&self,
		batch: &mut Batch,
		pdu: &Pdu,
		json: &[u8],
		opts: &Opts,
	) -> Result<Report> {
		let idx = opts.event_idx;
		let idx_key = keys::idx_key(idx);

		trace!(event_id = %pdu.event_id, idx, "planning event writes");

		// primary id and payload
		batch.put(&self.eventid_idx, pdu.event_id.as_ref(), &idx_key);
		batch.put(&self.idx_json, &idx_key, json);

		// column-per-field
		batch.put(&self.idx_eventid, &idx_key, pdu.event_id.as_ref());
		batch.put(&self.idx_type, &idx_key, pdu.kind.as_bytes());
		batch.put(&self.idx_sender, &idx_key, pdu.sender.as_ref());
		batch.put(&self.idx_room, &idx_key, pdu.room_id.as_ref());
		batch.put(&self.idx_depth, &idx_key, &pdu.depth.to_be_bytes());
		if let Some(state_key) = &pdu.state_key {
			batch.put(&self.idx_state_key, &idx_key, state_key.as_bytes());
		}

		// composite indexes
		batch.put(
			&self.room_events,
			&keys::room_events_key(&pdu.room_id, pdu.depth, idx),
			pdu.event_id.as_ref(),
		);
		batch.put(
			&self.room_type_events,
			&keys::room_type_events_key(&pdu.room_id, &pdu.kind, &pdu.event_id),
			&idx_key,
		);
		if let Some(state_key) = &pdu.state_key {
			batch.put(
				&self.room_state,
				&keys::room_state_key(&pdu.room_id, &pdu.kind, state_key, pdu.depth),
				&idx_key,
			);
		}

		if opts.refs {
			self.write_refs(batch, pdu, idx).await?;
		}

		let mut report = Report::default();
		if opts.horizon_resolve {
			report.resolved_prev_referrers = self.resolve_horizon(batch, pdu, idx).await?;
		}

		Ok(report)
	}

	/// Ancestry edges: a stored ancestor gets a forward reference; an
	/// unknown ancestor becomes a horizon row keyed by the missing id.
	async fn write_refs(&self, batch: &mut Batch, pdu: &Pdu, idx: EventIdx) -> Result {
		let edges = pdu
			.prev_ids()
			.map(|id| (id, RefType::Prev))
			.chain(pdu.auth_ids().map(|id| (id, RefType::Auth)));

		for (ancestor_id, ref_type) in edges {
			match self.idx_of(ancestor_id).await? {
				Some(ancestor) => {
					batch.put(&self.event_refs, &keys::refs_key(ancestor, ref_type, idx), b"");
				},
				None => {
					trace!(missing = %ancestor_id, referrer = idx, "ancestor beyond horizon");
					batch.put(
						&self.event_horizon,
						&keys::horizon_key(ancestor_id, idx),
						&[ref_type as u8],
					);
				},
			}
		}

		Ok(())
	}

	/// This event satisfies any horizon rows filed under its id: delete
	/// them and write the forward references they were standing in for.
	/// Returns how many of those edges were prev references.
	async fn resolve_horizon(
		&self,
		batch: &mut Batch,
		pdu: &Pdu,
		idx: EventIdx,
	) -> Result<usize> {
		use futures::StreamExt;

		let mut resolved_prev = 0usize;
		let prefix = keys::horizon_prefix(&pdu.event_id);
		let mut rows =
			std::pin::pin!(crate::database::stream::stream_prefix(self.event_horizon.clone(), prefix));
		while let Some(row) = rows.next().await {
			let (key, val) = row?;
			let (_, referrer) = keys::horizon_parse(&key)?;
			let ref_type = RefType::from_byte(*val.first().unwrap_or(&0))?;
			if ref_type == RefType::Prev {
				resolved_prev = resolved_prev.saturating_add(1);
			}

			batch.delete(&self.event_horizon, &key);
			batch.put(&self.event_refs, &keys::refs_key(idx, ref_type, referrer), b"");
		}

		Ok(resolved_prev)
	}

	async fn write_delete(&self, batch: &mut Batch, pdu: &Pdu, opts: &Opts) -> Result {
		let idx = opts.event_idx;
		let idx_key = keys::idx_key(idx);

		batch.delete(&self.eventid_idx, pdu.event_id.as_ref());
		batch.delete(&self.idx_json, &idx_key);
		batch.delete(&self.idx_eventid, &idx_key);
		batch.delete(&self.idx_type, &idx_key);
		batch.delete(&self.idx_sender, &idx_key);
		batch.delete(&self.idx_room, &idx_key);
		batch.delete(&self.idx_depth, &idx_key);
		batch.delete(&self.idx_state_key, &idx_key);

		batch.delete(&self.room_events, &keys::room_events_key(&pdu.room_id, pdu.depth, idx));
		batch.delete(
			&self.room_type_events,
			&keys::room_type_events_key(&pdu.room_id, &pdu.kind, &pdu.event_id),
		);
		if let Some(state_key) = &pdu.state_key {
			batch.delete(
				&self.room_state,
				&keys::room_state_key(&pdu.room_id, &pdu.kind, state_key, pdu.depth),
			);
		}

		if opts.refs {
			for (ancestor_id, ref_type) in pdu
				.prev_ids()
				.map(|id| (id, RefType::Prev))
				.chain(pdu.auth_ids().map(|id| (id, RefType::Auth)))
			{
				if let Some(ancestor) = self.idx_of(ancestor_id).await? {
					batch.delete(&self.event_refs, &keys::refs_key(ancestor, ref_type, idx));
				} else {
					batch.delete(&self.event_horizon, &keys::horizon_key(ancestor_id, idx));
				}
			}
		}

		Ok(())
	}
}
