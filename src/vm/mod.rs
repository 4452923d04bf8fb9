//! The evaluator: every event enters the room through this pipeline.
//!
//! An evaluation runs the phases in order; each phase may consult the room
//! views, invoke the auth engine, enqueue fetches for missing ancestors, or
//! reject the event. Acceptance commits a single atomic batch, advances the
//! room head and wakes observers.

mod eval;
#[cfg(test)]
mod tests;

use std::{fmt, sync::Arc};

use crate::{
	dbs::EventIdx,
	id::{EventId, ServerName},
	services::Services,
	Error,
};

/// Pipeline phases, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
	Issue,
	Conform,
	Access,
	Verify,
	FetchAuth,
	AuthStatic,
	FetchPrev,
	FetchState,
	Precommit,
	AuthRela,
	AuthPres,
	Write,
	Post,
	Notify,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Per-evaluation options. An evaluator opts out of any phase explicitly;
/// everything else runs.
#[derive(Clone, Debug)]
pub struct Opts {
	pub conform: bool,
	pub access: bool,
	pub verify: bool,
	pub fetch_auth: bool,
	pub auth_static: bool,
	pub fetch_prev: bool,
	pub fetch_state: bool,
	pub precommit: bool,
	pub auth_rela: bool,
	pub auth_pres: bool,
	pub write: bool,
	pub post: bool,
	pub notify: bool,

	/// Force re-evaluation of the auth phases when the event is already
	/// stored, instead of the usual duplicate short-circuit.
	pub replays: bool,

	/// Schedule a federation send from NOTIFY for locally-authored events.
	pub notify_servers: bool,

	/// The peer the event arrived from, tried first for ancestor fetches.
	pub origin: Option<ServerName>,
}

impl Default for Opts {
	fn default() -> Self {
		Self {
			conform: true,
			access: true,
			verify: true,
			fetch_auth: true,
			auth_static: true,
			fetch_prev: true,
			fetch_state: true,
			precommit: true,
			auth_rela: true,
			auth_pres: true,
			write: true,
			post: true,
			notify: true,
			replays: false,
			notify_servers: false,
			origin: None,
		}
	}
}

impl Opts {
	/// Options for locally-authored events: nothing to fetch, peers get
	/// notified.
	#[must_use]
	pub fn local() -> Self {
		Self {
			verify: false,
			fetch_auth: false,
			fetch_prev: false,
			fetch_state: false,
			notify_servers: true,
			..Self::default()
		}
	}

	/// Options for events received over federation.
	#[must_use]
	pub fn federation(origin: ServerName) -> Self {
		Self { origin: Some(origin), ..Self::default() }
	}

	/// Derived options for evaluating a fetched ancestor: ancestry is
	/// completed through its own fetches, but ancestors never re-trigger
	/// state fetches, present-state auth or outbound notification.
	#[must_use]
	pub fn for_ancestor(&self) -> Self {
		Self {
			fetch_state: false,
			auth_pres: false,
			notify: false,
			notify_servers: false,
			replays: false,
			..self.clone()
		}
	}
}

/// Evaluation result. `Deferred` is not a failure: a fetch was unavailable
/// or in flight and the caller re-enters the evaluation when it completes.
#[derive(Debug)]
pub enum Outcome {
	Accepted { event_idx: EventIdx, event_id: EventId },
	Rejected { phase: Phase, error: Error },
	Deferred { phase: Phase, awaiting: Vec<EventId> },
}

impl Outcome {
	#[inline]
	#[must_use]
	pub fn is_accepted(&self) -> bool { matches!(self, Self::Accepted { .. }) }

	#[must_use]
	pub fn accepted_idx(&self) -> Option<EventIdx> {
		match self {
			Self::Accepted { event_idx, .. } => Some(*event_idx),
			_ => None,
		}
	}
}

/// The evaluator; cheap to construct per call site.
pub struct Vm {
	pub(crate) services: Arc<Services>,
}

impl Vm {
	#[must_use]
	pub fn new(services: &Arc<Services>) -> Self {
		Self { services: services.clone() }
	}
}
