use crate::database::descriptor::{CacheDisp, Descriptor, BASE, RANDOM, RANDOM_LARGE, SEQUENTIAL};

/// Every column of the "events" database. The set is part of the open-time
/// description; opening a database whose disk state has columns outside
/// this table is an error.
pub const MAPS: &[Descriptor] = &[
	// counters (event_idx allocator)
	Descriptor { name: "global", ..BASE },
	// primary id -> internal index
	Descriptor { name: "eventid_idx", key_size_hint: Some(48), val_size_hint: Some(8), ..RANDOM },
	// event payload
	Descriptor { name: "idx_json", key_size_hint: Some(8), cache_disp: CacheDisp::Unique, ..RANDOM_LARGE },
	// column-per-field
	Descriptor { name: "idx_eventid", key_size_hint: Some(8), val_size_hint: Some(48), ..RANDOM },
	Descriptor { name: "idx_type", key_size_hint: Some(8), val_size_hint: Some(48), ..RANDOM },
	Descriptor { name: "idx_sender", key_size_hint: Some(8), val_size_hint: Some(48), ..RANDOM },
	Descriptor { name: "idx_room", key_size_hint: Some(8), val_size_hint: Some(48), ..RANDOM },
	Descriptor { name: "idx_depth", key_size_hint: Some(8), val_size_hint: Some(8), ..RANDOM },
	Descriptor { name: "idx_state_key", key_size_hint: Some(8), val_size_hint: Some(48), ..RANDOM },
	// room member stream, depth ordered
	Descriptor { name: "room_events", val_size_hint: Some(48), ..SEQUENTIAL },
	// type-in-room stream
	Descriptor { name: "room_type_events", val_size_hint: Some(8), ..SEQUENTIAL },
	// state cells and their history
	Descriptor { name: "room_state", val_size_hint: Some(8), ..SEQUENTIAL },
	// forward extremities
	Descriptor { name: "room_heads", val_size_hint: Some(8), ..RANDOM },
	// unresolved ancestors
	Descriptor { name: "event_horizon", val_size_hint: Some(1), ..SEQUENTIAL },
	// forward reference graph
	Descriptor { name: "event_refs", val_size_hint: Some(1), ..SEQUENTIAL },
];
