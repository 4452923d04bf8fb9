use std::sync::Arc;

use rocksdb::WriteBatchWithTransaction;

use super::{engine::Engine, map::Map};
use crate::Result;

/// An ordered sequence of cell writes applied as a unit. Readers outside
/// the batch observe either all of it or none of it.
pub struct Batch {
	engine: Arc<Engine>,
	inner: WriteBatchWithTransaction<false>,
	/// Keys to wake watchers for after a successful commit.
	wakes: Vec<(Arc<Map>, Vec<u8>)>,
}

impl Batch {
	pub(crate) fn new(engine: &Arc<Engine>) -> Self {
		Self {
			engine: engine.clone(),
			inner: WriteBatchWithTransaction::default(),
			wakes: Vec::new(),
		}
	}

	pub fn put(&mut self, map: &Arc<Map>, key: &[u8], value: &[u8]) {
		self.inner.put_cf(&self.engine.cf(map.name()), key, value);
		self.wakes.push((map.clone(), key.to_vec()));
	}

	pub fn delete(&mut self, map: &Arc<Map>, key: &[u8]) {
		self.inner.delete_cf(&self.engine.cf(map.name()), key);
	}

	pub fn delete_range(&mut self, map: &Arc<Map>, from: &[u8], to: &[u8]) {
		self.inner.delete_range_cf(&self.engine.cf(map.name()), from, to);
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool { self.inner.is_empty() }

	#[inline]
	#[must_use]
	pub fn len(&self) -> usize { self.inner.len() }

	/// Commit atomically; on success, wake prefix watchers for every
	/// written key.
	pub fn commit(self) -> Result {
		self.engine.write(self.inner)?;
		for (map, key) in &self.wakes {
			map.wake(key);
		}

		Ok(())
	}
}
