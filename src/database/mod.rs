mod batch;
pub mod descriptor;
mod engine;
mod map;
mod pool;
pub mod stream;
#[cfg(test)]
mod tests;
mod watchers;

use std::{collections::BTreeMap, ops::Index, sync::Arc};

use crate::{Result, Server};

pub use self::{
	batch::Batch,
	descriptor::Descriptor,
	engine::{Engine, Snapshot},
	map::{Key, KeyVal, Map, Val},
	stream::Direction,
};

/// An open logical database: the engine plus every described column.
pub struct Database {
	pub(crate) engine: Arc<Engine>,
	maps: BTreeMap<&'static str, Arc<Map>>,
}

impl Database {
	/// Load an existing database or create a new one.
	pub async fn open(server: &Arc<Server>, descriptors: &[Descriptor]) -> Result<Arc<Self>> {
		let path = server.config.database_dir();
		let engine = Engine::open(server, &path, descriptors).await?;
		let maps = descriptors
			.iter()
			.map(|desc| (desc.name, Map::open(&engine, desc.name)))
			.collect();

		Ok(Arc::new(Self { engine, maps }))
	}

	#[inline]
	pub fn get(&self, name: &str) -> Result<&Arc<Map>> {
		self.maps
			.get(name)
			.ok_or_else(|| crate::Error::NotFound("column not found".into()))
	}

	#[must_use]
	pub fn batch(&self) -> Batch { Batch::new(&self.engine) }

	#[must_use]
	pub fn snapshot(&self) -> Snapshot<'_> { self.engine.snapshot() }

	#[inline]
	#[must_use]
	pub fn sequence(&self) -> u64 { self.engine.sequence() }

	#[inline]
	#[must_use]
	pub fn is_read_only(&self) -> bool { self.engine.is_read_only() }

	pub fn keys(&self) -> impl Iterator<Item = &&'static str> + Send + '_ { self.maps.keys() }
}

impl Index<&str> for Database {
	type Output = Arc<Map>;

	fn index(&self, name: &str) -> &Self::Output {
		self.maps.get(name).expect("column in database does not exist")
	}
}
