use std::{
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use rocksdb::{
	BlockBasedOptions, BoundColumnFamily, Cache, ColumnFamilyDescriptor,
	DBCompactionStyle, DBWithThreadMode, MultiThreaded, Options, SnapshotWithThreadMode,
	WriteBatchWithTransaction, WriteOptions,
};
use tracing::{debug, error, info, warn};

use super::{
	descriptor::{CacheDisp, Descriptor},
	pool::Pool,
};
use crate::{error::map_engine_err, Error, Result, Server};

pub(crate) type Db = DBWithThreadMode<MultiThreaded>;
pub type Snapshot<'a> = SnapshotWithThreadMode<'a, Db>;

/// Corruption reports beyond this many within a run mark the store
/// read-only.
const CORRUPTION_THRESHOLD: usize = 16;

/// The ordered column store. One engine per logical database; the column
/// family set is fixed by the open-time descriptor table.
pub struct Engine {
	pub(crate) server: Arc<Server>,
	pub(crate) db: Db,
	pub(crate) pool: Arc<Pool>,
	cache: Cache,
	corruptions: AtomicUsize,
	read_only: std::sync::atomic::AtomicBool,
}

impl Engine {
	/// Open (or create) the database under the configured base directory.
	/// Columns on disk that the descriptor table does not name are an open
	/// error; columns named but absent are created.
	pub async fn open(
		server: &Arc<Server>,
		path: &Path,
		descriptors: &[Descriptor],
	) -> Result<Arc<Self>> {
		let cache_bytes = (server.config.db_cache_capacity_mb * 1024.0 * 1024.0) as usize;
		let cache = Cache::new_lru_cache(cache_bytes);

		let db_opts = db_options();
		let existing = Db::list_cf(&db_opts, path).unwrap_or_default();
		for on_disk in existing.iter().filter(|name| *name != "default") {
			if !descriptors.iter().any(|d| d.name == on_disk) {
				return Err(Error::InvalidArgument(
					format!("column '{on_disk}' exists on disk but is not described").into(),
				));
			}
		}

		let cf_descriptors: Vec<_> = descriptors
			.iter()
			.map(|desc| ColumnFamilyDescriptor::new(desc.name, cf_options(desc, &cache)))
			.collect();

		debug!(
			path = %path.display(),
			columns = cf_descriptors.len(),
			"opening database"
		);

		let db = Db::open_cf_descriptors(&db_opts, path, cf_descriptors).map_err(map_engine_err)?;
		let pool = Pool::new(server).await?;

		info!(sequence = db.latest_sequence_number(), "database opened");

		Ok(Arc::new(Self {
			server: server.clone(),
			db,
			pool,
			cache,
			corruptions: AtomicUsize::new(0),
			read_only: std::sync::atomic::AtomicBool::new(false),
		}))
	}

	pub(crate) fn cf(&self, name: &str) -> Arc<BoundColumnFamily<'_>> {
		self.db
			.cf_handle(name)
			.expect("column was described at open")
	}

	/// Apply a write batch atomically. Readers see either all of it or none.
	pub fn write(&self, batch: WriteBatchWithTransaction<false>) -> Result {
		if self.is_read_only() {
			return Err(Error::NotSupported("store is marked read-only".into()));
		}

		let mut opts = WriteOptions::default();
		opts.set_sync(false);
		self.db
			.write_opt(batch, &opts)
			.map_err(map_engine_err)
			.inspect_err(|e| self.count_error(e))
	}

	/// A handle fixing a sequence number; reads against it see exactly that
	/// state.
	pub fn snapshot(&self) -> Snapshot<'_> { self.db.snapshot() }

	pub fn sequence(&self) -> u64 { self.db.latest_sequence_number() }

	pub fn flush(&self) -> Result {
		self.db.flush_wal(false).map_err(map_engine_err)
	}

	pub fn sort(&self) -> Result {
		self.db.flush().map_err(map_engine_err)
	}

	#[inline]
	pub fn is_read_only(&self) -> bool { self.read_only.load(Ordering::Relaxed) }

	/// Structural damage is logged and counted; past the threshold the store
	/// stops accepting writes.
	pub(crate) fn count_error(&self, e: &Error) {
		if !matches!(e, Error::Corruption(_)) {
			return;
		}

		error!("storage corruption: {e}");
		let total = self.corruptions.fetch_add(1, Ordering::Relaxed).saturating_add(1);
		if total >= CORRUPTION_THRESHOLD && !self.read_only.swap(true, Ordering::Relaxed) {
			warn!(total, "corruption threshold exceeded; store is now read-only");
		}
	}

	pub(crate) fn cache(&self) -> &Cache { &self.cache }
}

impl Drop for Engine {
	fn drop(&mut self) {
		debug!("closing database");
		self.pool.close();
		_ = self.db.flush_wal(true);
	}
}

fn db_options() -> Options {
	let mut opts = Options::default();
	opts.create_if_missing(true);
	opts.create_missing_column_families(true);
	opts.set_max_background_jobs(4);
	opts.set_max_total_wal_size(64 * 1024 * 1024);
	opts.set_compaction_style(DBCompactionStyle::Level);
	opts
}

fn cf_options(desc: &Descriptor, shared: &Cache) -> Options {
	let mut table = BlockBasedOptions::default();
	table.set_block_size(desc.block_size);
	match desc.cache_disp {
		CacheDisp::Shared => table.set_block_cache(shared),
		CacheDisp::Unique => table.set_block_cache(&Cache::new_lru_cache(desc.cache_size)),
	}

	let mut opts = Options::default();
	opts.set_block_based_table_factory(&table);
	opts.set_compression_type(desc.compression);
	if let Some(hint) = desc.val_size_hint {
		opts.optimize_for_point_lookup(hint as u64);
	}
	_ = desc.key_size_hint;

	opts
}
