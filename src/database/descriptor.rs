use rocksdb::DBCompressionType as CompressionType;

/// Block-cache disposition for a column.
#[derive(Clone, Copy, Debug)]
pub enum CacheDisp {
	/// Column gets its own cache partition.
	Unique,
	/// Column shares the engine-wide cache.
	Shared,
}

/// Open-time description of one column: the name is the column family name;
/// the hints shape the table options.
#[derive(Clone, Debug)]
pub struct Descriptor {
	pub name: &'static str,
	pub cache_disp: CacheDisp,
	pub key_size_hint: Option<usize>,
	pub val_size_hint: Option<usize>,
	pub block_size: usize,
	pub cache_size: usize,
	pub compression: CompressionType,
}

pub const BASE: Descriptor = Descriptor {
	name: "",
	cache_disp: CacheDisp::Shared,
	key_size_hint: None,
	val_size_hint: None,
	block_size: 1024 * 4,
	cache_size: 1024 * 1024 * 4,
	compression: CompressionType::Lz4,
};

/// Point-lookup dominated columns.
pub const RANDOM: Descriptor = Descriptor { block_size: 512, ..BASE };

/// Scan dominated columns.
pub const SEQUENTIAL: Descriptor = Descriptor { block_size: 1024 * 32, ..BASE };

/// Large values, low locality (the event payload column).
pub const RANDOM_LARGE: Descriptor = Descriptor {
	cache_disp: CacheDisp::Unique,
	cache_size: 1024 * 1024 * 32,
	..BASE
};
