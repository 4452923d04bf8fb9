use std::path::{Path, PathBuf};

use figment::{
	providers::{Env, Format, Toml},
	Figment,
};
use serde::Deserialize;

use crate::Result;

/// Server configuration, merged from defaults, an optional TOML file and
/// `RIVERBED_`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// The server name events are authored under, e.g. `example.org`.
	pub server_name: String,

	/// Base directory holding the database directory.
	pub database_path: PathBuf,

	#[serde(default = "default_db_cache_capacity_mb")]
	pub db_cache_capacity_mb: f64,

	#[serde(default = "default_db_pool_workers")]
	pub db_pool_workers: usize,

	#[serde(default = "default_db_pool_queue_size")]
	pub db_pool_queue_size: usize,

	#[serde(default = "default_event_cache_capacity")]
	pub event_cache_capacity: usize,

	#[serde(default = "default_fetch_max_inflight")]
	pub fetch_max_inflight: usize,

	/// Seconds a federation round-trip may take before the fetch rotates.
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,

	/// Seconds an origin is skipped after a transport error.
	#[serde(default = "default_origin_cooldown_secs")]
	pub origin_cooldown_secs: u64,

	/// Servers we refuse to federate with at all.
	#[serde(default)]
	pub forbidden_servers: Vec<String>,

	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,

	#[serde(default = "default_federation_pdus_per_txn")]
	pub federation_pdus_per_txn: usize,

	#[serde(default = "default_federation_edus_per_txn")]
	pub federation_edus_per_txn: usize,
}

impl Config {
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let mut figment = Figment::new();
		if let Some(path) = path {
			figment = figment.merge(Toml::file(path));
		}

		let config = figment
			.merge(Env::prefixed("RIVERBED_").split("__"))
			.extract()?;

		Ok(config)
	}

	/// Directory of the single logical "events" database.
	#[must_use]
	pub fn database_dir(&self) -> PathBuf { self.database_path.join("events") }
}

fn default_db_cache_capacity_mb() -> f64 { 256.0 }

fn default_db_pool_workers() -> usize { 32 }

fn default_db_pool_queue_size() -> usize { 256 }

fn default_event_cache_capacity() -> usize { 10_000 }

fn default_fetch_max_inflight() -> usize { 32 }

fn default_request_timeout_secs() -> u64 { 30 }

fn default_origin_cooldown_secs() -> u64 { 300 }

fn default_max_request_size() -> usize { 20 * 1024 * 1024 }

fn default_federation_pdus_per_txn() -> usize { 50 }

fn default_federation_edus_per_txn() -> usize { 100 }

#[cfg(test)]
pub(crate) fn test(database_path: &Path) -> Config {
	Config {
		server_name: "test.local".into(),
		database_path: database_path.to_owned(),
		db_cache_capacity_mb: 16.0,
		db_pool_workers: 2,
		db_pool_queue_size: 32,
		event_cache_capacity: 64,
		fetch_max_inflight: 4,
		request_timeout_secs: 5,
		origin_cooldown_secs: 1,
		forbidden_servers: Vec::new(),
		max_request_size: 1024 * 1024,
		federation_pdus_per_txn: 50,
		federation_edus_per_txn: 100,
	}
}
