use std::sync::Arc;

use crate::{
	database::Database,
	dbs::{self, Dbs},
	fed,
	fetch::Fetcher,
	keys::Keys,
	rooms::Rooms,
	sending::Sender,
	Result, Server,
};

/// The wired-up core. Every entry point takes this environment explicitly;
/// nothing in the crate reaches for a global.
pub struct Services {
	pub server: Arc<Server>,
	pub db: Arc<Database>,
	pub dbs: Arc<Dbs>,
	pub rooms: Arc<Rooms>,
	pub keys: Arc<Keys>,
	pub fed: Arc<fed::Client>,
	pub fetch: Arc<Fetcher>,
	pub sending: Arc<Sender>,
}

impl Services {
	/// Open the database and construct every service. The HTTP client, with
	/// its connection pool and TLS configuration, is supplied by the caller.
	pub async fn open(server: &Arc<Server>, http: reqwest::Client) -> Result<Arc<Self>> {
		let db = Database::open(server, dbs::MAPS).await?;
		let dbs = Dbs::new(&db);
		let rooms = Rooms::new(server, &dbs);
		let keys = Keys::open(server, &dbs, &rooms)?;
		let fed = fed::Client::new(server, http, keys.signing_key(), keys.key_name())?;
		let fetch = Fetcher::new(server, &fed);
		let sending = Sender::new(server, &fed);

		Ok(Arc::new(Self {
			server: server.clone(),
			db,
			dbs,
			rooms,
			keys,
			fed,
			fetch,
			sending,
		}))
	}

	/// An evaluator over this environment.
	#[must_use]
	pub fn vm(self: &Arc<Self>) -> crate::vm::Vm { crate::vm::Vm::new(self) }
}
