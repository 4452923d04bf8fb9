use std::{
	collections::{hash_map, HashMap},
	future::Future,
	pin::Pin,
	sync::RwLock,
};

use tokio::sync::watch;

#[derive(Default)]
pub(crate) struct Watchers {
	watchers: RwLock<HashMap<Vec<u8>, (watch::Sender<()>, watch::Receiver<()>)>>,
}

impl Watchers {
	pub(crate) fn watch<'a>(
		&'a self,
		prefix: &[u8],
	) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
		let mut rx = match self
			.watchers
			.write()
			.expect("watchers lock")
			.entry(prefix.to_vec())
		{
			hash_map::Entry::Occupied(o) => o.get().1.clone(),
			hash_map::Entry::Vacant(v) => {
				let (tx, rx) = watch::channel(());
				v.insert((tx, rx.clone()));
				rx
			},
		};

		Box::pin(async move {
			// Ignore the closed case; a dropped sender just ends the wait.
			_ = rx.changed().await;
		})
	}

	pub(crate) fn wake(&self, key: &[u8]) {
		let watchers = self.watchers.read().expect("watchers lock");
		let triggered: Vec<_> = watchers
			.keys()
			.filter(|prefix| key.starts_with(prefix))
			.cloned()
			.collect();
		drop(watchers);

		if triggered.is_empty() {
			return;
		}

		let mut watchers = self.watchers.write().expect("watchers lock");
		for prefix in triggered {
			if let Some((tx, _)) = watchers.remove(&prefix) {
				_ = tx.send(());
			}
		}
	}
}
