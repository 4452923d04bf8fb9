use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use tokio::sync::broadcast;
use tracing::info;

use crate::{config::Config, Error, Result};

/// Process-wide environment handed to every subsystem. Collaborators are
/// dependency-injected through this handle; there are no global singletons.
pub struct Server {
	pub config: Config,

	stopping: AtomicBool,
	shutdown: broadcast::Sender<()>,
}

impl Server {
	#[must_use]
	pub fn new(config: Config) -> Arc<Self> {
		let (shutdown, _) = broadcast::channel(1);
		Arc::new(Self {
			config,
			stopping: AtomicBool::new(false),
			shutdown,
		})
	}

	/// Signal all tasks to wind down at their next suspension point.
	pub fn shutdown(&self) {
		if self.stopping.swap(true, Ordering::SeqCst) {
			return;
		}

		info!("shutting down");
		_ = self.shutdown.send(());
	}

	#[inline]
	#[must_use]
	pub fn running(&self) -> bool { !self.stopping.load(Ordering::Relaxed) }

	/// Subscribe to the shutdown signal. Cancellation is cooperative; tasks
	/// select on this alongside their own suspension points.
	#[must_use]
	pub fn signal(&self) -> broadcast::Receiver<()> { self.shutdown.subscribe() }

	/// Guard for long operations: maps shutdown onto the error taxonomy.
	pub fn check_running(&self) -> Result {
		self.running()
			.then_some(())
			.ok_or(Error::ShutdownInProgress)
	}
}
