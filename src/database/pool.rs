//! Blocking read offload.
//!
//! Every read starts in the non-blocking tier; a block-cache miss surfaces
//! as `incomplete` and the operation is handed to one of these workers,
//! which re-issues it in the blocking tier. The async caller suspends on a
//! oneshot until the worker replies, keeping the scheduler free of disk
//! stalls.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use async_channel::{bounded, Receiver, Sender};
use futures::channel::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, warn};

use super::map::Map;
use crate::{Error, Result, Server};

pub(crate) struct Pool {
	queue: Sender<Cmd>,
	workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
	busy: AtomicUsize,
}

pub(crate) enum Cmd {
	Get(Get),
	Seek(Seek),
}

/// A point read in the blocking tier.
pub(crate) struct Get {
	pub(crate) map: Arc<Map>,
	pub(crate) key: Vec<u8>,
	pub(crate) res: Option<oneshot::Sender<Result<Option<Vec<u8>>>>>,
}

/// A bounded range fill in the blocking tier; the caller re-seats its
/// cursor from the last returned key.
pub(crate) struct Seek {
	pub(crate) map: Arc<Map>,
	pub(crate) from: Option<Vec<u8>>,
	pub(crate) reverse: bool,
	pub(crate) limit: usize,
	pub(crate) res: Option<oneshot::Sender<Result<Vec<(Vec<u8>, Vec<u8>)>>>>,
}

const QUEUE_LIMIT: (usize, usize) = (1, 3072);
const WORKER_LIMIT: (usize, usize) = (1, 512);

impl Pool {
	pub(crate) async fn new(server: &Arc<Server>) -> Result<Arc<Self>> {
		let queue_size = server
			.config
			.db_pool_queue_size
			.clamp(QUEUE_LIMIT.0, QUEUE_LIMIT.1);
		let (send, recv) = bounded(queue_size);
		let pool = Arc::new(Self {
			queue: send,
			workers: std::sync::Mutex::new(Vec::new()),
			busy: AtomicUsize::new(0),
		});

		let worker_num = server
			.config
			.db_pool_workers
			.clamp(WORKER_LIMIT.0, WORKER_LIMIT.1);
		pool.spawn_until(recv, worker_num);

		Ok(pool)
	}

	pub(crate) fn close(&self) {
		if self.queue.is_closed() {
			return;
		}

		debug!(
			senders = self.queue.sender_count(),
			receivers = self.queue.receiver_count(),
			"closing pool channel"
		);
		self.queue.close();
	}

	fn spawn_until(self: &Arc<Self>, recv: Receiver<Cmd>, max: usize) {
		let mut workers = self.workers.lock().expect("pool workers lock");
		while workers.len() < max {
			let id = workers.len();
			let self_ = self.clone();
			let recv = recv.clone();
			workers.push(tokio::task::spawn_blocking(move || self_.worker(id, recv)));
		}
	}

	pub(crate) async fn execute_get(&self, mut cmd: Get) -> Result<Option<Vec<u8>>> {
		let (send, recv) = oneshot::channel();
		_ = cmd.res.insert(send);
		self.submit(Cmd::Get(cmd)).await?;

		recv.await.map_err(|_| Error::ShutdownInProgress)?
	}

	pub(crate) async fn execute_seek(&self, mut cmd: Seek) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
		let (send, recv) = oneshot::channel();
		_ = cmd.res.insert(send);
		self.submit(Cmd::Seek(cmd)).await?;

		recv.await.map_err(|_| Error::ShutdownInProgress)?
	}

	async fn submit(&self, cmd: Cmd) -> Result {
		if self.queue.is_full() {
			warn!(capacity = ?self.queue.capacity(), "pool queue is full");
		}

		self.queue
			.send(cmd)
			.await
			.map_err(|_| Error::ShutdownInProgress)
	}

	fn worker(self: Arc<Self>, id: usize, recv: Receiver<Cmd>) {
		let span = debug_span!("pool worker", id);
		let _enter = span.enter();
		debug!("worker spawned");

		while let Ok(mut cmd) = recv.recv_blocking() {
			self.busy.fetch_add(1, Ordering::Relaxed);
			self.handle(&mut cmd);
			self.busy.fetch_sub(1, Ordering::Relaxed);
		}

		debug!("worker finished");
	}

	fn handle(&self, cmd: &mut Cmd) {
		match cmd {
			Cmd::Get(cmd) => Self::handle_get(cmd),
			Cmd::Seek(cmd) => Self::handle_seek(cmd),
		}
	}

	fn handle_get(cmd: &mut Get) {
		debug_assert!(!cmd.key.is_empty(), "querying for empty key");

		let chan = cmd.res.take().expect("missing result channel");

		// The future may have been dropped while the command sat in the
		// queue; bail before paying for the query.
		if chan.is_canceled() {
			return;
		}

		let result = cmd.map.get_blocking(&cmd.key);
		_ = chan.send(result);
	}

	fn handle_seek(cmd: &mut Seek) {
		let chan = cmd.res.take().expect("missing result channel");
		if chan.is_canceled() {
			return;
		}

		let result = cmd
			.map
			.chunk_blocking(cmd.from.as_deref(), cmd.reverse, cmd.limit);
		_ = chan.send(result);
	}
}

impl Drop for Pool {
	fn drop(&mut self) {
		debug_assert!(self.queue.is_closed(), "channel should be closed on drop");
	}
}
