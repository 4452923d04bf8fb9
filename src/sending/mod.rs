//! Outbound federation transactions.
//!
//! Each destination has its own queue and at most one transaction in
//! flight: a txn is built, signed, transmitted, and only then is the next
//! one formed for the same destination, preserving per-destination order.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use tracing::{debug, warn};

use crate::{
	event::canonical::CanonicalObject,
	fed,
	id::ServerName,
	utils, Result, Server,
};

const MAX_RETRIES: u32 = 5;

enum Outgoing {
	Pdu(CanonicalObject),
	Edu(CanonicalObject),
}

struct Queues {
	by_destination: HashMap<String, VecDeque<Outgoing>>,
	draining: std::collections::HashSet<String>,
}

pub struct Sender {
	server: Arc<Server>,
	fed: Arc<fed::Client>,
	queues: Mutex<Queues>,
	txn_counter: AtomicU64,
}

impl Sender {
	pub fn new(server: &Arc<Server>, fed: &Arc<fed::Client>) -> Arc<Self> {
		Arc::new(Self {
			server: server.clone(),
			fed: fed.clone(),
			queues: Mutex::new(Queues {
				by_destination: HashMap::new(),
				draining: std::collections::HashSet::new(),
			}),
			txn_counter: AtomicU64::new(utils::millis_since_unix_epoch()),
		})
	}

	/// Queue a PDU for every destination; drains start as needed.
	pub fn send_pdu<'a>(
		self: &Arc<Self>,
		destinations: impl Iterator<Item = &'a ServerName>,
		pdu: &CanonicalObject,
	) {
		for destination in destinations {
			self.enqueue(destination, Outgoing::Pdu(pdu.clone()));
		}
	}

	/// Queue an ephemeral datagram; not stored in any room DAG.
	pub fn send_edu<'a>(
		self: &Arc<Self>,
		destinations: impl Iterator<Item = &'a ServerName>,
		edu: &CanonicalObject,
	) {
		for destination in destinations {
			self.enqueue(destination, Outgoing::Edu(edu.clone()));
		}
	}

	fn enqueue(self: &Arc<Self>, destination: &ServerName, item: Outgoing) {
		if self
			.server
			.config
			.forbidden_servers
			.iter()
			.any(|s| s == destination.as_str())
		{
			debug!(%destination, "destination is forbidden; dropping");
			return;
		}

		let spawn_drain = {
			let mut queues = self.queues.lock().expect("queues lock");
			queues
				.by_destination
				.entry(destination.to_string())
				.or_default()
				.push_back(item);
			queues.draining.insert(destination.to_string())
		};

		if spawn_drain {
			let self_ = self.clone();
			let destination = destination.clone();
			tokio::spawn(async move { self_.drain(destination).await });
		}
	}

	/// One task per destination; exits when its queue runs dry.
	async fn drain(self: Arc<Self>, destination: ServerName) {
		loop {
			let (pdus, edus) = {
				let mut queues = self.queues.lock().expect("queues lock");
				let Some(queue) = queues.by_destination.get_mut(destination.as_str()) else {
					queues.draining.remove(destination.as_str());
					return;
				};
				if queue.is_empty() {
					queues.by_destination.remove(destination.as_str());
					queues.draining.remove(destination.as_str());
					return;
				}

				self.take_batch(queue)
			};

			if let Err(e) = self.transmit(&destination, pdus, edus).await {
				warn!(%destination, "transaction abandoned: {e}");
			}

			if !self.server.running() {
				let mut queues = self.queues.lock().expect("queues lock");
				queues.draining.remove(destination.as_str());
				return;
			}
		}
	}

	/// Up to 50 PDUs and 100 EDUs per transaction.
	fn take_batch(&self, queue: &mut VecDeque<Outgoing>) -> (Vec<CanonicalObject>, Vec<CanonicalObject>) {
		let pdu_cap = self.server.config.federation_pdus_per_txn;
		let edu_cap = self.server.config.federation_edus_per_txn;

		let mut pdus = Vec::new();
		let mut edus = Vec::new();
		while let Some(front) = queue.front() {
			let full = match front {
				Outgoing::Pdu(_) => pdus.len() >= pdu_cap,
				Outgoing::Edu(_) => edus.len() >= edu_cap,
			};
			if full {
				break;
			}

			match queue.pop_front().expect("front observed") {
				Outgoing::Pdu(pdu) => pdus.push(pdu),
				Outgoing::Edu(edu) => edus.push(edu),
			}
		}

		(pdus, edus)
	}

	async fn transmit(
		&self,
		destination: &ServerName,
		pdus: Vec<CanonicalObject>,
		edus: Vec<CanonicalObject>,
	) -> Result {
		let txn_id = self.txn_counter.fetch_add(1, Ordering::Relaxed).to_string();

		let mut backoff = Duration::from_secs(1);
		for attempt in 0..MAX_RETRIES {
			self.server.check_running()?;

			match self
				.fed
				.send_transaction(destination, &txn_id, pdus.clone(), edus.clone())
				.await
			{
				Ok(response) => {
					for (event_id, result) in &response.pdus {
						if let Some(error) = &result.error {
							debug!(%destination, event_id, error, "peer rejected pdu");
						}
					}
					return Ok(());
				},
				Err(e) if e.is_terminal() => return Err(e),
				Err(e) => {
					debug!(%destination, attempt, "transaction failed, backing off: {e}");
					tokio::time::sleep(backoff).await;
					backoff = backoff.saturating_mul(2);
				},
			}
		}

		Err(crate::Error::FetchTimeout { origin: destination.to_string() })
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn object(body: &str) -> CanonicalObject {
		match json!({ "body": body }) {
			serde_json::Value::Object(o) => o,
			_ => unreachable!(),
		}
	}

	#[test]
	fn batches_respect_caps_and_order() {
		let dir = tempfile::tempdir().unwrap();
		let server = crate::Server::new(crate::config::test(dir.path()));
		let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
		let _guard = rt.enter();

		let key = std::sync::Arc::new(ed25519_dalek::SigningKey::from_bytes(&[1u8; 32]));
		let fed = fed::Client::new(&server, reqwest::Client::new(), key, "k").unwrap();
		let sender = Sender::new(&server, &fed);

		let mut queue: VecDeque<Outgoing> = (0..120)
			.map(|i| {
				if i < 70 {
					Outgoing::Pdu(object(&format!("p{i}")))
				} else {
					Outgoing::Edu(object(&format!("e{i}")))
				}
			})
			.collect();

		let (pdus, edus) = sender.take_batch(&mut queue);
		assert_eq!(pdus.len(), 50, "pdu cap");
		assert!(edus.is_empty(), "order preserved: edus sit behind excess pdus");
		assert_eq!(queue.len(), 70);

		let (pdus, edus) = sender.take_batch(&mut queue);
		assert_eq!(pdus.len(), 20);
		assert_eq!(edus.len(), 50);
		assert!(queue.is_empty());
	}
}
