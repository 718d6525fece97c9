//! Per-topic connection pool, generalizing
//! `examples/original_source/apns2/tornado_client.py`'s `_teams`/`get_conn`
//! structure: several `Dispatcher`s per topic, round-robin dispatched,
//! sharing one `Credentials`.
//!
//! Unlike the original, the JWT cache lives on the shared `Credentials`
//! (see `credentials::TokenCredentials`), not per pool slot — the JWT does
//! not depend on topic, so multiplying connections must not multiply the
//! cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use apns_core::DispatchError;

use crate::credentials::Credentials;
use crate::dispatcher::{Dispatcher, DispatcherConfig};

/// A small round-robin pool of dispatchers for one topic (or the
/// configured default).
struct TopicPool {
	dispatchers: Vec<Arc<Dispatcher>>,
	next: AtomicUsize,
}

impl TopicPool {
	fn pick(&self) -> Arc<Dispatcher> {
		let i = self.next.fetch_add(1, Ordering::Relaxed) % self.dispatchers.len();
		self.dispatchers[i].clone()
	}
}

/// Builds one [`TopicPool`] per distinct topic on first use, all sharing
/// the pool's `Credentials` and base connection settings.
pub struct TeamPool {
	pools: RwLock<HashMap<String, TopicPool>>,
	connections_per_topic: usize,
	use_sandbox: bool,
	credentials_factory: Box<dyn Fn() -> Result<Credentials, DispatchError> + Send + Sync>,
}

impl TeamPool {
	/// `credentials_factory` is called once per connection built (the pool
	/// cannot clone `Credentials`, since `TokenCredentials` owns a signing
	/// key and a JWT cache); callers sharing one key file typically build
	/// it by re-reading the same path, or wrap a loaded key behind an
	/// `Arc` themselves and clone that inside the factory.
	pub fn new(
		connections_per_topic: usize,
		use_sandbox: bool,
		credentials_factory: impl Fn() -> Result<Credentials, DispatchError> + Send + Sync + 'static,
	) -> Self {
		Self {
			pools: RwLock::new(HashMap::new()),
			connections_per_topic: connections_per_topic.max(1),
			use_sandbox,
			credentials_factory: Box::new(credentials_factory),
		}
	}

	/// Returns a dispatcher for `topic`, building a fresh pool of
	/// `connections_per_topic` dispatchers the first time this topic is
	/// seen.
	pub fn get(&self, topic: &str) -> Result<Arc<Dispatcher>, DispatchError> {
		if let Some(pool) = self.pools.read().get(topic) {
			return Ok(pool.pick());
		}

		let mut pools = self.pools.write();
		if !pools.contains_key(topic) {
			let mut dispatchers = Vec::with_capacity(self.connections_per_topic);
			for _ in 0..self.connections_per_topic {
				let credentials = (self.credentials_factory)()?;
				let config = DispatcherConfig {
					credentials: Some(credentials),
					use_sandbox: self.use_sandbox,
					..Default::default()
				};
				dispatchers.push(Arc::new(Dispatcher::new(config)?));
			}
			pools.insert(
				topic.to_string(),
				TopicPool {
					dispatchers,
					next: AtomicUsize::new(0),
				},
			);
		}

		Ok(pools.get(topic).unwrap().pick())
	}
}
