use {
	super::{
		Transport,
		link::{Link, OpenError},
	},
	iroh::{EndpointAddr, EndpointId, endpoint::Connection},
	parking_lot::Mutex,
	std::{
		collections::HashMap,
		time::{Duration, Instant},
	},
};

/// Connection pool keyed by `(datacenter, peer)`.
///
/// One pooled connection per remote server; individual requests open
/// multiplexed streams on it, so checkouts do not contend. Connections
/// idle past the configured timeout are closed by the next sweep.
pub struct ConnectionPool {
	transport: Transport,
	idle_timeout: Duration,
	entries: Mutex<HashMap<PoolKey, PooledConnection>>,
}

type PoolKey = (String, EndpointId);

struct PooledConnection {
	connection: Connection,
	last_used: Instant,
}

impl ConnectionPool {
	pub fn new(transport: Transport, idle_timeout: Duration) -> Self {
		Self {
			transport,
			idle_timeout,
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Opens a protocol stream to a peer, reusing the pooled connection
	/// when one is alive.
	pub async fn open(
		&self,
		datacenter: &str,
		remote: impl Into<EndpointAddr>,
		alpn: &[u8],
	) -> Result<Link, OpenError> {
		let remote = remote.into();
		let key = (datacenter.to_string(), remote.id);

		let pooled = {
			let mut entries = self.entries.lock();
			self.sweep(&mut entries);
			entries.get_mut(&key).map(|entry| {
				entry.last_used = Instant::now();
				entry.connection.clone()
			})
		};

		if let Some(connection) = pooled {
			if connection.close_reason().is_none() {
				match Link::open_on(connection).await {
					Ok(link) => return Ok(link),
					Err(e) => {
						tracing::trace!(
							error = %e,
							"pooled connection unusable, redialing",
						);
					}
				}
			}
			self.entries.lock().remove(&key);
		}

		let link = Link::open(&self.transport, remote, alpn).await?;
		self.entries.lock().insert(key, PooledConnection {
			connection: link.connection().clone(),
			last_used: Instant::now(),
		});
		Ok(link)
	}

	/// Drops the pooled connection of a peer, e.g. after repeated request
	/// failures.
	pub fn evict(&self, datacenter: &str, peer: EndpointId) {
		self
			.entries
			.lock()
			.remove(&(datacenter.to_string(), peer));
	}

	/// Number of live pooled connections.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn sweep(&self, entries: &mut HashMap<PoolKey, PooledConnection>) {
		let idle = self.idle_timeout;
		entries.retain(|_, entry| {
			let keep = entry.last_used.elapsed() < idle
				&& entry.connection.close_reason().is_none();
			if !keep {
				entry.connection.close(0u8.into(), b"idle");
			}
			keep
		});
	}
}
