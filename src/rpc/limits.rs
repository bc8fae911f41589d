use {
	crate::types::NodeId,
	iroh::EndpointId,
	parking_lot::Mutex,
	std::{
		collections::HashMap,
		time::{Duration, Instant},
	},
};

/// Global request rate limiter: a token bucket refilled at `rate` tokens
/// per second with a capacity of `burst`. A rate of `None` disables
/// limiting.
pub struct RateLimiter {
	state: Option<Mutex<Bucket>>,
}

struct Bucket {
	rate: f64,
	burst: f64,
	tokens: f64,
	refilled: Instant,
}

impl RateLimiter {
	pub fn new(rate: Option<f64>, burst: usize) -> Self {
		let state = rate.filter(|r| r.is_finite() && *r > 0.0).map(|rate| {
			Mutex::new(Bucket {
				rate,
				burst: burst.max(1) as f64,
				tokens: burst.max(1) as f64,
				refilled: Instant::now(),
			})
		});
		Self { state }
	}

	/// Takes one token. On refusal returns the suggested retry-after.
	pub fn check(&self) -> Result<(), Duration> {
		let Some(bucket) = &self.state else {
			return Ok(());
		};
		let mut bucket = bucket.lock();

		let elapsed = bucket.refilled.elapsed().as_secs_f64();
		bucket.tokens =
			(bucket.tokens + elapsed * bucket.rate).min(bucket.burst);
		bucket.refilled = Instant::now();

		if bucket.tokens >= 1.0 {
			bucket.tokens -= 1.0;
			Ok(())
		} else {
			let wait = (1.0 - bucket.tokens) / bucket.rate;
			Err(Duration::from_secs_f64(wait))
		}
	}
}

/// Per-client connection cap. Identified by transport identity, which is
/// stable across connections from the same peer.
pub struct ClientLimiter {
	max_per_client: usize,
	connections: Mutex<HashMap<EndpointId, usize>>,
}

impl ClientLimiter {
	pub fn new(max_per_client: usize) -> Self {
		Self {
			max_per_client: max_per_client.max(1),
			connections: Mutex::new(HashMap::new()),
		}
	}

	/// Registers one connection; refuses when the client is at its cap.
	pub fn acquire(&self, client: EndpointId) -> Option<ClientPermit<'_>> {
		let mut connections = self.connections.lock();
		let count = connections.entry(client).or_insert(0);
		if *count >= self.max_per_client {
			return None;
		}
		*count += 1;
		Some(ClientPermit {
			limiter: self,
			client,
		})
	}

	pub fn active(&self, client: EndpointId) -> usize {
		self.connections.lock().get(&client).copied().unwrap_or(0)
	}

	fn release(&self, client: EndpointId) {
		let mut connections = self.connections.lock();
		if let Some(count) = connections.get_mut(&client) {
			*count -= 1;
			if *count == 0 {
				connections.remove(&client);
			}
		}
	}
}

/// RAII permit for one client connection.
pub struct ClientPermit<'a> {
	limiter: &'a ClientLimiter,
	client: EndpointId,
}

impl Drop for ClientPermit<'_> {
	fn drop(&mut self) {
		self.limiter.release(self.client);
	}
}

/// Remembers which servers of a remote datacenter recently failed, so
/// cross-datacenter retries rotate over distinct servers.
#[derive(Default)]
pub struct FailedServers {
	entries: Mutex<HashMap<NodeId, Instant>>,
}

impl FailedServers {
	const COOLDOWN: Duration = Duration::from_secs(30);

	pub fn mark(&self, server: NodeId) {
		self.entries.lock().insert(server, Instant::now());
	}

	pub fn is_cooling(&self, server: &NodeId) -> bool {
		let mut entries = self.entries.lock();
		match entries.get(server) {
			Some(at) if at.elapsed() < Self::COOLDOWN => true,
			Some(_) => {
				entries.remove(server);
				false
			}
			None => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bucket_exhausts_and_refuses() {
		let limiter = RateLimiter::new(Some(10.0), 2);
		assert!(limiter.check().is_ok());
		assert!(limiter.check().is_ok());

		let retry_after = limiter.check().unwrap_err();
		assert!(retry_after > Duration::ZERO);
		assert!(retry_after <= Duration::from_millis(150));
	}

	#[test]
	fn disabled_limiter_always_allows() {
		let limiter = RateLimiter::new(None, 0);
		for _ in 0..1000 {
			assert!(limiter.check().is_ok());
		}
	}

	#[test]
	fn client_cap_is_enforced_and_released() {
		let limiter = ClientLimiter::new(2);
		let client =
			iroh::SecretKey::generate(&mut rand::rng()).public();

		let p1 = limiter.acquire(client).unwrap();
		let _p2 = limiter.acquire(client).unwrap();
		assert!(limiter.acquire(client).is_none());
		assert_eq!(limiter.active(client), 2);

		drop(p1);
		assert_eq!(limiter.active(client), 1);
		assert!(limiter.acquire(client).is_some());
	}
}
