use {
	super::proto::Rumor,
	std::sync::atomic::{AtomicU64, Ordering},
};

/// The bounded piggyback queue.
///
/// Rumors ride on probe traffic until they have been retransmitted
/// `retransmit_mult · log10(n + 1)` times. Selection prefers the
/// least-transmitted rumors so fresh information spreads first. A new
/// membership rumor about a node invalidates any queued one about the same
/// node. On overflow the most-transmitted entries are dropped and counted.
pub struct Broadcasts {
	queue: Vec<Queued>,
	max_queue: usize,
	dropped: AtomicU64,
}

struct Queued {
	rumor: Rumor,
	transmits: usize,
}

impl Broadcasts {
	pub fn new(max_queue: usize) -> Self {
		Self {
			queue: Vec::new(),
			max_queue,
			dropped: AtomicU64::new(0),
		}
	}

	/// Enqueues a rumor for piggybacking.
	pub fn enqueue(&mut self, rumor: Rumor) {
		if let Some(key) = rumor.invalidation_key() {
			self.queue.retain(|queued| {
				queued.rumor.invalidation_key() != Some(key)
			});
		}

		if self.queue.len() >= self.max_queue {
			// drop the entry closest to retiring anyway
			if let Some((worst, _)) = self
				.queue
				.iter()
				.enumerate()
				.max_by_key(|(_, queued)| queued.transmits)
			{
				self.queue.swap_remove(worst);
				self.dropped.fetch_add(1, Ordering::Relaxed);
			}
		}

		self.queue.push(Queued {
			rumor,
			transmits: 0,
		});
	}

	/// Takes up to `limit` rumors to piggyback on one frame, preferring
	/// the least transmitted, and retires rumors that have reached the
	/// retransmit budget for the current cluster size.
	pub fn take(
		&mut self,
		limit: usize,
		retransmit_limit: usize,
	) -> Vec<Rumor> {
		self
			.queue
			.sort_by_key(|queued| queued.transmits);

		let mut picked = Vec::new();
		for queued in self.queue.iter_mut().take(limit) {
			picked.push(queued.rumor.clone());
			queued.transmits += 1;
		}

		self
			.queue
			.retain(|queued| queued.transmits < retransmit_limit.max(1));

		picked
	}

	/// Whether any rumor is still waiting to be spread. Used by graceful
	/// leave to flush the departure rumor before shutting down.
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}

	/// Rumors dropped due to queue overflow since start.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::gossip::{Member, MemberRole, MemberState},
		bytes::Bytes,
		uuid::Uuid,
	};

	fn member_rumor(node: Uuid, incarnation: u64) -> Rumor {
		Rumor::Member(Member {
			node,
			name: "m".to_string(),
			datacenter: "dc1".to_string(),
			segment: String::new(),
			role: MemberRole::Client,
			address: iroh::EndpointAddr::new(
				iroh::SecretKey::generate(&mut rand::rng()).public(),
			),
			incarnation,
			state: MemberState::Alive,
		})
	}

	#[test]
	fn fresh_rumors_spread_first() {
		let mut broadcasts = Broadcasts::new(16);
		broadcasts.enqueue(member_rumor(Uuid::new_v4(), 1));

		// transmit the first rumor a few times
		for _ in 0..3 {
			assert_eq!(broadcasts.take(8, 10).len(), 1);
		}

		let fresh = Uuid::new_v4();
		broadcasts.enqueue(member_rumor(fresh, 1));

		let picked = broadcasts.take(1, 10);
		match &picked[0] {
			Rumor::Member(member) => assert_eq!(member.node, fresh),
			Rumor::User(_) => panic!("unexpected rumor kind"),
		}
	}

	#[test]
	fn rumors_retire_after_budget() {
		let mut broadcasts = Broadcasts::new(16);
		broadcasts.enqueue(member_rumor(Uuid::new_v4(), 1));

		assert_eq!(broadcasts.take(8, 2).len(), 1);
		assert_eq!(broadcasts.take(8, 2).len(), 1);
		// budget of 2 reached; the rumor is retired
		assert_eq!(broadcasts.take(8, 2).len(), 0);
		assert!(broadcasts.is_empty());
	}

	#[test]
	fn newer_membership_rumor_invalidates_older() {
		let node = Uuid::new_v4();
		let mut broadcasts = Broadcasts::new(16);
		broadcasts.enqueue(member_rumor(node, 1));
		broadcasts.enqueue(member_rumor(node, 2));

		assert_eq!(broadcasts.len(), 1);
		match &broadcasts.take(8, 10)[0] {
			Rumor::Member(member) => assert_eq!(member.incarnation, 2),
			Rumor::User(_) => panic!("unexpected rumor kind"),
		}
	}

	#[test]
	fn overflow_drops_and_counts() {
		let mut broadcasts = Broadcasts::new(2);
		broadcasts.enqueue(Rumor::User(Bytes::from_static(b"a")));
		broadcasts.enqueue(Rumor::User(Bytes::from_static(b"b")));
		broadcasts.enqueue(Rumor::User(Bytes::from_static(b"c")));

		assert_eq!(broadcasts.len(), 2);
		assert_eq!(broadcasts.dropped(), 1);
	}
}
