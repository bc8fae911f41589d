use {
	super::{
		events::Events,
		member::{Member, MemberState},
	},
	crate::types::NodeId,
	im::OrdMap,
	parking_lot::RwLock,
	rand::seq::SliceRandom,
	std::sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	tokio::sync::broadcast,
};

/// The membership view of one gossip pool.
///
/// Notes:
///
/// - Cheap to clone; all clones refer to the same underlying roster.
///
/// - Thread-safe; every read works on the most recent snapshot, and
///   `members()` hands out an immutable snapshot iterator.
///
/// - Emits [`Event`]s when merges change a member's state, consumable
///   through the coalescing [`Events`] stream from [`Roster::watch`].
pub struct Roster {
	inner: Arc<Inner>,
}

impl Clone for Roster {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

struct Inner {
	local: NodeId,
	map: RwLock<OrdMap<NodeId, Member>>,
	events: broadcast::Sender<Event>,
	bogus: AtomicU64,
}

/// Emitted when the roster's view of a member changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	/// A new member appeared alive.
	Joined(Member),

	/// An existing member's claim changed without dying (refutation,
	/// suspicion, metadata update).
	Updated(Member),

	/// A member's suspicion window expired.
	Failed(Member),

	/// A member departed gracefully.
	Left(Member),

	/// The event stream lagged and individual updates were lost; the
	/// consumer should re-read the roster.
	Resync,
}

/// What a merge did with an incoming claim.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
	/// The claim was accepted into the roster.
	Accepted,

	/// The claim was older than or equal to what we already know.
	Ignored,

	/// The claim declares the local node suspect or dead; the pool must
	/// refute it by re-asserting itself at a higher incarnation.
	SelfRefute,
}

impl Roster {
	pub fn new(local: Member) -> Self {
		let (events, _) = broadcast::channel(128);
		let mut map = OrdMap::new();
		let local_id = local.node;
		map.insert(local_id, local);

		Self {
			inner: Arc::new(Inner {
				local: local_id,
				map: RwLock::new(map),
				events,
				bogus: AtomicU64::new(0),
			}),
		}
	}

	/// Merges an incoming membership claim under the gossip rules.
	pub fn apply(&self, incoming: Member) -> Applied {
		if incoming.node == self.inner.local
			&& incoming.state != MemberState::Alive
		{
			// someone claims we are suspect/failed/left; the pool refutes
			// by bumping our incarnation
			return Applied::SelfRefute;
		}

		let mut map = self.inner.map.write();
		let event = match map.get(&incoming.node) {
			Some(known) if !incoming.supersedes(known) => {
				return Applied::Ignored;
			}
			Some(known) => match (known.state, incoming.state) {
				(_, MemberState::Failed) => Event::Failed(incoming.clone()),
				(_, MemberState::Left) => Event::Left(incoming.clone()),
				(MemberState::Failed | MemberState::Left, MemberState::Alive) => {
					// came back with a higher incarnation
					Event::Joined(incoming.clone())
				}
				_ => Event::Updated(incoming.clone()),
			},
			None => match incoming.state {
				MemberState::Alive | MemberState::Suspect => {
					Event::Joined(incoming.clone())
				}
				MemberState::Failed => Event::Failed(incoming.clone()),
				MemberState::Left => Event::Left(incoming.clone()),
			},
		};

		map.insert(incoming.node, incoming);
		drop(map);

		let _ = self.inner.events.send(event);
		Applied::Accepted
	}

	/// The local node's id.
	pub const fn local_id(&self) -> NodeId {
		self.inner.local
	}

	/// The local node's current member record.
	pub fn local(&self) -> Member {
		self
			.inner
			.map
			.read()
			.get(&self.inner.local)
			.cloned()
			.expect("local member is always present")
	}

	/// Replaces the local member record (incarnation bumps, role or
	/// address changes) and emits an update event.
	pub(super) fn set_local(&self, member: Member) {
		debug_assert_eq!(member.node, self.inner.local);
		self.inner.map.write().insert(member.node, member.clone());
		let _ = self.inner.events.send(Event::Updated(member));
	}

	pub fn get(&self, node: &NodeId) -> Option<Member> {
		self.inner.map.read().get(node).cloned()
	}

	/// Snapshot of all members, self included.
	pub fn members(&self) -> Vec<Member> {
		self.inner.map.read().values().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.inner.map.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Members that answer probes (alive or suspect), excluding self.
	pub fn reachable(&self) -> Vec<Member> {
		self
			.inner
			.map
			.read()
			.values()
			.filter(|m| m.node != self.inner.local && m.is_reachable())
			.cloned()
			.collect()
	}

	/// Up to `n` random reachable members, excluding self and `exclude`.
	pub fn random_reachable(
		&self,
		n: usize,
		exclude: &[NodeId],
	) -> Vec<Member> {
		let mut candidates: Vec<Member> = self
			.reachable()
			.into_iter()
			.filter(|m| !exclude.contains(&m.node))
			.collect();
		candidates.shuffle(&mut rand::rng());
		candidates.truncate(n);
		candidates
	}

	/// Subscribes to roster change events, coalesced per member.
	pub fn watch(&self) -> Events {
		Events::new(self.inner.events.subscribe())
	}

	/// Records a discarded bogus frame.
	pub(super) fn count_bogus(&self) {
		self.inner.bogus.fetch_add(1, Ordering::Relaxed);
	}

	/// Bogus frames discarded since start.
	pub fn bogus_frames(&self) -> u64 {
		self.inner.bogus.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use {super::*, crate::gossip::member::MemberRole, uuid::Uuid};

	fn member(node: NodeId, incarnation: u64, state: MemberState) -> Member {
		Member {
			node,
			name: format!("node-{node}"),
			datacenter: "dc1".to_string(),
			segment: String::new(),
			role: MemberRole::Client,
			address: iroh::EndpointAddr::new(
				iroh::SecretKey::generate(&mut rand::rng()).public(),
			),
			incarnation,
			state,
		}
	}

	fn roster() -> Roster {
		Roster::new(member(Uuid::new_v4(), 1, MemberState::Alive))
	}

	#[test]
	fn stale_claims_are_ignored() {
		let roster = roster();
		let node = Uuid::new_v4();

		assert_eq!(
			roster.apply(member(node, 2, MemberState::Alive)),
			Applied::Accepted
		);
		assert_eq!(
			roster.apply(member(node, 1, MemberState::Failed)),
			Applied::Ignored
		);
		assert_eq!(
			roster.get(&node).unwrap().state,
			MemberState::Alive
		);
	}

	#[test]
	fn suspicion_of_self_requests_refutation() {
		let roster = roster();
		let mut claim = roster.local();
		claim.state = MemberState::Suspect;

		assert_eq!(roster.apply(claim), Applied::SelfRefute);
		// the roster itself is unchanged
		assert_eq!(roster.local().state, MemberState::Alive);
	}

	#[test]
	fn failed_member_rejoins_with_higher_incarnation() {
		let roster = roster();
		let node = Uuid::new_v4();

		roster.apply(member(node, 1, MemberState::Alive));
		roster.apply(member(node, 1, MemberState::Failed));
		assert_eq!(roster.get(&node).unwrap().state, MemberState::Failed);

		// same incarnation cannot resurrect
		assert_eq!(
			roster.apply(member(node, 1, MemberState::Alive)),
			Applied::Ignored
		);

		// a higher incarnation can
		assert_eq!(
			roster.apply(member(node, 2, MemberState::Alive)),
			Applied::Accepted
		);
		assert_eq!(roster.get(&node).unwrap().state, MemberState::Alive);
	}

	#[test]
	fn random_reachable_excludes_failed_and_self() {
		let roster = roster();
		let alive = Uuid::new_v4();
		let failed = Uuid::new_v4();

		roster.apply(member(alive, 1, MemberState::Alive));
		roster.apply(member(failed, 1, MemberState::Failed));

		let picked = roster.random_reachable(8, &[]);
		assert_eq!(picked.len(), 1);
		assert_eq!(picked[0].node, alive);
	}
}
