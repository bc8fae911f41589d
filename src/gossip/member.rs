use {
	crate::types::{NodeId, NodeName, Segment},
	iroh::EndpointAddr,
	serde::{Deserialize, Serialize},
	strum::Display,
};

/// Liveness states a member moves through. `Left` is terminal for an
/// incarnation: a node that left on purpose can only come back by
/// re-joining with a higher incarnation.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum MemberState {
	Alive,
	Suspect,
	Failed,
	Left,
}

/// What the member does in the cluster.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum MemberRole {
	Client,
	Server,

	/// A server that receives the replicated log but never votes.
	Replica,
}

/// One member of a gossip pool as this node currently sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
	pub node: NodeId,
	pub name: NodeName,
	pub datacenter: String,
	pub segment: Segment,
	pub role: MemberRole,
	pub address: EndpointAddr,

	/// The member's own monotonically increasing liveness generation.
	/// Only the member itself bumps it, by refuting suspicion or by
	/// re-joining.
	pub incarnation: u64,

	pub state: MemberState,
}

impl Member {
	pub const fn is_server(&self) -> bool {
		matches!(self.role, MemberRole::Server | MemberRole::Replica)
	}

	pub const fn is_reachable(&self) -> bool {
		matches!(self.state, MemberState::Alive | MemberState::Suspect)
	}

	/// Whether this view of the member supersedes `other` under the
	/// gossip merge rules: a higher incarnation always wins; within an
	/// incarnation the more severe state wins.
	pub fn supersedes(&self, other: &Member) -> bool {
		if self.incarnation != other.incarnation {
			return self.incarnation > other.incarnation;
		}
		if self.state != other.state {
			return self.state > other.state;
		}
		// same incarnation, same state: refreshed metadata (address,
		// role) is taken from the newer claim
		self != other
	}
}

#[cfg(test)]
mod tests {
	use {super::*, uuid::Uuid};

	fn member(incarnation: u64, state: MemberState) -> Member {
		Member {
			node: Uuid::nil(),
			name: "n1".to_string(),
			datacenter: "dc1".to_string(),
			segment: String::new(),
			role: MemberRole::Client,
			address: EndpointAddr::new(
				iroh::SecretKey::generate(&mut rand::rng()).public(),
			),
			incarnation,
			state,
		}
	}

	#[test]
	fn higher_incarnation_wins() {
		let alive2 = member(2, MemberState::Alive);
		let failed1 = member(1, MemberState::Failed);

		// a refutation (alive at a higher incarnation) overrides failure
		assert!(alive2.supersedes(&failed1));
		assert!(!failed1.supersedes(&alive2));
	}

	#[test]
	fn severity_breaks_incarnation_ties() {
		let alive = member(3, MemberState::Alive);
		let suspect = member(3, MemberState::Suspect);
		let failed = member(3, MemberState::Failed);
		let left = member(3, MemberState::Left);

		assert!(suspect.supersedes(&alive));
		assert!(failed.supersedes(&suspect));
		assert!(left.supersedes(&failed));
		assert!(!alive.supersedes(&left));
	}
}
