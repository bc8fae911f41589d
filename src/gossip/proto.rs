use {
	super::{config::PROTOCOL_VERSION, member::Member},
	crate::primitives::ClusterId,
	bytes::Bytes,
	serde::{Deserialize, Serialize},
};

/// Every gossip frame is wrapped in an envelope carrying the cluster id
/// and protocol version. Frames failing validation are dropped and
/// counted; they never reach the membership logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	pub cluster: ClusterId,
	pub protocol: u16,
	pub message: GossipMessage,
}

impl Envelope {
	pub fn new(cluster: ClusterId, message: GossipMessage) -> Self {
		Self {
			cluster,
			protocol: PROTOCOL_VERSION,
			message,
		}
	}

	/// Join validation: cluster digest and protocol version must match.
	pub fn validate(&self, cluster: &ClusterId) -> Result<(), Bogus> {
		if self.protocol != PROTOCOL_VERSION {
			return Err(Bogus::ProtocolVersion(self.protocol));
		}
		if self.cluster != *cluster {
			return Err(Bogus::ClusterMismatch);
		}
		Ok(())
	}
}

/// Reasons an incoming frame is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Bogus {
	#[error("protocol version {0} not supported")]
	ProtocolVersion(u16),

	#[error("cluster name mismatch")]
	ClusterMismatch,

	#[error("source address not permitted")]
	CidrDenied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
	/// Direct probe. The prober introduces itself so one-way knowledge
	/// still converges, and piggybacks queued rumors.
	Ping {
		seq: u64,
		from: Member,
		rumors: Vec<Rumor>,
	},

	/// Probe answer, piggybacking the responder's queued rumors.
	Ack { seq: u64, rumors: Vec<Rumor> },

	/// Indirect probe request: asks the receiver to ping `target` on the
	/// sender's behalf and relay whether it answered.
	PingReq {
		seq: u64,
		from: Member,
		target: Member,
	},

	/// Outcome of an indirect probe.
	PingReqAck { seq: u64, reached: bool },

	/// Full state exchange. Sent by the initiator with its complete
	/// member list; the receiver merges and answers with its own.
	PushPull { members: Vec<Member> },
}

/// A piece of gossip piggybacked on probe traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Rumor {
	/// A membership claim (alive/suspect/failed/left at an incarnation).
	Member(Member),

	/// An opaque user broadcast (leader hints, event payloads). Bounded
	/// in size by pool configuration.
	User(Bytes),
}

impl Rumor {
	/// Rumors about the same subject invalidate each other in the queue;
	/// the key identifies the subject.
	pub fn invalidation_key(&self) -> Option<crate::types::NodeId> {
		match self {
			Rumor::Member(member) => Some(member.node),
			Rumor::User(_) => None,
		}
	}
}
