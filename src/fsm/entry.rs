use {
	crate::{
		chain::ConfigEntry,
		consensus::{Index, Membership},
		state::Violation,
		types::{
			AclPolicy,
			AclRole,
			AclTokenId,
			Check,
			CheckId,
			CheckStatus,
			Coordinate,
			Intention,
			KvEntry,
			Node,
			NodeName,
			PreparedQuery,
			Service,
			ServiceId,
			Session,
			SessionId,
			Token,
		},
	},
	serde::{Deserialize, Serialize},
	uuid::Uuid,
};

/// Everything that can be proposed to the replicated log. Exhaustive by
/// design: the FSM matches on every kind and unknown kinds cannot exist.
///
/// Every kind is idempotent under re-apply at the same index, which makes
/// crash recovery a plain snapshot-restore plus log replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntry {
	/// No-op. Appended by a freshly elected leader as its read barrier.
	Barrier,

	/// Atomic registration of a node with its services and checks.
	Register {
		node: Node,
		#[serde(default)]
		services: Vec<Service>,
		#[serde(default)]
		checks: Vec<Check>,
	},

	/// Registration of one service instance on an already known node.
	RegisterService { node: NodeName, service: Service },

	/// Registration of one check on an already known node.
	RegisterCheck { node: NodeName, check: Check },

	/// Node removal; cascades over services, checks, coordinate and
	/// sessions.
	DeregisterNode { node: NodeName },

	DeregisterService {
		node: NodeName,
		service_id: ServiceId,
	},

	DeregisterCheck { node: NodeName, check_id: CheckId },

	/// Health-status transition, audited with the status the proposer
	/// observed before the change.
	CheckStatusUpdate {
		node: NodeName,
		check_id: CheckId,
		from: CheckStatus,
		to: CheckStatus,
		output: String,
	},

	KvSet { entry: KvEntry },

	KvCas { entry: KvEntry, expected: Index },

	KvDelete { key: String },

	KvDeleteCas { key: String, expected: Index },

	KvAcquire { entry: KvEntry, session: SessionId },

	KvRelease { key: String, session: SessionId },

	SessionCreate { session: Session },

	SessionRenew { id: SessionId },

	SessionDestroy { id: SessionId },

	AclTokenUpsert { token: Token },

	AclTokenDelete { id: AclTokenId },

	AclPolicyUpsert { policy: AclPolicy },

	AclPolicyDelete { name: String },

	AclRoleUpsert { role: AclRole },

	AclRoleDelete { name: String },

	ConfigEntryUpsert { entry: ConfigEntry },

	ConfigEntryDelete { kind: String, name: String },

	CoordinateUpdate {
		node: NodeName,
		coordinate: Coordinate,
	},

	PreparedQueryUpsert { query: PreparedQuery },

	PreparedQueryDelete { id: Uuid },

	IntentionUpsert { intention: Intention },

	IntentionDelete { id: Uuid },

	/// Garbage-collects tombstones at or below the given index on every
	/// server.
	TombstoneReap { before: Index },

	/// Voter/replica reconfiguration proposed by the leader's autopilot.
	Autopilot { membership: Membership },
}

/// The result of applying one log entry, delivered to the proposer.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
	/// Applied.
	Ok,

	/// Applied; the operation's boolean verdict (CAS and lock operations).
	Bool(bool),

	/// The transition was rejected as inconsistent. The entry still
	/// occupies its log index; the rejection is deterministic and every
	/// server rejects it identically.
	Rejected(Violation),
}

impl ApplyOutcome {
	/// Collapses the outcome into the operation's success verdict.
	pub fn succeeded(&self) -> bool {
		match self {
			ApplyOutcome::Ok => true,
			ApplyOutcome::Bool(value) => *value,
			ApplyOutcome::Rejected(_) => false,
		}
	}
}
