use {
	super::options::{QueryMeta, QueryOptions},
	crate::{
		chain::{CompiledChain, ConfigEntry},
		consensus::Index,
		fsm::LogEntry,
		state::{Row, TableId},
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
			ServiceName,
			Session,
			SessionId,
			Token,
		},
	},
	serde::{Deserialize, Serialize},
	std::collections::BTreeMap,
};

/// One RPC request as it travels between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
	pub options: QueryOptions,
	pub payload: RequestPayload,
}

/// One RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
	pub meta: QueryMeta,
	pub payload: Result<ResponsePayload, RpcError>,
}

/// Errors that travel over the wire back to callers. Mirrors the agent
/// error taxonomy, restricted to what a remote caller can act on.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum RpcError {
	/// No leader, or the answering follower was too stale. Retryable.
	#[error("no cluster leader")]
	NoLeader,

	/// Deterministic rejection; never retried.
	#[error("consistency violation: {0}")]
	Consistency(String),

	/// Authentication or authorization failure; never retried.
	#[error("permission denied")]
	PermissionDenied,

	/// Rate or connection limit hit; retry after the hint.
	#[error("rate limit exceeded, retry after {retry_after_ms}ms")]
	QuotaExceeded { retry_after_ms: u64 },

	/// Transport-level failure talking to another server; retryable with
	/// backoff.
	#[error("no servers reachable: {0}")]
	NoServers(String),

	/// The target datacenter is not known to this agent.
	#[error("unknown datacenter {0:?}")]
	UnknownDatacenter(String),
}

/// Every operation of the RPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
	// catalog
	Register {
		node: Node,
		services: Vec<Service>,
		checks: Vec<Check>,
	},
	DeregisterNode {
		node: NodeName,
	},
	DeregisterService {
		node: NodeName,
		service_id: ServiceId,
	},
	DeregisterCheck {
		node: NodeName,
		check_id: CheckId,
	},
	ListNodes,
	ListServices,
	ServiceNodes {
		service: ServiceName,
		tag: Option<String>,
	},
	NodeServices {
		node: NodeName,
	},

	// health
	NodeChecks {
		node: NodeName,
	},
	ServiceHealth {
		service: ServiceName,
		tag: Option<String>,
	},
	UpdateCheck {
		node: NodeName,
		check_id: CheckId,
		from: CheckStatus,
		to: CheckStatus,
		output: String,
	},

	// kv
	KvGet {
		key: String,
	},
	KvList {
		prefix: String,
	},
	KvPut {
		entry: KvEntry,
	},
	KvCas {
		entry: KvEntry,
		expected: Index,
	},
	KvDelete {
		key: String,
	},
	KvDeleteCas {
		key: String,
		expected: Index,
	},
	KvAcquire {
		entry: KvEntry,
		session: SessionId,
	},
	KvRelease {
		key: String,
		session: SessionId,
	},

	// sessions
	SessionCreate {
		session: Session,
	},
	SessionRenew {
		id: SessionId,
	},
	SessionDestroy {
		id: SessionId,
	},
	SessionGet {
		id: SessionId,
	},
	SessionList,

	// acl
	AclTokenUpsert {
		token: Token,
	},
	AclTokenDelete {
		id: AclTokenId,
	},
	AclPolicyUpsert {
		policy: AclPolicy,
	},
	AclPolicyDelete {
		name: String,
	},
	AclRoleUpsert {
		role: AclRole,
	},
	AclRoleDelete {
		name: String,
	},

	// config entries & discovery chain
	ConfigApply {
		entry: ConfigEntry,
	},
	ConfigDelete {
		kind: String,
		name: String,
	},
	ConfigGet {
		kind: String,
		name: String,
	},
	ConfigList {
		kind: String,
	},
	CompileChain {
		service: ServiceName,
	},

	// coordinates
	CoordinateUpdate {
		node: NodeName,
		coordinate: Coordinate,
	},
	CoordinateGet {
		node: NodeName,
	},

	// prepared queries
	PreparedQueryUpsert {
		query: PreparedQuery,
	},
	PreparedQueryDelete {
		id: uuid::Uuid,
	},
	PreparedQueryExecute {
		name_or_id: String,
	},

	// intentions
	IntentionUpsert {
		intention: Intention,
	},
	IntentionDelete {
		id: uuid::Uuid,
	},
	IntentionList,
	IntentionCheck {
		source: ServiceName,
		destination: ServiceName,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
	/// Generic acknowledgement of a write, carrying its commit index.
	Applied { index: Index },

	/// Verdict of a compare-and-set or lock operation.
	Verdict { ok: bool, index: Index },

	Nodes(Vec<Node>),
	Services(BTreeMap<ServiceName, Vec<String>>),
	ServiceNodes(Vec<(Node, Service)>),
	NodeServices(Vec<Service>),
	Checks(Vec<Check>),
	ServiceHealth(Vec<(Node, Service, Vec<Check>)>),
	KvEntry(Option<Row<KvEntry>>),
	KvEntries(Vec<Row<KvEntry>>),
	Session(Option<Row<Session>>),
	Sessions(Vec<Session>),
	SessionId(SessionId),
	ConfigEntry(Option<ConfigEntry>),
	ConfigEntries(Vec<ConfigEntry>),
	Chain(Box<CompiledChain>),
	Coordinate(Option<Coordinate>),
	Intentions(Vec<Intention>),

	/// Verdict of an intention check; `None` when no intention matches
	/// and the default policy applies.
	IntentionVerdict(Option<bool>),
}

/// How the dispatcher must treat a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
	/// Mutates replicated state; must run through the leader's log.
	Write,

	/// Reads replicated state; may be served from a follower under the
	/// stale rules and supports blocking.
	Read,
}

impl RequestPayload {
	pub const fn disposition(&self) -> Disposition {
		use RequestPayload::*;
		match self {
			Register { .. }
			| DeregisterNode { .. }
			| DeregisterService { .. }
			| DeregisterCheck { .. }
			| UpdateCheck { .. }
			| KvPut { .. }
			| KvCas { .. }
			| KvDelete { .. }
			| KvDeleteCas { .. }
			| KvAcquire { .. }
			| KvRelease { .. }
			| SessionCreate { .. }
			| SessionRenew { .. }
			| SessionDestroy { .. }
			| AclTokenUpsert { .. }
			| AclTokenDelete { .. }
			| AclPolicyUpsert { .. }
			| AclPolicyDelete { .. }
			| AclRoleUpsert { .. }
			| AclRoleDelete { .. }
			| ConfigApply { .. }
			| ConfigDelete { .. }
			| CoordinateUpdate { .. }
			| PreparedQueryUpsert { .. }
			| PreparedQueryDelete { .. }
			| IntentionUpsert { .. }
			| IntentionDelete { .. } => Disposition::Write,

			ListNodes
			| ListServices
			| ServiceNodes { .. }
			| NodeServices { .. }
			| NodeChecks { .. }
			| ServiceHealth { .. }
			| KvGet { .. }
			| KvList { .. }
			| SessionGet { .. }
			| SessionList
			| ConfigGet { .. }
			| ConfigList { .. }
			| CompileChain { .. }
			| CoordinateGet { .. }
			| PreparedQueryExecute { .. }
			| IntentionList
			| IntentionCheck { .. } => Disposition::Read,
		}
	}

	/// The state tables a read observes; blocking queries park on these.
	pub const fn watch_tables(&self) -> &'static [TableId] {
		use RequestPayload::*;
		match self {
			ListNodes => &[TableId::Nodes],
			ListServices | ServiceNodes { .. } | NodeServices { .. } => {
				&[TableId::Nodes, TableId::Services]
			}
			NodeChecks { .. } => &[TableId::Checks],
			ServiceHealth { .. } => {
				&[TableId::Nodes, TableId::Services, TableId::Checks]
			}
			KvGet { .. } | KvList { .. } => &[TableId::Kv],
			SessionGet { .. } | SessionList => &[TableId::Sessions],
			ConfigGet { .. } | ConfigList { .. } | CompileChain { .. } => {
				&[TableId::ConfigEntries]
			}
			CoordinateGet { .. } => &[TableId::Coordinates],
			PreparedQueryExecute { .. } => &[
				TableId::PreparedQueries,
				TableId::Nodes,
				TableId::Services,
				TableId::Checks,
			],
			IntentionList | IntentionCheck { .. } => {
				&[TableId::Intentions]
			}
			_ => &[],
		}
	}

	/// Translates a write into its log entry. `None` for reads.
	pub fn to_log_entry(&self) -> Option<LogEntry> {
		use RequestPayload::*;
		Some(match self.clone() {
			Register {
				node,
				services,
				checks,
			} => LogEntry::Register {
				node,
				services,
				checks,
			},
			DeregisterNode { node } => LogEntry::DeregisterNode { node },
			DeregisterService { node, service_id } => {
				LogEntry::DeregisterService { node, service_id }
			}
			DeregisterCheck { node, check_id } => {
				LogEntry::DeregisterCheck { node, check_id }
			}
			UpdateCheck {
				node,
				check_id,
				from,
				to,
				output,
			} => LogEntry::CheckStatusUpdate {
				node,
				check_id,
				from,
				to,
				output,
			},
			KvPut { entry } => LogEntry::KvSet { entry },
			KvCas { entry, expected } => {
				LogEntry::KvCas { entry, expected }
			}
			KvDelete { key } => LogEntry::KvDelete { key },
			KvDeleteCas { key, expected } => {
				LogEntry::KvDeleteCas { key, expected }
			}
			KvAcquire { entry, session } => {
				LogEntry::KvAcquire { entry, session }
			}
			KvRelease { key, session } => {
				LogEntry::KvRelease { key, session }
			}
			SessionCreate { session } => {
				LogEntry::SessionCreate { session }
			}
			SessionRenew { id } => LogEntry::SessionRenew { id },
			SessionDestroy { id } => LogEntry::SessionDestroy { id },
			AclTokenUpsert { token } => LogEntry::AclTokenUpsert { token },
			AclTokenDelete { id } => LogEntry::AclTokenDelete { id },
			AclPolicyUpsert { policy } => {
				LogEntry::AclPolicyUpsert { policy }
			}
			AclPolicyDelete { name } => LogEntry::AclPolicyDelete { name },
			AclRoleUpsert { role } => LogEntry::AclRoleUpsert { role },
			AclRoleDelete { name } => LogEntry::AclRoleDelete { name },
			ConfigApply { entry } => LogEntry::ConfigEntryUpsert { entry },
			ConfigDelete { kind, name } => {
				LogEntry::ConfigEntryDelete { kind, name }
			}
			CoordinateUpdate { node, coordinate } => {
				LogEntry::CoordinateUpdate { node, coordinate }
			}
			PreparedQueryUpsert { query } => {
				LogEntry::PreparedQueryUpsert { query }
			}
			PreparedQueryDelete { id } => {
				LogEntry::PreparedQueryDelete { id }
			}
			IntentionUpsert { intention } => {
				LogEntry::IntentionUpsert { intention }
			}
			IntentionDelete { id } => LogEntry::IntentionDelete { id },
			_ => return None,
		})
	}
}
