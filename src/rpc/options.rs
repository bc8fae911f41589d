use {
	crate::consensus::Index,
	core::time::Duration,
	serde::{Deserialize, Serialize},
	uuid::Uuid,
};

/// Options carried by every RPC request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
	/// ACL token secret authenticating the request.
	#[serde(default)]
	pub token: Option<Uuid>,

	/// Target datacenter; empty means the receiving agent's own.
	#[serde(default)]
	pub datacenter: String,

	/// Permit a follower to answer from local state without leader
	/// contact, bounded by `max_stale`.
	#[serde(default)]
	pub allow_stale: bool,

	/// Force the read through the leader's barrier so it reflects every
	/// write the client has observed.
	#[serde(default)]
	pub require_consistent: bool,

	/// Blocking query: hold the response until the backing state passes
	/// this index or the wait expires.
	#[serde(default)]
	pub min_query_index: Option<Index>,

	/// Cap on the blocking wait; clipped into the server's allowed range.
	#[serde(default)]
	pub max_query_time: Option<Duration>,

	/// With `allow_stale`, the maximum acceptable staleness.
	#[serde(default)]
	pub max_stale: Option<Duration>,
}

/// Metadata attached to every RPC response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMeta {
	/// The state index the response reflects; feed it back as
	/// `min_query_index` to block for changes.
	pub index: Index,

	/// Age of the answering server's last leader contact. Zero on the
	/// leader.
	pub last_contact: Duration,

	/// Whether the answering server knew a leader at response time.
	pub known_leader: bool,
}
