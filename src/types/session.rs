use {
	super::{check::CheckId, node::NodeName},
	core::time::Duration,
	serde::{Deserialize, Serialize},
	uuid::Uuid,
};

/// Session identity, assigned by the leader at creation time.
pub type SessionId = Uuid;

/// What happens to the KV entries a session holds locks on when the session
/// is invalidated.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
	/// Locks are released; the values stay.
	#[default]
	Release,

	/// The locked entries are deleted together with the locks.
	Delete,
}

/// A lease-like entity owning locks on KV entries.
///
/// A session is invalidated when its TTL lapses without renewal, when its
/// node is deregistered, or when any of its associated checks goes
/// critical. Invalidation fires [`SessionBehavior`] over all held locks
/// atomically in a single log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
	pub id: SessionId,
	pub node: NodeName,

	/// Expiry budget. Renewal restarts it. `None` means the session lives
	/// until explicitly destroyed or its node/checks invalidate it.
	#[serde(default)]
	pub ttl: Option<Duration>,

	#[serde(default)]
	pub behavior: SessionBehavior,

	/// Checks whose health gates this session; any of them going critical
	/// invalidates it.
	#[serde(default)]
	pub checks: Vec<CheckId>,

	/// After a lock held by this session is released through invalidation,
	/// re-acquisition of that lock is refused until the delay elapses.
	#[serde(default)]
	pub lock_delay: Duration,
}

/// Bounds applied to requested session TTLs.
pub const SESSION_TTL_MIN: Duration = Duration::from_secs(10);
pub const SESSION_TTL_MAX: Duration = Duration::from_secs(86400);

impl Session {
	/// Clamps a requested TTL into the supported range.
	pub fn clamp_ttl(requested: Duration) -> Duration {
		requested.clamp(SESSION_TTL_MIN, SESSION_TTL_MAX)
	}
}
