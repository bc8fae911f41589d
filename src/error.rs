use crate::rpc::RpcError;

/// The agent error taxonomy.
///
/// Retry policy: only `TransientNetwork` and `NoLeader` are retried (with
/// backoff and a budget). `ConsistencyViolation` is always surfaced to the
/// caller untouched. `Fatal` drains the supervisor and exits the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Configuration failed validation; fatal before supervisor start.
	#[error("config error: {0}")]
	Config(String),

	/// Connection reset, timeout, lookup failure. Retried with backoff
	/// and surfaced as "no servers reachable" once the budget is spent.
	#[error("transient network error: {0}")]
	TransientNetwork(String),

	/// The cluster has no leader, or the answering server was too stale.
	#[error("no cluster leader")]
	NoLeader,

	/// CAS index mismatch, unknown session, ACL denial, invalid log
	/// entry. Deterministic; never retried.
	#[error("consistency violation: {0}")]
	ConsistencyViolation(String),

	/// Rate or connection limit; carries a retry-after hint.
	#[error("quota exceeded, retry after {retry_after_ms}ms")]
	QuotaExceeded { retry_after_ms: u64 },

	/// Data-dir corruption, duplicate node id, encryption key mismatch,
	/// FSM apply failure. The supervisor drains and the process exits
	/// non-zero.
	#[error("fatal: {0}")]
	Fatal(String),
}

impl Error {
	/// Whether a local retry is appropriate for this error kind.
	pub const fn is_retryable(&self) -> bool {
		matches!(self, Error::TransientNetwork(_) | Error::NoLeader)
	}
}

impl From<RpcError> for Error {
	fn from(e: RpcError) -> Self {
		match e {
			RpcError::NoLeader => Error::NoLeader,
			RpcError::Consistency(msg) => Error::ConsistencyViolation(msg),
			RpcError::PermissionDenied => {
				Error::ConsistencyViolation("permission denied".to_string())
			}
			RpcError::QuotaExceeded { retry_after_ms } => {
				Error::QuotaExceeded { retry_after_ms }
			}
			RpcError::NoServers(msg) => Error::TransientNetwork(msg),
			RpcError::UnknownDatacenter(dc) => {
				Error::ConsistencyViolation(format!(
					"unknown datacenter {dc:?}"
				))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retry_policy_follows_taxonomy() {
		assert!(Error::TransientNetwork("reset".into()).is_retryable());
		assert!(Error::NoLeader.is_retryable());
		assert!(!Error::ConsistencyViolation("cas".into()).is_retryable());
		assert!(!Error::QuotaExceeded { retry_after_ms: 5 }.is_retryable());
		assert!(!Error::Fatal("corrupt".into()).is_retryable());
		assert!(!Error::Config("bad".into()).is_retryable());
	}
}
