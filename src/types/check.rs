use {
	super::service::ServiceId,
	core::time::Duration,
	serde::{Deserialize, Serialize},
	strum::{Display, EnumString},
};

/// Identifies one health check on one node.
pub type CheckId = String;

/// Health check status. Transitions happen only through committed FSM
/// entries; the agent-local check runners feed observed statuses into the
/// anti-entropy syncer which proposes the transition.
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
	EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CheckStatus {
	Passing,
	Warning,
	Critical,
	Maintenance,
}

/// One health check registered against a node, optionally scoped to a
/// service instance on that node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
	pub id: CheckId,
	pub name: String,
	pub status: CheckStatus,

	#[serde(default)]
	pub notes: String,

	/// Output of the most recent execution, truncated by the agent to its
	/// configured maximum before it is synced.
	#[serde(default)]
	pub output: String,

	/// When set, the check belongs to this service instance and failing it
	/// affects only that instance's health.
	#[serde(default)]
	pub service_id: Option<ServiceId>,

	/// How the check is executed. `None` for checks whose lifecycle is
	/// driven entirely by external updates.
	#[serde(default)]
	pub definition: Option<CheckDefinition>,

	/// Deregister the whole service once the check has been critical for at
	/// least this long. Enforced by the leader's reaper.
	#[serde(default)]
	pub deregister_critical_after: Option<Duration>,
}

/// How a check is executed by the agent. The variants share only the common
/// prefix carried by [`Check`] itself; everything else is kind-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CheckDefinition {
	/// The check is passing as long as the owner keeps renewing it within
	/// the TTL; it turns critical when the TTL lapses.
	Ttl { ttl: Duration },

	/// Periodic HTTP probe. 2xx is passing, 429 is warning, anything else
	/// is critical.
	Http {
		url: String,
		interval: Duration,
		timeout: Duration,
		#[serde(default)]
		method: Option<String>,
	},

	/// Periodic TCP connect probe.
	Tcp {
		address: String,
		interval: Duration,
		timeout: Duration,
	},

	/// Periodic gRPC health-protocol probe.
	Grpc {
		endpoint: String,
		interval: Duration,
		timeout: Duration,
	},

	/// Mirrors the worst status of another service's checks on this node.
	Alias { service_id: ServiceId },
}

impl Check {
	/// The initial status for a freshly registered check of this kind.
	/// TTL checks start critical until their first renewal; probe checks
	/// start critical until their first successful round.
	pub fn initial_status(definition: Option<&CheckDefinition>) -> CheckStatus {
		match definition {
			None => CheckStatus::Passing,
			Some(_) => CheckStatus::Critical,
		}
	}

	/// Returns the worst of two statuses, used when aggregating the health
	/// of a service across its checks.
	pub fn worst(a: CheckStatus, b: CheckStatus) -> CheckStatus {
		a.max(b)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_ordering_matches_severity() {
		use CheckStatus::*;
		assert!(Passing < Warning);
		assert!(Warning < Critical);
		assert!(Critical < Maintenance);
		assert_eq!(Check::worst(Passing, Critical), Critical);
		assert_eq!(Check::worst(Warning, Passing), Warning);
	}

	#[test]
	fn initial_status() {
		assert_eq!(Check::initial_status(None), CheckStatus::Passing);
		assert_eq!(
			Check::initial_status(Some(&CheckDefinition::Ttl {
				ttl: Duration::from_secs(10)
			})),
			CheckStatus::Critical
		);
	}
}
