use {
	crate::{primitives::ClusterId, transport::Cidr},
	core::time::Duration,
	derive_builder::Builder,
};

/// Gossip wire protocol version. Peers speaking a different version are
/// rejected during join validation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Which pool an instance serves. The LAN pool spans one datacenter
/// (optionally one named segment of it); the WAN pool spans the servers of
/// all federated datacenters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolScope {
	Lan { segment: String },
	Wan,
}

impl PoolScope {
	/// ALPN identifier for this pool's streams. Segmented LAN pools get
	/// their own protocol id so segments stay isolated.
	pub fn alpn(&self) -> Vec<u8> {
		match self {
			PoolScope::Lan { segment } if segment.is_empty() => {
				b"/meridian/gossip/lan/1".to_vec()
			}
			PoolScope::Lan { segment } => {
				format!("/meridian/gossip/lan/{segment}/1").into_bytes()
			}
			PoolScope::Wan => b"/meridian/gossip/wan/1".to_vec(),
		}
	}
}

/// Tunables of one gossip pool.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// The cluster this pool belongs to. Derived from the cluster name;
	/// doubles as join validation.
	pub cluster: ClusterId,

	/// LAN (per-datacenter, per-segment) or WAN (server-only).
	pub scope: PoolScope,

	/// Probe cadence: one random peer is probed per tick.
	#[builder(default = "Duration::from_millis(1000)")]
	pub gossip_interval: Duration,

	/// Budget for one direct probe round-trip.
	#[builder(default = "Duration::from_millis(500)")]
	pub probe_timeout: Duration,

	/// Peers asked to probe indirectly when the direct probe fails.
	#[builder(default = "3")]
	pub gossip_nodes: usize,

	/// Multiplier on the suspicion window. The effective window is
	/// `suspicion_mult · log10(n + 1) · gossip_interval`.
	#[builder(default = "4")]
	pub suspicion_mult: u32,

	/// Multiplier on broadcast retransmissions. Each rumor is piggybacked
	/// `retransmit_mult · log10(n + 1)` times.
	#[builder(default = "4")]
	pub retransmit_mult: u32,

	/// Full state exchange cadence.
	#[builder(default = "Duration::from_secs(30)")]
	pub push_pull_interval: Duration,

	/// Bound on the piggyback queue; overflow drops the most-transmitted
	/// rumors first and counts the drops.
	#[builder(default = "1024")]
	pub max_queued_broadcasts: usize,

	/// Maximum size of one opaque user broadcast payload.
	#[builder(default = "512")]
	pub max_user_payload: usize,

	/// Source addresses permitted to join this pool. Empty allows all.
	#[builder(default)]
	pub allowed_cidrs: Vec<Cidr>,
}

impl Config {
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}

	/// The suspicion window for the given cluster size.
	pub fn suspicion_window(&self, cluster_size: usize) -> Duration {
		let scale = log_factor(cluster_size);
		self
			.gossip_interval
			.mul_f64(f64::from(self.suspicion_mult) * scale)
	}

	/// How many times a rumor is retransmitted for the given cluster size.
	pub fn retransmit_limit(&self, cluster_size: usize) -> usize {
		(f64::from(self.retransmit_mult) * log_factor(cluster_size)).ceil()
			as usize
	}
}

/// `log10(n + 1)`, floored at 1 so tiny clusters still gossip.
fn log_factor(cluster_size: usize) -> f64 {
	((cluster_size + 1) as f64).log10().max(1.0)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> Config {
		Config::builder()
			.with_cluster(ClusterId::from("test"))
			.with_scope(PoolScope::Lan {
				segment: String::new(),
			})
			.build()
			.unwrap()
	}

	#[test]
	fn windows_scale_with_cluster_size() {
		let config = config();

		let small = config.suspicion_window(3);
		let large = config.suspicion_window(1000);
		assert!(large > small);

		// retransmissions grow with log10 of the cluster size
		assert_eq!(config.retransmit_limit(9), 4);
		assert!(config.retransmit_limit(1000) > config.retransmit_limit(9));
	}

	#[test]
	fn segment_pools_have_distinct_alpns() {
		let default = PoolScope::Lan {
			segment: String::new(),
		};
		let alpha = PoolScope::Lan {
			segment: "alpha".to_string(),
		};
		assert_ne!(default.alpn(), alpha.alpn());
		assert_ne!(alpha.alpn(), PoolScope::Wan.alpn());
	}
}
