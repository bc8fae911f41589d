//! Agent configuration: raw layer, source merging, loading and
//! validation into the typed [`RuntimeConfig`] consumed by every
//! component.

mod load;
mod merge;
mod raw;
mod validate;

pub use {
	load::{INTRO_TOKEN_ENV, Source, parse_duration, parse_kv},
	merge::{MergeRule, merge},
	raw::RawConfig,
	validate::build,
};

use {
	crate::{
		endpoints::DownPolicy,
		transport::Cidr,
	},
	core::{net::IpAddr, str::FromStr, time::Duration},
	iroh::{EndpointAddr, EndpointId, TransportAddr},
	std::{collections::BTreeMap, path::PathBuf},
	uuid::Uuid,
};

/// The fully resolved agent configuration. Everything is typed, defaulted
/// and validated; components consume this and never the raw layer.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
	pub datacenter: String,
	pub primary_datacenter: String,
	pub node_name: String,
	pub dev_mode: bool,
	pub data_dir: Option<PathBuf>,

	pub server_mode: bool,
	pub read_replica: bool,
	pub bootstrap: bool,
	pub bootstrap_expect: usize,

	pub bind_addr: Option<IpAddr>,
	pub ports: Ports,

	pub segment: String,
	pub segments: Vec<String>,

	pub node_meta: BTreeMap<String, String>,
	pub encrypt_key: Option<[u8; 32]>,

	pub retry_join: Vec<JoinTarget>,
	pub retry_join_wan: Vec<JoinTarget>,
	pub retry_interval: Duration,

	pub gossip_lan: GossipTunables,
	pub gossip_wan: GossipTunables,

	pub raft_multiplier: u32,
	pub leave_drain_time: Duration,
	pub rpc_hold_timeout: Duration,

	pub limits: Limits,
	pub autopilot: Autopilot,
	pub acl: AclSettings,
	pub dns: DnsSettings,
	pub auto_encrypt: AutoEncrypt,
	pub auto_config: AutoConfig,
	pub ui: UiSettings,

	pub check_output_max_size: usize,
	pub enable_script_checks: bool,
	pub sync_interval: Duration,
}

/// Listener ports. `None` means the listener is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ports {
	pub dns: Option<u16>,
	pub http: Option<u16>,
	pub https: Option<u16>,
	pub grpc: Option<u16>,
	pub server: Option<u16>,
	pub serf_lan: Option<u16>,
	pub serf_wan: Option<u16>,
}

/// One join target: a peer identity plus its socket addresses, written
/// `<endpoint-id>@<ip:port>[,<ip:port>...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTarget {
	pub id: EndpointId,
	pub addrs: Vec<core::net::SocketAddr>,
}

impl JoinTarget {
	pub fn endpoint_addr(&self) -> EndpointAddr {
		EndpointAddr::new(self.id).with_addrs(
			self.addrs.iter().map(|a| TransportAddr::Ip(*a)),
		)
	}
}

impl FromStr for JoinTarget {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (id, addrs) = s
			.split_once('@')
			.ok_or_else(|| format!("join target {s:?} is missing '@'"))?;

		let id = EndpointId::from_str(id.trim())
			.map_err(|e| format!("join target {s:?}: bad id: {e}"))?;

		let addrs = addrs
			.split(',')
			.map(|addr| {
				addr.trim().parse().map_err(|e| {
					format!("join target {s:?}: bad address: {e}")
				})
			})
			.collect::<Result<Vec<_>, _>>()?;

		if addrs.is_empty() {
			return Err(format!("join target {s:?} has no addresses"));
		}

		Ok(Self { id, addrs })
	}
}

#[derive(Debug, Clone)]
pub struct GossipTunables {
	pub gossip_interval: Duration,
	pub probe_timeout: Duration,
	pub gossip_nodes: usize,
	pub suspicion_mult: u32,
	pub retransmit_mult: u32,
	pub push_pull_interval: Duration,
	pub allowed_cidrs: Vec<Cidr>,
}

impl GossipTunables {
	/// LAN profile: tight timing inside one datacenter.
	pub fn lan() -> Self {
		Self {
			gossip_interval: Duration::from_millis(1000),
			probe_timeout: Duration::from_millis(500),
			gossip_nodes: 3,
			suspicion_mult: 4,
			retransmit_mult: 4,
			push_pull_interval: Duration::from_secs(30),
			allowed_cidrs: Vec::new(),
		}
	}

	/// WAN profile: relaxed timing across datacenters.
	pub fn wan() -> Self {
		Self {
			gossip_interval: Duration::from_millis(2000),
			probe_timeout: Duration::from_secs(3),
			gossip_nodes: 4,
			suspicion_mult: 6,
			retransmit_mult: 4,
			push_pull_interval: Duration::from_secs(60),
			allowed_cidrs: Vec::new(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Limits {
	pub rpc_rate: Option<f64>,
	pub rpc_max_burst: usize,
	pub rpc_max_conns_per_client: usize,
	pub http_max_conns_per_client: usize,
	pub kv_max_value_size: usize,
	pub txn_max_req_len: usize,
	pub https_handshake_timeout: Duration,
	pub rpc_handshake_timeout: Duration,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			rpc_rate: None,
			rpc_max_burst: 1000,
			rpc_max_conns_per_client: 100,
			http_max_conns_per_client: 200,
			kv_max_value_size: 512 * 1024,
			txn_max_req_len: 512 * 1024,
			https_handshake_timeout: Duration::from_secs(5),
			rpc_handshake_timeout: Duration::from_secs(5),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Autopilot {
	pub cleanup_dead_servers: bool,
	pub last_contact_threshold: Duration,
	pub max_trailing_logs: u64,
	pub min_quorum: usize,
	pub server_stabilization_time: Duration,
	pub disable_upgrade_migration: bool,
	pub redundancy_zone_tag: String,
	pub upgrade_version_tag: String,
}

impl Default for Autopilot {
	fn default() -> Self {
		Self {
			cleanup_dead_servers: true,
			last_contact_threshold: Duration::from_millis(200),
			max_trailing_logs: 250,
			min_quorum: 0,
			server_stabilization_time: Duration::from_secs(10),
			disable_upgrade_migration: false,
			redundancy_zone_tag: String::new(),
			upgrade_version_tag: String::new(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct AclSettings {
	pub enabled: bool,
	pub default_allow: bool,
	pub down_policy: DownPolicy,
	pub token_ttl: Duration,
	pub policy_ttl: Duration,
	pub role_ttl: Duration,
	pub initial_management_token: Option<Uuid>,
	pub agent_token: Option<Uuid>,
	pub default_token: Option<Uuid>,
}

impl Default for AclSettings {
	fn default() -> Self {
		Self {
			enabled: false,
			default_allow: true,
			down_policy: DownPolicy::default(),
			token_ttl: Duration::from_secs(30),
			policy_ttl: Duration::from_secs(30),
			role_ttl: Duration::from_secs(30),
			initial_management_token: None,
			agent_token: None,
			default_token: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct DnsSettings {
	pub allow_stale: bool,
	pub max_stale: Duration,
	pub node_ttl: Duration,
	pub service_ttl: Duration,
	pub udp_answer_limit: usize,
	pub a_record_limit: usize,
	pub alt_domain: Option<String>,
}

impl Default for DnsSettings {
	fn default() -> Self {
		Self {
			allow_stale: true,
			max_stale: Duration::from_secs(86400),
			node_ttl: Duration::ZERO,
			service_ttl: Duration::ZERO,
			udp_answer_limit: 3,
			a_record_limit: 0,
			alt_domain: None,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct AutoEncrypt {
	pub tls: bool,
	pub allow_tls: bool,
	pub dns_san: Vec<String>,
	pub ip_san: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AutoConfig {
	pub enabled: bool,
	pub intro_token: Option<String>,
	pub server_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UiSettings {
	pub enabled: bool,
	pub dir: Option<String>,
	pub content_path: String,
}
