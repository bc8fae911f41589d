//! The raw configuration layer: every field optional, exactly as it
//! arrives from files, flags and overrides. Merging happens on the
//! serde-value level before this struct is produced; validation and
//! defaulting happen afterwards when the runtime config is built.

use {
	serde::{Deserialize, Serialize},
	std::collections::BTreeMap,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
	pub datacenter: Option<String>,
	pub primary_datacenter: Option<String>,
	pub node_name: Option<String>,
	pub data_dir: Option<String>,
	pub dev: Option<bool>,

	pub server: Option<bool>,
	pub read_replica: Option<bool>,
	pub bootstrap: Option<bool>,
	pub bootstrap_expect: Option<i64>,

	pub bind_addr: Option<String>,
	pub advertise_addr: Option<String>,
	pub advertise_addr_wan: Option<String>,
	pub client_addr: Option<String>,

	#[serde(default)]
	pub ports: RawPorts,

	pub segment: Option<String>,
	#[serde(default)]
	pub segments: Vec<String>,

	#[serde(default)]
	pub node_meta: BTreeMap<String, String>,

	/// Gossip encryption key, hex-encoded 32 bytes.
	pub encrypt: Option<String>,

	#[serde(default)]
	pub retry_join: Vec<String>,
	#[serde(default)]
	pub retry_join_wan: Vec<String>,
	pub retry_interval: Option<String>,

	#[serde(default)]
	pub gossip_lan: RawGossip,
	#[serde(default)]
	pub gossip_wan: RawGossip,

	#[serde(default)]
	pub acl: RawAcl,

	#[serde(default)]
	pub connect: RawConnect,

	#[serde(default)]
	pub auto_encrypt: RawAutoEncrypt,

	#[serde(default)]
	pub auto_config: RawAutoConfig,

	#[serde(default)]
	pub limits: RawLimits,

	#[serde(default)]
	pub performance: RawPerformance,

	#[serde(default)]
	pub autopilot: RawAutopilot,

	#[serde(default)]
	pub dns_config: RawDns,
	pub alt_domain: Option<String>,

	pub check_output_max_size: Option<i64>,
	pub enable_script_checks: Option<bool>,
	pub sync_interval: Option<String>,

	#[serde(default)]
	pub ui_config: RawUi,

	/// Deprecated spellings, still accepted with a warning and folded
	/// into `ui_config` (the newer form wins where both are set).
	pub ui: Option<bool>,
	pub ui_dir: Option<String>,
	pub ui_content_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPorts {
	pub dns: Option<i64>,
	pub http: Option<i64>,
	pub https: Option<i64>,
	pub grpc: Option<i64>,
	pub server: Option<i64>,
	pub serf_lan: Option<i64>,
	pub serf_wan: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGossip {
	pub gossip_interval: Option<String>,
	pub probe_timeout: Option<String>,
	pub gossip_nodes: Option<i64>,
	pub suspicion_mult: Option<i64>,
	pub retransmit_mult: Option<i64>,
	pub push_pull_interval: Option<String>,
	#[serde(default)]
	pub allowed_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAcl {
	pub enabled: Option<bool>,
	pub default_policy: Option<String>,
	pub down_policy: Option<String>,
	pub token_ttl: Option<String>,
	pub policy_ttl: Option<String>,
	pub role_ttl: Option<String>,

	#[serde(default)]
	pub tokens: RawAclTokens,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAclTokens {
	pub initial_management: Option<String>,
	pub agent: Option<String>,
	pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConnect {
	pub enabled: Option<bool>,
	pub ca_provider: Option<String>,
	#[serde(default)]
	pub ca_config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAutoEncrypt {
	pub tls: Option<bool>,
	pub allow_tls: Option<bool>,
	#[serde(default)]
	pub dns_san: Vec<String>,
	#[serde(default)]
	pub ip_san: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAutoConfig {
	pub enabled: Option<bool>,
	pub intro_token: Option<String>,
	pub intro_token_file: Option<String>,
	#[serde(default)]
	pub server_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLimits {
	pub rpc_rate: Option<f64>,
	pub rpc_max_burst: Option<i64>,
	pub rpc_max_conns_per_client: Option<i64>,
	pub http_max_conns_per_client: Option<i64>,
	pub kv_max_value_size: Option<i64>,
	pub txn_max_req_len: Option<i64>,
	pub https_handshake_timeout: Option<String>,
	pub rpc_handshake_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPerformance {
	pub raft_multiplier: Option<i64>,
	pub leave_drain_time: Option<String>,
	pub rpc_hold_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAutopilot {
	pub cleanup_dead_servers: Option<bool>,
	pub last_contact_threshold: Option<String>,
	pub max_trailing_logs: Option<i64>,
	pub min_quorum: Option<i64>,
	pub server_stabilization_time: Option<String>,
	pub disable_upgrade_migration: Option<bool>,
	pub redundancy_zone_tag: Option<String>,
	pub upgrade_version_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDns {
	pub allow_stale: Option<bool>,
	pub max_stale: Option<String>,
	pub node_ttl: Option<String>,
	pub service_ttl: Option<String>,
	pub udp_answer_limit: Option<i64>,
	pub a_record_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUi {
	pub enabled: Option<bool>,
	pub dir: Option<String>,
	pub content_path: Option<String>,
}
