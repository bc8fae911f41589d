//! Builds and validates the [`RuntimeConfig`] from the merged raw layer.
//!
//! Everything here fails fast: a validation error aborts agent start
//! before the supervisor touches the network or the data dir. Warnings
//! (fault-tolerance advisories, deprecated fields) go through `tracing`.

use {
	super::{
		AclSettings,
		AutoConfig,
		AutoEncrypt,
		Autopilot,
		DnsSettings,
		GossipTunables,
		JoinTarget,
		Limits,
		Ports,
		RuntimeConfig,
		UiSettings,
		load::parse_duration,
		raw::{RawConfig, RawGossip},
	},
	crate::{Error, endpoints::DownPolicy, types::validate_meta},
	core::{net::IpAddr, time::Duration},
	std::collections::BTreeSet,
	uuid::Uuid,
};

/// Reserved DNS keywords that may not prefix `alt_domain`.
const RESERVED_DNS_PREFIXES: &[&str] =
	&["service", "connect", "node", "query", "addr"];

/// Turns the merged raw configuration into the validated runtime
/// configuration.
pub fn build(raw: RawConfig) -> Result<RuntimeConfig, Error> {
	let dev_mode = raw.dev.unwrap_or(false);
	let server_mode = raw.server.unwrap_or(false) || dev_mode;

	let datacenter =
		normalized_name("datacenter", raw.datacenter.as_deref(), "dc1")?;
	let primary_datacenter = normalized_name(
		"primary_datacenter",
		raw.primary_datacenter.as_deref(),
		&datacenter,
	)?;

	let node_name = match raw.node_name {
		Some(name) if !name.trim().is_empty() => name,
		_ => std::env::var("HOSTNAME")
			.ok()
			.filter(|h| !h.is_empty())
			.unwrap_or_else(|| "meridian".to_string()),
	};

	let data_dir = match (&raw.data_dir, dev_mode) {
		(Some(dir), _) => Some(dir.into()),
		(None, true) => None,
		(None, false) => {
			return Err(Error::Config(
				"data_dir is required outside dev mode".to_string(),
			));
		}
	};

	let bind_addr = raw
		.bind_addr
		.as_deref()
		.map(parse_bind_addr)
		.transpose()?;

	let ports = build_ports(&raw)?;
	validate_listener_uniqueness(&ports)?;

	// bootststrap rules
	let mut bootstrap = raw.bootstrap.unwrap_or(false);
	let mut bootstrap_expect = match raw.bootstrap_expect {
		Some(n) if n < 0 => {
			return Err(Error::Config(format!(
				"bootstrap_expect cannot be {n}; must be >= 0"
			)));
		}
		Some(n) => n as usize,
		None => 0,
	};

	if bootstrap_expect > 0 && !server_mode {
		return Err(Error::Config(
			"'bootstrap_expect > 0' requires 'server = true'".to_string(),
		));
	}
	if bootstrap_expect > 0 && dev_mode {
		return Err(Error::Config(
			"'bootstrap_expect > 0' is not allowed in dev mode".to_string(),
		));
	}
	if bootstrap_expect > 0 && bootstrap {
		return Err(Error::Config(
			"'bootstrap_expect > 0' and 'bootstrap = true' are mutually \
			 exclusive"
				.to_string(),
		));
	}
	if bootstrap_expect == 1 {
		tracing::warn!(
			"bootstrap_expect = 1 is the same as bootstrap mode"
		);
		bootstrap_expect = 0;
		bootstrap = true;
	} else if bootstrap_expect == 2 {
		tracing::warn!(
			"bootstrap_expect = 2: a cluster of two servers provides no \
			 failure tolerance",
		);
	} else if bootstrap_expect > 2 && bootstrap_expect % 2 == 0 {
		tracing::warn!(
			"bootstrap_expect is even: even server counts do not achieve \
			 optimum fault tolerance",
		);
	}
	if bootstrap && !server_mode {
		return Err(Error::Config(
			"'bootstrap = true' requires 'server = true'".to_string(),
		));
	}
	if dev_mode {
		// dev mode is a self-contained single-server cluster
		bootstrap = true;
	}

	let read_replica = raw.read_replica.unwrap_or(false);
	if read_replica && !server_mode {
		return Err(Error::Config(
			"'read_replica = true' requires 'server = true'".to_string(),
		));
	}

	// segment membership: clients pick one, servers host all
	let segment = raw.segment.clone().unwrap_or_default();
	if !segment.is_empty() && server_mode {
		return Err(Error::Config(
			"'segment' is a client option; servers host every segment"
				.to_string(),
		));
	}
	if !raw.segments.is_empty() && !server_mode {
		return Err(Error::Config(
			"'segments' is a server option".to_string(),
		));
	}

	validate_meta(&raw.node_meta)
		.map_err(|e| Error::Config(e.to_string()))?;

	let encrypt_key = raw
		.encrypt
		.as_deref()
		.map(|raw_key| {
			hex::decode(raw_key)
				.ok()
				.and_then(|b| <[u8; 32]>::try_from(b).ok())
				.ok_or_else(|| {
					Error::Config(
						"encrypt must be a hex-encoded 32-byte key"
							.to_string(),
					)
				})
		})
		.transpose()?;

	let raft_multiplier = match raw.performance.raft_multiplier {
		Some(n) if !(1..=10).contains(&n) => {
			return Err(Error::Config(format!(
				"performance.raft_multiplier must be in [1, 10], got {n}"
			)));
		}
		Some(n) => n as u32,
		None => 1,
	};

	let limits = build_limits(&raw)?;
	let acl = build_acl(&raw)?;
	let dns = build_dns(&raw, &datacenter)?;

	let auto_encrypt = AutoEncrypt {
		tls: raw.auto_encrypt.tls.unwrap_or(false),
		allow_tls: raw.auto_encrypt.allow_tls.unwrap_or(false),
		dns_san: raw.auto_encrypt.dns_san.clone(),
		ip_san: raw.auto_encrypt.ip_san.clone(),
	};
	let auto_config = AutoConfig {
		enabled: raw.auto_config.enabled.unwrap_or(false),
		intro_token: raw.auto_config.intro_token.clone(),
		server_addresses: raw.auto_config.server_addresses.clone(),
	};
	if auto_config.enabled && auto_encrypt.tls {
		return Err(Error::Config(
			"auto_config.enabled and auto_encrypt.tls are mutually \
			 exclusive"
				.to_string(),
		));
	}

	let ui = build_ui(&raw);

	let retry_join = parse_join_targets(&raw.retry_join)?;
	let retry_join_wan = parse_join_targets(&raw.retry_join_wan)?;
	if !retry_join_wan.is_empty() && !server_mode {
		return Err(Error::Config(
			"'retry_join_wan' is a server option".to_string(),
		));
	}

	Ok(RuntimeConfig {
		datacenter,
		primary_datacenter,
		node_name,
		dev_mode,
		data_dir,
		server_mode,
		read_replica,
		bootstrap,
		bootstrap_expect,
		bind_addr,
		ports,
		segment,
		segments: raw.segments.clone(),
		node_meta: raw.node_meta.clone(),
		encrypt_key,
		retry_join,
		retry_join_wan,
		retry_interval: opt_duration(
			raw.retry_interval.as_deref(),
			Duration::from_secs(30),
		)?,
		gossip_lan: build_gossip(&raw.gossip_lan, GossipTunables::lan())?,
		gossip_wan: build_gossip(&raw.gossip_wan, GossipTunables::wan())?,
		raft_multiplier,
		leave_drain_time: opt_duration(
			raw.performance.leave_drain_time.as_deref(),
			Duration::from_secs(5),
		)?,
		rpc_hold_timeout: opt_duration(
			raw.performance.rpc_hold_timeout.as_deref(),
			Duration::from_secs(7),
		)?,
		limits,
		autopilot: build_autopilot(&raw)?,
		acl,
		dns,
		auto_encrypt,
		auto_config,
		ui,
		check_output_max_size: match raw.check_output_max_size {
			Some(n) if n <= 0 => {
				return Err(Error::Config(
					"check_output_max_size must be positive".to_string(),
				));
			}
			Some(n) => n as usize,
			None => 4096,
		},
		enable_script_checks: raw.enable_script_checks.unwrap_or(false),
		sync_interval: opt_duration(
			raw.sync_interval.as_deref(),
			Duration::from_secs(60),
		)?,
	})
}

/// Datacenter-style names: lowercased, `^[a-z0-9_-]+$`.
fn normalized_name(
	field: &str,
	value: Option<&str>,
	default: &str,
) -> Result<String, Error> {
	let value = value.unwrap_or(default);
	let lowered = value.to_lowercase();
	if lowered != value {
		tracing::warn!(
			"{field} {value:?} contains uppercase characters, lowercased"
		);
	}

	let valid = !lowered.is_empty()
		&& lowered
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
	if !valid {
		return Err(Error::Config(format!(
			"{field} {value:?} must match ^[a-z0-9_-]+$"
		)));
	}
	Ok(lowered)
}

/// A bind address is one unicast IP literal; any- and multicast addresses
/// are refused.
fn parse_bind_addr(raw: &str) -> Result<IpAddr, Error> {
	let addr: IpAddr = raw.parse().map_err(|_| {
		Error::Config(format!("bind_addr {raw:?} is not an IP literal"))
	})?;
	if addr.is_multicast() {
		return Err(Error::Config(format!(
			"bind_addr {raw:?} must not be a multicast address"
		)));
	}
	if addr.is_unspecified() {
		return Err(Error::Config(format!(
			"bind_addr {raw:?} must be a single concrete address"
		)));
	}
	Ok(addr)
}

fn build_ports(raw: &RawConfig) -> Result<Ports, Error> {
	let port = |field: &str, value: Option<i64>, default: Option<u16>| {
		match value {
			None => Ok(default),
			Some(n) if n < 0 => Ok(None),
			Some(n) if (1..=65535).contains(&n) => Ok(Some(n as u16)),
			Some(n) => Err(Error::Config(format!(
				"ports.{field} must be -1 (disabled) or in [1, 65535], \
				 got {n}"
			))),
		}
	};

	Ok(Ports {
		dns: port("dns", raw.ports.dns, Some(8600))?,
		http: port("http", raw.ports.http, Some(8500))?,
		https: port("https", raw.ports.https, None)?,
		grpc: port("grpc", raw.ports.grpc, None)?,
		server: port("server", raw.ports.server, Some(8300))?,
		serf_lan: port("serf_lan", raw.ports.serf_lan, Some(8301))?,
		serf_wan: port("serf_wan", raw.ports.serf_wan, Some(8302))?,
	})
}

/// Every enabled listener must have a unique port.
fn validate_listener_uniqueness(ports: &Ports) -> Result<(), Error> {
	let named = [
		("dns", ports.dns),
		("http", ports.http),
		("https", ports.https),
		("grpc", ports.grpc),
		("server", ports.server),
		("serf_lan", ports.serf_lan),
		("serf_wan", ports.serf_wan),
	];

	let mut seen = BTreeSet::new();
	for (name, port) in named {
		let Some(port) = port else { continue };
		if !seen.insert(port) {
			return Err(Error::Config(format!(
				"listener port {port} ({name}) is used by more than one \
				 listener"
			)));
		}
	}
	Ok(())
}

fn build_gossip(
	raw: &RawGossip,
	defaults: GossipTunables,
) -> Result<GossipTunables, Error> {
	let positive = |field: &str, value: Option<i64>, default: usize| {
		match value {
			None => Ok(default),
			Some(n) if n > 0 => Ok(n as usize),
			Some(n) => Err(Error::Config(format!(
				"{field} must be positive, got {n}"
			))),
		}
	};

	Ok(GossipTunables {
		gossip_interval: opt_duration(
			raw.gossip_interval.as_deref(),
			defaults.gossip_interval,
		)?,
		probe_timeout: opt_duration(
			raw.probe_timeout.as_deref(),
			defaults.probe_timeout,
		)?,
		gossip_nodes: positive(
			"gossip_nodes",
			raw.gossip_nodes,
			defaults.gossip_nodes,
		)?,
		suspicion_mult: positive(
			"suspicion_mult",
			raw.suspicion_mult,
			defaults.suspicion_mult as usize,
		)? as u32,
		retransmit_mult: positive(
			"retransmit_mult",
			raw.retransmit_mult,
			defaults.retransmit_mult as usize,
		)? as u32,
		push_pull_interval: opt_duration(
			raw.push_pull_interval.as_deref(),
			defaults.push_pull_interval,
		)?,
		allowed_cidrs: raw
			.allowed_cidrs
			.iter()
			.map(|c| {
				c.parse().map_err(|e| Error::Config(format!("{e}")))
			})
			.collect::<Result<_, _>>()?,
	})
}

fn build_limits(raw: &RawConfig) -> Result<Limits, Error> {
	let defaults = Limits::default();

	let http_max = match raw.limits.http_max_conns_per_client {
		Some(0) => {
			return Err(Error::Config(
				"limits.http_max_conns_per_client must not be 0".to_string(),
			));
		}
		Some(n) if n < 0 => {
			return Err(Error::Config(
				"limits.http_max_conns_per_client must be positive"
					.to_string(),
			));
		}
		// enforce a reasonable floor so a tiny misconfiguration does not
		// lock every client out
		Some(n) => (n as usize).max(10),
		None => defaults.http_max_conns_per_client,
	};

	let rpc_max = match raw.limits.rpc_max_conns_per_client {
		Some(n) if n <= 0 => {
			return Err(Error::Config(
				"limits.rpc_max_conns_per_client must be positive"
					.to_string(),
			));
		}
		Some(n) => n as usize,
		None => defaults.rpc_max_conns_per_client,
	};

	Ok(Limits {
		rpc_rate: match raw.limits.rpc_rate {
			Some(rate) if rate <= 0.0 => None,
			other => other.or(defaults.rpc_rate),
		},
		rpc_max_burst: raw
			.limits
			.rpc_max_burst
			.map(|n| n.max(1) as usize)
			.unwrap_or(defaults.rpc_max_burst),
		rpc_max_conns_per_client: rpc_max,
		http_max_conns_per_client: http_max,
		kv_max_value_size: raw
			.limits
			.kv_max_value_size
			.map(|n| n.max(1) as usize)
			.unwrap_or(defaults.kv_max_value_size),
		txn_max_req_len: raw
			.limits
			.txn_max_req_len
			.map(|n| n.max(1) as usize)
			.unwrap_or(defaults.txn_max_req_len),
		https_handshake_timeout: opt_duration(
			raw.limits.https_handshake_timeout.as_deref(),
			defaults.https_handshake_timeout,
		)?,
		rpc_handshake_timeout: opt_duration(
			raw.limits.rpc_handshake_timeout.as_deref(),
			defaults.rpc_handshake_timeout,
		)?,
	})
}

fn build_acl(raw: &RawConfig) -> Result<AclSettings, Error> {
	let defaults = AclSettings::default();

	let default_allow = match raw.acl.default_policy.as_deref() {
		None | Some("allow") => true,
		Some("deny") => false,
		Some(other) => {
			return Err(Error::Config(format!(
				"acl.default_policy must be allow or deny, got {other:?}"
			)));
		}
	};

	let down_policy = match raw.acl.down_policy.as_deref() {
		None => defaults.down_policy,
		Some("deny") => DownPolicy::Deny,
		Some("allow") => DownPolicy::Allow,
		Some("extend-cache") => DownPolicy::ExtendCache,
		Some("async-cache") => DownPolicy::AsyncCache,
		Some(other) => {
			return Err(Error::Config(format!(
				"acl.down_policy must be one of deny, allow, \
				 extend-cache, async-cache; got {other:?}"
			)));
		}
	};

	let token = |field: &str, value: Option<&String>| {
		value
			.map(|t| {
				t.parse::<Uuid>().map_err(|_| {
					Error::Config(format!(
						"acl.tokens.{field} is not a valid token secret"
					))
				})
			})
			.transpose()
	};

	Ok(AclSettings {
		enabled: raw.acl.enabled.unwrap_or(false),
		default_allow,
		down_policy,
		token_ttl: opt_duration(
			raw.acl.token_ttl.as_deref(),
			defaults.token_ttl,
		)?,
		policy_ttl: opt_duration(
			raw.acl.policy_ttl.as_deref(),
			defaults.policy_ttl,
		)?,
		role_ttl: opt_duration(
			raw.acl.role_ttl.as_deref(),
			defaults.role_ttl,
		)?,
		initial_management_token: token(
			"initial_management",
			raw.acl.tokens.initial_management.as_ref(),
		)?,
		agent_token: token("agent", raw.acl.tokens.agent.as_ref())?,
		default_token: token("default", raw.acl.tokens.default.as_ref())?,
	})
}

fn build_dns(
	raw: &RawConfig,
	datacenter: &str,
) -> Result<DnsSettings, Error> {
	let defaults = DnsSettings::default();

	if let Some(alt_domain) = raw.alt_domain.as_deref() {
		let reserved = RESERVED_DNS_PREFIXES
			.iter()
			.copied()
			.chain(std::iter::once(datacenter));
		for keyword in reserved {
			if alt_domain.starts_with(&format!("{keyword}.")) {
				return Err(Error::Config(format!(
					"alt_domain must not be prefixed by the reserved \
					 keyword {keyword:?}"
				)));
			}
		}
	}

	Ok(DnsSettings {
		allow_stale: raw
			.dns_config
			.allow_stale
			.unwrap_or(defaults.allow_stale),
		max_stale: opt_duration(
			raw.dns_config.max_stale.as_deref(),
			defaults.max_stale,
		)?,
		node_ttl: opt_duration(
			raw.dns_config.node_ttl.as_deref(),
			defaults.node_ttl,
		)?,
		service_ttl: opt_duration(
			raw.dns_config.service_ttl.as_deref(),
			defaults.service_ttl,
		)?,
		udp_answer_limit: raw
			.dns_config
			.udp_answer_limit
			.map(|n| n.max(0) as usize)
			.unwrap_or(defaults.udp_answer_limit),
		a_record_limit: raw
			.dns_config
			.a_record_limit
			.map(|n| n.max(0) as usize)
			.unwrap_or(defaults.a_record_limit),
		alt_domain: raw.alt_domain.clone(),
	})
}

fn build_autopilot(raw: &RawConfig) -> Result<Autopilot, Error> {
	let defaults = Autopilot::default();

	Ok(Autopilot {
		cleanup_dead_servers: raw
			.autopilot
			.cleanup_dead_servers
			.unwrap_or(defaults.cleanup_dead_servers),
		last_contact_threshold: opt_duration(
			raw.autopilot.last_contact_threshold.as_deref(),
			defaults.last_contact_threshold,
		)?,
		max_trailing_logs: raw
			.autopilot
			.max_trailing_logs
			.map(|n| n.max(0) as u64)
			.unwrap_or(defaults.max_trailing_logs),
		min_quorum: raw
			.autopilot
			.min_quorum
			.map(|n| n.max(0) as usize)
			.unwrap_or(defaults.min_quorum),
		server_stabilization_time: opt_duration(
			raw.autopilot.server_stabilization_time.as_deref(),
			defaults.server_stabilization_time,
		)?,
		disable_upgrade_migration: raw
			.autopilot
			.disable_upgrade_migration
			.unwrap_or(defaults.disable_upgrade_migration),
		redundancy_zone_tag: raw
			.autopilot
			.redundancy_zone_tag
			.clone()
			.unwrap_or_default(),
		upgrade_version_tag: raw
			.autopilot
			.upgrade_version_tag
			.clone()
			.unwrap_or_default(),
	})
}

/// Deprecated `ui`, `ui_dir` and `ui_content_path` fold into `ui_config`
/// with a warning; the newer form wins where both are set.
fn build_ui(raw: &RawConfig) -> UiSettings {
	for (field, set) in [
		("ui", raw.ui.is_some()),
		("ui_dir", raw.ui_dir.is_some()),
		("ui_content_path", raw.ui_content_path.is_some()),
	] {
		if set {
			tracing::warn!(
				"the {field} field is deprecated, use ui_config.* instead"
			);
		}
	}

	UiSettings {
		enabled: raw
			.ui_config
			.enabled
			.or(raw.ui)
			.unwrap_or(false),
		dir: raw.ui_config.dir.clone().or_else(|| raw.ui_dir.clone()),
		content_path: raw
			.ui_config
			.content_path
			.clone()
			.or_else(|| raw.ui_content_path.clone())
			.unwrap_or_else(|| "/ui/".to_string()),
	}
}

fn parse_join_targets(raw: &[String]) -> Result<Vec<JoinTarget>, Error> {
	raw.iter()
		.map(|s| s.parse().map_err(Error::Config))
		.collect()
}

fn opt_duration(
	raw: Option<&str>,
	default: Duration,
) -> Result<Duration, Error> {
	raw.map(parse_duration).transpose().map(|d| d.unwrap_or(default))
}

#[cfg(test)]
mod tests {
	use {super::*, serde_json::json};

	fn raw(value: serde_json::Value) -> RawConfig {
		serde_json::from_value(value).unwrap()
	}

	fn dev(mut value: serde_json::Value) -> serde_json::Value {
		value["dev"] = json!(true);
		value
	}

	#[test]
	fn bootstrap_expect_boundaries() {
		// negative is rejected
		let err = build(raw(json!({
			"server": true, "data_dir": "/tmp", "bootstrap_expect": -1
		})))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		// 1 collapses to bootstrap mode
		let config = build(raw(json!({
			"server": true, "data_dir": "/tmp", "bootstrap_expect": 1
		})))
		.unwrap();
		assert!(config.bootstrap);
		assert_eq!(config.bootstrap_expect, 0);

		// requires server mode
		let err = build(raw(json!({
			"data_dir": "/tmp", "bootstrap_expect": 3
		})))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		// mutually exclusive with explicit bootstrap
		let err = build(raw(json!({
			"server": true,
			"data_dir": "/tmp",
			"bootstrap": true,
			"bootstrap_expect": 3,
		})))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn datacenter_name_is_validated_and_lowercased() {
		let config = build(raw(dev(json!({"datacenter": "East"})))).unwrap();
		assert_eq!(config.datacenter, "east");

		let err =
			build(raw(dev(json!({"datacenter": "bad dc!"})))).unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn bind_addr_must_be_concrete_unicast() {
		assert!(build(raw(dev(json!({"bind_addr": "10.0.0.5"})))).is_ok());

		for bad in ["0.0.0.0", "224.0.0.1", "host.example"] {
			let err =
				build(raw(dev(json!({"bind_addr": bad})))).unwrap_err();
			assert!(matches!(err, Error::Config(_)), "{bad} accepted");
		}
	}

	#[test]
	fn listener_ports_must_be_unique_and_in_range() {
		let err = build(raw(dev(json!({
			"ports": {"http": 8500, "dns": 8500}
		}))))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		let err = build(raw(dev(json!({"ports": {"http": 70000}}))))
			.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		// negative disables a listener
		let config =
			build(raw(dev(json!({"ports": {"dns": -1}})))).unwrap();
		assert_eq!(config.ports.dns, None);
	}

	#[test]
	fn http_conn_limit_floor() {
		let err = build(raw(dev(json!({
			"limits": {"http_max_conns_per_client": 0}
		}))))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		let config = build(raw(dev(json!({
			"limits": {"http_max_conns_per_client": 2}
		}))))
		.unwrap();
		assert_eq!(config.limits.http_max_conns_per_client, 10);
	}

	#[test]
	fn node_meta_limits_are_enforced() {
		let mut meta = serde_json::Map::new();
		for i in 0..65 {
			meta.insert(format!("k{i}"), json!("v"));
		}
		let err =
			build(raw(dev(json!({"node_meta": meta})))).unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn alt_domain_reserved_prefixes() {
		let err = build(raw(dev(json!({"alt_domain": "service.example."}))))
			.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		// the datacenter name itself is reserved too
		let err = build(raw(dev(json!({
			"datacenter": "east",
			"alt_domain": "east.example.",
		}))))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		assert!(
			build(raw(dev(json!({"alt_domain": "example.com."})))).is_ok()
		);
	}

	#[test]
	fn auto_config_excludes_auto_encrypt_tls() {
		let err = build(raw(dev(json!({
			"auto_config": {"enabled": true},
			"auto_encrypt": {"tls": true},
		}))))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn raft_multiplier_bounds() {
		let err = build(raw(dev(json!({
			"performance": {"raft_multiplier": 11}
		}))))
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));

		let config = build(raw(dev(json!({
			"performance": {"raft_multiplier": 5}
		}))))
		.unwrap();
		assert_eq!(config.raft_multiplier, 5);
	}

	#[test]
	fn deprecated_ui_fields_fold_into_ui_config() {
		let config = build(raw(dev(json!({
			"ui": true,
			"ui_dir": "/legacy",
			"ui_config": {"dir": "/newer"},
		}))))
		.unwrap();

		// the newer form wins where set; the legacy value fills gaps
		assert!(config.ui.enabled);
		assert_eq!(config.ui.dir.as_deref(), Some("/newer"));
	}

	#[test]
	fn data_dir_required_outside_dev_mode() {
		let err = build(raw(json!({"server": true}))).unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}
}
