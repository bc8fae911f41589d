use {
	super::CliOpts,
	clap::Parser,
	meridian::{agent::Agent, config},
	serde_json::{Value, json},
	std::path::PathBuf,
};

/// Runs the long-running agent.
#[derive(Debug, Parser)]
pub struct Command {
	/// Config file to load; may be given multiple times, later files win
	/// scalar conflicts.
	#[clap(long = "config-file")]
	config_file: Vec<PathBuf>,

	/// Directory of config files, loaded in alphabetical order.
	#[clap(long = "config-dir")]
	config_dir: Vec<PathBuf>,

	/// Development mode: in-memory state, no data directory required.
	#[clap(long)]
	dev: bool,

	/// Run in server mode (participate in consensus).
	#[clap(long)]
	server: bool,

	/// Address to bind client interfaces to.
	#[clap(long)]
	client: Option<String>,

	/// Address to bind the transport to.
	#[clap(long)]
	bind: Option<String>,

	/// Address advertised to the rest of the cluster.
	#[clap(long)]
	advertise: Option<String>,

	/// Single-server bootstrap mode.
	#[clap(long)]
	bootstrap: bool,

	/// Number of servers expected to auto-form the initial voter set.
	#[clap(long = "bootstrap-expect")]
	bootstrap_expect: Option<i64>,

	/// Datacenter this agent belongs to.
	#[clap(long)]
	datacenter: Option<String>,

	/// Directory for persistent state.
	#[clap(long = "data-dir")]
	data_dir: Option<PathBuf>,

	/// Node name, unique within the datacenter.
	#[clap(long = "node")]
	node_name: Option<String>,

	/// LAN segment to join (clients only).
	#[clap(long)]
	segment: Option<String>,

	/// Gossip encryption key (hex, 32 bytes).
	#[clap(long)]
	encrypt: Option<String>,

	/// Peer to join on start, retried until reachable. May be repeated.
	#[clap(long = "retry-join")]
	retry_join: Vec<String>,

	/// WAN peer to join on start (servers only). May be repeated.
	#[clap(long = "join-wan")]
	join_wan: Vec<String>,

	/// DNS listener port (-1 to disable).
	#[clap(long = "dns-port")]
	dns_port: Option<i64>,

	/// HTTP listener port (-1 to disable).
	#[clap(long = "http-port")]
	http_port: Option<i64>,
}

impl Command {
	pub async fn execute(&self, _opts: &CliOpts) -> anyhow::Result<()> {
		let mut sources = Vec::new();
		for dir in &self.config_dir {
			sources.push(config::Source::File(dir.clone()));
		}
		for file in &self.config_file {
			sources.push(config::Source::File(file.clone()));
		}
		sources.push(config::Source::Flags(self.to_flags()));

		let raw = config::load(&sources)?;
		let runtime = config::build(raw)?;

		tracing::info!(
			datacenter = %runtime.datacenter,
			node = %runtime.node_name,
			server = runtime.server_mode,
			"starting agent",
		);

		let agent = Agent::start(runtime).await?;
		agent.run().await?;
		Ok(())
	}

	/// Flags mirror the file schema; only explicitly set flags override
	/// file values.
	fn to_flags(&self) -> Value {
		let mut flags = serde_json::Map::new();
		let mut set = |key: &str, value: Value| {
			flags.insert(key.to_string(), value);
		};

		if self.dev {
			set("dev", json!(true));
		}
		if self.server {
			set("server", json!(true));
		}
		if self.bootstrap {
			set("bootstrap", json!(true));
		}
		if let Some(n) = self.bootstrap_expect {
			set("bootstrap_expect", json!(n));
		}
		if let Some(addr) = &self.bind {
			set("bind_addr", json!(addr));
		}
		if let Some(addr) = &self.advertise {
			set("advertise_addr", json!(addr));
		}
		if let Some(addr) = &self.client {
			set("client_addr", json!(addr));
		}
		if let Some(dc) = &self.datacenter {
			set("datacenter", json!(dc));
		}
		if let Some(dir) = &self.data_dir {
			set("data_dir", json!(dir));
		}
		if let Some(name) = &self.node_name {
			set("node_name", json!(name));
		}
		if let Some(segment) = &self.segment {
			set("segment", json!(segment));
		}
		if let Some(key) = &self.encrypt {
			set("encrypt", json!(key));
		}
		if !self.retry_join.is_empty() {
			set("retry_join", json!(self.retry_join));
		}
		if !self.join_wan.is_empty() {
			set("retry_join_wan", json!(self.join_wan));
		}

		let mut ports = serde_json::Map::new();
		if let Some(port) = self.dns_port {
			ports.insert("dns".to_string(), json!(port));
		}
		if let Some(port) = self.http_port {
			ports.insert("http".to_string(), json!(port));
		}
		if !ports.is_empty() {
			set("ports", Value::Object(ports));
		}

		Value::Object(flags)
	}
}
