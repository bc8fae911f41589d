//! The agent supervisor: owns the lifecycle of every component, wires
//! them together in dependency order, and handles signals (reload on
//! SIGHUP, graceful leave on SIGTERM, skip-leave on SIGINT when server).

mod checks;
mod files;
mod leader;
mod local;
mod sync;

pub use {
	checks::CheckRunners,
	files::{DataDir, Keyring},
	leader::{LeaderConfig, LeaderTasks},
	local::LocalRegistry,
	sync::Syncer,
};

use {
	crate::{
		Error,
		config::RuntimeConfig,
		consensus::{self, Consensus, Membership},
		endpoints::{Acl, AclConfig},
		fsm::Fsm,
		gossip::{
			self,
			Member,
			MemberRole,
			MemberState,
			Pool,
			PoolScope,
		},
		primitives::{ClusterId, scaled},
		rpc::{
			ClientLimiter,
			Dispatcher,
			DispatcherConfig,
			QueryOptions,
			RAFT_ALPN,
			RPC_ALPN,
			RaftOutbound,
			RaftProtocol,
			RateLimiter,
			RequestPayload,
			ResponsePayload,
			RpcProtocol,
			RpcRequest,
			RpcResponse,
		},
		state::Store,
		transport::{Transport, TransportConfig},
		types::Node,
	},
	core::net::SocketAddr,
	core::time::Duration,
	iroh::protocol::Router,
	std::{collections::BTreeMap, sync::Arc},
	tokio::sync::watch,
	tokio_util::sync::CancellationToken,
};

/// One running agent. Dropping it (or calling [`Agent::shutdown`]) tears
/// every component down through the shared cancellation tree.
pub struct Agent {
	config: RuntimeConfig,
	transport: Transport,
	dispatcher: Dispatcher,
	registry: LocalRegistry,
	runners: Arc<CheckRunners>,
	store: Option<Store>,
	consensus: Option<Consensus<Fsm>>,
	lan_pools: Vec<Pool>,
	wan_pool: Option<Pool>,
	node: Node,
	cancel: CancellationToken,

	/// Keeps the protocol router's accept loop alive for the lifetime of
	/// the agent.
	_router: Router,
}

impl Agent {
	/// Starts the agent: prepares the data directory, binds the
	/// transport, starts consensus (servers), joins gossip, and spawns
	/// the background tasks.
	pub async fn start(config: RuntimeConfig) -> Result<Self, Error> {
		let cancel = CancellationToken::new();

		// identity and persistent material
		let data_dir = config
			.data_dir
			.as_ref()
			.map(DataDir::prepare)
			.transpose()?;

		let (node_id, secret_key, keyring) = match &data_dir {
			Some(dir) => {
				let keyring = dir.keyring(config.encrypt_key)?;
				(dir.node_id()?, dir.secret_key()?, Some(keyring))
			}
			None => (
				uuid::Uuid::new_v4(),
				iroh::SecretKey::generate(),
				None,
			),
		};

		// the cluster identity mixes the datacenter name with the gossip
		// encryption key, so differently-keyed agents fail join validation
		let primary_key = keyring
			.as_ref()
			.and_then(Keyring::primary)
			.or(config.encrypt_key);
		let lan_cluster = cluster_id(&config.datacenter, primary_key);
		let wan_cluster = cluster_id("wan", primary_key);

		// transport
		let transport = Transport::bind(
			TransportConfig {
				secret_key,
				bind_addr: config.bind_addr.map(|ip| {
					SocketAddr::new(ip, config.ports.server.unwrap_or(0))
				}),
				handshake_timeout: config.limits.rpc_handshake_timeout,
				idle_timeout: Duration::from_secs(120),
				allowed_cidrs: config.gossip_lan.allowed_cidrs.clone(),
			},
			cancel.clone(),
		)
		.await
		.map_err(|e| Error::Fatal(format!("transport bind failed: {e}")))?;

		let role = match (config.server_mode, config.read_replica) {
			(true, true) => MemberRole::Replica,
			(true, false) => MemberRole::Server,
			(false, _) => MemberRole::Client,
		};

		let local_member = |segment: &str| Member {
			node: node_id,
			name: config.node_name.clone(),
			datacenter: config.datacenter.clone(),
			segment: segment.to_string(),
			role,
			address: transport.addr(),
			// seeding the incarnation with the wall clock lets a crashed
			// and restarted agent supersede its own stale alive claims
			incarnation: std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_secs())
				.unwrap_or(1),
			state: MemberState::Alive,
		};

		// gossip pools: servers host every LAN segment, clients exactly
		// one; servers additionally join the WAN pool
		let mut lan_segments = vec![String::new()];
		if config.server_mode {
			lan_segments.extend(config.segments.iter().cloned());
		} else if !config.segment.is_empty() {
			lan_segments = vec![config.segment.clone()];
		}

		let mut lan_pools = Vec::new();
		for segment in &lan_segments {
			let pool_config = gossip_config(
				lan_cluster,
				PoolScope::Lan {
					segment: segment.clone(),
				},
				&config.gossip_lan,
			);
			lan_pools.push(Pool::new(
				transport.clone(),
				pool_config,
				local_member(segment),
				cancel.child_token(),
			));
		}

		let wan_pool = config.server_mode.then(|| {
			let pool_config = gossip_config(
				wan_cluster,
				PoolScope::Wan,
				&config.gossip_wan,
			);
			Pool::new(
				transport.clone(),
				pool_config,
				local_member(""),
				cancel.child_token(),
			)
		});

		let lan_roster = lan_pools[0].roster().clone();

		// replicated state (servers only)
		let (store, consensus, membership_tx) = if config.server_mode {
			let store = Store::default();
			let (membership_tx, membership_rx) =
				watch::channel(Membership::default());
			let fsm = Fsm::new(store.clone(), membership_tx.clone());

			let outbound = RaftOutbound::new(
				node_id,
				config.datacenter.clone(),
				lan_roster.clone(),
				transport.pool(),
			);

			let consensus = match &data_dir {
				Some(dir) => {
					let storage = consensus::log::FileLogStore::open(
						dir.raft_log_path(),
					)
					.map_err(|e| {
						Error::Fatal(format!("consensus log unusable: {e}"))
					})?;
					let snapshots = consensus::log::SnapshotStore::open(
						dir.snapshots_dir(),
					)
					.map_err(|e| {
						Error::Fatal(format!("snapshot store unusable: {e}"))
					})?;

					Consensus::spawn(
						consensus_config(&config),
						node_id,
						storage,
						fsm,
						outbound,
						membership_rx,
						Some(snapshots),
						cancel.child_token(),
					)
				}
				None => Consensus::spawn(
					consensus_config(&config),
					node_id,
					consensus::log::InMemoryLogStore::default(),
					fsm,
					outbound,
					membership_rx,
					None,
					cancel.child_token(),
				),
			};

			(Some(store), Some(consensus), Some(membership_tx))
		} else {
			(None, None, None)
		};

		// rpc dispatch
		let acl = Acl::new(AclConfig {
			enabled: config.acl.enabled,
			default_allow: config.acl.default_allow,
			down_policy: config.acl.down_policy,
			token_ttl: config.acl.token_ttl,
			policy_ttl: config.acl.policy_ttl,
			role_ttl: config.acl.role_ttl,
			primary: config.datacenter == config.primary_datacenter,
		});

		let dispatcher = Dispatcher::new(
			config.datacenter.clone(),
			store.clone().unwrap_or_default(),
			consensus.clone(),
			acl,
			lan_roster.clone(),
			wan_pool.as_ref().map(|p| p.roster().clone()),
			transport.pool(),
			DispatcherConfig {
				kv_max_value_size: config.limits.kv_max_value_size,
				..DispatcherConfig::default()
			},
			RateLimiter::new(
				config.limits.rpc_rate,
				config.limits.rpc_max_burst,
			),
			ClientLimiter::new(config.limits.rpc_max_conns_per_client),
		);

		// protocol router: every inbound stream dispatches by ALPN
		let mut router = Router::builder(transport.endpoint().clone())
			.accept(RPC_ALPN, RpcProtocol::new(dispatcher.clone()));
		for pool in &lan_pools {
			router = router.accept(pool.alpn().to_vec(), pool.protocol());
		}
		if let Some(pool) = &wan_pool {
			router = router.accept(pool.alpn().to_vec(), pool.protocol());
		}
		if let Some(consensus) = &consensus {
			router = router
				.accept(RAFT_ALPN, RaftProtocol::new(consensus.clone()));
		}
		let router = router.spawn();

		// the agent-local registry, check runners and anti-entropy syncer
		let registry = LocalRegistry::new(config.check_output_max_size);
		let runners = Arc::new(CheckRunners::new(
			registry.clone(),
			cancel.child_token(),
		));
		tokio::spawn(Arc::clone(&runners).run());

		let node = Node {
			id: node_id,
			name: config.node_name.clone(),
			datacenter: config.datacenter.clone(),
			segment: lan_segments[0].clone(),
			address: transport.addr(),
			tagged_addresses: BTreeMap::new(),
			meta: config.node_meta.clone(),
		};

		tokio::spawn(
			Syncer::new(
				node.clone(),
				registry.clone(),
				dispatcher.clone(),
				config.sync_interval,
				cancel.child_token(),
			)
			.run(),
		);

		// leader housekeeping and voter bootstrap (servers only)
		if let (Some(store), Some(consensus), Some(membership_tx)) =
			(&store, &consensus, membership_tx)
		{
			let bootstrap_expect = if config.bootstrap {
				1
			} else {
				config.bootstrap_expect
			};

			tokio::spawn(
				LeaderTasks::new(
					store.clone(),
					consensus.clone(),
					lan_roster.clone(),
					membership_tx,
					LeaderConfig {
						bootstrap_expect,
						cleanup_dead_servers: config
							.autopilot
							.cleanup_dead_servers,
						min_quorum: config.autopilot.min_quorum,
						server_stabilization_time: config
							.autopilot
							.server_stabilization_time,
						..LeaderConfig::default()
					},
					cancel.child_token(),
				)
				.run(),
			);
		}

		// leader hints ride the gossip broadcast channel so clients learn
		// leadership changes without waiting for an RPC round trip
		if let Some(consensus) = &consensus {
			let pool = lan_pools[0].clone();
			let mut status = consensus.watch_status();
			let hint_cancel = cancel.child_token();
			tokio::spawn(async move {
				let mut last = None;
				loop {
					tokio::select! {
						_ = hint_cancel.cancelled() => return,
						changed = status.changed() => {
							if changed.is_err() {
								return;
							}
						}
					}

					let leader = status.borrow().leader;
					if leader != last {
						last = leader;
						if let Some(leader) = leader {
							let _ = pool.broadcast(
								crate::primitives::serialize(&leader),
							);
						}
					}
				}
			});
		}

		let agent = Self {
			config,
			transport,
			dispatcher,
			registry,
			runners,
			store,
			consensus,
			lan_pools,
			wan_pool,
			node,
			cancel,
			_router: router,
		};

		agent.spawn_retry_join();
		Ok(agent)
	}

	/// Keeps trying the configured join targets until one round succeeds.
	fn spawn_retry_join(&self) {
		let interval = self.config.retry_interval;

		if !self.config.retry_join.is_empty() {
			let pool = self.lan_pools[0].clone();
			let targets: Vec<_> = self
				.config
				.retry_join
				.iter()
				.map(|t| t.endpoint_addr())
				.collect();
			let cancel = self.cancel.child_token();
			tokio::spawn(retry_join(pool, targets, interval, cancel));
		}

		if let Some(wan) = &self.wan_pool {
			if !self.config.retry_join_wan.is_empty() {
				let targets: Vec<_> = self
					.config
					.retry_join_wan
					.iter()
					.map(|t| t.endpoint_addr())
					.collect();
				let cancel = self.cancel.child_token();
				tokio::spawn(retry_join(
					wan.clone(),
					targets,
					interval,
					cancel,
				));
			}
		}
	}

	/// The local RPC entry point.
	pub async fn rpc(
		&self,
		payload: RequestPayload,
		options: QueryOptions,
	) -> RpcResponse {
		self.dispatcher.serve(RpcRequest { options, payload }).await
	}

	/// Convenience wrapper unwrapping the response payload.
	pub async fn call(
		&self,
		payload: RequestPayload,
	) -> Result<ResponsePayload, Error> {
		self
			.rpc(payload, QueryOptions::default())
			.await
			.payload
			.map_err(Error::from)
	}

	pub fn registry(&self) -> &LocalRegistry {
		&self.registry
	}

	pub fn check_runners(&self) -> &Arc<CheckRunners> {
		&self.runners
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	pub fn transport(&self) -> &Transport {
		&self.transport
	}

	pub fn node(&self) -> &Node {
		&self.node
	}

	pub fn consensus(&self) -> Option<&Consensus<Fsm>> {
		self.consensus.as_ref()
	}

	pub fn store(&self) -> Option<&Store> {
		self.store.as_ref()
	}

	pub fn lan_pool(&self) -> &Pool {
		&self.lan_pools[0]
	}

	pub fn wan_pool(&self) -> Option<&Pool> {
		self.wan_pool.as_ref()
	}

	/// Runs until a termination signal arrives, then tears down
	/// according to the signal semantics: SIGTERM leaves gracefully with
	/// the drain budget, SIGINT skips the leave on servers, SIGHUP logs
	/// the reload request (runtime reload covers log level and check
	/// definitions; everything else needs a restart).
	pub async fn run(self) -> Result<(), Error> {
		use tokio::signal::unix::{SignalKind, signal};

		let mut sighup = signal(SignalKind::hangup())
			.map_err(|e| Error::Fatal(format!("signal setup: {e}")))?;
		let mut sigterm = signal(SignalKind::terminate())
			.map_err(|e| Error::Fatal(format!("signal setup: {e}")))?;
		let mut sigint = signal(SignalKind::interrupt())
			.map_err(|e| Error::Fatal(format!("signal setup: {e}")))?;

		loop {
			tokio::select! {
				_ = sighup.recv() => {
					tracing::info!(
						"SIGHUP received; configuration files will be \
						 re-read on next restart, runtime reload applies \
						 to check definitions only",
					);
				}

				_ = sigterm.recv() => {
					tracing::info!("SIGTERM received, leaving gracefully");
					self.leave().await;
					return Ok(());
				}

				_ = sigint.recv() => {
					if self.config.server_mode {
						tracing::info!(
							"SIGINT received, shutting down without leave",
						);
						self.shutdown();
					} else {
						tracing::info!("SIGINT received, leaving");
						self.leave().await;
					}
					return Ok(());
				}
			}
		}
	}

	/// Graceful departure: broadcast the leave through every pool, drain,
	/// then cancel everything.
	pub async fn leave(&self) {
		let drain = self.config.leave_drain_time;

		for pool in &self.lan_pools {
			pool.leave().await;
		}
		if let Some(wan) = &self.wan_pool {
			wan.leave().await;
		}

		tokio::time::sleep(drain).await;
		self.cancel.cancel();
	}

	/// Immediate teardown without the leave broadcast.
	pub fn shutdown(&self) {
		self.cancel.cancel();
	}
}

async fn retry_join(
	pool: Pool,
	targets: Vec<iroh::EndpointAddr>,
	interval: Duration,
	cancel: CancellationToken,
) {
	loop {
		match pool.join(targets.clone()).await {
			Ok(learned) => {
				tracing::info!(members = learned, "join round succeeded");
				return;
			}
			Err(e) => {
				tracing::warn!(error = %e, "join round failed, retrying");
			}
		}

		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = tokio::time::sleep(interval) => {}
		}
	}
}

fn cluster_id(name: &str, key: Option<[u8; 32]>) -> ClusterId {
	match key {
		Some(key) => {
			let mut material = Vec::with_capacity(name.len() + 32);
			material.extend_from_slice(name.as_bytes());
			material.extend_from_slice(&key);
			ClusterId::from_bytes(*blake3::hash(&material).as_bytes())
		}
		None => ClusterId::from(name),
	}
}

fn gossip_config(
	cluster: ClusterId,
	scope: PoolScope,
	tunables: &crate::config::GossipTunables,
) -> gossip::Config {
	gossip::Config::builder()
		.with_cluster(cluster)
		.with_scope(scope)
		.with_gossip_interval(tunables.gossip_interval)
		.with_probe_timeout(tunables.probe_timeout)
		.with_gossip_nodes(tunables.gossip_nodes)
		.with_suspicion_mult(tunables.suspicion_mult)
		.with_retransmit_mult(tunables.retransmit_mult)
		.with_push_pull_interval(tunables.push_pull_interval)
		.with_allowed_cidrs(tunables.allowed_cidrs.clone())
		.build()
		.expect("cluster and scope are set")
}

fn consensus_config(config: &RuntimeConfig) -> consensus::Config {
	let m = config.raft_multiplier;
	consensus::Config::builder()
		.with_heartbeat_interval(scaled(Duration::from_millis(500), m))
		.with_election_timeout(scaled(Duration::from_millis(1000), m))
		.with_election_timeout_jitter(scaled(Duration::from_millis(1000), m))
		.with_leader_lease_timeout(scaled(Duration::from_millis(250), m))
		.build()
		.expect("all fields have defaults")
}
