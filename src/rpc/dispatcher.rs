use {
	super::{
		limits::{ClientLimiter, FailedServers, RateLimiter},
		options::QueryMeta,
		proto::{
			Disposition,
			RequestPayload,
			ResponsePayload,
			RpcError,
			RpcRequest,
			RpcResponse,
		},
	},
	crate::{
		consensus::Consensus,
		endpoints::{self, Acl},
		fsm::{ApplyOutcome, Fsm},
		gossip::Roster,
		primitives::clipped_wait,
		state::Store,
		transport::ConnectionPool,
		types::NodeId,
	},
	core::time::Duration,
	iroh::EndpointAddr,
	rand::seq::SliceRandom,
	std::sync::Arc,
};

/// ALPN of the request/response RPC protocol.
pub const RPC_ALPN: &[u8] = b"/meridian/rpc/1";

/// Default `max_stale` guard applied when a stale read does not specify
/// one.
const DEFAULT_MAX_STALE: Duration = Duration::from_secs(10);

/// Dispatcher tunables, resolved from the runtime configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
	/// Default blocking-query wait when the caller does not name one.
	pub default_query_time: Duration,

	/// Hard cap on blocking-query waits.
	pub max_query_time: Duration,

	/// Distinct servers tried when forwarding to a remote datacenter.
	pub forward_retries: usize,

	/// Largest accepted KV value.
	pub kv_max_value_size: usize,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			default_query_time: Duration::from_secs(300),
			max_query_time: Duration::from_secs(600),
			forward_retries: 3,
			kv_max_value_size: 512 * 1024,
		}
	}
}

/// Routes inbound RPCs: serves locally, forwards to the leader, or
/// forwards to a remote datacenter through its WAN-known servers.
///
/// Cheap to clone.
pub struct Dispatcher {
	inner: Arc<Inner>,
}

impl Clone for Dispatcher {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

pub(super) struct Inner {
	pub datacenter: String,
	pub store: Store,

	/// Present on servers; clients forward everything to a server.
	pub consensus: Option<Consensus<Fsm>>,
	pub acl: Acl,
	pub lan: Roster,
	pub wan: Option<Roster>,
	pub pool: ConnectionPool,
	pub config: DispatcherConfig,
	pub rate: RateLimiter,
	pub clients: ClientLimiter,
	pub failed_servers: FailedServers,
}

impl Dispatcher {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		datacenter: String,
		store: Store,
		consensus: Option<Consensus<Fsm>>,
		acl: Acl,
		lan: Roster,
		wan: Option<Roster>,
		pool: ConnectionPool,
		config: DispatcherConfig,
		rate: RateLimiter,
		clients: ClientLimiter,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				datacenter,
				store,
				consensus,
				acl,
				lan,
				wan,
				pool,
				config,
				rate,
				clients,
				failed_servers: FailedServers::default(),
			}),
		}
	}

	pub(super) fn clients(&self) -> &ClientLimiter {
		&self.inner.clients
	}

	/// Serves one request end to end. This is the single entry point for
	/// local callers (the agent, the syncer) and for requests arriving
	/// over the RPC protocol alike.
	pub async fn serve(&self, request: RpcRequest) -> RpcResponse {
		// shed load before doing any work
		if let Err(retry_after) = self.inner.rate.check() {
			return self.error_response(RpcError::QuotaExceeded {
				retry_after_ms: retry_after.as_millis() as u64,
			});
		}

		// client agents proxy everything to a server of their datacenter
		if self.inner.consensus.is_none() {
			return self.forward_to_local_server(request).await;
		}

		// cross-datacenter requests ride the WAN
		let target_dc = &request.options.datacenter;
		if !target_dc.is_empty() && *target_dc != self.inner.datacenter {
			return self.forward_to_datacenter(request).await;
		}

		// authenticate and authorize against the local snapshot
		let snapshot = self.inner.store.snapshot();
		let authorizer = match self
			.inner
			.acl
			.resolve(&snapshot, request.options.token)
		{
			Ok(authorizer) => authorizer,
			Err(e) => return self.error_response(e),
		};
		if let Some((resource, name, needed)) =
			endpoints::acl::required(&request.payload)
		{
			if self.inner.acl.enabled()
				&& !authorizer.allows(resource, &name, needed)
			{
				return self.error_response(RpcError::PermissionDenied);
			}
		}

		match request.payload.disposition() {
			Disposition::Write => self.serve_write(request).await,
			Disposition::Read => self.serve_read(request).await,
		}
	}

	/// The consensus handle. Only reachable on servers; client-mode
	/// requests are proxied away before the write/read paths run.
	fn consensus(&self) -> &Consensus<Fsm> {
		self
			.inner
			.consensus
			.as_ref()
			.expect("server-mode paths require consensus")
	}

	/// Forwards a whole request to any reachable server of the local
	/// datacenter, retrying over distinct servers.
	async fn forward_to_local_server(
		&self,
		request: RpcRequest,
	) -> RpcResponse {
		let mut servers: Vec<_> = self
			.inner
			.lan
			.members()
			.into_iter()
			.filter(|m| m.is_server() && m.is_reachable())
			.collect();
		if servers.is_empty() {
			return self.error_response(RpcError::NoServers(
				"no known servers in datacenter".to_string(),
			));
		}

		servers.shuffle(&mut rand::rng());
		let datacenter = self.inner.datacenter.clone();

		let mut last_error = None;
		for server in servers
			.into_iter()
			.take(self.inner.config.forward_retries.max(1))
		{
			match self
				.exchange(&datacenter, server.address.clone(), request.clone())
				.await
			{
				Ok(response) => return response,
				Err(e) => {
					self.inner.pool.evict(&datacenter, server.address.id);
					last_error = Some(e);
				}
			}
		}

		self.error_response(RpcError::NoServers(
			last_error
				.map(|e| e.to_string())
				.unwrap_or_else(|| "exhausted".to_string()),
		))
	}

	/// Writes are proposed to the log on the leader; elsewhere the whole
	/// request is forwarded to the leader.
	async fn serve_write(&self, request: RpcRequest) -> RpcResponse {
		let status = self.consensus().status();
		if !status.is_leader() {
			return self.forward_to_leader(request, status.leader).await;
		}

		// oversized KV values are refused before they reach the log
		if let RequestPayload::KvPut { entry }
		| RequestPayload::KvCas { entry, .. }
		| RequestPayload::KvAcquire { entry, .. } = &request.payload
		{
			if entry.value.len() > self.inner.config.kv_max_value_size {
				return self.error_response(RpcError::Consistency(format!(
					"value of {} bytes exceeds kv_max_value_size",
					entry.value.len()
				)));
			}
		}

		let options = request.options;
		let payload = match endpoints::normalize_write(request.payload) {
			Ok(payload) => payload,
			Err(e) => return self.error_response(e),
		};

		// remember what the response must carry before the payload moves
		let session_id = match &payload {
			RequestPayload::SessionCreate { session } => Some(session.id),
			_ => None,
		};

		let entry = payload
			.to_log_entry()
			.expect("write payloads translate to log entries");

		let applied = match self.consensus().append(vec![entry]).await {
			Ok(applied) => applied,
			Err(crate::consensus::Error::NotLeader(hint)) => {
				// lost leadership mid-flight
				return self
					.forward_to_leader(
						RpcRequest { options, payload },
						hint.leader,
					)
					.await;
			}
			Err(crate::consensus::Error::Terminated) => {
				return self.error_response(RpcError::NoLeader);
			}
		};

		let Some((index, outcome)) = applied.into_iter().next() else {
			return self.error_response(RpcError::NoLeader);
		};

		let payload = match outcome {
			ApplyOutcome::Ok => match session_id {
				Some(id) => Ok(ResponsePayload::SessionId(id)),
				None => Ok(ResponsePayload::Applied { index }),
			},
			ApplyOutcome::Bool(ok) => {
				Ok(ResponsePayload::Verdict { ok, index })
			}
			ApplyOutcome::Rejected(violation) => {
				Err(RpcError::Consistency(violation.to_string()))
			}
		};

		RpcResponse {
			meta: self.meta(index),
			payload,
		}
	}

	/// Reads serve locally when permitted by the consistency mode,
	/// blocking on the watch set first when the caller asked to.
	async fn serve_read(&self, request: RpcRequest) -> RpcResponse {
		let options = &request.options;
		let status = self.consensus().status();

		if options.require_consistent || !options.allow_stale {
			// leader-only modes
			if !status.is_leader() {
				return self
					.forward_to_leader(request.clone(), status.leader)
					.await;
			}

			if options.require_consistent && !status.ready {
				// a freshly elected leader serves consistent reads only
				// after its no-op barrier commits; push one through and
				// wait for it
				if self.consensus().barrier().await.is_err() {
					return self.error_response(RpcError::NoLeader);
				}
			}
		} else {
			// stale mode: anyone may answer, bounded by max_stale
			let max_stale =
				options.max_stale.unwrap_or(DEFAULT_MAX_STALE);
			let too_stale = !status.is_leader()
				&& status
					.last_contact_age()
					.is_none_or(|age| age > max_stale);
			if too_stale {
				return self.error_response(RpcError::NoLeader);
			}
		}

		// blocking: park on the watch set until the state outruns the
		// caller's index or the clipped wait fires
		if let Some(min_index) = options.min_query_index {
			let tables = request.payload.watch_tables();
			let deadline = clipped_wait(
				options.max_query_time,
				self.inner.config.default_query_time,
				self.inner.config.max_query_time,
			);
			self
				.inner
				.store
				.watch()
				.wait_any(tables, min_index, deadline)
				.await;
		}

		let snapshot = self.inner.store.snapshot();
		let payload = endpoints::evaluate(
			&request.payload,
			&snapshot,
			&self.inner.datacenter,
		);

		let index = {
			let tables = request.payload.watch_tables();
			if tables.is_empty() {
				snapshot.last_index
			} else {
				snapshot.index_of(tables)
			}
		};

		RpcResponse {
			meta: self.meta(index),
			payload,
		}
	}

	/// Forwards a request to the current leader over the LAN.
	async fn forward_to_leader(
		&self,
		request: RpcRequest,
		leader: Option<NodeId>,
	) -> RpcResponse {
		let Some(leader) = leader else {
			return self.error_response(RpcError::NoLeader);
		};
		let Some(member) = self.inner.lan.get(&leader) else {
			return self.error_response(RpcError::NoLeader);
		};

		let datacenter = self.inner.datacenter.clone();
		match self.exchange(&datacenter, member.address, request).await {
			Ok(response) => response,
			Err(e) => {
				tracing::debug!(error = %e, "leader forward failed");
				self.error_response(RpcError::NoLeader)
			}
		}
	}

	/// Forwards a request to a remote datacenter via its WAN-known
	/// servers, retrying over distinct servers on transient failure.
	async fn forward_to_datacenter(
		&self,
		request: RpcRequest,
	) -> RpcResponse {
		let dc = request.options.datacenter.clone();
		let Some(wan) = &self.inner.wan else {
			return self.error_response(RpcError::UnknownDatacenter(dc));
		};

		let mut servers: Vec<_> = wan
			.members()
			.into_iter()
			.filter(|m| m.datacenter == dc && m.is_reachable())
			.collect();
		if servers.is_empty() {
			return self.error_response(RpcError::UnknownDatacenter(dc));
		}

		servers.shuffle(&mut rand::rng());
		servers.retain(|server| {
			!self.inner.failed_servers.is_cooling(&server.node)
		});

		let mut last_error = None;
		for server in servers
			.into_iter()
			.take(self.inner.config.forward_retries.max(1))
		{
			match self
				.exchange(&dc, server.address.clone(), request.clone())
				.await
			{
				Ok(response) => return response,
				Err(e) => {
					self.inner.failed_servers.mark(server.node);
					self.inner.pool.evict(&dc, server.address.id);
					last_error = Some(e);
				}
			}
		}

		self.error_response(RpcError::NoServers(
			last_error
				.map(|e| e.to_string())
				.unwrap_or_else(|| "all servers cooling down".to_string()),
		))
	}

	/// One request/response exchange over a pooled connection.
	async fn exchange(
		&self,
		datacenter: &str,
		address: EndpointAddr,
		request: RpcRequest,
	) -> Result<RpcResponse, std::io::Error> {
		let mut link = self
			.inner
			.pool
			.open(datacenter, address, RPC_ALPN)
			.await
			.map_err(std::io::Error::other)?;

		link.send(&request).await?;
		let response: RpcResponse = link.recv().await?;
		let _ = link.finish().await;
		Ok(response)
	}

	fn meta(&self, index: crate::consensus::Index) -> QueryMeta {
		// clients never answer from local state; their meta is only seen
		// on forwarding failures
		let Some(consensus) = &self.inner.consensus else {
			return QueryMeta {
				index,
				last_contact: Duration::MAX,
				known_leader: false,
			};
		};

		let status = consensus.status();
		QueryMeta {
			index,
			last_contact: if status.is_leader() {
				Duration::ZERO
			} else {
				status.last_contact_age().unwrap_or(Duration::MAX)
			},
			known_leader: status.leader.is_some(),
		}
	}

	fn error_response(&self, error: RpcError) -> RpcResponse {
		RpcResponse {
			meta: self.meta(self.inner.store.last_index()),
			payload: Err(error),
		}
	}
}
