//! SWIM-style membership and failure detection.
//!
//! Each agent runs one LAN pool (its datacenter, one per segment) and
//! servers additionally run the WAN pool spanning all federated
//! datacenters. Probes, indirect probes and push-pull state exchanges ride
//! short-lived transport streams on the pool's ALPN; membership claims and
//! opaque user broadcasts piggyback on the probe traffic through a bounded
//! retransmit queue.
//!
//! Failure model: an unreachable peer becomes *suspect* first; suspicion
//! expires into *failed* after `suspicion_mult · log10(n + 1)` probe
//! intervals, so partitions produce false suspects, not false deaths. A
//! suspected node that observes its own suspicion refutes it by bumping
//! its incarnation.

mod broadcast;
mod config;
mod events;
mod member;
mod proto;
mod roster;

pub use {
	config::{Config, ConfigBuilder, PROTOCOL_VERSION, PoolScope},
	events::Events,
	member::{Member, MemberRole, MemberState},
	proto::{Bogus, Envelope, GossipMessage, Rumor},
	roster::{Applied, Event, Roster},
};

use {
	crate::{
		primitives::Short,
		transport::{Link, Transport, allowed},
	},
	broadcast::Broadcasts,
	bytes::Bytes,
	iroh::{
		EndpointAddr,
		endpoint::Connection,
		protocol::{AcceptError, ProtocolHandler},
	},
	parking_lot::Mutex,
	std::{
		collections::{HashMap, HashSet, VecDeque},
		sync::{
			Arc,
			atomic::{AtomicU64, Ordering},
		},
		time::Instant,
	},
	tokio::{
		sync::{broadcast as tokio_broadcast, mpsc, oneshot},
		task::{JoinHandle, JoinSet},
		time::interval,
	},
	tokio_util::sync::{CancellationToken, DropGuard},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("gossip pool is terminated")]
	Terminated,

	#[error("broadcast payload of {0} bytes exceeds the limit")]
	PayloadTooLarge(usize),

	#[error("no peer could be reached")]
	NoPeerReached,
}

/// One gossip pool instance.
///
/// Cheap to clone. Dropping the last clone aborts the pool's event loop.
pub struct Pool {
	shared: Arc<Shared>,
	cmd_tx: mpsc::Sender<Command>,
	_eventloop: Arc<JoinHandle<()>>,
	_abort: Arc<DropGuard>,
}

impl Clone for Pool {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
			cmd_tx: self.cmd_tx.clone(),
			_eventloop: Arc::clone(&self._eventloop),
			_abort: Arc::clone(&self._abort),
		}
	}
}

/// State shared between the pool handle, the event loop and the incoming
/// protocol handler.
struct Shared {
	transport: Transport,
	config: Config,
	alpn: Vec<u8>,
	roster: Roster,
	broadcasts: Mutex<Broadcasts>,
	user_tx: tokio_broadcast::Sender<Bytes>,
	seen: Mutex<SeenCache>,
	seq: AtomicU64,
}

enum Command {
	Join(Vec<EndpointAddr>, oneshot::Sender<Result<usize, Error>>),
	Leave(oneshot::Sender<()>),
}

/// Public API
impl Pool {
	pub fn new(
		transport: Transport,
		config: Config,
		local: Member,
		cancel: CancellationToken,
	) -> Self {
		let alpn = config.scope.alpn();
		let (user_tx, _) = tokio_broadcast::channel(64);
		let shared = Arc::new(Shared {
			roster: Roster::new(local),
			broadcasts: Mutex::new(Broadcasts::new(
				config.max_queued_broadcasts,
			)),
			user_tx,
			seen: Mutex::new(SeenCache::new(1024)),
			seq: AtomicU64::new(0),
			alpn,
			config,
			transport,
		});

		let (cmd_tx, cmd_rx) = mpsc::channel(16);
		let eventloop = EventLoop {
			shared: Arc::clone(&shared),
			commands: cmd_rx,
			suspicions: HashMap::new(),
			probes: JoinSet::new(),
			probe_ring: Vec::new(),
			cancel: cancel.clone(),
		};

		let eventloop = tokio::spawn(eventloop.run());

		Self {
			shared,
			cmd_tx,
			_eventloop: Arc::new(eventloop),
			_abort: Arc::new(cancel.drop_guard()),
		}
	}

	/// The membership view of this pool.
	pub fn roster(&self) -> &Roster {
		&self.shared.roster
	}

	/// Subscribes to membership change events.
	pub fn events(&self) -> Events {
		self.shared.roster.watch()
	}

	/// Subscribes to opaque user broadcasts received from peers.
	pub fn user_broadcasts(&self) -> tokio_broadcast::Receiver<Bytes> {
		self.shared.user_tx.subscribe()
	}

	/// The protocol handler to install on the transport router under
	/// [`Pool::alpn`].
	pub fn protocol(&self) -> PoolProtocol {
		PoolProtocol(Arc::clone(&self.shared))
	}

	/// The ALPN this pool's streams use.
	pub fn alpn(&self) -> &[u8] {
		&self.shared.alpn
	}

	/// Joins the pool by exchanging full state with the given peers.
	/// Returns the number of members learned.
	pub async fn join(
		&self,
		peers: Vec<EndpointAddr>,
	) -> Result<usize, Error> {
		let (tx, rx) = oneshot::channel();
		self
			.cmd_tx
			.send(Command::Join(peers, tx))
			.await
			.map_err(|_| Error::Terminated)?;
		rx.await.map_err(|_| Error::Terminated)?
	}

	/// Gracefully leaves the pool: broadcasts the departure and flushes it
	/// to a few peers before resolving.
	pub async fn leave(&self) {
		let (tx, rx) = oneshot::channel();
		if self.cmd_tx.send(Command::Leave(tx)).await.is_ok() {
			let _ = rx.await;
		}
	}

	/// Broadcasts an opaque payload to the pool, piggybacked on probe
	/// traffic.
	pub fn broadcast(&self, payload: Bytes) -> Result<(), Error> {
		if payload.len() > self.shared.config.max_user_payload {
			return Err(Error::PayloadTooLarge(payload.len()));
		}

		self.shared.seen.lock().insert(&payload);
		self
			.shared
			.broadcasts
			.lock()
			.enqueue(Rumor::User(payload));
		Ok(())
	}
}

/// Internal rumor handling shared by the event loop and the handler.
impl Shared {
	/// Merges a batch of incoming rumors; refutes suspicion of self.
	fn merge_rumors(&self, rumors: Vec<Rumor>) {
		for rumor in rumors {
			match rumor {
				Rumor::Member(member) => self.merge_member(member),
				Rumor::User(payload) => {
					// re-gossip unseen payloads and deliver them locally
					if self.seen.lock().insert(&payload) {
						self
							.broadcasts
							.lock()
							.enqueue(Rumor::User(payload.clone()));
						let _ = self.user_tx.send(payload);
					}
				}
			}
		}
	}

	fn merge_member(&self, member: Member) {
		if !self.address_allowed(&member) {
			self.roster.count_bogus();
			tracing::debug!(
				member = %member.name,
				"rejecting member with disallowed source address",
			);
			return;
		}

		match self.roster.apply(member.clone()) {
			Applied::Accepted => {
				// keep the claim spreading
				self.broadcasts.lock().enqueue(Rumor::Member(member));
			}
			Applied::Ignored => {}
			Applied::SelfRefute => self.refute(),
		}
	}

	/// Re-asserts the local node at a higher incarnation after observing
	/// itself suspected or declared dead.
	fn refute(&self) {
		let mut local = self.roster.local();
		local.incarnation += 1;
		local.state = MemberState::Alive;

		tracing::debug!(
			incarnation = local.incarnation,
			"refuting suspicion of local node",
		);

		self.roster.set_local(local.clone());
		self.broadcasts.lock().enqueue(Rumor::Member(local));
	}

	/// Join validation for advertised member addresses.
	fn address_allowed(&self, member: &Member) -> bool {
		if self.config.allowed_cidrs.is_empty() {
			return true;
		}
		member
			.address
			.ip_addrs()
			.all(|addr| allowed(&self.config.allowed_cidrs, addr.ip()))
	}

	/// Takes piggyback rumors for one outgoing frame.
	fn take_rumors(&self) -> Vec<Rumor> {
		let n = self.roster.len();
		self
			.broadcasts
			.lock()
			.take(8, self.config.retransmit_limit(n))
	}

	fn next_seq(&self) -> u64 {
		self.seq.fetch_add(1, Ordering::Relaxed)
	}

	fn envelope(&self, message: GossipMessage) -> Envelope {
		Envelope::new(self.config.cluster, message)
	}
}

/// The long-running pool event loop: periodic probing, suspicion expiry
/// and push-pull state synchronization.
struct EventLoop {
	shared: Arc<Shared>,
	commands: mpsc::Receiver<Command>,
	suspicions: HashMap<crate::types::NodeId, Instant>,
	probes: JoinSet<ProbeOutcome>,
	probe_ring: Vec<crate::types::NodeId>,
	cancel: CancellationToken,
}

struct ProbeOutcome {
	target: Member,
	reached: bool,
}

impl EventLoop {
	async fn run(mut self) {
		let mut gossip_tick = interval(self.shared.config.gossip_interval);
		let mut push_pull_tick =
			interval(self.shared.config.push_pull_interval);

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => {
					tracing::debug!("gossip event loop terminated");
					return;
				}

				_ = gossip_tick.tick() => {
					self.expire_suspicions();
					self.probe_next();
				}

				_ = push_pull_tick.tick() => {
					self.push_pull_random();
				}

				Some(outcome) = self.probes.join_next(),
					if !self.probes.is_empty() =>
				{
					if let Ok(outcome) = outcome {
						self.on_probe_outcome(outcome);
					}
				}

				Some(command) = self.commands.recv() => {
					self.on_command(command).await;
				}
			}
		}
	}

	/// Picks the next probe target round-robin over a shuffled ring, like
	/// the classic failure detector, so every member is probed within one
	/// full rotation.
	fn probe_next(&mut self) {
		let target = loop {
			let Some(node) = self.probe_ring.pop() else {
				// re-shuffle a fresh rotation
				use rand::seq::SliceRandom;
				let mut ring: Vec<_> = self
					.shared
					.roster
					.reachable()
					.into_iter()
					.map(|m| m.node)
					.collect();
				if ring.is_empty() {
					return;
				}
				ring.shuffle(&mut rand::rng());
				self.probe_ring = ring;
				continue;
			};

			// the ring may be stale; skip members that died since
			if let Some(member) = self.shared.roster.get(&node) {
				if member.is_reachable() {
					break member;
				}
			}
		};

		let shared = Arc::clone(&self.shared);
		self.probes.spawn(async move {
			let reached = probe(&shared, &target).await;
			ProbeOutcome { target, reached }
		});
	}

	fn on_probe_outcome(&mut self, outcome: ProbeOutcome) {
		if outcome.reached {
			self.suspicions.remove(&outcome.target.node);
			return;
		}

		// direct and indirect probes both failed: declare suspect and arm
		// the suspicion window
		let Some(mut member) = self.shared.roster.get(&outcome.target.node)
		else {
			return;
		};
		if member.state != MemberState::Alive {
			return;
		}

		member.state = MemberState::Suspect;
		tracing::info!(
			member = %member.name,
			node = %Short(member.node),
			"member is suspect after failed probes",
		);

		self.shared.merge_member(member);
		let window = self
			.shared
			.config
			.suspicion_window(self.shared.roster.len());
		self
			.suspicions
			.insert(outcome.target.node, Instant::now() + window);
	}

	/// Suspects whose window expired without refutation become failed.
	fn expire_suspicions(&mut self) {
		let now = Instant::now();
		let expired: Vec<_> = self
			.suspicions
			.iter()
			.filter(|(_, deadline)| **deadline <= now)
			.map(|(node, _)| *node)
			.collect();

		for node in expired {
			self.suspicions.remove(&node);

			let Some(mut member) = self.shared.roster.get(&node) else {
				continue;
			};
			if member.state != MemberState::Suspect {
				continue;
			}

			member.state = MemberState::Failed;
			tracing::warn!(
				member = %member.name,
				node = %Short(node),
				"suspicion window expired, member declared failed",
			);
			self.shared.merge_member(member);
		}
	}

	/// Full state exchange with one random peer.
	fn push_pull_random(&self) {
		let Some(peer) =
			self.shared.roster.random_reachable(1, &[]).pop()
		else {
			return;
		};

		let shared = Arc::clone(&self.shared);
		tokio::spawn(async move {
			if let Err(e) = push_pull(&shared, peer.address.clone()).await {
				tracing::debug!(
					peer = %peer.name,
					error = %e,
					"push-pull exchange failed",
				);
			}
		});
	}

	async fn on_command(&mut self, command: Command) {
		match command {
			Command::Join(peers, reply) => {
				let mut learned = 0usize;
				let mut any = false;
				for peer in peers {
					match push_pull(&self.shared, peer).await {
						Ok(count) => {
							any = true;
							learned += count;
						}
						Err(e) => {
							tracing::debug!(
								error = %e,
								"join exchange failed",
							);
						}
					}
				}

				let _ = reply.send(if any {
					Ok(learned)
				} else {
					Err(Error::NoPeerReached)
				});
			}

			Command::Leave(reply) => {
				let mut local = self.shared.roster.local();
				local.state = MemberState::Left;
				self.shared.roster.set_local(local.clone());
				self
					.shared
					.broadcasts
					.lock()
					.enqueue(Rumor::Member(local));

				// flush the departure to a handful of peers directly
				let peers = self
					.shared
					.roster
					.random_reachable(self.shared.config.gossip_nodes, &[]);
				for peer in peers {
					let _ = probe(&self.shared, &peer).await;
				}

				let _ = reply.send(());
			}
		}
	}
}

/// Probes a member: direct ping first, then `gossip_nodes` indirect
/// probes. Returns whether the member answered through any path.
async fn probe(shared: &Shared, target: &Member) -> bool {
	if direct_ping(shared, target).await {
		return true;
	}

	let relays = shared
		.roster
		.random_reachable(shared.config.gossip_nodes, &[target.node]);

	for relay in relays {
		if indirect_ping(shared, &relay, target).await {
			return true;
		}
	}

	false
}

async fn direct_ping(shared: &Shared, target: &Member) -> bool {
	let seq = shared.next_seq();
	let message = shared.envelope(GossipMessage::Ping {
		seq,
		from: shared.roster.local(),
		rumors: shared.take_rumors(),
	});

	let exchange = async {
		let mut link = shared
			.transport
			.connect(target.address.clone(), &shared.alpn)
			.await
			.ok()?;
		link.send(&message).await.ok()?;
		let reply: Envelope = link.recv().await.ok()?;
		reply.validate(&shared.config.cluster).ok()?;

		match reply.message {
			GossipMessage::Ack { seq: ack_seq, rumors }
				if ack_seq == seq =>
			{
				shared.merge_rumors(rumors);
				Some(())
			}
			_ => None,
		}
	};

	tokio::time::timeout(shared.config.probe_timeout, exchange)
		.await
		.ok()
		.flatten()
		.is_some()
}

async fn indirect_ping(
	shared: &Shared,
	relay: &Member,
	target: &Member,
) -> bool {
	let seq = shared.next_seq();
	let message = shared.envelope(GossipMessage::PingReq {
		seq,
		from: shared.roster.local(),
		target: target.clone(),
	});

	let exchange = async {
		let mut link = shared
			.transport
			.connect(relay.address.clone(), &shared.alpn)
			.await
			.ok()?;
		link.send(&message).await.ok()?;
		let reply: Envelope = link.recv().await.ok()?;
		reply.validate(&shared.config.cluster).ok()?;

		match reply.message {
			GossipMessage::PingReqAck { seq: ack_seq, reached }
				if ack_seq == seq =>
			{
				Some(reached)
			}
			_ => None,
		}
	};

	// the relay needs its own probe budget on top of ours
	tokio::time::timeout(shared.config.probe_timeout * 2, exchange)
		.await
		.ok()
		.flatten()
		.unwrap_or(false)
}

/// Full state exchange with one peer. Returns the number of members
/// merged from the peer's view.
async fn push_pull(
	shared: &Shared,
	peer: EndpointAddr,
) -> Result<usize, crate::transport::OpenError> {
	let mut link = shared.transport.connect(peer, &shared.alpn).await?;

	let message = shared.envelope(GossipMessage::PushPull {
		members: shared.roster.members(),
	});

	let count = async {
		link.send(&message).await.ok()?;
		let reply: Envelope = link.recv().await.ok()?;
		reply.validate(&shared.config.cluster).ok()?;

		match reply.message {
			GossipMessage::PushPull { members } => {
				let count = members.len();
				for member in members {
					shared.merge_member(member);
				}
				Some(count)
			}
			_ => None,
		}
	}
	.await
	.unwrap_or(0);

	Ok(count)
}

/// Handles incoming gossip streams on the pool's ALPN.
pub struct PoolProtocol(Arc<Shared>);

impl ProtocolHandler for PoolProtocol {
	fn accept(
		&self,
		connection: Connection,
	) -> impl Future<Output = Result<(), AcceptError>> + Send {
		let shared = Arc::clone(&self.0);
		let cancel = shared.transport.termination().child_token();

		async move {
			let mut link = Link::accept_with_cancel(connection, cancel)
				.await
				.map_err(AcceptError::from_err)?;

			while let Ok(envelope) = link.recv::<Envelope>().await {
				if let Err(bogus) =
					envelope.validate(&shared.config.cluster)
				{
					shared.roster.count_bogus();
					tracing::debug!(
						peer = %Short(link.remote_id()),
						reason = %bogus,
						"dropping bogus gossip frame",
					);
					break;
				}

				match envelope.message {
					GossipMessage::Ping { seq, from, rumors } => {
						shared.merge_member(from);
						shared.merge_rumors(rumors);

						let ack = shared.envelope(GossipMessage::Ack {
							seq,
							rumors: shared.take_rumors(),
						});
						if link.send(&ack).await.is_err() {
							break;
						}
					}

					GossipMessage::PingReq { seq, from, target } => {
						shared.merge_member(from);
						let reached = direct_ping(&shared, &target).await;
						let ack = shared.envelope(
							GossipMessage::PingReqAck { seq, reached },
						);
						if link.send(&ack).await.is_err() {
							break;
						}
					}

					GossipMessage::PushPull { members } => {
						for member in members {
							shared.merge_member(member);
						}
						let reply =
							shared.envelope(GossipMessage::PushPull {
								members: shared.roster.members(),
							});
						if link.send(&reply).await.is_err() {
							break;
						}
					}

					GossipMessage::Ack { .. }
					| GossipMessage::PingReqAck { .. } => {
						// acks arrive on the prober's own stream; on a
						// fresh inbound stream they are noise
					}
				}
			}

			Ok(())
		}
	}
}

impl core::fmt::Debug for PoolProtocol {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(
			f,
			"PoolProtocol({})",
			String::from_utf8_lossy(&self.0.alpn)
		)
	}
}

/// Bounded dedup cache for user broadcast payloads, so re-gossiped
/// payloads do not loop forever.
struct SeenCache {
	order: VecDeque<[u8; 32]>,
	set: HashSet<[u8; 32]>,
	capacity: usize,
}

impl SeenCache {
	fn new(capacity: usize) -> Self {
		Self {
			order: VecDeque::new(),
			set: HashSet::new(),
			capacity,
		}
	}

	/// Returns true if the payload was not seen before.
	fn insert(&mut self, payload: &[u8]) -> bool {
		let digest = *blake3::hash(payload).as_bytes();
		if !self.set.insert(digest) {
			return false;
		}

		self.order.push_back(digest);
		if self.order.len() > self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.set.remove(&oldest);
			}
		}
		true
	}
}
