use {
	crate::{
		consensus::{Consensus, Index, Membership, bootstrap_voters},
		fsm::{Fsm, LogEntry},
		gossip::{MemberRole, MemberState, Roster},
		state::Store,
		types::{CheckId, CheckStatus, NodeId, NodeName, SessionId},
	},
	core::time::Duration,
	std::{
		collections::{HashMap, VecDeque},
		time::Instant,
	},
	tokio::sync::watch,
	tokio_util::sync::CancellationToken,
};

#[derive(Debug, Clone)]
pub struct LeaderConfig {
	/// Number of servers that auto-form the initial voter set.
	pub bootstrap_expect: usize,

	/// Autopilot: remove failed voters automatically.
	pub cleanup_dead_servers: bool,

	/// Autopilot: never shrink the voter set below this.
	pub min_quorum: usize,

	/// Autopilot: a new server must be alive this long before promotion.
	pub server_stabilization_time: Duration,

	/// How long tombstones are retained before a reap entry is proposed.
	pub tombstone_ttl: Duration,
}

impl Default for LeaderConfig {
	fn default() -> Self {
		Self {
			bootstrap_expect: 1,
			cleanup_dead_servers: true,
			min_quorum: 1,
			server_stabilization_time: Duration::from_secs(10),
			tombstone_ttl: Duration::from_secs(900),
		}
	}
}

/// Housekeeping that runs on every server but acts only while this server
/// is the leader: session TTL expiry, session invalidation on critical
/// checks, deregistration of services critical for too long, tombstone
/// reaping, and the autopilot voter management. Also drives the one-shot
/// voter bootstrap on every server.
pub struct LeaderTasks {
	store: Store,
	consensus: Consensus<Fsm>,
	lan: Roster,
	membership_tx: watch::Sender<Membership>,
	config: LeaderConfig,
	cancel: CancellationToken,

	/// Session expiry bookkeeping: `(modify_index, deadline)` per session.
	/// A renewal bumps the modify index, which rearms the deadline.
	session_deadlines: HashMap<SessionId, (Index, Instant)>,

	/// When each currently critical check was first observed critical.
	critical_since: HashMap<(NodeName, CheckId), Instant>,

	/// When each server member was first observed alive.
	alive_since: HashMap<NodeId, Instant>,

	/// Store indices marked for tombstone reaping once their TTL passes.
	tombstone_marks: VecDeque<(Instant, Index)>,
}

impl LeaderTasks {
	pub fn new(
		store: Store,
		consensus: Consensus<Fsm>,
		lan: Roster,
		membership_tx: watch::Sender<Membership>,
		config: LeaderConfig,
		cancel: CancellationToken,
	) -> Self {
		Self {
			store,
			consensus,
			lan,
			membership_tx,
			config,
			cancel,
			session_deadlines: HashMap::new(),
			critical_since: HashMap::new(),
			alive_since: HashMap::new(),
			tombstone_marks: VecDeque::new(),
		}
	}

	pub async fn run(mut self) {
		let mut tick = tokio::time::interval(Duration::from_secs(1));
		tick.set_missed_tick_behavior(
			tokio::time::MissedTickBehavior::Delay,
		);

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => return,
				_ = tick.tick() => {}
			}

			self.maybe_bootstrap();

			if !self.consensus.status().is_leader() {
				// forget leader-local bookkeeping; a new term restarts
				// the clocks
				self.session_deadlines.clear();
				self.critical_since.clear();
				continue;
			}

			self.expire_sessions().await;
			self.reap_critical_services().await;
			self.reap_tombstones().await;
			self.autopilot().await;
		}
	}

	/// Forms the initial voter set once `bootstrap_expect` server peers
	/// are known. Runs on every server; the watch sender deduplicates.
	fn maybe_bootstrap(&mut self) {
		if self.membership_tx.borrow().bootstrapped {
			return;
		}

		let discovered: Vec<NodeId> = self
			.lan
			.members()
			.into_iter()
			.filter(|m| {
				m.role == MemberRole::Server
					&& m.state == MemberState::Alive
			})
			.map(|m| m.node)
			.collect();

		if bootstrap_voters(
			&self.membership_tx,
			discovered,
			self.config.bootstrap_expect,
		) {
			tracing::info!(
				expect = self.config.bootstrap_expect,
				"initial voter set formed",
			);
		}
	}

	/// Destroys sessions whose TTL lapsed without renewal and sessions
	/// gated by a check that went critical.
	async fn expire_sessions(&mut self) {
		let snapshot = self.store.snapshot();
		let now = Instant::now();
		let mut doomed = Vec::new();

		let live: Vec<SessionId> = snapshot
			.sessions
			.iter()
			.map(|(id, _)| *id)
			.collect();
		self
			.session_deadlines
			.retain(|id, _| live.contains(id));

		for (id, row) in snapshot.sessions.iter() {
			let session = &row.value;

			// a gating check going critical invalidates immediately
			let check_failed = session.checks.iter().any(|check_id| {
				snapshot
					.checks
					.get(&(session.node.clone(), check_id.clone()))
					.is_some_and(|c| c.value.status == CheckStatus::Critical)
			});
			if check_failed {
				doomed.push(*id);
				continue;
			}

			let Some(ttl) = session.ttl else { continue };
			// twice the TTL, leaving room for renewals in flight
			let grace = ttl * 2;

			match self.session_deadlines.get(id) {
				Some((seen_index, deadline)) => {
					if row.modify_index != *seen_index {
						// renewed; rearm
						self
							.session_deadlines
							.insert(*id, (row.modify_index, now + grace));
					} else if *deadline <= now {
						doomed.push(*id);
					}
				}
				None => {
					self
						.session_deadlines
						.insert(*id, (row.modify_index, now + grace));
				}
			}
		}

		for id in doomed {
			tracing::debug!(session = %id, "invalidating session");
			self.session_deadlines.remove(&id);
			let _ = self
				.consensus
				.append(vec![LogEntry::SessionDestroy { id }])
				.await;
		}
	}

	/// Deregisters services whose check has been critical longer than its
	/// configured threshold.
	async fn reap_critical_services(&mut self) {
		let snapshot = self.store.snapshot();
		let now = Instant::now();
		let mut reap = Vec::new();

		// prune bookkeeping for checks that recovered or vanished
		self.critical_since.retain(|(node, check_id), _| {
			snapshot
				.checks
				.get(&(node.clone(), check_id.clone()))
				.is_some_and(|c| c.value.status == CheckStatus::Critical)
		});

		for ((node, check_id), row) in snapshot.checks.iter() {
			let check = &row.value;
			if check.status != CheckStatus::Critical {
				continue;
			}
			let Some(threshold) = check.deregister_critical_after else {
				continue;
			};
			let Some(service_id) = &check.service_id else {
				continue;
			};

			let since = self
				.critical_since
				.entry((node.clone(), check_id.clone()))
				.or_insert(now);

			if now.duration_since(*since) >= threshold {
				reap.push((node.clone(), service_id.clone()));
			}
		}

		for (node, service_id) in reap {
			tracing::info!(
				node = %node,
				service = %service_id,
				"deregistering service critical beyond its threshold",
			);
			let _ = self
				.consensus
				.append(vec![LogEntry::DeregisterService {
					node,
					service_id,
				}])
				.await;
		}
	}

	/// Proposes a tombstone reap for indices older than the tombstone
	/// TTL, so blocking queries around deletions stay observable for a
	/// while but the tables do not grow forever.
	async fn reap_tombstones(&mut self) {
		let now = Instant::now();
		let current = self.store.last_index();

		match self.tombstone_marks.back() {
			Some((_, index)) if *index == current => {}
			_ => self.tombstone_marks.push_back((now, current)),
		}

		let mut reap_before = None;
		while let Some((marked, index)) = self.tombstone_marks.front() {
			if now.duration_since(*marked) >= self.config.tombstone_ttl {
				reap_before = Some(*index);
				self.tombstone_marks.pop_front();
			} else {
				break;
			}
		}

		if let Some(before) = reap_before {
			let _ = self
				.consensus
				.append(vec![LogEntry::TombstoneReap { before }])
				.await;
		}
	}

	/// Voter-set management: promotes stabilized new servers, registers
	/// read replicas, and removes dead voters while a quorum margin
	/// remains.
	async fn autopilot(&mut self) {
		let membership = self.membership_tx.borrow().clone();
		if !membership.bootstrapped {
			return;
		}

		let mut desired = membership.clone();
		let now = Instant::now();

		for member in self.lan.members() {
			if !member.is_server() {
				continue;
			}

			match member.state {
				MemberState::Alive => {
					let since =
						self.alive_since.entry(member.node).or_insert(now);
					let stable = now.duration_since(*since)
						>= self.config.server_stabilization_time;

					match member.role {
						MemberRole::Server => {
							if stable
								&& !desired.voters.contains(&member.node)
							{
								desired.voters.insert(member.node);
								desired.replicas.remove(&member.node);
							}
						}
						MemberRole::Replica => {
							desired.replicas.insert(member.node);
						}
						MemberRole::Client => {}
					}
				}

				MemberState::Failed | MemberState::Left => {
					self.alive_since.remove(&member.node);
					desired.replicas.remove(&member.node);

					let removable = self.config.cleanup_dead_servers
						&& desired.voters.contains(&member.node)
						&& desired.voters.len() - 1
							>= self.config.min_quorum.max(1);
					if removable {
						tracing::info!(
							member = %member.name,
							"autopilot removing dead voter",
						);
						desired.voters.remove(&member.node);
					}
				}

				MemberState::Suspect => {}
			}
		}

		if desired != membership {
			let _ = self
				.consensus
				.append(vec![LogEntry::Autopilot {
					membership: desired,
				}])
				.await;
		}
	}
}
