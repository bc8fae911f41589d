use {
	super::{
		NotLeader,
		Outbound,
		candidate::Candidate,
		log::{Index, StateMachine, Storage, Term},
		protocol::{
			AppendEntries,
			AppendEntriesResponse,
			InstallSnapshot,
			LogEntry,
			Message,
			Vote,
		},
		role::Role,
		shared::Shared,
	},
	crate::{primitives::Short, types::NodeId},
	core::{
		ops::RangeInclusive,
		pin::Pin,
		task::{Context, Poll},
		time::Duration,
	},
	std::{
		collections::{BTreeMap, HashMap, HashSet},
		time::Instant,
	},
	tokio::{
		sync::oneshot,
		time::{Sleep, sleep},
	},
};

/// In the leader role the node accepts log-mutating requests, replicates
/// entries to every voter and replica, advances the commit index once a
/// quorum of voters has acknowledged, and sends heartbeats when idle.
///
/// A freshly elected leader appends a no-op barrier entry in its own term;
/// until that barrier commits, the leader is not `ready` and consistent
/// reads are held off, which closes the stale-read window after an
/// election.
pub struct Leader<M: StateMachine> {
	/// The current term for this node.
	term: Term,

	/// Heartbeat cadence when no entries are being replicated.
	heartbeat_interval: Duration,
	heartbeat_timeout: Pin<Box<Sleep>>,

	/// Per-peer replication progress.
	replication: HashMap<NodeId, Progress>,

	/// Acknowledgements to resolve once their entries commit and apply.
	pending_acks: Vec<PendingAck<M>>,

	/// Outcomes of applied entries, buffered until the acknowledgement
	/// that covers them is resolved.
	outcomes: BTreeMap<Index, M::Outcome>,

	/// Index of the no-op barrier appended at election time.
	barrier_index: Index,

	/// Entries were appended since the last replication round.
	dirty: bool,

	/// Wakers for the worker task.
	wakers: Vec<std::task::Waker>,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
	/// Index of the next entry to send to this peer.
	next_index: Index,

	/// Highest index known to be replicated on this peer.
	match_index: Index,
}

/// One pending client acknowledgement covering a range of entries.
struct PendingAck<M: StateMachine> {
	range: RangeInclusive<Index>,
	reply: AckReply<M>,
}

pub(super) enum AckReply<M: StateMachine> {
	/// Resolve with the applied `(index, outcome)` pairs of the range.
	Applied(oneshot::Sender<Result<Vec<(Index, M::Outcome)>, NotLeader>>),

	/// Resolve with just the last committed index of the range.
	Committed(oneshot::Sender<Result<Index, NotLeader>>),
}

impl<M: StateMachine> Leader<M> {
	/// Transitions into the leader role for a new term, seeding replication
	/// progress and appending the barrier entry.
	pub fn new<S, O>(
		term: Term,
		voted_by: HashSet<NodeId>,
		shared: &mut Shared<S, M, O>,
	) -> Self
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let last = shared.log.last().index();
		let membership = shared.membership();
		let replication = membership
			.voters
			.iter()
			.chain(membership.replicas.iter())
			.filter(|id| **id != shared.local_id)
			.map(|id| {
				(*id, Progress {
					next_index: last + 1,
					match_index: if voted_by.contains(id) { last } else { 0 },
				})
			})
			.collect();

		let heartbeat_interval = shared.config.heartbeat_interval;

		tracing::info!(term, "elected leader");

		let mut leader = Self {
			term,
			heartbeat_interval,
			heartbeat_timeout: Box::pin(sleep(heartbeat_interval)),
			replication,
			pending_acks: Vec::new(),
			outcomes: BTreeMap::new(),
			barrier_index: 0,
			dirty: false,
			wakers: Vec::new(),
		};

		// the no-op barrier: committed reads are safe only once an entry
		// of our own term has been committed
		leader.barrier_index =
			shared.log.append(M::barrier_command(), term);
		leader.dirty = true;

		// a leader is always in contact with itself; in a single-server
		// cluster this is the only contact there is
		shared.last_contact = Some(Instant::now());

		leader
	}

	pub const fn term(&self) -> Term {
		self.term
	}

	/// Whether the election barrier has committed and consistent reads may
	/// be served.
	pub fn is_ready<S, O>(&self, shared: &Shared<S, M, O>) -> bool
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		shared.log.committed() >= self.barrier_index
	}

	/// Appends client commands to the log and registers the reply to be
	/// resolved once they commit and apply.
	pub fn append<S, O>(
		&mut self,
		commands: Vec<M::Command>,
		reply: AckReply<M>,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		if commands.is_empty() {
			// nothing to append; resolve against the current commit state
			let index = shared.log.committed();
			match reply {
				AckReply::Applied(tx) => {
					let _ = tx.send(Ok(Vec::new()));
				}
				AckReply::Committed(tx) => {
					let _ = tx.send(Ok(index));
				}
			}
			return;
		}

		let first = shared.log.last().index() + 1;
		let mut last = first;
		for command in commands {
			last = shared.log.append(command, self.term);
		}

		self.pending_acks.push(PendingAck {
			range: first..=last,
			reply,
		});
		self.dirty = true;

		for waker in self.wakers.drain(..) {
			waker.wake();
		}

		// in a single-voter cluster there is nobody to wait for
		self.advance_commit(shared);
	}

	/// Drives replication: sends new entries when dirty, heartbeats when
	/// idle.
	pub fn poll_next_tick<S, O>(
		&mut self,
		cx: &mut Context<'_>,
		shared: &mut Shared<S, M, O>,
	) -> Poll<core::ops::ControlFlow<Role<M>>>
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		if self.dirty {
			self.dirty = false;
			self.replicate_all(shared);
			self.reset_heartbeat();
			return Poll::Ready(core::ops::ControlFlow::Continue(()));
		}

		if self.heartbeat_timeout.as_mut().poll(cx).is_ready() {
			self.replicate_all(shared);
			self.reset_heartbeat();
			return Poll::Ready(core::ops::ControlFlow::Continue(()));
		}

		self.wakers.push(cx.waker().clone());
		Poll::Pending
	}

	/// As a leader we track `AppendEntriesResponse` and
	/// `InstallSnapshotResponse` progress reports. A rival `AppendEntries`
	/// of our own term means a partitioned twin: start a fresh election
	/// with a higher term.
	pub fn receive<S, O>(
		&mut self,
		message: Message<M::Command>,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) -> Option<Role<M>>
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		match message {
			Message::AppendEntriesResponse(response) => {
				self.on_ack(response, sender, shared);
			}

			Message::InstallSnapshotResponse(_, last_log_index) => {
				let progress =
					self.replication.entry(sender).or_insert(Progress {
						next_index: 1,
						match_index: 0,
					});
				progress.match_index = last_log_index;
				progress.next_index = last_log_index + 1;
				self.advance_commit(shared);
			}

			Message::AppendEntries(request) if request.term == self.term => {
				tracing::warn!(
					term = self.term,
					rival = %Short(sender),
					"rival leader detected, starting new election",
				);
				return Some(Candidate::new(self.term + 1, shared).into());
			}

			message => {
				tracing::trace!(
					term = self.term,
					sender = %Short(sender),
					"unexpected message in leader role: {message}",
				);
			}
		}

		None
	}

	fn on_ack<S, O>(
		&mut self,
		response: AppendEntriesResponse,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let first_index = shared.log.first_index();
		let Some(progress) = self.replication.get_mut(&sender) else {
			return;
		};

		match response.vote {
			Vote::Granted => {
				progress.match_index =
					progress.match_index.max(response.last_log_index);
				progress.next_index = progress.match_index + 1;

				if shared.membership.borrow().voters.contains(&sender) {
					shared.last_contact = Some(Instant::now());
				}

				self.advance_commit(shared);
			}

			Vote::Abstained => {
				// the follower's log does not line up; back up next_index
				// using its hint and resend from there
				let hint = response.last_log_index + 1;
				progress.next_index =
					progress.next_index.saturating_sub(1).min(hint).max(1);

				if progress.next_index < first_index {
					self.send_snapshot(sender, shared);
				} else {
					self.replicate_to(sender, shared);
				}
			}

			Vote::Denied => {
				// role-level step-down handles higher terms; a denial at
				// our own term is just noise
				tracing::trace!(
					peer = %Short(sender),
					"append entries denied",
				);
			}
		}
	}

	/// Advances the commit index to the highest entry replicated on a
	/// quorum of voters, applies the newly committed entries, and resolves
	/// acknowledgements. Only entries of the current term are committed by
	/// counting (earlier-term entries commit transitively).
	fn advance_commit<S, O>(&mut self, shared: &mut Shared<S, M, O>)
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let membership = shared.membership.borrow().clone();
		let mut indices: Vec<Index> = membership
			.voters
			.iter()
			.map(|id| {
				if *id == shared.local_id {
					shared.log.last().index()
				} else {
					self
						.replication
						.get(id)
						.map(|p| p.match_index)
						.unwrap_or(0)
				}
			})
			.collect();

		if indices.is_empty() {
			return;
		}

		indices.sort_unstable();
		let quorum = (indices.len() / 2) + 1;
		let quorum_index = indices[indices.len() - quorum];

		if quorum_index <= shared.log.committed() {
			return;
		}

		// raft safety: only count a quorum for entries of our own term
		if shared.log.term_at(quorum_index) != Some(self.term) {
			return;
		}

		let applied = shared.log.commit_up_to(quorum_index);
		if !applied.is_empty() {
			tracing::trace!(
				committed_ix = shared.log.committed(),
				applied = applied.len(),
				term = self.term,
			);
		}

		for (index, outcome) in applied {
			self.outcomes.insert(index, outcome);
		}

		self.resolve_acks(shared.log.committed());
	}

	/// Resolves every pending acknowledgement fully covered by the commit
	/// index and prunes delivered outcomes.
	fn resolve_acks(&mut self, committed: Index) {
		let mut resolved = Vec::new();
		self.pending_acks.retain_mut(|ack| {
			if *ack.range.end() > committed {
				return true;
			}
			resolved.push((
				ack.range.clone(),
				std::mem::replace(
					&mut ack.reply,
					AckReply::Committed(oneshot::channel().0),
				),
			));
			false
		});

		for (range, reply) in resolved {
			match reply {
				AckReply::Applied(tx) => {
					let mut applied = Vec::new();
					for index in range {
						if let Some(outcome) = self.outcomes.remove(&index) {
							applied.push((index, outcome));
						}
					}
					let _ = tx.send(Ok(applied));
				}
				AckReply::Committed(tx) => {
					for index in range.clone() {
						self.outcomes.remove(&index);
					}
					let _ = tx.send(Ok(*range.end()));
				}
			}
		}

		// outcomes nobody is waiting for anymore (e.g. barrier entries)
		// must not accumulate
		let floor = self
			.pending_acks
			.iter()
			.map(|ack| *ack.range.start())
			.min()
			.unwrap_or(committed + 1);
		self.outcomes = self.outcomes.split_off(&floor);
	}

	/// Sends each peer the entries it is missing, or a plain heartbeat when
	/// it is up to date.
	fn replicate_all<S, O>(&mut self, shared: &mut Shared<S, M, O>)
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let membership = shared.membership.borrow().clone();
		let peers: Vec<NodeId> = membership
			.voters
			.iter()
			.chain(membership.replicas.iter())
			.filter(|id| **id != shared.local_id)
			.copied()
			.collect();

		for peer in peers {
			// newly discovered peers start from the end of our log
			self.replication.entry(peer).or_insert(Progress {
				next_index: shared.log.last().index() + 1,
				match_index: 0,
			});
			self.replicate_to(peer, shared);
		}

		// single-voter clusters commit on their own
		self.advance_commit(shared);
	}

	fn replicate_to<S, O>(&mut self, peer: NodeId, shared: &Shared<S, M, O>)
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let Some(progress) = self.replication.get(&peer) else {
			return;
		};

		if progress.next_index < shared.log.first_index() {
			self.send_snapshot(peer, shared);
			return;
		}

		let last = shared.log.last().index();
		let from = progress.next_index;
		let to = last.min(
			from.saturating_add(shared.config.max_append_entries as u64),
		);

		let prev_index = from - 1;
		let prev_term = shared.log.term_at(prev_index).unwrap_or(0);

		let entries = shared
			.log
			.get_range(from..to + 1)
			.map(|(term, _, command)| LogEntry { term, command })
			.collect();

		shared.send_to(
			Message::AppendEntries(AppendEntries {
				term: self.term,
				leader: shared.local_id,
				prev_log_position: (prev_term, prev_index).into(),
				entries,
				leader_commit: shared.log.committed(),
			}),
			peer,
		);
	}

	/// Ships a full snapshot to a peer that has fallen below the log's
	/// compaction floor.
	fn send_snapshot<S, O>(&self, peer: NodeId, shared: &Shared<S, M, O>)
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let (position, data) = shared.log.take_snapshot();

		tracing::debug!(
			peer = %Short(peer),
			position = %position,
			"shipping snapshot to lagging follower",
		);

		shared.send_to(
			Message::InstallSnapshot(InstallSnapshot {
				term: self.term,
				leader: shared.local_id,
				position,
				data,
			}),
			peer,
		);
	}

	fn reset_heartbeat(&mut self) {
		let next = Instant::now() + self.heartbeat_interval;
		self.heartbeat_timeout.as_mut().reset(next.into());

		for waker in self.wakers.drain(..) {
			waker.wake();
		}
	}
}
