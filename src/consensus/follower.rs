use {
	super::{
		Outbound,
		candidate::Candidate,
		log::{StateMachine, Storage, Term},
		protocol::{
			AppendEntries,
			AppendEntriesResponse,
			InstallSnapshot,
			Message,
			Vote,
		},
		role::Role,
		shared::Shared,
	},
	crate::{primitives::Short, types::NodeId},
	core::{
		ops::ControlFlow,
		pin::Pin,
		task::{Context, Poll},
	},
	std::time::Instant,
	tokio::time::{Sleep, sleep},
};

/// In the follower role the node is passive: it appends entries replicated
/// by the leader, answers vote requests, and serves local reads. If the
/// election timeout elapses without hearing from a valid leader, a voting
/// follower transitions to candidate and starts an election; read replicas
/// and not-yet-bootstrapped servers just keep waiting.
#[derive(Debug)]
pub struct Follower {
	/// The current term for this node.
	term: Term,

	/// The leader this follower is following, if known.
	leader: Option<NodeId>,

	/// Election timeout; reset by every valid leader message.
	election_timeout: Pin<Box<Sleep>>,
}

impl Follower {
	pub fn new<S, M, O>(
		term: Term,
		leader: Option<NodeId>,
		shared: &Shared<S, M, O>,
	) -> Self
	where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		let mut election_timeout = shared.config.random_election_timeout();

		if term == 0 {
			// for the initial term, add a bootstrap delay so all peers get
			// a chance to start up and be discovered before the first
			// election fires
			election_timeout += shared.config.bootstrap_delay;
		}

		Self {
			term,
			leader,
			election_timeout: Box::pin(sleep(election_timeout)),
		}
	}

	pub const fn term(&self) -> Term {
		self.term
	}

	pub const fn leader(&self) -> Option<NodeId> {
		self.leader
	}

	/// Waits for leader traffic; on election timeout a voting follower
	/// becomes a candidate.
	pub fn poll_next_tick<S, M, O>(
		&mut self,
		cx: &mut Context<'_>,
		shared: &mut Shared<S, M, O>,
	) -> Poll<ControlFlow<Role<M>>>
	where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		if self.election_timeout.as_mut().poll(cx).is_ready() {
			if shared.is_voter() {
				return Poll::Ready(ControlFlow::Break(
					Candidate::new(self.term + 1, shared).into(),
				));
			}

			// non-voters (read replicas, servers still waiting for
			// bootstrap) never campaign; keep waiting for a leader
			let next = Instant::now() + shared.config.random_election_timeout();
			self.election_timeout.as_mut().reset(next.into());
			return Poll::Ready(ControlFlow::Continue(()));
		}

		Poll::Pending
	}

	/// In follower mode the role-specific messages are `AppendEntries` and
	/// `InstallSnapshot` from the leader; vote requests are handled in the
	/// logic shared by all roles.
	pub fn receive<S, M, O>(
		&mut self,
		message: Message<M::Command>,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		match message {
			Message::AppendEntries(request) => {
				self.on_append_entries(request, sender, shared);
			}
			Message::InstallSnapshot(snapshot) => {
				self.on_install_snapshot(snapshot, sender, shared);
			}
			message => {
				tracing::trace!(
					term = self.term,
					sender = %Short(sender),
					"unexpected message in follower role: {message}",
				);
			}
		}
	}

	/// Handles an incoming `AppendEntries` message from a leader.
	fn on_append_entries<S, M, O>(
		&mut self,
		request: AppendEntries<M::Command>,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		self.term = self.term.max(request.term);
		self.leader = Some(request.leader);
		self.touch(shared);

		// check the consistency of the message with our local log
		let prev = request.prev_log_position;
		let consistent = match shared.log.term_at(prev.index()) {
			// The entry at `prev` matches the leader's term. If the first
			// new entry conflicts with what we already have, the leader's
			// log wins: truncate from the conflict.
			Some(local_term) if local_term == prev.term() => {
				if let Some(first) = request.entries.first() {
					let next_index = prev.index() + 1;
					if let Some(existing) = shared.log.term_at(next_index) {
						if existing != first.term {
							shared.log.truncate(next_index);
						}
					}
				}
				true
			}

			// Term conflict at `prev`: that entry came from a deposed
			// leader. Truncate it and everything after it and abstain so
			// the leader backs up.
			Some(_) => {
				shared.log.truncate(prev.index());
				false
			}

			// No entry at `prev`: our log is behind the leader's.
			None => false,
		};

		if !consistent {
			shared.send_to(
				Message::AppendEntriesResponse(AppendEntriesResponse {
					term: self.term,
					vote: Vote::Abstained,
					last_log_index: shared.log.last().index(),
				}),
				sender,
			);
			return;
		}

		// append the leader's new entries, skipping any we already have
		// (idempotent redelivery)
		let start_index = prev.index() + 1;
		let mut appended = 0usize;
		for (i, entry) in request.entries.into_iter().enumerate() {
			let index = start_index + i as u64;
			if shared.log.term_at(index) == Some(entry.term) {
				continue;
			}
			shared.log.append(entry.command, entry.term);
			appended += 1;
		}

		// advance the local commit index to the minimum of the leader's
		// commit index and our own last entry
		let prev_committed = shared.log.committed();
		let target = request.leader_commit.min(shared.log.last().index());
		if prev_committed < target {
			// follower side has no pending acknowledgements; outcomes are
			// dropped
			let _ = shared.log.commit_up_to(target);
		}

		if appended > 0 || shared.log.committed() != prev_committed {
			tracing::trace!(
				committed_ix = shared.log.committed(),
				new_entries = appended,
				local_log = %shared.log.last(),
				term = self.term,
			);
		}

		shared.send_to(
			Message::AppendEntriesResponse(AppendEntriesResponse {
				term: self.term,
				vote: Vote::Granted,
				last_log_index: shared.log.last().index(),
			}),
			sender,
		);
	}

	/// Handles a complete snapshot transfer from the leader.
	fn on_install_snapshot<S, M, O>(
		&mut self,
		snapshot: InstallSnapshot,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		self.term = self.term.max(snapshot.term);
		self.leader = Some(snapshot.leader);
		self.touch(shared);

		if snapshot.position.index() <= shared.log.committed() {
			// stale snapshot; just report our progress
			shared.send_to(
				Message::InstallSnapshotResponse(
					self.term,
					shared.log.last().index(),
				),
				sender,
			);
			return;
		}

		match shared
			.log
			.install_snapshot(snapshot.position, &snapshot.data)
		{
			Ok(()) => {
				tracing::info!(
					position = %snapshot.position,
					"restored snapshot from leader",
				);
			}
			Err(e) => {
				tracing::warn!(
					position = %snapshot.position,
					error = %e,
					"failed to restore snapshot from leader",
				);
			}
		}

		shared.send_to(
			Message::InstallSnapshotResponse(
				self.term,
				shared.log.last().index(),
			),
			sender,
		);
	}

	/// Every valid leader message resets the election timeout and the
	/// stale-read reference point.
	fn touch<S, M, O>(&mut self, shared: &mut Shared<S, M, O>)
	where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		shared.last_contact = Some(Instant::now());
		let next = Instant::now() + shared.config.random_election_timeout();
		self.election_timeout.as_mut().reset(next.into());
	}
}
