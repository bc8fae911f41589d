use {
	super::{
		Outbound,
		RoleKind,
		candidate::Candidate,
		follower::Follower,
		leader::{AckReply, Leader},
		log::{StateMachine, Storage, Term},
		protocol::{Message, RequestVoteResponse, Vote},
		shared::Shared,
	},
	crate::{primitives::Short, types::NodeId},
	core::{
		fmt,
		ops::ControlFlow,
		task::{Context, Poll},
	},
	derive_more::From,
	std::collections::HashSet,
};

/// Consensus role: each server is always in exactly one of these states.
///
/// Depending on the currently assumed role, protocol messages are handled
/// differently and different periodic actions run (elections, heartbeats).
#[derive(From)]
pub enum Role<M: StateMachine> {
	/// Passive state: appends entries from the leader and answers vote
	/// requests. Converts to candidate when the election timeout elapses
	/// (voters only).
	Follower(Follower),

	/// Active state during elections: votes for itself and collects votes
	/// from the other voters.
	Candidate(Candidate),

	/// Active state as leader: accepts log-mutating requests, replicates
	/// entries, and sends heartbeats.
	Leader(Leader<M>),
}

impl<M: StateMachine> Role<M> {
	pub fn new<S, O>(shared: &Shared<S, M, O>) -> Self
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		Self::Follower(Follower::new(0, None, shared))
	}

	/// Builds the leader role after winning an election.
	pub fn lead<S, O>(
		term: Term,
		voted_by: HashSet<NodeId>,
		shared: &mut Shared<S, M, O>,
	) -> Self
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		Self::Leader(Leader::new(term, voted_by, shared))
	}

	pub const fn kind(&self) -> RoleKind {
		match self {
			Self::Follower(_) => RoleKind::Follower,
			Self::Candidate(_) => RoleKind::Candidate,
			Self::Leader(_) => RoleKind::Leader,
		}
	}

	pub const fn term(&self) -> Term {
		match self {
			Self::Follower(follower) => follower.term(),
			Self::Candidate(candidate) => candidate.term(),
			Self::Leader(leader) => leader.term(),
		}
	}

	/// The leader as known by the current role; the leader role reports
	/// the local server.
	pub fn leader<S, O>(&self, shared: &Shared<S, M, O>) -> Option<NodeId>
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		match self {
			Self::Follower(follower) => follower.leader(),
			Self::Candidate(_) => None,
			Self::Leader(_) => Some(shared.local_id),
		}
	}

	/// Whether consistent reads may be served right now: only on a leader
	/// whose election barrier has committed.
	pub fn is_ready<S, O>(&self, shared: &Shared<S, M, O>) -> bool
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		match self {
			Self::Leader(leader) => leader.is_ready(shared),
			_ => false,
		}
	}

	/// Routes an append to the leader role; other roles refuse with a
	/// leader hint.
	pub fn append<S, O>(
		&mut self,
		commands: Vec<M::Command>,
		reply: AckReply<M>,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		match self {
			Self::Leader(leader) => leader.append(commands, reply, shared),
			role => {
				let refuse = super::NotLeader {
					leader: role.leader(shared),
				};
				match reply {
					AckReply::Applied(tx) => {
						let _ = tx.send(Err(refuse));
					}
					AckReply::Committed(tx) => {
						let _ = tx.send(Err(refuse));
					}
				}
			}
		}
	}

	/// Drives the role-specific periodic actions (elections, heartbeats).
	pub fn poll_next_tick<S, O>(
		&mut self,
		cx: &mut Context<'_>,
		shared: &mut Shared<S, M, O>,
	) -> Poll<()>
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let next_step = match self {
			Self::Follower(follower) => follower.poll_next_tick(cx, shared),
			Self::Candidate(candidate) => candidate.poll_next_tick(cx, shared),
			Self::Leader(leader) => leader.poll_next_tick(cx, shared),
		};

		match next_step {
			Poll::Ready(next) => {
				if let ControlFlow::Break(next_role) = next {
					*self = next_role;
				}
				Poll::Ready(())
			}
			Poll::Pending => Poll::Pending,
		}
	}

	/// Handles incoming consensus messages. Behaviors common to all roles
	/// (stepping down on higher terms, casting votes) live here; the rest
	/// is delegated to the current role.
	pub fn receive<S, O>(
		&mut self,
		message: Message<M::Command>,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		if message.term() < self.term() {
			tracing::trace!(
				local_term = self.term(),
				message_term = message.term(),
				sender = %Short(sender),
				"ignoring stale message"
			);
			return;
		}

		// a higher term always demotes us to follower first
		self.maybe_step_down(&message, shared);

		// a candidate with a higher or equal term may be asking for our
		// vote
		if self.maybe_cast_vote(&message, sender, shared) {
			return;
		}

		match self {
			Self::Follower(follower) => {
				follower.receive(message, sender, shared);
			}
			Self::Candidate(candidate) => candidate.receive(message, sender),
			Self::Leader(leader) => {
				if let Some(next) = leader.receive(message, sender, shared) {
					*self = next;
				}
			}
		}
	}

	/// Steps down to follower when a message carries a higher term.
	fn maybe_step_down<S, O>(
		&mut self,
		message: &Message<M::Command>,
		shared: &Shared<S, M, O>,
	) where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		debug_assert!(message.term() >= self.term());

		if message.term() > self.term() {
			if let Some(leader) = message.leader() {
				tracing::debug!(
					leader = %Short(leader),
					old_term = self.term(),
					new_term = message.term(),
					"following",
				);
			} else {
				tracing::debug!(
					old_term = self.term(),
					new_term = message.term(),
					"stepping down to follower",
				);
			}

			*self =
				Follower::new(message.term(), message.leader(), shared).into();
		}
	}

	/// Decides whether to cast a vote for a candidate per the election
	/// rules. Returns true when the message was a `RequestVote` and has
	/// been fully handled.
	fn maybe_cast_vote<S, O>(
		&mut self,
		message: &Message<M::Command>,
		sender: NodeId,
		shared: &mut Shared<S, M, O>,
	) -> bool
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let Message::RequestVote(request) = message else {
			return false;
		};

		let deny = |shared: &Shared<S, M, O>| {
			shared.send_to(
				Message::RequestVoteResponse(RequestVoteResponse {
					term: request.term,
					vote: Vote::Denied,
				}),
				sender,
			);
		};

		if !shared.should_vote(request.term, request.candidate) {
			// already promised this term to someone else
			deny(shared);
			return true;
		}

		let ours = shared.log.last();
		if request.log_position.term() < ours.term()
			|| (request.log_position.term() == ours.term()
				&& request.log_position.index() < ours.index())
		{
			// the candidate's log is not as up to date as ours
			deny(shared);
			return true;
		}

		shared.cast_vote(request.term, request.candidate);
		shared.send_to(
			Message::RequestVoteResponse(RequestVoteResponse {
				term: request.term,
				vote: Vote::Granted,
			}),
			sender,
		);

		true
	}
}

impl<M: StateMachine> fmt::Display for Role<M> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Follower(_) => write!(f, "follower"),
			Self::Candidate(_) => write!(f, "candidate"),
			Self::Leader(_) => write!(f, "leader"),
		}
	}
}
