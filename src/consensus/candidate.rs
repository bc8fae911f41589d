use {
	super::{
		Outbound,
		log::{StateMachine, Storage, Term},
		protocol::{Message, RequestVote, Vote},
		role::Role,
		shared::Shared,
	},
	crate::{primitives::Short, types::NodeId},
	core::{
		iter::once,
		ops::ControlFlow,
		pin::Pin,
		task::{Context, Poll},
	},
	std::collections::HashSet,
	tokio::time::{Sleep, sleep},
};

/// Internal state for the candidate role that is currently running an
/// election for its own leadership.
#[derive(Debug)]
pub struct Candidate {
	/// The term of this election round.
	term: Term,

	/// The voters from which votes have been requested.
	requested_from: HashSet<NodeId>,

	/// The voters that have granted their vote.
	votes_granted: HashSet<NodeId>,

	/// The timeout of this election round. If it elapses without reaching
	/// a quorum, a new round starts with a higher term.
	election_timeout: Pin<Box<Sleep>>,

	/// Wakers for the worker task, woken when a quorum is reached.
	wakers: Vec<std::task::Waker>,
}

impl Candidate {
	/// Starts an election for the given term by requesting votes from all
	/// other voters.
	pub fn new<S, M, O>(term: Term, shared: &mut Shared<S, M, O>) -> Self
	where
		S: Storage<M::Command>,
		M: StateMachine,
		O: Outbound<M::Command>,
	{
		assert_ne!(term, 0, "candidate role starts at term 1");

		let election_timeout =
			Box::pin(sleep(shared.config.random_election_timeout()));

		let candidate = shared.local_id;
		let request = RequestVote {
			term,
			candidate,
			log_position: shared.log.last(),
		};

		tracing::debug!(term, "starting new leader election");

		// only voters participate in elections
		let voters = shared.membership().voters;
		let mut requested_from = HashSet::new();
		for voter in voters {
			if voter != candidate {
				shared.send_to(Message::RequestVote(request.clone()), voter);
			}
			requested_from.insert(voter);
		}

		// we always vote for ourselves
		let votes_granted = once(candidate).collect();
		shared.cast_vote(term, candidate);

		Self {
			term,
			requested_from,
			votes_granted,
			election_timeout,
			wakers: Vec::new(),
		}
	}

	pub const fn term(&self) -> Term {
		self.term
	}

	/// As a candidate we wait for votes or for a leader of the same or a
	/// higher term to assert itself (handled in the shared role logic).
	/// Reaching a quorum transitions to leader; the timeout starts the
	/// next round.
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
		if self.has_quorum() {
			tracing::debug!(
				term = self.term,
				votes = self.votes_granted.len(),
				voters = self.requested_from.len(),
				"received quorum of votes, becoming leader",
			);

			return Poll::Ready(ControlFlow::Break(Role::lead(
				self.term,
				self.votes_granted.clone(),
				shared,
			)));
		}

		if self.election_timeout.as_mut().poll(cx).is_ready() {
			tracing::debug!(
				term = self.term,
				"election timeout elapsed without quorum, starting new election",
			);

			return Poll::Ready(ControlFlow::Break(
				Self::new(self.term + 1, shared).into(),
			));
		}

		self.wakers.push(cx.waker().clone());
		Poll::Pending
	}

	/// In candidate state we only expect `RequestVoteResponse` messages.
	pub fn receive<C: super::log::Command>(
		&mut self,
		message: Message<C>,
		sender: NodeId,
	) {
		let Message::RequestVoteResponse(response) = message else {
			tracing::trace!(
				peer = %Short(sender),
				"unexpected message type received in candidate state",
			);
			return;
		};

		if response.vote == Vote::Granted && self.grant(sender) {
			for waker in self.wakers.drain(..) {
				waker.wake();
			}
		}
	}

	/// Checks whether a quorum of voters has granted their vote.
	fn has_quorum(&self) -> bool {
		let quorum = (self.requested_from.len() / 2) + 1;
		self.votes_granted.len() >= quorum
	}

	/// Registers a granted vote and returns `true` once quorum is reached.
	fn grant(&mut self, voter: NodeId) -> bool {
		if self.requested_from.contains(&voter) {
			self.votes_granted.insert(voter);
		}
		self.has_quorum()
	}
}
