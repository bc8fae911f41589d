use {
	super::{
		Membership,
		Outbound,
		RoleKind,
		Status,
		config::Config,
		log::{self, StateMachine, Term},
		protocol::Message,
	},
	crate::{primitives::Short, types::NodeId},
	std::time::Instant,
	tokio::sync::watch,
};

/// State that is shared across all consensus roles.
pub struct Shared<S, M, O>
where
	S: log::Storage<M::Command>,
	M: StateMachine,
	O: Outbound<M::Command>,
{
	/// Consensus timing and sizing options.
	pub config: Config,

	/// The local server's stable node id.
	pub local_id: NodeId,

	/// The persistent log and the state machine it drives.
	pub log: log::Driver<S, M>,

	/// Message egress towards other servers.
	pub outbound: O,

	/// The current voters/replicas view, produced by bootstrap and by
	/// committed autopilot entries.
	pub membership: watch::Receiver<Membership>,

	/// The last vote cast by the local node in leader elections.
	pub last_vote: Option<(Term, NodeId)>,

	/// Public status observers.
	status: watch::Sender<Status>,

	/// When a follower last heard from a valid leader. Backs the
	/// `max_stale` guard on stale reads.
	pub last_contact: Option<Instant>,
}

impl<S, M, O> Shared<S, M, O>
where
	S: log::Storage<M::Command>,
	M: StateMachine,
	O: Outbound<M::Command>,
{
	pub fn new(
		config: Config,
		local_id: NodeId,
		log: log::Driver<S, M>,
		outbound: O,
		membership: watch::Receiver<Membership>,
		status: watch::Sender<Status>,
	) -> Self {
		Self {
			config,
			local_id,
			log,
			outbound,
			membership,
			last_vote: None,
			status,
			last_contact: None,
		}
	}

	/// The current membership view.
	pub fn membership(&self) -> Membership {
		self.membership.borrow().clone()
	}

	/// Whether the local server is currently a voter.
	pub fn is_voter(&self) -> bool {
		self.membership.borrow().voters.contains(&self.local_id)
	}

	/// Sends a message to one server.
	pub fn send_to(&self, message: Message<M::Command>, to: NodeId) {
		self.outbound.send(to, message);
	}

	/// Sends a message to every other voter and replica. Returns the
	/// recipients.
	pub fn broadcast(&self, message: Message<M::Command>) -> Vec<NodeId> {
		let membership = self.membership();
		let recipients: Vec<NodeId> = membership
			.voters
			.iter()
			.chain(membership.replicas.iter())
			.filter(|id| **id != self.local_id)
			.copied()
			.collect();

		for id in &recipients {
			self.outbound.send(*id, message.clone());
		}
		recipients
	}

	/// Publishes the externally observable status.
	pub fn publish_status(
		&self,
		role: RoleKind,
		term: Term,
		leader: Option<NodeId>,
		ready: bool,
	) {
		let status = Status {
			role,
			term,
			leader,
			ready,
			committed: self.log.committed(),
			last_log: self.log.last(),
			last_contact: self.last_contact,
			voters: self.membership.borrow().voters.clone(),
		};
		self.status.send_replace(status);
	}

	/// Called when we receive a `RequestVote` from a candidate. Checks
	/// whether we already promised our vote to someone else this term.
	pub fn should_vote(&self, term: Term, candidate: NodeId) -> bool {
		let Some((last_term, last_candidate)) = self.last_vote else {
			return true;
		};

		if last_term < term {
			return true;
		}

		// re-affirming the same candidate in the same term is not
		// equivocation
		last_term == term && last_candidate == candidate
	}

	/// Records a cast vote so we never vote for two candidates in one term.
	pub fn cast_vote(&mut self, term: Term, candidate: NodeId) {
		self.last_vote = Some((term, candidate));

		tracing::debug!(
			candidate = %Short(candidate),
			term,
			"cast vote for leader",
		);
	}

	/// Quorum size over the current voters.
	pub fn quorum(&self) -> usize {
		(self.membership.borrow().voters.len() / 2) + 1
	}
}
