use {
	super::{
		Membership,
		Outbound,
		leader::AckReply,
		log::{SnapshotStore, StateMachine, Storage},
		protocol::Message,
		role::Role,
		shared::Shared,
	},
	crate::types::NodeId,
	core::future::poll_fn,
	std::time::Instant,
	tokio::sync::{mpsc, oneshot, watch},
	tokio_util::sync::CancellationToken,
};

/// API requests from the [`super::Consensus`] handle to the worker task.
pub(super) enum ApiCommand<M: StateMachine> {
	/// Append commands (leader only) and resolve with the applied
	/// outcomes.
	Append {
		commands: Vec<M::Command>,
		reply: oneshot::Sender<
			Result<Vec<(super::Index, M::Outcome)>, super::NotLeader>,
		>,
	},

	/// Append a no-op barrier (leader only) and resolve with its committed
	/// index.
	Barrier {
		reply: oneshot::Sender<Result<super::Index, super::NotLeader>>,
	},
}

/// The long-running worker that owns the log, the state machine and the
/// current role, and drives the consensus protocol.
pub(super) struct Worker<S, M, O>
where
	S: Storage<M::Command>,
	M: StateMachine,
	O: Outbound<M::Command>,
{
	pub shared: Shared<S, M, O>,
	pub role: Role<M>,
	pub api_rx: mpsc::Receiver<ApiCommand<M>>,
	pub inbound_rx: mpsc::Receiver<(NodeId, Message<M::Command>)>,
	/// Separate clone of the membership receiver used only for change
	/// detection, so the select arms borrow disjoint fields.
	pub membership_rx: watch::Receiver<Membership>,
	pub snapshots: Option<SnapshotStore>,
	pub last_snapshot: Instant,
	pub cancel: CancellationToken,
}

impl<S, M, O> Worker<S, M, O>
where
	S: Storage<M::Command>,
	M: StateMachine,
	O: Outbound<M::Command>,
{
	pub async fn run(mut self) {
		// surface the initial status before the first event
		self.publish();

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => {
					tracing::debug!("consensus worker terminated");
					return;
				}

				Some(command) = self.api_rx.recv() => {
					self.on_api_command(command);
				}

				Some((from, message)) = self.inbound_rx.recv() => {
					self.role.receive(message, from, &mut self.shared);
					self.after_turn();
				}

				_ = poll_fn(|cx| {
					self.role.poll_next_tick(cx, &mut self.shared)
				}) => {
					self.after_turn();
				}

				changed = self.membership_rx.changed() => {
					if changed.is_err() {
						return;
					}
					// membership changed (bootstrap completed or autopilot
					// reconfigured the voters); surface it to observers
					self.after_turn();
				}
			}
		}
	}

	fn on_api_command(&mut self, command: ApiCommand<M>) {
		match command {
			ApiCommand::Append { commands, reply } => {
				self.role.append(
					commands,
					AckReply::Applied(reply),
					&mut self.shared,
				);
			}
			ApiCommand::Barrier { reply } => {
				self.role.append(
					vec![M::barrier_command()],
					AckReply::Committed(reply),
					&mut self.shared,
				);
			}
		}
		self.after_turn();
	}

	/// Housekeeping after every role turn: publish status and take a
	/// snapshot when the log has grown past the threshold or the interval
	/// elapsed.
	fn after_turn(&mut self) {
		self.maybe_snapshot();
		self.publish();
	}

	fn publish(&mut self) {
		self.shared.publish_status(
			self.role.kind(),
			self.role.term(),
			self.role.leader(&self.shared),
			self.role.is_ready(&self.shared),
		);
	}

	fn maybe_snapshot(&mut self) {
		let due_by_size = self.shared.log.uncompacted()
			>= self.shared.config.snapshot_threshold;
		let due_by_time =
			self.last_snapshot.elapsed() >= self.shared.config.snapshot_interval;

		if self.shared.log.committed() == 0 || (!due_by_size && !due_by_time) {
			return;
		}
		// time-based snapshots are pointless while nothing new committed
		if !due_by_size && self.shared.log.uncompacted() == 0 {
			self.last_snapshot = Instant::now();
			return;
		}

		let (position, data) = self.shared.log.take_snapshot();
		self.last_snapshot = Instant::now();

		if let Some(store) = &self.snapshots {
			if let Err(e) = store.write(position, &data) {
				tracing::warn!(
					position = %position,
					error = %e,
					"failed to persist snapshot",
				);
				return;
			}
		}

		self.shared.log.compact_to(position);
		tracing::debug!(position = %position, "snapshot taken, log compacted");
	}
}

/// Watches a membership receiver and resolves once `bootstrap_expect`
/// voters are known, turning the initial server set into the voter set.
///
/// This is the bootstrap path: every server starts with an empty voter set
/// (elections suppressed) and an agent-level task feeds discovered server
/// peers into the membership sender until the expected count is reached.
pub fn bootstrap_voters(
	sender: &watch::Sender<Membership>,
	discovered: impl IntoIterator<Item = NodeId>,
	expect: usize,
) -> bool {
	let mut changed = false;
	sender.send_if_modified(|membership| {
		if membership.bootstrapped {
			return false;
		}

		for id in discovered {
			changed |= membership.voters.insert(id);
		}

		if membership.voters.len() >= expect && expect > 0 {
			membership.bootstrapped = true;
			changed = true;
		}
		changed
	});

	sender.borrow().bootstrapped
}
