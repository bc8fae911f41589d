//! Leader-based replicated log with snapshots.
//!
//! One consensus group per datacenter, formed by the server agents. The
//! module is generic over the log [`Storage`] and the [`StateMachine`] it
//! drives; the agent wires it to the durable file store and the catalog
//! FSM, tests plug in in-memory stores and toy machines.
//!
//! Control flow: the [`Consensus`] handle talks to a long-running worker
//! task that owns the current [`role::Role`] and the log driver. Inbound
//! protocol messages are fed by the RPC layer through [`Consensus::deliver`];
//! outbound messages leave through the [`Outbound`] seam implemented by the
//! transport.

mod candidate;
mod config;
mod follower;
mod leader;
mod role;
mod shared;
mod worker;

pub mod log;
pub mod protocol;

pub use {
	config::{Config, ConfigBuilder},
	log::{Cursor, Index, Term},
	worker::bootstrap_voters,
};

use {
	crate::types::NodeId,
	log::{
		Driver,
		SnapshotStore,
		StateMachine,
		Storage,
	},
	protocol::Message,
	serde::{Deserialize, Serialize},
	std::{
		collections::BTreeSet,
		time::Instant,
	},
	tokio::sync::{mpsc, oneshot, watch},
	tokio_util::sync::CancellationToken,
};

/// Message egress seam: the transport implements this to carry consensus
/// messages to other servers of the datacenter. Sends are fire-and-forget;
/// loss is handled by the protocol's own retries (heartbeats, backtracking).
pub trait Outbound<C: log::Command>: Send + Sync + Unpin + 'static {
	fn send(&self, to: NodeId, message: Message<C>);
}

/// The servers participating in consensus: voters form quorums, read
/// replicas receive entries but never vote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
	pub voters: BTreeSet<NodeId>,
	pub replicas: BTreeSet<NodeId>,

	/// Set once the initial `bootstrap_expect` voter set has formed;
	/// afterwards membership changes only through committed autopilot
	/// entries.
	pub bootstrapped: bool,
}

/// Where this server currently stands in the consensus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
	Follower,
	Candidate,
	Leader,
}

/// Externally observable consensus status, published through a watch
/// channel after every worker turn.
#[derive(Debug, Clone)]
pub struct Status {
	pub role: RoleKind,
	pub term: Term,
	pub leader: Option<NodeId>,

	/// True on a leader whose election barrier has committed; consistent
	/// reads are only served while this holds.
	pub ready: bool,

	pub committed: Index,
	pub last_log: Cursor,

	/// When this server last heard from a valid leader (or, on a leader,
	/// from a voter quorum). Drives the `max_stale` guard.
	pub last_contact: Option<Instant>,

	pub voters: BTreeSet<NodeId>,
}

impl Default for Status {
	fn default() -> Self {
		Self {
			role: RoleKind::Follower,
			term: 0,
			leader: None,
			ready: false,
			committed: 0,
			last_log: Cursor::default(),
			last_contact: None,
			voters: BTreeSet::new(),
		}
	}
}

impl Status {
	pub const fn is_leader(&self) -> bool {
		matches!(self.role, RoleKind::Leader)
	}

	/// Age of the last leader contact, `None` when never heard from one.
	pub fn last_contact_age(&self) -> Option<std::time::Duration> {
		self.last_contact.map(|at| at.elapsed())
	}
}

/// Refusal to accept a log-mutating request on a non-leader, with a hint
/// at who the leader currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not the leader (current leader: {leader:?})")]
pub struct NotLeader {
	pub leader: Option<NodeId>,
}

/// Errors surfaced by the [`Consensus`] public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	NotLeader(#[from] NotLeader),

	#[error("consensus worker is terminated")]
	Terminated,
}

/// Public handle to the consensus worker. Cheap to clone.
pub struct Consensus<M: StateMachine> {
	api_tx: mpsc::Sender<worker::ApiCommand<M>>,
	inbound_tx: mpsc::Sender<(NodeId, Message<M::Command>)>,
	status: watch::Receiver<Status>,
}

impl<M: StateMachine> Clone for Consensus<M> {
	fn clone(&self) -> Self {
		Self {
			api_tx: self.api_tx.clone(),
			inbound_tx: self.inbound_tx.clone(),
			status: self.status.clone(),
		}
	}
}

impl<M: StateMachine> Consensus<M> {
	/// Spawns the consensus worker and returns the public handle.
	///
	/// `membership` is fed by bootstrap and by committed autopilot entries;
	/// `snapshots` is the durable snapshot store (`None` keeps snapshots in
	/// memory only, for tests and read replicas).
	pub fn spawn<S, O>(
		config: Config,
		local_id: NodeId,
		storage: S,
		machine: M,
		outbound: O,
		membership: watch::Receiver<Membership>,
		snapshots: Option<SnapshotStore>,
		cancel: CancellationToken,
	) -> Self
	where
		S: Storage<M::Command>,
		O: Outbound<M::Command>,
	{
		let (api_tx, api_rx) = mpsc::channel(64);
		let (inbound_tx, inbound_rx) = mpsc::channel(1024);
		let (status_tx, status_rx) = watch::channel(Status::default());

		let mut log = Driver::new(storage, machine);

		// resume from the newest usable snapshot
		if let Some(store) = &snapshots {
			match store.latest() {
				Ok(Some(meta)) => match store.read(&meta) {
					Ok(data) => {
						if let Err(e) =
							log.restore_snapshot(meta.position, &data)
						{
							tracing::warn!(
								position = %meta.position,
								error = %e,
								"snapshot restore failed, replaying full log",
							);
						}
					}
					Err(e) => {
						tracing::warn!(error = %e, "snapshot unreadable");
					}
				},
				Ok(None) => {}
				Err(e) => {
					tracing::warn!(error = %e, "snapshot store unreadable");
				}
			}
		}

		// entries persisted above the snapshot floor stay in the log but
		// are not applied yet; they re-commit once a leader re-establishes
		// the commit index (in a single-server cluster, immediately after
		// self-election)

		let shared = shared::Shared::new(
			config,
			local_id,
			log,
			outbound,
			membership.clone(),
			status_tx,
		);
		let role = role::Role::new(&shared);

		let worker = worker::Worker {
			shared,
			role,
			api_rx,
			inbound_rx,
			membership_rx: membership,
			snapshots,
			last_snapshot: Instant::now(),
			cancel,
		};

		tokio::spawn(worker.run());

		Self {
			api_tx,
			inbound_tx,
			status: status_rx,
		}
	}

	/// Proposes commands to the log. Leader only: resolves with the
	/// applied `(index, outcome)` pairs after majority replication, or
	/// refuses with a leader hint.
	pub async fn append(
		&self,
		commands: Vec<M::Command>,
	) -> Result<Vec<(Index, M::Outcome)>, Error> {
		let (reply, rx) = oneshot::channel();
		self
			.api_tx
			.send(worker::ApiCommand::Append { commands, reply })
			.await
			.map_err(|_| Error::Terminated)?;

		rx.await.map_err(|_| Error::Terminated)?.map_err(Error::from)
	}

	/// Appends and awaits a no-op barrier entry, returning its index. Used
	/// to establish that the local server is a functioning leader before a
	/// consistent read.
	pub async fn barrier(&self) -> Result<Index, Error> {
		let (reply, rx) = oneshot::channel();
		self
			.api_tx
			.send(worker::ApiCommand::Barrier { reply })
			.await
			.map_err(|_| Error::Terminated)?;

		rx.await.map_err(|_| Error::Terminated)?.map_err(Error::from)
	}

	/// Feeds an inbound protocol message from a remote server.
	pub fn deliver(&self, from: NodeId, message: Message<M::Command>) {
		if self.inbound_tx.try_send((from, message)).is_err() {
			// the worker is overloaded or gone; the protocol recovers
			// through retransmission
			tracing::trace!("dropping inbound consensus message");
		}
	}

	/// The current status snapshot.
	pub fn status(&self) -> Status {
		self.status.borrow().clone()
	}

	/// A watch receiver for status changes.
	pub fn watch_status(&self) -> watch::Receiver<Status> {
		self.status.clone()
	}

	/// Resolves once this server observes a leader (itself or a peer).
	pub async fn wait_for_leader(&self) -> Option<NodeId> {
		let mut status = self.status.clone();
		loop {
			if let Some(leader) = status.borrow_and_update().leader {
				return Some(leader);
			}
			if status.changed().await.is_err() {
				return None;
			}
		}
	}
}
