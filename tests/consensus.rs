//! Consensus behavior with an in-process message bus: single-server
//! bootstrap, replication, rolling leader loss.

mod utils;

use {
	bytes::Bytes,
	meridian::{
		consensus::{
			Config,
			Consensus,
			Index,
			Membership,
			Outbound,
			log::{InMemoryLogStore, RestoreError, StateMachine},
			protocol::Message,
		},
		types::NodeId,
	},
	parking_lot::Mutex,
	serde::{Deserialize, Serialize},
	std::{
		collections::{BTreeSet, HashMap},
		sync::Arc,
	},
	tokio::sync::watch,
	tokio_util::sync::CancellationToken,
	utils::timeout_s,
	uuid::Uuid,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Command {
	Barrier,
	Record(u64),
}

/// A ledger of applied values, shared out so tests can inspect each
/// server's state machine.
struct Ledger {
	applied: Arc<Mutex<Vec<(Index, u64)>>>,
}

impl Ledger {
	fn new() -> (Self, Arc<Mutex<Vec<(Index, u64)>>>) {
		let applied = Arc::new(Mutex::new(Vec::new()));
		(
			Self {
				applied: Arc::clone(&applied),
			},
			applied,
		)
	}
}

impl StateMachine for Ledger {
	type Command = Command;
	type Outcome = ();

	fn barrier_command() -> Command {
		Command::Barrier
	}

	fn apply(&mut self, index: Index, command: Command) {
		if let Command::Record(value) = command {
			self.applied.lock().push((index, value));
		}
	}

	fn snapshot(&self) -> Bytes {
		postcard::to_allocvec(&*self.applied.lock())
			.expect("ledger serializes")
			.into()
	}

	fn restore(
		&mut self,
		_index: Index,
		data: &[u8],
	) -> Result<(), RestoreError> {
		*self.applied.lock() = postcard::from_bytes(data)
			.map_err(|e| RestoreError::Decode(e.to_string()))?;
		Ok(())
	}
}

/// Routes consensus messages between in-process servers.
#[derive(Default)]
struct Bus {
	peers: Mutex<HashMap<NodeId, Consensus<Ledger>>>,
}

struct BusOutbound {
	from: NodeId,
	bus: Arc<Bus>,
}

impl Outbound<Command> for BusOutbound {
	fn send(&self, to: NodeId, message: Message<Command>) {
		if let Some(peer) = self.bus.peers.lock().get(&to) {
			peer.deliver(self.from, message);
		}
	}
}

fn fast_config() -> Config {
	Config::builder()
		.with_heartbeat_interval(utils::millis(50))
		.with_election_timeout(utils::millis(150))
		.with_election_timeout_jitter(utils::millis(150))
		.with_leader_lease_timeout(utils::millis(25))
		.with_bootstrap_delay(utils::millis(100))
		.build()
		.unwrap()
}

struct TestServer {
	id: NodeId,
	consensus: Consensus<Ledger>,
	applied: Arc<Mutex<Vec<(Index, u64)>>>,
	cancel: CancellationToken,

	/// Keeps the membership channel alive for the server's lifetime.
	_membership: watch::Sender<Membership>,
}

fn spawn_cluster(
	bus: &Arc<Bus>,
	ids: &[NodeId],
) -> Vec<TestServer> {
	let voters: BTreeSet<NodeId> = ids.iter().copied().collect();
	let membership = Membership {
		voters,
		replicas: BTreeSet::new(),
		bootstrapped: true,
	};

	let servers: Vec<TestServer> = ids
		.iter()
		.map(|id| {
			let (machine, applied) = Ledger::new();
			let membership_tx = watch::Sender::new(membership.clone());
			let cancel = CancellationToken::new();

			let consensus = Consensus::spawn(
				fast_config(),
				*id,
				InMemoryLogStore::default(),
				machine,
				BusOutbound {
					from: *id,
					bus: Arc::clone(bus),
				},
				membership_tx.subscribe(),
				None,
				cancel.clone(),
			);

			TestServer {
				id: *id,
				consensus,
				applied,
				cancel,
				_membership: membership_tx,
			}
		})
		.collect();

	let mut peers = bus.peers.lock();
	for server in &servers {
		peers.insert(server.id, server.consensus.clone());
	}
	drop(peers);

	servers
}

#[tokio::test]
async fn single_server_elects_itself_and_applies() -> anyhow::Result<()> {
	let bus = Arc::new(Bus::default());
	let servers = spawn_cluster(&bus, &[Uuid::new_v4()]);
	let server = &servers[0];

	let leader = timeout_s(10, server.consensus.wait_for_leader()).await?;
	assert_eq!(leader, Some(server.id));

	let applied = timeout_s(
		10,
		server
			.consensus
			.append(vec![Command::Record(7), Command::Record(8)]),
	)
	.await??;
	assert_eq!(applied.len(), 2);

	let values: Vec<u64> =
		server.applied.lock().iter().map(|(_, v)| *v).collect();
	assert_eq!(values, vec![7, 8]);

	// the barrier has committed, so the leader serves consistent reads
	let status = server.consensus.status();
	assert!(status.is_leader());
	assert!(status.ready);
	assert!(status.committed >= 3);

	Ok(())
}

#[tokio::test]
async fn three_servers_replicate_and_survive_leader_loss()
-> anyhow::Result<()> {
	let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
	let bus = Arc::new(Bus::default());
	let servers = spawn_cluster(&bus, &ids);

	// a leader emerges
	let leader =
		timeout_s(15, servers[0].consensus.wait_for_leader())
			.await?
			.expect("a leader is elected");

	let leader_server = servers
		.iter()
		.find(|s| s.id == leader)
		.expect("leader is one of ours");

	// commit a batch through the leader
	let commands: Vec<Command> =
		(1..=5).map(Command::Record).collect();
	timeout_s(10, leader_server.consensus.append(commands)).await??;

	// every follower converges on the same applied values
	let expect: Vec<u64> = (1..=5).collect();
	for server in &servers {
		timeout_s(10, async {
			loop {
				let values: Vec<u64> = server
					.applied
					.lock()
					.iter()
					.map(|(_, v)| *v)
					.collect();
				if values == expect {
					return;
				}
				tokio::time::sleep(utils::millis(20)).await;
			}
		})
		.await?;
	}

	// kill the leader; the survivors elect a new one
	leader_server.cancel.cancel();
	bus.peers.lock().remove(&leader);

	let survivors: Vec<&TestServer> =
		servers.iter().filter(|s| s.id != leader).collect();

	let new_leader = timeout_s(15, async {
		loop {
			for server in &survivors {
				let status = server.consensus.status();
				if status.is_leader() && status.ready {
					return server.id;
				}
			}
			tokio::time::sleep(utils::millis(20)).await;
		}
	})
	.await?;
	assert_ne!(new_leader, leader);

	// no committed entry was lost, and the new leader accepts writes
	let new_leader_server = survivors
		.iter()
		.find(|s| s.id == new_leader)
		.expect("new leader is a survivor");

	timeout_s(
		10,
		new_leader_server.consensus.append(vec![Command::Record(6)]),
	)
	.await??;

	let values: Vec<u64> = new_leader_server
		.applied
		.lock()
		.iter()
		.map(|(_, v)| *v)
		.collect();
	assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);

	Ok(())
}
