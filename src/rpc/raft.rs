//! Transport adapter for the consensus protocol: carries consensus
//! messages between the servers of one datacenter over their own ALPN.

use {
	crate::{
		consensus::{Consensus, Outbound, protocol::Message},
		fsm::{Fsm, LogEntry},
		gossip::Roster,
		primitives::Short,
		transport::{ConnectionPool, Link},
		types::NodeId,
	},
	iroh::{
		endpoint::Connection,
		protocol::{AcceptError, ProtocolHandler},
	},
	serde::{Deserialize, Serialize},
	std::sync::Arc,
};

/// ALPN of the consensus relay.
pub const RAFT_ALPN: &[u8] = b"/meridian/raft/1";

/// One consensus message on the wire, tagged with its sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftFrame {
	pub from: NodeId,
	pub message: Message<LogEntry>,
}

/// Consensus egress over pooled connections. Peer addresses are resolved
/// through the LAN roster at send time, so address changes propagate with
/// gossip and sends to departed members just drop.
pub struct RaftOutbound {
	inner: Arc<OutboundInner>,
}

struct OutboundInner {
	local_id: NodeId,
	datacenter: String,
	roster: Roster,
	pool: ConnectionPool,
}

impl RaftOutbound {
	pub fn new(
		local_id: NodeId,
		datacenter: String,
		roster: Roster,
		pool: ConnectionPool,
	) -> Self {
		Self {
			inner: Arc::new(OutboundInner {
				local_id,
				datacenter,
				roster,
				pool,
			}),
		}
	}
}

impl Outbound<LogEntry> for RaftOutbound {
	fn send(&self, to: NodeId, message: Message<LogEntry>) {
		let Some(member) = self.inner.roster.get(&to) else {
			tracing::trace!(
				peer = %Short(to),
				"dropping consensus message to unknown member",
			);
			return;
		};
		if !member.is_reachable() {
			return;
		}

		let inner = Arc::clone(&self.inner);
		let frame = RaftFrame {
			from: inner.local_id,
			message,
		};

		// fire and forget; the protocol recovers from loss through
		// heartbeats and backtracking
		tokio::spawn(async move {
			let result = async {
				let mut link = inner
					.pool
					.open(&inner.datacenter, member.address, RAFT_ALPN)
					.await
					.map_err(std::io::Error::other)?;
				link.send(&frame).await?;
				link.finish().await
			}
			.await;

			if let Err(e) = result {
				tracing::trace!(
					peer = %Short(to),
					error = %e,
					"consensus message send failed",
				);
			}
		});
	}
}

/// Handles inbound consensus streams and feeds them into the worker.
pub struct RaftProtocol {
	consensus: Consensus<Fsm>,
}

impl RaftProtocol {
	pub fn new(consensus: Consensus<Fsm>) -> Self {
		Self { consensus }
	}
}

impl ProtocolHandler for RaftProtocol {
	fn accept(
		&self,
		connection: Connection,
	) -> impl Future<Output = Result<(), AcceptError>> + Send {
		let consensus = self.consensus.clone();

		async move {
			let mut link = Link::accept(connection)
				.await
				.map_err(AcceptError::from_err)?;

			while let Ok(frame) = link.recv::<RaftFrame>().await {
				consensus.deliver(frame.from, frame.message);
			}

			Ok(())
		}
	}
}

impl core::fmt::Debug for RaftProtocol {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "RaftProtocol")
	}
}
