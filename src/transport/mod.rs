//! The stream transport: a QUIC endpoint with ALPN-dispatched protocol
//! handlers, framed links, a per-`(datacenter, peer)` connection pool, and
//! source-address filtering. Streams are multiplexed and encrypted by the
//! transport itself; handshake timeouts and CIDR filters are enforced
//! here.

mod cidr;
mod link;
mod pool;

pub use {
	cidr::{Cidr, InvalidCidr, allowed},
	link::{CloseReason, Link, OpenError},
	pool::ConnectionPool,
};

use {
	core::{net::SocketAddr, time::Duration},
	iroh::{Endpoint, EndpointAddr, EndpointId, SecretKey},
	std::sync::Arc,
	tokio_util::sync::CancellationToken,
};

/// Transport-level options, resolved from the runtime configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
	/// Stable secret key; derives the endpoint identity. Persisted in the
	/// data directory so the identity survives restarts.
	pub secret_key: SecretKey,

	/// Local socket address to bind, `None` for an ephemeral port on all
	/// interfaces.
	pub bind_addr: Option<SocketAddr>,

	/// Budget for connection establishment and protocol handshakes.
	pub handshake_timeout: Duration,

	/// Pooled connections idle past this are closed.
	pub idle_timeout: Duration,

	/// Source addresses permitted to connect. Empty allows everything.
	pub allowed_cidrs: Vec<Cidr>,
}

impl TransportConfig {
	pub fn new(secret_key: SecretKey) -> Self {
		Self {
			secret_key,
			bind_addr: None,
			handshake_timeout: Duration::from_secs(5),
			idle_timeout: Duration::from_secs(120),
			allowed_cidrs: Vec::new(),
		}
	}
}

/// The local transport endpoint. Cheap to clone; all clones share the
/// underlying endpoint.
///
/// Notes:
///
/// - The endpoint identity is the public key of the configured secret key;
///   peers address each other by `(identity, socket addresses)` pairs and
///   connections authenticate both sides mutually.
///
/// - Incoming connections are routed to protocol handlers by ALPN; each
///   subsystem (gossip, rpc) registers its handler when the agent starts.
#[derive(Clone)]
pub struct Transport(Arc<Inner>);

struct Inner {
	endpoint: Endpoint,
	config: TransportConfig,
	termination: CancellationToken,
}

impl Transport {
	/// Binds the endpoint.
	pub async fn bind(
		config: TransportConfig,
		termination: CancellationToken,
	) -> Result<Self, iroh::endpoint::BindError> {
		let mut builder = Endpoint::builder(iroh::endpoint::presets::N0)
			.secret_key(config.secret_key.clone());

		if let Some(addr) = config.bind_addr {
			builder = builder
				.bind_addr(addr)
				.expect("SocketAddr to socket addr conversion is infallible");
		}

		let endpoint = builder.bind().await?;

		Ok(Self(Arc::new(Inner {
			endpoint,
			config,
			termination,
		})))
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.0.endpoint
	}

	pub fn config(&self) -> &TransportConfig {
		&self.0.config
	}

	/// The local endpoint identity.
	pub fn id(&self) -> EndpointId {
		self.0.endpoint.id()
	}

	/// The local dialable address.
	pub fn addr(&self) -> EndpointAddr {
		self.0.endpoint.addr()
	}

	/// Cancellation token bound to agent shutdown.
	pub fn termination(&self) -> &CancellationToken {
		&self.0.termination
	}

	/// Whether a remote socket address passes the source filter.
	pub fn allows(&self, remote: SocketAddr) -> bool {
		cidr::allowed(&self.0.config.allowed_cidrs, remote.ip())
	}

	/// Opens a protocol stream on a fresh connection.
	pub async fn connect(
		&self,
		remote: impl Into<EndpointAddr>,
		alpn: &[u8],
	) -> Result<Link, OpenError> {
		Link::open(self, remote, alpn).await
	}

	/// Builds a connection pool on this transport.
	pub fn pool(&self) -> ConnectionPool {
		ConnectionPool::new(self.clone(), self.0.config.idle_timeout)
	}
}

impl core::fmt::Debug for Transport {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Transport")
			.field("id", &self.0.endpoint.id())
			.finish_non_exhaustive()
	}
}
