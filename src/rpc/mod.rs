//! RPC dispatch and forwarding.
//!
//! Every request carries [`QueryOptions`] deciding its consistency mode
//! and blocking behavior; the [`Dispatcher`] serves it locally, forwards
//! it to the leader, or routes it to a remote datacenter through that
//! datacenter's WAN-known servers. Rate limits and per-client connection
//! caps shed load before any work is done.

mod dispatcher;
mod limits;
mod options;
mod proto;
mod raft;
mod server;

pub use {
	dispatcher::{Dispatcher, DispatcherConfig, RPC_ALPN},
	limits::{ClientLimiter, FailedServers, RateLimiter},
	options::{QueryMeta, QueryOptions},
	proto::{
		Disposition,
		RequestPayload,
		ResponsePayload,
		RpcError,
		RpcRequest,
		RpcResponse,
	},
	raft::{RAFT_ALPN, RaftFrame, RaftOutbound, RaftProtocol},
	server::RpcProtocol,
};
