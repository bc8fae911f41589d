//! Meridian: a distributed service-discovery and coordination agent.
//!
//! A cluster is a set of long-running agents. A small subset run as
//! servers: they replicate a consistent state store through a
//! leader-based consensus log and serve the catalog, health, KV, session
//! and ACL surfaces. The rest run as clients and proxy every operation to
//! the servers. All members exchange liveness and membership through the
//! gossip layer; federation across datacenters rides a second, wide-area
//! gossip pool among the servers.

pub mod agent;
pub mod chain;
pub mod config;
pub mod consensus;
pub mod endpoints;
pub mod fsm;
pub mod gossip;
pub mod primitives;
pub mod rpc;
pub mod state;
pub mod transport;
pub mod types;

mod error;

pub use error::Error;

pub mod prelude {
	pub use super::{
		Error,
		agent::Agent,
		config::RuntimeConfig,
		rpc::{QueryOptions, RequestPayload, ResponsePayload},
		types::*,
	};
}
