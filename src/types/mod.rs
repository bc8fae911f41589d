//! Core data model shared by the state store, the FSM, the RPC surface and
//! the agent-local registry.
//!
//! Everything here is plain data: serde-serializable, cheap to clone, with
//! no behavior beyond validation and normalization helpers. Replicated
//! entities are owned by the cluster and only mutated through committed FSM
//! transitions; the types themselves carry no index bookkeeping (the state
//! store wraps them in rows that do).

mod acl;
mod check;
mod coordinate;
mod kv;
mod node;
mod query;
mod service;
mod session;

pub use {
	acl::{
		AclPolicy,
		AclRole,
		AclRule,
		AclTokenId,
		NodeIdentity,
		Permission,
		Resource,
		ServiceIdentity,
		Token,
	},
	check::{Check, CheckDefinition, CheckId, CheckStatus},
	coordinate::{COORDINATE_DIMENSIONS, Coordinate},
	kv::KvEntry,
	node::{
		InvalidMeta,
		MAX_META_KEYS,
		Node,
		NodeId,
		NodeName,
		Segment,
		TaggedAddressKey,
		validate_meta,
	},
	query::{Intention, IntentionAction, PreparedQuery},
	service::{Service, ServiceAddress, ServiceId, ServiceName, ServiceProxy},
	session::{
		SESSION_TTL_MAX,
		SESSION_TTL_MIN,
		Session,
		SessionBehavior,
		SessionId,
	},
};
