//! The service façades layered over the state store: catalog, health, KV,
//! sessions, ACL and config entries. Reads evaluate against immutable
//! snapshots; writes are normalized here and then proposed to the log by
//! the RPC dispatcher.

pub mod acl;
pub mod catalog;
pub mod config_entry;
pub mod health;
pub mod kv;
pub mod session;

pub use acl::{Acl, AclConfig, Authorizer, DownPolicy};

use crate::{
	rpc::{RequestPayload, ResponsePayload, RpcError},
	state::StoreState,
};

/// Evaluates a read against a state snapshot.
///
/// Panics on write payloads; the dispatcher routes those through the log.
pub fn evaluate(
	payload: &RequestPayload,
	state: &StoreState,
	datacenter: &str,
) -> Result<ResponsePayload, RpcError> {
	use RequestPayload::*;

	match payload {
		ListNodes => catalog::list_nodes(state),
		ListServices => catalog::list_services(state),
		ServiceNodes { service, tag } => {
			catalog::service_nodes(state, service, tag.as_deref())
		}
		NodeServices { node } => catalog::node_services(state, node),

		NodeChecks { node } => health::node_checks(state, node),
		ServiceHealth { service, tag } => {
			health::service_health(state, service, tag.as_deref())
		}

		KvGet { key } => kv::get(state, key),
		KvList { prefix } => kv::list(state, prefix),

		SessionGet { id } => session::get(state, id),
		SessionList => session::list(state),

		ConfigGet { kind, name } => config_entry::get(state, kind, name),
		ConfigList { kind } => config_entry::list(state, kind),
		CompileChain { service } => {
			config_entry::compile_chain(state, datacenter, service)
		}

		CoordinateGet { node } => Ok(ResponsePayload::Coordinate(
			state.coordinate(node).cloned(),
		)),

		PreparedQueryExecute { name_or_id } => {
			let Some(query) = state.prepared_query(name_or_id) else {
				return Err(RpcError::Consistency(format!(
					"no prepared query named {name_or_id:?}"
				)));
			};

			let mut results =
				state.service_health(&query.service, query.tag.as_deref());
			if query.only_passing {
				results.retain(|(_, _, checks)| {
					crate::state::StoreState::aggregate_status(checks)
						== crate::types::CheckStatus::Passing
				});
			}
			Ok(ResponsePayload::ServiceHealth(results))
		}

		IntentionList => {
			Ok(ResponsePayload::Intentions(state.list_intentions()))
		}

		IntentionCheck {
			source,
			destination,
		} => Ok(ResponsePayload::IntentionVerdict(
			state.intention_allowed(source, destination),
		)),

		_ => unreachable!("write payloads are dispatched through the log"),
	}
}

/// Write-side validation and normalization applied on the serving leader
/// before an entry is proposed.
pub fn normalize_write(
	payload: RequestPayload,
) -> Result<RequestPayload, RpcError> {
	use RequestPayload::*;

	Ok(match payload {
		SessionCreate { session } => SessionCreate {
			session: session::normalize_create(session),
		},

		PreparedQueryUpsert { mut query } => {
			if query.id.is_nil() {
				query.id = uuid::Uuid::new_v4();
			}
			PreparedQueryUpsert { query }
		}

		IntentionUpsert { mut intention } => {
			if intention.id.is_nil() {
				intention.id = uuid::Uuid::new_v4();
			}
			IntentionUpsert { intention }
		}

		ConfigApply { entry } => {
			entry
				.validate()
				.map_err(|e| RpcError::Consistency(e.to_string()))?;
			ConfigApply { entry }
		}

		Register {
			node,
			services,
			checks,
		} => {
			crate::types::validate_meta(&node.meta)
				.map_err(|e| RpcError::Consistency(e.to_string()))?;
			for service in &services {
				crate::types::validate_meta(&service.meta)
					.map_err(|e| RpcError::Consistency(e.to_string()))?;
			}
			Register {
				node,
				services,
				checks,
			}
		}

		other => other,
	})
}
