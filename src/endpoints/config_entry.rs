//! Config-entry reads and discovery-chain compilation.

use crate::{
	chain::{self, CompileRequest},
	rpc::{ResponsePayload, RpcError},
	state::StoreState,
};

pub fn get(
	state: &StoreState,
	kind: &str,
	name: &str,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::ConfigEntry(
		state.config_entry(kind, name).map(|row| row.value.clone()),
	))
}

pub fn list(
	state: &StoreState,
	kind: &str,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::ConfigEntries(
		state.config_entries_of_kind(kind),
	))
}

/// Compiles the discovery chain for a service against the committed entry
/// set visible in this snapshot.
pub fn compile_chain(
	state: &StoreState,
	datacenter: &str,
	service: &str,
) -> Result<ResponsePayload, RpcError> {
	let entries = state.all_config_entries();
	let chain = chain::compile(CompileRequest {
		service,
		datacenter,
		entries: &entries,
	})
	.map_err(|e| RpcError::Consistency(e.to_string()))?;

	Ok(ResponsePayload::Chain(Box::new(chain)))
}
