//! KV reads. Writes travel through the log; see the dispatcher.

use crate::{
	rpc::{ResponsePayload, RpcError},
	state::StoreState,
};

pub fn get(
	state: &StoreState,
	key: &str,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::KvEntry(state.kv_get(key).cloned()))
}

pub fn list(
	state: &StoreState,
	prefix: &str,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::KvEntries(state.kv_prefix(prefix)))
}
